//! What the user is listening to, and how that becomes a status line.
//!
//! An [`Activity`] is the result of one poll of an activity source. It is
//! mapped to an [`ActivitySnapshot`] and then rendered by [`StatusFormat`]
//! into the `(text, icon)` pair a status sink understands.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Icon shown next to an active status unless configured otherwise.
pub const DEFAULT_ICON: &str = ":headphones:";

/// Slack rejects status texts longer than this.
pub const DEFAULT_MAX_LENGTH: usize = 100;

/// A playing item as reported by the activity source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub artists: Vec<String>,
    /// Release year of the album, when the source knows it.
    pub year: Option<String>,
}

impl Track {
    pub fn new(
        name: impl Into<String>,
        artists: impl IntoIterator<Item = impl Into<String>>,
        year: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            artists: artists.into_iter().map(Into::into).collect(),
            year,
        }
    }

    /// Renders `"{name} by {artists} - {year}"`.
    ///
    /// Artists are joined with `", "`. The `by` and year parts are dropped
    /// when the source did not provide them.
    pub fn display_text(&self) -> String {
        let mut text = self.name.clone();
        if !self.artists.is_empty() {
            text.push_str(" by ");
            text.push_str(&self.artists.join(", "));
        }
        if let Some(ref year) = self.year
            && !year.is_empty()
        {
            text.push_str(" - ");
            text.push_str(year);
        }
        text
    }
}

/// Outcome of a successful poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Activity {
    /// Something is playing right now.
    Active(Track),
    /// Nothing is playing (or playback is paused).
    Idle,
}

/// The mapped result of a poll. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub is_active: bool,
    pub display_text: String,
}

impl ActivitySnapshot {
    /// The "nothing playing" snapshot. Publishing it clears the status.
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn active(display_text: impl Into<String>) -> Self {
        Self {
            is_active: true,
            display_text: display_text.into(),
        }
    }
}

impl From<&Activity> for ActivitySnapshot {
    fn from(activity: &Activity) -> Self {
        match activity {
            Activity::Active(track) => Self::active(track.display_text()),
            Activity::Idle => Self::idle(),
        }
    }
}

/// A rendered `(text, icon)` pair ready for a status sink.
///
/// Empty text and icon is the canonical "clear status" update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub text: String,
    pub icon: String,
}

impl StatusUpdate {
    pub fn new(text: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            icon: icon.into(),
        }
    }

    pub fn clear() -> Self {
        Self::default()
    }

    pub fn is_clear(&self) -> bool {
        self.text.is_empty() && self.icon.is_empty()
    }
}

/// Turns snapshots into status updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusFormat {
    /// Icon attached to active statuses.
    pub icon: String,
    /// Maximum text length in characters; longer texts end in `...`.
    pub max_length: usize,
}

impl Default for StatusFormat {
    fn default() -> Self {
        Self {
            icon: DEFAULT_ICON.to_string(),
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

impl StatusFormat {
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn render(&self, snapshot: &ActivitySnapshot) -> StatusUpdate {
        if !snapshot.is_active {
            return StatusUpdate::clear();
        }
        StatusUpdate::new(
            ellipsis(&snapshot.display_text, self.max_length),
            self.icon.clone(),
        )
    }
}

/// Truncates `s` to at most `max_len` characters, ending in `...` when cut.
pub fn ellipsis(s: &str, max_len: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_len {
        return Cow::Borrowed(s);
    }
    if max_len <= 3 {
        return Cow::Owned(s.chars().take(max_len).collect());
    }
    let mut truncated: String = s.chars().take(max_len - 3).collect();
    truncated.push_str("...");
    Cow::Owned(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song_a() -> Track {
        Track::new("Song A", ["Artist B"], Some("2020".to_string()))
    }

    #[test]
    fn display_text_single_artist() {
        assert_eq!(song_a().display_text(), "Song A by Artist B - 2020");
    }

    #[test]
    fn display_text_joins_artists() {
        let track = Track::new("Duet", ["One", "Two", "Three"], Some("1999".to_string()));
        insta::assert_snapshot!(track.display_text(), @"Duet by One, Two, Three - 1999");
    }

    #[test]
    fn display_text_without_year_or_artists() {
        let track = Track::new("Untitled", Vec::<String>::new(), None);
        assert_eq!(track.display_text(), "Untitled");

        let track = Track::new("Demo", ["Someone"], Some(String::new()));
        assert_eq!(track.display_text(), "Demo by Someone");
    }

    #[test]
    fn active_snapshot_renders_with_icon() {
        let snapshot = ActivitySnapshot::from(&Activity::Active(song_a()));
        assert!(snapshot.is_active);

        let update = StatusFormat::default().render(&snapshot);
        assert_eq!(
            update,
            StatusUpdate::new("Song A by Artist B - 2020", ":headphones:")
        );
    }

    #[test]
    fn idle_snapshot_renders_clear() {
        let snapshot = ActivitySnapshot::from(&Activity::Idle);
        assert_eq!(snapshot, ActivitySnapshot::idle());

        let update = StatusFormat::default().render(&snapshot);
        assert!(update.is_clear());
        assert_eq!(update, StatusUpdate::new("", ""));
    }

    #[test]
    fn long_text_is_truncated() {
        let format = StatusFormat::default().with_max_length(12);
        let update = format.render(&ActivitySnapshot::active("Song A by Artist B - 2020"));
        assert_eq!(update.text, "Song A by...");
        assert_eq!(update.text.chars().count(), 12);
    }

    #[test]
    fn ellipsis_edge_cases() {
        assert_eq!(ellipsis("short", 10), "short");
        assert_eq!(ellipsis("exactly", 7), "exactly");
        assert_eq!(ellipsis("abcdef", 2), "ab");
        assert_eq!(ellipsis("日本語のタイトル", 5), "日本...");
    }

    #[test]
    fn activity_serializes_with_state_tag() {
        let json = serde_json::to_value(Activity::Idle).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "idle" }));
    }
}
