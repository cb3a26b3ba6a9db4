//! Activity sources: where "what is playing right now" comes from.

use std::time::Duration;

use nowplaying_core::Track;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::BoxFuture;
use crate::error::{ProviderError, ProviderResult};

pub const SPOTIFY_CURRENTLY_PLAYING_URL: &str =
    "https://api.spotify.com/v1/me/player/currently-playing";

/// Result of one activity query.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Something is playing.
    Active(Track),
    /// Nothing is playing, or playback is paused.
    Idle,
    /// The access token was rejected. Refresh and try again.
    AuthExpired,
    /// Anything else. Worth retrying on the next tick.
    Transient(ProviderError),
}

impl FetchOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Active(_) => "active",
            Self::Idle => "idle",
            Self::AuthExpired => "auth_expired",
            Self::Transient(_) => "transient",
        }
    }
}

/// Reports the user's current media activity.
pub trait ActivitySource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Queries the current activity with `access_token`.
    ///
    /// Never fails: every failure mode is one of the [`FetchOutcome`]
    /// variants.
    fn fetch_current<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, FetchOutcome>;
}

/// Spotify's "currently playing" endpoint.
#[derive(Debug, Clone)]
pub struct SpotifyActivitySource {
    api_url: String,
    http_client: reqwest::Client,
}

impl SpotifyActivitySource {
    pub fn new(timeout: Duration) -> ProviderResult<Self> {
        Self::with_url(SPOTIFY_CURRENTLY_PLAYING_URL, timeout)
    }

    pub fn with_url(api_url: impl Into<String>, timeout: Duration) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::internal("failed to create HTTP client").with_source(e))?;

        Ok(Self {
            api_url: api_url.into(),
            http_client,
        })
    }

    async fn query(&self, access_token: &str) -> ProviderResult<FetchOutcome> {
        let response = self
            .http_client
            .get(&self.api_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ProviderError::from_request)?;

        let status = response.status();
        debug!(%status, "currently-playing response");

        if status == StatusCode::NO_CONTENT {
            return Ok(FetchOutcome::Idle);
        }

        if status == StatusCode::UNAUTHORIZED {
            return Ok(FetchOutcome::AuthExpired);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(ProviderError::rate_limited(format!(
                "rate limit exceeded{}",
                retry_after
                    .map(|s| format!(", retry after {} seconds", s))
                    .unwrap_or_default()
            )));
        }

        if status == StatusCode::FORBIDDEN {
            return Err(ProviderError::authorization(
                "access to playback state denied, check the granted scopes",
            ));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::server(format!("API error ({}): {}", status, body)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {}", e)))?;

        parse_currently_playing(&body)
    }
}

impl ActivitySource for SpotifyActivitySource {
    fn name(&self) -> &str {
        "spotify"
    }

    fn fetch_current<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, FetchOutcome> {
        Box::pin(async move {
            match self.query(access_token).await {
                Ok(outcome) => outcome,
                Err(e) => FetchOutcome::Transient(e.with_provider("spotify")),
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct CurrentlyPlaying {
    #[serde(default)]
    is_playing: bool,
    item: Option<PlayingItem>,
}

#[derive(Debug, Deserialize)]
struct PlayingItem {
    name: String,
    #[serde(default)]
    artists: Vec<Artist>,
    album: Option<Album>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Album {
    release_date: Option<String>,
}

/// Maps a 200 body of the currently-playing endpoint to an outcome.
///
/// Paused playback and bodies without an item (ads, podcasts with the
/// item hidden) are `Idle`. The year is the first four characters of the
/// album release date, which may be `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
pub fn parse_currently_playing(body: &str) -> ProviderResult<FetchOutcome> {
    if body.trim().is_empty() {
        return Ok(FetchOutcome::Idle);
    }

    let parsed: CurrentlyPlaying = serde_json::from_str(body).map_err(|e| {
        ProviderError::invalid_response(format!("failed to parse response: {}", e))
    })?;

    let Some(item) = parsed.item else {
        trace!("no item in currently-playing response");
        return Ok(FetchOutcome::Idle);
    };
    if !parsed.is_playing {
        return Ok(FetchOutcome::Idle);
    }

    let year = item
        .album
        .and_then(|a| a.release_date)
        .and_then(|d| d.get(..4).map(str::to_string));

    Ok(FetchOutcome::Active(Track::new(
        item.name,
        item.artists.into_iter().map(|a| a.name),
        year,
    )))
}
