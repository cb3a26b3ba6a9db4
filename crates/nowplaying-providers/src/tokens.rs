//! OAuth token records and their persistence.
//!
//! [`TokenStore`] is the seam between the token lifecycle and the medium the
//! tokens live in. [`FileTokenStore`] keeps the access and refresh tokens as
//! two independent single-line files in a private directory, each replaced
//! atomically (write to a temporary file, then rename). [`MemoryTokenStore`]
//! keeps them in process memory only.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::StoreError;

const ACCESS_TOKEN_FILE: &str = "access_token";
const REFRESH_TOKEN_FILE: &str = "refresh_token";

/// The credentials obtained from the token endpoint.
///
/// No expiry is tracked: an expired access token is detected when an API
/// call is answered with an authorization failure.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    /// Absent when the provider did not issue one.
    pub refresh_token: Option<String>,
    /// When the access token was obtained (exchange or last refresh).
    pub obtained_at: DateTime<Utc>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            obtained_at: Utc::now(),
        }
    }

    /// Returns a copy carrying a new access token.
    ///
    /// The refresh token is replaced only when the provider rotated it.
    pub fn refreshed(&self, access_token: impl Into<String>, rotated: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: rotated.or_else(|| self.refresh_token.clone()),
            obtained_at: Utc::now(),
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Durable storage for a [`TokenSet`].
///
/// Implementations must never expose a half-written record and are
/// last-write-wins.
pub trait TokenStore: Send + Sync + fmt::Debug {
    /// Returns `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<TokenSet>, StoreError>;

    fn save(&self, tokens: &TokenSet) -> Result<(), StoreError>;

    /// Removes any stored tokens. Clearing an empty store succeeds.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Tokens kept as two files, `access_token` and `refresh_token`, in a
/// directory only the current user can read.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.local/share/nowplaying/tokens`, or `./tokens` without a home.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nowplaying")
            .join("tokens")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn access_token_path(&self) -> PathBuf {
        self.dir.join(ACCESS_TOKEN_FILE)
    }

    pub fn refresh_token_path(&self) -> PathBuf {
        self.dir.join(REFRESH_TOKEN_FILE)
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700));
        }
        Ok(())
    }

    fn read_record(path: &Path) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(content.lines().next().map(|l| l.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn write_record(path: &Path, value: &str) -> Result<(), StoreError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::corrupt(path, "record path has no file name"))?;
        let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

        let mut file = fs::File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| StoreError::io(&temp_path, e))?;
        }
        writeln!(file, "{}", value).map_err(|e| StoreError::io(&temp_path, e))?;
        file.sync_all().map_err(|e| StoreError::io(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, path).map_err(|e| StoreError::io(path, e))
    }

    fn remove_record(path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<TokenSet>, StoreError> {
        let access_path = self.access_token_path();
        let Some(access_token) = Self::read_record(&access_path)? else {
            debug!(dir = %self.dir.display(), "no stored access token");
            return Ok(None);
        };
        if access_token.is_empty() {
            return Err(StoreError::corrupt(&access_path, "access token record is empty"));
        }

        let refresh_token =
            Self::read_record(&self.refresh_token_path())?.filter(|t| !t.is_empty());

        let obtained_at = fs::metadata(&access_path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        info!(dir = %self.dir.display(), "loaded stored tokens");
        Ok(Some(TokenSet {
            access_token,
            refresh_token,
            obtained_at,
        }))
    }

    fn save(&self, tokens: &TokenSet) -> Result<(), StoreError> {
        self.ensure_dir()?;

        // Refresh token first: a reader that sees the new access token also
        // sees the refresh token that belongs to it.
        match tokens.refresh_token {
            Some(ref refresh) if !refresh.is_empty() => {
                Self::write_record(&self.refresh_token_path(), refresh)?
            }
            _ => Self::remove_record(&self.refresh_token_path())?,
        }
        Self::write_record(&self.access_token_path(), &tokens.access_token)?;

        debug!(dir = %self.dir.display(), "saved tokens");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        Self::remove_record(&self.access_token_path())?;
        Self::remove_record(&self.refresh_token_path())?;
        info!(dir = %self.dir.display(), "cleared stored tokens");
        Ok(())
    }
}

/// Process-local token storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<TokenSet>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `tokens`.
    pub fn with_tokens(tokens: TokenSet) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<TokenSet>, StoreError> {
        Ok(self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, tokens: &TokenSet) -> Result<(), StoreError> {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn refreshed_keeps_refresh_token_unless_rotated() {
        let tokens = TokenSet::new("AT1", Some("RT1".to_string()));

        let kept = tokens.refreshed("AT2", None);
        assert_eq!(kept.access_token, "AT2");
        assert_eq!(kept.refresh_token.as_deref(), Some("RT1"));

        let rotated = tokens.refreshed("AT3", Some("RT2".to_string()));
        assert_eq!(rotated.refresh_token.as_deref(), Some("RT2"));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let tokens = TokenSet::new("secret-access", Some("secret-refresh".to_string()));
        let debug = format!("{:?}", tokens);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens"));

        store
            .save(&TokenSet::new("AT1", Some("RT1".to_string())))
            .unwrap();

        let loaded = FileTokenStore::new(dir.path().join("tokens"))
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(loaded.access_token, "AT1");
        assert_eq!(loaded.refresh_token.as_deref(), Some("RT1"));
    }

    #[test]
    fn file_store_records_are_single_strings() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());

        store
            .save(&TokenSet::new("AT1", Some("RT1".to_string())))
            .unwrap();

        let access = fs::read_to_string(store.access_token_path()).unwrap();
        let refresh = fs::read_to_string(store.refresh_token_path()).unwrap();
        assert_eq!(access.trim(), "AT1");
        assert_eq!(refresh.trim(), "RT1");

        // No temporary files are left behind.
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{:?}", names);
    }

    #[test]
    fn file_store_last_write_wins() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());

        store
            .save(&TokenSet::new("AT1", Some("RT1".to_string())))
            .unwrap();
        store
            .save(&TokenSet::new("AT2", Some("RT1".to_string())))
            .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, "AT2");
        assert_eq!(loaded.refresh_token.as_deref(), Some("RT1"));
    }

    #[test]
    fn file_store_without_refresh_token_removes_stale_record() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());

        store
            .save(&TokenSet::new("AT1", Some("RT1".to_string())))
            .unwrap();
        store.save(&TokenSet::new("AT2", None)).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, "AT2");
        assert!(loaded.refresh_token.is_none());
        assert!(!store.refresh_token_path().exists());
    }

    #[test]
    fn file_store_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("never-written"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn file_store_empty_access_record_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        fs::write(store.access_token_path(), "\n").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn file_store_clear() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());

        store
            .save(&TokenSet::new("AT1", Some("RT1".to_string())))
            .unwrap();
        store.clear().unwrap();

        assert!(!store.access_token_path().exists());
        assert!(!store.refresh_token_path().exists());
        assert!(store.load().unwrap().is_none());

        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn file_store_records_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        store.save(&TokenSet::new("AT1", None)).unwrap();

        let mode = fs::metadata(store.access_token_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryTokenStore::new();
        assert!(store.load().unwrap().is_none());

        store
            .save(&TokenSet::new("AT1", Some("RT1".to_string())))
            .unwrap();
        assert_eq!(store.load().unwrap().unwrap().access_token, "AT1");

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
