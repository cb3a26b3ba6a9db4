//! Client configuration.
//!
//! Everything lives in one `config.toml`, `~/.config/nowplaying/config.toml`
//! by default. `client_id`, `client_secret` and the status `token` accept
//! secret references (see [`crate::secret`]).

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nowplaying_core::{DEFAULT_ICON, DEFAULT_MAX_LENGTH, StatusFormat};
use nowplaying_providers::{
    DEFAULT_CALLBACK_PORT, FileTokenStore, OAuthCredentials, OAuthEndpoints,
    SLACK_PROFILE_SET_URL, SPOTIFY_AUTHORIZE_URL, SPOTIFY_CURRENTLY_PLAYING_URL,
    SPOTIFY_DEFAULT_SCOPE, SPOTIFY_TOKEN_URL,
};
use nowplaying_sync::SyncConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::secret;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Where tokens are persisted. `~` expands to the home directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_dir: Option<PathBuf>,

    pub oauth: OAuthSettings,
    pub activity: ActivitySettings,
    pub status: StatusSettings,
    pub sync: SyncSettings,
}

/// Authorization server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    pub authorize_url: String,
    pub token_url: String,
    /// Loopback port for the redirect; must match the registered redirect URI.
    pub callback_port: u16,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            scopes: vec![SPOTIFY_DEFAULT_SCOPE.to_string()],
            authorize_url: SPOTIFY_AUTHORIZE_URL.to_string(),
            token_url: SPOTIFY_TOKEN_URL.to_string(),
            callback_port: DEFAULT_CALLBACK_PORT,
        }
    }
}

impl OAuthSettings {
    pub fn callback_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.callback_port))
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://{}/callback", self.callback_addr())
    }

    pub fn endpoints(&self) -> OAuthEndpoints {
        OAuthEndpoints {
            authorize_url: self.authorize_url.clone(),
            token_url: self.token_url.clone(),
            redirect_uri: self.redirect_uri(),
        }
    }

    /// Resolves both credentials, expanding secret references.
    pub fn resolve_credentials(&self) -> ClientResult<OAuthCredentials> {
        let client_id = required(self.client_id.as_deref(), "oauth.client_id")?;
        let client_secret = required(self.client_secret.as_deref(), "oauth.client_secret")?;

        let credentials = OAuthCredentials::new(
            secret::resolve(client_id).map_err(|e| ClientError::secret("oauth.client_id", e))?,
            secret::resolve(client_secret)
                .map_err(|e| ClientError::secret("oauth.client_secret", e))?,
        )
        .with_scopes(self.scopes.clone());
        credentials.validate().map_err(ClientError::config)?;
        Ok(credentials)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitySettings {
    pub api_url: String,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            api_url: SPOTIFY_CURRENTLY_PLAYING_URL.to_string(),
        }
    }
}

/// Status sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub api_url: String,
    pub icon: String,
    /// Longer texts are cut and end with an ellipsis.
    pub max_length: usize,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            token: None,
            api_url: SLACK_PROFILE_SET_URL.to_string(),
            icon: DEFAULT_ICON.to_string(),
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

impl StatusSettings {
    pub fn resolve_token(&self) -> ClientResult<String> {
        let token = required(self.token.as_deref(), "status.token")?;
        secret::resolve(token).map_err(|e| ClientError::secret("status.token", e))
    }

    pub fn format(&self) -> StatusFormat {
        StatusFormat::default()
            .with_icon(self.icon.clone())
            .with_max_length(self.max_length)
    }
}

/// Timings, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    pub authorization_timeout_secs: u64,
    pub clear_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            request_timeout_secs: 10,
            authorization_timeout_secs: 300,
            clear_timeout_secs: 5,
        }
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn authorization_timeout(&self) -> Duration {
        Duration::from_secs(self.authorization_timeout_secs)
    }
}

impl ClientConfig {
    /// Loads `path` if given, otherwise the default file if it exists.
    ///
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> ClientResult<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ClientResult<Self> {
        toml::from_str(content)
            .map_err(|e| ClientError::config(format!("failed to parse config: {}", e)))
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nowplaying")
            .join("config.toml")
    }

    pub fn token_dir(&self) -> PathBuf {
        match &self.token_dir {
            Some(dir) => expand_home(dir),
            None => FileTokenStore::default_dir(),
        }
    }

    /// Every problem that would stop the sync engine from starting.
    ///
    /// Only checks presence and ranges; secret references are not resolved.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (key, value) in [
            ("oauth.client_id", &self.oauth.client_id),
            ("oauth.client_secret", &self.oauth.client_secret),
            ("status.token", &self.status.token),
        ] {
            if value.as_deref().is_none_or(|v| v.trim().is_empty()) {
                problems.push(format!("{} is required", key));
            }
        }
        if self.oauth.scopes.iter().all(|s| s.trim().is_empty()) {
            problems.push("oauth.scopes must name at least one scope".to_string());
        }
        if self.oauth.callback_port == 0 {
            problems.push("oauth.callback_port must not be 0".to_string());
        }
        if self.status.max_length == 0 {
            problems.push("status.max_length must be positive".to_string());
        }
        if self.sync.interval_secs == 0 {
            problems.push("sync.interval_secs must be positive".to_string());
        }
        if self.sync.request_timeout_secs == 0 {
            problems.push("sync.request_timeout_secs must be positive".to_string());
        }

        problems
    }

    pub fn validate(&self) -> ClientResult<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ClientError::config(problems.join("; ")))
        }
    }

    /// The engine configuration these settings describe.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new(Duration::from_secs(self.sync.interval_secs))
            .with_authorization_timeout(self.sync.authorization_timeout())
            .with_clear_timeout(Duration::from_secs(self.sync.clear_timeout_secs))
            .with_callback_addr(self.oauth.callback_addr())
            .with_status_format(self.status.format())
    }
}

fn required<'a>(value: Option<&'a str>, key: &str) -> ClientResult<&'a str> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            ClientError::config(format!(
                "{} is missing from {}",
                key,
                ClientConfig::default_path().display()
            ))
        })
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
token_dir = "/var/lib/nowplaying"

[oauth]
client_id = "id"
client_secret = "secret"
callback_port = 8888

[status]
token = "xoxp-1"
icon = ":notes:"
max_length = 40

[sync]
interval_secs = 30
"#;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ClientConfig::parse("").unwrap();

        assert_eq!(config.oauth.scopes, vec!["user-read-currently-playing"]);
        assert_eq!(config.oauth.callback_port, 3000);
        assert_eq!(config.status.icon, ":headphones:");
        assert_eq!(config.sync.interval_secs, 15);
        assert_eq!(config.sync.request_timeout_secs, 10);
        assert_eq!(config.token_dir(), FileTokenStore::default_dir());
    }

    #[test]
    fn parses_every_section() {
        let config = ClientConfig::parse(FULL).unwrap();

        assert_eq!(config.token_dir(), PathBuf::from("/var/lib/nowplaying"));
        assert_eq!(config.oauth.redirect_uri(), "http://127.0.0.1:8888/callback");
        assert_eq!(config.oauth.endpoints().token_url, SPOTIFY_TOKEN_URL);
        assert_eq!(config.status.resolve_token().unwrap(), "xoxp-1");
        assert!(config.problems().is_empty());

        let sync = config.sync_config();
        assert_eq!(sync.interval, Duration::from_secs(30));
        assert_eq!(sync.callback_addr.port(), 8888);
        assert_eq!(sync.status_format.icon, ":notes:");
        assert_eq!(sync.status_format.max_length, 40);
    }

    #[test]
    fn credentials_resolve_env_references() {
        unsafe {
            std::env::set_var("_NP_CFG_TEST_ID", "env-id");
        }
        let config = ClientConfig::parse(
            "[oauth]\nclient_id = \"env::_NP_CFG_TEST_ID\"\nclient_secret = \"plain\"\n",
        )
        .unwrap();

        let credentials = config.oauth.resolve_credentials().unwrap();
        assert_eq!(credentials.client_id, "env-id");
        assert_eq!(credentials.client_secret, "plain");
        unsafe {
            std::env::remove_var("_NP_CFG_TEST_ID");
        }
    }

    #[test]
    fn unresolvable_secret_names_the_field() {
        let config = ClientConfig::parse(
            "[status]\ntoken = \"env::_NP_CFG_SURELY_UNSET_7731\"\n",
        )
        .unwrap();

        let err = config.status.resolve_token().unwrap_err().to_string();
        assert!(err.contains("status.token"), "{}", err);
    }

    #[test]
    fn reports_every_missing_key() {
        let problems = ClientConfig::default().problems();

        assert_eq!(
            problems,
            vec![
                "oauth.client_id is required",
                "oauth.client_secret is required",
                "status.token is required",
            ]
        );
        assert!(ClientConfig::default().validate().is_err());
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut config = ClientConfig::parse(FULL).unwrap();
        config.status.token = Some("  ".to_string());
        config.sync.interval_secs = 0;

        assert_eq!(
            config.problems(),
            vec![
                "status.token is required",
                "sync.interval_secs must be positive"
            ]
        );
    }

    #[test]
    fn dump_parses_back() {
        let config = ClientConfig::parse(FULL).unwrap();
        let dumped = toml::to_string_pretty(&config).unwrap();
        let again = ClientConfig::parse(&dumped).unwrap();

        assert_eq!(again.oauth.client_id.as_deref(), Some("id"));
        assert_eq!(again.oauth.callback_port, 8888);
        assert_eq!(again.token_dir, config.token_dir);
    }

    #[test]
    fn tilde_expands_to_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_home(Path::new("~/tokens")), home.join("tokens"));
        assert_eq!(expand_home(Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");

        assert!(ClientConfig::load(Some(&missing)).is_err());

        let present = dir.path().join("config.toml");
        std::fs::write(&present, FULL).unwrap();
        let config = ClientConfig::load(Some(&present)).unwrap();
        assert_eq!(config.sync.interval_secs, 30);
    }
}
