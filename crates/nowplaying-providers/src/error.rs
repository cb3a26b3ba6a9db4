//! Error types for talking to OAuth providers, activity sources and status
//! sinks, and for token persistence.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// High-level classification of a [`ProviderError`], used for retry
/// decisions and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// Credentials are invalid or the access token expired.
    AuthenticationFailed,
    /// Authenticated, but not allowed (missing scope, revoked consent).
    AuthorizationFailed,
    /// Connection failed, timed out, DNS, etc.
    NetworkError,
    /// Too many requests.
    RateLimited,
    /// The remote side returned an error status.
    ServerError,
    /// The response body could not be understood.
    InvalidResponse,
    /// Missing or invalid local configuration.
    ConfigurationError,
    /// Unexpected local state.
    InternalError,
}

impl ProviderErrorCode {
    /// Returns true if the operation may succeed when simply tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::RateLimited | Self::ServerError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::AuthorizationFailed => "authorization_failed",
            Self::NetworkError => "network_error",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::InvalidResponse => "invalid_response",
            Self::ConfigurationError => "configuration_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised by a remote collaborator (token endpoint, activity API,
/// status API) or by the local plumbing around it.
#[derive(Debug, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    /// Which collaborator produced the error (e.g. "spotify", "slack").
    provider: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            source: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AuthenticationFailed, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AuthorizationFailed, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NetworkError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::RateLimited, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ServerError, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidResponse, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ConfigurationError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InternalError, message)
    }

    /// Classifies a transport failure from `reqwest`.
    pub fn from_request(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timeout".to_string()
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            format!("request failed: {}", err)
        };
        Self::network(message).with_source(err)
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref provider) = self.provider {
            write!(f, "[{}] ", provider)?;
        }
        write!(f, "{}: {}", self.code, self.message)
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failures of the OAuth token lifecycle.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token endpoint answered with a non-2xx status.
    #[error("token request rejected by provider ({provider_status}): {reason}")]
    Rejected { provider_status: u16, reason: String },

    /// A refresh was requested but no refresh token is stored.
    #[error("no refresh token stored, re-authorization required")]
    MissingRefreshToken,

    /// The authorization code was already handed to the token endpoint.
    #[error("authorization code was already exchanged")]
    CodeAlreadyConsumed,

    /// No access token is available yet.
    #[error("not authenticated, run the authorization flow first")]
    NotAuthenticated,

    /// The user or provider declined the consent request.
    #[error("authorization denied: {0}")]
    Denied(String),

    /// No authorization code arrived in time.
    #[error("timed out waiting for the authorization callback")]
    CallbackTimeout,

    /// The token endpoint could not be reached or answered garbage.
    #[error(transparent)]
    Transport(#[from] ProviderError),
}

impl AuthError {
    pub fn rejected(provider_status: u16, reason: impl Into<String>) -> Self {
        Self::Rejected {
            provider_status,
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            Self::Rejected {
                provider_status, ..
            } => *provider_status == 429 || *provider_status >= 500,
            _ => false,
        }
    }
}

/// Token persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token store I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("token record at {} is unusable: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
