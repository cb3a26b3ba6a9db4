//! Status sinks: where the rendered status line goes.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::BoxFuture;
use crate::error::{ProviderError, ProviderResult};

pub const SLACK_PROFILE_SET_URL: &str = "https://slack.com/api/users.profile.set";

/// Something that displays a `(text, icon)` pair for the user.
///
/// Publishing empty strings clears the status.
pub trait StatusSink: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn publish<'a>(&'a self, text: &'a str, icon: &'a str) -> BoxFuture<'a, ProviderResult<()>>;
}

/// Sets the Slack profile status through `users.profile.set`.
#[derive(Clone)]
pub struct SlackStatusSink {
    token: String,
    api_url: String,
    http_client: reqwest::Client,
}

impl SlackStatusSink {
    pub fn new(token: impl Into<String>, timeout: Duration) -> ProviderResult<Self> {
        Self::with_url(token, SLACK_PROFILE_SET_URL, timeout)
    }

    pub fn with_url(
        token: impl Into<String>,
        api_url: impl Into<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::internal("failed to create HTTP client").with_source(e))?;

        Ok(Self {
            token: token.into(),
            api_url: api_url.into(),
            http_client,
        })
    }

    async fn set_profile_status(&self, text: &str, icon: &str) -> ProviderResult<()> {
        let body = json!({
            "profile": {
                "status_text": text,
                "status_emoji": icon,
                "status_expiration": 0,
            }
        });

        let response = self
            .http_client
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_request)?;

        let status = response.status();
        debug!(%status, "users.profile.set response");

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::rate_limited("rate limit exceeded"));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::server(format!("API error ({}): {}", status, body)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {}", e)))?;

        parse_slack_response(&body)
    }
}

impl std::fmt::Debug for SlackStatusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackStatusSink")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl StatusSink for SlackStatusSink {
    fn name(&self) -> &str {
        "slack"
    }

    fn publish<'a>(&'a self, text: &'a str, icon: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.set_profile_status(text, icon)
                .await
                .map_err(|e| e.with_provider("slack"))
        })
    }
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    error: Option<String>,
}

/// Slack answers 200 even on failure; the verdict is the `ok` field.
pub fn parse_slack_response(body: &str) -> ProviderResult<()> {
    let parsed: SlackResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::invalid_response(format!("failed to parse response: {}", e))
    })?;

    if parsed.ok {
        return Ok(());
    }

    let error = parsed.error.unwrap_or_else(|| "unknown_error".to_string());
    Err(match error.as_str() {
        "invalid_auth" | "not_authed" | "token_revoked" | "token_expired" | "account_inactive" => {
            ProviderError::authentication(format!("slack rejected the token: {}", error))
        }
        "missing_scope" | "not_allowed_token_type" => {
            ProviderError::authorization(format!("slack token cannot set the status: {}", error))
        }
        "ratelimited" => ProviderError::rate_limited("rate limit exceeded"),
        _ => ProviderError::server(format!("slack error: {}", error)),
    })
}
