//! Thin async client for the two Slack Web API methods the bot needs:
//! `chat.postMessage` with the bot token and `apps.connections.open` with the
//! app-level token.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack error codes that no amount of reconnecting will fix.
const AUTH_ERRORS: &[&str] =
    &["invalid_auth", "not_authed", "account_inactive", "token_revoked", "not_allowed_token_type"];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("{method} request failed: {message}")]
    Request { method: &'static str, message: String },
    #[error("{method} response could not be decoded: {message}")]
    Decode { method: &'static str, message: String },
    #[error("{method} returned error `{code}`")]
    Slack { method: &'static str, code: String },
    #[error("{method} response is missing `{field}`")]
    MissingField { method: &'static str, field: &'static str },
}

impl ApiError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Slack { code, .. } if AUTH_ERRORS.contains(&code.as_str()))
    }
}

/// A plain-text message for one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    pub channel: String,
    pub text: String,
}

impl OutboundReply {
    pub fn new(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self { channel: channel.into(), text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[async_trait]
pub trait MessagePoster: Send + Sync {
    async fn post_reply(&self, reply: &OutboundReply) -> Result<PostedMessage, ApiError>;
}

#[derive(Debug, Deserialize)]
struct SlackApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SlackWebClient {
    http: reqwest::Client,
    base_url: String,
    bot_token: SecretString,
}

impl SlackWebClient {
    pub fn new(bot_token: SecretString, base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("greeter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| ApiError::Client(error.to_string()))?;

        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_owned(), bot_token })
    }

    pub async fn post_message(&self, channel: &str, text: &str) -> Result<PostedMessage, ApiError> {
        const METHOD: &str = "chat.postMessage";

        debug!(event_name = "egress.slack.post_message", channel, "posting message");
        let body = serde_json::json!({ "channel": channel, "text": text });
        let request = self
            .http
            .post(self.url(METHOD))
            .bearer_auth(self.bot_token.expose_secret())
            .json(&body);
        let response = self.send(METHOD, request).await?;

        Ok(PostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_owned()),
            ts: response.ts.ok_or(ApiError::MissingField { method: METHOD, field: "ts" })?,
        })
    }

    /// Returns the single-use WSS URL for a new Socket Mode session.
    pub async fn connections_open(&self, app_token: &SecretString) -> Result<String, ApiError> {
        const METHOD: &str = "apps.connections.open";

        debug!(event_name = "egress.slack.connections_open", "opening socket mode connection");
        let request = self
            .http
            .post(self.url(METHOD))
            .bearer_auth(app_token.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        let response = self.send(METHOD, request).await?;

        response.url.ok_or(ApiError::MissingField { method: METHOD, field: "url" })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    async fn send(
        &self,
        method: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<SlackApiResponse, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|error| ApiError::Request { method, message: error.to_string() })?;

        let response: SlackApiResponse = response
            .json()
            .await
            .map_err(|error| ApiError::Decode { method, message: error.to_string() })?;

        if !response.ok {
            let code = response.error.unwrap_or_else(|| "unknown".to_owned());
            warn!(event_name = "egress.slack.api_error", method, error = %code, "slack api error");
            return Err(ApiError::Slack { method, code });
        }

        Ok(response)
    }
}

#[async_trait]
impl MessagePoster for SlackWebClient {
    async fn post_reply(&self, reply: &OutboundReply) -> Result<PostedMessage, ApiError> {
        self.post_message(&reply.channel, &reply.text).await
    }
}
