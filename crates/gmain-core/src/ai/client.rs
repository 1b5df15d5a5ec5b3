//! HTTP transport for the Messages API.
//!
//! [`Transport`] is the seam the agent loop, compactor and sub-agent
//! executor depend on; [`Client`] is the production implementation speaking
//! the Anthropic wire format over HTTPS. The retry governor wraps request
//! initiation only — an active stream is never re-driven.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ai::retry::Retrier;
use crate::ai::sse::StreamReader;
use crate::ai::types::{ErrorResponse, MessagesRequest, MessagesResponse};
use crate::error::Cancelled;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: usize = 8192;
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Request-level deadline. Long on purpose: a streamed turn can run minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const MESSAGES_ENDPOINT: &str = "v1/messages";

/// How the credential is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    ApiKey,
    Bearer,
}

/// Abstract transport to the upstream LLM API.
///
/// The agent loop, compactor and sub-agent executor all hold this trait
/// object; tests substitute a scripted implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The model requests default to when the caller leaves it empty.
    fn model(&self) -> &str;

    /// Non-streaming request. Used by summarization.
    async fn create_message(
        &self,
        req: &MessagesRequest,
        cancel: &CancellationToken,
    ) -> Result<MessagesResponse>;

    /// Streaming request; returns a reader over the SSE body.
    async fn stream_message(
        &self,
        req: &MessagesRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamReader>;
}

/// Production HTTP client.
pub struct Client {
    credential: String,
    auth_type: AuthType,
    base_url: String,
    http: reqwest::Client,
    retrier: Retrier,
    model: String,
    max_tokens: usize,
}

impl Client {
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            auth_type: AuthType::ApiKey,
            base_url: DEFAULT_BASE_URL.to_string(),
            http: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            retrier: Retrier::new(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = auth_type;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            MESSAGES_ENDPOINT
        )
    }

    fn apply_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = match self.auth_type {
            AuthType::Bearer => builder.bearer_auth(&self.credential),
            AuthType::ApiKey => builder.header("x-api-key", &self.credential),
        };
        builder.header("anthropic-version", ANTHROPIC_VERSION)
    }

    /// Fill in client defaults and force the stream flag.
    fn normalize(&self, req: &MessagesRequest, stream: bool) -> MessagesRequest {
        let mut body = req.clone();
        if body.model.is_empty() {
            body.model = self.model.clone();
        }
        if body.max_tokens == 0 {
            body.max_tokens = self.max_tokens;
        }
        body.stream = stream;
        body
    }

    async fn decode_error(resp: reqwest::Response) -> anyhow::Error {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();

        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(parsed) if !parsed.error.message.is_empty() => anyhow!(
                "API error ({status}): {} - {}",
                parsed.error.kind,
                parsed.error.message
            ),
            _ => anyhow!("API error ({status}): {body}"),
        }
    }

    async fn send(
        &self,
        body: &MessagesRequest,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let send = self.retrier.execute(cancel, || {
            let builder = self
                .apply_headers(self.http.post(self.endpoint()))
                .json(body);
            async move { builder.send().await.map_err(anyhow::Error::from) }
        });

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(Cancelled.into()),
            resp = send => resp?,
        };

        if !resp.status().is_success() {
            return Err(Self::decode_error(resp).await);
        }
        Ok(resp)
    }
}

#[async_trait]
impl Transport for Client {
    fn model(&self) -> &str {
        &self.model
    }

    async fn create_message(
        &self,
        req: &MessagesRequest,
        cancel: &CancellationToken,
    ) -> Result<MessagesResponse> {
        let body = self.normalize(req, false);
        debug!(model = %body.model, messages = body.messages.len(), "create_message");

        let resp = self.send(&body, cancel).await?;
        let parsed = resp.json::<MessagesResponse>().await?;
        Ok(parsed)
    }

    async fn stream_message(
        &self,
        req: &MessagesRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamReader> {
        let body = self.normalize(req, true);
        info!(
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "stream_message"
        );

        let resp = self.send(&body, cancel).await?;
        let stream = resp.bytes_stream().map_err(anyhow::Error::from);
        Ok(StreamReader::new(stream))
    }
}
