//! Flat configuration record.
//!
//! File and environment loading belong to the embedding application; the
//! core only defines the recognized options and their defaults. Unknown
//! options are rejected at parse time.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::ai::client::{AuthType, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};

/// Recognized options. Defaults are documented per field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// API key or bearer token. Required.
    pub credential: String,
    /// How to send the credential. Default: `api_key`.
    pub auth_type: AuthType,
    /// Upstream base URL. Default: the public API endpoint.
    pub base_url: Option<String>,
    /// Model id. Default: `claude-sonnet-4-20250514`.
    pub model: String,
    /// Output token budget per response. Default: 8192.
    pub max_tokens: usize,
    /// Request-level deadline in seconds. Default: 300.
    pub request_timeout_secs: u64,
    /// Log file path. Default: none (logging disabled).
    pub log_file: Option<String>,
    /// Log level filter. Default: `info`.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credential: String::new(),
            auth_type: AuthType::ApiKey,
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout_secs: 300,
            log_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Parse from JSON, rejecting unknown options.
    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)?;
        Ok(config)
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.credential.is_empty() {
            bail!("a credential is required (set ANTHROPIC_API_KEY or ANTHROPIC_AUTH_TOKEN, or configure one)");
        }
        if self.max_tokens == 0 {
            self.max_tokens = DEFAULT_MAX_TOKENS;
        }
        if self.model.is_empty() {
            self.model = DEFAULT_MODEL.to_string();
        }
        Ok(())
    }
}
