use std::time::Duration;

use crate::errors::ClientError;

const DEFAULT_STREAM_PATH: &str = "/api/chat/stream";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// How `response_batch` tokens map to visible message text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TokenMode {
    /// Tokens are the message text.
    #[default]
    Plain,
    /// Tokens assemble a JSON document; only this string field is shown.
    JsonField(String),
}

/// Configuration for the chat stream endpoint.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the chat backend.
    pub base_url: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Path of the streaming endpoint, appended to `base_url`.
    pub stream_path: String,
    /// HTTP timeout for one prompt request.
    pub timeout: Duration,
    pub token_mode: TokenMode,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            token_mode: TokenMode::Plain,
        }
    }

    /// Builds a config from `CHATSTREAM_*` environment variables.
    ///
    /// `CHATSTREAM_BASE_URL` is required. `CHATSTREAM_API_KEY`, `CHATSTREAM_STREAM_PATH`,
    /// `CHATSTREAM_TIMEOUT_SECS` and `CHATSTREAM_TOKEN_FIELD` are optional.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let base_url = get("CHATSTREAM_BASE_URL")
            .ok_or_else(|| ClientError::Config("missing CHATSTREAM_BASE_URL".into()))?;
        let mut config = Self::new(base_url.trim());
        if let Some(key) = get("CHATSTREAM_API_KEY") {
            config = config.api_key(key.trim());
        }
        if let Some(path) = get("CHATSTREAM_STREAM_PATH") {
            config = config.stream_path(path.trim());
        }
        if let Some(raw) = get("CHATSTREAM_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|e| {
                ClientError::Config(format!("invalid CHATSTREAM_TIMEOUT_SECS={raw:?}: {e}"))
            })?;
            config = config.timeout(Duration::from_secs(secs));
        }
        if let Some(field) = get("CHATSTREAM_TOKEN_FIELD") {
            config = config.token_mode(TokenMode::JsonField(field.trim().to_string()));
        }
        Ok(config)
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn token_mode(mut self, mode: TokenMode) -> Self {
        self.token_mode = mode;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::Config("base_url must not be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(ClientError::Config("timeout must be greater than 0".into()));
        }
        if let TokenMode::JsonField(field) = &self.token_mode
            && field.trim().is_empty()
        {
            return Err(ClientError::Config("token field must not be empty".into()));
        }
        Ok(())
    }

    pub(crate) fn stream_url(&self) -> String {
        let path = self.stream_path.trim();
        if path.is_empty() {
            return self.base_url.trim_end_matches('/').to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
