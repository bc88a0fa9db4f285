use std::pin::Pin;

use bytes::Bytes;
use futures::StreamExt as _;
use serde::Serialize;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::ClientError;

/// Raw response body as it arrives from the network.
pub type ByteStream = Pin<Box<dyn futures::Stream<Item = Result<Bytes, ClientError>> + Send + 'static>>;

/// Body posted to the streaming endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptRequest {
    pub request_id: String,
    pub prompt: String,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Opens a response stream for one prompt.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: &PromptRequest) -> Result<ByteStream, ClientError>;
}

/// `Transport` over HTTP POST with a chunked `data: ` line response.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &PromptRequest) -> Result<ByteStream, ClientError> {
        let url = self.config.stream_url();
        debug!(request_id = %request.request_id, url = %url, "opening response stream");

        let mut http_req = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request);
        if let Some(key) = self.config.api_key.as_deref() {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ClientError::transport(format!("stream read failed: {e}"))));
        Ok(Box::pin(stream))
    }
}
