//! Replays a recorded response body through the full client pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chatstream_client::{ByteStream, ChatClient, ClientError, PromptRequest, TokenMode, Transport};
use chatstream_core::artifact::AppId;
use chatstream_core::{Artifact, ClientEvent, Task};
use futures::stream;
use tracing::debug;

/// Serves a file's bytes in fixed-size chunks, as a network would.
pub struct FileTransport {
    path: PathBuf,
    chunk_size: usize,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            path: path.into(),
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait::async_trait]
impl Transport for FileTransport {
    async fn open(&self, request: &PromptRequest) -> Result<ByteStream, ClientError> {
        let body = std::fs::read(&self.path).map_err(|e| {
            ClientError::Transport(format!("failed to read {}: {e}", self.path.display()))
        })?;
        debug!(request_id = %request.request_id, bytes = body.len(), chunk_size = self.chunk_size, "replaying recorded stream");
        let chunks: Vec<Result<Bytes, ClientError>> = body
            .chunks(self.chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub file: PathBuf,
    pub chunk_size: usize,
    pub input: String,
    pub app: Option<AppId>,
    pub sidebar_visible: bool,
    pub token_mode: TokenMode,
}

impl ReplayOptions {
    pub fn new(file: impl AsRef<Path>, input: impl Into<String>) -> Self {
        Self {
            file: file.as_ref().to_path_buf(),
            chunk_size: 64,
            input: input.into(),
            app: None,
            sidebar_visible: false,
            token_mode: TokenMode::Plain,
        }
    }
}

/// State left behind by a replay.
#[derive(Debug)]
pub struct ReplaySummary {
    pub request_id: String,
    pub tasks: Vec<Task>,
    pub artifacts: Vec<Artifact>,
}

/// Replays `options.file`, handing every outbound event to `sink`.
pub async fn replay(
    options: &ReplayOptions,
    sink: impl Fn(&ClientEvent) + Send + Sync + 'static,
) -> Result<ReplaySummary, ClientError> {
    let transport = Arc::new(FileTransport::new(&options.file, options.chunk_size));
    let mut client = ChatClient::with_transport(transport, &options.token_mode)?;
    client.ui().set_active_app(options.app);
    client.ui().set_sidebar_visible(options.sidebar_visible);
    let subscription = client.subscribe(sink);

    let result = client
        .send_prompt(options.input.clone(), serde_json::json!({"source": "replay"}))
        .await;
    client.unsubscribe(subscription);
    let request_id = result?;

    Ok(ReplaySummary {
        request_id,
        tasks: client.tasks().list(),
        artifacts: client.artifacts().list(),
    })
}
