use std::sync::Arc;

use chatstream_core::{Artifact, ArtifactStore, ClientEvent, EventBus, SubscriptionId, TaskRegistry, UiState};
use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{ClientConfig, TokenMode};
use crate::errors::{ClientError, StreamFailure};
use crate::message::MessageStatus;
use crate::pipeline::Pipeline;
use crate::session::{SessionProvider, StaticSession};
use crate::transport::{HttpTransport, PromptRequest, Transport};

/// Handle used to abort the prompt currently streaming.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The active message is finalized as if `end` arrived and `send_prompt` returns
    /// `ClientError::Aborted`.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

/// Sends prompts and drives their response streams through the pipeline.
pub struct ChatClient {
    transport: Arc<dyn Transport>,
    session: Arc<dyn SessionProvider>,
    pipeline: Pipeline,
    abort_tx: watch::Sender<bool>,
}

impl ChatClient {
    /// HTTP client for `config`, anonymous session.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mode = config.token_mode.clone();
        Self::with_transport(Arc::new(HttpTransport::new(config)?), &mode)
    }

    /// Builds a client from `CHATSTREAM_*` environment variables.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        mode: &TokenMode,
    ) -> Result<Self, ClientError> {
        let (abort_tx, _) = watch::channel(false);
        Ok(Self {
            transport,
            session: Arc::new(StaticSession::anonymous()),
            pipeline: Pipeline::new(EventBus::new(), mode)?,
            abort_tx,
        })
    }

    pub fn session(mut self, session: Arc<dyn SessionProvider>) -> Self {
        self.session = session;
        self
    }

    /// Shares an existing UI visibility handle with the artifact engine.
    pub fn ui_state(mut self, ui: UiState) -> Self {
        self.pipeline = self.pipeline.with_ui(ui);
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: self.abort_tx.clone(),
        }
    }

    pub fn tasks(&self) -> &TaskRegistry {
        self.pipeline.tasks()
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        self.pipeline.artifacts()
    }

    pub fn ui(&self) -> &UiState {
        self.pipeline.ui()
    }

    pub fn events(&self) -> &EventBus {
        self.pipeline.bus()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.pipeline.bus().subscribe(listener)
    }

    /// Safe to call more than once.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.pipeline.bus().unsubscribe(id)
    }

    pub fn message_status(&self) -> MessageStatus {
        self.pipeline.message_status()
    }

    /// Runs the artifact consumption pass against the current UI visibility. Call after the
    /// sidebar opens or the active app changes.
    pub fn consume_pending_artifact(&self) -> Option<Artifact> {
        self.pipeline.consume_pending()
    }

    /// Sends `text` and processes the whole response stream. Returns the request id.
    ///
    /// Outbound events are published while the stream is read. Transport failures mark the
    /// active message `Errored` and are returned; an abort finalizes the message and returns
    /// `ClientError::Aborted`.
    pub async fn send_prompt(
        &mut self,
        text: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<String, ClientError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ClientError::Validation("prompt must not be empty".into()));
        }
        let request = PromptRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            prompt: text.clone(),
            metadata,
            user_id: self.session.user_id(),
        };
        let request_id = request.request_id.clone();
        info!(request_id = %request_id, chars = text.chars().count(), "sending prompt");

        self.abort_tx.send_replace(false);
        let mut abort_rx = self.abort_tx.subscribe();
        self.pipeline.begin_request(text);

        let transport = self.transport.clone();
        let opened = tokio::select! {
            _ = aborted(&mut abort_rx) => {
                self.pipeline.abort();
                return Err(ClientError::Aborted { request_id });
            }
            opened = transport.open(&request) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                warn!(request_id = %request_id, error = %err, "failed to open response stream");
                self.pipeline.fail(StreamFailure::from(&err));
                return Err(err);
            }
        };

        loop {
            tokio::select! {
                _ = aborted(&mut abort_rx) => {
                    self.pipeline.abort();
                    return Err(ClientError::Aborted { request_id });
                }
                next = stream.next() => match next {
                    Some(Ok(chunk)) => {
                        self.pipeline.ingest(&chunk);
                        if self.pipeline.is_done() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(request_id = %request_id, error = %err, "response stream failed");
                        self.pipeline.fail(StreamFailure::from(&err));
                        return Err(err);
                    }
                    None => break,
                }
            }
        }
        self.pipeline.finish();
        info!(request_id = %request_id, "response stream finished");
        Ok(request_id)
    }
}

/// Resolves once the abort flag is set. Never resolves if every sender is gone.
async fn aborted(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
