//! Wires decoder, classifier and the state machines together and publishes their effects.

use std::panic::{AssertUnwindSafe, catch_unwind};

use chatstream_core::{
    Artifact, ArtifactEngine, ArtifactStore, ClientEvent, EventBus, TaskRegistry, UiContext, UiState,
};
use tracing::{debug, error, info, warn};

use crate::classify::{Event, EventPayload, classify};
use crate::config::TokenMode;
use crate::errors::{ClientError, StreamFailure};
use crate::frame::{Frame, FrameDecoder};
use crate::message::{MessageEffect, MessageMachine, MessageOutcome, MessageStatus};

/// Synchronous reducer over one response stream at a time.
///
/// Every registry handle is shared: clone them out with the accessors to observe state from
/// elsewhere.
#[derive(Debug)]
pub struct Pipeline {
    decoder: FrameDecoder,
    messages: MessageMachine,
    tasks: TaskRegistry,
    artifacts: ArtifactEngine,
    ui: UiState,
    bus: EventBus,
    user_input: String,
}

impl Pipeline {
    /// Creates a pipeline with fresh registries publishing on `bus`.
    pub fn new(bus: EventBus, mode: &TokenMode) -> Result<Self, ClientError> {
        Ok(Self {
            decoder: FrameDecoder::new(),
            messages: MessageMachine::new(mode)?,
            tasks: TaskRegistry::new(bus.clone()),
            artifacts: ArtifactEngine::new(ArtifactStore::new(), bus.clone()),
            ui: UiState::default(),
            bus,
            user_input: String::new(),
        })
    }

    /// Shares an existing UI visibility handle.
    pub fn with_ui(mut self, ui: UiState) -> Self {
        self.ui = ui;
        self
    }

    /// Shares an existing task registry. It should publish on the same bus.
    pub fn with_tasks(mut self, tasks: TaskRegistry) -> Self {
        self.tasks = tasks;
        self
    }

    /// Shares an existing artifact store.
    pub fn with_artifacts(mut self, store: ArtifactStore) -> Self {
        self.artifacts = ArtifactEngine::new(store, self.bus.clone());
        self
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        self.artifacts.store()
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn message_status(&self) -> MessageStatus {
        self.messages.status()
    }

    pub fn last_outcome(&self) -> Option<MessageStatus> {
        self.messages.last_outcome()
    }

    /// `true` once the `[DONE]` sentinel was decoded.
    pub fn is_done(&self) -> bool {
        self.decoder.is_done()
    }

    /// Prepares for a new response stream triggered by `user_input`.
    pub fn begin_request(&mut self, user_input: impl Into<String>) {
        let leftover = self.messages.finish_stream();
        self.publish(leftover);
        self.decoder.reset();
        self.user_input = user_input.into();
    }

    /// Feeds one transport chunk. Each frame is handled in isolation; a panic while handling a
    /// frame is logged and the remaining frames still run.
    pub fn ingest(&mut self, chunk: &[u8]) {
        for frame in self.decoder.push_chunk(chunk) {
            self.ingest_frame(&frame);
        }
    }

    /// Stream closed: flush a trailing line and finalize any active message.
    pub fn finish(&mut self) {
        for frame in self.decoder.finish() {
            self.ingest_frame(&frame);
        }
        let effects = self.messages.finish_stream();
        self.publish(effects);
    }

    /// Caller abort: finalize like `end`.
    pub fn abort(&mut self) {
        info!("stream aborted; finalizing active message");
        let effects = self.messages.abort();
        self.publish(effects);
    }

    /// Transport failure: the active message ends `Errored`.
    pub fn fail(&mut self, failure: StreamFailure) {
        warn!(error = %failure, "stream failed");
        let effects = self.messages.fail(failure);
        self.publish(effects);
    }

    /// Consumption pass for the UI: converts a staged candidate once the sidebar shows an app.
    ///
    /// Call after changing visibility. Returns `None` while the gate is closed or nothing is
    /// staged.
    pub fn consume_pending(&self) -> Option<Artifact> {
        let ctx = UiContext::new(self.ui.snapshot(), self.user_input.clone());
        self.artifacts.consume(&ctx)
    }

    fn ingest_frame(&mut self, frame: &Frame) {
        let handled = catch_unwind(AssertUnwindSafe(|| {
            if let Some(event) = classify(&frame.raw_text) {
                self.dispatch(event);
            }
        }));
        if handled.is_err() {
            error!(frame = %frame.raw_text, "frame handler panicked; frame skipped");
        }
    }

    /// Routes one classified event to the machine that owns it.
    pub fn dispatch(&mut self, event: Event) {
        debug!(kind = %event.kind(), "event");
        match &event.payload {
            EventPayload::TaskUpdate(source) => match source.clone().into_event() {
                Some(task_event) => {
                    if let Err(err) = self.tasks.apply_event(task_event) {
                        warn!(error = %err, "task event rejected");
                    }
                }
                None => debug!(source = ?source, "task payload without a usable target or status"),
            },
            EventPayload::Credits { value } => info!(credits = %value, "credits reported"),
            EventPayload::Unknown { type_name } => debug!(type_name = %type_name, "unknown event type"),
            _ => {
                let effects = self.messages.handle(&event);
                self.publish(effects);
            }
        }
    }

    fn publish(&mut self, effects: Vec<MessageEffect>) {
        for effect in effects {
            match effect {
                MessageEffect::Started { id } => self.bus.emit(ClientEvent::MessageStarted { id }),
                MessageEffect::Appended { id, delta } => {
                    self.bus.emit(ClientEvent::MessageAppended { id, delta })
                }
                MessageEffect::Status { id, label } => {
                    self.bus.emit(ClientEvent::MessageStatus { id, label })
                }
                MessageEffect::Finished { message, outcome } => {
                    self.bus.emit(ClientEvent::MessageFinished {
                        id: message.id.clone(),
                        text: message.content.clone(),
                    });
                    if outcome == MessageOutcome::Complete {
                        let ctx = UiContext::new(self.ui.snapshot(), self.user_input.clone());
                        self.artifacts.process(&message, &ctx);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatstream_core::artifact::AppId;
    use chatstream_core::{TaskStatus, Visibility};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn recorded() -> (Pipeline, Arc<Mutex<Vec<ClientEvent>>>) {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        (Pipeline::new(bus, &TokenMode::Plain).unwrap(), seen)
    }

    fn line(value: serde_json::Value) -> String {
        format!("data: {value}\n")
    }

    fn batch(tokens: &str) -> String {
        line(json!({
            "type": "custom_event",
            "metadata": {"raw_chunk": {"response_batch": {"tokens": tokens, "status": "streaming"}}}
        }))
    }

    fn names(seen: &Arc<Mutex<Vec<ClientEvent>>>) -> Vec<&'static str> {
        seen.lock().unwrap().iter().map(ClientEvent::name).collect()
    }

    #[test]
    fn hello_stream_appends_twice_and_finishes_once() {
        let (mut pipeline, seen) = recorded();
        pipeline.begin_request("say hello");
        let body = [
            line(json!({"type": "start", "message_id": "m1"})),
            batch("Hel"),
            batch("lo"),
            line(json!({"type": "end"})),
        ]
        .concat();
        pipeline.ingest(body.as_bytes());
        pipeline.finish();

        let events = seen.lock().unwrap().clone();
        let deltas: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::MessageAppended { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["Hel", "lo"]);
        let finished: Vec<&ClientEvent> = events
            .iter()
            .filter(|e| matches!(e, ClientEvent::MessageFinished { .. }))
            .collect();
        assert_eq!(finished.len(), 1);
        assert!(
            matches!(finished[0], ClientEvent::MessageFinished { text, .. } if text == "Hello")
        );
    }

    #[test]
    fn bad_line_produces_nothing_then_start_is_seen() {
        let (mut pipeline, seen) = recorded();
        pipeline.ingest(b"data: not-json\n");
        assert!(seen.lock().unwrap().is_empty());
        pipeline.ingest(line(json!({"type": "start"})).as_bytes());
        assert_eq!(
            names(&seen)
                .iter()
                .filter(|n| **n == "message-started")
                .count(),
            1
        );
    }

    #[test]
    fn every_chunk_split_yields_the_same_text() {
        let body = [
            line(json!({"type": "start", "message_id": "m1"})),
            batch("Grüße, "),
            batch("world"),
            line(json!({"type": "end"})),
            "data: [DONE]\n".to_string(),
        ]
        .concat();
        let bytes = body.as_bytes();
        for split in 0..=bytes.len() {
            let (mut pipeline, seen) = recorded();
            pipeline.ingest(&bytes[..split]);
            pipeline.ingest(&bytes[split..]);
            pipeline.finish();
            let text: String = seen
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    ClientEvent::MessageAppended { delta, .. } => Some(delta.clone()),
                    _ => None,
                })
                .collect();
            assert_eq!(text, "Grüße, world", "split at {split}");
            assert!(pipeline.is_done());
        }
    }

    #[test]
    fn close_without_end_finalizes() {
        let (mut pipeline, seen) = recorded();
        pipeline.ingest(line(json!({"type": "start"})).as_bytes());
        pipeline.ingest(batch("partial").as_bytes());
        pipeline.finish();
        assert_eq!(pipeline.message_status(), MessageStatus::Idle);
        assert_eq!(pipeline.last_outcome(), Some(MessageStatus::Complete));
        assert_eq!(
            names(&seen).iter().filter(|n| **n == "message-finished").count(),
            1
        );
    }

    #[test]
    fn failure_errors_message_without_artifact() {
        let (mut pipeline, seen) = recorded();
        pipeline.ui().set_active_app(Some(AppId::Writer));
        pipeline.ui().set_sidebar_visible(true);
        pipeline.begin_request("write something");
        pipeline.ingest(line(json!({"type": "start"})).as_bytes());
        pipeline.ingest(batch("draft").as_bytes());
        pipeline.fail(StreamFailure::Transport {
            message: "reset".into(),
        });
        assert_eq!(pipeline.last_outcome(), Some(MessageStatus::Errored));
        assert!(pipeline.artifacts().is_empty());
        assert!(names(&seen).contains(&"message-finished"));
    }

    #[test]
    fn finished_image_message_becomes_artifact() {
        let (mut pipeline, seen) = recorded();
        let ui = UiState::new(Visibility {
            active_app: Some(AppId::ImageStudio),
            sidebar_visible: true,
        });
        pipeline = pipeline.with_ui(ui);
        pipeline.begin_request("draw a cat");
        let body = [
            line(json!({"type": "start", "message_id": "m1"})),
            batch("Here is a cat."),
            line(json!({"type": "end", "media": [{"type": "image", "url": "https://cdn/cat.png"}]})),
        ]
        .concat();
        pipeline.ingest(body.as_bytes());
        assert_eq!(pipeline.artifacts().len(), 1);
        assert_eq!(
            pipeline.artifacts().last_generated_image().as_deref(),
            Some("https://cdn/cat.png")
        );
        assert!(names(&seen).contains(&"artifact-created"));
    }

    #[test]
    fn staged_image_is_consumed_after_sidebar_opens() {
        let (mut pipeline, seen) = recorded();
        pipeline.begin_request("generate a picture of a cat");
        let body = [
            line(json!({"type": "start", "message_id": "m1"})),
            line(json!({"type": "end", "media": [{"type": "image", "url": "https://cdn/cat.png"}]})),
        ]
        .concat();
        pipeline.ingest(body.as_bytes());
        pipeline.finish();
        assert!(pipeline.artifacts().is_empty());
        assert!(pipeline.artifacts().pending().is_some());
        assert!(pipeline.consume_pending().is_none());

        pipeline.ui().set_active_app(Some(AppId::ImageStudio));
        pipeline.ui().set_sidebar_visible(true);
        let artifact = pipeline.consume_pending().expect("artifact");
        assert_eq!(artifact.message_id(), Some("m1"));
        assert!(pipeline.consume_pending().is_none());
        assert_eq!(pipeline.artifacts().len(), 1);
        assert!(pipeline.artifacts().pending().is_none());
        assert_eq!(
            names(&seen).iter().filter(|n| **n == "artifact-created").count(),
            1
        );
    }

    #[test]
    fn task_tool_call_auto_creates_and_updates() {
        let (mut pipeline, seen) = recorded();
        let tool = |call: &str| {
            line(json!({
                "type": "custom_event",
                "metadata": {"raw_chunk": {"tool_call": call}}
            }))
        };
        pipeline.ingest(tool(r#"start_task(name="Render video", type="video")"#).as_bytes());
        let task = pipeline.tasks().list().pop().expect("task");
        assert_eq!(task.status, TaskStatus::Starting);

        pipeline.ingest(tool(r#"update_task(name="Render video", current_step="2", total_steps="4")"#).as_bytes());
        pipeline.ingest(tool(r#"update_task(id="missing", current_step="1")"#).as_bytes());
        let task = pipeline.tasks().get(&task.id).expect("task");
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.progress.current_step, 2);
        assert_eq!(pipeline.tasks().len(), 1);
        assert!(names(&seen).contains(&"task-changed"));
        assert_eq!(pipeline.message_status(), MessageStatus::Idle);
    }
}
