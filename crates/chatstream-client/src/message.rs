//! Lifecycle of the single in-flight assistant message.
//!
//! `Idle -> Streaming -> Finalizing -> Complete`, with `Errored` on transport failure. The machine
//! is a pure reducer: [`MessageMachine::handle`] returns effects and the pipeline publishes them.

use chatstream_core::{FinalizedMessage, MediaItem};
use tracing::{debug, info, warn};

use crate::classify::{Event, EventPayload};
use crate::config::TokenMode;
use crate::errors::{ClientError, StreamFailure};
use crate::extract::FieldExtractor;

pub const THINKING_LABEL: &str = "Thinking...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Idle,
    Streaming,
    Finalizing,
    Complete,
    Errored,
}

impl MessageStatus {
    pub fn is_active(self) -> bool {
        matches!(self, MessageStatus::Streaming | MessageStatus::Finalizing)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamingMessage {
    pub id: String,
    pub accumulated_text: String,
    pub status: MessageStatus,
    pub last_status_label: String,
    pub media: Vec<MediaItem>,
    /// Raw token document in JSON-field mode.
    raw_document: String,
    saw_tokens: bool,
}

impl StreamingMessage {
    fn new(id: String) -> Self {
        Self {
            id,
            accumulated_text: String::new(),
            status: MessageStatus::Streaming,
            last_status_label: THINKING_LABEL.to_string(),
            media: Vec::new(),
            raw_document: String::new(),
            saw_tokens: false,
        }
    }

    fn attach(&mut self, media: &[MediaItem]) {
        for item in media {
            if !self.media.contains(item) {
                self.media.push(item.clone());
            }
        }
    }
}

/// How a message left the active states.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Complete,
    Errored(StreamFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageEffect {
    Started {
        id: String,
    },
    Appended {
        id: String,
        delta: String,
    },
    Status {
        id: String,
        label: String,
    },
    Finished {
        message: FinalizedMessage,
        outcome: MessageOutcome,
    },
}

#[derive(Debug)]
pub struct MessageMachine {
    current: Option<StreamingMessage>,
    extractor: Option<FieldExtractor>,
    last_outcome: Option<MessageStatus>,
}

impl MessageMachine {
    pub fn new(mode: &TokenMode) -> Result<Self, ClientError> {
        let extractor = match mode {
            TokenMode::Plain => None,
            TokenMode::JsonField(field) => Some(FieldExtractor::new(field.clone()).map_err(|e| {
                ClientError::Config(format!("invalid token field {field:?}: {e}"))
            })?),
        };
        Ok(Self {
            current: None,
            extractor,
            last_outcome: None,
        })
    }

    /// `Idle` when no message is in flight.
    pub fn status(&self) -> MessageStatus {
        self.current
            .as_ref()
            .map(|m| m.status)
            .unwrap_or(MessageStatus::Idle)
    }

    /// Terminal status of the most recently finished message.
    pub fn last_outcome(&self) -> Option<MessageStatus> {
        self.last_outcome
    }

    pub fn current(&self) -> Option<&StreamingMessage> {
        self.current.as_ref()
    }

    pub fn handle(&mut self, event: &Event) -> Vec<MessageEffect> {
        let mut effects = Vec::new();
        match &event.payload {
            EventPayload::Start { message_id } => {
                if self.status().is_active() {
                    warn!("start received while a message is active; forcing finalize");
                    self.finalize(MessageOutcome::Complete, &mut effects);
                }
                let id = message_id
                    .clone()
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                info!(message_id = %id, "message started");
                let message = StreamingMessage::new(id.clone());
                effects.push(MessageEffect::Started { id: id.clone() });
                effects.push(MessageEffect::Status {
                    id,
                    label: message.last_status_label.clone(),
                });
                self.current = Some(message);
            }
            EventPayload::TokenBatch(batch) => {
                let Some(message) = streaming(&mut self.current) else {
                    warn!(tokens = batch.tokens.len(), "token batch outside a streaming message; ignored");
                    return effects;
                };
                message.saw_tokens = true;
                let delta = match &self.extractor {
                    None => Some(batch.tokens.clone()).filter(|t| !t.is_empty()),
                    Some(extractor) => {
                        message.raw_document.push_str(&batch.tokens);
                        extractor.delta(&message.raw_document, &batch.tokens)
                    }
                };
                if let Some(delta) = delta {
                    message.accumulated_text.push_str(&delta);
                    debug!(message_id = %message.id, delta_len = delta.len(), "message appended");
                    effects.push(MessageEffect::Appended {
                        id: message.id.clone(),
                        delta,
                    });
                    message.last_status_label = format!(
                        "Generating response... ({} chars)",
                        message.accumulated_text.chars().count()
                    );
                    effects.push(MessageEffect::Status {
                        id: message.id.clone(),
                        label: message.last_status_label.clone(),
                    });
                }
            }
            EventPayload::TokenComplete => {
                let Some(message) = streaming(&mut self.current) else {
                    debug!("token_complete without a streaming message; ignored");
                    return effects;
                };
                message.status = MessageStatus::Finalizing;
                debug!(message_id = %message.id, "message finalizing");
                self.finalize(MessageOutcome::Complete, &mut effects);
            }
            EventPayload::WorkflowStatus { label, .. } | EventPayload::NodeUpdate { label, .. } => {
                let Some(message) = streaming(&mut self.current) else {
                    debug!(label = %label, "status update without a streaming message; ignored");
                    return effects;
                };
                message.last_status_label = label.clone();
                effects.push(MessageEffect::Status {
                    id: message.id.clone(),
                    label: label.clone(),
                });
            }
            EventPayload::Content { text, media } => {
                let extracted = self.extractor.as_ref().and_then(|x| x.value(text));
                let Some(message) = streaming(&mut self.current) else {
                    debug!("content outside a streaming message; ignored");
                    return effects;
                };
                message.attach(media);
                if message.saw_tokens || !message.accumulated_text.is_empty() {
                    debug!(message_id = %message.id, "content duplicates streamed tokens; ignored");
                    return effects;
                }
                let body = extracted.unwrap_or_else(|| text.clone());
                if !body.is_empty() {
                    message.accumulated_text.push_str(&body);
                    effects.push(MessageEffect::Appended {
                        id: message.id.clone(),
                        delta: body,
                    });
                }
            }
            EventPayload::End { media } => {
                let Some(message) = self.current.as_mut().filter(|m| m.status.is_active()) else {
                    debug!("end without an active message; no-op");
                    return effects;
                };
                message.attach(media);
                self.finalize(MessageOutcome::Complete, &mut effects);
            }
            EventPayload::Credits { .. }
            | EventPayload::TaskUpdate(_)
            | EventPayload::Unknown { .. } => {}
        }
        effects
    }

    /// Transport abort: same as `end`.
    pub fn abort(&mut self) -> Vec<MessageEffect> {
        self.force_finalize(MessageOutcome::Complete)
    }

    /// Stream closed, with or without `end`.
    pub fn finish_stream(&mut self) -> Vec<MessageEffect> {
        self.force_finalize(MessageOutcome::Complete)
    }

    /// Transport failure: flush the text and mark the message `Errored`.
    pub fn fail(&mut self, failure: StreamFailure) -> Vec<MessageEffect> {
        self.force_finalize(MessageOutcome::Errored(failure))
    }

    fn force_finalize(&mut self, outcome: MessageOutcome) -> Vec<MessageEffect> {
        let mut effects = Vec::new();
        if self.status().is_active() {
            self.finalize(outcome, &mut effects);
        }
        effects
    }

    fn finalize(&mut self, outcome: MessageOutcome, effects: &mut Vec<MessageEffect>) {
        let Some(mut message) = self.current.take() else {
            return;
        };
        message.status = match &outcome {
            MessageOutcome::Complete => MessageStatus::Complete,
            MessageOutcome::Errored(failure) => {
                warn!(message_id = %message.id, error = %failure, "message errored");
                MessageStatus::Errored
            }
        };
        info!(
            message_id = %message.id,
            chars = message.accumulated_text.chars().count(),
            status = ?message.status,
            "message finished"
        );
        self.last_outcome = Some(message.status);
        effects.push(MessageEffect::Finished {
            message: FinalizedMessage {
                id: message.id,
                content: message.accumulated_text,
                media: message.media,
            },
            outcome,
        });
    }
}

fn streaming(current: &mut Option<StreamingMessage>) -> Option<&mut StreamingMessage> {
    current
        .as_mut()
        .filter(|m| m.status == MessageStatus::Streaming)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::TokenBatch;

    fn ev(payload: EventPayload) -> Event {
        Event::new(payload)
    }

    fn start(id: &str) -> Event {
        ev(EventPayload::Start {
            message_id: Some(id.into()),
        })
    }

    fn tokens(text: &str) -> Event {
        ev(EventPayload::TokenBatch(TokenBatch {
            tokens: text.into(),
            ..Default::default()
        }))
    }

    fn end() -> Event {
        ev(EventPayload::End { media: vec![] })
    }

    fn finished(effects: &[MessageEffect]) -> Vec<&FinalizedMessage> {
        effects
            .iter()
            .filter_map(|e| match e {
                MessageEffect::Finished { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    fn plain() -> MessageMachine {
        MessageMachine::new(&TokenMode::Plain).unwrap()
    }

    #[test]
    fn tokens_accumulate_and_end_finalizes_once() {
        let mut machine = plain();
        machine.handle(&start("m1"));
        let appended = machine.handle(&tokens("Hel"));
        assert!(appended.contains(&MessageEffect::Appended {
            id: "m1".into(),
            delta: "Hel".into()
        }));
        machine.handle(&tokens("lo"));
        assert_eq!(
            machine.current().map(|m| m.last_status_label.as_str()),
            Some("Generating response... (5 chars)")
        );

        let effects = machine.handle(&end());
        assert_eq!(finished(&effects)[0].content, "Hello");
        assert_eq!(machine.status(), MessageStatus::Idle);
        assert_eq!(machine.last_outcome(), Some(MessageStatus::Complete));
        assert!(machine.handle(&end()).is_empty());
    }

    #[test]
    fn token_complete_then_end_is_idempotent() {
        let mut machine = plain();
        machine.handle(&start("m1"));
        machine.handle(&tokens("x"));
        let effects = machine.handle(&ev(EventPayload::TokenComplete));
        assert_eq!(finished(&effects).len(), 1);
        assert!(machine.handle(&end()).is_empty());
        assert!(machine.handle(&tokens("late")).is_empty());
    }

    #[test]
    fn second_start_forces_previous_message_to_finish() {
        let mut machine = plain();
        machine.handle(&start("m1"));
        machine.handle(&tokens("partial"));
        let effects = machine.handle(&start("m2"));
        let done = finished(&effects);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, "m1");
        assert_eq!(done[0].content, "partial");
        assert!(matches!(effects.last(), Some(MessageEffect::Status { id, .. }) if id == "m2"));
        assert_eq!(machine.current().map(|m| m.id.as_str()), Some("m2"));
    }

    #[test]
    fn any_start_sequence_leaves_at_most_one_message() {
        let mut machine = plain();
        let mut finishes = 0;
        for i in 0..5 {
            finishes += finished(&machine.handle(&start(&format!("m{i}")))).len();
            assert_eq!(machine.status(), MessageStatus::Streaming);
        }
        assert_eq!(finishes, 4);
    }

    #[test]
    fn status_events_only_touch_label() {
        let mut machine = plain();
        machine.handle(&start("m1"));
        machine.handle(&tokens("a"));
        machine.handle(&ev(EventPayload::WorkflowStatus {
            key: "router".into(),
            label: "Analyzing request...".into(),
        }));
        let current = machine.current().unwrap();
        assert_eq!(current.accumulated_text, "a");
        assert_eq!(current.last_status_label, "Analyzing request...");
    }

    #[test]
    fn content_fills_body_only_without_tokens() {
        let mut machine = plain();
        machine.handle(&start("m1"));
        let effects = machine.handle(&ev(EventPayload::Content {
            text: "Full answer".into(),
            media: vec![MediaItem::image("https://cdn/a.png")],
        }));
        assert!(effects.contains(&MessageEffect::Appended {
            id: "m1".into(),
            delta: "Full answer".into()
        }));
        let done = machine.handle(&end());
        assert_eq!(finished(&done)[0].image_url(), Some("https://cdn/a.png"));

        machine.handle(&start("m2"));
        machine.handle(&tokens("streamed"));
        let effects = machine.handle(&ev(EventPayload::Content {
            text: "streamed".into(),
            media: vec![],
        }));
        assert!(effects.is_empty());
        assert_eq!(finished(&machine.handle(&end()))[0].content, "streamed");
    }

    #[test]
    fn fail_marks_errored_and_abort_completes() {
        let mut machine = plain();
        machine.handle(&start("m1"));
        machine.handle(&tokens("half"));
        let effects = machine.fail(StreamFailure::Transport {
            message: "reset".into(),
        });
        assert!(matches!(
            effects.as_slice(),
            [MessageEffect::Finished { outcome: MessageOutcome::Errored(_), message }] if message.content == "half"
        ));
        assert_eq!(machine.last_outcome(), Some(MessageStatus::Errored));

        machine.handle(&start("m2"));
        assert_eq!(finished(&machine.abort()).len(), 1);
        assert!(machine.abort().is_empty());
        assert!(machine.finish_stream().is_empty());
    }

    #[test]
    fn json_field_mode_shows_only_the_field() {
        let mut machine = MessageMachine::new(&TokenMode::JsonField("answer".into())).unwrap();
        machine.handle(&start("m1"));
        let mut shown = String::new();
        for piece in [r#"{"reason":"x","ans"#, r#"wer":"Hi"#, r#" there\"!"#, r#"\"","n":1}"#] {
            for effect in machine.handle(&tokens(piece)) {
                if let MessageEffect::Appended { delta, .. } = effect {
                    shown.push_str(&delta);
                }
            }
        }
        assert_eq!(shown, "Hi there\"!\"");
        assert_eq!(finished(&machine.handle(&end()))[0].content, "Hi there\"!\"");
    }
}
