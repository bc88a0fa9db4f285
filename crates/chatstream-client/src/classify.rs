//! Turns a frame's JSON envelope into a typed [`Event`].

use chatstream_core::{MediaItem, TaskSource};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

/// Semantic tag of a classified frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    TokenBatch,
    TokenComplete,
    WorkflowStatus,
    NodeUpdate,
    Content,
    End,
    Credits,
    TaskUpdate,
    Unknown,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::TokenBatch => "token_batch",
            EventKind::TokenComplete => "token_complete",
            EventKind::WorkflowStatus => "workflow_status",
            EventKind::NodeUpdate => "node_update",
            EventKind::Content => "content",
            EventKind::End => "end",
            EventKind::Credits => "credits",
            EventKind::TaskUpdate => "task_update",
            EventKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenBatch {
    pub tokens: String,
    pub start_index: Option<u64>,
    pub count: Option<u64>,
    pub total_index: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Start {
        message_id: Option<String>,
    },
    TokenBatch(TokenBatch),
    TokenComplete,
    WorkflowStatus {
        key: String,
        label: String,
    },
    NodeUpdate {
        node_name: String,
        credits_used: Option<f64>,
        messages_count: Option<u64>,
        label: String,
    },
    /// Full final text. Never overwrites streamed tokens.
    Content {
        text: String,
        media: Vec<MediaItem>,
    },
    End {
        media: Vec<MediaItem>,
    },
    /// Billing telemetry; logged only.
    Credits {
        value: Value,
    },
    TaskUpdate(TaskSource),
    Unknown {
        type_name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub payload: EventPayload,
    pub received_at: DateTime<Utc>,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            received_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Start { .. } => EventKind::Start,
            EventPayload::TokenBatch(_) => EventKind::TokenBatch,
            EventPayload::TokenComplete => EventKind::TokenComplete,
            EventPayload::WorkflowStatus { .. } => EventKind::WorkflowStatus,
            EventPayload::NodeUpdate { .. } => EventKind::NodeUpdate,
            EventPayload::Content { .. } => EventKind::Content,
            EventPayload::End { .. } => EventKind::End,
            EventPayload::Credits { .. } => EventKind::Credits,
            EventPayload::TaskUpdate(_) => EventKind::TaskUpdate,
            EventPayload::Unknown { .. } => EventKind::Unknown,
        }
    }

    /// Human-readable status label carried by workflow and node events.
    pub fn status_label(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::WorkflowStatus { label, .. } | EventPayload::NodeUpdate { label, .. } => {
                Some(label)
            }
            _ => None,
        }
    }
}

const WORKFLOW_LABELS: &[(&str, &str)] = &[
    ("router", "Analyzing request..."),
    ("planner", "Planning the answer..."),
    ("image_generator", "Generating image..."),
    ("web_search", "Searching the web..."),
    ("tool_executor", "Running tools..."),
    ("response_generator", "Writing response..."),
];

const NODE_LABELS: &[(&str, &str)] = &[
    ("router", "Request routed"),
    ("planner", "Plan ready"),
    ("image_generator", "Image generated"),
    ("web_search", "Search results received"),
    ("tool_executor", "Tools finished"),
    ("response_generator", "Response drafted"),
];

/// Status values in a raw chunk that announce a workflow step.
const WORKFLOW_STATUSES: &[&str] = &["starting", "deciding"];

pub fn workflow_label(key: &str) -> String {
    lookup(WORKFLOW_LABELS, key).unwrap_or_else(|| format!("Processing {key}..."))
}

pub fn node_label(node: &str) -> String {
    lookup(NODE_LABELS, node).unwrap_or_else(|| format!("Finished {node}"))
}

fn lookup(table: &[(&str, &str)], key: &str) -> Option<String> {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, label)| (*label).to_string())
}

/// Classifies one frame's text. Malformed JSON and envelopes without a usable `type` are logged
/// and yield `None`.
pub fn classify(raw: &str) -> Option<Event> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, frame = %truncate(raw, 120), "dropping malformed frame");
            return None;
        }
    };
    let Some(event_type) = value.get("type").and_then(|v| v.as_str()) else {
        warn!(frame = %truncate(raw, 120), "dropping frame without type");
        return None;
    };
    let payload = match event_type {
        "start" => EventPayload::Start {
            message_id: str_field(&value, &["message_id", "messageId", "id"]),
        },
        "custom_event" => classify_custom(&value)?,
        "node_update" => {
            let node_name = str_field(&value, &["node_name", "nodeName", "node"])
                .or_else(|| value.get("data").and_then(|d| str_field(d, &["node_name", "nodeName"])))
                .unwrap_or_else(|| "unknown".to_string());
            let source = value.get("data").unwrap_or(&value);
            EventPayload::NodeUpdate {
                label: node_label(&node_name),
                credits_used: first(source, &["credits_used", "creditsUsed"]).and_then(Value::as_f64),
                messages_count: first(source, &["messages_count", "messagesCount"])
                    .and_then(Value::as_u64),
                node_name,
            }
        }
        "content" => EventPayload::Content {
            text: str_field(&value, &["content", "text"]).unwrap_or_default(),
            media: MediaItem::list_from_json(value.get("media")),
        },
        "end" => EventPayload::End {
            media: MediaItem::list_from_json(value.get("media")),
        },
        "credits" => EventPayload::Credits {
            value: value.get("credits").cloned().unwrap_or_else(|| value.clone()),
        },
        other => EventPayload::Unknown {
            type_name: other.to_string(),
        },
    };
    Some(Event::new(payload))
}

fn classify_custom(envelope: &Value) -> Option<EventPayload> {
    let Some(chunk) = envelope
        .get("metadata")
        .and_then(|m| m.get("raw_chunk"))
        .filter(|c| c.is_object())
    else {
        debug!("custom_event without metadata.raw_chunk");
        return None;
    };

    if let Some(batch) = chunk.get("response_batch")
        && status_of(batch) == Some("streaming")
    {
        return Some(EventPayload::TokenBatch(TokenBatch {
            tokens: tokens_of(batch),
            start_index: first(batch, &["start_index", "startIndex"]).and_then(Value::as_u64),
            count: first(batch, &["count"]).and_then(Value::as_u64),
            total_index: first(batch, &["total_index", "totalIndex"]).and_then(Value::as_u64),
        }));
    }
    if let Some(token) = chunk.get("response_token")
        && status_of(token) == Some("completed")
    {
        return Some(EventPayload::TokenComplete);
    }
    if let Some(source) = TaskSource::from_chunk(chunk)
        && source.clone().into_event().is_some()
    {
        return Some(EventPayload::TaskUpdate(source));
    }

    let map = chunk.as_object()?;
    let (key, _) = map.iter().find(|(_, v)| {
        status_of(v).is_some_and(|status| WORKFLOW_STATUSES.contains(&status))
    })?;
    Some(EventPayload::WorkflowStatus {
        key: key.clone(),
        label: workflow_label(key),
    })
}

fn status_of(value: &Value) -> Option<&str> {
    value.get("status").and_then(|v| v.as_str())
}

fn tokens_of(batch: &Value) -> String {
    match batch.get("tokens") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items.iter().filter_map(|t| t.as_str()).collect(),
        _ => String::new(),
    }
}

fn first<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| value.get(*k)).filter(|v| !v.is_null())
}

fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    first(value, keys)
        .and_then(|v| v.as_str())
        .map(ToOwned::to_owned)
}

fn truncate(raw: &str, max_chars: usize) -> String {
    raw.chars().take(max_chars).collect()
}
