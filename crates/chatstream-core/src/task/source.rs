use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::{ProgressUpdate, TaskAction, TaskId};

const DEFAULT_TASK_KIND: &str = "general";

static TOOL_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*;?\s*$")
        .expect("tool call pattern is valid")
});

static TOOL_ARG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:"((?:[^"\\]|\\.)*)"|'([^']*)'|([^,\s)]+))"#)
        .expect("tool argument pattern is valid")
});

/// `task` object carried in a `custom_event` chunk.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StructuredTask {
    #[serde(default, alias = "taskId", alias = "id")]
    pub task_id: Option<String>,
    #[serde(default, alias = "taskName", alias = "name")]
    pub task_name: Option<String>,
    #[serde(default, alias = "taskType", alias = "type")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "currentStep")]
    pub current_step: Option<u32>,
    #[serde(default, alias = "totalSteps")]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default, alias = "currentStepName")]
    pub current_step_name: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Free-text tool call such as `start_task(name="Render video", type="video")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub function: String,
    pub args: BTreeMap<String, String>,
}

/// Payload shapes the stream uses to talk about tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskSource {
    Structured(StructuredTask),
    ToolCall(ToolCall),
}

/// Which task an inbound event refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTarget {
    /// Must already exist in the registry.
    Id(TaskId),
    /// Reuses the newest non-terminal task with this name, or creates one.
    Name { name: String, kind: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskSignal {
    Start,
    Progress(ProgressUpdate),
    Pause,
    Resume,
    Complete(Option<serde_json::Value>),
    Fail(String),
    Cancel(Option<String>),
}

impl TaskSignal {
    pub fn action(&self) -> TaskAction {
        match self {
            TaskSignal::Start => TaskAction::Start,
            TaskSignal::Progress(_) => TaskAction::Progress,
            TaskSignal::Pause => TaskAction::Pause,
            TaskSignal::Resume => TaskAction::Resume,
            TaskSignal::Complete(_) => TaskAction::Complete,
            TaskSignal::Fail(_) => TaskAction::Fail,
            TaskSignal::Cancel(_) => TaskAction::Cancel,
        }
    }
}

/// Normalized task event dispatched to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub target: TaskTarget,
    pub signal: TaskSignal,
}

impl TaskSource {
    /// Recognizes a task payload inside a `metadata.raw_chunk` object.
    pub fn from_chunk(chunk: &serde_json::Value) -> Option<TaskSource> {
        if let Some(task) = chunk.get("task").filter(|v| v.is_object()) {
            return serde_json::from_value::<StructuredTask>(task.clone())
                .ok()
                .map(TaskSource::Structured);
        }
        chunk
            .get("tool_call")
            .and_then(|v| v.as_str())
            .and_then(TaskSource::parse_tool_call)
    }

    pub fn parse_tool_call(text: &str) -> Option<TaskSource> {
        let caps = TOOL_CALL_RE.captures(text)?;
        let function = caps.get(1)?.as_str().to_string();
        let raw_args = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let mut args = BTreeMap::new();
        for arg in TOOL_ARG_RE.captures_iter(raw_args) {
            let Some(key) = arg.get(1) else { continue };
            let value = arg
                .get(2)
                .map(|m| unescape_quoted(m.as_str()))
                .or_else(|| arg.get(3).map(|m| m.as_str().to_string()))
                .or_else(|| arg.get(4).map(|m| m.as_str().to_string()))
                .unwrap_or_default();
            args.insert(key.as_str().to_string(), value);
        }
        Some(TaskSource::ToolCall(ToolCall { function, args }))
    }

    /// Maps a recognized payload to a task event. Payloads without a usable target or with an
    /// unrecognized status/function yield `None`.
    pub fn into_event(self) -> Option<TaskEvent> {
        match self {
            TaskSource::Structured(task) => structured_to_event(task),
            TaskSource::ToolCall(call) => tool_call_to_event(call),
        }
    }
}

fn target_from(id: Option<String>, name: Option<String>, kind: Option<String>) -> Option<TaskTarget> {
    if let Some(id) = id.filter(|s| !s.trim().is_empty()) {
        return Some(TaskTarget::Id(TaskId::new(id)));
    }
    let name = name.filter(|s| !s.trim().is_empty())?;
    Some(TaskTarget::Name {
        name,
        kind: kind
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TASK_KIND.to_string()),
    })
}

fn structured_to_event(task: StructuredTask) -> Option<TaskEvent> {
    let progress = ProgressUpdate {
        current_step: task.current_step,
        total_steps: task.total_steps,
        percentage: task.percentage,
        current_step_name: task.current_step_name.clone(),
    };
    let signal = match task.status.as_deref().map(str::trim) {
        Some("start" | "started" | "starting") => TaskSignal::Start,
        Some("progress" | "running" | "in_progress") => TaskSignal::Progress(progress),
        None if !progress.is_empty() => TaskSignal::Progress(progress),
        Some("pause" | "paused") => TaskSignal::Pause,
        Some("resume" | "resumed" | "resuming") => TaskSignal::Resume,
        Some("complete" | "completed" | "done") => TaskSignal::Complete(task.result.clone()),
        Some("fail" | "failed" | "error") => TaskSignal::Fail(
            task.error
                .clone()
                .unwrap_or_else(|| "task failed".to_string()),
        ),
        Some("cancel" | "cancelled" | "canceled") => TaskSignal::Cancel(task.reason.clone()),
        _ => return None,
    };
    let target = target_from(task.task_id, task.task_name, task.task_type)?;
    Some(TaskEvent { target, signal })
}

fn tool_call_to_event(mut call: ToolCall) -> Option<TaskEvent> {
    let mut take = |keys: &[&str]| keys.iter().find_map(|k| call.args.remove(*k));
    let id = take(&["id", "task_id"]);
    let name = take(&["name", "task_name"]);
    let kind = take(&["type", "task_type", "kind"]);

    let signal = match call.function.as_str() {
        "start_task" | "create_task" => TaskSignal::Start,
        "update_task" | "report_progress" | "task_progress" => {
            TaskSignal::Progress(ProgressUpdate {
                current_step: take(&["current_step", "step"]).and_then(|v| v.parse().ok()),
                total_steps: take(&["total_steps", "steps"]).and_then(|v| v.parse().ok()),
                percentage: take(&["percentage", "percent"]).and_then(|v| v.parse().ok()),
                current_step_name: take(&["current_step_name", "step_name"]),
            })
        }
        "pause_task" => TaskSignal::Pause,
        "resume_task" => TaskSignal::Resume,
        "complete_task" | "finish_task" => {
            TaskSignal::Complete(take(&["result"]).map(serde_json::Value::String))
        }
        "fail_task" => {
            TaskSignal::Fail(take(&["error", "reason"]).unwrap_or_else(|| "task failed".into()))
        }
        "cancel_task" => TaskSignal::Cancel(take(&["reason"])),
        _ => return None,
    };
    let target = target_from(id, name, kind)?;
    Some(TaskEvent { target, signal })
}

fn unescape_quoted(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
