//! Long-running task lifecycles surfaced to the user.
//!
//! Every mutation goes through [`TaskStatus::apply`], which encodes the full transition table.
//! Pairs it does not list are rejected and leave the task untouched.

mod registry;
mod source;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use registry::TaskRegistry;
pub use source::{TaskEvent, TaskSignal, TaskSource, TaskTarget};

/// Stable task identifier.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Starting,
    Running,
    Paused,
    Resuming,
    Completed,
    Failed,
    Cancelled,
    Interrupted,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 9] = [
        TaskStatus::Pending,
        TaskStatus::Starting,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Resuming,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Interrupted,
    ];

    /// Target state for `action`, or `None` when the pair is not in the transition table.
    pub fn apply(self, action: TaskAction) -> Option<TaskStatus> {
        use TaskAction as A;
        use TaskStatus as S;
        match (self, action) {
            (S::Pending, A::Start) => Some(S::Starting),
            (S::Starting | S::Resuming | S::Running, A::Progress) => Some(S::Running),
            (S::Running, A::Pause) => Some(S::Paused),
            (S::Paused, A::Resume) => Some(S::Resuming),
            (S::Running | S::Starting | S::Paused | S::Resuming, A::Cancel) => Some(S::Cancelled),
            (S::Running | S::Starting, A::Complete) => Some(S::Completed),
            (S::Running | S::Starting, A::Fail) => Some(S::Failed),
            (S::Failed | S::Cancelled, A::Retry) => Some(S::Pending),
            _ => None,
        }
    }

    /// Terminal states never change again except through `retry`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::Interrupted
        )
    }

    /// Work is (or is about to be) executing on the backend.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Starting | TaskStatus::Running | TaskStatus::Resuming
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Starting => "starting",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Resuming => "resuming",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Operations that may move a task between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Start,
    Progress,
    Pause,
    Resume,
    Cancel,
    Complete,
    Fail,
    Retry,
}

impl TaskAction {
    pub const ALL: [TaskAction; 8] = [
        TaskAction::Start,
        TaskAction::Progress,
        TaskAction::Pause,
        TaskAction::Resume,
        TaskAction::Cancel,
        TaskAction::Complete,
        TaskAction::Fail,
        TaskAction::Retry,
    ];
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskAction::Start => "start",
            TaskAction::Progress => "progress",
            TaskAction::Pause => "pause",
            TaskAction::Resume => "resume",
            TaskAction::Cancel => "cancel",
            TaskAction::Complete => "complete",
            TaskAction::Fail => "fail",
            TaskAction::Retry => "retry",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub current_step: u32,
    pub total_steps: u32,
    /// 0.0..=100.0
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_name: Option<String>,
}

/// Partial progress report. `None` fields keep the previously known value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    #[serde(default)]
    pub current_step: Option<u32>,
    #[serde(default)]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub current_step_name: Option<String>,
}

impl ProgressUpdate {
    pub fn is_empty(&self) -> bool {
        self.current_step.is_none()
            && self.total_steps.is_none()
            && self.percentage.is_none()
            && self.current_step_name.is_none()
    }
}

impl TaskProgress {
    pub fn merge(&mut self, update: &ProgressUpdate) {
        if let Some(step) = update.current_step {
            self.current_step = step;
        }
        if let Some(total) = update.total_steps {
            self.total_steps = total;
        }
        if let Some(pct) = update.percentage.filter(|p| p.is_finite()) {
            self.percentage = pct.clamp(0.0, 100.0);
        }
        if let Some(name) = &update.current_step_name {
            self.current_step_name = Some(name.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, name: impl Into<String>, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            kind: kind.into(),
            status: TaskStatus::Pending,
            progress: TaskProgress::default(),
            result: None,
            error: None,
            cancel_reason: None,
            retries: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields for an explicitly created task.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub id: Option<TaskId>,
    pub name: String,
    pub kind: String,
    pub total_steps: Option<u32>,
}

impl NewTask {
    pub fn named(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind: kind.into(),
            total_steps: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn total_steps(mut self, total: u32) -> Self {
        self.total_steps = Some(total);
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("task {id}: cannot {action} while {from}")]
    IllegalTransition {
        id: TaskId,
        from: TaskStatus,
        action: TaskAction,
    },
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),
    #[error("invalid task: {0}")]
    Invalid(String),
}
