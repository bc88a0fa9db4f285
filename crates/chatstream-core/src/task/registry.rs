use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::{
    NewTask, ProgressUpdate, Task, TaskAction, TaskError, TaskEvent, TaskId, TaskSignal,
    TaskStatus, TaskTarget,
};
use crate::events::{ClientEvent, EventBus};

/// Shared task store. Clones refer to the same tasks.
///
/// Every change is published as [`ClientEvent::TaskChanged`] after the map entry is released,
/// so listeners may call back into the registry.
#[derive(Clone, Debug)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<TaskId, Slot>>,
    next_seq: Arc<AtomicU64>,
    bus: EventBus,
}

/// Insertion sequence keeps `list` in creation order even when timestamps tie.
#[derive(Debug)]
struct Slot {
    seq: u64,
    task: Task,
}

impl TaskRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            next_seq: Arc::new(AtomicU64::new(0)),
            bus,
        }
    }

    /// Creates a task in `pending`.
    pub fn create(&self, new_task: NewTask) -> Result<Task, TaskError> {
        if new_task.name.trim().is_empty() {
            return Err(TaskError::Invalid("task name must not be empty".into()));
        }
        let id = new_task.id.unwrap_or_else(TaskId::generate);
        if self.tasks.contains_key(&id) {
            return Err(TaskError::AlreadyExists(id));
        }
        let mut task = Task::new(id.clone(), new_task.name, new_task.kind);
        if let Some(total) = new_task.total_steps {
            task.progress.total_steps = total;
        }
        self.insert(task.clone());
        info!(task_id = %id, name = %task.name, kind = %task.kind, "task created");
        self.bus.emit(ClientEvent::TaskChanged { task: task.clone() });
        Ok(task)
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.get(id).map(|slot| slot.task.clone())
    }

    /// All tasks, oldest first.
    pub fn list(&self) -> Vec<Task> {
        let mut slots: Vec<(u64, Task)> = self
            .tasks
            .iter()
            .map(|slot| (slot.seq, slot.task.clone()))
            .collect();
        slots.sort_by_key(|(seq, _)| *seq);
        slots.into_iter().map(|(_, task)| task).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Newest task with this name that has not reached a terminal state.
    pub fn find_active_by_name(&self, name: &str) -> Option<Task> {
        self.tasks
            .iter()
            .filter(|slot| slot.task.name == name && !slot.task.status.is_terminal())
            .max_by_key(|slot| slot.seq)
            .map(|slot| slot.task.clone())
    }

    /// Explicit user deletion.
    pub fn remove(&self, id: &TaskId) -> Option<Task> {
        self.tasks.remove(id).map(|(_, slot)| slot.task)
    }

    /// Loads a persisted snapshot. Tasks that were executing when persisted come back as
    /// `interrupted` since their backend work is no longer tracked.
    pub fn restore(&self, snapshot: impl IntoIterator<Item = Task>) -> usize {
        let mut restored = 0;
        for mut task in snapshot {
            if task.status.is_active() {
                task.status = TaskStatus::Interrupted;
                task.updated_at = Utc::now();
            }
            self.insert(task);
            restored += 1;
        }
        restored
    }

    pub fn start(&self, id: &TaskId) -> Result<Task, TaskError> {
        self.transition(id, TaskAction::Start, |_| {})
    }

    pub fn pause(&self, id: &TaskId) -> Result<Task, TaskError> {
        self.transition(id, TaskAction::Pause, |_| {})
    }

    pub fn resume(&self, id: &TaskId) -> Result<Task, TaskError> {
        self.transition(id, TaskAction::Resume, |_| {})
    }

    pub fn cancel(&self, id: &TaskId, reason: Option<String>) -> Result<Task, TaskError> {
        self.transition(id, TaskAction::Cancel, move |task| {
            task.cancel_reason = reason;
        })
    }

    pub fn complete(
        &self,
        id: &TaskId,
        result: Option<serde_json::Value>,
    ) -> Result<Task, TaskError> {
        self.transition(id, TaskAction::Complete, move |task| {
            task.result = result;
            task.progress.percentage = 100.0;
            if task.progress.total_steps > 0 {
                task.progress.current_step = task.progress.total_steps;
            }
        })
    }

    pub fn fail(&self, id: &TaskId, error: impl Into<String>) -> Result<Task, TaskError> {
        let error = error.into();
        self.transition(id, TaskAction::Fail, move |task| {
            task.error = Some(error);
        })
    }

    pub fn retry(&self, id: &TaskId) -> Result<Task, TaskError> {
        self.transition(id, TaskAction::Retry, |task| {
            let total = task.progress.total_steps;
            task.progress = Default::default();
            task.progress.total_steps = total;
            task.result = None;
            task.error = None;
            task.cancel_reason = None;
            task.retries = task.retries.saturating_add(1);
        })
    }

    /// Merges a progress report. `starting` and `resuming` tasks move to `running`.
    pub fn progress(&self, id: &TaskId, update: ProgressUpdate) -> Result<Task, TaskError> {
        self.transition(id, TaskAction::Progress, move |task| {
            task.progress.merge(&update);
        })
    }

    pub fn pause_all(&self) -> Vec<TaskId> {
        self.apply_all(TaskAction::Pause, |registry, id| registry.pause(id))
    }

    pub fn resume_all(&self) -> Vec<TaskId> {
        self.apply_all(TaskAction::Resume, |registry, id| registry.resume(id))
    }

    pub fn cancel_all(&self, reason: Option<String>) -> Vec<TaskId> {
        self.apply_all(TaskAction::Cancel, |registry, id| {
            registry.cancel(id, reason.clone())
        })
    }

    /// Applies a task event decoded from the stream.
    pub fn apply_event(&self, event: TaskEvent) -> Result<Task, TaskError> {
        let id = match event.target {
            TaskTarget::Id(id) => {
                if !self.tasks.contains_key(&id) {
                    warn!(task_id = %id, action = %event.signal.action(), "task event for unknown task");
                    return Err(TaskError::NotFound(id));
                }
                id
            }
            TaskTarget::Name { name, kind } => match self.find_active_by_name(&name) {
                Some(task) => task.id,
                None => {
                    let action = event.signal.action();
                    let from = match event.signal {
                        TaskSignal::Start => TaskStatus::Pending,
                        _ => TaskStatus::Starting,
                    };
                    if from.apply(action).is_none() {
                        warn!(name = %name, %action, "stream event cannot apply to a new task; ignored");
                        return Err(TaskError::IllegalTransition {
                            id: TaskId::generate(),
                            from,
                            action,
                        });
                    }
                    let task = self.create(NewTask::named(name, kind))?;
                    if event.signal != TaskSignal::Start {
                        self.start(&task.id)?;
                    }
                    debug!(task_id = %task.id, "task auto-created from stream");
                    task.id
                }
            },
        };

        match event.signal {
            TaskSignal::Start => self.start(&id),
            TaskSignal::Progress(update) => self.progress(&id, update),
            TaskSignal::Pause => self.pause(&id),
            TaskSignal::Resume => self.resume(&id),
            TaskSignal::Complete(result) => self.complete(&id, result),
            TaskSignal::Fail(error) => self.fail(&id, error),
            TaskSignal::Cancel(reason) => self.cancel(&id, reason),
        }
    }

    fn insert(&self, task: Task) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.tasks.insert(task.id.clone(), Slot { seq, task });
    }

    fn apply_all(
        &self,
        action: TaskAction,
        op: impl Fn(&Self, &TaskId) -> Result<Task, TaskError>,
    ) -> Vec<TaskId> {
        let eligible: Vec<TaskId> = self
            .list()
            .into_iter()
            .filter(|t| t.status.apply(action).is_some())
            .map(|t| t.id)
            .collect();
        let applied: Vec<TaskId> = eligible
            .into_iter()
            .filter(|id| op(self, id).is_ok())
            .collect();
        info!(%action, count = applied.len(), "batch task operation");
        applied
    }

    fn transition(
        &self,
        id: &TaskId,
        action: TaskAction,
        mutate: impl FnOnce(&mut Task),
    ) -> Result<Task, TaskError> {
        let updated = {
            let Some(mut entry) = self.tasks.get_mut(id) else {
                warn!(task_id = %id, %action, "task not found");
                return Err(TaskError::NotFound(id.clone()));
            };
            let task = &mut entry.value_mut().task;
            let from = task.status;
            let Some(to) = from.apply(action) else {
                warn!(task_id = %id, %action, status = %from, "illegal task transition ignored");
                return Err(TaskError::IllegalTransition {
                    id: id.clone(),
                    from,
                    action,
                });
            };
            task.status = to;
            task.updated_at = Utc::now();
            mutate(task);
            if from != to {
                info!(task_id = %id, %action, %from, %to, "task transition");
            } else {
                debug!(task_id = %id, %action, status = %to, "task updated");
            }
            task.clone()
        };
        self.bus.emit(ClientEvent::TaskChanged {
            task: updated.clone(),
        });
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn registry() -> TaskRegistry {
        TaskRegistry::new(EventBus::new())
    }

    fn running(registry: &TaskRegistry, name: &str) -> TaskId {
        let task = registry.create(NewTask::named(name, "video")).unwrap();
        registry.start(&task.id).unwrap();
        registry
            .progress(&task.id, ProgressUpdate::default())
            .unwrap();
        task.id
    }

    #[test]
    fn pause_on_pending_is_rejected_and_leaves_task_unchanged() {
        let registry = registry();
        let task = registry
            .create(NewTask::named("Render", "video").with_id("t1"))
            .unwrap();
        let err = registry.pause(&task.id).unwrap_err();
        assert!(matches!(
            err,
            TaskError::IllegalTransition {
                from: TaskStatus::Pending,
                action: TaskAction::Pause,
                ..
            }
        ));
        assert_eq!(registry.get(&task.id).unwrap(), task);
    }

    #[test]
    fn illegal_actions_never_change_state() {
        let registry = registry();
        for from in TaskStatus::ALL {
            for action in TaskAction::ALL {
                if from.apply(action).is_some() {
                    continue;
                }
                let id = TaskId::generate();
                let mut task = Task::new(id.clone(), "probe", "general");
                task.status = from;
                registry.insert(task.clone());
                let result = match action {
                    TaskAction::Start => registry.start(&id),
                    TaskAction::Progress => registry.progress(&id, ProgressUpdate::default()),
                    TaskAction::Pause => registry.pause(&id),
                    TaskAction::Resume => registry.resume(&id),
                    TaskAction::Cancel => registry.cancel(&id, None),
                    TaskAction::Complete => registry.complete(&id, None),
                    TaskAction::Fail => registry.fail(&id, "x"),
                    TaskAction::Retry => registry.retry(&id),
                };
                assert!(result.is_err(), "{from} + {action}");
                assert_eq!(registry.get(&id).unwrap(), task, "{from} + {action}");
            }
        }
    }

    #[test]
    fn full_lifecycle_with_pause_resume_and_retry() {
        let registry = registry();
        let id = running(&registry, "Render");
        assert_eq!(registry.pause(&id).unwrap().status, TaskStatus::Paused);
        assert_eq!(registry.resume(&id).unwrap().status, TaskStatus::Resuming);
        let task = registry
            .progress(
                &id,
                ProgressUpdate {
                    current_step: Some(1),
                    total_steps: Some(4),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        let failed = registry.fail(&id, "encoder crashed").unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("encoder crashed"));
        let retried = registry.retry(&id).unwrap();
        assert_eq!(retried.status, TaskStatus::Pending);
        assert_eq!(retried.error, None);
        assert_eq!(retried.retries, 1);
        assert_eq!(retried.progress.total_steps, 4);
        assert_eq!(retried.progress.current_step, 0);
    }

    #[test]
    fn unknown_id_event_is_not_found_and_does_not_create() {
        let registry = registry();
        let err = registry
            .apply_event(TaskEvent {
                target: TaskTarget::Id(TaskId::new("ghost")),
                signal: TaskSignal::Start,
            })
            .unwrap_err();
        assert_eq!(err, TaskError::NotFound(TaskId::new("ghost")));
        assert!(registry.is_empty());
    }

    #[test]
    fn name_only_event_auto_creates_and_then_reuses() {
        let registry = registry();
        let event = |signal| TaskEvent {
            target: TaskTarget::Name {
                name: "Upscale".into(),
                kind: "image".into(),
            },
            signal,
        };
        let first = registry.apply_event(event(TaskSignal::Start)).unwrap();
        assert_eq!(first.status, TaskStatus::Starting);
        let second = registry
            .apply_event(event(TaskSignal::Progress(ProgressUpdate {
                percentage: Some(50.0),
                ..Default::default()
            })))
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.status, TaskStatus::Running);
        assert_eq!(registry.len(), 1);

        registry.complete(&first.id, None).unwrap();
        let third = registry
            .apply_event(event(TaskSignal::Complete(None)))
            .unwrap();
        assert_ne!(third.id, first.id);
        assert_eq!(third.status, TaskStatus::Completed);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn name_only_event_illegal_for_new_task_creates_nothing() {
        let bus = EventBus::new();
        let registry = TaskRegistry::new(bus.clone());
        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        bus.subscribe(move |_| *sink.lock().unwrap() += 1);

        for signal in [TaskSignal::Pause, TaskSignal::Resume] {
            let err = registry
                .apply_event(TaskEvent {
                    target: TaskTarget::Name {
                        name: "Render".into(),
                        kind: "video".into(),
                    },
                    signal,
                })
                .unwrap_err();
            assert!(matches!(
                err,
                TaskError::IllegalTransition {
                    from: TaskStatus::Starting,
                    ..
                }
            ));
        }
        assert!(registry.is_empty());
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[test]
    fn batch_operations_skip_ineligible_tasks() {
        let registry = registry();
        let a = running(&registry, "a");
        let b = running(&registry, "b");
        let pending = registry.create(NewTask::named("c", "general")).unwrap().id;

        let paused = registry.pause_all();
        assert_eq!(paused, vec![a.clone(), b.clone()]);
        assert_eq!(registry.get(&pending).unwrap().status, TaskStatus::Pending);

        let resumed = registry.resume_all();
        assert_eq!(resumed.len(), 2);

        let cancelled = registry.cancel_all(Some("shutdown".into()));
        assert_eq!(cancelled, vec![a.clone(), b]);
        let task = registry.get(&a).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.cancel_reason.as_deref(), Some("shutdown"));
        assert_eq!(registry.get(&pending).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn changes_are_published_and_listener_can_read_registry() {
        let bus = EventBus::new();
        let registry = TaskRegistry::new(bus.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (reader, sink) = (registry.clone(), seen.clone());
        bus.subscribe(move |event| {
            if let ClientEvent::TaskChanged { task } = event {
                let stored = reader.get(&task.id).map(|t| t.status);
                sink.lock().unwrap().push((task.status, stored));
            }
        });
        let task = registry.create(NewTask::named("x", "general")).unwrap();
        registry.start(&task.id).unwrap();
        let _ = registry.pause(&task.id);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (TaskStatus::Pending, Some(TaskStatus::Pending)),
                (TaskStatus::Starting, Some(TaskStatus::Starting)),
            ]
        );
    }

    #[test]
    fn restore_marks_active_tasks_interrupted() {
        let registry = registry();
        let mut active = Task::new(TaskId::new("a"), "a", "general");
        active.status = TaskStatus::Running;
        let mut paused = Task::new(TaskId::new("p"), "p", "general");
        paused.status = TaskStatus::Paused;
        assert_eq!(registry.restore([active, paused]), 2);
        assert_eq!(
            registry.get(&TaskId::new("a")).unwrap().status,
            TaskStatus::Interrupted
        );
        assert_eq!(
            registry.get(&TaskId::new("p")).unwrap().status,
            TaskStatus::Paused
        );
    }

    #[test]
    fn create_rejects_duplicate_ids_and_empty_names() {
        let registry = registry();
        registry
            .create(NewTask::named("a", "general").with_id("dup"))
            .unwrap();
        assert_eq!(
            registry.create(NewTask::named("b", "general").with_id("dup")),
            Err(TaskError::AlreadyExists(TaskId::new("dup")))
        );
        assert!(matches!(
            registry.create(NewTask::named("  ", "general")),
            Err(TaskError::Invalid(_))
        ));
    }
}
