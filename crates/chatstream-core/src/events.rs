//! Outbound events and the listener registry UI/store consumers subscribe to.
//!
//! Listeners run synchronously on the thread that emits. A listener that panics is logged and
//! skipped; the remaining listeners still receive the event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tracing::error;

use crate::artifact::Artifact;
use crate::task::Task;

/// Events published by the streaming pipeline and the registries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    MessageStarted { id: String },
    MessageAppended { id: String, delta: String },
    MessageFinished { id: String, text: String },
    MessageStatus { id: String, label: String },
    TaskChanged { task: Task },
    ArtifactCreated { artifact: Artifact },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::MessageStarted { .. } => "message-started",
            ClientEvent::MessageAppended { .. } => "message-appended",
            ClientEvent::MessageFinished { .. } => "message-finished",
            ClientEvent::MessageStatus { .. } => "message-status",
            ClientEvent::TaskChanged { .. } => "task-changed",
            ClientEvent::ArtifactCreated { .. } => "artifact-created",
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: DashMap<SubscriptionId, Listener>,
}

/// Cloneable listener registry shared by every component that publishes events.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Listeners are called in subscription order.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.insert(id, Arc::new(listener));
        id
    }

    /// Removes a listener. Returns `false` if it was already removed; calling twice is harmless.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn emit(&self, event: ClientEvent) {
        // Snapshot first so listeners may (un)subscribe without deadlocking on the map.
        let mut listeners: Vec<(SubscriptionId, Listener)> = self
            .inner
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!(subscription = id.0, event = event.name(), "event listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
