//! State shared by the streaming client: task lifecycles, artifacts, and the outbound event bus.
//!
//! Nothing here performs I/O. Registries are cheap cloneable handles; pass the same handle to
//! every component that needs it.

pub mod artifact;
pub mod events;
pub mod message;
pub mod observability;
pub mod task;

pub use artifact::{
    AppId, Artifact, ArtifactEngine, ArtifactStore, PendingArtifact, UiContext, UiState,
    UnknownAppId, Visibility,
};
pub use events::{ClientEvent, EventBus, SubscriptionId};
pub use message::{FinalizedMessage, MediaItem, MediaKind};
pub use observability::{LogOutput, LogSettings, init_observability};
pub use task::{
    NewTask, ProgressUpdate, Task, TaskAction, TaskError, TaskEvent, TaskId, TaskProgress,
    TaskRegistry, TaskSignal, TaskSource, TaskStatus, TaskTarget,
};
