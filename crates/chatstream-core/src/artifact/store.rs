use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{Artifact, PendingArtifact};

#[derive(Debug, Default)]
struct StoreState {
    artifacts: Vec<Artifact>,
    pending: Option<PendingArtifact>,
    last_generated_image: Option<String>,
}

/// Shared artifact list plus the single pending-candidate slot.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    state: Arc<Mutex<StoreState>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn list(&self) -> Vec<Artifact> {
        self.lock().artifacts.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().artifacts.is_empty()
    }

    pub fn find_by_message_id(&self, message_id: &str) -> Option<Artifact> {
        self.lock()
            .artifacts
            .iter()
            .find(|a| a.message_id() == Some(message_id))
            .cloned()
    }

    pub fn pending(&self) -> Option<PendingArtifact> {
        self.lock().pending.clone()
    }

    /// Stages a candidate. An unconsumed previous candidate is replaced.
    pub fn stage(&self, candidate: PendingArtifact) {
        let mut state = self.lock();
        if let Some(previous) = state.pending.replace(candidate) {
            debug!(
                message_id = previous.message_id.as_deref().unwrap_or("-"),
                "replacing unconsumed pending artifact"
            );
        }
    }

    pub fn take_pending(&self) -> Option<PendingArtifact> {
        self.lock().pending.take()
    }

    /// Appends unless an artifact for the same source message exists. Returns whether it was added.
    pub fn insert_unique(&self, artifact: Artifact) -> bool {
        let mut state = self.lock();
        if let Some(message_id) = artifact.message_id()
            && state
                .artifacts
                .iter()
                .any(|a| a.message_id() == Some(message_id))
        {
            return false;
        }
        state.artifacts.push(artifact);
        true
    }

    pub fn last_generated_image(&self) -> Option<String> {
        self.lock().last_generated_image.clone()
    }

    pub fn set_last_generated_image(&self, url: impl Into<String>) {
        self.lock().last_generated_image = Some(url.into());
    }
}
