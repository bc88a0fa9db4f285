//! Artifacts: persisted outputs (images, text) attached to the user turn that produced them.
//!
//! Finalized messages are turned into a [`PendingArtifact`] by [`ArtifactEngine::evaluate`], and
//! a later visibility-gated pass ([`ArtifactEngine::consume`]) materializes at most one
//! [`Artifact`] per source message.

mod apps;
mod engine;
mod store;

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use apps::{AppId, AppOutput, AppTemplate, UnknownAppId};
pub use engine::{ArtifactEngine, IMAGE_INTENT_KEYWORDS};
pub use store::ArtifactStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Image,
    Text,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
    pub app_name: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub content: String,
    pub metadata: ArtifactMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    pub app_id: AppId,
    pub title: String,
    pub user_input: String,
    pub created_at: DateTime<Utc>,
    pub generated_content: GeneratedContent,
}

impl Artifact {
    pub fn message_id(&self) -> Option<&str> {
        self.generated_content.metadata.message_id.as_deref()
    }
}

/// Staged artifact candidate waiting for the consumption pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    pub user_input: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Sidebar state owned by the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Visibility {
    pub active_app: Option<AppId>,
    pub sidebar_visible: bool,
}

/// Shared handle to the UI visibility signal. The pipeline only reads it.
#[derive(Debug, Clone, Default)]
pub struct UiState {
    inner: Arc<RwLock<Visibility>>,
}

impl UiState {
    pub fn new(visibility: Visibility) -> Self {
        Self {
            inner: Arc::new(RwLock::new(visibility)),
        }
    }

    pub fn snapshot(&self) -> Visibility {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_active_app(&self, app: Option<AppId>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .active_app = app;
    }

    pub fn set_sidebar_visible(&self, visible: bool) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .sidebar_visible = visible;
    }
}

/// Everything the engine reads about the UI for one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiContext {
    pub active_app: Option<AppId>,
    pub sidebar_visible: bool,
    pub triggering_user_input: String,
}

impl UiContext {
    pub fn new(visibility: Visibility, triggering_user_input: impl Into<String>) -> Self {
        Self {
            active_app: visibility.active_app,
            sidebar_visible: visibility.sidebar_visible,
            triggering_user_input: triggering_user_input.into(),
        }
    }

    /// Consumption is only allowed while an app is open in a visible sidebar.
    pub fn can_consume(&self) -> bool {
        self.sidebar_visible && self.active_app.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ui_state_clones_share_visibility() {
        let ui = UiState::default();
        let view = ui.clone();
        ui.set_active_app(Some(AppId::Writer));
        ui.set_sidebar_visible(true);
        let ctx = UiContext::new(view.snapshot(), "hi");
        assert!(ctx.can_consume());
        assert_eq!(ctx.active_app, Some(AppId::Writer));
    }

    #[test]
    fn artifact_serializes_in_camel_case() {
        let artifact = Artifact {
            id: "a1".into(),
            app_id: AppId::ImageStudio,
            title: "t".into(),
            user_input: "u".into(),
            created_at: Utc::now(),
            generated_content: GeneratedContent {
                kind: ContentKind::Image,
                content: "https://cdn/x.png".into(),
                metadata: ArtifactMetadata {
                    message_id: Some("m1".into()),
                    ..Default::default()
                },
            },
        };
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["appId"], "image_studio");
        assert_eq!(value["generatedContent"]["type"], "image");
        assert_eq!(value["generatedContent"]["metadata"]["messageId"], "m1");
    }
}
