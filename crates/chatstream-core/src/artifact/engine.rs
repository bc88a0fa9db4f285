use chrono::Utc;
use tracing::{debug, info};

use super::{
    AppId, Artifact, ArtifactMetadata, ArtifactStore, ContentKind, GeneratedContent, PendingArtifact,
    UiContext,
};
use crate::events::{ClientEvent, EventBus};
use crate::message::FinalizedMessage;

/// Word prefixes that mark a prompt as asking for an image.
pub const IMAGE_INTENT_KEYWORDS: &[&str] = &[
    "image",
    "picture",
    "photo",
    "draw",
    "illustrat",
    "paint",
    "sketch",
    "render",
    "portrait",
    "logo",
    "wallpaper",
];

const TITLE_INPUT_CHARS: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    Image { url: String, publish: bool },
    Text,
}

fn has_image_intent(input: &str) -> bool {
    input
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| IMAGE_INTENT_KEYWORDS.iter().any(|k| word.starts_with(k)))
}

fn decide(message: &FinalizedMessage, ctx: &UiContext) -> Option<Decision> {
    let image = message.image_url();

    if let Some(url) = image
        && has_image_intent(&ctx.triggering_user_input)
        && (ctx.active_app.is_none() || !ctx.sidebar_visible)
    {
        return Some(Decision::Image {
            url: url.to_string(),
            publish: false,
        });
    }

    if let Some(app) = ctx.active_app {
        if app.is_image_app() && ctx.sidebar_visible {
            return image.map(|url| Decision::Image {
                url: url.to_string(),
                publish: true,
            });
        }
        if app.produces_text() && image.is_none() && !message.content.trim().is_empty() {
            return Some(Decision::Text);
        }
    }
    None
}

/// Image candidates land in an image app even when a text app is open. Text candidates need a
/// text app.
fn host_app(active: AppId, candidate: &PendingArtifact) -> Option<AppId> {
    if candidate.image_url.is_some() {
        if active.is_image_app() {
            return Some(active);
        }
        return AppId::ALL.into_iter().find(|app| app.is_image_app());
    }
    active.produces_text().then_some(active)
}

fn title_for(template_title: &str, user_input: &str) -> String {
    let input = user_input.trim();
    if input.is_empty() {
        return template_title.to_string();
    }
    let mut short: String = input.chars().take(TITLE_INPUT_CHARS).collect();
    if input.chars().count() > TITLE_INPUT_CHARS {
        short.push_str("...");
    }
    format!("{template_title}: {short}")
}

/// Decides which finalized messages become artifacts and materializes them.
#[derive(Debug, Clone)]
pub struct ArtifactEngine {
    store: ArtifactStore,
    bus: EventBus,
}

impl ArtifactEngine {
    pub fn new(store: ArtifactStore, bus: EventBus) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Stages a candidate for `message` when one of the artifact rules matches.
    pub fn evaluate(&self, message: &FinalizedMessage, ctx: &UiContext) -> Option<PendingArtifact> {
        let decision = decide(message, ctx)?;
        let mut candidate = PendingArtifact {
            image_url: None,
            text_content: None,
            user_input: ctx.triggering_user_input.clone(),
            timestamp: Utc::now(),
            ai_response: Some(message.content.clone()).filter(|s| !s.is_empty()),
            message_id: Some(message.id.clone()),
        };
        match decision {
            Decision::Image { url, publish } => {
                if publish {
                    self.store.set_last_generated_image(url.clone());
                }
                candidate.image_url = Some(url);
            }
            Decision::Text => candidate.text_content = Some(message.content.clone()),
        }
        debug!(message_id = %message.id, image = candidate.image_url.is_some(), "artifact candidate staged");
        self.store.stage(candidate.clone());
        Some(candidate)
    }

    /// Converts the pending candidate into an artifact if the sidebar shows an app.
    ///
    /// When the gate is closed, or the open app cannot host the candidate, it stays staged.
    /// Otherwise the slot is cleared whether the candidate is persisted or dropped as a duplicate.
    pub fn consume(&self, ctx: &UiContext) -> Option<Artifact> {
        if !ctx.can_consume() {
            return None;
        }
        let active = ctx.active_app?;
        let pending = self.store.pending()?;
        let Some(app) = host_app(active, &pending) else {
            debug!(app = %active, "pending candidate does not fit the open app; left staged");
            return None;
        };
        let candidate = self.store.take_pending()?;

        if let Some(message_id) = candidate.message_id.as_deref()
            && self.store.find_by_message_id(message_id).is_some()
        {
            debug!(message_id, "artifact already exists for message; candidate dropped");
            return None;
        }

        let template = app.template();
        let (kind, content) = match (candidate.image_url, candidate.text_content) {
            (Some(url), _) => (ContentKind::Image, url),
            (None, Some(text)) => (ContentKind::Text, text),
            (None, None) => return None,
        };
        let artifact = Artifact {
            id: uuid::Uuid::new_v4().to_string(),
            app_id: app,
            title: title_for(template.title, &candidate.user_input),
            user_input: candidate.user_input,
            created_at: Utc::now(),
            generated_content: GeneratedContent {
                kind,
                content,
                metadata: ArtifactMetadata {
                    message_id: candidate.message_id,
                    ai_response: candidate.ai_response,
                    app_name: template.display_name.to_string(),
                    icon: template.icon.to_string(),
                },
            },
        };
        if !self.store.insert_unique(artifact.clone()) {
            debug!(artifact_id = %artifact.id, "artifact for message inserted concurrently; dropped");
            return None;
        }
        info!(artifact_id = %artifact.id, app = %app, kind = ?kind, "artifact created");
        self.bus.emit(ClientEvent::ArtifactCreated {
            artifact: artifact.clone(),
        });
        Some(artifact)
    }

    /// Evaluate then consume in one pass.
    pub fn process(&self, message: &FinalizedMessage, ctx: &UiContext) -> Option<Artifact> {
        self.evaluate(message, ctx);
        self.consume(ctx)
    }
}
