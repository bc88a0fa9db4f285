use serde::{Deserialize, Serialize};

/// Kind of media attached to an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    File,
}

impl MediaKind {
    /// Parses the `type` field of a media envelope. Unknown kinds are treated as files.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" | "img" | "picture" => MediaKind::Image,
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            _ => MediaKind::File,
        }
    }
}

/// One media item (image URL, generated file, ...) delivered alongside a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: String,
}

impl MediaItem {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Image,
            url: url.into(),
        }
    }

    /// Reads a `media` array from a JSON envelope. Malformed entries are skipped.
    pub fn list_from_json(value: Option<&serde_json::Value>) -> Vec<MediaItem> {
        let Some(items) = value.and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let url = item.get("url").and_then(|v| v.as_str())?;
                if url.trim().is_empty() {
                    return None;
                }
                let kind = item
                    .get("type")
                    .and_then(|v| v.as_str())
                    .map(MediaKind::parse)
                    .unwrap_or(MediaKind::File);
                Some(MediaItem {
                    kind,
                    url: url.to_string(),
                })
            })
            .collect()
    }
}

/// An assistant message after its stream completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedMessage {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

impl FinalizedMessage {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            media: Vec::new(),
        }
    }

    pub fn with_media(mut self, item: MediaItem) -> Self {
        self.media.push(item);
        self
    }

    /// First image URL attached to the message, if any.
    pub fn image_url(&self) -> Option<&str> {
        self.media
            .iter()
            .find(|m| m.kind == MediaKind::Image)
            .map(|m| m.url.as_str())
    }
}
