use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Apps that can host artifacts in the sidebar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppId {
    ImageStudio,
    Writer,
    Summarizer,
    Translator,
    CodeAssistant,
}

/// What an app produces, which decides the artifact rule that applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppOutput {
    Image,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppTemplate {
    pub id: AppId,
    pub slug: &'static str,
    pub display_name: &'static str,
    pub title: &'static str,
    pub icon: &'static str,
    pub output: AppOutput,
}

const TEMPLATES: [AppTemplate; 5] = [
    AppTemplate {
        id: AppId::ImageStudio,
        slug: "image_studio",
        display_name: "Image Studio",
        title: "Generated Image",
        icon: "image",
        output: AppOutput::Image,
    },
    AppTemplate {
        id: AppId::Writer,
        slug: "writer",
        display_name: "Writer",
        title: "Draft",
        icon: "pen-line",
        output: AppOutput::Text,
    },
    AppTemplate {
        id: AppId::Summarizer,
        slug: "summarizer",
        display_name: "Summarizer",
        title: "Summary",
        icon: "list-collapse",
        output: AppOutput::Text,
    },
    AppTemplate {
        id: AppId::Translator,
        slug: "translator",
        display_name: "Translator",
        title: "Translation",
        icon: "languages",
        output: AppOutput::Text,
    },
    AppTemplate {
        id: AppId::CodeAssistant,
        slug: "code_assistant",
        display_name: "Code Assistant",
        title: "Code Snippet",
        icon: "code",
        output: AppOutput::Text,
    },
];

impl AppId {
    pub const ALL: [AppId; 5] = [
        AppId::ImageStudio,
        AppId::Writer,
        AppId::Summarizer,
        AppId::Translator,
        AppId::CodeAssistant,
    ];

    pub fn template(self) -> &'static AppTemplate {
        // TEMPLATES is declared in AppId::ALL order.
        &TEMPLATES[self as usize]
    }

    pub fn as_str(self) -> &'static str {
        self.template().slug
    }

    pub fn produces_text(self) -> bool {
        self.template().output == AppOutput::Text
    }

    pub fn is_image_app(self) -> bool {
        self.template().output == AppOutput::Image
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown app id: {0}")]
pub struct UnknownAppId(pub String);

impl FromStr for AppId {
    type Err = UnknownAppId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        TEMPLATES
            .iter()
            .find(|t| t.slug == wanted)
            .map(|t| t.id)
            .ok_or_else(|| UnknownAppId(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_line_up_with_ids() {
        for id in AppId::ALL {
            assert_eq!(id.template().id, id);
            assert_eq!(id.as_str().parse::<AppId>(), Ok(id));
        }
    }

    #[test]
    fn unknown_app_is_rejected() {
        assert_eq!(
            "music_box".parse::<AppId>(),
            Err(UnknownAppId("music_box".into()))
        );
        assert_eq!("Image-Studio".parse::<AppId>(), Ok(AppId::ImageStudio));
    }

    #[test]
    fn only_image_studio_is_an_image_app() {
        let image_apps: Vec<AppId> = AppId::ALL.into_iter().filter(|a| a.is_image_app()).collect();
        assert_eq!(image_apps, vec![AppId::ImageStudio]);
        assert!(AppId::Summarizer.produces_text());
    }
}
