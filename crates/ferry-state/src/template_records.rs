//! Persisted post template records.

use serde::{Deserialize, Serialize};

use crate::ticket_records::MessageRef;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
/// What pressing a panel button does.
pub enum ButtonAction {
    Order,
    Support,
    Url,
}

impl ButtonAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Support => "support",
            Self::Url => "url",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "order" => Some(Self::Order),
            "support" => Some(Self::Support),
            "url" => Some(Self::Url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Visual style hint forwarded to the platform renderer.
pub enum ButtonStyle {
    #[default]
    Primary,
    Secondary,
    Success,
    Danger,
    Link,
}

impl ButtonStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Success => "success",
            Self::Danger => "danger",
            Self::Link => "link",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            "success" => Some(Self::Success),
            "danger" => Some(Self::Danger),
            "link" => Some(Self::Link),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Where a template image renders relative to the text.
pub enum ImagePlacement {
    Top,
    #[default]
    Bottom,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// One configured interactive control on a published post.
pub struct PanelButton {
    pub label: String,
    pub action: ButtonAction,
    #[serde(default)]
    pub style: ButtonStyle,
    /// Control-block row, 0..=4.
    #[serde(default)]
    pub row: u8,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// A named, persisted, editable post definition publishable to a channel.
pub struct PostTemplate {
    pub name: String,
    pub channel_id: String,
    pub title: String,
    /// May embed `{{btn:...}}` tags; stripped at render time.
    pub description: String,
    #[serde(default = "default_color_hex")]
    pub color_hex: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_placement: ImagePlacement,
    /// Optional second text block rendered as a separate section.
    #[serde(default)]
    pub split_description: Option<String>,
    #[serde(default)]
    pub panel_buttons: Vec<PanelButton>,
    /// Prior rendering; republishing overwrites it instead of duplicating.
    #[serde(default)]
    pub last_published: Option<MessageRef>,
}

fn default_color_hex() -> String {
    "2ECC71".to_string()
}

impl PostTemplate {
    pub fn new(name: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel_id: channel_id.into(),
            title: String::new(),
            description: String::new(),
            color_hex: default_color_hex(),
            image_url: None,
            image_placement: ImagePlacement::default(),
            split_description: None,
            panel_buttons: Vec::new(),
            last_published: None,
        }
    }
}
