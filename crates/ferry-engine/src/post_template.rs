//! Post template rendering: inline button tags plus configured panels.
//!
//! Templates embed `{{btn:<label>|<action>|<style>|<placement>|<emoji>}}`
//! tags (a trailing `|<url>` field is required for `url` actions) anywhere in
//! the description. Neither platform can place interactive controls inside
//! rich message bodies, so every recognized tag is stripped from the text and
//! rendered into the attached control block; when a tag asked for an inline
//! placement the rendered post carries an explicit note saying the control
//! was moved, so the limitation stays visible instead of silent.

use serde::{Deserialize, Serialize};

use ferry_core::FerryError;
use ferry_state::{ButtonAction, ButtonStyle, ImagePlacement, PanelButton, PostTemplate};

const BTN_TAG_OPEN: &str = "{{btn:";
const BTN_TAG_CLOSE: &str = "}}";
const BTN_TAG_USAGE: &str =
    "{{btn:<label>|<action order|support|url>|<style>|<row0..row4|inline|bottom>|<emoji>[|<url>]}}";
const MAX_CONTROL_ROW: u8 = 4;

pub const CONTROL_ID_OPEN_ORDER: &str = "ticket_order";
pub const CONTROL_ID_OPEN_SUPPORT: &str = "ticket_support";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// One button in a rendered post's attached control block.
pub struct ControlButton {
    pub control_id: String,
    pub label: String,
    /// Template-level action; lifecycle controls (close, rating) carry none
    /// and are identified by `control_id` alone.
    #[serde(default)]
    pub action: Option<ButtonAction>,
    pub style: ButtonStyle,
    pub row: u8,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Platform-ready message payload: rich body plus attached control block.
pub struct RenderedPost {
    #[serde(default)]
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub color_hex: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_placement: ImagePlacement,
    #[serde(default)]
    pub second_block: Option<String>,
    #[serde(default)]
    pub controls: Vec<ControlButton>,
    /// Set when an inline placement was requested; controls always render in
    /// the attached block (platform limitation).
    #[serde(default)]
    pub control_note: Option<String>,
}

impl RenderedPost {
    /// Plain text payload with no controls, used by relay and notifications.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            body: body.into(),
            color_hex: String::new(),
            image_url: None,
            image_placement: ImagePlacement::default(),
            second_block: None,
            controls: Vec::new(),
            control_note: None,
        }
    }

    pub fn with_controls(mut self, controls: Vec<ControlButton>) -> Self {
        self.controls = controls;
        self
    }
}

/// Stable control id for a ticket-opening or link button.
pub fn control_id_for(action: ButtonAction, label: &str) -> String {
    match action {
        ButtonAction::Order => CONTROL_ID_OPEN_ORDER.to_string(),
        ButtonAction::Support => CONTROL_ID_OPEN_SUPPORT.to_string(),
        ButtonAction::Url => format!(
            "link_{}",
            label
                .to_ascii_lowercase()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect::<String>()
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagPlacement {
    Row(u8),
    Inline,
    Bottom,
}

impl TagPlacement {
    fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "inline" => Some(Self::Inline),
            "bottom" => Some(Self::Bottom),
            _ => {
                let row = normalized.strip_prefix("row")?.parse::<u8>().ok()?;
                (row <= MAX_CONTROL_ROW).then_some(Self::Row(row))
            }
        }
    }

    fn row(self) -> u8 {
        match self {
            Self::Row(row) => row,
            Self::Inline => 0,
            Self::Bottom => MAX_CONTROL_ROW,
        }
    }
}

fn parse_button_tag(fields: &str) -> Result<(ControlButton, bool), FerryError> {
    let parts: Vec<&str> = fields.split('|').map(str::trim).collect();
    if parts.len() < 5 || parts.len() > 6 {
        return Err(FerryError::command_syntax(BTN_TAG_USAGE));
    }
    let label = parts[0];
    if label.is_empty() {
        return Err(FerryError::command_syntax(BTN_TAG_USAGE));
    }
    let action = ButtonAction::parse(parts[1])
        .ok_or_else(|| FerryError::command_syntax(BTN_TAG_USAGE))?;
    let style = ButtonStyle::parse(parts[2])
        .ok_or_else(|| FerryError::command_syntax(BTN_TAG_USAGE))?;
    let placement = TagPlacement::parse(parts[3])
        .ok_or_else(|| FerryError::command_syntax(BTN_TAG_USAGE))?;
    let emoji = (!parts[4].is_empty()).then(|| parts[4].to_string());
    let url = parts.get(5).filter(|raw| !raw.is_empty()).map(|raw| raw.to_string());
    if action == ButtonAction::Url && url.is_none() {
        return Err(FerryError::command_syntax(
            "url buttons require a trailing |<url> field",
        ));
    }

    Ok((
        ControlButton {
            control_id: control_id_for(action, label),
            label: label.to_string(),
            action: Some(action),
            style,
            row: placement.row(),
            emoji,
            url,
        },
        placement == TagPlacement::Inline,
    ))
}

/// Strips every `{{btn:...}}` tag from `text`, returning the cleaned text,
/// the extracted buttons, and whether any tag asked for inline placement.
fn extract_button_tags(text: &str) -> Result<(String, Vec<ControlButton>, bool), FerryError> {
    let mut cleaned = String::with_capacity(text.len());
    let mut buttons = Vec::new();
    let mut inline_requested = false;
    let mut rest = text;

    while let Some(open) = rest.find(BTN_TAG_OPEN) {
        cleaned.push_str(&rest[..open]);
        let after_open = &rest[open + BTN_TAG_OPEN.len()..];
        let close = after_open
            .find(BTN_TAG_CLOSE)
            .ok_or_else(|| FerryError::command_syntax(BTN_TAG_USAGE))?;
        let (button, inline) = parse_button_tag(&after_open[..close])?;
        inline_requested |= inline;
        buttons.push(button);
        rest = &after_open[close + BTN_TAG_CLOSE.len()..];
    }
    cleaned.push_str(rest);

    // Collapse doubled spaces left behind by stripped mid-sentence tags.
    let cleaned = cleaned.replace("  ", " ").trim().to_string();
    Ok((cleaned, buttons, inline_requested))
}

fn panel_button_to_control(button: &PanelButton) -> ControlButton {
    ControlButton {
        control_id: control_id_for(button.action, &button.label),
        label: button.label.clone(),
        action: Some(button.action),
        style: button.style,
        row: button.row.min(MAX_CONTROL_ROW),
        emoji: button.emoji.clone(),
        url: button.url.clone(),
    }
}

fn validate_color_hex(raw: &str) -> Result<String, FerryError> {
    let trimmed = raw.trim().trim_start_matches('#');
    if trimmed.is_empty() || trimmed.len() > 6 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FerryError::command_syntax(
            "color must be a hex value like 2ECC71",
        ));
    }
    Ok(trimmed.to_ascii_uppercase())
}

/// Renders a template into a platform-ready payload. Deterministic: the same
/// template state always yields an identical payload, so republishing never
/// accumulates stale controls.
pub fn render_post_template(template: &PostTemplate) -> Result<RenderedPost, FerryError> {
    let (body, inline_buttons, inline_requested) = extract_button_tags(&template.description)?;
    let second_block = match &template.split_description {
        Some(raw) => {
            let (cleaned, mut extra, inline) = extract_button_tags(raw)?;
            if !extra.is_empty() {
                // Buttons tagged in the second block join the same control set.
                let mut merged = inline_buttons.clone();
                merged.append(&mut extra);
                return finish_render(template, body, Some(cleaned), merged, inline_requested || inline);
            }
            Some(cleaned)
        }
        None => None,
    };
    finish_render(template, body, second_block, inline_buttons, inline_requested)
}

fn finish_render(
    template: &PostTemplate,
    body: String,
    second_block: Option<String>,
    inline_buttons: Vec<ControlButton>,
    inline_requested: bool,
) -> Result<RenderedPost, FerryError> {
    let mut controls: Vec<ControlButton> = Vec::new();
    for button in &template.panel_buttons {
        let control = panel_button_to_control(button);
        if !controls
            .iter()
            .any(|existing| existing.action == control.action && existing.label == control.label)
        {
            controls.push(control);
        }
    }
    for control in inline_buttons {
        if !controls
            .iter()
            .any(|existing| existing.action == control.action && existing.label == control.label)
        {
            controls.push(control);
        }
    }
    controls.sort_by(|a, b| a.row.cmp(&b.row));

    Ok(RenderedPost {
        title: template.title.clone(),
        body,
        color_hex: validate_color_hex(&template.color_hex)?,
        image_url: template.image_url.clone(),
        image_placement: template.image_placement,
        second_block,
        controls,
        control_note: inline_requested.then(|| {
            "Interactive controls render in the attached control block; the platform cannot \
             embed them inside the message body."
                .to_string()
        }),
    })
}

/// Substitutes the `{user}` placeholder with a platform mention.
pub fn substitute_user_placeholder(text: &str, mention: &str) -> String {
    text.replace("{user}", mention)
}
