//! Typed grammar for the DM-side slash commands.
//!
//! Commands are a slash name followed by pipe-delimited positional fields,
//! e.g. `/save_template welcome | channel-1 | Welcome! | Pick an option`.
//! Dashes in command names are accepted as underscores. Parsing never
//! panics: anything malformed becomes `FerryError::CommandSyntax` carrying
//! the usage line for the command (or the catalog pointer for an unknown
//! name), which the runtime reports back to the invoking chat.

use ferry_core::FerryError;
use ferry_state::{ImagePlacement, StaffRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Template field addressable by `/edit_template_field`.
pub enum TemplateField {
    Title,
    Description,
    ColorHex,
    ImageUrl,
    ImagePlacement,
    SplitDescription,
    ChannelId,
}

impl TemplateField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::ColorHex => "color_hex",
            Self::ImageUrl => "image_url",
            Self::ImagePlacement => "image_placement",
            Self::SplitDescription => "split_description",
            Self::ChannelId => "channel_id",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "title" => Some(Self::Title),
            "description" => Some(Self::Description),
            "color_hex" | "color" => Some(Self::ColorHex),
            "image_url" | "image" => Some(Self::ImageUrl),
            "image_placement" => Some(Self::ImagePlacement),
            "split_description" => Some(Self::SplitDescription),
            "channel_id" | "channel" => Some(Self::ChannelId),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    /// Bind the invoking chat to a Channel-Platform customer id.
    Bind { customer_id: String },
    /// Register the invoking chat under a staff role (bootstrap-gated).
    RegisterRole { role: StaffRole },
    /// Assign a role to another chat (admin only).
    SetRole { chat: String, role: StaffRole },
    /// Show the invoking chat's role and binding.
    ShowRole,
    SaveTemplate {
        name: String,
        channel_id: String,
        title: String,
        description: String,
    },
    /// Publish a saved template to its channel (republish overwrites).
    SendTemplate { name: String },
    EditTemplateField {
        name: String,
        field: TemplateField,
        value: String,
    },
    ShowTemplate { name: String },
    ListTemplates,
    /// Post a staff reply into a ticket channel without the mirror.
    ReplyToTicket { ticket_id: String, text: String },
    ListTickets,
    CloseTicket { ticket_id: String },
    Help,
}

const CATALOG: &[(&str, &str)] = &[
    ("bind", "/bind <customer_id>"),
    ("register_role", "/register_role <admin|manager|builder|viewer>"),
    ("set_role", "/set_role <chat> | <admin|manager|builder|viewer>"),
    ("show_role", "/show_role"),
    (
        "save_template",
        "/save_template <name> | <channel_id> | <title> | <description>",
    ),
    ("send_template", "/send_template <name>"),
    (
        "edit_template_field",
        "/edit_template_field <name> | <field> | <value>",
    ),
    ("show_template", "/show_template <name>"),
    ("list_templates", "/list_templates"),
    ("reply_to_ticket", "/reply_to_ticket <ticket_id> | <text>"),
    ("list_tickets", "/list_tickets"),
    ("close_ticket", "/close_ticket <ticket_id>"),
    ("help", "/help"),
];

/// Usage lines for every command, for `/help` output.
pub fn command_catalog() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|(_, usage)| *usage)
}

fn usage_error(name: &str) -> FerryError {
    let usage = CATALOG
        .iter()
        .find(|(catalog_name, _)| *catalog_name == name)
        .map(|(_, usage)| *usage)
        .unwrap_or("/help");
    FerryError::command_syntax(usage)
}

/// Parses one DM command line into a typed command.
pub fn parse_bridge_command(line: &str) -> Result<BridgeCommand, FerryError> {
    let trimmed = line.trim();
    let without_slash = trimmed.strip_prefix('/').unwrap_or(trimmed);
    if without_slash.is_empty() {
        return Err(FerryError::command_syntax("/help"));
    }

    let (raw_name, rest) = match without_slash.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (without_slash, ""),
    };
    let name = raw_name.to_ascii_lowercase().replace('-', "_");

    // The last field of each command is greedy: it keeps embedded pipes,
    // so descriptions can carry `{{btn:...|...}}` tags and replies can
    // quote pipe characters.
    let fields = |count: usize| -> Result<Vec<&str>, FerryError> {
        let split: Vec<&str> = rest.splitn(count, '|').map(str::trim).collect();
        if split.len() == count && split.iter().all(|value| !value.is_empty()) {
            Ok(split)
        } else {
            Err(usage_error(&name))
        }
    };

    match name.as_str() {
        "bind" => {
            let parts = fields(1)?;
            Ok(BridgeCommand::Bind {
                customer_id: parts[0].to_string(),
            })
        }
        "register_role" => {
            let parts = fields(1)?;
            let role = StaffRole::parse(parts[0]).ok_or_else(|| usage_error(&name))?;
            Ok(BridgeCommand::RegisterRole { role })
        }
        "set_role" => {
            let parts = fields(2)?;
            let role = StaffRole::parse(parts[1]).ok_or_else(|| usage_error(&name))?;
            Ok(BridgeCommand::SetRole {
                chat: parts[0].to_string(),
                role,
            })
        }
        "show_role" => Ok(BridgeCommand::ShowRole),
        "save_template" => {
            let parts = fields(4)?;
            Ok(BridgeCommand::SaveTemplate {
                name: parts[0].to_string(),
                channel_id: parts[1].to_string(),
                title: parts[2].to_string(),
                description: parts[3].to_string(),
            })
        }
        "send_template" => {
            let parts = fields(1)?;
            Ok(BridgeCommand::SendTemplate {
                name: parts[0].to_string(),
            })
        }
        "edit_template_field" => {
            let parts = fields(3)?;
            let field_name =
                TemplateField::parse(parts[1]).ok_or_else(|| usage_error(&name))?;
            if field_name == TemplateField::ImagePlacement
                && parse_image_placement(parts[2]).is_none()
            {
                return Err(usage_error(&name));
            }
            Ok(BridgeCommand::EditTemplateField {
                name: parts[0].to_string(),
                field: field_name,
                value: parts[2].to_string(),
            })
        }
        "show_template" => {
            let parts = fields(1)?;
            Ok(BridgeCommand::ShowTemplate {
                name: parts[0].to_string(),
            })
        }
        "list_templates" => Ok(BridgeCommand::ListTemplates),
        "reply_to_ticket" => {
            let parts = fields(2)?;
            Ok(BridgeCommand::ReplyToTicket {
                ticket_id: parts[0].to_string(),
                text: parts[1].to_string(),
            })
        }
        "list_tickets" => Ok(BridgeCommand::ListTickets),
        "close_ticket" => {
            let parts = fields(1)?;
            Ok(BridgeCommand::CloseTicket {
                ticket_id: parts[0].to_string(),
            })
        }
        "help" => Ok(BridgeCommand::Help),
        _ => Err(FerryError::command_syntax(format!(
            "unknown command /{name}; see /help"
        ))),
    }
}

/// Accepted values for the `image_placement` template field.
pub fn parse_image_placement(raw: &str) -> Option<ImagePlacement> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "top" => Some(ImagePlacement::Top),
        "bottom" => Some(ImagePlacement::Bottom),
        _ => None,
    }
}
