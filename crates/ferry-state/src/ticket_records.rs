//! Persisted record types for tickets, bindings, roles, and digests.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `TicketKind` values.
pub enum TicketKind {
    Order,
    Support,
}

impl TicketKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Support => "support",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "order" => Some(Self::Order),
            "support" => Some(Self::Support),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `TicketStatus` values.
pub enum TicketStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Post-close rating recorded from the rating prompt.
pub enum TicketRating {
    Success,
    Neutral,
    Failed,
    #[default]
    Unset,
}

impl TicketRating {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Neutral => "neutral",
            Self::Failed => "failed",
            Self::Unset => "unset",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "neutral" => Some(Self::Neutral),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
/// Staff role attached to a DM chat.
pub enum StaffRole {
    Admin,
    Manager,
    Builder,
    Viewer,
}

impl StaffRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Builder => "builder",
            Self::Viewer => "viewer",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "manager" => Some(Self::Manager),
            "builder" => Some(Self::Builder),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
/// Reference to a message on either platform: the conversation (channel or
/// chat) plus the platform message id.
pub struct MessageRef {
    pub conversation: String,
    pub message_id: String,
}

impl MessageRef {
    pub fn new(conversation: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            conversation: conversation.into(),
            message_id: message_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Mirrored DM conversation for a ticket: the staff chat plus the topic id
/// when the chat supports threaded topics.
pub struct MirrorRef {
    pub chat: String,
    #[serde(default)]
    pub topic_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `Ticket`: one tracked order/support request.
pub struct Ticket {
    pub ticket_id: String,
    pub kind: TicketKind,
    pub customer_id: String,
    pub customer_display: String,
    pub channel_id: String,
    #[serde(default)]
    pub mirror: Option<MirrorRef>,
    pub status: TicketStatus,
    pub opened_unix_ms: u64,
    #[serde(default)]
    pub closed_unix_ms: Option<u64>,
    #[serde(default)]
    pub rating: TicketRating,
    /// Message carrying the three rating buttons, posted on close.
    #[serde(default)]
    pub rating_prompt: Option<MessageRef>,
}

impl Ticket {
    pub fn is_open(&self) -> bool {
        self.status == TicketStatus::Open
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// One source message captured in a digest window.
pub struct DigestEntry {
    pub source: MessageRef,
    pub author_display: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Rolling digest pointer plus its bounded source window.
pub struct DigestState {
    #[serde(default)]
    pub message: Option<MessageRef>,
    #[serde(default)]
    pub window: Vec<DigestEntry>,
}
