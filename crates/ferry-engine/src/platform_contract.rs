//! Collaborator contracts for the two chat platforms.
//!
//! The engine never speaks a wire protocol. Each platform adapter implements
//! one of these traits and publishes normalized events; everything the core
//! needs from either platform is captured here, so adapters stay out of
//! scope and tests run against in-memory doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ferry_core::FerryError;

use crate::post_template::RenderedPost;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// File attached to a channel message (image, text, office document).
pub struct Attachment {
    pub file_name: String,
    #[serde(default)]
    pub content_type: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Normalized channel-platform message.
pub struct ChannelMessage {
    pub channel_id: String,
    pub message_id: String,
    pub author_id: String,
    pub author_display: String,
    #[serde(default)]
    pub author_is_bot: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
/// Normalized events observed on the channel platform.
pub enum ChannelEvent {
    ButtonPressed {
        channel_id: String,
        message_id: String,
        control_id: String,
        user_id: String,
        user_display: String,
    },
    MessageCreated {
        message: ChannelMessage,
    },
    MessageEdited {
        message: ChannelMessage,
    },
    MessageDeleted {
        channel_id: String,
        message_id: String,
    },
    CommandInvoked {
        channel_id: String,
        user_id: String,
        command_line: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Normalized DM-platform message.
pub struct DmMessage {
    pub chat: String,
    #[serde(default)]
    pub topic_id: Option<String>,
    pub message_id: String,
    pub author_display: String,
    #[serde(default)]
    pub text: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
/// Normalized events observed on the DM platform.
pub enum DmEvent {
    CommandInvoked {
        chat: String,
        command_line: String,
    },
    MessageSent {
        message: DmMessage,
    },
    MessageEdited {
        message: DmMessage,
    },
    MessageDeleted {
        chat: String,
        #[serde(default)]
        topic_id: Option<String>,
        message_id: String,
    },
}

#[async_trait]
/// Channel-platform primitives the engine awaits. One call never blocks
/// other tickets' processing; timeouts surface as `PlatformTransient`.
pub trait ChannelPlatformClient: Send + Sync {
    /// Creates a channel and returns its id.
    async fn create_channel(
        &self,
        name: &str,
        category: Option<&str>,
        topic: &str,
    ) -> Result<String, FerryError>;

    /// Sends a rendered post (text plus optional control block) and returns
    /// the new message id.
    async fn send_message(
        &self,
        channel_id: &str,
        post: &RenderedPost,
    ) -> Result<String, FerryError>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        post: &RenderedPost,
    ) -> Result<(), FerryError>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), FerryError>;

    async fn fetch_attachment(&self, url: &str) -> Result<Vec<u8>, FerryError>;

    /// Full message history of a channel, oldest first. Used for the close
    /// archive.
    async fn channel_history(&self, channel_id: &str) -> Result<Vec<ChannelMessage>, FerryError>;
}

#[async_trait]
/// DM-platform primitives the engine awaits.
pub trait DmPlatformClient: Send + Sync {
    /// Sends text to a chat (optionally inside a topic) and returns the new
    /// message id.
    async fn send_to_chat(
        &self,
        chat: &str,
        topic_id: Option<&str>,
        text: &str,
    ) -> Result<String, FerryError>;

    async fn edit_message(
        &self,
        chat: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), FerryError>;

    async fn delete_message(&self, chat: &str, message_id: &str) -> Result<(), FerryError>;

    /// Creates a threaded topic in a chat. Returns `None` when the chat does
    /// not support topics; callers fall back to the general stream.
    async fn create_topic(&self, chat: &str, name: &str) -> Result<Option<String>, FerryError>;
}
