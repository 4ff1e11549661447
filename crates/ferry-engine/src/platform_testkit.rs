//! In-memory platform doubles.
//!
//! Local, non-network implementations of the two collaborator traits, in the
//! spirit of a dry-run transport: every send lands in an in-process store
//! that tests (and dev runs) can inspect. Failure injection covers blocked
//! chats, transient send failures, and externally deleted messages, which is
//! how the self-healing paths get exercised.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use ferry_core::{now_unix_ms, FerryError};

use crate::platform_contract::{ChannelMessage, ChannelPlatformClient, DmPlatformClient};
use crate::post_template::RenderedPost;

#[derive(Debug, Clone)]
pub struct StoredDmMessage {
    pub chat: String,
    pub topic_id: Option<String>,
    pub message_id: String,
    pub text: String,
    pub deleted: bool,
    pub edit_count: usize,
}

#[derive(Default)]
pub struct InMemoryDmClient {
    supports_topics: bool,
    next_message: AtomicU64,
    next_topic: AtomicU64,
    messages: Mutex<Vec<StoredDmMessage>>,
    topics: Mutex<Vec<(String, String, String)>>,
    blocked_chats: Mutex<HashSet<String>>,
    transient_failures: AtomicUsize,
}

impl InMemoryDmClient {
    pub fn new(supports_topics: bool) -> Self {
        Self {
            supports_topics,
            ..Self::default()
        }
    }

    /// Every send to this chat fails terminally, like a chat that blocked
    /// the bot.
    pub fn block_chat(&self, chat: &str) {
        self.blocked_chats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(chat.to_string());
    }

    /// The next `count` sends fail with a transient error.
    pub fn fail_next_sends(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Simulates an upstream user deleting a message: later edits and
    /// deletes of it report `MirrorNotFound`.
    pub fn externally_delete(&self, chat: &str, message_id: &str) {
        let mut messages = self
            .messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(message) = messages
            .iter_mut()
            .find(|message| message.chat == chat && message.message_id == message_id)
        {
            message.deleted = true;
        }
    }

    pub fn messages_in(&self, chat: &str) -> Vec<StoredDmMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|message| message.chat == chat && !message.deleted)
            .cloned()
            .collect()
    }

    pub fn message(&self, chat: &str, message_id: &str) -> Option<StoredDmMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|message| message.chat == chat && message.message_id == message_id)
            .cloned()
    }

    pub fn all_sent(&self) -> Vec<StoredDmMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn topics_created(&self) -> Vec<(String, String, String)> {
        self.topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn take_transient_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                (remaining > 0).then(|| remaining - 1)
            })
            .is_ok()
    }
}

#[async_trait]
impl DmPlatformClient for InMemoryDmClient {
    async fn send_to_chat(
        &self,
        chat: &str,
        topic_id: Option<&str>,
        text: &str,
    ) -> Result<String, FerryError> {
        if self.take_transient_failure() {
            return Err(FerryError::transient("simulated dm timeout"));
        }
        if self
            .blocked_chats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(chat)
        {
            return Err(FerryError::RecipientUnresolved {
                event: "send".to_string(),
                ticket_id: chat.to_string(),
            });
        }
        let message_id = format!("dm-{}", self.next_message.fetch_add(1, Ordering::SeqCst) + 1);
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(StoredDmMessage {
                chat: chat.to_string(),
                topic_id: topic_id.map(str::to_string),
                message_id: message_id.clone(),
                text: text.to_string(),
                deleted: false,
                edit_count: 0,
            });
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        chat: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), FerryError> {
        let mut messages = self
            .messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match messages
            .iter_mut()
            .find(|message| message.chat == chat && message.message_id == message_id)
        {
            Some(message) if !message.deleted => {
                message.text = text.to_string();
                message.edit_count += 1;
                Ok(())
            }
            _ => Err(FerryError::mirror_not_found(format!(
                "dm message {message_id} in {chat}"
            ))),
        }
    }

    async fn delete_message(&self, chat: &str, message_id: &str) -> Result<(), FerryError> {
        let mut messages = self
            .messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match messages
            .iter_mut()
            .find(|message| message.chat == chat && message.message_id == message_id)
        {
            Some(message) if !message.deleted => {
                message.deleted = true;
                Ok(())
            }
            _ => Err(FerryError::mirror_not_found(format!(
                "dm message {message_id} in {chat}"
            ))),
        }
    }

    async fn create_topic(&self, chat: &str, name: &str) -> Result<Option<String>, FerryError> {
        if !self.supports_topics {
            return Ok(None);
        }
        let topic_id = format!("topic-{}", self.next_topic.fetch_add(1, Ordering::SeqCst) + 1);
        self.topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((chat.to_string(), topic_id.clone(), name.to_string()));
        Ok(Some(topic_id))
    }
}

#[derive(Debug, Clone)]
pub struct StoredChannelPost {
    pub channel_id: String,
    pub message_id: String,
    pub post: RenderedPost,
    pub deleted: bool,
}

#[derive(Default)]
pub struct InMemoryChannelClient {
    next_channel: AtomicU64,
    next_message: AtomicU64,
    channels: Mutex<Vec<(String, String)>>,
    posts: Mutex<Vec<StoredChannelPost>>,
    history: Mutex<HashMap<String, Vec<ChannelMessage>>>,
    attachments: Mutex<HashMap<String, Vec<u8>>>,
    transient_failures: AtomicUsize,
}

impl InMemoryChannelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` sends fail with a transient error.
    pub fn fail_next_sends(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Seeds history for a channel, e.g. customer messages for an archive.
    pub fn push_history(&self, message: ChannelMessage) {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(message.channel_id.clone())
            .or_default()
            .push(message);
    }

    pub fn put_attachment(&self, url: &str, bytes: Vec<u8>) {
        self.attachments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url.to_string(), bytes);
    }

    pub fn channels_created(&self) -> Vec<(String, String)> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn posts_in(&self, channel_id: &str) -> Vec<StoredChannelPost> {
        self.posts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|post| post.channel_id == channel_id && !post.deleted)
            .cloned()
            .collect()
    }

    pub fn all_posts(&self) -> Vec<StoredChannelPost> {
        self.posts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn post(&self, channel_id: &str, message_id: &str) -> Option<StoredChannelPost> {
        self.posts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|post| post.channel_id == channel_id && post.message_id == message_id)
            .cloned()
    }

    fn take_transient_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                (remaining > 0).then(|| remaining - 1)
            })
            .is_ok()
    }
}

#[async_trait]
impl ChannelPlatformClient for InMemoryChannelClient {
    async fn create_channel(
        &self,
        name: &str,
        _category: Option<&str>,
        _topic: &str,
    ) -> Result<String, FerryError> {
        let channel_id = format!(
            "channel-{}",
            self.next_channel.fetch_add(1, Ordering::SeqCst) + 1
        );
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((channel_id.clone(), name.to_string()));
        Ok(channel_id)
    }

    async fn send_message(
        &self,
        channel_id: &str,
        post: &RenderedPost,
    ) -> Result<String, FerryError> {
        if self.take_transient_failure() {
            return Err(FerryError::transient("simulated channel timeout"));
        }
        let message_id = format!(
            "cmsg-{}",
            self.next_message.fetch_add(1, Ordering::SeqCst) + 1
        );
        self.posts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(StoredChannelPost {
                channel_id: channel_id.to_string(),
                message_id: message_id.clone(),
                post: post.clone(),
                deleted: false,
            });
        self.push_history(ChannelMessage {
            channel_id: channel_id.to_string(),
            message_id: message_id.clone(),
            author_id: "bridge".to_string(),
            author_display: "Bridge".to_string(),
            author_is_bot: true,
            text: post.body.clone(),
            attachments: Vec::new(),
            timestamp_ms: now_unix_ms(),
        });
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        post: &RenderedPost,
    ) -> Result<(), FerryError> {
        let mut posts = self
            .posts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match posts
            .iter_mut()
            .find(|stored| stored.channel_id == channel_id && stored.message_id == message_id)
        {
            Some(stored) if !stored.deleted => {
                stored.post = post.clone();
                Ok(())
            }
            _ => Err(FerryError::mirror_not_found(format!(
                "channel message {message_id} in {channel_id}"
            ))),
        }
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), FerryError> {
        let mut posts = self
            .posts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match posts
            .iter_mut()
            .find(|stored| stored.channel_id == channel_id && stored.message_id == message_id)
        {
            Some(stored) if !stored.deleted => {
                stored.deleted = true;
                Ok(())
            }
            _ => Err(FerryError::mirror_not_found(format!(
                "channel message {message_id} in {channel_id}"
            ))),
        }
    }

    async fn fetch_attachment(&self, url: &str) -> Result<Vec<u8>, FerryError> {
        self.attachments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(url)
            .cloned()
            .ok_or_else(|| FerryError::transient(format!("attachment {url} unavailable")))
    }

    async fn channel_history(&self, channel_id: &str) -> Result<Vec<ChannelMessage>, FerryError> {
        Ok(self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }
}
