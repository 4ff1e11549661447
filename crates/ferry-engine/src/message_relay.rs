//! Bidirectional message relay between a ticket channel and its DM mirror.
//!
//! Channel messages mirror into the staff chat (a topic is created lazily
//! when the chat supports them); DM replies relay back into the ticket
//! channel tagged with the replying identity. Per-ticket per-direction
//! ordering is the caller's contract: events for one ticket are handled
//! under its lock, one at a time. Edits and deletions propagate when the
//! mirrored counterpart is still locatable and are otherwise dropped with a
//! log line.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ferry_core::{FerryError, RetryPolicy};
use ferry_state::{BridgeStateStore, MessageRef, MirrorRef, Ticket};

use crate::platform_contract::{
    ChannelMessage, ChannelPlatformClient, DmMessage, DmPlatformClient,
};
use crate::post_template::RenderedPost;

pub struct MessageRelay {
    channel: Arc<dyn ChannelPlatformClient>,
    dm: Arc<dyn DmPlatformClient>,
    store: BridgeStateStore,
    staff_chat: String,
    retry: RetryPolicy,
    /// Channel message -> mirrored DM message. In-memory: after a restart
    /// old edits/deletes simply drop, which is the documented degradation.
    mirrored_to_dm: Mutex<HashMap<MessageRef, MessageRef>>,
    /// DM reply -> relayed channel message.
    relayed_to_channel: Mutex<HashMap<MessageRef, MessageRef>>,
}

impl MessageRelay {
    pub fn new(
        channel: Arc<dyn ChannelPlatformClient>,
        dm: Arc<dyn DmPlatformClient>,
        store: BridgeStateStore,
        staff_chat: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            channel,
            dm,
            store,
            staff_chat,
            retry,
            mirrored_to_dm: Mutex::new(HashMap::new()),
            relayed_to_channel: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the ticket's mirror conversation, creating the topic lazily
    /// on first use and persisting the reference.
    pub async fn ensure_mirror(&self, ticket_id: &str) -> Result<MirrorRef, FerryError> {
        let ticket = self
            .store
            .ticket(ticket_id)
            .ok_or_else(|| FerryError::mirror_not_found(format!("ticket {ticket_id}")))?;
        if let Some(mirror) = ticket.mirror.clone() {
            return Ok(mirror);
        }

        let topic_name = format!(
            "{} | {} | {}",
            ticket.kind.as_str().to_uppercase(),
            ticket.customer_display,
            ticket.channel_id
        );
        let topic_id = self
            .retry
            .run(|| {
                let topic_name = topic_name.clone();
                async move { self.dm.create_topic(&self.staff_chat, &topic_name).await }
            })
            .await?;
        if topic_id.is_none() {
            tracing::debug!(%ticket_id, "staff chat has no topic support; using general stream");
        }

        let mirror = MirrorRef {
            chat: self.staff_chat.clone(),
            topic_id,
        };
        let mut updated = ticket;
        updated.mirror = Some(mirror.clone());
        self.store
            .upsert_ticket(updated)
            .map_err(|error| FerryError::persistence(error.to_string()))?;
        Ok(mirror)
    }

    /// Mirrors a new customer/staff message from the ticket channel into the
    /// DM conversation. Bot-authored messages are skipped to avoid loops.
    pub async fn mirror_channel_message(
        &self,
        ticket: &Ticket,
        message: &ChannelMessage,
    ) -> Result<(), FerryError> {
        if message.author_is_bot {
            return Ok(());
        }
        let mirror = self.ensure_mirror(&ticket.ticket_id).await?;
        let text = render_mirror_text(message);
        let dm_message_id = self
            .retry
            .run(|| {
                let text = text.clone();
                let mirror = mirror.clone();
                async move {
                    self.dm
                        .send_to_chat(&mirror.chat, mirror.topic_id.as_deref(), &text)
                        .await
                }
            })
            .await?;
        self.mirrored_to_dm
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                MessageRef::new(message.channel_id.clone(), message.message_id.clone()),
                MessageRef::new(mirror.chat, dm_message_id),
            );
        Ok(())
    }

    /// Propagates an edit of a channel message to its mirrored DM message.
    /// Not safety-critical: an unlocatable mirror drops the edit.
    pub async fn propagate_channel_edit(&self, message: &ChannelMessage) {
        let source = MessageRef::new(message.channel_id.clone(), message.message_id.clone());
        let target = self
            .mirrored_to_dm
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&source)
            .cloned();
        let Some(target) = target else {
            tracing::debug!(message_id = %message.message_id, "edit without known mirror; dropped");
            return;
        };
        let text = render_mirror_text(message);
        if let Err(error) = self
            .dm
            .edit_message(&target.conversation, &target.message_id, &text)
            .await
        {
            tracing::info!(message_id = %message.message_id, %error, "mirror edit dropped");
        }
    }

    /// Propagates a channel-side delete to the mirrored DM message.
    pub async fn propagate_channel_delete(&self, channel_id: &str, message_id: &str) {
        let source = MessageRef::new(channel_id.to_string(), message_id.to_string());
        let target = self
            .mirrored_to_dm
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&source);
        let Some(target) = target else {
            tracing::debug!(%message_id, "delete without known mirror; dropped");
            return;
        };
        if let Err(error) = self
            .dm
            .delete_message(&target.conversation, &target.message_id)
            .await
        {
            tracing::info!(%message_id, %error, "mirror delete dropped");
        }
    }

    /// Relays a DM reply back into the ticket channel, tagged with the
    /// replying identity.
    pub async fn relay_dm_reply(
        &self,
        ticket: &Ticket,
        message: &DmMessage,
    ) -> Result<(), FerryError> {
        let post = RenderedPost::text(format!(
            "📨 {}: {}",
            message.author_display, message.text
        ));
        let channel_message_id = self
            .retry
            .run(|| {
                let post = post.clone();
                let channel_id = ticket.channel_id.clone();
                async move { self.channel.send_message(&channel_id, &post).await }
            })
            .await?;
        self.relayed_to_channel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                MessageRef::new(message.chat.clone(), message.message_id.clone()),
                MessageRef::new(ticket.channel_id.clone(), channel_message_id),
            );
        Ok(())
    }

    /// Propagates a DM-side edit to the relayed channel message.
    pub async fn propagate_dm_edit(&self, message: &DmMessage) {
        let source = MessageRef::new(message.chat.clone(), message.message_id.clone());
        let target = self
            .relayed_to_channel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&source)
            .cloned();
        let Some(target) = target else {
            tracing::debug!(message_id = %message.message_id, "dm edit without relayed copy; dropped");
            return;
        };
        let post = RenderedPost::text(format!(
            "📨 {}: {}",
            message.author_display, message.text
        ));
        if let Err(error) = self
            .channel
            .edit_message(&target.conversation, &target.message_id, &post)
            .await
        {
            tracing::info!(message_id = %message.message_id, %error, "relayed edit dropped");
        }
    }

    /// Propagates a DM-side delete to the relayed channel message.
    pub async fn propagate_dm_delete(&self, chat: &str, message_id: &str) {
        let source = MessageRef::new(chat.to_string(), message_id.to_string());
        let target = self
            .relayed_to_channel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&source);
        let Some(target) = target else {
            tracing::debug!(%message_id, "dm delete without relayed copy; dropped");
            return;
        };
        if let Err(error) = self
            .channel
            .delete_message(&target.conversation, &target.message_id)
            .await
        {
            tracing::info!(%message_id, %error, "relayed delete dropped");
        }
    }

    /// Resolves a DM message back to its ticket via the mirror reference.
    pub fn ticket_for_dm_message(&self, message: &DmMessage) -> Option<Ticket> {
        self.store
            .ticket_for_mirror(&message.chat, message.topic_id.as_deref())
    }
}

fn render_mirror_text(message: &ChannelMessage) -> String {
    let mut text = format!("💬 {}: {}", message.author_display, message.text);
    for attachment in &message.attachments {
        text.push_str(&format!(
            "\n📎 {} ({})",
            attachment.file_name, attachment.url
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::MessageRelay;
    use crate::platform_contract::{Attachment, ChannelMessage, DmMessage};
    use crate::platform_testkit::{InMemoryChannelClient, InMemoryDmClient};
    use ferry_core::RetryPolicy;
    use ferry_state::{
        BridgeStateStore, Ticket, TicketKind, TicketRating, TicketStatus,
    };

    struct Fixture {
        relay: MessageRelay,
        channel: Arc<InMemoryChannelClient>,
        dm: Arc<InMemoryDmClient>,
        store: BridgeStateStore,
        _temp: tempfile::TempDir,
    }

    fn fixture(supports_topics: bool) -> Fixture {
        let temp = tempdir().expect("tempdir");
        let store = BridgeStateStore::load(temp.path()).expect("store");
        let channel = Arc::new(InMemoryChannelClient::new());
        let dm = Arc::new(InMemoryDmClient::new(supports_topics));
        let relay = MessageRelay::new(
            channel.clone(),
            dm.clone(),
            store.clone(),
            "chat-staff".to_string(),
            RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 0,
            },
        );
        Fixture {
            relay,
            channel,
            dm,
            store,
            _temp: temp,
        }
    }

    fn seed_ticket(store: &BridgeStateStore) -> Ticket {
        let ticket = Ticket {
            ticket_id: "ticket-1".to_string(),
            kind: TicketKind::Order,
            customer_id: "user-1".to_string(),
            customer_display: "Jane".to_string(),
            channel_id: "channel-1".to_string(),
            mirror: None,
            status: TicketStatus::Open,
            opened_unix_ms: 1,
            closed_unix_ms: None,
            rating: TicketRating::Unset,
            rating_prompt: None,
        };
        store.upsert_ticket(ticket.clone()).expect("seed");
        ticket
    }

    fn channel_message(message_id: &str, text: &str) -> ChannelMessage {
        ChannelMessage {
            channel_id: "channel-1".to_string(),
            message_id: message_id.to_string(),
            author_id: "user-1".to_string(),
            author_display: "Jane".to_string(),
            author_is_bot: false,
            text: text.to_string(),
            attachments: Vec::new(),
            timestamp_ms: 5,
        }
    }

    #[tokio::test]
    async fn functional_channel_message_mirrors_into_lazy_topic() {
        let fixture = fixture(true);
        let ticket = seed_ticket(&fixture.store);
        fixture
            .relay
            .mirror_channel_message(&ticket, &channel_message("m-1", "hello"))
            .await
            .expect("mirror");

        let topics = fixture.dm.topics_created();
        assert_eq!(topics.len(), 1);
        assert!(topics[0].2.contains("ORDER"));

        let mirrored = fixture.dm.messages_in("chat-staff");
        assert_eq!(mirrored.len(), 1);
        assert!(mirrored[0].text.contains("Jane: hello"));
        assert_eq!(mirrored[0].topic_id.as_deref(), Some("topic-1"));

        // Mirror reference is persisted; a second message reuses the topic.
        fixture
            .relay
            .mirror_channel_message(&ticket, &channel_message("m-2", "more"))
            .await
            .expect("second mirror");
        assert_eq!(fixture.dm.topics_created().len(), 1);
    }

    #[tokio::test]
    async fn functional_topicless_chat_falls_back_to_general_stream() {
        let fixture = fixture(false);
        let ticket = seed_ticket(&fixture.store);
        fixture
            .relay
            .mirror_channel_message(&ticket, &channel_message("m-1", "hello"))
            .await
            .expect("mirror");
        let mirrored = fixture.dm.messages_in("chat-staff");
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].topic_id, None);
    }

    #[tokio::test]
    async fn functional_bot_messages_are_not_mirrored() {
        let fixture = fixture(true);
        let ticket = seed_ticket(&fixture.store);
        let mut message = channel_message("m-1", "auto");
        message.author_is_bot = true;
        fixture
            .relay
            .mirror_channel_message(&ticket, &message)
            .await
            .expect("skip");
        assert!(fixture.dm.all_sent().is_empty());
    }

    #[tokio::test]
    async fn functional_edits_propagate_to_mirror() {
        let fixture = fixture(true);
        let ticket = seed_ticket(&fixture.store);
        fixture
            .relay
            .mirror_channel_message(&ticket, &channel_message("m-1", "hello"))
            .await
            .expect("mirror");
        fixture
            .relay
            .propagate_channel_edit(&channel_message("m-1", "hello, edited"))
            .await;
        let mirrored = fixture.dm.messages_in("chat-staff");
        assert!(mirrored[0].text.contains("hello, edited"));
    }

    #[tokio::test]
    async fn functional_edit_of_vanished_mirror_is_dropped_silently() {
        let fixture = fixture(true);
        let ticket = seed_ticket(&fixture.store);
        fixture
            .relay
            .mirror_channel_message(&ticket, &channel_message("m-1", "hello"))
            .await
            .expect("mirror");
        let mirrored_id = fixture.dm.messages_in("chat-staff")[0].message_id.clone();
        fixture.dm.externally_delete("chat-staff", &mirrored_id);
        // Must not error or panic.
        fixture
            .relay
            .propagate_channel_edit(&channel_message("m-1", "too late"))
            .await;
        fixture.relay.propagate_channel_delete("channel-1", "m-unknown").await;
    }

    #[tokio::test]
    async fn functional_dm_reply_relays_back_with_identity_tag() {
        let fixture = fixture(true);
        let ticket = seed_ticket(&fixture.store);
        fixture
            .relay
            .mirror_channel_message(&ticket, &channel_message("m-1", "hello"))
            .await
            .expect("mirror");

        let reply = DmMessage {
            chat: "chat-staff".to_string(),
            topic_id: Some("topic-1".to_string()),
            message_id: "dm-reply-1".to_string(),
            author_display: "Support Sam".to_string(),
            text: "on it".to_string(),
            timestamp_ms: 9,
        };
        let resolved = fixture.relay.ticket_for_dm_message(&reply).expect("ticket");
        assert_eq!(resolved.ticket_id, ticket.ticket_id);

        fixture
            .relay
            .relay_dm_reply(&resolved, &reply)
            .await
            .expect("relay");
        let posts = fixture.channel.posts_in("channel-1");
        assert_eq!(posts.len(), 1);
        assert!(posts[0].post.body.contains("Support Sam: on it"));

        // Edit and delete follow the relayed copy.
        let mut edited = reply.clone();
        edited.text = "resolved".to_string();
        fixture.relay.propagate_dm_edit(&edited).await;
        assert!(fixture.channel.posts_in("channel-1")[0]
            .post
            .body
            .contains("resolved"));

        fixture
            .relay
            .propagate_dm_delete("chat-staff", "dm-reply-1")
            .await;
        assert!(fixture.channel.posts_in("channel-1").is_empty());
    }

    #[tokio::test]
    async fn unit_attachments_are_listed_in_mirror_text() {
        let fixture = fixture(true);
        let ticket = seed_ticket(&fixture.store);
        let mut message = channel_message("m-1", "see file");
        message.attachments.push(Attachment {
            file_name: "invoice.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            url: "https://files/invoice.pdf".to_string(),
        });
        fixture
            .relay
            .mirror_channel_message(&ticket, &message)
            .await
            .expect("mirror");
        let mirrored = fixture.dm.messages_in("chat-staff");
        assert!(mirrored[0].text.contains("📎 invoice.pdf"));
    }
}
