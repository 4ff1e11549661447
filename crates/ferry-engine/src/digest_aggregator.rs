//! Rolling per-ticket digest in the staff conversation.
//!
//! Instead of one staff message per customer message, each ticket keeps a
//! single digest message holding the last N source messages. New activity
//! appends to the window (evicting the oldest entry past the cap) and the
//! digest is edited in place. If the digest message was deleted out from
//! under us, the edit reports `MirrorNotFound` and the aggregator heals by
//! posting a fresh digest and re-pointing the stored reference. Source
//! edits and deletions rewrite or drop their window entry and re-render.

use std::sync::Arc;

use ferry_core::{FerryError, RetryPolicy};
use ferry_state::{BridgeStateStore, DigestEntry, DigestState, MessageRef, MirrorRef, Ticket};

use crate::platform_contract::{ChannelMessage, DmPlatformClient};

pub struct DigestAggregator {
    dm: Arc<dyn DmPlatformClient>,
    store: BridgeStateStore,
    window_size: usize,
    retry: RetryPolicy,
}

impl DigestAggregator {
    pub fn new(
        dm: Arc<dyn DmPlatformClient>,
        store: BridgeStateStore,
        window_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            dm,
            store,
            // A zero-size window would render an empty digest forever.
            window_size: window_size.max(1),
            retry,
        }
    }

    /// Captures a new source message into the ticket's digest window and
    /// refreshes the digest message.
    pub async fn record_message(
        &self,
        ticket: &Ticket,
        mirror: &MirrorRef,
        message: &ChannelMessage,
    ) -> Result<(), FerryError> {
        let mut digest = self.store.digest_of(&ticket.ticket_id);
        digest.window.push(DigestEntry {
            source: MessageRef::new(message.channel_id.clone(), message.message_id.clone()),
            author_display: message.author_display.clone(),
            text: message.text.clone(),
        });
        while digest.window.len() > self.window_size {
            digest.window.remove(0);
        }
        self.render_and_store(ticket, mirror, digest).await
    }

    /// Rewrites the matching window entry after a source edit. A message
    /// already evicted from the window is ignored.
    pub async fn on_source_edited(
        &self,
        ticket: &Ticket,
        mirror: &MirrorRef,
        message: &ChannelMessage,
    ) -> Result<(), FerryError> {
        let mut digest = self.store.digest_of(&ticket.ticket_id);
        let source = MessageRef::new(message.channel_id.clone(), message.message_id.clone());
        let Some(entry) = digest.window.iter_mut().find(|entry| entry.source == source) else {
            return Ok(());
        };
        entry.author_display = message.author_display.clone();
        entry.text = message.text.clone();
        self.render_and_store(ticket, mirror, digest).await
    }

    /// Drops the matching window entry after a source delete.
    pub async fn on_source_deleted(
        &self,
        ticket: &Ticket,
        mirror: &MirrorRef,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), FerryError> {
        let mut digest = self.store.digest_of(&ticket.ticket_id);
        let source = MessageRef::new(channel_id.to_string(), message_id.to_string());
        let before = digest.window.len();
        digest.window.retain(|entry| entry.source != source);
        if digest.window.len() == before {
            return Ok(());
        }
        self.render_and_store(ticket, mirror, digest).await
    }

    async fn render_and_store(
        &self,
        ticket: &Ticket,
        mirror: &MirrorRef,
        mut digest: DigestState,
    ) -> Result<(), FerryError> {
        let text = render_digest(ticket, &digest);

        let mut needs_send = true;
        if let Some(existing) = &digest.message {
            match self
                .dm
                .edit_message(&existing.conversation, &existing.message_id, &text)
                .await
            {
                Ok(()) => needs_send = false,
                Err(FerryError::MirrorNotFound { .. }) => {
                    tracing::info!(
                        ticket_id = %ticket.ticket_id,
                        "digest message vanished; posting a replacement"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        if needs_send {
            let message_id = self
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
            digest.message = Some(MessageRef::new(mirror.chat.clone(), message_id));
        }

        self.store
            .set_digest(&ticket.ticket_id, digest)
            .map_err(|error| FerryError::persistence(error.to_string()))
    }
}

fn render_digest(ticket: &Ticket, digest: &DigestState) -> String {
    let mut lines = vec![format!(
        "📋 Digest for {} ({} messages shown)",
        ticket.ticket_id,
        digest.window.len()
    )];
    for entry in &digest.window {
        lines.push(format!("• {}: {}", entry.author_display, entry.text));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::DigestAggregator;
    use crate::platform_contract::ChannelMessage;
    use crate::platform_testkit::InMemoryDmClient;
    use ferry_core::RetryPolicy;
    use ferry_state::{
        BridgeStateStore, MirrorRef, Ticket, TicketKind, TicketRating, TicketStatus,
    };

    struct Fixture {
        aggregator: DigestAggregator,
        dm: Arc<InMemoryDmClient>,
        store: BridgeStateStore,
        ticket: Ticket,
        mirror: MirrorRef,
        _temp: tempfile::TempDir,
    }

    fn fixture(window_size: usize) -> Fixture {
        let temp = tempdir().expect("tempdir");
        let store = BridgeStateStore::load(temp.path()).expect("store");
        let mirror = MirrorRef {
            chat: "chat-staff".to_string(),
            topic_id: Some("topic-1".to_string()),
        };
        let ticket = Ticket {
            ticket_id: "ticket-1".to_string(),
            kind: TicketKind::Support,
            customer_id: "user-1".to_string(),
            customer_display: "Jane".to_string(),
            channel_id: "channel-1".to_string(),
            mirror: Some(mirror.clone()),
            status: TicketStatus::Open,
            opened_unix_ms: 1,
            closed_unix_ms: None,
            rating: TicketRating::Unset,
            rating_prompt: None,
        };
        store.upsert_ticket(ticket.clone()).expect("seed");
        let dm = Arc::new(InMemoryDmClient::new(true));
        let aggregator = DigestAggregator::new(
            dm.clone(),
            store.clone(),
            window_size,
            RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 0,
            },
        );
        Fixture {
            aggregator,
            dm,
            store,
            ticket,
            mirror,
            _temp: temp,
        }
    }

    fn message(message_id: &str, text: &str) -> ChannelMessage {
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
    async fn functional_digest_edits_in_place_instead_of_reposting() {
        let fixture = fixture(5);
        for (id, text) in [("m-1", "first"), ("m-2", "second"), ("m-3", "third")] {
            fixture
                .aggregator
                .record_message(&fixture.ticket, &fixture.mirror, &message(id, text))
                .await
                .expect("record");
        }
        let sent = fixture.dm.messages_in("chat-staff");
        assert_eq!(sent.len(), 1, "one digest message, edited in place");
        assert_eq!(sent[0].edit_count, 2);
        assert!(sent[0].text.contains("3 messages shown"));
        assert!(sent[0].text.contains("• Jane: third"));
    }

    #[tokio::test]
    async fn functional_window_evicts_oldest_past_the_cap() {
        let fixture = fixture(2);
        for (id, text) in [("m-1", "first"), ("m-2", "second"), ("m-3", "third")] {
            fixture
                .aggregator
                .record_message(&fixture.ticket, &fixture.mirror, &message(id, text))
                .await
                .expect("record");
        }
        let sent = fixture.dm.messages_in("chat-staff");
        assert!(!sent[0].text.contains("first"));
        assert!(sent[0].text.contains("second"));
        assert!(sent[0].text.contains("third"));

        let digest = fixture.store.digest_of("ticket-1");
        assert_eq!(digest.window.len(), 2);
    }

    #[tokio::test]
    async fn functional_externally_deleted_digest_heals_with_replacement() {
        let fixture = fixture(5);
        fixture
            .aggregator
            .record_message(&fixture.ticket, &fixture.mirror, &message("m-1", "first"))
            .await
            .expect("record");
        let original = fixture.store.digest_of("ticket-1");
        let original_ref = original.message.clone().expect("pointer");
        fixture
            .dm
            .externally_delete(&original_ref.conversation, &original_ref.message_id);

        fixture
            .aggregator
            .record_message(&fixture.ticket, &fixture.mirror, &message("m-2", "second"))
            .await
            .expect("heal");

        let healed = fixture.store.digest_of("ticket-1");
        let healed_ref = healed.message.expect("pointer");
        assert_ne!(healed_ref.message_id, original_ref.message_id);

        let visible = fixture.dm.messages_in("chat-staff");
        assert_eq!(visible.len(), 1);
        assert!(visible[0].text.contains("2 messages shown"));
        // The window survived the heal intact.
        assert!(visible[0].text.contains("first"));
        assert!(visible[0].text.contains("second"));
    }

    #[tokio::test]
    async fn functional_source_edit_rewrites_window_entry() {
        let fixture = fixture(5);
        fixture
            .aggregator
            .record_message(&fixture.ticket, &fixture.mirror, &message("m-1", "tpyo"))
            .await
            .expect("record");
        fixture
            .aggregator
            .on_source_edited(&fixture.ticket, &fixture.mirror, &message("m-1", "typo"))
            .await
            .expect("edit");
        let sent = fixture.dm.messages_in("chat-staff");
        assert!(sent[0].text.contains("typo"));
        assert!(!sent[0].text.contains("tpyo"));
    }

    #[tokio::test]
    async fn functional_source_delete_drops_window_entry() {
        let fixture = fixture(5);
        for (id, text) in [("m-1", "keep"), ("m-2", "remove")] {
            fixture
                .aggregator
                .record_message(&fixture.ticket, &fixture.mirror, &message(id, text))
                .await
                .expect("record");
        }
        fixture
            .aggregator
            .on_source_deleted(&fixture.ticket, &fixture.mirror, "channel-1", "m-2")
            .await
            .expect("delete");
        let sent = fixture.dm.messages_in("chat-staff");
        assert!(sent[0].text.contains("1 messages shown"));
        assert!(!sent[0].text.contains("remove"));
    }

    #[tokio::test]
    async fn unit_edit_of_evicted_message_is_a_no_op() {
        let fixture = fixture(1);
        for (id, text) in [("m-1", "first"), ("m-2", "second")] {
            fixture
                .aggregator
                .record_message(&fixture.ticket, &fixture.mirror, &message(id, text))
                .await
                .expect("record");
        }
        let before = fixture.dm.messages_in("chat-staff")[0].edit_count;
        fixture
            .aggregator
            .on_source_edited(&fixture.ticket, &fixture.mirror, &message("m-1", "changed"))
            .await
            .expect("noop");
        assert_eq!(fixture.dm.messages_in("chat-staff")[0].edit_count, before);
    }
}
