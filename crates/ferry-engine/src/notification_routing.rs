//! Recipient resolution and fan-out delivery for ticket events.
//!
//! The recipient set is the union of the chat bound to the ticket's customer
//! and all staff chats whose role subscribes to the event (admin and manager
//! always; builder additionally for order tickets; viewer never). Delivery is
//! attempted per recipient independently with bounded retry; an empty set
//! falls back to the configured broadcast chat or is logged and dropped.

use std::collections::BTreeSet;
use std::sync::Arc;

use ferry_core::{FerryError, RetryPolicy};
use ferry_state::{BridgeStateStore, StaffRole, Ticket, TicketKind};

use crate::platform_contract::DmPlatformClient;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Ticket events that trigger notifications.
pub enum TicketEvent {
    Opened,
    Closed,
    MessageRelayed { author_display: String, text: String },
}

impl TicketEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Closed => "closed",
            Self::MessageRelayed { .. } => "message_relayed",
        }
    }

    fn render(&self, ticket: &Ticket) -> String {
        match self {
            Self::Opened => format!(
                "🆕 New {} ticket {}\nCustomer: {} ({})\nChannel: {}",
                ticket.kind.as_str().to_uppercase(),
                ticket.ticket_id,
                ticket.customer_display,
                ticket.customer_id,
                ticket.channel_id
            ),
            Self::Closed => format!(
                "🔒 Ticket {} closed ({} for {})",
                ticket.ticket_id,
                ticket.kind.as_str(),
                ticket.customer_display
            ),
            Self::MessageRelayed { author_display, text } => format!(
                "💬 {} ticket {} — {}: {}",
                ticket.kind.as_str(),
                ticket.ticket_id,
                author_display,
                text
            ),
        }
    }
}

pub struct NotificationRouter {
    dm: Arc<dyn DmPlatformClient>,
    store: BridgeStateStore,
    broadcast_chat: Option<String>,
    retry: RetryPolicy,
}

impl NotificationRouter {
    pub fn new(
        dm: Arc<dyn DmPlatformClient>,
        store: BridgeStateStore,
        broadcast_chat: Option<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            dm,
            store,
            broadcast_chat,
            retry,
        }
    }

    /// Chats that should hear about `event` for `ticket`, de-duplicated and
    /// in stable order. Binding-based and role-based routing are additive.
    pub fn resolve_recipients(&self, _event: &TicketEvent, ticket: &Ticket) -> Vec<String> {
        let mut recipients = BTreeSet::new();
        if let Some(chat) = self.store.chat_bound_to(&ticket.customer_id) {
            recipients.insert(chat);
        }
        let mut roles = vec![StaffRole::Admin, StaffRole::Manager];
        if ticket.kind == TicketKind::Order {
            roles.push(StaffRole::Builder);
        }
        for chat in self.store.chats_with_roles(&roles) {
            recipients.insert(chat);
        }
        recipients.into_iter().collect()
    }

    /// Delivers `event` to every resolved recipient. Never fails the calling
    /// operation: per-recipient failures retry, then are logged; an
    /// unresolved recipient set degrades to broadcast or a dropped event.
    pub async fn dispatch(&self, event: &TicketEvent, ticket: &Ticket) {
        let recipients = self.resolve_recipients(event, ticket);
        let text = event.render(ticket);

        if recipients.is_empty() {
            match &self.broadcast_chat {
                Some(chat) => {
                    if let Err(error) = self.deliver(chat, &text).await {
                        tracing::warn!(
                            event = event.as_str(),
                            ticket_id = %ticket.ticket_id,
                            chat = %chat,
                            %error,
                            "broadcast delivery failed"
                        );
                    }
                }
                None => {
                    let undeliverable = FerryError::RecipientUnresolved {
                        event: event.as_str().to_string(),
                        ticket_id: ticket.ticket_id.clone(),
                    };
                    tracing::warn!(%undeliverable, "dropping undeliverable ticket event");
                }
            }
            return;
        }

        for chat in recipients {
            if let Err(error) = self.deliver(&chat, &text).await {
                tracing::warn!(
                    event = event.as_str(),
                    ticket_id = %ticket.ticket_id,
                    chat = %chat,
                    %error,
                    "notification delivery failed; continuing with remaining recipients"
                );
            }
        }
    }

    async fn deliver(&self, chat: &str, text: &str) -> Result<(), FerryError> {
        self.retry
            .run(|| async { self.dm.send_to_chat(chat, None, text).await.map(|_| ()) })
            .await
    }
}
