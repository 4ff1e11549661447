//! Wires the engine components together and reacts to normalized platform
//! events.
//!
//! Button presses drive the ticket lifecycle; channel messages feed the
//! relay, the digest, and the notification router under the ticket's lock;
//! DM traffic is either a command or a staff reply into a mirrored ticket.
//! Platform adapters are expected to filter out the bridge's own outbound
//! messages before publishing events, so no self-echo handling happens here.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use ferry_core::{BridgeConfig, FerryError, RetryPolicy};
use ferry_state::{
    BridgeStateStore, StaffRole, TemplateStore, Ticket, TicketKind, TicketLockArena,
    TicketRating, TicketStatus,
};

use ferry_engine::platform_contract::{
    ChannelEvent, ChannelMessage, ChannelPlatformClient, DmEvent, DmMessage, DmPlatformClient,
};
use ferry_engine::post_template::{
    RenderedPost, CONTROL_ID_OPEN_ORDER, CONTROL_ID_OPEN_SUPPORT,
};
use ferry_engine::ticket_lifecycle::{
    CloseActor, CloseOutcome, TicketLifecycle, CONTROL_ID_CLOSE, CONTROL_ID_RATE_FAILED,
    CONTROL_ID_RATE_NEUTRAL, CONTROL_ID_RATE_SUCCESS,
};
use ferry_engine::{DigestAggregator, MessageRelay, NotificationRouter, TicketEvent};

use crate::admin_editor::AdminEditor;
use crate::event_dispatch::{OrderedQueues, QueueHandler};

pub struct BridgeRuntime {
    pub(crate) config: BridgeConfig,
    pub(crate) store: BridgeStateStore,
    pub(crate) channel: Arc<dyn ChannelPlatformClient>,
    pub(crate) dm: Arc<dyn DmPlatformClient>,
    pub(crate) lifecycle: TicketLifecycle,
    pub(crate) relay: MessageRelay,
    pub(crate) digest: DigestAggregator,
    pub(crate) router: Arc<NotificationRouter>,
    pub(crate) locks: TicketLockArena,
    pub(crate) editor: AdminEditor,
}

impl BridgeRuntime {
    /// Loads both stores from `config.state_dir`, grants the admin role to
    /// the bootstrap chats, and assembles the engine components.
    pub fn new(
        config: BridgeConfig,
        channel: Arc<dyn ChannelPlatformClient>,
        dm: Arc<dyn DmPlatformClient>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.state_dir).with_context(|| {
            format!("failed to create state dir {}", config.state_dir.display())
        })?;
        let store = BridgeStateStore::load(&config.state_dir)?;
        let templates = TemplateStore::load(&config.state_dir)?;

        for chat in &config.bootstrap_admin_chats {
            if store.role_of(chat).is_none() {
                store
                    .set_role(chat, StaffRole::Admin)
                    .with_context(|| format!("failed to bootstrap admin chat {chat}"))?;
            }
        }

        let retry = RetryPolicy {
            max_attempts: config.delivery_retry_attempts,
            base_delay_ms: config.delivery_retry_base_ms,
        };
        let locks = TicketLockArena::new();
        let router = Arc::new(NotificationRouter::new(
            dm.clone(),
            store.clone(),
            config.broadcast_chat.clone(),
            retry,
        ));
        let lifecycle = TicketLifecycle::new(
            channel.clone(),
            store.clone(),
            templates.clone(),
            locks.clone(),
            router.clone(),
            config.clone(),
        );
        let relay = MessageRelay::new(
            channel.clone(),
            dm.clone(),
            store.clone(),
            config.staff_chat.clone(),
            retry,
        );
        let digest = DigestAggregator::new(dm.clone(), store.clone(), config.digest_window, retry);
        let editor = AdminEditor::new(templates, channel.clone(), retry);

        Ok(Self {
            config,
            store,
            channel,
            dm,
            lifecycle,
            relay,
            digest,
            router,
            locks,
            editor,
        })
    }

    pub fn store(&self) -> &BridgeStateStore {
        &self.store
    }

    pub fn editor(&self) -> &AdminEditor {
        &self.editor
    }

    pub fn lifecycle(&self) -> &TicketLifecycle {
        &self.lifecycle
    }

    /// Reacts to one normalized channel-platform event.
    pub async fn handle_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::ButtonPressed {
                channel_id,
                control_id,
                user_id,
                user_display,
                ..
            } => {
                self.handle_button(&channel_id, &control_id, &user_id, &user_display)
                    .await
            }
            ChannelEvent::MessageCreated { message } => self.handle_channel_message(message).await,
            ChannelEvent::MessageEdited { message } => self.handle_channel_edit(message).await,
            ChannelEvent::MessageDeleted {
                channel_id,
                message_id,
            } => self.handle_channel_delete(&channel_id, &message_id).await,
            ChannelEvent::CommandInvoked {
                channel_id,
                command_line,
                ..
            } => {
                // The command surface is DM-side; channel commands are noise.
                tracing::debug!(%channel_id, %command_line, "ignoring channel-side command");
            }
        }
    }

    async fn handle_button(
        &self,
        channel_id: &str,
        control_id: &str,
        user_id: &str,
        user_display: &str,
    ) {
        match control_id {
            CONTROL_ID_OPEN_ORDER | CONTROL_ID_OPEN_SUPPORT => {
                let kind = if control_id == CONTROL_ID_OPEN_ORDER {
                    TicketKind::Order
                } else {
                    TicketKind::Support
                };
                match self.lifecycle.open_ticket(kind, user_id, user_display).await {
                    Ok(ticket) => {
                        tracing::info!(
                            ticket_id = %ticket.ticket_id,
                            kind = kind.as_str(),
                            "ticket opened from panel button"
                        );
                    }
                    Err(FerryError::DuplicateTicket {
                        existing_channel, ..
                    }) => {
                        self.post_notice(
                            channel_id,
                            &format!(
                                "<@{user_id}> you already have an open {} ticket: see <#{existing_channel}>",
                                kind.as_str()
                            ),
                        )
                        .await;
                    }
                    Err(error) => {
                        tracing::warn!(%user_id, kind = kind.as_str(), %error, "ticket open failed");
                        self.post_notice(
                            channel_id,
                            &format!("<@{user_id}> opening the ticket failed, please try again"),
                        )
                        .await;
                    }
                }
            }
            CONTROL_ID_CLOSE => {
                let Some(ticket) = self.store.ticket_for_channel(channel_id) else {
                    tracing::debug!(%channel_id, "close button outside a ticket channel");
                    return;
                };
                let actor = CloseActor::ChannelUser {
                    user_id: user_id.to_string(),
                };
                match self.lifecycle.close_ticket(&ticket.ticket_id, actor).await {
                    Ok(CloseOutcome::Closed(summary)) => {
                        tracing::info!(
                            ticket_id = %ticket.ticket_id,
                            messages = summary.message_count,
                            attachments = summary.attachment_count,
                            "ticket closed from button"
                        );
                    }
                    Ok(CloseOutcome::AlreadyClosed) => {}
                    Ok(CloseOutcome::Denied { reason }) => {
                        self.post_notice(channel_id, &format!("<@{user_id}> {reason}")).await;
                    }
                    Err(error) => {
                        tracing::warn!(ticket_id = %ticket.ticket_id, %error, "close failed");
                    }
                }
            }
            CONTROL_ID_RATE_SUCCESS | CONTROL_ID_RATE_NEUTRAL | CONTROL_ID_RATE_FAILED => {
                let Some(ticket) = self.store.ticket_for_channel(channel_id) else {
                    return;
                };
                let rating = match control_id {
                    CONTROL_ID_RATE_SUCCESS => TicketRating::Success,
                    CONTROL_ID_RATE_NEUTRAL => TicketRating::Neutral,
                    _ => TicketRating::Failed,
                };
                if let Err(error) = self.lifecycle.record_rating(&ticket.ticket_id, rating).await {
                    tracing::warn!(ticket_id = %ticket.ticket_id, %error, "rating not recorded");
                }
            }
            other => {
                tracing::debug!(control_id = other, "unhandled control press");
            }
        }
    }

    async fn handle_channel_message(&self, message: ChannelMessage) {
        if message.author_is_bot {
            return;
        }
        let Some(ticket) = self.open_ticket_for_channel(&message.channel_id) else {
            return;
        };
        let _guard = self.locks.lock(&ticket.ticket_id).await;
        // A close may land between the lookup and the lock; re-check under
        // the lock so a just-closed ticket never gains new mirror traffic.
        let Some(ticket) = self
            .store
            .ticket(&ticket.ticket_id)
            .filter(|current| current.status == TicketStatus::Open)
        else {
            return;
        };

        if let Err(error) = self.relay.mirror_channel_message(&ticket, &message).await {
            tracing::warn!(ticket_id = %ticket.ticket_id, %error, "mirror delivery failed");
        }
        // Re-read: the relay may have just attached the mirror reference.
        let Some(ticket) = self.store.ticket(&ticket.ticket_id) else {
            return;
        };
        if let Some(mirror) = ticket.mirror.clone() {
            if let Err(error) = self.digest.record_message(&ticket, &mirror, &message).await {
                tracing::warn!(ticket_id = %ticket.ticket_id, %error, "digest update failed");
            }
        }
        self.router
            .dispatch(
                &TicketEvent::MessageRelayed {
                    author_display: message.author_display.clone(),
                    text: message.text.clone(),
                },
                &ticket,
            )
            .await;
    }

    async fn handle_channel_edit(&self, message: ChannelMessage) {
        let Some(ticket) = self.open_ticket_for_channel(&message.channel_id) else {
            return;
        };
        let _guard = self.locks.lock(&ticket.ticket_id).await;
        self.relay.propagate_channel_edit(&message).await;
        if let Some(mirror) = ticket.mirror.clone() {
            if let Err(error) = self.digest.on_source_edited(&ticket, &mirror, &message).await {
                tracing::warn!(ticket_id = %ticket.ticket_id, %error, "digest edit failed");
            }
        }
    }

    async fn handle_channel_delete(&self, channel_id: &str, message_id: &str) {
        let Some(ticket) = self.open_ticket_for_channel(channel_id) else {
            return;
        };
        let _guard = self.locks.lock(&ticket.ticket_id).await;
        self.relay.propagate_channel_delete(channel_id, message_id).await;
        if let Some(mirror) = ticket.mirror.clone() {
            if let Err(error) = self
                .digest
                .on_source_deleted(&ticket, &mirror, channel_id, message_id)
                .await
            {
                tracing::warn!(ticket_id = %ticket.ticket_id, %error, "digest delete failed");
            }
        }
    }

    /// Reacts to one normalized DM-platform event.
    pub async fn handle_dm_event(&self, event: DmEvent) {
        match event {
            DmEvent::CommandInvoked { chat, command_line } => {
                let reply = self.execute_command(&chat, &command_line).await;
                self.reply_to_chat(&chat, &reply).await;
            }
            DmEvent::MessageSent { message } => self.handle_dm_message(message).await,
            DmEvent::MessageEdited { message } => {
                let _guard = match self.relay.ticket_for_dm_message(&message) {
                    Some(ticket) => Some(self.locks.lock(&ticket.ticket_id).await),
                    None => None,
                };
                self.relay.propagate_dm_edit(&message).await;
            }
            DmEvent::MessageDeleted {
                chat, message_id, ..
            } => {
                self.relay.propagate_dm_delete(&chat, &message_id).await;
            }
        }
    }

    async fn handle_dm_message(&self, message: DmMessage) {
        if message.text.trim_start().starts_with('/') {
            let reply = self.execute_command(&message.chat, &message.text).await;
            self.reply_to_chat(&message.chat, &reply).await;
            return;
        }
        let Some(ticket) = self.relay.ticket_for_dm_message(&message) else {
            tracing::debug!(chat = %message.chat, "dm message outside any mirrored ticket");
            return;
        };
        if ticket.status != TicketStatus::Open {
            self.reply_to_chat(&message.chat, "This ticket is closed; the reply was not relayed.")
                .await;
            return;
        }
        let _guard = self.locks.lock(&ticket.ticket_id).await;
        if let Err(error) = self.relay.relay_dm_reply(&ticket, &message).await {
            tracing::warn!(ticket_id = %ticket.ticket_id, %error, "dm reply relay failed");
        }
    }

    fn open_ticket_for_channel(&self, channel_id: &str) -> Option<Ticket> {
        self.store
            .ticket_for_channel(channel_id)
            .filter(|ticket| ticket.status == TicketStatus::Open)
    }

    pub(crate) async fn post_notice(&self, channel_id: &str, text: &str) {
        if let Err(error) = self
            .channel
            .send_message(channel_id, &RenderedPost::text(text))
            .await
        {
            tracing::warn!(%channel_id, %error, "notice delivery failed");
        }
    }

    pub(crate) async fn reply_to_chat(&self, chat: &str, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Err(error) = self.dm.send_to_chat(chat, None, text).await {
            tracing::warn!(%chat, %error, "command reply delivery failed");
        }
    }
}

#[async_trait]
impl QueueHandler<ChannelEvent> for BridgeRuntime {
    async fn handle(&self, event: ChannelEvent) {
        self.handle_channel_event(event).await;
    }
}

#[async_trait]
impl QueueHandler<DmEvent> for BridgeRuntime {
    async fn handle(&self, event: DmEvent) {
        self.handle_dm_event(event).await;
    }
}

/// Keyed FIFO front door for the runtime: one queue per channel, one per
/// chat, so per-ticket ordering holds while tickets progress independently.
pub struct BridgeDispatcher {
    channel_queues: OrderedQueues<ChannelEvent>,
    dm_queues: OrderedQueues<DmEvent>,
}

impl BridgeDispatcher {
    pub fn new(runtime: Arc<BridgeRuntime>) -> Self {
        Self {
            channel_queues: OrderedQueues::new(runtime.clone()),
            dm_queues: OrderedQueues::new(runtime),
        }
    }

    pub fn submit_channel_event(&self, event: ChannelEvent) {
        let key = match &event {
            ChannelEvent::ButtonPressed { channel_id, .. }
            | ChannelEvent::MessageDeleted { channel_id, .. }
            | ChannelEvent::CommandInvoked { channel_id, .. } => channel_id.clone(),
            ChannelEvent::MessageCreated { message }
            | ChannelEvent::MessageEdited { message } => message.channel_id.clone(),
        };
        self.channel_queues.enqueue(&key, event);
    }

    pub fn submit_dm_event(&self, event: DmEvent) {
        let key = match &event {
            DmEvent::CommandInvoked { chat, .. } | DmEvent::MessageDeleted { chat, .. } => {
                chat.clone()
            }
            DmEvent::MessageSent { message } | DmEvent::MessageEdited { message } => {
                message.chat.clone()
            }
        };
        self.dm_queues.enqueue(&key, event);
    }

    /// Waits for all submitted events to finish. Test hook.
    pub async fn drain(&self) {
        self.channel_queues.drain().await;
        self.dm_queues.drain().await;
    }
}
