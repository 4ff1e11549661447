//! Ticket state machine: none → open → closed (plus a terminal rating).
//!
//! Opening allocates the ticket channel, posts the configured auto-message
//! with a close control, and notifies routed recipients. Closing is
//! idempotent, archives the transcript and attachments into an exportable
//! bundle, and posts the rating prompt. Any partial failure during creation
//! rolls the record back so an open ticket always has a live channel.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::DateTime;

use ferry_core::{now_unix_ms, BridgeConfig, FerryError, RetryPolicy};
use ferry_state::{
    BridgeStateStore, MessageRef, StaffRole, TemplateStore, Ticket, TicketKind, TicketRating,
    TicketStatus,
};

use crate::notification_routing::{NotificationRouter, TicketEvent};
use crate::platform_contract::{ChannelMessage, ChannelPlatformClient};
use crate::post_template::{
    render_post_template, substitute_user_placeholder, ControlButton, RenderedPost,
};
use ferry_state::ButtonStyle;

pub const CONTROL_ID_CLOSE: &str = "ticket_close";
pub const CONTROL_ID_RATE_SUCCESS: &str = "ticket_rate_success";
pub const CONTROL_ID_RATE_NEUTRAL: &str = "ticket_rate_neutral";
pub const CONTROL_ID_RATE_FAILED: &str = "ticket_rate_failed";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Who asked for a close.
pub enum CloseActor {
    /// Channel-platform user, typically via the close button.
    ChannelUser { user_id: String },
    /// DM staff chat, via the close command.
    StaffChat { chat: String },
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub archive_dir: PathBuf,
    pub message_count: usize,
    pub attachment_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed(ArchiveSummary),
    /// Repeated close; status and archive untouched.
    AlreadyClosed,
    Denied { reason: String },
}

pub struct TicketLifecycle {
    channel: Arc<dyn ChannelPlatformClient>,
    store: BridgeStateStore,
    templates: TemplateStore,
    locks: ferry_state::TicketLockArena,
    router: Arc<NotificationRouter>,
    config: BridgeConfig,
    retry: RetryPolicy,
}

impl TicketLifecycle {
    pub fn new(
        channel: Arc<dyn ChannelPlatformClient>,
        store: BridgeStateStore,
        templates: TemplateStore,
        locks: ferry_state::TicketLockArena,
        router: Arc<NotificationRouter>,
        config: BridgeConfig,
    ) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.delivery_retry_attempts,
            base_delay_ms: config.delivery_retry_base_ms,
        };
        Self {
            channel,
            store,
            templates,
            locks,
            router,
            config,
            retry,
        }
    }

    fn channel_prefix(&self, kind: TicketKind) -> &str {
        match kind {
            TicketKind::Order => &self.config.order_channel_prefix,
            TicketKind::Support => &self.config.support_channel_prefix,
        }
    }

    /// Opens a ticket for a button press. Fails with `DuplicateTicket` when
    /// an open ticket of this kind already exists for the customer.
    pub async fn open_ticket(
        &self,
        kind: TicketKind,
        customer_id: &str,
        customer_display: &str,
    ) -> Result<Ticket, FerryError> {
        // Serialize concurrent presses from the same customer so two open
        // order tickets can never race into existence.
        let open_key = format!("open:{}:{}", kind.as_str(), customer_id);
        let _guard = self.locks.lock(&open_key).await;

        if let Some(existing) = self.store.open_ticket_for(customer_id, kind) {
            return Err(FerryError::DuplicateTicket {
                ticket_kind: kind.as_str().to_string(),
                existing_ticket_id: existing.ticket_id,
                existing_channel: existing.channel_id,
            });
        }

        let channel_name = format!("{}-{}", self.channel_prefix(kind), customer_display)
            .to_lowercase()
            .replace(' ', "-");
        let channel_topic = format!(
            "{} ticket opened by {customer_display} ({customer_id})",
            kind.as_str()
        );
        let channel_id = self
            .channel
            .create_channel(
                &channel_name,
                self.config.ticket_category.as_deref(),
                &channel_topic,
            )
            .await?;

        let ticket_id = self
            .store
            .allocate_ticket_id()
            .map_err(|error| FerryError::persistence(error.to_string()))?;
        let ticket = Ticket {
            ticket_id: ticket_id.clone(),
            kind,
            customer_id: customer_id.to_string(),
            customer_display: customer_display.to_string(),
            channel_id: channel_id.clone(),
            mirror: None,
            status: TicketStatus::Open,
            opened_unix_ms: now_unix_ms(),
            closed_unix_ms: None,
            rating: TicketRating::Unset,
            rating_prompt: None,
        };
        self.store
            .upsert_ticket(ticket.clone())
            .map_err(|error| FerryError::persistence(error.to_string()))?;

        if let Err(error) = self.send_auto_message(&ticket).await {
            // Roll the record back to none rather than leaving an open
            // ticket whose channel never got its controls.
            if let Err(rollback_error) = self.store.remove_ticket(&ticket_id) {
                tracing::error!(%ticket_id, %rollback_error, "ticket rollback failed");
            }
            return Err(error);
        }

        self.router.dispatch(&TicketEvent::Opened, &ticket).await;
        Ok(ticket)
    }

    async fn send_auto_message(&self, ticket: &Ticket) -> Result<(), FerryError> {
        let mut rendered = match self.templates.get(&self.config.auto_message_template) {
            Some(template) => render_post_template(&template)?,
            None => default_welcome_post(ticket.kind),
        };
        let mention = format!("<@{}>", ticket.customer_id);
        rendered.body = substitute_user_placeholder(&rendered.body, &mention);
        rendered.controls.push(close_control());

        self.retry
            .run(|| {
                let rendered = rendered.clone();
                let channel_id = ticket.channel_id.clone();
                async move {
                    self.channel
                        .send_message(&channel_id, &rendered)
                        .await
                        .map(|_| ())
                }
            })
            .await
    }

    /// Closes a ticket: archives the transcript, posts the closure
    /// notification, and sends the rating prompt. Idempotent.
    pub async fn close_ticket(
        &self,
        ticket_id: &str,
        actor: CloseActor,
    ) -> Result<CloseOutcome, FerryError> {
        let _guard = self.locks.lock(ticket_id).await;
        let ticket = self
            .store
            .ticket(ticket_id)
            .ok_or_else(|| FerryError::mirror_not_found(format!("ticket {ticket_id}")))?;
        if ticket.status == TicketStatus::Closed {
            return Ok(CloseOutcome::AlreadyClosed);
        }
        if let Some(reason) = self.close_denial_reason(&ticket, &actor) {
            return Ok(CloseOutcome::Denied { reason });
        }

        let summary = self.archive_transcript(&ticket).await?;

        let mut closed = ticket.clone();
        closed.status = TicketStatus::Closed;
        closed.closed_unix_ms = Some(now_unix_ms());
        self.store
            .upsert_ticket(closed.clone())
            .map_err(|error| FerryError::persistence(error.to_string()))?;

        self.router.dispatch(&TicketEvent::Closed, &closed).await;

        match self.send_rating_prompt(&closed).await {
            Ok(prompt_ref) => {
                closed.rating_prompt = Some(prompt_ref);
                self.store
                    .upsert_ticket(closed)
                    .map_err(|error| FerryError::persistence(error.to_string()))?;
            }
            Err(error) => {
                tracing::warn!(%ticket_id, %error, "rating prompt delivery failed");
            }
        }

        Ok(CloseOutcome::Closed(summary))
    }

    fn close_denial_reason(&self, ticket: &Ticket, actor: &CloseActor) -> Option<String> {
        match actor {
            CloseActor::System => None,
            CloseActor::ChannelUser { user_id } if *user_id == ticket.customer_id => None,
            CloseActor::StaffChat { chat } => match self.store.role_of(chat) {
                Some(StaffRole::Admin) | Some(StaffRole::Manager) => None,
                _ => Some("only admin or manager chats may close tickets".to_string()),
            },
            CloseActor::ChannelUser { .. } => {
                Some("only the ticket opener or staff may close this ticket".to_string())
            }
        }
    }

    async fn archive_transcript(&self, ticket: &Ticket) -> Result<ArchiveSummary, FerryError> {
        let history = self
            .retry
            .run(|| async { self.channel.channel_history(&ticket.channel_id).await })
            .await?;

        let archive_dir = self
            .config
            .state_dir
            .join("archives")
            .join(&ticket.ticket_id);
        std::fs::create_dir_all(&archive_dir)
            .map_err(|error| FerryError::persistence(error.to_string()))?;

        let mut attachment_count = 0usize;
        let mut transcript = format!(
            "# Ticket {} ({} for {})\n\n",
            ticket.ticket_id,
            ticket.kind.as_str(),
            ticket.customer_display
        );
        for message in &history {
            transcript.push_str(&format!(
                "[{}] {}: {}\n",
                format_timestamp(message.timestamp_ms),
                message.author_display,
                message.text
            ));
            for attachment in &message.attachments {
                match self.fetch_and_store_attachment(&archive_dir, message, attachment).await {
                    Ok(stored_name) => {
                        attachment_count += 1;
                        transcript.push_str(&format!("    [attachment: {stored_name}]\n"));
                    }
                    Err(error) => {
                        tracing::warn!(
                            ticket_id = %ticket.ticket_id,
                            file = %attachment.file_name,
                            %error,
                            "attachment fetch failed; archived transcript notes it"
                        );
                        transcript.push_str(&format!(
                            "    [attachment unavailable: {}]\n",
                            attachment.file_name
                        ));
                    }
                }
            }
        }

        ferry_core::write_text_atomic(&archive_dir.join("transcript.md"), &transcript)
            .map_err(|error| FerryError::persistence(error.to_string()))?;

        Ok(ArchiveSummary {
            archive_dir,
            message_count: history.len(),
            attachment_count,
        })
    }

    async fn fetch_and_store_attachment(
        &self,
        archive_dir: &std::path::Path,
        message: &ChannelMessage,
        attachment: &crate::platform_contract::Attachment,
    ) -> Result<String, FerryError> {
        let bytes = self
            .retry
            .run(|| async { self.channel.fetch_attachment(&attachment.url).await })
            .await?;
        let stored_name = format!("{}-{}", message.message_id, attachment.file_name);
        ferry_core::write_bytes_atomic(&archive_dir.join(&stored_name), &bytes)
            .map_err(|error| FerryError::persistence(error.to_string()))?;
        Ok(stored_name)
    }

    async fn send_rating_prompt(&self, ticket: &Ticket) -> Result<MessageRef, FerryError> {
        let prompt = RenderedPost::text(
            "How did it go? Rate this ticket with one of the buttons below.",
        )
        .with_controls(rating_controls());
        let message_id = self
            .retry
            .run(|| {
                let prompt = prompt.clone();
                let channel_id = ticket.channel_id.clone();
                async move { self.channel.send_message(&channel_id, &prompt).await }
            })
            .await?;
        Ok(MessageRef::new(ticket.channel_id.clone(), message_id))
    }

    /// Records a rating button press. The first press wins; the other two
    /// buttons are removed by editing the prompt in place.
    pub async fn record_rating(
        &self,
        ticket_id: &str,
        rating: TicketRating,
    ) -> Result<(), FerryError> {
        let _guard = self.locks.lock(ticket_id).await;
        let mut ticket = self
            .store
            .ticket(ticket_id)
            .ok_or_else(|| FerryError::mirror_not_found(format!("ticket {ticket_id}")))?;
        if ticket.status != TicketStatus::Closed || ticket.rating != TicketRating::Unset {
            return Ok(());
        }
        ticket.rating = rating;
        self.store
            .upsert_ticket(ticket.clone())
            .map_err(|error| FerryError::persistence(error.to_string()))?;

        if let Some(prompt) = &ticket.rating_prompt {
            let chosen = rating_controls()
                .into_iter()
                .filter(|control| control.control_id == rating_control_id(rating))
                .collect();
            let updated = RenderedPost::text(format!("Rating recorded: {}", rating.as_str()))
                .with_controls(chosen);
            if let Err(error) = self
                .channel
                .edit_message(&prompt.conversation, &prompt.message_id, &updated)
                .await
            {
                // The prompt may have been deleted upstream; the rating is
                // already recorded, so this is log-only.
                tracing::info!(%ticket_id, %error, "rating prompt edit skipped");
            }
        }
        Ok(())
    }
}

fn close_control() -> ControlButton {
    ControlButton {
        control_id: CONTROL_ID_CLOSE.to_string(),
        label: "Close ticket".to_string(),
        action: None,
        style: ButtonStyle::Danger,
        row: 0,
        emoji: Some("🗑️".to_string()),
        url: None,
    }
}

fn rating_controls() -> Vec<ControlButton> {
    vec![
        ControlButton {
            control_id: CONTROL_ID_RATE_SUCCESS.to_string(),
            label: "Success".to_string(),
            action: None,
            style: ButtonStyle::Success,
            row: 0,
            emoji: Some("✅".to_string()),
            url: None,
        },
        ControlButton {
            control_id: CONTROL_ID_RATE_NEUTRAL.to_string(),
            label: "Neutral".to_string(),
            action: None,
            style: ButtonStyle::Secondary,
            row: 0,
            emoji: Some("➖".to_string()),
            url: None,
        },
        ControlButton {
            control_id: CONTROL_ID_RATE_FAILED.to_string(),
            label: "Failed".to_string(),
            action: None,
            style: ButtonStyle::Danger,
            row: 0,
            emoji: Some("❌".to_string()),
            url: None,
        },
    ]
}

pub fn rating_control_id(rating: TicketRating) -> &'static str {
    match rating {
        TicketRating::Success => CONTROL_ID_RATE_SUCCESS,
        TicketRating::Neutral => CONTROL_ID_RATE_NEUTRAL,
        TicketRating::Failed => CONTROL_ID_RATE_FAILED,
        TicketRating::Unset => "",
    }
}

fn default_welcome_post(kind: TicketKind) -> RenderedPost {
    RenderedPost::text(format!(
        "Hi {{user}}! Your {} ticket is open — describe the task and staff will \
         reply shortly. You can also get answers through the staff DM bridge.",
        kind.as_str()
    ))
}

fn format_timestamp(timestamp_ms: u64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms as i64)
        .map(|moment| moment.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}
