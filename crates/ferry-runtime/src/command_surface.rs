//! Executes parsed DM commands against the runtime.
//!
//! Every command produces a reply string for the invoking chat. Syntax
//! problems come back as the usage line, permission problems as a plain
//! refusal. Template mutations funnel through the editor so they are
//! validated by rendering before they persist.

use ferry_core::FerryError;
use ferry_state::{PostTemplate, StaffRole, Ticket, TicketStatus};

use ferry_engine::command_grammar::{
    command_catalog, parse_bridge_command, parse_image_placement, BridgeCommand, TemplateField,
};
use ferry_engine::post_template::RenderedPost;
use ferry_engine::ticket_lifecycle::{CloseActor, CloseOutcome};

use crate::bridge_runtime::BridgeRuntime;

impl BridgeRuntime {
    /// Parses and runs one command line from `chat`, returning the reply.
    pub async fn execute_command(&self, chat: &str, command_line: &str) -> String {
        let command = match parse_bridge_command(command_line) {
            Ok(command) => command,
            Err(FerryError::CommandSyntax { usage }) => return format!("Usage: {usage}"),
            Err(error) => return error.to_string(),
        };
        match command {
            BridgeCommand::Bind { customer_id } => self.run_bind(chat, &customer_id),
            BridgeCommand::RegisterRole { role } => self.run_register_role(chat, role),
            BridgeCommand::SetRole { chat: target, role } => self.run_set_role(chat, &target, role),
            BridgeCommand::ShowRole => self.run_show_role(chat),
            BridgeCommand::SaveTemplate {
                name,
                channel_id,
                title,
                description,
            } => self.run_save_template(chat, &name, &channel_id, &title, &description),
            BridgeCommand::SendTemplate { name } => self.run_send_template(chat, &name).await,
            BridgeCommand::EditTemplateField { name, field, value } => {
                self.run_edit_template_field(chat, &name, field, &value)
            }
            BridgeCommand::ShowTemplate { name } => self.run_show_template(chat, &name),
            BridgeCommand::ListTemplates => self.run_list_templates(chat),
            BridgeCommand::ReplyToTicket { ticket_id, text } => {
                self.run_reply_to_ticket(chat, &ticket_id, &text).await
            }
            BridgeCommand::ListTickets => self.run_list_tickets(chat),
            BridgeCommand::CloseTicket { ticket_id } => {
                self.run_close_ticket(chat, &ticket_id).await
            }
            BridgeCommand::Help => run_help(),
        }
    }

    fn has_role(&self, chat: &str, allowed: &[StaffRole]) -> bool {
        self.store
            .role_of(chat)
            .is_some_and(|role| allowed.contains(&role))
    }

    fn run_bind(&self, chat: &str, customer_id: &str) -> String {
        match self.store.set_binding(chat, customer_id) {
            Ok(()) => format!("This chat now receives notifications for customer {customer_id}."),
            Err(error) => {
                tracing::error!(%chat, %error, "binding write failed");
                "Saving the binding failed; try again.".to_string()
            }
        }
    }

    fn run_register_role(&self, chat: &str, role: StaffRole) -> String {
        let authorized = self.config.bootstrap_admin_chats.iter().any(|c| c == chat)
            || self.has_role(chat, &[StaffRole::Admin]);
        if !authorized {
            return "This chat is not authorized to register roles.".to_string();
        }
        match self.store.set_role(chat, role) {
            Ok(()) => format!("This chat is registered as {}.", role.as_str()),
            Err(error) => {
                tracing::error!(%chat, %error, "role write failed");
                "Saving the role failed; try again.".to_string()
            }
        }
    }

    fn run_set_role(&self, chat: &str, target: &str, role: StaffRole) -> String {
        if !self.has_role(chat, &[StaffRole::Admin]) {
            return "Only admin chats may assign roles.".to_string();
        }
        match self.store.set_role(target, role) {
            Ok(()) => format!("Chat {target} is now {}.", role.as_str()),
            Err(error) => {
                tracing::error!(%target, %error, "role write failed");
                "Saving the role failed; try again.".to_string()
            }
        }
    }

    fn run_show_role(&self, chat: &str) -> String {
        let role = self
            .store
            .role_of(chat)
            .map(|role| role.as_str().to_string())
            .unwrap_or_else(|| "none".to_string());
        match self.store.binding_of(chat) {
            Some(customer) => format!("Role: {role}. Bound to customer {customer}."),
            None => format!("Role: {role}. No customer binding."),
        }
    }

    fn run_save_template(
        &self,
        chat: &str,
        name: &str,
        channel_id: &str,
        title: &str,
        description: &str,
    ) -> String {
        if !self.has_role(chat, &[StaffRole::Admin, StaffRole::Manager]) {
            return "Only admin or manager chats may edit templates.".to_string();
        }
        // Resaving keeps the panel buttons and publish pointer so a later
        // send overwrites instead of duplicating.
        let mut template = self
            .editor
            .load_template(name)
            .unwrap_or_else(|| PostTemplate::new(name, channel_id));
        template.channel_id = channel_id.to_string();
        template.title = title.to_string();
        template.description = description.to_string();
        match self.editor.save_template(template) {
            Ok(()) => format!("Template {name} saved."),
            Err(error) => format!("Template not saved: {error}"),
        }
    }

    async fn run_send_template(&self, chat: &str, name: &str) -> String {
        if !self.has_role(chat, &[StaffRole::Admin, StaffRole::Manager]) {
            return "Only admin or manager chats may publish templates.".to_string();
        }
        match self.editor.publish_template(name).await {
            Ok(published) => format!(
                "Template {name} published to <#{}>.",
                published.conversation
            ),
            Err(FerryError::MirrorNotFound { .. }) => format!("No template named {name}."),
            Err(error) => format!("Publish failed: {error}"),
        }
    }

    fn run_edit_template_field(
        &self,
        chat: &str,
        name: &str,
        field: TemplateField,
        value: &str,
    ) -> String {
        if !self.has_role(chat, &[StaffRole::Admin, StaffRole::Manager]) {
            return "Only admin or manager chats may edit templates.".to_string();
        }
        let Some(mut template) = self.editor.load_template(name) else {
            return format!("No template named {name}.");
        };
        match field {
            TemplateField::Title => template.title = value.to_string(),
            TemplateField::Description => template.description = value.to_string(),
            TemplateField::ColorHex => template.color_hex = value.to_string(),
            TemplateField::ImageUrl => {
                template.image_url = (!value.eq_ignore_ascii_case("none"))
                    .then(|| value.to_string());
            }
            TemplateField::ImagePlacement => match parse_image_placement(value) {
                Some(placement) => template.image_placement = placement,
                None => return "Image placement must be top or bottom.".to_string(),
            },
            TemplateField::SplitDescription => {
                template.split_description =
                    (!value.eq_ignore_ascii_case("none")).then(|| value.to_string());
            }
            TemplateField::ChannelId => template.channel_id = value.to_string(),
        }
        match self.editor.save_template(template) {
            Ok(()) => format!("Template {name} updated ({}).", field.as_str()),
            Err(error) => format!("Template not saved: {error}"),
        }
    }

    fn run_show_template(&self, chat: &str, name: &str) -> String {
        if !self.has_role(
            chat,
            &[StaffRole::Admin, StaffRole::Manager, StaffRole::Builder],
        ) {
            return "Only staff chats may inspect templates.".to_string();
        }
        let Some(template) = self.editor.load_template(name) else {
            return format!("No template named {name}.");
        };
        let published = match &template.last_published {
            Some(reference) => format!("published in <#{}>", reference.conversation),
            None => "not published".to_string(),
        };
        format!(
            "Template {name}: channel <#{}>, title {:?}, color #{}, {} panel buttons, {published}.",
            template.channel_id,
            template.title,
            template.color_hex,
            template.panel_buttons.len()
        )
    }

    fn run_list_templates(&self, chat: &str) -> String {
        if !self.has_role(
            chat,
            &[StaffRole::Admin, StaffRole::Manager, StaffRole::Builder],
        ) {
            return "Only staff chats may inspect templates.".to_string();
        }
        let names = self.editor.list_template_names();
        if names.is_empty() {
            "No templates saved.".to_string()
        } else {
            format!("Templates: {}", names.join(", "))
        }
    }

    async fn run_reply_to_ticket(&self, chat: &str, ticket_id: &str, text: &str) -> String {
        if !self.has_role(
            chat,
            &[StaffRole::Admin, StaffRole::Manager, StaffRole::Builder],
        ) {
            return "Only staff chats may reply to tickets.".to_string();
        }
        let Some(ticket) = self.store.ticket(ticket_id) else {
            return format!("No ticket {ticket_id}.");
        };
        if ticket.status != TicketStatus::Open {
            return format!("Ticket {ticket_id} is closed.");
        }
        let _guard = self.locks.lock(&ticket.ticket_id).await;
        let post = RenderedPost::text(format!("📨 Staff: {text}"));
        match self.channel.send_message(&ticket.channel_id, &post).await {
            Ok(_) => format!("Reply posted to ticket {ticket_id}."),
            Err(error) => format!("Reply failed: {error}"),
        }
    }

    fn run_list_tickets(&self, chat: &str) -> String {
        if !self.has_role(
            chat,
            &[StaffRole::Admin, StaffRole::Manager, StaffRole::Builder],
        ) {
            return "Only staff chats may list tickets.".to_string();
        }
        let tickets = self.store.open_tickets();
        if tickets.is_empty() {
            return "No open tickets.".to_string();
        }
        let mut lines = vec![format!("{} open ticket(s):", tickets.len())];
        for ticket in tickets {
            lines.push(summarize_ticket(&ticket));
        }
        lines.join("\n")
    }

    async fn run_close_ticket(&self, chat: &str, ticket_id: &str) -> String {
        let actor = CloseActor::StaffChat {
            chat: chat.to_string(),
        };
        match self.lifecycle.close_ticket(ticket_id, actor).await {
            Ok(CloseOutcome::Closed(summary)) => format!(
                "Ticket {ticket_id} closed. Archived {} message(s) and {} attachment(s).",
                summary.message_count, summary.attachment_count
            ),
            Ok(CloseOutcome::AlreadyClosed) => format!("Ticket {ticket_id} was already closed."),
            Ok(CloseOutcome::Denied { reason }) => reason,
            Err(FerryError::MirrorNotFound { .. }) => format!("No ticket {ticket_id}."),
            Err(error) => format!("Close failed: {error}"),
        }
    }
}

fn summarize_ticket(ticket: &Ticket) -> String {
    format!(
        "• {} — {} for {} in <#{}>",
        ticket.ticket_id,
        ticket.kind.as_str(),
        ticket.customer_display,
        ticket.channel_id
    )
}

fn run_help() -> String {
    let mut lines = vec!["Commands:".to_string()];
    lines.extend(command_catalog().map(|usage| format!("  {usage}")));
    lines.join("\n")
}
