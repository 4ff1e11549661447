//! Error taxonomy shared by every engine component.
//!
//! Each variant maps to a distinct recovery strategy: duplicates point the
//! customer at the existing channel, unresolved recipients are logged and
//! dropped, vanished mirrors are recreated or ignored, syntax errors echo a
//! usage line back to the invoker, transient platform failures retry with
//! backoff, and persistence failures abort only the affected operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FerryError {
    /// The customer already has an open ticket of this kind; callers reuse
    /// the referenced channel instead of creating a second one.
    #[error("open {ticket_kind} ticket already exists in channel {existing_channel}")]
    DuplicateTicket {
        ticket_kind: String,
        existing_ticket_id: String,
        existing_channel: String,
    },

    /// No routing target resolved for a ticket event and no broadcast
    /// destination is configured. Logged, then dropped.
    #[error("no recipient resolved for {event} on ticket {ticket_id}")]
    RecipientUnresolved { event: String, ticket_id: String },

    /// The mirrored counterpart of a message could not be located.
    #[error("mirror message not found: {detail}")]
    MirrorNotFound { detail: String },

    /// Malformed command arguments; the usage line is reported back to the
    /// invoking chat.
    #[error("invalid command arguments; usage: {usage}")]
    CommandSyntax { usage: String },

    /// Timeout or rate limit from a platform call. Retryable.
    #[error("transient platform failure: {detail}")]
    PlatformTransient { detail: String },

    /// The state store rejected a read or write. Fatal for the affected
    /// operation only.
    #[error("persistence failure: {detail}")]
    Persistence { detail: String },
}

impl FerryError {
    pub fn command_syntax(usage: impl Into<String>) -> Self {
        Self::CommandSyntax {
            usage: usage.into(),
        }
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::PlatformTransient {
            detail: detail.into(),
        }
    }

    pub fn mirror_not_found(detail: impl Into<String>) -> Self {
        Self::MirrorNotFound {
            detail: detail.into(),
        }
    }

    pub fn persistence(detail: impl Into<String>) -> Self {
        Self::Persistence {
            detail: detail.into(),
        }
    }

    /// True when a bounded retry is worth attempting before giving up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PlatformTransient { .. })
    }
}
