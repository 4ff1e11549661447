//! Durable state for the ticket bridge.
//!
//! Two write-through JSON stores (ticket/binding/role/digest state and post
//! templates) plus the per-ticket lock arena that serializes mutations for a
//! single ticket while letting other tickets proceed.

pub mod bridge_state_store;
pub mod template_records;
pub mod template_store;
pub mod ticket_locks;
pub mod ticket_records;

pub use bridge_state_store::{BridgeStateStore, BRIDGE_STATE_FILE_NAME};
pub use template_records::{ButtonAction, ButtonStyle, ImagePlacement, PanelButton, PostTemplate};
pub use template_store::{TemplateStore, TEMPLATE_STORE_FILE_NAME};
pub use ticket_locks::TicketLockArena;
pub use ticket_records::{
    DigestEntry, DigestState, MessageRef, MirrorRef, StaffRole, Ticket, TicketKind, TicketRating,
    TicketStatus,
};
