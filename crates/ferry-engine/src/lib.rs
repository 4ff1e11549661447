//! Ticket bridge engine components.
//!
//! Provides the platform collaborator contracts, ticket lifecycle,
//! notification routing, bidirectional message relay, digest aggregation,
//! post template rendering, and the typed DM command grammar.

pub mod command_grammar;
pub mod digest_aggregator;
pub mod message_relay;
pub mod notification_routing;
pub mod platform_contract;
pub mod platform_testkit;
pub mod post_template;
pub mod ticket_lifecycle;

pub use command_grammar::{
    command_catalog, parse_bridge_command, parse_image_placement, BridgeCommand, TemplateField,
};
pub use digest_aggregator::DigestAggregator;
pub use message_relay::MessageRelay;
pub use notification_routing::{NotificationRouter, TicketEvent};
pub use platform_contract::{
    Attachment, ChannelEvent, ChannelMessage, ChannelPlatformClient, DmEvent, DmMessage,
    DmPlatformClient,
};
pub use post_template::{
    control_id_for, render_post_template, substitute_user_placeholder, ControlButton,
    RenderedPost, CONTROL_ID_OPEN_ORDER, CONTROL_ID_OPEN_SUPPORT,
};
pub use ticket_lifecycle::{
    rating_control_id, ArchiveSummary, CloseActor, CloseOutcome, TicketLifecycle,
    CONTROL_ID_CLOSE, CONTROL_ID_RATE_FAILED, CONTROL_ID_RATE_NEUTRAL, CONTROL_ID_RATE_SUCCESS,
};
