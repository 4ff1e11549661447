//! Runtime assembly for the ticket bridge.
//!
//! Owns the event dispatch queues, the DM command surface, and the template
//! editor contract; the engine crates stay free of wiring concerns.

pub mod admin_editor;
pub mod bridge_runtime;
pub mod command_surface;
pub mod event_dispatch;

pub use admin_editor::AdminEditor;
pub use bridge_runtime::{BridgeDispatcher, BridgeRuntime};
pub use event_dispatch::{OrderedQueues, QueueHandler};
