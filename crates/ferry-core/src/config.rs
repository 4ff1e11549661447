//! Immutable runtime configuration.
//!
//! Built once at startup from an optional TOML file plus environment
//! overrides, then passed by reference to every component. Nothing in the
//! engine reads configuration ambiently.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

const DEFAULT_ORDER_PREFIX: &str = "order";
const DEFAULT_SUPPORT_PREFIX: &str = "support";
const DEFAULT_AUTO_MESSAGE_TEMPLATE: &str = "ticket-welcome";
const DEFAULT_DIGEST_WINDOW: usize = 5;
const DEFAULT_RETRY_ATTEMPTS: usize = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 200;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Directory holding the two JSON state stores.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Channel name prefix for order tickets.
    #[serde(default = "default_order_prefix")]
    pub order_channel_prefix: String,
    /// Channel name prefix for support tickets.
    #[serde(default = "default_support_prefix")]
    pub support_channel_prefix: String,
    /// Optional channel-platform category new ticket channels are filed under.
    #[serde(default)]
    pub ticket_category: Option<String>,
    /// Template rendered as the first message of every new ticket channel.
    #[serde(default = "default_auto_message_template")]
    pub auto_message_template: String,
    /// DM chat that hosts mirrored ticket conversations (topics when the
    /// chat supports them, the general stream otherwise).
    pub staff_chat: String,
    /// Fallback DM destination when no recipient resolves for an event.
    #[serde(default)]
    pub broadcast_chat: Option<String>,
    /// DM chats allowed to grant the admin role.
    #[serde(default)]
    pub bootstrap_admin_chats: Vec<String>,
    /// Rolling digest window size.
    #[serde(default = "default_digest_window")]
    pub digest_window: usize,
    /// Delivery attempts per recipient before an event is logged undeliverable.
    #[serde(default = "default_retry_attempts")]
    pub delivery_retry_attempts: usize,
    /// Base backoff delay in milliseconds, doubled per attempt.
    #[serde(default = "default_retry_base_ms")]
    pub delivery_retry_base_ms: u64,
    /// Timeout applied to each outbound platform call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_order_prefix() -> String {
    DEFAULT_ORDER_PREFIX.to_string()
}

fn default_support_prefix() -> String {
    DEFAULT_SUPPORT_PREFIX.to_string()
}

fn default_auto_message_template() -> String {
    DEFAULT_AUTO_MESSAGE_TEMPLATE.to_string()
}

fn default_digest_window() -> usize {
    DEFAULT_DIGEST_WINDOW
}

fn default_retry_attempts() -> usize {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_base_ms() -> u64 {
    DEFAULT_RETRY_BASE_MS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl BridgeConfig {
    /// Parses a TOML config file and applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: BridgeConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Builds a config without a file, from defaults plus environment.
    pub fn from_env(staff_chat: String) -> Result<Self> {
        let mut config = Self {
            state_dir: default_state_dir(),
            order_channel_prefix: default_order_prefix(),
            support_channel_prefix: default_support_prefix(),
            ticket_category: None,
            auto_message_template: default_auto_message_template(),
            staff_chat,
            broadcast_chat: None,
            bootstrap_admin_chats: Vec::new(),
            digest_window: DEFAULT_DIGEST_WINDOW,
            delivery_retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            delivery_retry_base_ms: DEFAULT_RETRY_BASE_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("FERRY_STATE_DIR") {
            if !value.trim().is_empty() {
                self.state_dir = PathBuf::from(value);
            }
        }
        if let Ok(value) = std::env::var("FERRY_ORDER_PREFIX") {
            if !value.trim().is_empty() {
                self.order_channel_prefix = value;
            }
        }
        if let Ok(value) = std::env::var("FERRY_SUPPORT_PREFIX") {
            if !value.trim().is_empty() {
                self.support_channel_prefix = value;
            }
        }
        if let Ok(value) = std::env::var("FERRY_STAFF_CHAT") {
            if !value.trim().is_empty() {
                self.staff_chat = value;
            }
        }
        if let Ok(value) = std::env::var("FERRY_BROADCAST_CHAT") {
            if !value.trim().is_empty() {
                self.broadcast_chat = Some(value);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.staff_chat.trim().is_empty() {
            bail!("staff_chat must not be empty");
        }
        if self.order_channel_prefix.trim().is_empty()
            || self.support_channel_prefix.trim().is_empty()
        {
            bail!("channel prefixes must not be empty");
        }
        if self.digest_window == 0 {
            bail!("digest_window must be at least 1");
        }
        if self.delivery_retry_attempts == 0 {
            bail!("delivery_retry_attempts must be at least 1");
        }
        Ok(())
    }
}
