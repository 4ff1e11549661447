//! Write-through JSON store for tickets, bindings, roles, and digests.
//!
//! The file is loaded once at startup and atomically rewritten on every
//! mutation, so a process restart never loses acknowledged state. The store
//! is the sole writer of these records; callers treat reads as snapshots and
//! re-fetch under the per-ticket lock before writing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use ferry_core::write_text_atomic;

use crate::ticket_records::{DigestState, StaffRole, Ticket, TicketKind};

pub const BRIDGE_STATE_FILE_NAME: &str = "tickets.json";
const BRIDGE_STATE_SCHEMA_VERSION: u32 = 1;

fn bridge_state_schema_version() -> u32 {
    BRIDGE_STATE_SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BridgeStateFile {
    #[serde(default = "bridge_state_schema_version")]
    schema_version: u32,
    #[serde(default)]
    tickets: BTreeMap<String, Ticket>,
    /// DM chat id -> channel-platform user id. Last bind wins.
    #[serde(default)]
    bindings: BTreeMap<String, String>,
    /// DM chat id -> staff role. One role per chat.
    #[serde(default)]
    roles: BTreeMap<String, StaffRole>,
    /// Ticket id -> digest pointer + window.
    #[serde(default)]
    digests: BTreeMap<String, DigestState>,
    #[serde(default)]
    next_ticket_sequence: u64,
}

impl Default for BridgeStateFile {
    fn default() -> Self {
        Self {
            schema_version: BRIDGE_STATE_SCHEMA_VERSION,
            tickets: BTreeMap::new(),
            bindings: BTreeMap::new(),
            roles: BTreeMap::new(),
            digests: BTreeMap::new(),
            next_ticket_sequence: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeStateStore {
    path: PathBuf,
    state: Arc<Mutex<BridgeStateFile>>,
}

impl BridgeStateStore {
    /// Loads the store from `state_dir`, starting empty when the file does
    /// not exist yet. Unknown schema versions are rejected.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(BRIDGE_STATE_FILE_NAME);
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read state file {}", path.display()))?;
            let parsed: BridgeStateFile = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse state file {}", path.display()))?;
            if parsed.schema_version != BRIDGE_STATE_SCHEMA_VERSION {
                bail!(
                    "unsupported bridge state schema: expected {}, found {}",
                    BRIDGE_STATE_SCHEMA_VERSION,
                    parsed.schema_version
                );
            }
            parsed
        } else {
            BridgeStateFile::default()
        };
        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
        })
    }

    fn with_state<T>(&self, op: impl FnOnce(&BridgeStateFile) -> T) -> T {
        let guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        op(&guard)
    }

    fn mutate<T>(&self, op: impl FnOnce(&mut BridgeStateFile) -> T) -> Result<T> {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let value = op(&mut guard);
        let mut payload = serde_json::to_string_pretty(&*guard)
            .context("failed to serialize bridge state")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write state file {}", self.path.display()))?;
        Ok(value)
    }

    /// Allocates the next stable ticket id.
    pub fn allocate_ticket_id(&self) -> Result<String> {
        self.mutate(|state| {
            let sequence = state.next_ticket_sequence.max(1);
            state.next_ticket_sequence = sequence + 1;
            format!("ticket-{sequence}")
        })
    }

    pub fn ticket(&self, ticket_id: &str) -> Option<Ticket> {
        self.with_state(|state| state.tickets.get(ticket_id).cloned())
    }

    /// The open ticket of this kind for this customer, if any. Backs the
    /// one-open-ticket-per-(customer, kind) invariant.
    pub fn open_ticket_for(&self, customer_id: &str, kind: TicketKind) -> Option<Ticket> {
        self.with_state(|state| {
            state
                .tickets
                .values()
                .find(|ticket| {
                    ticket.is_open() && ticket.customer_id == customer_id && ticket.kind == kind
                })
                .cloned()
        })
    }

    pub fn ticket_for_channel(&self, channel_id: &str) -> Option<Ticket> {
        self.with_state(|state| {
            state
                .tickets
                .values()
                .find(|ticket| ticket.channel_id == channel_id)
                .cloned()
        })
    }

    /// Resolves a DM topic (or plain staff-chat message) back to its ticket.
    pub fn ticket_for_mirror(&self, chat: &str, topic_id: Option<&str>) -> Option<Ticket> {
        self.with_state(|state| {
            state
                .tickets
                .values()
                .find(|ticket| {
                    ticket.mirror.as_ref().is_some_and(|mirror| {
                        mirror.chat == chat && mirror.topic_id.as_deref() == topic_id
                    })
                })
                .cloned()
        })
    }

    pub fn open_tickets(&self) -> Vec<Ticket> {
        self.with_state(|state| {
            state
                .tickets
                .values()
                .filter(|ticket| ticket.is_open())
                .cloned()
                .collect()
        })
    }

    pub fn upsert_ticket(&self, ticket: Ticket) -> Result<()> {
        self.mutate(|state| {
            state.tickets.insert(ticket.ticket_id.clone(), ticket);
        })
    }

    /// Removes a ticket record entirely. Used only to roll back a partially
    /// created ticket; closed tickets stay archived in the store.
    pub fn remove_ticket(&self, ticket_id: &str) -> Result<()> {
        self.mutate(|state| {
            state.tickets.remove(ticket_id);
            state.digests.remove(ticket_id);
        })
    }

    pub fn set_binding(&self, chat: &str, customer_id: &str) -> Result<()> {
        self.mutate(|state| {
            state
                .bindings
                .insert(chat.to_string(), customer_id.to_string());
        })
    }

    /// DM chat bound to a channel-platform user, if any.
    pub fn chat_bound_to(&self, customer_id: &str) -> Option<String> {
        self.with_state(|state| {
            state
                .bindings
                .iter()
                .find(|(_, bound)| bound.as_str() == customer_id)
                .map(|(chat, _)| chat.clone())
        })
    }

    pub fn binding_of(&self, chat: &str) -> Option<String> {
        self.with_state(|state| state.bindings.get(chat).cloned())
    }

    pub fn set_role(&self, chat: &str, role: StaffRole) -> Result<()> {
        self.mutate(|state| {
            state.roles.insert(chat.to_string(), role);
        })
    }

    pub fn role_of(&self, chat: &str) -> Option<StaffRole> {
        self.with_state(|state| state.roles.get(chat).copied())
    }

    /// All chats holding any of the given roles, in stable order.
    pub fn chats_with_roles(&self, roles: &[StaffRole]) -> Vec<String> {
        self.with_state(|state| {
            state
                .roles
                .iter()
                .filter(|(_, role)| roles.contains(role))
                .map(|(chat, _)| chat.clone())
                .collect()
        })
    }

    pub fn digest_of(&self, ticket_id: &str) -> DigestState {
        self.with_state(|state| state.digests.get(ticket_id).cloned().unwrap_or_default())
    }

    pub fn set_digest(&self, ticket_id: &str, digest: DigestState) -> Result<()> {
        self.mutate(|state| {
            state.digests.insert(ticket_id.to_string(), digest);
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{BridgeStateStore, BRIDGE_STATE_FILE_NAME};
    use crate::ticket_records::{
        DigestEntry, DigestState, MessageRef, StaffRole, Ticket, TicketKind, TicketRating,
        TicketStatus,
    };

    fn sample_ticket(id: &str, customer: &str, kind: TicketKind) -> Ticket {
        Ticket {
            ticket_id: id.to_string(),
            kind,
            customer_id: customer.to_string(),
            customer_display: customer.to_string(),
            channel_id: format!("channel-{id}"),
            mirror: None,
            status: TicketStatus::Open,
            opened_unix_ms: 1,
            closed_unix_ms: None,
            rating: TicketRating::Unset,
            rating_prompt: None,
        }
    }

    #[test]
    fn functional_store_round_trips_across_reload() {
        let temp = tempdir().expect("tempdir");
        let store = BridgeStateStore::load(temp.path()).expect("load");
        store
            .upsert_ticket(sample_ticket("ticket-1", "user-1", TicketKind::Order))
            .expect("upsert");
        store.set_binding("chat-9", "user-1").expect("bind");
        store.set_role("chat-9", StaffRole::Manager).expect("role");

        let reloaded = BridgeStateStore::load(temp.path()).expect("reload");
        let ticket = reloaded.ticket("ticket-1").expect("ticket survives");
        assert_eq!(ticket.customer_id, "user-1");
        assert_eq!(reloaded.binding_of("chat-9").as_deref(), Some("user-1"));
        assert_eq!(reloaded.role_of("chat-9"), Some(StaffRole::Manager));
    }

    #[test]
    fn unit_store_rejects_unknown_schema_version() {
        let temp = tempdir().expect("tempdir");
        std::fs::write(
            temp.path().join(BRIDGE_STATE_FILE_NAME),
            "{\"schema_version\": 99}",
        )
        .expect("seed file");
        let error = BridgeStateStore::load(temp.path()).expect_err("reject");
        assert!(error.to_string().contains("unsupported bridge state schema"));
    }

    #[test]
    fn unit_last_bind_wins_per_chat() {
        let temp = tempdir().expect("tempdir");
        let store = BridgeStateStore::load(temp.path()).expect("load");
        store.set_binding("chat-1", "user-a").expect("bind a");
        store.set_binding("chat-1", "user-b").expect("bind b");
        assert_eq!(store.binding_of("chat-1").as_deref(), Some("user-b"));
        assert_eq!(store.chat_bound_to("user-a"), None);
        assert_eq!(store.chat_bound_to("user-b").as_deref(), Some("chat-1"));
    }

    #[test]
    fn unit_open_ticket_lookup_ignores_closed_and_other_kinds() {
        let temp = tempdir().expect("tempdir");
        let store = BridgeStateStore::load(temp.path()).expect("load");
        let mut closed = sample_ticket("ticket-1", "user-1", TicketKind::Order);
        closed.status = TicketStatus::Closed;
        store.upsert_ticket(closed).expect("closed");
        store
            .upsert_ticket(sample_ticket("ticket-2", "user-1", TicketKind::Support))
            .expect("support");

        assert!(store.open_ticket_for("user-1", TicketKind::Order).is_none());
        assert!(store
            .open_ticket_for("user-1", TicketKind::Support)
            .is_some());
    }

    #[test]
    fn unit_ticket_ids_are_unique_and_monotonic() {
        let temp = tempdir().expect("tempdir");
        let store = BridgeStateStore::load(temp.path()).expect("load");
        let first = store.allocate_ticket_id().expect("first");
        let second = store.allocate_ticket_id().expect("second");
        assert_ne!(first, second);

        let reloaded = BridgeStateStore::load(temp.path()).expect("reload");
        let third = reloaded.allocate_ticket_id().expect("third");
        assert_ne!(third, first);
        assert_ne!(third, second);
    }

    #[test]
    fn unit_remove_ticket_drops_digest_state() {
        let temp = tempdir().expect("tempdir");
        let store = BridgeStateStore::load(temp.path()).expect("load");
        store
            .upsert_ticket(sample_ticket("ticket-1", "user-1", TicketKind::Order))
            .expect("upsert");
        store
            .set_digest(
                "ticket-1",
                DigestState {
                    message: Some(MessageRef::new("chat-1", "msg-1")),
                    window: vec![DigestEntry {
                        source: MessageRef::new("channel-1", "msg-2"),
                        author_display: "user".to_string(),
                        text: "hello".to_string(),
                    }],
                },
            )
            .expect("digest");
        store.remove_ticket("ticket-1").expect("remove");
        assert!(store.ticket("ticket-1").is_none());
        assert!(store.digest_of("ticket-1").message.is_none());
    }
}
