//! Per-ticket mutual exclusion arena.
//!
//! One async mutex per ticket id, created on demand, so a close racing an
//! incoming message on the same ticket serializes while other tickets
//! proceed independently. Guards are owned so they can cross await points.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct TicketLockArena {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl TicketLockArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the exclusion scope for one ticket id, creating it on first
    /// use. All store mutations for a ticket happen under this guard.
    pub async fn lock(&self, ticket_id: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(
                locks
                    .entry(ticket_id.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        entry.lock_owned().await
    }
}
