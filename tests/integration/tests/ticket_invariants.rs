//! Property checks over the ticket lifecycle and the durable stores.

use std::sync::Arc;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use tempfile::tempdir;

use ferry_core::{BridgeConfig, FerryError};
use ferry_engine::platform_testkit::{InMemoryChannelClient, InMemoryDmClient};
use ferry_engine::ticket_lifecycle::CloseActor;
use ferry_state::{BridgeStateStore, TicketKind};
use ferry_runtime::BridgeRuntime;

#[derive(Debug, Clone, Copy)]
enum Step {
    Open(u8, TicketKind),
    Close(u8, TicketKind),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    (0u8..3, prop::bool::ANY, prop::bool::ANY).prop_map(|(customer, order, open)| {
        let kind = if order {
            TicketKind::Order
        } else {
            TicketKind::Support
        };
        if open {
            Step::Open(customer, kind)
        } else {
            Step::Close(customer, kind)
        }
    })
}

fn runtime_in(dir: &std::path::Path) -> BridgeRuntime {
    let mut config: BridgeConfig = toml::from_str("staff_chat = \"chat-staff\"").expect("config");
    config.state_dir = dir.join("state");
    config.delivery_retry_base_ms = 0;
    let channel = Arc::new(InMemoryChannelClient::new());
    let dm = Arc::new(InMemoryDmClient::new(true));
    BridgeRuntime::new(config, channel, dm).expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Random open/close interleavings never produce two open tickets for
    /// the same (customer, kind), and duplicate opens always report the
    /// existing channel.
    #[test]
    fn at_most_one_open_ticket_per_customer_and_kind(steps in prop::collection::vec(step_strategy(), 1..24)) {
        let tokio_runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("tokio runtime");
        tokio_runtime.block_on(async move {
            let temp = tempdir().expect("tempdir");
            let runtime = runtime_in(temp.path());
            for step in steps {
                match step {
                    Step::Open(customer, kind) => {
                        let customer_id = format!("user-{customer}");
                        let existed = runtime.store().open_ticket_for(&customer_id, kind);
                        let outcome = runtime
                            .lifecycle()
                            .open_ticket(kind, &customer_id, &format!("Customer {customer}"))
                            .await;
                        match (existed, outcome) {
                            (None, Ok(_)) => {}
                            (Some(existing), Err(FerryError::DuplicateTicket { existing_channel, .. })) => {
                                prop_assert_eq!(existing.channel_id, existing_channel);
                            }
                            (existed, outcome) => {
                                return Err(TestCaseError::fail(format!(
                                    "unexpected open outcome: existed={existed:?} outcome={outcome:?}"
                                )));
                            }
                        }
                    }
                    Step::Close(customer, kind) => {
                        let customer_id = format!("user-{customer}");
                        if let Some(ticket) = runtime.store().open_ticket_for(&customer_id, kind) {
                            runtime
                                .lifecycle()
                                .close_ticket(&ticket.ticket_id, CloseActor::System)
                                .await
                                .expect("close");
                        }
                    }
                }
                for customer in 0u8..3 {
                    for kind in [TicketKind::Order, TicketKind::Support] {
                        let customer_id = format!("user-{customer}");
                        let open_count = runtime
                            .store()
                            .open_tickets()
                            .into_iter()
                            .filter(|ticket| ticket.customer_id == customer_id && ticket.kind == kind)
                            .count();
                        prop_assert!(open_count <= 1, "customer {customer_id} has {open_count} open {} tickets", kind.as_str());
                    }
                }
            }
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn state_survives_restart() {
    let temp = tempdir().expect("tempdir");
    let ticket_id;
    {
        let runtime = runtime_in(temp.path());
        let ticket = runtime
            .lifecycle()
            .open_ticket(TicketKind::Order, "user-1", "Jane Doe")
            .await
            .expect("open");
        ticket_id = ticket.ticket_id;
        runtime.store().set_binding("chat-x", "user-1").expect("bind");
    }

    let store = BridgeStateStore::load(&temp.path().join("state")).expect("reload");
    let restored = store.ticket(&ticket_id).expect("ticket persisted");
    assert!(restored.is_open());
    assert_eq!(store.chat_bound_to("user-1").as_deref(), Some("chat-x"));

    // The id sequence continues instead of reusing "ticket-1".
    let next = store.allocate_ticket_id().expect("allocate");
    assert_ne!(next, ticket_id);
}
