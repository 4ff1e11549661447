//! End-to-end bridge scenarios over the in-memory platform doubles.

use std::sync::Arc;

use tempfile::tempdir;

use ferry_core::BridgeConfig;
use ferry_engine::platform_contract::{ChannelEvent, ChannelMessage, DmEvent, DmMessage};
use ferry_engine::platform_testkit::{InMemoryChannelClient, InMemoryDmClient};
use ferry_engine::post_template::CONTROL_ID_OPEN_ORDER;
use ferry_engine::ticket_lifecycle::{CloseActor, CloseOutcome, CONTROL_ID_CLOSE};
use ferry_state::{StaffRole, TicketKind, TicketStatus};
use ferry_runtime::BridgeRuntime;

struct Bridge {
    runtime: Arc<BridgeRuntime>,
    channel: Arc<InMemoryChannelClient>,
    dm: Arc<InMemoryDmClient>,
    _temp: tempfile::TempDir,
}

fn bridge() -> Bridge {
    let temp = tempdir().expect("tempdir");
    let mut config: BridgeConfig = toml::from_str("staff_chat = \"chat-staff\"").expect("config");
    config.state_dir = temp.path().join("state");
    config.delivery_retry_base_ms = 0;
    config.bootstrap_admin_chats = vec!["chat-admin".to_string()];
    let channel = Arc::new(InMemoryChannelClient::new());
    let dm = Arc::new(InMemoryDmClient::new(true));
    let runtime =
        Arc::new(BridgeRuntime::new(config, channel.clone(), dm.clone()).expect("runtime"));
    Bridge {
        runtime,
        channel,
        dm,
        _temp: temp,
    }
}

fn press(channel_id: &str, control_id: &str, user_id: &str, display: &str) -> ChannelEvent {
    ChannelEvent::ButtonPressed {
        channel_id: channel_id.to_string(),
        message_id: "panel-1".to_string(),
        control_id: control_id.to_string(),
        user_id: user_id.to_string(),
        user_display: display.to_string(),
    }
}

fn message(channel_id: &str, message_id: &str, author: &str, text: &str) -> ChannelEvent {
    ChannelEvent::MessageCreated {
        message: ChannelMessage {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            author_id: author.to_string(),
            author_display: "Jane Doe".to_string(),
            author_is_bot: false,
            text: text.to_string(),
            attachments: Vec::new(),
            timestamp_ms: 100,
        },
    }
}

#[tokio::test]
async fn published_panel_button_opens_ticket_and_full_round_trip_relays() {
    let bridge = bridge();
    let store = bridge.runtime.store().clone();
    store.set_binding("chat-x", "user-1").expect("bind");
    store.set_role("chat-a", StaffRole::Admin).expect("role a");
    store.set_role("chat-b", StaffRole::Builder).expect("role b");

    // Staff saves and publishes a panel with an inline order button.
    bridge
        .runtime
        .execute_command("chat-admin", "/register_role admin")
        .await;
    bridge
        .runtime
        .execute_command(
            "chat-admin",
            "/save_template shop | channel-panel | Shop | Order here {{btn:Buy|order|success|row0|🛒}}",
        )
        .await;
    bridge
        .runtime
        .execute_command("chat-admin", "/send_template shop")
        .await;
    let panel = bridge.channel.posts_in("channel-panel");
    assert_eq!(panel.len(), 1);
    let buy = panel[0]
        .post
        .controls
        .iter()
        .find(|control| control.label == "Buy")
        .expect("buy control");
    assert_eq!(buy.control_id, CONTROL_ID_OPEN_ORDER);

    // Customer presses the published button.
    bridge
        .runtime
        .handle_channel_event(press(
            "channel-panel",
            &buy.control_id,
            "user-1",
            "Jane Doe",
        ))
        .await;
    let ticket = store.open_tickets().remove(0);
    assert_eq!(ticket.kind, TicketKind::Order);
    assert!(ticket.channel_id.starts_with("channel-"));

    // Customer writes; routing matrix for an order ticket is {bound chat,
    // admin, builder}; staff chat receives the mirror and the digest.
    bridge
        .runtime
        .handle_channel_event(message(&ticket.channel_id, "m-1", "user-1", "need a refund"))
        .await;
    for chat in ["chat-x", "chat-a", "chat-b"] {
        assert!(
            bridge
                .dm
                .messages_in(chat)
                .iter()
                .any(|m| m.text.contains("need a refund")),
            "{chat} should hear about the relayed message"
        );
    }
    let staff = bridge.dm.messages_in("chat-staff");
    assert!(staff.iter().any(|m| m.text.contains("Digest for")));

    // Staff replies from the mirror topic; the reply lands in the channel.
    let mirror = store.ticket(&ticket.ticket_id).expect("ticket").mirror.expect("mirror");
    bridge
        .runtime
        .handle_dm_event(DmEvent::MessageSent {
            message: DmMessage {
                chat: mirror.chat.clone(),
                topic_id: mirror.topic_id.clone(),
                message_id: "dm-1".to_string(),
                author_display: "Support Sam".to_string(),
                text: "refund approved".to_string(),
                timestamp_ms: 200,
            },
        })
        .await;
    assert!(bridge
        .channel
        .posts_in(&ticket.channel_id)
        .iter()
        .any(|post| post.post.body.contains("Support Sam: refund approved")));
}

#[tokio::test]
async fn support_ticket_routing_excludes_builder_chats() {
    let bridge = bridge();
    let store = bridge.runtime.store().clone();
    store.set_binding("chat-x", "user-1").expect("bind");
    store.set_role("chat-a", StaffRole::Admin).expect("role a");
    store.set_role("chat-b", StaffRole::Builder).expect("role b");

    let ticket = bridge
        .runtime
        .lifecycle()
        .open_ticket(TicketKind::Support, "user-1", "Jane Doe")
        .await
        .expect("open");
    bridge
        .runtime
        .handle_channel_event(message(&ticket.channel_id, "m-1", "user-1", "login is broken"))
        .await;

    assert!(bridge
        .dm
        .messages_in("chat-x")
        .iter()
        .any(|m| m.text.contains("login is broken")));
    assert!(bridge
        .dm
        .messages_in("chat-a")
        .iter()
        .any(|m| m.text.contains("login is broken")));
    assert!(
        !bridge
            .dm
            .messages_in("chat-b")
            .iter()
            .any(|m| m.text.contains("login is broken")),
        "builder chats only subscribe to order tickets"
    );
}

#[tokio::test]
async fn close_is_idempotent_and_survives_duplicate_button_presses() {
    let bridge = bridge();
    let ticket = bridge
        .runtime
        .lifecycle()
        .open_ticket(TicketKind::Order, "user-1", "Jane Doe")
        .await
        .expect("open");
    // The platform double records only bridge-sent posts in its history;
    // mimic the customer's message landing there too before archiving.
    bridge.channel.push_history(ChannelMessage {
        channel_id: ticket.channel_id.clone(),
        message_id: "m-1".to_string(),
        author_id: "user-1".to_string(),
        author_display: "Jane Doe".to_string(),
        author_is_bot: false,
        text: "first message".to_string(),
        attachments: Vec::new(),
        timestamp_ms: 100,
    });
    bridge
        .runtime
        .handle_channel_event(message(&ticket.channel_id, "m-1", "user-1", "first message"))
        .await;

    let first = bridge
        .runtime
        .lifecycle()
        .close_ticket(&ticket.ticket_id, CloseActor::System)
        .await
        .expect("close");
    let summary = match first {
        CloseOutcome::Closed(summary) => summary,
        other => panic!("expected close, got {other:?}"),
    };
    assert!(summary.archive_dir.join("transcript.md").exists());

    // The button path and the command path both land on AlreadyClosed.
    bridge
        .runtime
        .handle_channel_event(press(&ticket.channel_id, CONTROL_ID_CLOSE, "user-1", "Jane Doe"))
        .await;
    let second = bridge
        .runtime
        .lifecycle()
        .close_ticket(&ticket.ticket_id, CloseActor::System)
        .await
        .expect("re-close");
    assert_eq!(second, CloseOutcome::AlreadyClosed);

    let stored = bridge.runtime.store().ticket(&ticket.ticket_id).expect("ticket");
    assert_eq!(stored.status, TicketStatus::Closed);
    let transcript =
        std::fs::read_to_string(summary.archive_dir.join("transcript.md")).expect("transcript");
    assert!(transcript.contains("first message"));
}

#[tokio::test]
async fn digest_self_heals_after_external_delete() {
    let bridge = bridge();
    let ticket = bridge
        .runtime
        .lifecycle()
        .open_ticket(TicketKind::Support, "user-1", "Jane Doe")
        .await
        .expect("open");

    bridge
        .runtime
        .handle_channel_event(message(&ticket.channel_id, "m-1", "user-1", "one"))
        .await;
    let digest_ref = bridge
        .runtime
        .store()
        .digest_of(&ticket.ticket_id)
        .message
        .expect("digest pointer");
    bridge
        .dm
        .externally_delete(&digest_ref.conversation, &digest_ref.message_id);

    bridge
        .runtime
        .handle_channel_event(message(&ticket.channel_id, "m-2", "user-1", "two"))
        .await;
    let healed_ref = bridge
        .runtime
        .store()
        .digest_of(&ticket.ticket_id)
        .message
        .expect("healed pointer");
    assert_ne!(digest_ref.message_id, healed_ref.message_id);
    let healed = bridge
        .dm
        .message(&healed_ref.conversation, &healed_ref.message_id)
        .expect("healed message");
    assert!(healed.text.contains("one"));
    assert!(healed.text.contains("two"));
}

#[tokio::test]
async fn open_failure_rolls_back_so_retry_succeeds() {
    let bridge = bridge();
    // Welcome-message sends exhaust the whole retry budget, so the open
    // fails after the channel was created.
    bridge.channel.fail_next_sends(3);
    let failed = bridge
        .runtime
        .lifecycle()
        .open_ticket(TicketKind::Order, "user-1", "Jane Doe")
        .await;
    assert!(failed.is_err());
    assert!(bridge.runtime.store().open_tickets().is_empty());

    let ticket = bridge
        .runtime
        .lifecycle()
        .open_ticket(TicketKind::Order, "user-1", "Jane Doe")
        .await
        .expect("second attempt");
    assert_eq!(bridge.runtime.store().open_tickets().len(), 1);
    assert_eq!(ticket.customer_id, "user-1");
}

#[tokio::test]
async fn template_render_is_deterministic_across_republish() {
    let bridge = bridge();
    bridge
        .runtime
        .execute_command("chat-admin", "/register_role admin")
        .await;
    let saved = bridge
        .runtime
        .execute_command(
            "chat-admin",
            "/save_template shop | channel-panel | Shop | {{btn:Buy|order|success|row0|🛒}} {{btn:Help|support|secondary|row1|}}",
        )
        .await;
    assert_eq!(saved, "Template shop saved.");
    bridge
        .runtime
        .execute_command("chat-admin", "/send_template shop")
        .await;
    let first = bridge.channel.posts_in("channel-panel")[0].post.clone();
    bridge
        .runtime
        .execute_command("chat-admin", "/send_template shop")
        .await;
    let posts = bridge.channel.posts_in("channel-panel");
    assert_eq!(posts.len(), 1, "republish overwrites the panel");
    assert_eq!(posts[0].post.controls, first.controls);
}
