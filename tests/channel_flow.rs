//! Integration tests for channel attach, publish and delivery.
//!
//! Covers per-channel ordering, queueing while not attached, detach policies
//! and channel behaviour across resumed and non-resumed reconnects.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{TestServer, options, recorder, settle};
use parking_lot::Mutex;
use rtmux::rtmux_proto::{Action, ErrorInfo, Flags, Message, ProtocolMessage, codes};
use rtmux::{
    ChannelEvent, ChannelState, ChannelStateChange, ClientOptions, ConnectionState, DetachPolicy,
    Error, Realtime, RealtimeChannel, Wait,
};
use serde_json::json;

async fn attached_channel(server: &TestServer, client: &Realtime, name: &str) -> RealtimeChannel {
    let channel = client.channels().get(name);
    channel.attach().expect("attach");
    settle().await;
    server.attached(name, Flags::empty());
    settle().await;
    assert_eq!(channel.state(), ChannelState::Attached);
    channel
}

fn names(frames: &[ProtocolMessage]) -> Vec<String> {
    frames
        .iter()
        .flat_map(|f| f.messages.iter())
        .filter_map(|m| m.name.clone())
        .collect()
}

fn serials(frames: &[ProtocolMessage]) -> Vec<i64> {
    frames.iter().filter_map(|f| f.msg_serial).collect()
}

fn for_channel(frames: Vec<ProtocolMessage>, channel: &str) -> Vec<ProtocolMessage> {
    frames
        .into_iter()
        .filter(|f| f.channel.as_deref() == Some(channel))
        .collect()
}

// ============================================================================
// Attach / detach
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_attach_wait_resolves_on_attached() {
    let mut server = TestServer::new();
    let client = server.client(options());
    let link = server.accept_connected("conn-1", "key-1").await;

    let channel = client.channels().get("news");
    let (changes, listener) = recorder::<ChannelStateChange>();
    let _sub = channel.on_all(listener);

    let waiter = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.attach_wait(Wait::timeout(Duration::from_secs(5))).await })
    };
    settle().await;
    let attaches = link.sent_with(Action::Attach);
    assert_eq!(attaches.len(), 1);
    assert_eq!(attaches[0].channel.as_deref(), Some("news"));

    server.attached("news", Flags::empty());
    waiter.await.expect("task").expect("attached");

    let events: Vec<ChannelEvent> = changes.lock().iter().map(|c| c.event).collect();
    assert_eq!(events, vec![ChannelEvent::Attaching, ChannelEvent::Attached]);
}

#[tokio::test(start_paused = true)]
async fn test_attach_before_connect_waits_for_connection() {
    let mut server = TestServer::new();
    let client = server.client(ClientOptions {
        auto_connect: false,
        ..options()
    });
    let channel = client.channels().get("news");
    channel.attach().expect("attach starts the connection");
    assert_eq!(channel.state(), ChannelState::Attaching);

    let link = server.accept().await;
    assert!(link.sent().is_empty());
    server.connected("conn-1", "key-1");
    settle().await;
    assert_eq!(link.sent_with(Action::Attach).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attach_refused_while_connection_failed() {
    let mut server = TestServer::new();
    let client = server.client(options());
    server.accept_connected("conn-1", "key-1").await;
    server.connection_error(ErrorInfo::new(codes::PERMISSION_DENIED, 403, "denied"));
    settle().await;
    assert_eq!(client.connection().state(), ConnectionState::Failed);

    let err = client.channels().get("news").attach().unwrap_err();
    assert!(matches!(err, Error::InvalidState { operation: "attach", .. }));
}

#[tokio::test(start_paused = true)]
async fn test_attach_rejection_fails_channel_only() {
    let mut server = TestServer::new();
    let client = server.client(options());
    server.accept_connected("conn-1", "key-1").await;
    let channel = client.channels().get("private");

    let waiter = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.attach_wait(Wait::forever()).await })
    };
    settle().await;
    server.channel_error(
        "private",
        ErrorInfo::new(codes::PERMISSION_DENIED, 403, "not allowed"),
    );

    let err = waiter.await.expect("task").unwrap_err();
    assert!(matches!(err, Error::ChannelFailed { ref channel, .. } if channel == "private"));
    assert_eq!(channel.state(), ChannelState::Failed);
    assert_eq!(
        channel.error_reason().map(|e| e.code),
        Some(codes::PERMISSION_DENIED)
    );
    assert_eq!(client.connection().state(), ConnectionState::Connected);
    assert!(channel.publish("a", json!(1)).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_attach_wait_timeout_leaves_attach_running() {
    let mut server = TestServer::new();
    let client = server.client(options());
    server.accept_connected("conn-1", "key-1").await;
    let channel = client.channels().get("news");

    let err = channel
        .attach_wait(Wait::timeout(Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::Timeout {
            operation: "attach",
            after: Duration::from_secs(2)
        }
    );
    assert_eq!(channel.state(), ChannelState::Attaching);

    server.attached("news", Flags::empty());
    settle().await;
    assert_eq!(channel.state(), ChannelState::Attached);
}

#[tokio::test(start_paused = true)]
async fn test_detach_wait_resolves_on_detached() {
    let mut server = TestServer::new();
    let client = server.client(options());
    let link = server.accept_connected("conn-1", "key-1").await;
    let channel = attached_channel(&server, &client, "news").await;

    let waiter = {
        let channel = channel.clone();
        tokio::spawn(async move {
            channel
                .detach_wait(DetachPolicy::Fail, Wait::timeout(Duration::from_secs(5)))
                .await
        })
    };
    settle().await;
    assert_eq!(channel.state(), ChannelState::Detaching);
    assert_eq!(link.sent_with(Action::Detach).len(), 1);

    server.detached("news", None);
    waiter.await.expect("task").expect("detached");
    assert_eq!(channel.state(), ChannelState::Detached);
}

#[tokio::test(start_paused = true)]
async fn test_detach_completes_when_reconnect_is_not_resumed() {
    let mut server = TestServer::new();
    let client = server.client(options());
    server.accept_connected("conn-1", "key-1").await;
    let channel = attached_channel(&server, &client, "news").await;

    channel.detach().expect("detach");
    assert_eq!(channel.state(), ChannelState::Detaching);
    server.drop_link();
    settle().await;

    let waiter = {
        let channel = channel.clone();
        tokio::spawn(async move {
            channel
                .detach_wait(DetachPolicy::Fail, Wait::timeout(Duration::from_secs(5)))
                .await
        })
    };
    server.accept_connected("conn-2", "key-2").await;
    waiter.await.expect("task").expect("detached");
    assert_eq!(channel.state(), ChannelState::Detached);
    assert!(server.link().sent_with(Action::Attach).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_detach_is_resent_after_resumed_reconnect() {
    let mut server = TestServer::new();
    let client = server.client(options());
    server.accept_connected("conn-1", "key-1").await;
    let channel = attached_channel(&server, &client, "news").await;

    channel.detach().expect("detach");
    server.drop_link();
    settle().await;

    let second = server.accept_connected("conn-1", "key-2").await;
    assert_eq!(channel.state(), ChannelState::Detaching);
    assert_eq!(second.sent_with(Action::Detach).len(), 1);

    server.detached("news", None);
    settle().await;
    assert_eq!(channel.state(), ChannelState::Detached);
}

#[tokio::test(start_paused = true)]
async fn test_detach_policy_decides_queued_outcome() {
    let mut server = TestServer::new();
    let client = server.client(options());
    server.accept_connected("conn-1", "key-1").await;

    let dropped = client.channels().get("dropped");
    dropped.attach().expect("attach");
    let a = dropped.publish("a", json!(1)).expect("queued");
    dropped.detach_with(DetachPolicy::Drop).expect("detach");
    assert!(matches!(a.await, Err(Error::Discarded(_))));

    let failed = client.channels().get("failed");
    failed.attach().expect("attach");
    let b = failed.publish("b", json!(2)).expect("queued");
    failed.detach().expect("detach");
    assert_eq!(b.await, Err(Error::ChannelDetached("failed".to_string())));
    assert_eq!(failed.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_detached_reattaches() {
    let mut server = TestServer::new();
    let client = server.client(options());
    let link = server.accept_connected("conn-1", "key-1").await;
    let channel = attached_channel(&server, &client, "news").await;

    server.detached(
        "news",
        Some(ErrorInfo::new(codes::CHANNEL_DETACHED, 500, "server detached")),
    );
    settle().await;
    assert_eq!(channel.state(), ChannelState::Attaching);
    assert_eq!(
        channel.error_reason().map(|e| e.code),
        Some(codes::CHANNEL_DETACHED)
    );
    assert_eq!(link.sent_with(Action::Attach).len(), 2);

    server.attached("news", Flags::empty());
    settle().await;
    assert_eq!(channel.state(), ChannelState::Attached);
}

#[tokio::test(start_paused = true)]
async fn test_release_detaches_and_forgets_channel() {
    let mut server = TestServer::new();
    let client = server.client(options());
    let link = server.accept_connected("conn-1", "key-1").await;
    attached_channel(&server, &client, "news").await;
    client.channels().get("sports");
    assert_eq!(client.channels().names(), vec!["news", "sports"]);

    client.channels().release("news").expect("release");
    assert!(!client.channels().exists("news"));
    assert_eq!(client.channels().names(), vec!["sports"]);
    assert_eq!(link.sent_with(Action::Detach).len(), 1);
}

// ============================================================================
// Publishing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_publishes_are_serialized_and_acked_in_order() {
    let mut server = TestServer::new();
    let client = server.client(options());
    let link = server.accept_connected("conn-1", "key-1").await;
    let channel = attached_channel(&server, &client, "news").await;

    let handles: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|name| channel.publish(name, json!(name)).expect("publish"))
        .collect();
    let frames = link.sent_with(Action::Message);
    assert_eq!(names(&frames), vec!["a", "b", "c"]);
    assert_eq!(serials(&frames), vec![0, 1, 2]);

    server.ack(0, 3);
    for handle in handles {
        assert_eq!(handle.await, Ok(()));
    }
    assert_eq!(client.connection().msg_serial(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_nack_fails_publish_with_server_error() {
    let mut server = TestServer::new();
    let client = server.client(options());
    server.accept_connected("conn-1", "key-1").await;
    let channel = attached_channel(&server, &client, "news").await;

    let handle = channel.publish("a", json!(1)).expect("publish");
    let info = ErrorInfo::new(codes::PERMISSION_DENIED, 403, "publish denied");
    server.nack(0, 1, info.clone());
    assert_eq!(handle.await, Err(Error::Rejected(info)));
}

#[tokio::test(start_paused = true)]
async fn test_three_messages_on_detached_channel_flush_in_order() {
    let mut server = TestServer::new();
    let client = server.client(options());
    let link = server.accept_connected("conn-1", "key-1").await;
    let channel = attached_channel(&server, &client, "news").await;
    channel.detach().expect("detach");
    settle().await;
    server.detached("news", None);
    settle().await;
    assert_eq!(channel.state(), ChannelState::Detached);

    let handles: Vec<_> = ["one", "two", "three"]
        .into_iter()
        .map(|name| channel.publish(name, json!(name)).expect("queued"))
        .collect();
    assert_eq!(channel.pending_count(), 3);
    assert!(link.sent_with(Action::Message).is_empty());

    channel.attach().expect("attach");
    settle().await;
    server.attached("news", Flags::empty());
    settle().await;

    let frames = link.sent_with(Action::Message);
    assert_eq!(names(&frames), vec!["one", "two", "three"]);
    let serials = serials(&frames);
    assert!(serials.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(channel.pending_count(), 0);

    server.ack(serials[0], 3);
    for handle in handles {
        assert_eq!(handle.await, Ok(()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_ordering_is_per_channel_when_interleaved() {
    let mut server = TestServer::new();
    let client = server.client(options());
    let link = server.accept_connected("conn-1", "key-1").await;
    let one = client.channels().get("one");
    let two = client.channels().get("two");

    for n in 1..=3 {
        let _ = one.publish(format!("one-{n}"), json!(n)).expect("publish");
        let _ = two.publish(format!("two-{n}"), json!(n)).expect("publish");
    }
    settle().await;
    assert_eq!(link.sent_with(Action::Attach).len(), 2);

    server.attached("two", Flags::empty());
    server.attached("one", Flags::empty());
    settle().await;

    let frames = link.sent_with(Action::Message);
    let one_frames = for_channel(frames.clone(), "one");
    let two_frames = for_channel(frames, "two");
    assert_eq!(names(&one_frames), vec!["one-1", "one-2", "one-3"]);
    assert_eq!(names(&two_frames), vec!["two-1", "two-2", "two-3"]);
    assert!(serials(&one_frames).windows(2).all(|w| w[0] < w[1]));
    assert!(serials(&two_frames).windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(start_paused = true)]
async fn test_channel_queue_limit_is_reported() {
    let server = TestServer::new();
    let client = server.client(ClientOptions {
        auto_connect: false,
        max_channel_queue: 2,
        ..options()
    });
    let channel = client.channels().get("news");
    let _a = channel.publish("a", json!(1)).expect("queued");
    let _b = channel.publish("b", json!(2)).expect("queued");
    let err = channel.publish("c", json!(3)).unwrap_err();
    assert_eq!(
        err,
        Error::QueueFull {
            channel: "news".to_string(),
            limit: 2
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_connection_close_detaches_channels_and_fails_pending() {
    let mut server = TestServer::new();
    let client = server.client(options());
    server.accept_connected("conn-1", "key-1").await;
    let news = attached_channel(&server, &client, "news").await;
    let sports = client.channels().get("sports");
    let pending = sports.publish("goal", json!(1)).expect("queued");

    client.close();
    settle().await;
    server.closed();
    settle().await;

    assert_eq!(client.connection().state(), ConnectionState::Closed);
    assert_eq!(news.state(), ChannelState::Detached);
    assert_eq!(sports.state(), ChannelState::Detached);
    assert_eq!(pending.await, Err(Error::ConnectionClosed));
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_subscribe_filters_by_name_and_fills_ids() {
    let mut server = TestServer::new();
    let client = server.client(options());
    server.accept_connected("conn-1", "key-1").await;
    let channel = attached_channel(&server, &client, "news").await;

    let (all, listener) = recorder::<Message>();
    let _all = channel.subscribe(None, listener).expect("subscribe");
    let (greetings, listener) = recorder::<Message>();
    let greeting_sub = channel.subscribe(Some("greeting"), listener).expect("subscribe");

    server.messages(
        "news",
        "frame-1",
        vec![
            Message::new("greeting", json!("hi")),
            Message::new("other", json!(2)),
        ],
    );
    settle().await;

    let all_ids: Vec<Option<String>> = all.lock().iter().map(|m| m.id.clone()).collect();
    assert_eq!(
        all_ids,
        vec![Some("frame-1:0".to_string()), Some("frame-1:1".to_string())]
    );
    assert!(all.lock().iter().all(|m| m.connection_id.as_deref() == Some("publisher")));
    assert!(all.lock().iter().all(|m| m.timestamp.is_some_and(|t| t > 0)));
    assert_eq!(greetings.lock().len(), 1);

    assert!(greeting_sub.unsubscribe());
    server.messages("news", "frame-2", vec![Message::new("greeting", json!("again"))]);
    settle().await;
    assert_eq!(greetings.lock().len(), 1);
    assert_eq!(all.lock().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_delivery_order_matches_server_order() {
    let mut server = TestServer::new();
    let client = server.client(options());
    server.accept_connected("conn-1", "key-1").await;
    let channel = attached_channel(&server, &client, "news").await;
    let (received, listener) = recorder::<Message>();
    let _sub = channel.subscribe(None, listener).expect("subscribe");

    for n in 0..5 {
        server.messages(
            "news",
            &format!("frame-{n}"),
            vec![Message::new(format!("m{n}"), json!(n))],
        );
    }
    settle().await;

    let order: Vec<String> = received
        .lock()
        .iter()
        .filter_map(|m| m.name.clone())
        .collect();
    assert_eq!(order, vec!["m0", "m1", "m2", "m3", "m4"]);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_attaches_implicitly() {
    let mut server = TestServer::new();
    let client = server.client(options());
    let link = server.accept_connected("conn-1", "key-1").await;
    let channel = client.channels().get("news");

    let _sub = channel.subscribe(None, |_| {}).expect("subscribe");
    settle().await;
    assert_eq!(channel.state(), ChannelState::Attaching);
    assert_eq!(link.sent_with(Action::Attach).len(), 1);
}

// ============================================================================
// Reconnects
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_resumed_reconnect_keeps_serials_and_continuity() {
    let mut server = TestServer::new();
    let client = server.client(options());
    let first = server.accept_connected("conn-1", "key-1").await;
    let channel = attached_channel(&server, &client, "news").await;
    let (changes, listener) = recorder::<ChannelStateChange>();
    let _sub = channel.on_all(listener);

    let a = channel.publish("a", json!(1)).expect("publish");
    let b = channel.publish("b", json!(2)).expect("publish");
    assert_eq!(serials(&first.sent_with(Action::Message)), vec![0, 1]);
    server.ack(0, 1);
    assert_eq!(a.await, Ok(()));

    server.drop_link();
    settle().await;
    assert_eq!(channel.state(), ChannelState::Suspended);

    let second = server.accept().await;
    server.connected("conn-1", "key-2");
    settle().await;
    assert_eq!(server.transport().attempts()[1].resume.as_deref(), Some("key-1"));
    assert_eq!(serials(&second.sent_with(Action::Message)), vec![1]);

    server.attached("news", Flags::RESUMED);
    settle().await;
    assert_eq!(channel.state(), ChannelState::Attached);

    let c = channel.publish("c", json!(3)).expect("publish");
    assert_eq!(serials(&second.sent_with(Action::Message)), vec![1, 2]);
    server.ack(1, 2);
    assert_eq!(b.await, Ok(()));
    assert_eq!(c.await, Ok(()));

    let changes = changes.lock();
    assert!(changes.iter().all(|c| !c.is_continuity_break()));
    let last = changes.last().expect("changes recorded");
    assert_eq!(last.current, ChannelState::Attached);
    assert!(last.resumed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_resume_signals_one_break_per_channel_before_delivery() {
    let mut server = TestServer::new();
    let client = server.client(options());
    server.accept_connected("conn-1", "key-1").await;
    let one = attached_channel(&server, &client, "one").await;
    let two = attached_channel(&server, &client, "two").await;

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut subs = Vec::new();
    for channel in [&one, &two] {
        let name = channel.name().to_string();
        let sink = log.clone();
        subs.push(channel.on_all(move |change| {
            if change.is_continuity_break() {
                sink.lock().push(format!("break:{name}"));
            }
        }));
        let sink = log.clone();
        let name = channel.name().to_string();
        subs.push(
            channel
                .subscribe(None, move |_| sink.lock().push(format!("message:{name}")))
                .expect("subscribe"),
        );
    }
    let unacked = one.publish("x", json!(1)).expect("publish");

    server.drop_link();
    settle().await;
    let second = server.accept().await;
    server.connected("conn-2", "key-2");
    settle().await;
    assert_eq!(client.connection().id().as_deref(), Some("conn-2"));

    // The unacknowledged message is renumbered in the new serial epoch.
    assert_eq!(serials(&second.sent_with(Action::Message)), vec![0]);

    server.attached("one", Flags::empty());
    server.attached("two", Flags::empty());
    server.messages("one", "frame-1", vec![Message::new("after", json!(1))]);
    server.messages("two", "frame-2", vec![Message::new("after", json!(2))]);
    settle().await;

    let log = log.lock().clone();
    assert_eq!(log.iter().filter(|e| *e == "break:one").count(), 1);
    assert_eq!(log.iter().filter(|e| *e == "break:two").count(), 1);
    for name in ["one", "two"] {
        let brk = log.iter().position(|e| *e == format!("break:{name}"));
        let msg = log.iter().position(|e| *e == format!("message:{name}"));
        assert!(brk < msg, "break must precede delivery on {name}: {log:?}");
    }

    server.ack(0, 1);
    assert_eq!(unacked.await, Ok(()));
}
