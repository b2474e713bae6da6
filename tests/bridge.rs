//! End-to-end engine tests over an in-memory websocket pair.
//!
//! The "peer" side is a raw websocket server over `tokio::io::duplex`,
//! scripted frame by frame. Outbound assertions use a `ping` as an ordering
//! fence: the writer preserves queue order, so anything not seen before the
//! fence was never sent.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use eventbus_bridge::{
    event_handler, message_handler, Bridge, BridgeError, ConnectOptions, Envelope, FrameType,
};

type Peer = WebSocketStream<DuplexStream>;

async fn bridge_pair(options: ConnectOptions) -> (Bridge, Peer) {
    let (near, far) = tokio::io::duplex(256 * 1024);
    let peer = WebSocketStream::from_raw_socket(far, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(near, Role::Client, None).await;
    (Bridge::attach(client, options), peer)
}

fn quiet_options() -> ConnectOptions {
    // Long enough that no keepalive fires during a test.
    ConnectOptions::new().ping_interval(Duration::from_secs(600))
}

/// Next protocol frame from the client, skipping keepalives.
async fn next_frame(peer: &mut Peer) -> Envelope {
    loop {
        let msg = timeout(Duration::from_secs(5), peer.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("peer stream ended")
            .expect("peer stream errored");
        if let WsMessage::Text(text) = msg {
            let env = Envelope::from_json(&text).unwrap();
            if env.frame_type != FrameType::Ping {
                return env;
            }
        }
    }
}

async fn push_frame(peer: &mut Peer, envelope: &Envelope) {
    peer.send(WsMessage::text(envelope.to_json().unwrap()))
        .await
        .unwrap();
}

fn delivery(address: &str, body: serde_json::Value) -> Envelope {
    Envelope {
        frame_type: FrameType::Rec,
        address: Some(address.to_string()),
        body: Some(body),
        reply_address: None,
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("delivery channel closed")
}

#[tokio::test]
async fn second_registration_is_local_only() {
    let (bridge, mut peer) = bridge_pair(quiet_options()).await;

    bridge
        .register_handler("test", message_handler(|_| {}))
        .unwrap();
    bridge
        .register_handler("test", message_handler(|_| {}))
        .unwrap();
    bridge.ping().unwrap(); // fence

    let frame = next_frame(&mut peer).await;
    assert_eq!(frame.frame_type, FrameType::Register);
    assert_eq!(frame.address.as_deref(), Some("test"));

    // Nothing between the register and the fence.
    let msg = timeout(Duration::from_secs(5), peer.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(msg, WsMessage::text(r#"{"type":"ping"}"#));
}

#[tokio::test]
async fn unregister_notifies_peer_only_when_address_empties() {
    let (bridge, mut peer) = bridge_pair(quiet_options()).await;
    let first = message_handler(|_| {});
    let second = message_handler(|_| {});
    bridge.register_handler("test", first.clone()).unwrap();
    bridge.register_handler("test", second.clone()).unwrap();
    assert_eq!(next_frame(&mut peer).await.frame_type, FrameType::Register);

    bridge.unregister_handler("test", &first).unwrap();
    bridge.ping().unwrap(); // fence: no unregister yet
    let msg = timeout(Duration::from_secs(5), peer.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(msg, WsMessage::text(r#"{"type":"ping"}"#));

    bridge.unregister_handler("test", &second).unwrap();
    let frame = next_frame(&mut peer).await;
    assert_eq!(frame.frame_type, FrameType::Unregister);
    assert_eq!(frame.address.as_deref(), Some("test"));
    assert_eq!(bridge.handlers_at("test"), 0);
}

#[tokio::test]
async fn delivery_reaches_every_handler_in_registration_order() {
    let (bridge, mut peer) = bridge_pair(quiet_options()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    for tag in ["first", "second"] {
        let tx = tx.clone();
        bridge
            .register_handler(
                "test",
                message_handler(move |msg| {
                    tx.send((tag, msg.body().clone())).unwrap();
                }),
            )
            .unwrap();
    }
    next_frame(&mut peer).await;

    push_frame(&mut peer, &delivery("test", json!("hello"))).await;

    assert_eq!(recv(&mut rx).await, ("first", json!("hello")));
    assert_eq!(recv(&mut rx).await, ("second", json!("hello")));
}

#[tokio::test]
async fn send_roundtrip_with_reply() {
    let (bridge, mut peer) = bridge_pair(quiet_options()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    bridge
        .send_with_reply(
            "orders",
            json!({"id": 7}),
            message_handler(move |msg| {
                tx.send(msg.body().clone()).unwrap();
            }),
        )
        .unwrap();
    assert_eq!(bridge.pending_replies(), 1);

    let request = next_frame(&mut peer).await;
    assert_eq!(request.frame_type, FrameType::Send);
    assert_eq!(request.address.as_deref(), Some("orders"));
    assert_eq!(request.body, Some(json!({"id": 7})));
    let token = request.reply_address.expect("request carries a reply token");

    push_frame(&mut peer, &delivery(&token, json!("confirmed"))).await;
    assert_eq!(recv(&mut rx).await, json!("confirmed"));
    assert_eq!(bridge.pending_replies(), 0);
}

#[tokio::test]
async fn reply_token_is_single_use() {
    let (bridge, mut peer) = bridge_pair(quiet_options()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    bridge
        .send_with_reply(
            "orders",
            "q",
            message_handler(move |msg| {
                tx.send(msg.body().clone()).unwrap();
            }),
        )
        .unwrap();
    let token = next_frame(&mut peer).await.reply_address.unwrap();

    // Duplicate replies: only the first is delivered, the second is a
    // stale-token frame and must be dropped without effect.
    push_frame(&mut peer, &delivery(&token, json!(1))).await;
    push_frame(&mut peer, &delivery(&token, json!(2))).await;
    // Fence through the live connection: a later delivery still works.
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    bridge
        .register_handler(
            "after",
            message_handler(move |msg| {
                tx2.send(msg.body().clone()).unwrap();
            }),
        )
        .unwrap();
    next_frame(&mut peer).await;
    push_frame(&mut peer, &delivery("after", json!("still alive"))).await;

    assert_eq!(recv(&mut rx).await, json!(1));
    assert_eq!(recv(&mut rx2).await, json!("still alive"));
    assert!(rx.try_recv().is_err());
    assert_eq!(bridge.pending_replies(), 0);
}

#[tokio::test]
async fn reply_chain_extends_hop_by_hop() {
    let (bridge, mut peer) = bridge_pair(quiet_options()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    // First reply arrives with its own reply token; answer it and await
    // the counter-reply on a fresh token.
    let done = tx.clone();
    bridge
        .send_with_reply(
            "negotiate",
            "opening offer",
            message_handler(move |msg| {
                let done = done.clone();
                msg.reply_with(
                    "counter offer",
                    message_handler(move |final_msg| {
                        done.send(final_msg.body().clone()).unwrap();
                    }),
                )
                .unwrap();
            }),
        )
        .unwrap();

    let opening = next_frame(&mut peer).await;
    let first_token = opening.reply_address.unwrap();

    // Peer replies and asks for a counter-reply.
    let peer_token = "peer-reply-1";
    push_frame(
        &mut peer,
        &Envelope {
            frame_type: FrameType::Rec,
            address: Some(first_token),
            body: Some(json!("rejected")),
            reply_address: Some(peer_token.to_string()),
        },
    )
    .await;

    // The counter offer goes to the peer's token, with a second fresh token.
    let counter = next_frame(&mut peer).await;
    assert_eq!(counter.address.as_deref(), Some(peer_token));
    assert_eq!(counter.body, Some(json!("counter offer")));
    let second_token = counter.reply_address.unwrap();

    push_frame(&mut peer, &delivery(&second_token, json!("deal"))).await;
    assert_eq!(recv(&mut rx).await, json!("deal"));
    assert_eq!(bridge.pending_replies(), 0);
}

#[tokio::test]
async fn handler_unregisters_itself_mid_dispatch() {
    let (bridge, mut peer) = bridge_pair(quiet_options()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    bridge
        .register_handler(
            "once",
            message_handler(move |msg| {
                tx.send(msg.body().clone()).unwrap();
                msg.unregister().unwrap();
            }),
        )
        .unwrap();
    assert_eq!(next_frame(&mut peer).await.frame_type, FrameType::Register);

    push_frame(&mut peer, &delivery("once", json!(1))).await;
    push_frame(&mut peer, &delivery("once", json!(2))).await;

    assert_eq!(recv(&mut rx).await, json!(1));
    // Unregistering inside dispatch emits the frame immediately.
    let frame = next_frame(&mut peer).await;
    assert_eq!(frame.frame_type, FrameType::Unregister);
    assert_eq!(frame.address.as_deref(), Some("once"));
    assert!(rx.try_recv().is_err());
    assert_eq!(bridge.handlers_at("once"), 0);
}

#[tokio::test]
async fn handlers_and_reply_tokens_share_the_address_namespace() {
    let (bridge, mut peer) = bridge_pair(quiet_options()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let reply_tx = tx.clone();
    bridge
        .send_with_reply(
            "orders",
            "q",
            message_handler(move |_| {
                reply_tx.send("reply").unwrap();
            }),
        )
        .unwrap();
    let token = next_frame(&mut peer).await.reply_address.unwrap();

    // A subscription under the token's address sees the same frame.
    let sub_tx = tx.clone();
    bridge
        .register_handler(
            &token,
            message_handler(move |_| {
                sub_tx.send("subscription").unwrap();
            }),
        )
        .unwrap();
    next_frame(&mut peer).await;

    push_frame(&mut peer, &delivery(&token, json!("x"))).await;

    // Subscription handlers fire before the one-shot reply handler.
    assert_eq!(recv(&mut rx).await, "subscription");
    assert_eq!(recv(&mut rx).await, "reply");
}

#[tokio::test]
async fn err_frames_reach_the_error_callback_only() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel::<()>();
    let options = quiet_options().on_error(move |frame| {
        tx.send(frame.body.clone()).unwrap();
    });
    let (bridge, mut peer) = bridge_pair(options).await;

    bridge
        .register_handler(
            "test",
            message_handler(move |_| {
                delivered_tx.send(()).unwrap();
            }),
        )
        .unwrap();
    next_frame(&mut peer).await;

    // An err frame, even one naming a registered address, never reaches
    // subscription handlers.
    push_frame(
        &mut peer,
        &Envelope {
            frame_type: FrameType::Err,
            address: Some("test".into()),
            body: Some(json!("access denied")),
            reply_address: None,
        },
    )
    .await;
    push_frame(&mut peer, &delivery("test", json!("after"))).await;

    assert_eq!(recv(&mut rx).await, Some(json!("access denied")));
    recv(&mut delivered_rx).await;
    assert!(delivered_rx.try_recv().is_err());
}

#[tokio::test]
async fn keepalive_pings_flow_on_the_configured_interval() {
    let options = ConnectOptions::new().ping_interval(Duration::from_millis(20));
    let (_bridge, mut peer) = bridge_pair(options).await;

    for _ in 0..3 {
        let msg = timeout(Duration::from_secs(5), peer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(msg, WsMessage::text(r#"{"type":"ping"}"#));
    }
}

#[tokio::test]
async fn close_completes_the_websocket_handshake_and_stops_pings() {
    let options = ConnectOptions::new().ping_interval(Duration::from_millis(20));
    let (bridge, mut peer) = bridge_pair(options).await;

    bridge.close();
    assert!(!bridge.is_open());
    assert!(matches!(
        bridge.send("test", "late").unwrap_err(),
        BridgeError::Closed
    ));

    // Drain any pings queued before the close; the stream must end with a
    // close frame rather than pings forever.
    loop {
        match timeout(Duration::from_secs(5), peer.next()).await.unwrap() {
            Some(Ok(WsMessage::Text(_))) => continue,
            Some(Ok(WsMessage::Close(_))) | None => break,
            other => panic!("unexpected item after close: {other:?}"),
        }
    }
}

#[tokio::test]
async fn peer_close_tears_the_bridge_down() {
    let (bridge, mut peer) = bridge_pair(quiet_options()).await;
    bridge
        .register_handler("test", message_handler(|_| {}))
        .unwrap();
    next_frame(&mut peer).await;

    peer.close(None).await.unwrap();

    timeout(Duration::from_secs(5), async {
        while bridge.is_open() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("bridge never observed the peer close");
    assert_eq!(bridge.handlers_at("test"), 0);
    assert!(matches!(
        bridge.ping().unwrap_err(),
        BridgeError::Closed
    ));
}

#[tokio::test]
async fn event_handlers_get_a_usable_bridge_handle() {
    let (bridge, mut peer) = bridge_pair(quiet_options()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    bridge
        .register_handler(
            "test",
            event_handler(move |msg, eb| {
                // Re-enter the outbound path synchronously from dispatch.
                eb.send("audit", msg.body().clone()).unwrap();
                tx.send(eb.is_open()).unwrap();
            }),
        )
        .unwrap();
    next_frame(&mut peer).await;

    push_frame(&mut peer, &delivery("test", json!("seen"))).await;

    assert!(recv(&mut rx).await);
    let audit = next_frame(&mut peer).await;
    assert_eq!(audit.frame_type, FrameType::Send);
    assert_eq!(audit.address.as_deref(), Some("audit"));
    assert_eq!(audit.body, Some(json!("seen")));
}

#[tokio::test]
async fn handlers_are_shared_across_bridge_clones() {
    let (bridge, mut peer) = bridge_pair(quiet_options()).await;
    let clone = bridge.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handler = message_handler(move |msg| {
        tx.send(msg.body().clone()).unwrap();
    });
    clone.register_handler("test", handler.clone()).unwrap();
    assert_eq!(bridge.handlers_at("test"), 1);
    next_frame(&mut peer).await;

    push_frame(&mut peer, &delivery("test", json!("shared"))).await;
    assert_eq!(recv(&mut rx).await, json!("shared"));

    bridge.close();
    assert!(!clone.is_open());
}
