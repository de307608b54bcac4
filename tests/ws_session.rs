//! End-to-end signaling tests against a live server on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use pairlink_server::{AppState, Config, Hub, Metrics, Store, router};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn dev_config() -> Config {
    Config::parse_from(["pairlink-signaling", "--dev"])
}

async fn spawn_app(config: Config) -> SocketAddr {
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let store = Arc::new(Store::new(config.code_ttl()));
    let hub = Arc::new(Hub::new());
    let state = AppState::new(config, store, hub, metrics);
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("serve");
    });
    addr
}

fn ws_url(addr: SocketAddr, session: Uuid, side: &str) -> String {
    format!("ws://{addr}/ws?sessionID={session}&side={side}")
}

async fn dial(addr: SocketAddr, session: Uuid, side: &str) -> Ws {
    let (ws, _) = connect_async(ws_url(addr, session, side))
        .await
        .unwrap_or_else(|err| panic!("dial {side} failed: {err}"));
    ws
}

/// Read frames until one parses as JSON with the wanted `type`, skipping
/// control frames and unrelated events. Returns the parsed value and the raw
/// text it came from.
async fn read_until_type(ws: &mut Ws, wanted: &str) -> (Value, String) {
    for _ in 0..20 {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"))
            .expect("stream open")
            .expect("read");
        if let Message::Text(text) = msg {
            let value: Value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(err) => panic!("unparseable frame {text:?}: {err}"),
            };
            if value["type"] == wanted {
                return (value, text);
            }
        }
    }
    panic!("gave up waiting for {wanted:?}");
}

async fn send_text(ws: &mut Ws, text: &str) {
    ws.send(Message::Text(text.to_owned())).await.expect("send");
}

#[tokio::test]
async fn second_join_fills_the_room_and_relays_raw_frames() {
    let addr = spawn_app(dev_config()).await;
    let session = Uuid::new_v4();

    let mut a = dial(addr, session, "A").await;
    let mut b = dial(addr, session, "B").await;

    // Both sides learn the room is full.
    read_until_type(&mut a, "room_full").await;
    read_until_type(&mut b, "room_full").await;

    // Relay is byte-for-byte: whatever A wrote is what B reads.
    let offer = r#"{"type":"offer","sdp":"v=0 fake"}"#;
    send_text(&mut a, offer).await;
    let (_, raw) = read_until_type(&mut b, "offer").await;
    assert_eq!(raw, offer);

    let answer = r#"{"type":"answer","sdp":"v=0 reply"}"#;
    send_text(&mut b, answer).await;
    let (_, raw) = read_until_type(&mut a, "answer").await;
    assert_eq!(raw, answer);
}

#[tokio::test]
async fn mail_sent_before_connect_is_replayed_on_hello() {
    let addr = spawn_app(dev_config()).await;
    let session = Uuid::new_v4();

    let mut a = dial(addr, session, "A").await;
    send_text(&mut a, r#"{"type":"send","to":"B","payload":{"note":"hi"}}"#).await;

    let mut b = dial(addr, session, "B").await;
    send_text(&mut b, r#"{"type":"hello","deliveredUpTo":0}"#).await;

    let (frame, _) = read_until_type(&mut b, "send").await;
    assert_eq!(frame["seq"], 0);
    assert_eq!(frame["payload"]["note"], "hi");
}

#[tokio::test]
async fn delivered_ack_stops_replay() {
    let addr = spawn_app(dev_config()).await;
    let session = Uuid::new_v4();

    let mut a = dial(addr, session, "A").await;
    send_text(&mut a, r#"{"type":"send","to":"B","payload":{"note":"hi"}}"#).await;

    let mut b = dial(addr, session, "B").await;
    send_text(&mut b, r#"{"type":"hello","deliveredUpTo":0}"#).await;
    let (frame, _) = read_until_type(&mut b, "send").await;
    assert_eq!(frame["seq"], 0);

    // Acknowledge seq 0, then hello again; give the server a moment to
    // process both before probing with a relay frame.
    send_text(&mut b, r#"{"type":"delivered","upTo":0}"#).await;
    send_text(&mut b, r#"{"type":"hello","deliveredUpTo":0}"#).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Everything B reads from here to the probe must be the probe itself:
    // a "send" frame would mean the acked item was replayed.
    send_text(&mut a, r#"{"type":"offer","sdp":"probe"}"#).await;
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), b.next())
            .await
            .expect("probe arrives")
            .expect("stream open")
            .expect("read");
        if let Message::Text(text) = msg {
            let frame: Value = serde_json::from_str(&text).expect("json frame");
            assert_ne!(frame["type"], "send", "acked mail was replayed");
            if frame["type"] == "offer" {
                assert_eq!(frame["sdp"], "probe");
                break;
            }
        }
    }
}

#[tokio::test]
async fn duplicate_side_is_closed_with_policy_violation() {
    let addr = spawn_app(dev_config()).await;
    let session = Uuid::new_v4();

    let mut a = dial(addr, session, "A").await;
    let mut intruder = dial(addr, session, "A").await;

    let mut saw_close = false;
    for _ in 0..5 {
        match tokio::time::timeout(Duration::from_secs(2), intruder.next())
            .await
            .expect("frame before close")
        {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), 1008);
                assert_eq!(frame.reason, "side-busy");
                saw_close = true;
                break;
            }
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    }
    assert!(saw_close, "intruder was not closed");

    // The original binding is untouched: B can still join and pair up.
    let mut b = dial(addr, session, "B").await;
    read_until_type(&mut a, "room_full").await;
    read_until_type(&mut b, "room_full").await;
}

#[tokio::test]
async fn fast_heartbeat_never_corrupts_relayed_frames() {
    let mut config = dev_config();
    config.heartbeat_ms = 1_000;
    let addr = spawn_app(config).await;
    let session = Uuid::new_v4();

    let mut a = dial(addr, session, "A").await;
    let mut b = dial(addr, session, "B").await;

    // Hammer relays for over a second so server pings tick mid-stream;
    // every frame B reads must parse as exactly one well-formed message,
    // in order.
    for i in 0..150u32 {
        let offer = format!(r#"{{"type":"offer","sdp":"{i}"}}"#);
        send_text(&mut a, &offer).await;
        let (frame, raw) = read_until_type(&mut b, "offer").await;
        assert_eq!(raw, offer);
        assert_eq!(frame["sdp"], i.to_string());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn departure_notifies_the_remaining_side() {
    let addr = spawn_app(dev_config()).await;
    let session = Uuid::new_v4();

    let mut a = dial(addr, session, "A").await;
    let mut b = dial(addr, session, "B").await;
    read_until_type(&mut a, "room_full").await;
    read_until_type(&mut b, "room_full").await;

    b.close(None).await.expect("close B");

    let (frame, _) = read_until_type(&mut a, "peer-left").await;
    assert_eq!(frame["peerId"], "B");
}

#[tokio::test]
async fn malformed_query_is_rejected_before_upgrade() {
    let addr = spawn_app(dev_config()).await;

    let bad_session = format!("ws://{addr}/ws?sessionID=nope&side=A");
    assert!(connect_async(bad_session).await.is_err());

    let bad_side = format!("ws://{addr}/ws?sessionID={}&side=C", Uuid::new_v4());
    assert!(connect_async(bad_side).await.is_err());
}

#[tokio::test]
async fn origin_allowlist_gates_browser_clients() {
    let mut config = Config::parse_from(["pairlink-signaling"]);
    config.allowed_origins = vec!["example.org".into()];
    let addr = spawn_app(config).await;
    let session = Uuid::new_v4();

    let mut rejected = ws_url(addr, session, "A").into_client_request().expect("request");
    rejected
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("https://evil.net"));
    assert!(connect_async(rejected).await.is_err());

    let mut allowed = ws_url(addr, session, "A").into_client_request().expect("request");
    allowed
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("https://example.org"));
    assert!(connect_async(allowed).await.is_ok());

    // Non-browser clients carry no origin and are always admitted.
    assert!(connect_async(ws_url(addr, session, "B")).await.is_ok());
}

#[tokio::test]
async fn upgrade_rate_limit_rejects_excess_dials() {
    let mut config = dev_config();
    config.ws_rate_per_min = 2;
    let addr = spawn_app(config).await;

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let _a = dial(addr, first, "A").await;
    let _b = dial(addr, second, "A").await;

    assert!(connect_async(ws_url(addr, Uuid::new_v4(), "A")).await.is_err());
}
