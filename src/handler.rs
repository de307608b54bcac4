//! WebSocket signaling handler
//!
//! One connection lifecycle: gate (query, origin, rate limit) strictly before
//! the upgrade, bind the side in the hub, then run three tasks until the
//! connection dies — a writer draining the outbound channel into the socket,
//! a heartbeat ticker pinging through the hub, and the read loop dispatching
//! inbound frames. Every termination path unregisters the connection and
//! notifies the remaining side.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::{ConnHandle, OutboundFrame, Side};
use crate::protocol::{self, FrameKind, InboundFrame};
use crate::ratelimit::client_key;
use crate::routes::AppState;

/// Per-write deadline applied by the writer task, so one dead peer cannot
/// wedge its writer.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code for policy rejections (side already bound).
const CLOSE_POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "sessionID", default)]
    pub session_id: String,
    #[serde(default)]
    pub side: String,
}

/// `GET /ws?sessionID=<uuid>&side=A|B` — gate, then upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let Ok(session_id) = Uuid::parse_str(query.session_id.trim()) else {
        return (StatusCode::BAD_REQUEST, "bad query").into_response();
    };
    let Ok(side) = query.side.parse::<Side>() else {
        return (StatusCode::BAD_REQUEST, "bad query").into_response();
    };

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.config.dev && !origin_allowed(origin, &state.config.allowed_origins) {
        warn!(?origin, "ws origin rejected");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    if let Some(limiter) = &state.ws_limiter {
        if !limiter.allow(&client_key(&headers, Some(addr))) {
            return (StatusCode::TOO_MANY_REQUESTS, "rate limit").into_response();
        }
    }

    ws.max_message_size(state.config.ws_max_msg)
        .on_upgrade(move |socket| serve_socket(state, socket, session_id, side, addr))
}

async fn serve_socket(
    state: AppState,
    socket: WebSocket,
    session_id: Uuid,
    side: Side,
    addr: SocketAddr,
) {
    state.metrics.ws_connections.inc();

    let (sink, stream) = socket.split();
    let (conn, outbound) = ConnHandle::channel(side);
    let writer = tokio::spawn(write_loop(sink, outbound));

    if let Err(err) = state.hub.register(session_id, side, conn.clone()) {
        info!(%session_id, %side, "join rejected: {err}");
        conn.send(OutboundFrame::Close {
            code: CLOSE_POLICY_VIOLATION,
            reason: "side-busy",
        });
        drop(conn);
        let _ = writer.await;
        return;
    }

    info!(%session_id, %side, remote = %addr, "ws joined");
    state.metrics.peers_active.inc();
    state
        .metrics
        .sessions_active
        .set(state.hub.session_count() as i64);

    if state.hub.room_size(session_id) == 2 {
        state.hub.broadcast_event(session_id, &protocol::room_full());
    }

    let heartbeat = tokio::spawn(heartbeat_loop(
        state.clone(),
        session_id,
        side,
        conn.clone(),
    ));

    read_loop(&state, stream, session_id, side, &conn).await;

    heartbeat.abort();
    state.hub.unregister(session_id, &conn);
    state
        .hub
        .broadcast_event(session_id, &protocol::peer_left(side));
    state.metrics.peers_active.dec();
    state
        .metrics
        .sessions_active
        .set(state.hub.session_count() as i64);
    info!(%session_id, %side, "ws closed");
}

/// Drain the outbound channel into the socket. The single consumer is what
/// serializes relay frames, mailbox pushes, events, and pings on the wire.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = outbound.recv().await {
        let closing = matches!(frame, OutboundFrame::Close { .. });
        let message = to_ws_message(frame);
        match tokio::time::timeout(WRITE_TIMEOUT, sink.send(message)).await {
            Ok(Ok(())) if !closing => {}
            _ => break,
        }
    }
}

fn to_ws_message(frame: OutboundFrame) -> Message {
    match frame {
        OutboundFrame::Text(text) => Message::Text(text),
        OutboundFrame::Ping(payload) => Message::Ping(payload),
        OutboundFrame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

/// Ping through the hub on a fixed cadence, carrying the send timestamp so
/// the pong yields a round-trip measurement. The first ping goes out
/// immediately, which is what arms the read deadline extension; the task
/// dies with the connection's writer.
async fn heartbeat_loop(state: AppState, session_id: Uuid, side: Side, conn: Arc<ConnHandle>) {
    let mut ticker = tokio::time::interval(state.config.heartbeat().mul_f64(0.9));
    loop {
        ticker.tick().await;
        if conn.is_closed() {
            break;
        }
        let payload = Utc::now().timestamp_millis().to_string().into_bytes();
        state.hub.ping(session_id, side, payload);
    }
}

async fn read_loop(
    state: &AppState,
    mut stream: SplitStream<WebSocket>,
    session_id: Uuid,
    side: Side,
    conn: &Arc<ConnHandle>,
) {
    // The first pong must land within the handshake window; after that every
    // keepalive extends the deadline by a full heartbeat interval.
    let mut deadline = Instant::now() + state.config.handshake();
    loop {
        let message = match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => {
                debug!(%session_id, %side, "read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                state.metrics.ws_errors.inc();
                debug!(%session_id, %side, "ws read error: {err}");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => handle_frame(state, session_id, side, conn, &text),
            Message::Pong(payload) => {
                deadline = Instant::now() + state.config.heartbeat();
                if let Some(rtt) = rtt_from_echo(&payload) {
                    state.metrics.heartbeat_rtt_seconds.observe(rtt);
                    debug!(%session_id, %side, rtt_ms = rtt * 1000.0, "pong");
                }
            }
            // The library answers pings itself; a ping is still proof of life.
            Message::Ping(_) => deadline = Instant::now() + state.config.heartbeat(),
            Message::Close(_) => break,
            Message::Binary(_) => {}
        }
    }
}

/// Dispatch one inbound text frame. Malformed JSON and unknown types are
/// ignored; no frame type ever closes the connection.
fn handle_frame(state: &AppState, session_id: Uuid, side: Side, conn: &Arc<ConnHandle>, text: &str) {
    let Ok(frame) = serde_json::from_str::<InboundFrame>(text) else {
        state
            .metrics
            .ws_messages
            .with_label_values(&[FrameKind::Unknown.label()])
            .inc();
        return;
    };

    let kind = FrameKind::parse(&frame.kind);
    state
        .metrics
        .ws_messages
        .with_label_values(&[kind.label()])
        .inc();

    match kind {
        // SDP/ICE relay: the raw frame goes to the other side unchanged.
        FrameKind::Relay => state.hub.broadcast(session_id, conn, text),
        FrameKind::Hello => {
            state
                .hub
                .hello(session_id, side, frame.delivered_up_to.unwrap_or(0));
        }
        FrameKind::Send => {
            let to = frame.to.as_deref().and_then(|s| s.parse::<Side>().ok());
            if let (Some(to), Some(payload)) = (to, frame.payload) {
                state.hub.enqueue(session_id, side, to, payload);
            }
        }
        FrameKind::Delivered => {
            if let Some(up_to) = frame.up_to {
                state.hub.ack_up_to(session_id, side, up_to);
            }
        }
        FrameKind::Telemetry => match frame.event.as_deref() {
            Some("ice-connected") => {
                let (elapsed, first) = state.hub.mark_established(session_id);
                if first {
                    state.metrics.established.inc();
                    state.metrics.establish_seconds.observe(elapsed.as_secs_f64());
                    info!(%session_id, elapsed_ms = elapsed.as_millis() as u64, "established");
                }
            }
            Some("ice-failed") => state.metrics.ice_failures.inc(),
            _ => {}
        },
        FrameKind::Unknown => {}
    }
}

fn rtt_from_echo(payload: &[u8]) -> Option<f64> {
    let sent: i64 = std::str::from_utf8(payload).ok()?.parse().ok()?;
    let elapsed_ms = Utc::now().timestamp_millis().checked_sub(sent)?;
    (elapsed_ms >= 0).then(|| elapsed_ms as f64 / 1000.0)
}

/// Origin gate: an absent origin (non-browser client) is always allowed;
/// otherwise the origin must match the allowlist exactly or by bare hostname.
fn origin_allowed(origin: Option<&str>, allowed: &[String]) -> bool {
    let Some(origin) = origin else {
        return true;
    };
    let host = origin_host(origin);
    allowed
        .iter()
        .any(|entry| entry == origin || entry == host)
}

/// `https://app.example.com:8443` -> `app.example.com`
fn origin_host(origin: &str) -> &str {
    let rest = origin
        .split_once("://")
        .map_or(origin, |(_, rest)| rest);
    let rest = rest.split('/').next().unwrap_or(rest);
    match rest.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => rest,
    }
}
