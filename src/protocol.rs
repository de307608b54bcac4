//! Wire protocol for the signaling WebSocket
//!
//! Every frame is a JSON object with a `type` discriminator. Inbound frames
//! are decoded into a permissive envelope: unknown types and malformed
//! fields are ignored by the read loop rather than closing the connection.
//!
//! Outbound frames:
//! - `{"type":"send","seq":N,"payload":<opaque>}` — mailbox delivery
//! - `{"type":"room_full"}` — both sides are now connected
//! - `{"type":"peer-left","peerId":"A"|"B"}` — the other side went away
//! - `{"type":"server-closing"}` — the process is shutting down

use serde::Deserialize;
use serde_json::{Value, json};

use crate::hub::Side;

/// Permissive envelope for inbound client frames. Only the fields relevant
/// to the declared `type` are ever read; everything else stays opaque and is
/// relayed verbatim where the protocol calls for it.
#[derive(Debug, Default, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Mailbox recipient for `send`.
    #[serde(default)]
    pub to: Option<String>,

    /// Mailbox payload for `send`.
    #[serde(default)]
    pub payload: Option<Value>,

    /// Watermark declared by a reconnecting side in `hello`.
    #[serde(rename = "deliveredUpTo", default)]
    pub delivered_up_to: Option<u64>,

    /// Watermark acknowledged in `delivered`.
    #[serde(rename = "upTo", default)]
    pub up_to: Option<u64>,

    /// Event name for `telemetry` frames.
    #[serde(default)]
    pub event: Option<String>,
}

/// Frame types the read loop understands; everything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// SDP/ICE relay: `offer`, `answer`, `ice`, `sender_ready`.
    Relay,
    Hello,
    Send,
    Delivered,
    Telemetry,
    Unknown,
}

impl FrameKind {
    /// Case-insensitive dispatch; an empty type is unknown.
    pub fn parse(kind: &str) -> FrameKind {
        match kind.to_ascii_lowercase().as_str() {
            "offer" | "answer" | "ice" | "sender_ready" => FrameKind::Relay,
            "hello" => FrameKind::Hello,
            "send" => FrameKind::Send,
            "delivered" => FrameKind::Delivered,
            "telemetry" => FrameKind::Telemetry,
            _ => FrameKind::Unknown,
        }
    }

    /// Stable label for the per-type message counter.
    pub fn label(self) -> &'static str {
        match self {
            FrameKind::Relay => "relay",
            FrameKind::Hello => "hello",
            FrameKind::Send => "send",
            FrameKind::Delivered => "delivered",
            FrameKind::Telemetry => "telemetry",
            FrameKind::Unknown => "unknown",
        }
    }
}

pub fn room_full() -> Value {
    json!({"type": "room_full"})
}

pub fn peer_left(side: Side) -> Value {
    json!({"type": "peer-left", "peerId": side.as_str()})
}

pub fn server_closing() -> Value {
    json!({"type": "server-closing"})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_reads_only_declared_fields() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"send","to":"B","payload":{"note":"hi"}}"#)
                .expect("parse");
        assert_eq!(frame.kind, "send");
        assert_eq!(frame.to.as_deref(), Some("B"));
        assert_eq!(frame.payload, Some(serde_json::json!({"note": "hi"})));
        assert_eq!(frame.delivered_up_to, None);
    }

    #[test]
    fn missing_type_defaults_to_empty() {
        let frame: InboundFrame = serde_json::from_str(r#"{"sdp":"x"}"#).expect("parse");
        assert_eq!(frame.kind, "");
        assert_eq!(FrameKind::parse(&frame.kind), FrameKind::Unknown);
    }

    #[test]
    fn dispatch_is_case_insensitive() {
        assert_eq!(FrameKind::parse("OFFER"), FrameKind::Relay);
        assert_eq!(FrameKind::parse("Hello"), FrameKind::Hello);
        assert_eq!(FrameKind::parse("sender_ready"), FrameKind::Relay);
        assert_eq!(FrameKind::parse("telemetry"), FrameKind::Telemetry);
        assert_eq!(FrameKind::parse("nonsense"), FrameKind::Unknown);
    }

    #[test]
    fn peer_left_carries_the_side_label() {
        let event = peer_left(Side::B);
        assert_eq!(event["type"], "peer-left");
        assert_eq!(event["peerId"], "B");
    }
}
