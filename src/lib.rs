//! Rendezvous + WebRTC signaling server
//!
//! This crate pairs two anonymous peers for WebRTC negotiation. A client
//! mints a short-lived 4-digit rendezvous code, hands it to its peer
//! out-of-band, and the peer redeems it exactly once for an opaque session
//! ID. Both sides then open a WebSocket tagged with that session ID and a
//! side label, and the server relays SDP/ICE frames plus a small ordered
//! mailbox protocol between them.
//!
//! # Endpoints
//!
//! - **POST /rendezvous/code** — mint `{"code","sessionID","expiresAt"}`
//! - **POST /rendezvous/redeem** — body `{"code":"NNNN"}`; `410 Gone` once
//!   used or expired
//! - **GET /ws?sessionID={uuid}&side=A|B** — signaling WebSocket
//! - **GET /healthz**, **GET /readyz**, **GET /metrics**
//!
//! # Wire protocol (WebSocket, JSON frames)
//!
//! Client → server:
//! - `{"type":"offer"|"answer"|"ice"|"sender_ready", ...}` — relayed raw to
//!   the other side
//! - `{"type":"hello","deliveredUpTo":N}` — resume: replay undelivered mail
//! - `{"type":"send","to":"A"|"B","payload":...}` — queue mail for a side
//! - `{"type":"delivered","upTo":N}` — acknowledge mail
//! - `{"type":"telemetry","event":"ice-connected"|"ice-failed"}`
//!
//! Server → client:
//! - `{"type":"send","seq":N,"payload":...}`
//! - `{"type":"room_full"}` — both sides are connected
//! - `{"type":"peer-left","peerId":"A"|"B"}`
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! pairlink-signaling --port 8080 --dev
//!
//! # Mint a code
//! curl -X POST http://127.0.0.1:8080/rendezvous/code
//!
//! # Redeem it on the other device
//! curl -X POST -H 'Content-Type: application/json' \
//!   -d '{"code":"2802"}' http://127.0.0.1:8080/rendezvous/redeem
//! ```
//!
//! Everything is in-memory and single-node; a restart loses all codes and
//! sessions.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod hub;
pub mod metrics;
pub mod protocol;
pub mod ratelimit;
pub mod rendezvous;
pub mod routes;

pub use config::Config;
pub use error::{RegisterError, RendezvousError};
pub use hub::{Hub, Side};
pub use metrics::Metrics;
pub use rendezvous::Store;
pub use routes::{AppState, router};
