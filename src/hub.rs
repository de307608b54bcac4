//! Session hub
//!
//! Registry of signaling sessions. Each session holds up to two bound
//! connections (sides `A` and `B`), a per-side mailbox with watermark-based
//! acknowledgment, and the exactly-once "established" transition.
//!
//! All writes to one connection — relay frames, mailbox pushes, structured
//! events, ping control frames — go through that connection's single bounded
//! channel and are drained by one writer task, so concurrent callers can
//! never interleave partial frames on the transport. Channel handoff is
//! non-blocking and best-effort: a slow or dead peer drops frames instead of
//! blocking delivery to the other side.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{InvalidSide, RegisterError};

/// One of the two roles a connection can occupy within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::A => "A",
            Side::B => "B",
        }
    }

    fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = InvalidSide;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Side::A),
            "B" | "b" => Ok(Side::B),
            _ => Err(InvalidSide),
        }
    }
}

/// A frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A complete JSON text frame, relayed or constructed.
    Text(String),
    /// A ping control frame with an opaque payload.
    Ping(Vec<u8>),
    /// A close frame; the writer sends it and stops.
    Close { code: u16, reason: &'static str },
}

/// Capacity of each connection's outbound channel.
const OUTBOUND_BUFFER: usize = 64;

/// Write side of a bound connection.
///
/// Holds the sending half of the connection's outbound channel; the receiving
/// half is owned by the writer task that drives the actual WebSocket sink.
/// Unbinding compares handles by `Arc` pointer identity, so a stale
/// unregister can never evict a newer binding.
pub struct ConnHandle {
    side: Side,
    tx: mpsc::Sender<OutboundFrame>,
}

impl ConnHandle {
    pub fn new(side: Side, tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self { side, tx }
    }

    /// Open a handle together with the receiver for its writer task.
    pub fn channel(side: Side) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        (Arc::new(Self::new(side, tx)), rx)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// True once the writer task is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Best-effort enqueue; returns whether the frame was accepted.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    fn send_json(&self, payload: &Value) -> bool {
        match serde_json::to_string(payload) {
            Ok(text) => self.send(OutboundFrame::Text(text)),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnHandle")
            .field("side", &self.side)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MailboxItem {
    seq: u64,
    payload: Value,
}

fn send_frame(item: &MailboxItem) -> Value {
    json!({"type": "send", "seq": item.seq, "payload": item.payload})
}

/// Per-session state: two fixed side slots plus mailbox bookkeeping.
struct Session {
    conns: [Option<Arc<ConnHandle>>; 2],
    next_seq: [u64; 2],
    delivered: [u64; 2],
    mailbox: [Vec<MailboxItem>; 2],
    created_at: Instant,
    established_at: Option<Instant>,
}

impl Session {
    fn new() -> Self {
        Self {
            conns: [None, None],
            next_seq: [0, 0],
            delivered: [0, 0],
            mailbox: [Vec::new(), Vec::new()],
            created_at: Instant::now(),
            established_at: None,
        }
    }

    fn bound(&self) -> usize {
        self.conns.iter().flatten().count()
    }
}

/// Registry of live sessions, keyed by session ID.
///
/// One lock guards the whole registry; entry counts are small and every
/// operation is O(1) amortized. Sequence allocation and mailbox mutation
/// happen under the same critical section, which is what makes the
/// per-recipient ordering guarantees hold under contention.
pub struct Hub {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Bind `conn` to `side`, creating the session lazily.
    pub fn register(
        &self,
        session_id: Uuid,
        side: Side,
        conn: Arc<ConnHandle>,
    ) -> Result<(), RegisterError> {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(session_id).or_insert_with(Session::new);
        let slot = &mut session.conns[side.index()];
        if slot.is_some() {
            return Err(RegisterError::SideBusy(side));
        }
        *slot = Some(conn);
        Ok(())
    }

    /// Unbind `conn` if it is still the connection bound to its side; a
    /// stale or duplicate unregister leaves a newer binding untouched. The
    /// session is deleted once no side remains bound.
    pub fn unregister(&self, session_id: Uuid, conn: &Arc<ConnHandle>) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&session_id) {
            for slot in &mut session.conns {
                if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) {
                    *slot = None;
                }
            }
            if session.bound() == 0 {
                sessions.remove(&session_id);
            }
        }
    }

    pub fn room_size(&self, session_id: Uuid) -> usize {
        self.sessions
            .lock()
            .get(&session_id)
            .map_or(0, Session::bound)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Relay a raw frame, unmodified, to every bound connection except the
    /// sender. The frame content is opaque here.
    pub fn broadcast(&self, session_id: Uuid, sender: &Arc<ConnHandle>, raw: &str) {
        let sessions = self.sessions.lock();
        if let Some(session) = sessions.get(&session_id) {
            for conn in session.conns.iter().flatten() {
                if !Arc::ptr_eq(conn, sender) {
                    conn.send(OutboundFrame::Text(raw.to_owned()));
                }
            }
        }
    }

    /// Deliver a structured event to every bound connection in one session.
    /// Best-effort: a failed write on one connection never blocks the other.
    pub fn broadcast_event(&self, session_id: Uuid, payload: &Value) {
        let sessions = self.sessions.lock();
        if let Some(session) = sessions.get(&session_id) {
            for conn in session.conns.iter().flatten() {
                conn.send_json(payload);
            }
        }
    }

    /// Deliver a structured event to every connection in every session.
    pub fn broadcast_event_all(&self, payload: &Value) {
        let sessions = self.sessions.lock();
        for session in sessions.values() {
            for conn in session.conns.iter().flatten() {
                conn.send_json(payload);
            }
        }
    }

    /// Queue a mailbox item for `to` and return its sequence number. If the
    /// recipient is currently bound, the item is also pushed immediately;
    /// it stays queued regardless of push success and is replayed on the
    /// recipient's next [`Hub::hello`].
    pub fn enqueue(&self, session_id: Uuid, _from: Side, to: Side, payload: Value) -> u64 {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(session_id).or_insert_with(Session::new);
        let i = to.index();
        let seq = session.next_seq[i];
        session.next_seq[i] = seq + 1;
        let item = MailboxItem { seq, payload };
        if let Some(conn) = &session.conns[i] {
            conn.send_json(&send_frame(&item));
        }
        session.mailbox[i].push(item);
        seq
    }

    /// Resume-after-reconnect: advance the side's watermark, trim
    /// acknowledged items, and replay everything still queued to the bound
    /// connection.
    ///
    /// A `delivered_up_to` of 0 means "nothing delivered yet" and neither
    /// advances nor trims, so a seq-0 item enqueued before the recipient
    /// first connected is still replayed.
    pub fn hello(&self, session_id: Uuid, side: Side, delivered_up_to: u64) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&session_id) {
            let i = side.index();
            if delivered_up_to > session.delivered[i] {
                session.delivered[i] = delivered_up_to;
            }
            let watermark = session.delivered[i];
            if watermark > 0 {
                session.mailbox[i].retain(|item| item.seq > watermark);
            }
            if let Some(conn) = &session.conns[i] {
                for item in &session.mailbox[i] {
                    conn.send_json(&send_frame(item));
                }
            }
        }
    }

    /// Pure acknowledgment: advance the watermark and drop every item with
    /// sequence `<= up_to`. Never re-pushes.
    pub fn ack_up_to(&self, session_id: Uuid, side: Side, up_to: u64) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&session_id) {
            let i = side.index();
            if up_to > session.delivered[i] {
                session.delivered[i] = up_to;
            }
            session.mailbox[i].retain(|item| item.seq > up_to);
        }
    }

    /// Record the session's first establishment. The first call returns the
    /// elapsed time since session creation and `true`; every later call
    /// returns `(0, false)`.
    pub fn mark_established(&self, session_id: Uuid) -> (Duration, bool) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&session_id) {
            if session.established_at.is_none() {
                let now = Instant::now();
                session.established_at = Some(now);
                return (now.duration_since(session.created_at), true);
            }
        }
        (Duration::ZERO, false)
    }

    /// Send a ping control frame to one side's bound connection, if any.
    pub fn ping(&self, session_id: Uuid, side: Side, payload: Vec<u8>) {
        let sessions = self.sessions.lock();
        if let Some(session) = sessions.get(&session_id) {
            if let Some(conn) = &session.conns[side.index()] {
                conn.send(OutboundFrame::Ping(payload));
            }
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
