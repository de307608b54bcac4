//! Rendezvous code store
//!
//! Mints short-lived 4-digit numeric codes redeemable exactly once for a
//! session ID. The codespace is bounded (10,000 values); expired slots are
//! reclaimed inline by [`Store::create_code`] and [`Store::redeem`], and
//! swept periodically by the janitor task.

use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use rand::rngs::OsRng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::error::RendezvousError;

/// Number of distinct 4-digit codes.
const CODE_SPACE: usize = 10_000;

#[derive(Debug, Clone)]
struct CodeEntry {
    session_id: Uuid,
    expires_at: DateTime<Utc>,
}

/// A freshly minted rendezvous code.
#[derive(Debug, Clone)]
pub struct MintedCode {
    pub code: String,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// In-memory store mapping live codes to session IDs.
///
/// A single lock guards the whole table; the keyspace is at most 10,000
/// entries and every operation is O(1) amortized, so coarse locking is what
/// makes single-use redemption trivially correct under contention.
pub struct Store {
    ttl: chrono::Duration,
    codes: Mutex<HashMap<String, CodeEntry>>,
}

impl Store {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::milliseconds(ttl.as_millis() as i64),
            codes: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a fresh (unused or reclaimed) numeric code with a new session ID.
    ///
    /// The returned code is guaranteed not to be currently usable by anyone
    /// else. Fails with [`RendezvousError::Exhausted`] when all 10,000 codes
    /// are live and unexpired, after an opportunistic expiry sweep.
    pub fn create_code(&self) -> Result<MintedCode, RendezvousError> {
        let mut codes = self.codes.lock();

        let now = Utc::now();
        let session_id = Uuid::new_v4();
        let expires_at = now + self.ttl;

        // If the space looks fully occupied, reclaim expired entries first
        // (in case the janitor hasn't yet), then fail fast if it still is.
        if codes.len() >= CODE_SPACE {
            codes.retain(|_, e| now <= e.expires_at);
            if codes.len() >= CODE_SPACE {
                return Err(RendezvousError::Exhausted);
            }
        }

        // Try up to the keyspace size to find a free (or expired) code. In
        // practice the first draw hits; this also reclaims expired slots
        // inline.
        for _ in 0..CODE_SPACE {
            let n: u32 = OsRng.gen_range(0..CODE_SPACE as u32);
            let code = format!("{n:04}");
            match codes.entry(code.clone()) {
                MapEntry::Occupied(mut occupied) => {
                    if now > occupied.get().expires_at {
                        occupied.insert(CodeEntry {
                            session_id,
                            expires_at,
                        });
                        return Ok(MintedCode {
                            code,
                            session_id,
                            expires_at,
                        });
                    }
                    // Still in use; try another.
                }
                MapEntry::Vacant(vacant) => {
                    vacant.insert(CodeEntry {
                        session_id,
                        expires_at,
                    });
                    return Ok(MintedCode {
                        code,
                        session_id,
                        expires_at,
                    });
                }
            }
        }
        Err(RendezvousError::Exhausted)
    }

    /// Consume a code once, returning its session ID and expiry.
    ///
    /// Lookup and deletion happen atomically under the table lock: for N
    /// concurrent redeemers of one code, exactly one succeeds and the rest
    /// get [`RendezvousError::Gone`]. Expired entries are deleted on
    /// observation.
    pub fn redeem(&self, code: &str) -> Result<(Uuid, DateTime<Utc>), RendezvousError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(RendezvousError::MissingCode);
        }
        if !is_valid_code(code) {
            return Err(RendezvousError::InvalidCode);
        }

        let mut codes = self.codes.lock();
        let now = Utc::now();
        match codes.remove(code) {
            None => Err(RendezvousError::Gone),
            // Expired entries stay deleted as a side effect of the lookup.
            Some(entry) if now > entry.expires_at => Err(RendezvousError::Gone),
            Some(entry) => Ok((entry.session_id, entry.expires_at)),
        }
    }

    /// Delete every expired entry.
    fn sweep(&self, now: DateTime<Utc>) {
        let mut codes = self.codes.lock();
        let before = codes.len();
        codes.retain(|_, e| now <= e.expires_at);
        let removed = before - codes.len();
        if removed > 0 {
            debug!(removed, "rendezvous sweep");
        }
    }

    /// Spawn the background janitor sweeping expired codes on a fixed
    /// interval. Exits promptly when `shutdown` is notified. Safe to run
    /// alongside the inline reclamation in `create_code`/`redeem`; deletes
    /// are idempotent.
    pub fn spawn_janitor(
        self: Arc<Self>,
        every: Duration,
        shutdown: Arc<Notify>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let notified = shutdown.notified();
            tokio::pin!(notified);
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately; harmless on an empty table.
            loop {
                tokio::select! {
                    _ = &mut notified => break,
                    _ = ticker.tick() => self.sweep(Utc::now()),
                }
            }
        })
    }
}

/// Codes are numeric, 4 digits today (up to 8 if the space is widened later).
fn is_valid_code(code: &str) -> bool {
    (4..=8).contains(&code.len()) && code.bytes().all(|b| b.is_ascii_digit())
}
