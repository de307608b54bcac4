//! Error types for the rendezvous store and session hub

use thiserror::Error;

use crate::hub::Side;

/// Errors surfaced by the rendezvous code store.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RendezvousError {
    /// All 10,000 codes are live and unexpired.
    #[error("code-space exhausted")]
    Exhausted,

    /// Unknown, expired, or already-redeemed code.
    #[error("invalid or expired code")]
    Gone,

    /// Empty code after trimming.
    #[error("missing code")]
    MissingCode,

    /// Non-digit or wrong-length code, rejected before lookup.
    #[error("malformed code")]
    InvalidCode,
}

/// Errors surfaced when binding a connection to a session side.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegisterError {
    /// The side already has a live connection bound.
    #[error("side {0} busy")]
    SideBusy(Side),
}

/// A side label other than `A` or `B`.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("side must be \"A\" or \"B\"")]
pub struct InvalidSide;
