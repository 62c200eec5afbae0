//! Crate-level error type
//!
//! Every orchestrator step reports one of these; nothing is retried.

use thiserror::Error;

use crate::apdu::SW;
use crate::device::TransportError;
use crate::keys::ReferenceTarget;
use crate::store::StoreError;

/// Errors surfaced by PIV provisioning operations
#[derive(Debug, Error)]
pub enum PivError {
    /// No token could be enumerated or the PIV application is missing
    #[error("No PIV device available: {0}")]
    DeviceUnavailable(String),

    /// The card answered a command with a non-success status word
    #[error("{command} failed: {} (SW {sw:04X})", SW::describe(*.sw))]
    CommandFailed { command: &'static str, sw: u16 },

    /// The candidate management key was rejected
    #[error("Management key authentication failed: {0}")]
    AuthenticationRequired(String),

    /// Random-mode rotation without a usable stored key
    #[error("No usable management key stored under {identifier}: {reason}")]
    ConfigurationMissing { identifier: String, reason: String },

    /// One or more mirror writes failed; the device key was left untouched
    #[error(
        "Failed to persist management key under {}{}",
        .failed.join(", "),
        if *.rolled_back { "" } else { " (rollback incomplete, mirrors disagree)" }
    )]
    StoreWriteFailed { failed: Vec<String>, rolled_back: bool },

    /// The card rejected the presented PIN or PUK
    #[error("{target} verification failed{}", retries_suffix(.retries))]
    VerificationFailed {
        target: ReferenceTarget,
        retries: Option<u8>,
    },

    /// Management key material of the wrong shape
    #[error("Invalid management key: {0}")]
    InvalidKey(String),

    /// Caller-supplied data that cannot be encoded into a command
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// SET MANAGEMENT KEY was sent but its outcome could not be confirmed;
    /// the mirrors keep the new key
    #[error("Management key change not confirmed: {0}")]
    UnconfirmedKeyChange(String),

    /// The card sent something we could not interpret
    #[error("Malformed card response to {command}: {reason}")]
    MalformedResponse { command: &'static str, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn retries_suffix(retries: &Option<u8>) -> String {
    match retries {
        Some(0) => ", blocked".to_string(),
        Some(n) => format!(", {} tries remaining", n),
        None => String::new(),
    }
}

/// Result alias used throughout the crate
pub type PivResult<T> = Result<T, PivError>;
