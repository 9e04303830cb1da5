//! Recoverable failures surfaced at the control session boundary.
//!
//! None of these terminate the publish cycle or the request loop; each one
//! becomes a `success = false` response carrying the `Display` text.

use area_pilot_proto::{DecodeError, InputMode};

use crate::sink::InjectionError;

#[derive(Debug, thiserror::Error)]
pub enum PilotError {
    /// Malformed wire bytes
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Damage region uses an encoding the compositor does not understand
    #[error("unsupported region encoding: {0:?}")]
    UnsupportedEncoding(String),

    /// Damage region uses a known encoding but its payload did not decode
    #[error("failed to decode {encoding} region: {reason}")]
    RegionDecode { encoding: String, reason: String },

    /// Operation references a window that is not registered
    #[error("No window {0}")]
    UnknownWindow(u32),

    /// Action requested while the agent may not act
    #[error("AI cannot act in mode: {0}")]
    AuthorityDenied(InputMode),

    /// Mode change to a name outside the enumerated set
    #[error("Invalid mode: {0:?}")]
    InvalidMode(String),

    /// The injection sink failed
    #[error("injection failed: {0}")]
    Injection(#[from] InjectionError),

    /// Action payload is missing a field or has the wrong type
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Unknown request type: {0:?}")]
    UnknownRequestKind(String),

    #[error("Unknown action: {0:?}")]
    UnknownAction(String),

    #[error("Unknown query: {0:?}")]
    UnknownQuery(String),

    /// Snapshot encoder failure
    #[error("snapshot encoding failed: {0}")]
    Snapshot(String),
}

pub type PilotResult<T> = Result<T, PilotError>;
