//! Error types for DKLs23 sessions

use std::fmt;

use thiserror::Error;

use crate::message::ProtocolTag;

/// Result type alias for DKLs23 operations
pub type Result<T> = std::result::Result<T, Error>;

/// Party blamed for a failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offender {
    /// A specific counterparty sent data that failed verification
    Party(u8),
    /// The failure could not be attributed to a single party
    Unknown,
}

impl fmt::Display for Offender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offender::Party(id) => write!(f, "party {id}"),
            Offender::Unknown => f.write_str("an unknown party"),
        }
    }
}

/// Errors that can occur while driving a keygen or signing session
#[derive(Debug, Error)]
pub enum Error {
    /// Operation called in the wrong session state
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// A single-shot operation was called twice
    #[error("Duplicate call: {0}")]
    DuplicateCall(&'static str),

    /// An inbound message claims to come from this party
    #[error("Message from own party id {0}")]
    SelfMessage(u8),

    /// Broadcast/direct mismatch, or a direct message addressed to someone else
    #[error("Message from party {from} has the wrong addressing (to: {to:?})")]
    WrongParty { from: u8, to: Option<u8> },

    /// A required side input was not supplied
    #[error("Missing input: {0}")]
    MissingInput(&'static str),

    /// Caller-supplied input is malformed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Parties disagree on the run configuration
    #[error("Configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// Cryptographic verification failed; the session is terminated
    #[error("Protocol aborted by {offender}: {reason}")]
    ProtocolAbort { offender: Offender, reason: String },

    /// An envelope belongs to a different protocol or variant
    #[error("Protocol mismatch: party {from} sent a {found} message to a {expected} session")]
    ProtocolMismatch {
        from: u8,
        expected: ProtocolTag,
        found: ProtocolTag,
    },

    /// The session was consumed, either by an earlier abort or by taking its output
    #[error("Session has been consumed")]
    ConsumedSession,

    /// The session cannot be snapshotted in its current state
    #[error("Serialization unsupported: {0}")]
    SerializationUnsupported(String),

    /// Snapshot or keyshare bytes could not be decoded
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Chain path failed to parse or uses hardened steps
    #[error("Invalid derivation path: {0}")]
    InvalidDerivationPath(String),
}

impl Error {
    /// Abort attributed to `party`
    pub(crate) fn abort(party: u8, reason: impl Into<String>) -> Self {
        Error::ProtocolAbort {
            offender: Offender::Party(party),
            reason: reason.into(),
        }
    }

    /// Abort with no attributable culprit
    pub(crate) fn abort_unknown(reason: impl Into<String>) -> Self {
        Error::ProtocolAbort {
            offender: Offender::Unknown,
            reason: reason.into(),
        }
    }

    /// Whether this error terminated the session
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::ProtocolAbort { .. })
    }

    /// The party to blame, when the error is an attributable abort
    pub fn offending_party(&self) -> Option<u8> {
        match self {
            Error::ProtocolAbort {
                offender: Offender::Party(id),
                ..
            } => Some(*id),
            _ => None,
        }
    }

    /// Stable numeric code for bindings that cannot carry rich errors.
    ///
    /// `2` marks an attributable abort: the caller should ban the offending party.
    pub fn code(&self) -> u32 {
        match self {
            Error::ProtocolAbort {
                offender: Offender::Unknown,
                ..
            } => 1,
            Error::ProtocolAbort { .. } => 2,
            Error::InvalidState(_) => 3,
            Error::DuplicateCall(_) => 4,
            Error::SelfMessage(_) => 5,
            Error::WrongParty { .. } => 6,
            Error::MissingInput(_) => 7,
            Error::InvalidInput(_) => 8,
            Error::ConfigurationMismatch(_) => 9,
            Error::ProtocolMismatch { .. } => 10,
            Error::ConsumedSession => 11,
            Error::SerializationUnsupported(_) => 12,
            Error::DeserializationFailed(_) => 13,
            Error::InvalidDerivationPath(_) => 14,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DeserializationFailed(e.to_string())
    }
}
