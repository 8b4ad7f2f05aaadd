//! # DKLs23 Engine
//!
//! Round-driven session engine for DKLs23-style threshold ECDSA over secp256k1.
//!
//! This crate provides:
//! - Distributed Key Generation (DKG), including key rotation and lost-share recovery
//! - Distributed Signature Generation (DSG) over fresh base OTs or over the
//!   OT extension seeded at keygen
//!
//! ## Protocol Overview
//!
//! Every protocol run is a set of sessions, one per party. A session never
//! performs I/O: the caller feeds it the envelopes it received and forwards
//! the envelopes it returns. Any failed verification names the party whose
//! message failed, so the caller can exclude it and retry.
//!
//! ## Example
//!
//! ```rust
//! use dkls23_engine::{keygen::KeygenSession, mpc::memory, sign::BaseSignSession};
//!
//! let sessions = (0..3)
//!     .map(|id| KeygenSession::new(3, 2, id, None))
//!     .collect::<Result<Vec<_>, _>>()?;
//! let shares = memory::run_keygen(sessions)?;
//!
//! let digest = [7u8; 32];
//! let signers = vec![
//!     BaseSignSession::new(&shares[0], "m", None)?,
//!     BaseSignSession::new(&shares[2], "m", None)?,
//! ];
//! let signatures = memory::run_sign(signers, &digest)?;
//! signatures[0].verify_prehash(&shares[0].public_key(), &digest)?;
//! # Ok::<(), dkls23_engine::Error>(())
//! ```

pub mod error;
pub mod keygen;
pub mod keyshare;
pub mod message;
pub mod mpc;
pub mod sign;
pub mod types;

mod channel;
mod oblivious;
mod proofs;
mod session;
mod utils;

pub use error::{Error, Offender, Result};
pub use keygen::{KeygenRole, KeygenSession};
pub use keyshare::Keyshare;
pub use message::{Envelope, ProtocolTag};
pub use session::Round;
pub use sign::{BaseSignSession, OtSignSession, SignSession, SignVariant};
pub use types::{PartyConfig, PartyId, PublicKey, SessionId, Signature};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Seed OTs established per ordered pair at keygen
pub const SEED_OT_BATCH: usize = 128;

/// Choice bits per multiplication: 256 binary digits plus 128 random ones
pub const MTA_BITS: usize = 256 + 128;

/// Size of one keygen commitment digest
pub const COMMITMENT_SIZE: usize = 32;
