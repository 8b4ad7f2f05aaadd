//! MPC coordination utilities
//!
//! Sessions never touch the network. A [`Relay`] is the caller-side piece
//! that carries their envelopes between parties.

use crate::{message::Envelope, PartyId, Result};

/// Message relay for MPC communication
pub trait Relay {
    /// Queue an envelope for delivery: broadcasts go to every other party,
    /// direct envelopes to their addressee
    fn post(&mut self, envelope: Envelope) -> Result<()>;

    /// Drain everything queued for `party`
    fn take(&mut self, party: PartyId) -> Vec<Envelope>;
}

/// In-memory relay for testing
pub mod memory;

pub use memory::MemoryRelay;
