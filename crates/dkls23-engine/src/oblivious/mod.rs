//! Oblivious Transfer (OT) primitives
//!
//! This module provides the OT layers used by keygen and signing:
//! - Simplest OT (Diffie-Hellman base OT)
//! - SoftSpokenOT with k = 1 (OT extension over seed OTs)
//! - Gilboa multiplication on top of either

pub mod base_ot;
pub mod mta;
pub mod soft_spoken;

pub use base_ot::SimplestOt;
pub use mta::MtaResponse;
pub use soft_spoken::{ExtensionMatrix, SoftSpokenOt};

use crate::types::{PartyId, SessionId};

/// Ordered pair of parties running one batch of transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairContext {
    pub(crate) session_id: SessionId,
    pub(crate) sender: PartyId,
    pub(crate) receiver: PartyId,
}

impl PairContext {
    pub(crate) fn new(session_id: SessionId, sender: PartyId, receiver: PartyId) -> Self {
        Self {
            session_id,
            sender,
            receiver,
        }
    }

    /// Bytes binding a derivation to this session and direction
    pub(crate) fn domain(&self) -> [u8; 34] {
        let mut domain = [0u8; 34];
        domain[..32].copy_from_slice(&self.session_id);
        domain[32] = self.sender;
        domain[33] = self.receiver;
        domain
    }
}

/// Unpack little-endian bits
pub(crate) fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count).map(|i| bit(bytes, i)).collect()
}

pub(crate) fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &set) in bits.iter().enumerate() {
        if set {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

pub(crate) fn bit(bytes: &[u8], index: usize) -> bool {
    (bytes[index / 8] >> (index % 8)) & 1 == 1
}
