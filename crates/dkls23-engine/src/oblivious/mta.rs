//! Two-party multiplication (Gilboa, with a randomized encoding)
//!
//! The receiver encodes its input `chi` into `MTA_BITS` choice bits against a
//! public gadget vector: the first 256 gadget entries are powers of two, the
//! rest are random scalars whose bits are random. The sender multiplies two
//! inputs at once (the nonce and the key share) through the same random OTs.
//! Afterwards `sender_share + receiver_share = input * chi` for each input.

use k256::{elliptic_curve::Field, Scalar};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConditionallySelectable};

use super::PairContext;
use crate::{
    types::scalars_serde,
    utils::{hash_to_scalar, kdf, scalar_from_digest},
    MTA_BITS,
};

const BINARY_BITS: usize = 256;

/// Sender's corrections for both inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtaResponse {
    #[serde(with = "scalars_serde")]
    pub(crate) tau_u: Vec<Scalar>,
    #[serde(with = "scalars_serde")]
    pub(crate) tau_v: Vec<Scalar>,
}

/// Public gadget vector of a pair
pub(crate) fn gadget(pair: &PairContext) -> Vec<Scalar> {
    let mut gadget = Vec::with_capacity(MTA_BITS);
    let mut power = Scalar::ONE;
    for _ in 0..BINARY_BITS {
        gadget.push(power);
        power = power.double();
    }
    for l in BINARY_BITS..MTA_BITS {
        gadget.push(hash_to_scalar(
            b"dkls23-engine/mta-gadget",
            &[&pair.domain(), &(l as u32).to_le_bytes()],
        ));
    }
    gadget
}

/// Encode `chi` so that the gadget-weighted sum of the bits equals `chi`
pub(crate) fn encode<R: RngCore + CryptoRng>(
    rng: &mut R,
    chi: &Scalar,
    gadget: &[Scalar],
) -> Vec<bool> {
    let mut bits = vec![false; MTA_BITS];
    let mut remainder = *chi;

    for (l, bit) in bits.iter_mut().enumerate().skip(BINARY_BITS) {
        *bit = rng.next_u32() & 1 == 1;
        remainder -= Scalar::conditional_select(&Scalar::ZERO, &gadget[l], Choice::from(*bit as u8));
    }

    // to_bytes is big-endian
    let repr = remainder.to_bytes();
    for (l, bit) in bits.iter_mut().enumerate().take(BINARY_BITS) {
        *bit = (repr[31 - l / 8] >> (l % 8)) & 1 == 1;
    }

    bits
}

/// Scalar pad for input `slot` from an OT key
fn pad(key: &[u8; 32], slot: u8) -> Scalar {
    scalar_from_digest(&kdf(b"dkls23-engine/mta-pad", &[key, &[slot]]))
}

/// Sender side: returns the corrections and its additive shares for `[u, v]`
pub(crate) fn sender_respond(
    pads: &[[[u8; 32]; 2]],
    inputs: [Scalar; 2],
    gadget: &[Scalar],
) -> (MtaResponse, [Scalar; 2]) {
    let mut tau: [Vec<Scalar>; 2] = [Vec::with_capacity(pads.len()), Vec::with_capacity(pads.len())];
    let mut shares = [Scalar::ZERO; 2];

    for ([k0, k1], g) in pads.iter().zip(gadget) {
        for slot in 0..2 {
            let v0 = pad(k0, slot as u8);
            let v1 = pad(k1, slot as u8);
            tau[slot].push(inputs[slot] - v1 + v0);
            shares[slot] -= *g * v0;
        }
    }

    let [tau_u, tau_v] = tau;
    (MtaResponse { tau_u, tau_v }, shares)
}

/// Receiver side: `keys` are the OT outputs for `choices`.
///
/// Returns `None` when the response has the wrong shape.
pub(crate) fn receiver_finish(
    keys: &[[u8; 32]],
    choices: &[bool],
    response: &MtaResponse,
    gadget: &[Scalar],
) -> Option<[Scalar; 2]> {
    if response.tau_u.len() != keys.len()
        || response.tau_v.len() != keys.len()
        || choices.len() != keys.len()
    {
        return None;
    }

    let mut shares = [Scalar::ZERO; 2];
    for (l, (key, &choice)) in keys.iter().zip(choices).enumerate() {
        let choice = Choice::from(choice as u8);
        for (slot, tau) in [&response.tau_u, &response.tau_v].into_iter().enumerate() {
            let corrected = pad(key, slot as u8) + Scalar::conditional_select(&Scalar::ZERO, &tau[l], choice);
            shares[slot] += gadget[l] * corrected;
        }
    }

    Some(shares)
}
