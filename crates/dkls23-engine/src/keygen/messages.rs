//! Keygen message bodies

use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};

use crate::{
    proofs::DLogProof,
    types::{option_scalar_serde, point_serde, points_serde, scalar_serde, scalars_serde},
};

/// Which kind of run the sender believes it is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum RunKind {
    Fresh,
    Rotation,
    Recovery,
}

/// Run parameters every party must agree on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RunSetup {
    pub participants: u8,
    pub threshold: u8,
    pub kind: RunKind,
    /// Compressed public key being preserved, empty for a fresh run
    pub public_key: Vec<u8>,
    /// Parties whose shares are being recovered
    pub lost: Vec<u8>,
}

/// Public half of a party's round-1 contribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Dealing {
    /// Feldman commitments to a fresh polynomial, with a proof for its constant
    Feldman {
        #[serde(with = "points_serde")]
        coefficients: Vec<ProjectivePoint>,
        proof: DLogProof,
    },
    /// Helper in a recovery run: its view of the public shares and one
    /// commitment per additive piece, indexed `[lost position][helper position]`
    Recovery {
        #[serde(with = "points_serde")]
        public_shares: Vec<ProjectivePoint>,
        #[serde(with = "points_serde")]
        pieces: Vec<ProjectivePoint>,
    },
    /// A party recovering its share contributes nothing
    Empty,
}

/// Round 1 (broadcast)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct KeygenMsg1 {
    pub session_seed: [u8; 32],
    pub setup: RunSetup,
    /// X25519 key for direct messages
    pub channel_key: [u8; 32],
    /// Simplest-OT sender key for the seed OTs this party deals
    #[serde(with = "point_serde")]
    pub ot_key: ProjectivePoint,
    pub dealing: Dealing,
}

/// Secret payload delivered to one peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum KeygenShare {
    /// `f_i(x_j)`
    Vss(#[serde(with = "scalar_serde")] Scalar),
    /// One additive piece per lost party, in lost-id order
    Pieces(#[serde(with = "scalars_serde")] Vec<Scalar>),
    None,
}

/// Round 2 (direct, sealed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct KeygenMsg2 {
    pub share: KeygenShare,
    /// Receiver answers for the peer's seed OT batch
    #[serde(with = "points_serde")]
    pub ot_choices: Vec<ProjectivePoint>,
}

/// Round 3 (direct, sealed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct KeygenMsg3 {
    pub chain_code: [u8; 32],
    pub chain_blind: [u8; 32],
    /// Recovery helper to lost party: sum of the pieces it holds for that party
    #[serde(with = "option_scalar_serde")]
    pub recovered: Option<Scalar>,
}

/// Round 4 (broadcast)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct KeygenMsg4 {
    #[serde(with = "point_serde")]
    pub public_share: ProjectivePoint,
    pub proof: DLogProof,
}
