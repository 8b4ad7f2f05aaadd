//! DSG message bodies

use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};

use crate::{
    oblivious::MtaResponse,
    types::{point_serde, scalar_serde, SessionId},
};

/// Round 1 (broadcast): nonce commitment and the variant's announcement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SignMsg1<A> {
    pub session_seed: [u8; 32],
    /// Commitment to `R_i` under the sender's session seed
    pub commitment: [u8; 32],
    pub channel_key: [u8; 32],
    pub announce: A,
}

/// Round 2 (direct, sealed): multiplication request with the receiver's encoded `chi`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SignMsg2<Q> {
    pub request: Q,
}

/// Round 3 (direct, sealed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SignMsg3 {
    #[serde(with = "point_serde")]
    pub big_r: ProjectivePoint,
    pub blind: [u8; 32],
    /// Sender's additive key share times `G`
    #[serde(with = "point_serde")]
    pub public_share: ProjectivePoint,
    pub response: MtaResponse,
    /// Sender's multiplication outputs times `G`
    #[serde(with = "point_serde")]
    pub gamma_u: ProjectivePoint,
    #[serde(with = "point_serde")]
    pub gamma_v: ProjectivePoint,
    /// `phi_i - chi_ij`
    #[serde(with = "scalar_serde")]
    pub psi: Scalar,
}

/// Signature share (broadcast)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SignMsg4 {
    pub session_id: SessionId,
    pub digest: [u8; 32],
    #[serde(with = "scalar_serde")]
    pub w: Scalar,
    #[serde(with = "scalar_serde")]
    pub u: Scalar,
}
