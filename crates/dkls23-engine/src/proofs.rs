//! Schnorr proof of knowledge of a discrete logarithm
//!
//! Non-interactive via a merlin transcript. The transcript is built by the
//! caller so each proof is bound to its session and prover.

use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use merlin::Transcript;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    types::{point_serde, scalar_serde, PartyId},
    utils::{point_bytes, scalar_from_digest},
};

/// Transcript for a proof made by `party` in the context `label`
pub(crate) fn transcript(label: &'static [u8], context: &[u8; 32], party: PartyId) -> Transcript {
    let mut transcript = Transcript::new(b"dkls23-engine dlog");
    transcript.append_message(b"label", label);
    transcript.append_message(b"context", context);
    transcript.append_message(b"party", &[party]);
    transcript
}

fn challenge(
    transcript: &mut Transcript,
    public: &ProjectivePoint,
    commitment: &ProjectivePoint,
) -> Scalar {
    transcript.append_message(b"statement", &point_bytes(public));
    transcript.append_message(b"commitment", &point_bytes(commitment));
    let mut bytes = [0u8; 32];
    transcript.challenge_bytes(b"challenge", &mut bytes);
    scalar_from_digest(&bytes)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DLogProof {
    #[serde(with = "point_serde")]
    commitment: ProjectivePoint,
    #[serde(with = "scalar_serde")]
    response: Scalar,
}

impl DLogProof {
    /// Prove knowledge of `secret` with `public = secret * G`
    pub fn prove<R: RngCore + CryptoRng>(
        mut transcript: Transcript,
        rng: &mut R,
        secret: &Scalar,
        public: &ProjectivePoint,
    ) -> Self {
        let nonce = Scalar::random(&mut *rng);
        let commitment = ProjectivePoint::GENERATOR * nonce;
        let e = challenge(&mut transcript, public, &commitment);

        Self {
            commitment,
            response: nonce + e * secret,
        }
    }

    pub fn verify(&self, mut transcript: Transcript, public: &ProjectivePoint) -> bool {
        let e = challenge(&mut transcript, public, &self.commitment);
        ProjectivePoint::GENERATOR * self.response == self.commitment + *public * e
    }
}
