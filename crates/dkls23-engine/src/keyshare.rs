//! Keyshare held by a party after keygen

use std::{collections::BTreeMap, fmt};

use derivation_path::{ChildIndex, DerivationPath};
use hmac::{Hmac, Mac};
use k256::{elliptic_curve::Group, ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    error::{Error, Result},
    types::{point_serde, points_serde, scalar_serde, PartyId, PublicKey, SessionId},
    utils::{decode_scalar, lagrange, party_scalar, point_bytes},
    SEED_OT_BATCH,
};

/// Seed OT material shared with one peer
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct PairwiseSeeds {
    /// Both keys of the batch this party dealt to the peer
    pub sender: Vec<[[u8; 32]; 2]>,
    /// Choice bits this party used on the peer's batch
    pub delta: [u8; 16],
    /// Keys this party received from the peer's batch
    pub received: Vec<[u8; 32]>,
}

/// Key share held by a party after keygen.
///
/// Immutable once created; rotation and recovery produce new keyshares.
#[derive(Clone, Serialize, Deserialize)]
pub struct Keyshare {
    pub(crate) party_id: PartyId,
    pub(crate) participants: u8,
    pub(crate) threshold: u8,

    #[serde(with = "point_serde")]
    pub(crate) public_key: ProjectivePoint,

    /// This party's secret share (x_i)
    #[serde(with = "scalar_serde")]
    pub(crate) secret_share: Scalar,

    /// `x_k * G` for every party k
    #[serde(with = "points_serde")]
    pub(crate) public_shares: Vec<ProjectivePoint>,

    /// Chain code for BIP32 derivation
    pub(crate) chain_code: [u8; 32],

    /// Session id of the keygen run that produced the seed OTs
    pub(crate) setup_id: SessionId,

    pub(crate) seed_ots: BTreeMap<PartyId, PairwiseSeeds>,
}

impl Zeroize for Keyshare {
    fn zeroize(&mut self) {
        self.secret_share.zeroize();
        self.chain_code.zeroize();
        self.seed_ots.values_mut().for_each(Zeroize::zeroize);
    }
}

impl Drop for Keyshare {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl fmt::Debug for Keyshare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyshare")
            .field("party_id", &self.party_id)
            .field("participants", &self.participants)
            .field("threshold", &self.threshold)
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

impl Keyshare {
    pub fn party_id(&self) -> PartyId {
        self.party_id
    }

    pub fn participants(&self) -> u8 {
        self.participants
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Compressed group public key
    pub fn public_key(&self) -> PublicKey {
        point_bytes(&self.public_key)
    }

    pub fn chain_code(&self) -> [u8; 32] {
        self.chain_code
    }

    /// Compressed `x_k * G` of party `party`
    pub fn public_share(&self, party: PartyId) -> Option<PublicKey> {
        self.public_shares.get(party as usize).map(point_bytes)
    }

    /// Id of the keygen run whose seed OTs this keyshare carries
    pub fn setup_id(&self) -> SessionId {
        self.setup_id
    }

    /// Public key derived along a non-hardened BIP32 path such as `m/0/1`
    pub fn derive_public_key(&self, chain_path: &str) -> Result<PublicKey> {
        let (_, public_key) = self.derive(&parse_path(chain_path)?)?;
        Ok(point_bytes(&public_key))
    }

    /// Serialize the keyshare
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::SerializationUnsupported(e.to_string()))
    }

    /// Deserialize and validate a keyshare
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let keyshare: Keyshare = serde_json::from_slice(bytes)?;
        keyshare
            .validate()
            .map_err(|e| Error::DeserializationFailed(e.to_string()))?;
        Ok(keyshare)
    }

    pub(crate) fn seeds(&self, peer: PartyId) -> Option<&PairwiseSeeds> {
        self.seed_ots.get(&peer)
    }

    /// Internal consistency: the secret matches its public share and all
    /// public shares lie on one degree `t - 1` polynomial through the public key
    pub(crate) fn validate(&self) -> Result<()> {
        let n = self.participants as usize;
        if self.threshold == 0 || self.threshold > self.participants {
            return Err(Error::InvalidInput("threshold out of range".into()));
        }
        if self.party_id >= self.participants {
            return Err(Error::InvalidInput("party id out of range".into()));
        }
        if self.public_shares.len() != n {
            return Err(Error::InvalidInput(format!(
                "expected {n} public shares, found {}",
                self.public_shares.len()
            )));
        }
        if bool::from(self.public_key.is_identity()) {
            return Err(Error::InvalidInput("public key is the identity".into()));
        }
        if ProjectivePoint::GENERATOR * self.secret_share != self.public_shares[self.party_id as usize] {
            return Err(Error::InvalidInput(
                "secret share does not match its public share".into(),
            ));
        }

        let base: Vec<PartyId> = (0..self.threshold).collect();
        let interpolate = |at: &Scalar| {
            base.iter().fold(ProjectivePoint::IDENTITY, |acc, &i| {
                acc + self.public_shares[i as usize] * lagrange(&base, i, at)
            })
        };
        if interpolate(&Scalar::ZERO) != self.public_key {
            return Err(Error::InvalidInput(
                "public shares do not interpolate to the public key".into(),
            ));
        }
        for k in self.threshold..self.participants {
            if interpolate(&party_scalar(k)) != self.public_shares[k as usize] {
                return Err(Error::InvalidInput(format!(
                    "public share of party {k} is inconsistent"
                )));
            }
        }

        for (&peer, seeds) in &self.seed_ots {
            if peer >= self.participants
                || peer == self.party_id
                || seeds.sender.len() != SEED_OT_BATCH
                || seeds.received.len() != SEED_OT_BATCH
            {
                return Err(Error::InvalidInput(format!(
                    "malformed seed OT material for party {peer}"
                )));
            }
        }

        Ok(())
    }

    /// Additive tweak and public key of a non-hardened derivation
    pub(crate) fn derive(&self, path: &DerivationPath) -> Result<(Scalar, ProjectivePoint)> {
        let mut public_key = self.public_key;
        let mut chain_code = self.chain_code;
        let mut tweak = Scalar::ZERO;

        for child in path.path() {
            let index = match child {
                ChildIndex::Normal(index) => *index,
                ChildIndex::Hardened(_) => {
                    return Err(Error::InvalidDerivationPath(
                        "hardened derivation is not supported in the threshold setting".into(),
                    ));
                }
            };

            let mut hmac = Hmac::<Sha512>::new_from_slice(&chain_code)
                .map_err(|e| Error::InvalidDerivationPath(e.to_string()))?;
            hmac.update(&point_bytes(&public_key));
            hmac.update(&index.to_be_bytes());
            let output = hmac.finalize().into_bytes();

            let offset = decode_scalar(&output[..32]).ok_or_else(|| {
                Error::InvalidDerivationPath(format!("index {index} yields an invalid offset"))
            })?;
            chain_code.copy_from_slice(&output[32..]);
            tweak += offset;
            public_key += ProjectivePoint::GENERATOR * offset;

            if bool::from(public_key.is_identity()) {
                return Err(Error::InvalidDerivationPath(format!(
                    "index {index} yields the identity"
                )));
            }
        }

        chain_code.zeroize();
        Ok((tweak, public_key))
    }
}

pub(crate) fn parse_path(chain_path: &str) -> Result<DerivationPath> {
    chain_path
        .parse()
        .map_err(|e| Error::InvalidDerivationPath(format!("{chain_path}: {e:?}")))
}
