//! Core types shared by the keygen and signing sessions

use k256::{
    ecdsa::{self, signature::hazmat::PrehashVerifier, VerifyingKey},
    FieldBytes,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a party, `0..participants`
pub type PartyId = u8;

/// Identifier binding all messages of one protocol run
pub type SessionId = [u8; 32];

/// Compressed SEC1 public key bytes
pub type PublicKey = [u8; 33];

/// ECDSA signature (r, s) with a recovery id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// R component
    pub r: [u8; 32],
    /// S component, always in the lower half of the group order
    pub s: [u8; 32],
    /// Recovery ID (0 or 1)
    pub recovery_id: u8,
}

impl Signature {
    /// Create a new signature
    pub fn new(r: [u8; 32], s: [u8; 32], recovery_id: u8) -> Self {
        Self { r, s, recovery_id }
    }

    fn to_ecdsa(&self) -> Result<ecdsa::Signature> {
        ecdsa::Signature::from_scalars(
            *FieldBytes::from_slice(&self.r),
            *FieldBytes::from_slice(&self.s),
        )
        .map_err(|_| Error::InvalidInput("signature scalars out of range".into()))
    }

    /// Convert to DER format
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.to_ecdsa()?.to_der().as_bytes().to_vec())
    }

    /// Convert to bytes (r || s)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }

    /// Check the signature against a compressed public key and a 32-byte digest
    pub fn verify_prehash(&self, public_key: &[u8], digest: &[u8]) -> Result<()> {
        let key = VerifyingKey::from_sec1_bytes(public_key)
            .map_err(|_| Error::InvalidInput("malformed public key".into()))?;
        key.verify_prehash(digest, &self.to_ecdsa()?)
            .map_err(|_| Error::InvalidInput("signature does not verify".into()))
    }
}

/// Party layout of a protocol run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyConfig {
    /// Number of parties holding shares
    pub participants: u8,
    /// Minimum number of parties needed to sign
    pub threshold: u8,
    /// This party's ID
    pub party_id: PartyId,
}

impl PartyConfig {
    /// Create a new party configuration
    pub fn new(participants: u8, threshold: u8, party_id: PartyId) -> Result<Self> {
        if participants == 0 || participants == u8::MAX {
            return Err(Error::InvalidInput(format!(
                "participants must be within 1..=254, got {participants}"
            )));
        }
        if threshold == 0 || threshold > participants {
            return Err(Error::InvalidInput(format!(
                "threshold {threshold} must be within 1..={participants}"
            )));
        }
        if party_id >= participants {
            return Err(Error::InvalidInput(format!(
                "party id {party_id} out of range for {participants} participants"
            )));
        }

        Ok(Self {
            participants,
            threshold,
            party_id,
        })
    }

    /// Every party id of the run
    pub fn parties(&self) -> impl Iterator<Item = PartyId> {
        0..self.participants
    }

    /// Every party id except our own
    pub fn peers(&self) -> Vec<PartyId> {
        let me = self.party_id;
        self.parties().filter(|&id| id != me).collect()
    }
}

pub(crate) mod scalar_serde {
    use k256::Scalar;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::utils::decode_scalar;

    pub fn serialize<S>(scalar: &Scalar, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(scalar.to_bytes().as_slice())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Scalar, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        decode_scalar(&bytes).ok_or_else(|| D::Error::custom("invalid scalar encoding"))
    }
}

pub(crate) mod option_scalar_serde {
    use k256::Scalar;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::utils::decode_scalar;

    pub fn serialize<S>(scalar: &Option<Scalar>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match scalar {
            Some(scalar) => serializer.serialize_some(&scalar.to_bytes().to_vec()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Scalar>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<Vec<u8>>::deserialize(deserializer)?
            .map(|bytes| {
                decode_scalar(&bytes).ok_or_else(|| D::Error::custom("invalid scalar encoding"))
            })
            .transpose()
    }
}

pub(crate) mod scalars_serde {
    use k256::Scalar;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::utils::decode_scalar;

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S>(scalars: &Vec<Scalar>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(scalars.iter().map(|scalar| scalar.to_bytes().to_vec()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Scalar>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<Vec<u8>>::deserialize(deserializer)?
            .iter()
            .map(|bytes| {
                decode_scalar(bytes).ok_or_else(|| D::Error::custom("invalid scalar encoding"))
            })
            .collect()
    }
}

pub(crate) mod point_serde {
    use k256::ProjectivePoint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::utils::{decode_point, point_bytes};

    pub fn serialize<S>(point: &ProjectivePoint, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&point_bytes(point))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ProjectivePoint, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        decode_point(&bytes).ok_or_else(|| D::Error::custom("invalid point encoding"))
    }
}

pub(crate) mod points_serde {
    use k256::ProjectivePoint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::utils::{decode_point, point_bytes};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S>(points: &Vec<ProjectivePoint>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(points.iter().map(|point| point_bytes(point).to_vec()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<ProjectivePoint>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<Vec<u8>>::deserialize(deserializer)?
            .iter()
            .map(|bytes| decode_point(bytes).ok_or_else(|| D::Error::custom("invalid point encoding")))
            .collect()
    }
}
