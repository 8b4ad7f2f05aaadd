//! Field helpers, hashing and per-peer scheduling

use k256::{
    elliptic_curve::{bigint::U256, group::GroupEncoding, ops::Reduce, PrimeField},
    CompressedPoint, FieldBytes, ProjectivePoint, Scalar,
};
use sha2::{Digest, Sha256};

use crate::{error::Result, types::PartyId};

/// Evaluation point of a party: ids are shifted by one so no party sits at zero
pub(crate) fn party_scalar(id: PartyId) -> Scalar {
    Scalar::from(u64::from(id) + 1)
}

/// Lagrange coefficient of `i` over `ids`, evaluated at `at`
pub(crate) fn lagrange(ids: &[PartyId], i: PartyId, at: &Scalar) -> Scalar {
    let x_i = party_scalar(i);
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;

    for &j in ids.iter().filter(|&&j| j != i) {
        let x_j = party_scalar(j);
        numerator *= *at - x_j;
        denominator *= x_i - x_j;
    }

    // ids are distinct, so the denominator is never zero
    numerator * denominator.invert().unwrap_or(Scalar::ZERO)
}

pub(crate) fn evaluate_polynomial(coefficients: &[Scalar], x: &Scalar) -> Scalar {
    coefficients
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
}

/// Evaluate a Feldman commitment vector in the exponent
pub(crate) fn evaluate_commitments(commitments: &[ProjectivePoint], x: &Scalar) -> ProjectivePoint {
    commitments
        .iter()
        .rev()
        .fold(ProjectivePoint::IDENTITY, |acc, commitment| acc * x + commitment)
}

/// Compressed encoding; the identity encodes as 33 zero bytes
pub(crate) fn point_bytes(point: &ProjectivePoint) -> [u8; 33] {
    let mut bytes = [0u8; 33];
    bytes.copy_from_slice(point.to_bytes().as_slice());
    bytes
}

pub(crate) fn decode_point(bytes: &[u8]) -> Option<ProjectivePoint> {
    if bytes.len() != 33 {
        return None;
    }
    Option::from(ProjectivePoint::from_bytes(&CompressedPoint::clone_from_slice(bytes)))
}

/// Canonical scalar decoding: values at or above the group order are rejected
pub(crate) fn decode_scalar(bytes: &[u8]) -> Option<Scalar> {
    if bytes.len() != 32 {
        return None;
    }
    Option::from(Scalar::from_repr(FieldBytes::clone_from_slice(bytes)))
}

pub(crate) fn scalar_from_digest(bytes: &[u8; 32]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(*bytes))
}

/// Domain-separated blake3 digest used for commitments and session ids
pub(crate) fn commit(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// SHA-256 key derivation with length-prefixed inputs
pub(crate) fn kdf(label: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub(crate) fn hash_to_scalar(label: &[u8], parts: &[&[u8]]) -> Scalar {
    scalar_from_digest(&kdf(label, parts))
}

/// Run `work` once per peer, in parallel when the `multi-thread` feature is on.
///
/// Results keep the order of `peers`; the first error wins.
#[cfg(feature = "multi-thread")]
pub(crate) fn map_peers<T, F>(peers: &[PartyId], work: F) -> Result<Vec<(PartyId, T)>>
where
    T: Send,
    F: Fn(PartyId) -> Result<T> + Send + Sync,
{
    use rayon::prelude::*;

    peers
        .par_iter()
        .map(|&peer| work(peer).map(|out| (peer, out)))
        .collect()
}

#[cfg(not(feature = "multi-thread"))]
pub(crate) fn map_peers<T, F>(peers: &[PartyId], work: F) -> Result<Vec<(PartyId, T)>>
where
    T: Send,
    F: Fn(PartyId) -> Result<T> + Send + Sync,
{
    peers
        .iter()
        .map(|&peer| work(peer).map(|out| (peer, out)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::elliptic_curve::Field;
    use rand::rngs::OsRng;

    #[test]
    fn test_lagrange_reconstructs_secret() {
        let coefficients: Vec<Scalar> = (0..3).map(|_| Scalar::random(&mut OsRng)).collect();
        let ids = [0u8, 2, 4];
        let secret = ids.iter().fold(Scalar::ZERO, |acc, &id| {
            acc + evaluate_polynomial(&coefficients, &party_scalar(id))
                * lagrange(&ids, id, &Scalar::ZERO)
        });
        assert_eq!(secret, coefficients[0]);
    }

    #[test]
    fn test_commitments_track_polynomial() {
        let coefficients: Vec<Scalar> = (0..4).map(|_| Scalar::random(&mut OsRng)).collect();
        let commitments: Vec<ProjectivePoint> = coefficients
            .iter()
            .map(|c| ProjectivePoint::GENERATOR * c)
            .collect();
        let x = party_scalar(7);
        assert_eq!(
            ProjectivePoint::GENERATOR * evaluate_polynomial(&coefficients, &x),
            evaluate_commitments(&commitments, &x)
        );
    }

    #[test]
    fn test_point_encoding() {
        let point = ProjectivePoint::GENERATOR * Scalar::from(42u64);
        assert_eq!(decode_point(&point_bytes(&point)), Some(point));
        assert_eq!(point_bytes(&ProjectivePoint::IDENTITY), [0u8; 33]);
        assert_eq!(decode_point(&[0u8; 33]), Some(ProjectivePoint::IDENTITY));
        assert_eq!(decode_point(&[2u8; 32]), None);
    }

    #[test]
    fn test_scalar_decoding_rejects_non_canonical() {
        assert_eq!(decode_scalar(&[0xff; 32]), None);
        assert_eq!(decode_scalar(&[1u8; 31]), None);
        let scalar = Scalar::from(7u64);
        assert_eq!(decode_scalar(&scalar.to_bytes()), Some(scalar));
    }

    #[test]
    fn test_commit_is_length_prefixed() {
        assert_ne!(commit("test", &[b"ab", b"c"]), commit("test", &[b"a", b"bc"]));
        assert_ne!(commit("one", &[b"x"]), commit("two", &[b"x"]));
    }
}
