//! Simplest OT
//!
//! Diffie-Hellman random OT of Chou and Orlandi (https://eprint.iacr.org/2015/267.pdf)
//! over secp256k1. The sender publishes `Y = y*G` once; for transfer `l` the
//! receiver answers `X_l = x_l*G + b_l*Y`. The sender can derive both keys of
//! every transfer, the receiver only the one selected by its choice bit.

use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand_core::{CryptoRng, RngCore};
use subtle::{Choice, ConditionallySelectable};

use super::PairContext;
use crate::utils::{kdf, point_bytes};

/// One direction of a batch of base OTs
pub struct SimplestOt {
    pair: PairContext,
    label: &'static [u8],
}

impl SimplestOt {
    pub(crate) fn new(pair: PairContext, label: &'static [u8]) -> Self {
        Self { pair, label }
    }

    fn key(
        &self,
        index: usize,
        big_x: &ProjectivePoint,
        big_y: &ProjectivePoint,
        shared: &ProjectivePoint,
    ) -> [u8; 32] {
        kdf(
            self.label,
            &[
                &self.pair.domain(),
                &(index as u32).to_le_bytes(),
                &point_bytes(big_x),
                &point_bytes(big_y),
                &point_bytes(shared),
            ],
        )
    }

    /// Sender's key pair `(y, Y)`
    pub(crate) fn sender_setup<R: RngCore + CryptoRng>(rng: &mut R) -> (Scalar, ProjectivePoint) {
        let y = Scalar::random(&mut *rng);
        (y, ProjectivePoint::GENERATOR * y)
    }

    /// Receiver's answer and the keys it learns
    pub(crate) fn receiver_choose<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        big_y: &ProjectivePoint,
        choices: &[bool],
    ) -> (Vec<ProjectivePoint>, Vec<[u8; 32]>) {
        let mut points = Vec::with_capacity(choices.len());
        let mut keys = Vec::with_capacity(choices.len());

        for (index, &choice) in choices.iter().enumerate() {
            let x = Scalar::random(&mut *rng);
            let base = ProjectivePoint::GENERATOR * x;
            let big_x = ProjectivePoint::conditional_select(
                &base,
                &(base + big_y),
                Choice::from(choice as u8),
            );
            keys.push(self.key(index, &big_x, big_y, &(*big_y * x)));
            points.push(big_x);
        }

        (points, keys)
    }

    /// Sender derives both keys of every transfer
    pub(crate) fn sender_derive(
        &self,
        y: &Scalar,
        big_y: &ProjectivePoint,
        points: &[ProjectivePoint],
    ) -> Vec<[[u8; 32]; 2]> {
        points
            .iter()
            .enumerate()
            .map(|(index, big_x)| {
                [
                    self.key(index, big_x, big_y, &(*big_x * y)),
                    self.key(index, big_x, big_y, &((*big_x - big_y) * y)),
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_receiver_learns_chosen_key() {
        let ot = SimplestOt::new(PairContext::new([3u8; 32], 0, 1), b"test");
        let (y, big_y) = SimplestOt::sender_setup(&mut OsRng);
        let choices = vec![false, true, true, false, true];

        let (points, received) = ot.receiver_choose(&mut OsRng, &big_y, &choices);
        let keys = ot.sender_derive(&y, &big_y, &points);

        assert_eq!(keys.len(), choices.len());
        for ((pair, key), &choice) in keys.iter().zip(&received).zip(&choices) {
            assert_eq!(&pair[choice as usize], key);
            assert_ne!(&pair[!choice as usize], key);
        }
    }

    #[test]
    fn test_keys_bound_to_direction() {
        let forward = SimplestOt::new(PairContext::new([3u8; 32], 0, 1), b"test");
        let backward = SimplestOt::new(PairContext::new([3u8; 32], 1, 0), b"test");
        let (y, big_y) = SimplestOt::sender_setup(&mut OsRng);

        let (points, received) = forward.receiver_choose(&mut OsRng, &big_y, &[false]);
        let keys = backward.sender_derive(&y, &big_y, &points);
        assert_ne!(keys[0][0], received[0]);
    }
}
