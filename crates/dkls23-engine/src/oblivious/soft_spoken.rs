//! SoftSpokenOT
//!
//! OT extension from https://eprint.iacr.org/2022/192.pdf with k = 1, where it
//! coincides with the IKNP correlation. 128 seed OTs from keygen are stretched
//! into any number of random OTs per signing session.
//!
//! The extension receiver holds both seed keys of every column and the
//! extension sender holds one of them, selected by its secret `delta`.
//! Row `l` of the sender's matrix equals the receiver's row XOR `b_l * delta`.

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{bit, pack_bits, PairContext};
use crate::{utils::kdf, SEED_OT_BATCH};

/// Receiver's correction columns, one per seed OT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionMatrix {
    pub(crate) columns: Vec<Vec<u8>>,
}

/// One direction of an extension for `count` transfers
pub struct SoftSpokenOt {
    pair: PairContext,
    count: usize,
}

impl SoftSpokenOt {
    pub(crate) fn new(pair: PairContext, count: usize) -> Self {
        Self { pair, count }
    }

    fn column_bytes(&self) -> usize {
        self.count.div_ceil(8)
    }

    /// Stretch one seed key into a column
    fn expand(&self, column: usize, key: &[u8; 32]) -> Vec<u8> {
        let seed = kdf(
            b"dkls23-engine/ote-prg",
            &[&self.pair.domain(), &(column as u32).to_le_bytes(), key],
        );
        let mut out = vec![0u8; self.column_bytes()];
        ChaCha20Rng::from_seed(seed).fill_bytes(&mut out);
        out
    }

    /// Transpose columns into one 128-bit row per transfer
    fn rows(&self, columns: &[Vec<u8>]) -> Vec<u128> {
        (0..self.count)
            .map(|l| {
                columns
                    .iter()
                    .enumerate()
                    .fold(0u128, |row, (j, column)| row | (u128::from(bit(column, l)) << j))
            })
            .collect()
    }

    fn row_key(&self, index: usize, row: u128) -> [u8; 32] {
        kdf(
            b"dkls23-engine/ote-row",
            &[
                &self.pair.domain(),
                &(index as u32).to_le_bytes(),
                &row.to_le_bytes(),
            ],
        )
    }

    /// Receiver side: `seeds` are both keys of each seed OT, `choices` has `count` bits
    pub(crate) fn extend_receiver(
        &self,
        seeds: &[[[u8; 32]; 2]],
        choices: &[bool],
    ) -> (ExtensionMatrix, Vec<[u8; 32]>) {
        let packed = pack_bits(choices);
        let mut columns = Vec::with_capacity(seeds.len());
        let mut t0 = Vec::with_capacity(seeds.len());

        for (j, [k0, k1]) in seeds.iter().enumerate() {
            let column = self.expand(j, k0);
            let other = self.expand(j, k1);
            columns.push(
                column
                    .iter()
                    .zip(&other)
                    .zip(&packed)
                    .map(|((a, b), c)| a ^ b ^ c)
                    .collect(),
            );
            t0.push(column);
        }

        let keys = self
            .rows(&t0)
            .into_iter()
            .enumerate()
            .map(|(l, row)| self.row_key(l, row))
            .collect();

        (ExtensionMatrix { columns }, keys)
    }

    /// Sender side: `received[j]` is the seed key selected by bit `j` of `delta`.
    ///
    /// Returns `None` when the matrix has the wrong shape.
    pub(crate) fn extend_sender(
        &self,
        delta: &[u8; 16],
        received: &[[u8; 32]],
        matrix: &ExtensionMatrix,
    ) -> Option<Vec<[[u8; 32]; 2]>> {
        if received.len() != SEED_OT_BATCH
            || matrix.columns.len() != received.len()
            || matrix
                .columns
                .iter()
                .any(|column| column.len() != self.column_bytes())
        {
            return None;
        }

        let delta_row = u128::from_le_bytes(*delta);
        let q: Vec<Vec<u8>> = received
            .iter()
            .zip(&matrix.columns)
            .enumerate()
            .map(|(j, (key, u))| {
                let mut column = self.expand(j, key);
                if (delta_row >> j) & 1 == 1 {
                    column.iter_mut().zip(u).for_each(|(byte, mask)| *byte ^= mask);
                }
                column
            })
            .collect();

        Some(
            self.rows(&q)
                .into_iter()
                .enumerate()
                .map(|(l, row)| [self.row_key(l, row), self.row_key(l, row ^ delta_row)])
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oblivious::{unpack_bits, SimplestOt};
    use rand::rngs::OsRng;

    /// Seed OTs where `sender` deals and `receiver` chooses with `delta`
    fn seed_ots(delta: &[u8; 16]) -> (Vec<[[u8; 32]; 2]>, Vec<[u8; 32]>) {
        let ot = SimplestOt::new(PairContext::new([1u8; 32], 0, 1), b"seed");
        let (y, big_y) = SimplestOt::sender_setup(&mut OsRng);
        let (points, received) =
            ot.receiver_choose(&mut OsRng, &big_y, &unpack_bits(delta, SEED_OT_BATCH));
        (ot.sender_derive(&y, &big_y, &points), received)
    }

    #[test]
    fn test_extension_yields_random_ots() {
        let mut delta = [0u8; 16];
        OsRng.fill_bytes(&mut delta);
        let (pairs, received) = seed_ots(&delta);

        let choices: Vec<bool> = (0..40).map(|i| i % 3 == 0).collect();
        let ote = SoftSpokenOt::new(PairContext::new([2u8; 32], 1, 0), choices.len());
        let (matrix, keys) = ote.extend_receiver(&pairs, &choices);
        let pads = ote.extend_sender(&delta, &received, &matrix).unwrap();

        for ((pair, key), &choice) in pads.iter().zip(&keys).zip(&choices) {
            assert_eq!(&pair[choice as usize], key);
            assert_ne!(&pair[!choice as usize], key);
        }
    }

    #[test]
    fn test_malformed_matrix_rejected() {
        let delta = [7u8; 16];
        let (pairs, received) = seed_ots(&delta);
        let ote = SoftSpokenOt::new(PairContext::new([2u8; 32], 1, 0), 16);
        let (mut matrix, _) = ote.extend_receiver(&pairs, &[true; 16]);
        matrix.columns.pop();
        assert!(ote.extend_sender(&delta, &received, &matrix).is_none());
    }
}
