//! Key rotation and lost-share recovery
//!
//! Rotation re-deals the existing secret: party `i` shares
//! `lambda_i * x_i` (Lagrange over all parties at zero), so the new shares
//! interpolate to the same public key.
//!
//! Recovery keeps the helpers' shares. For every lost party `l`, helper `i`
//! splits `lambda_i(x_l) * x_i` into one additive piece per helper and
//! commits to each piece. Helpers exchange pieces, sum what they hold and
//! hand the sum to `l`, who adds the sums up to `x_l`. Every step is checked
//! against the piece commitments, so a bad piece is attributed to its sender.

use std::collections::BTreeMap;

use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand_chacha::ChaCha20Rng;

use super::{
    dkg::{LocalDealing, Round2State},
    messages::{Dealing, KeygenMsg1, KeygenMsg3, KeygenShare},
    Prior,
};
use crate::{
    error::{Error, Result},
    keyshare::Keyshare,
    types::{PartyConfig, PartyId},
    utils::{commit, lagrange, party_scalar},
};

/// Sorted, deduplicated lost set; enough helpers must remain to reach the threshold
pub(super) fn normalize_lost(config: &PartyConfig, lost: &[PartyId]) -> Result<Vec<PartyId>> {
    if lost.is_empty() {
        return Err(Error::InvalidInput("lost party set is empty".into()));
    }
    if let Some(id) = lost.iter().find(|&&id| id >= config.participants) {
        return Err(Error::InvalidInput(format!("lost party {id} is out of range")));
    }

    let mut lost = lost.to_vec();
    lost.sort_unstable();
    lost.dedup();

    let helpers = config.participants as usize - lost.len();
    if helpers < config.threshold as usize {
        return Err(Error::ConfigurationMismatch(format!(
            "{helpers} remaining parties cannot reach threshold {}",
            config.threshold
        )));
    }

    Ok(lost)
}

pub(super) fn helpers(config: &PartyConfig, lost: &[PartyId]) -> Vec<PartyId> {
    config.parties().filter(|id| !lost.contains(id)).collect()
}

fn all_parties(participants: u8) -> Vec<PartyId> {
    (0..participants).collect()
}

/// Constant term a rotating party deals: `lambda_i * x_i`
pub(super) fn rotation_constant(old: &Keyshare) -> Scalar {
    lagrange(&all_parties(old.participants), old.party_id, &Scalar::ZERO) * old.secret_share
}

/// Public counterpart of [`rotation_constant`] for party `id`
pub(super) fn expected_rotation_constant(old: &Keyshare, id: PartyId) -> ProjectivePoint {
    old.public_shares[id as usize] * lagrange(&all_parties(old.participants), id, &Scalar::ZERO)
}

fn position(ids: &[PartyId], id: PartyId) -> Option<usize> {
    ids.iter().position(|&other| other == id)
}

/// Split `lambda_i(x_l) * x_i` into additive pieces for every lost party `l`
pub(super) fn deal_pieces(
    rng: &mut ChaCha20Rng,
    old: &Keyshare,
    lost: &[PartyId],
) -> (LocalDealing, Dealing) {
    let config = PartyConfig {
        participants: old.participants,
        threshold: old.threshold,
        party_id: old.party_id,
    };
    let helpers = helpers(&config, lost);
    let me = old.party_id;

    let mut pieces = Vec::with_capacity(lost.len() * helpers.len());
    for &l in lost {
        let weighted = lagrange(&helpers, me, &party_scalar(l)) * old.secret_share;
        let mut row: Vec<Scalar> = helpers
            .iter()
            .map(|&k| if k == me { Scalar::ZERO } else { Scalar::random(&mut *rng) })
            .collect();
        let others = row.iter().fold(Scalar::ZERO, |acc, piece| acc + piece);
        if let Some(own) = position(&helpers, me) {
            row[own] = weighted - others;
        }
        pieces.extend(row);
    }

    let commitments = pieces
        .iter()
        .map(|piece| ProjectivePoint::GENERATOR * piece)
        .collect();

    (
        LocalDealing::Pieces(pieces),
        Dealing::Recovery {
            public_shares: old.public_shares.clone(),
            pieces: commitments,
        },
    )
}

/// Pieces addressed to helper `peer`, one per lost party; nothing for lost parties
pub(super) fn pieces_for(
    config: &PartyConfig,
    lost: &[PartyId],
    pieces: &[Scalar],
    peer: PartyId,
) -> KeygenShare {
    let helpers = helpers(config, lost);
    match position(&helpers, peer) {
        Some(slot) => KeygenShare::Pieces(
            (0..lost.len())
                .map(|row| pieces[row * helpers.len() + slot])
                .collect(),
        ),
        None => KeygenShare::None,
    }
}

/// Check every helper's recovery dealing and return the agreed public shares
pub(super) fn verify_recovery_dealings(
    config: &PartyConfig,
    prior: &Prior,
    peers: &BTreeMap<PartyId, KeygenMsg1>,
) -> Result<Vec<ProjectivePoint>> {
    let lost = prior.lost();
    let helpers = helpers(config, lost);
    let n = config.participants as usize;

    let reference = match prior {
        Prior::Helper { keyshare, .. } => keyshare.public_shares.clone(),
        _ => {
            let first = helpers[0];
            match &peers[&first].dealing {
                Dealing::Recovery { public_shares, .. } if public_shares.len() == n => {
                    public_shares.clone()
                }
                _ => return Err(Error::abort(first, "expected a recovery dealing")),
            }
        }
    };

    for (&id, msg) in peers {
        match (&msg.dealing, lost.contains(&id)) {
            (Dealing::Empty, true) => {}
            (
                Dealing::Recovery {
                    public_shares,
                    pieces,
                },
                false,
            ) => {
                if *public_shares != reference {
                    return Err(Error::abort(id, "public shares disagree with the other helpers"));
                }
                if pieces.len() != lost.len() * helpers.len() {
                    return Err(Error::abort(id, "wrong number of piece commitments"));
                }
                for (row, &l) in lost.iter().enumerate() {
                    let sum = pieces[row * helpers.len()..(row + 1) * helpers.len()]
                        .iter()
                        .fold(ProjectivePoint::IDENTITY, |acc, piece| acc + piece);
                    if sum != reference[id as usize] * lagrange(&helpers, id, &party_scalar(l)) {
                        return Err(Error::abort(
                            id,
                            "pieces do not sum to the weighted public share",
                        ));
                    }
                }
            }
            _ => return Err(Error::abort(id, "dealing does not match the party's role")),
        }
    }

    if let Prior::Lost { public_key, .. } = prior {
        let interpolate = |at: &Scalar| {
            helpers.iter().fold(ProjectivePoint::IDENTITY, |acc, &i| {
                acc + reference[i as usize] * lagrange(&helpers, i, at)
            })
        };
        if interpolate(&Scalar::ZERO) != *public_key {
            return Err(Error::abort_unknown(
                "helper public shares do not match the public key",
            ));
        }
        if lost
            .iter()
            .any(|&l| interpolate(&party_scalar(l)) != reference[l as usize])
        {
            return Err(Error::abort_unknown(
                "helper public shares are inconsistent for a lost party",
            ));
        }
    }

    Ok(reference)
}

fn piece_commitments(msg: &KeygenMsg1) -> &[ProjectivePoint] {
    match &msg.dealing {
        Dealing::Recovery { pieces, .. } => pieces,
        _ => &[],
    }
}

/// Check the pieces a helper received from peer `id` against its commitments
pub(super) fn verify_pieces(
    config: &PartyConfig,
    lost: &[PartyId],
    peers: &BTreeMap<PartyId, KeygenMsg1>,
    id: PartyId,
    share: KeygenShare,
) -> Result<KeygenShare> {
    let helpers = helpers(config, lost);
    let from_helper = !lost.contains(&id);

    match (&share, from_helper) {
        (KeygenShare::None, false) => Ok(share),
        (KeygenShare::Pieces(pieces), true) if pieces.len() == lost.len() => {
            let slot = position(&helpers, config.party_id)
                .ok_or(Error::InvalidState("recovery helper missing from helper set"))?;
            let commitments = piece_commitments(&peers[&id]);
            for (row, piece) in pieces.iter().enumerate() {
                let committed = commitments.get(row * helpers.len() + slot);
                if committed != Some(&(ProjectivePoint::GENERATOR * piece)) {
                    return Err(Error::abort(id, "recovery piece does not match its commitment"));
                }
            }
            Ok(share)
        }
        _ => Err(Error::abort(id, "unexpected share in a recovery run")),
    }
}

/// Per lost party: own piece plus every piece received from the other helpers
pub(super) fn recovery_sums(
    config: &PartyConfig,
    lost: &[PartyId],
    own: &[Scalar],
    received: &[KeygenShare],
) -> BTreeMap<PartyId, Scalar> {
    let helpers = helpers(config, lost);
    let Some(slot) = position(&helpers, config.party_id) else {
        return BTreeMap::new();
    };

    lost.iter()
        .enumerate()
        .map(|(row, &l)| {
            let sum = received.iter().fold(own[row * helpers.len() + slot], |acc, share| {
                match share {
                    KeygenShare::Pieces(pieces) => acc + pieces[row],
                    _ => acc,
                }
            });
            (l, sum)
        })
        .collect()
}

/// Lost party: add up the helpers' sums, checking each against the commitments
pub(super) fn reconstruct_lost_share(
    config: &PartyConfig,
    lost: &[PartyId],
    state: &Round2State,
    opened: &[(PartyId, KeygenMsg3)],
) -> Result<Scalar> {
    let helpers = helpers(config, lost);
    let row = position(lost, config.party_id)
        .ok_or(Error::InvalidState("recovering party missing from lost set"))?;

    let mut secret = Scalar::ZERO;
    for (slot, &k) in helpers.iter().enumerate() {
        let sum = opened
            .iter()
            .find(|(id, _)| *id == k)
            .and_then(|(_, msg)| msg.recovered)
            .ok_or_else(|| Error::abort(k, "missing recovered piece sum"))?;

        let expected = helpers.iter().fold(ProjectivePoint::IDENTITY, |acc, i| {
            let committed = state
                .peers
                .get(i)
                .and_then(|msg| piece_commitments(msg).get(row * helpers.len() + slot).copied())
                .unwrap_or(ProjectivePoint::IDENTITY);
            acc + committed
        });
        if ProjectivePoint::GENERATOR * sum != expected {
            return Err(Error::abort(k, "recovered piece sum does not match the commitments"));
        }
        secret += sum;
    }

    Ok(secret)
}

/// Final chain code: a fresh run mixes every contribution, a refresh keeps the agreed old one
pub(super) fn agree_chain_code(
    prior: &Prior,
    me: PartyId,
    own: &[u8; 32],
    opened: &[(PartyId, KeygenMsg3)],
) -> Result<[u8; 32]> {
    if let Prior::Fresh = prior {
        let mut contributions: Vec<(PartyId, &[u8])> = opened
            .iter()
            .map(|(id, msg)| (*id, msg.chain_code.as_slice()))
            .collect();
        contributions.push((me, own.as_slice()));
        contributions.sort_unstable_by_key(|(id, _)| *id);
        let parts: Vec<&[u8]> = contributions.iter().map(|(_, code)| *code).collect();
        return Ok(commit("dkls23-engine keygen chain code mix", &parts));
    }

    let lost = prior.lost();
    let reference = match prior {
        Prior::Lost { .. } => opened
            .iter()
            .find(|(id, _)| !lost.contains(id))
            .map(|(_, msg)| msg.chain_code)
            .ok_or(Error::InvalidState("no helper opened a chain code"))?,
        _ => *own,
    };

    for (id, msg) in opened {
        if !lost.contains(id) && msg.chain_code != reference {
            return Err(Error::abort(*id, "chain code disagrees with the other parties"));
        }
    }

    Ok(reference)
}
