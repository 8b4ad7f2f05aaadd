//! Keygen round functions
//!
//! Each round takes the previous state by reference and returns the next
//! state together with its outbound messages. Rounds:
//!
//! 1. broadcast session seed, run setup, channel key, seed OT key and dealing
//! 2. verify dealings, send shares (or recovery pieces) and seed OT choices
//! 3. verify shares against commitments, open the chain code commitment
//! 4. agree on the chain code, assemble the keyshare, prove the public share
//! 5. verify every party's public share proof

use std::collections::BTreeMap;

use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use super::{
    key_refresh,
    messages::{Dealing, KeygenMsg1, KeygenMsg2, KeygenMsg3, KeygenMsg4, KeygenShare, RunSetup},
    Prior,
};
use crate::{
    channel::{self, Channel},
    error::{Error, Result},
    keyshare::{Keyshare, PairwiseSeeds},
    message::Envelope,
    oblivious::{unpack_bits, PairContext, SimplestOt},
    proofs::{self, DLogProof},
    session::{Delivery, SessionCore},
    types::{
        option_scalar_serde, point_serde, points_serde, scalar_serde, scalars_serde, PartyConfig,
        PartyId, SessionId,
    },
    utils::{commit, evaluate_commitments, evaluate_polynomial, map_peers, party_scalar},
    COMMITMENT_SIZE, SEED_OT_BATCH,
};

const SEED_OT_LABEL: &[u8] = b"dkls23-engine/seed-ot";

/// Secret half of a party's round-1 contribution
#[derive(Clone, Serialize, Deserialize)]
pub(super) enum LocalDealing {
    /// Polynomial coefficients, constant first
    Polynomial(#[serde(with = "scalars_serde")] Vec<Scalar>),
    /// Additive recovery pieces, indexed `[lost position][helper position]`
    Pieces(#[serde(with = "scalars_serde")] Vec<Scalar>),
    Empty,
}

impl Drop for LocalDealing {
    fn drop(&mut self) {
        if let LocalDealing::Polynomial(scalars) | LocalDealing::Pieces(scalars) = self {
            scalars.zeroize();
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub(super) struct Round1State {
    pub session_seed: [u8; 32],
    pub channel_secret: [u8; 32],
    #[serde(with = "scalar_serde")]
    pub ot_secret: Scalar,
    #[serde(with = "point_serde")]
    pub ot_public: ProjectivePoint,
    pub dealing: LocalDealing,
}

impl Drop for Round1State {
    fn drop(&mut self) {
        self.channel_secret.zeroize();
        self.ot_secret.zeroize();
    }
}

/// Choice bits and received keys for one peer's seed OT batch
#[derive(Clone, Serialize, Deserialize)]
pub(super) struct SeedChoice {
    pub delta: [u8; 16],
    pub keys: Vec<[u8; 32]>,
}

#[derive(Clone, Serialize, Deserialize)]
pub(super) struct Round2State {
    pub round1: Round1State,
    pub session_id: SessionId,
    pub peers: BTreeMap<PartyId, KeygenMsg1>,
    /// Public shares agreed by the recovery helpers; empty otherwise
    #[serde(with = "points_serde")]
    pub public_shares: Vec<ProjectivePoint>,
    pub seed_choices: BTreeMap<PartyId, SeedChoice>,
    pub chain_code: [u8; 32],
    pub chain_blind: [u8; 32],
    pub commitment: [u8; 32],
}

#[derive(Clone, Serialize, Deserialize)]
pub(super) struct Round3State {
    pub round2: Round2State,
    pub commitments: Vec<[u8; 32]>,
    pub seed_keys: BTreeMap<PartyId, Vec<[[u8; 32]; 2]>>,
    /// Known after round 3 except for a party recovering its share
    #[serde(with = "option_scalar_serde")]
    pub secret_share: Option<Scalar>,
}

#[derive(Clone, Serialize, Deserialize)]
pub(super) struct Round4State {
    pub session_id: SessionId,
    pub keyshare: Keyshare,
}

fn session_id(setup: &RunSetup, seeds: &BTreeMap<PartyId, [u8; 32]>) -> Result<SessionId> {
    let setup = serde_json::to_vec(setup).map_err(|e| Error::SerializationUnsupported(e.to_string()))?;
    let mut parts: Vec<&[u8]> = vec![setup.as_slice()];
    for (id, seed) in seeds {
        parts.push(std::slice::from_ref(id));
        parts.push(seed);
    }
    Ok(commit("dkls23-engine keygen session", &parts))
}

pub(super) fn chain_commitment(
    session_id: &SessionId,
    party: PartyId,
    chain_code: &[u8; 32],
    blind: &[u8; 32],
) -> [u8; 32] {
    commit(
        "dkls23-engine keygen chain code",
        &[session_id, &[party], chain_code, blind],
    )
}

fn peer_channel(core: &SessionCore, secret: &[u8; 32], session_id: &SessionId, peer: &KeygenMsg1, id: PartyId) -> Channel {
    Channel::establish(secret, &peer.channel_key, session_id, core.tag, core.party_id(), id)
}

fn feldman_dealing(
    rng: &mut ChaCha20Rng,
    config: &PartyConfig,
    constant: Scalar,
    session_seed: &[u8; 32],
) -> (LocalDealing, Dealing) {
    let mut coefficients = Vec::with_capacity(config.threshold as usize);
    coefficients.push(constant);
    coefficients.extend((1..config.threshold).map(|_| Scalar::random(&mut *rng)));

    let commitments: Vec<ProjectivePoint> = coefficients
        .iter()
        .map(|c| ProjectivePoint::GENERATOR * c)
        .collect();
    let proof = DLogProof::prove(
        proofs::transcript(b"keygen-constant", session_seed, config.party_id),
        rng,
        &coefficients[0],
        &commitments[0],
    );

    (
        LocalDealing::Polynomial(coefficients),
        Dealing::Feldman {
            coefficients: commitments,
            proof,
        },
    )
}

/// Round 1: seeds, keys and the party's dealing
pub(super) fn round1(core: &SessionCore, prior: &Prior) -> Result<(Round1State, Envelope)> {
    let config = &core.config;
    let mut rng = core.seed.rng(b"keygen-round1");

    let mut session_seed = [0u8; 32];
    rng.fill_bytes(&mut session_seed);
    let (channel_secret, channel_key) = channel::keypair(&mut rng);
    let (ot_secret, ot_public) = SimplestOt::sender_setup(&mut rng);

    let (local, dealing) = match prior {
        Prior::Fresh => {
            let constant = Scalar::random(&mut rng);
            feldman_dealing(&mut rng, config, constant, &session_seed)
        }
        Prior::Rotation(old) => {
            let constant = key_refresh::rotation_constant(old);
            feldman_dealing(&mut rng, config, constant, &session_seed)
        }
        Prior::Helper { keyshare, lost } => key_refresh::deal_pieces(&mut rng, keyshare, lost),
        Prior::Lost { .. } => (LocalDealing::Empty, Dealing::Empty),
    };

    let msg = KeygenMsg1 {
        session_seed,
        setup: prior.setup(config),
        channel_key,
        ot_key: ot_public,
        dealing,
    };
    let envelope = Envelope::encode(core.tag, config.party_id, &msg)?;

    Ok((
        Round1State {
            session_seed,
            channel_secret,
            ot_secret,
            ot_public,
            dealing: local,
        },
        envelope,
    ))
}

fn verify_feldman(config: &PartyConfig, prior: &Prior, id: PartyId, msg: &KeygenMsg1) -> Result<()> {
    let Dealing::Feldman {
        coefficients,
        proof,
    } = &msg.dealing
    else {
        return Err(Error::abort(id, "expected a polynomial dealing"));
    };

    if coefficients.len() != config.threshold as usize {
        return Err(Error::abort(id, "polynomial has the wrong degree"));
    }
    if !proof.verify(
        proofs::transcript(b"keygen-constant", &msg.session_seed, id),
        &coefficients[0],
    ) {
        return Err(Error::abort(id, "invalid proof for the constant term"));
    }
    if let Prior::Rotation(old) = prior {
        if coefficients[0] != key_refresh::expected_rotation_constant(old, id) {
            return Err(Error::abort(
                id,
                "rotation constant does not match the old public share",
            ));
        }
    }

    Ok(())
}

/// Round 2: verify dealings, deal shares and choose on every peer's seed OTs
pub(super) fn round2(
    core: &SessionCore,
    prior: &Prior,
    state: &Round1State,
    inbound: &[Envelope],
) -> Result<(Round2State, Vec<Envelope>)> {
    let config = &core.config;
    let me = config.party_id;
    let peer_ids = config.peers();
    let batch = core.collect(inbound, &peer_ids, Delivery::Broadcast)?;

    let setup = prior.setup(config);
    let mut peers = BTreeMap::new();
    let mut seeds = BTreeMap::from([(me, state.session_seed)]);
    for (&id, envelope) in &batch {
        let msg: KeygenMsg1 = envelope.decode(core.tag)?;
        if msg.setup != setup {
            return Err(Error::ConfigurationMismatch(format!(
                "party {id} runs {:?}, expected {:?}",
                msg.setup, setup
            )));
        }
        seeds.insert(id, msg.session_seed);
        peers.insert(id, msg);
    }
    let session_id = session_id(&setup, &seeds)?;
    debug!(session_id = hex::encode(session_id), "Keygen round 2: verifying dealings");

    let public_shares = match prior {
        Prior::Fresh | Prior::Rotation(_) => {
            for (&id, msg) in &peers {
                verify_feldman(config, prior, id, msg)?;
            }
            Vec::new()
        }
        Prior::Helper { .. } | Prior::Lost { .. } => {
            key_refresh::verify_recovery_dealings(config, prior, &peers)?
        }
    };

    let dealt = map_peers(&peer_ids, |id| {
        let peer = &peers[&id];
        let mut rng = core.seed.peer_rng(b"keygen-round2", id);

        let share = match &state.dealing {
            LocalDealing::Polynomial(coefficients) => {
                KeygenShare::Vss(evaluate_polynomial(coefficients, &party_scalar(id)))
            }
            LocalDealing::Pieces(pieces) => key_refresh::pieces_for(config, prior.lost(), pieces, id),
            LocalDealing::Empty => KeygenShare::None,
        };

        let mut delta = [0u8; 16];
        rng.fill_bytes(&mut delta);
        let ot = SimplestOt::new(PairContext::new(session_id, id, me), SEED_OT_LABEL);
        let (ot_choices, keys) =
            ot.receiver_choose(&mut rng, &peer.ot_key, &unpack_bits(&delta, SEED_OT_BATCH));

        let envelope = peer_channel(core, &state.channel_secret, &session_id, peer, id)
            .seal(2, &KeygenMsg2 { share, ot_choices })?;
        Ok((envelope, SeedChoice { delta, keys }))
    })?;

    let mut rng = core.seed.rng(b"keygen-chain-code");
    let chain_code = match prior {
        Prior::Fresh => {
            let mut chain_code = [0u8; 32];
            rng.fill_bytes(&mut chain_code);
            chain_code
        }
        Prior::Rotation(old) | Prior::Helper { keyshare: old, .. } => old.chain_code,
        Prior::Lost { .. } => [0u8; 32],
    };
    let mut chain_blind = [0u8; 32];
    rng.fill_bytes(&mut chain_blind);

    let mut outbound = Vec::with_capacity(dealt.len());
    let mut seed_choices = BTreeMap::new();
    for (id, (envelope, choice)) in dealt {
        outbound.push(envelope);
        seed_choices.insert(id, choice);
    }

    Ok((
        Round2State {
            round1: state.clone(),
            session_id,
            peers,
            public_shares,
            seed_choices,
            chain_code,
            chain_blind,
            commitment: chain_commitment(&session_id, me, &chain_code, &chain_blind),
        },
        outbound,
    ))
}

/// Split the concatenated commitments and check our own slot
fn parse_commitments(
    config: &PartyConfig,
    commitments: Option<&[u8]>,
    own: &[u8; 32],
) -> Result<Vec<[u8; 32]>> {
    let bytes = commitments
        .filter(|bytes| !bytes.is_empty())
        .ok_or(Error::MissingInput("commitments"))?;

    let expected = config.participants as usize * COMMITMENT_SIZE;
    if bytes.len() != expected {
        return Err(Error::InvalidInput(format!(
            "commitments must be {expected} bytes, got {}",
            bytes.len()
        )));
    }

    let commitments: Vec<[u8; 32]> = bytes
        .chunks_exact(COMMITMENT_SIZE)
        .map(|chunk| {
            let mut commitment = [0u8; 32];
            commitment.copy_from_slice(chunk);
            commitment
        })
        .collect();

    if &commitments[config.party_id as usize] != own {
        return Err(Error::InvalidInput(
            "own slot does not hold this party's commitment".into(),
        ));
    }

    Ok(commitments)
}

fn verify_share(
    config: &PartyConfig,
    prior: &Prior,
    peers: &BTreeMap<PartyId, KeygenMsg1>,
    id: PartyId,
    share: KeygenShare,
) -> Result<KeygenShare> {
    match prior {
        Prior::Fresh | Prior::Rotation(_) => {
            let (KeygenShare::Vss(value), Dealing::Feldman { coefficients, .. }) =
                (&share, &peers[&id].dealing)
            else {
                return Err(Error::abort(id, "expected a VSS share"));
            };
            if ProjectivePoint::GENERATOR * value
                != evaluate_commitments(coefficients, &party_scalar(config.party_id))
            {
                return Err(Error::abort(id, "VSS share does not match its commitments"));
            }
            Ok(share)
        }
        Prior::Helper { .. } => key_refresh::verify_pieces(config, prior.lost(), peers, id, share),
        Prior::Lost { .. } => match share {
            KeygenShare::None => Ok(share),
            _ => Err(Error::abort(id, "unexpected share for a recovering party")),
        },
    }
}

/// Round 3: verify received shares, finish the seed OTs, open the chain code
pub(super) fn round3(
    core: &SessionCore,
    prior: &Prior,
    state: &Round2State,
    inbound: &[Envelope],
    commitments: Option<&[u8]>,
) -> Result<(Round3State, Vec<Envelope>)> {
    let config = &core.config;
    let me = config.party_id;
    let peer_ids = config.peers();
    let batch = core.collect(inbound, &peer_ids, Delivery::Direct)?;
    let commitments = parse_commitments(config, commitments, &state.commitment)?;
    let round1 = &state.round1;
    debug!("Keygen round 3: verifying shares");

    let received = map_peers(&peer_ids, |id| {
        let peer = &state.peers[&id];
        let msg: KeygenMsg2 = peer_channel(core, &round1.channel_secret, &state.session_id, peer, id)
            .open(2, batch[&id])?;
        let share = verify_share(config, prior, &state.peers, id, msg.share)?;

        if msg.ot_choices.len() != SEED_OT_BATCH {
            return Err(Error::abort(id, "wrong number of seed OT choices"));
        }
        let ot = SimplestOt::new(PairContext::new(state.session_id, me, id), SEED_OT_LABEL);
        let keys = ot.sender_derive(&round1.ot_secret, &round1.ot_public, &msg.ot_choices);
        Ok((share, keys))
    })?;

    let mut shares = Vec::with_capacity(received.len());
    let mut seed_keys = BTreeMap::new();
    for (id, (share, keys)) in received {
        shares.push(share);
        seed_keys.insert(id, keys);
    }

    let (secret_share, recovered) = match (&round1.dealing, prior) {
        (LocalDealing::Polynomial(coefficients), _) => {
            let own = evaluate_polynomial(coefficients, &party_scalar(me));
            let sum = shares.iter().fold(own, |acc, share| match share {
                KeygenShare::Vss(value) => acc + value,
                _ => acc,
            });
            (Some(sum), BTreeMap::new())
        }
        (LocalDealing::Pieces(pieces), Prior::Helper { keyshare, lost }) => (
            Some(keyshare.secret_share),
            key_refresh::recovery_sums(config, lost, pieces, &shares),
        ),
        _ => (None, BTreeMap::new()),
    };

    let outbound = peer_ids
        .iter()
        .map(|&id| {
            peer_channel(core, &round1.channel_secret, &state.session_id, &state.peers[&id], id).seal(
                3,
                &KeygenMsg3 {
                    chain_code: state.chain_code,
                    chain_blind: state.chain_blind,
                    recovered: recovered.get(&id).copied(),
                },
            )
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((
        Round3State {
            round2: state.clone(),
            commitments,
            seed_keys,
            secret_share,
        },
        outbound,
    ))
}

/// Public key and public shares implied by every Feldman dealing
fn feldman_outputs(config: &PartyConfig, state: &Round2State) -> (ProjectivePoint, Vec<ProjectivePoint>) {
    let own: Vec<ProjectivePoint> = match &state.round1.dealing {
        LocalDealing::Polynomial(coefficients) => coefficients
            .iter()
            .map(|c| ProjectivePoint::GENERATOR * c)
            .collect(),
        _ => Vec::new(),
    };
    let mut dealt: Vec<&[ProjectivePoint]> = vec![own.as_slice()];
    for msg in state.peers.values() {
        if let Dealing::Feldman { coefficients, .. } = &msg.dealing {
            dealt.push(coefficients);
        }
    }

    let public_key = dealt
        .iter()
        .fold(ProjectivePoint::IDENTITY, |acc, commitments| acc + commitments[0]);
    let public_shares = config
        .parties()
        .map(|k| {
            let x = party_scalar(k);
            dealt.iter().fold(ProjectivePoint::IDENTITY, |acc, commitments| {
                acc + evaluate_commitments(commitments, &x)
            })
        })
        .collect();

    (public_key, public_shares)
}

/// Round 4: agree on the chain code, assemble the keyshare, prove its public share
pub(super) fn round4(
    core: &SessionCore,
    prior: &Prior,
    state: &Round3State,
    inbound: &[Envelope],
) -> Result<(Round4State, Vec<Envelope>)> {
    let config = &core.config;
    let me = config.party_id;
    let peer_ids = config.peers();
    let batch = core.collect(inbound, &peer_ids, Delivery::Direct)?;
    let round2 = &state.round2;
    debug!("Keygen round 4: opening chain codes");

    let opened = map_peers(&peer_ids, |id| {
        let msg: KeygenMsg3 = peer_channel(
            core,
            &round2.round1.channel_secret,
            &round2.session_id,
            &round2.peers[&id],
            id,
        )
        .open(3, batch[&id])?;
        if chain_commitment(&round2.session_id, id, &msg.chain_code, &msg.chain_blind)
            != state.commitments[id as usize]
        {
            return Err(Error::abort(id, "chain code does not match its commitment"));
        }
        Ok(msg)
    })?;

    let chain_code = key_refresh::agree_chain_code(prior, me, &round2.chain_code, &opened)?;

    let (secret_share, public_key, public_shares) = match prior {
        Prior::Fresh | Prior::Rotation(_) => {
            let (public_key, public_shares) = feldman_outputs(config, round2);
            if let Prior::Rotation(old) = prior {
                if public_key != old.public_key {
                    return Err(Error::abort_unknown("rotation changed the public key"));
                }
            }
            let secret_share = state
                .secret_share
                .ok_or(Error::InvalidState("secret share missing after round 3"))?;
            (secret_share, public_key, public_shares)
        }
        Prior::Helper { keyshare, .. } => (
            keyshare.secret_share,
            keyshare.public_key,
            keyshare.public_shares.clone(),
        ),
        Prior::Lost { public_key, lost } => {
            let secret_share = key_refresh::reconstruct_lost_share(config, lost, round2, &opened)?;
            (secret_share, *public_key, round2.public_shares.clone())
        }
    };

    let public_share = public_shares[me as usize];
    if ProjectivePoint::GENERATOR * secret_share != public_share {
        return Err(Error::abort_unknown(
            "computed share does not match its public share",
        ));
    }

    let seed_ots = peer_ids
        .iter()
        .filter_map(|id| {
            let choice = round2.seed_choices.get(id)?;
            let keys = state.seed_keys.get(id)?;
            Some((
                *id,
                PairwiseSeeds {
                    sender: keys.clone(),
                    delta: choice.delta,
                    received: choice.keys.clone(),
                },
            ))
        })
        .collect();

    let keyshare = Keyshare {
        party_id: me,
        participants: config.participants,
        threshold: config.threshold,
        public_key,
        secret_share,
        public_shares,
        chain_code,
        setup_id: round2.session_id,
        seed_ots,
    };
    keyshare
        .validate()
        .map_err(|e| Error::abort_unknown(format!("assembled keyshare is inconsistent: {e}")))?;

    let mut rng = core.seed.rng(b"keygen-round4");
    let proof = DLogProof::prove(
        proofs::transcript(b"keygen-share", &round2.session_id, me),
        &mut rng,
        &secret_share,
        &public_share,
    );
    let envelope = Envelope::encode(
        core.tag,
        me,
        &KeygenMsg4 {
            public_share,
            proof,
        },
    )?;

    Ok((
        Round4State {
            session_id: round2.session_id,
            keyshare,
        },
        vec![envelope],
    ))
}

/// Round 5: every party proves knowledge of its share
pub(super) fn round5(core: &SessionCore, state: &Round4State, inbound: &[Envelope]) -> Result<Keyshare> {
    let batch = core.collect(inbound, &core.config.peers(), Delivery::Broadcast)?;
    debug!("Keygen round 5: verifying share proofs");

    for (&id, envelope) in &batch {
        let msg: KeygenMsg4 = envelope.decode(core.tag)?;
        if msg.public_share != state.keyshare.public_shares[id as usize] {
            return Err(Error::abort(id, "public share differs from the agreed one"));
        }
        if !msg.proof.verify(
            proofs::transcript(b"keygen-share", &state.session_id, id),
            &msg.public_share,
        ) {
            return Err(Error::abort(id, "invalid proof of share knowledge"));
        }
    }

    Ok(state.keyshare.clone())
}
