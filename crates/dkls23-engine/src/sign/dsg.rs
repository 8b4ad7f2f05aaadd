//! DSG round functions
//!
//! Every signer `i` samples a nonce share `r_i` and a mask `phi_i`. Each
//! ordered pair runs one two-input multiplication where the receiver holds a
//! random `chi_ij` and the sender multiplies it by its nonce share and its
//! additive key share. With `psi_ij = phi_i - chi_ij` published, the outputs
//! sum to additive shares of `u = k * phi` and `v = sk * phi`, from which
//! `s = (m * phi + r * v) / u` follows once the digest is known.
//!
//! Rounds:
//!
//! 1. broadcast a commitment to `R_i`, a channel key and the variant's announcement
//! 2. fix the signer set, send each peer a multiplication request
//! 3. answer every request, open `R_i` and add consistency points
//! 4. verify openings, public shares and multiplication outputs; the result
//!    is a pre-signature that still lacks the digest

use std::collections::BTreeMap;

use k256::{
    elliptic_curve::{
        bigint::U256, ops::Reduce, point::AffineCoordinates, scalar::IsHigh, Field, Group,
    },
    ProjectivePoint, Scalar,
};
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use super::{
    messages::{SignMsg1, SignMsg2, SignMsg3, SignMsg4},
    variant::SignVariant,
};
use crate::{
    channel::{self, Channel},
    error::{Error, Result},
    keyshare::Keyshare,
    message::{Envelope, ProtocolTag},
    oblivious::{mta, PairContext},
    session::{Delivery, SessionCore},
    types::{point_serde, scalar_serde, PartyId, SessionId, Signature},
    utils::{commit, lagrange, map_peers, point_bytes, scalar_from_digest},
    MTA_BITS,
};

/// Inputs fixed when the session is created
#[derive(Clone, Serialize, Deserialize)]
pub(super) struct SignInputs {
    pub keyshare: Keyshare,
    /// Additive derivation tweak along the chain path
    #[serde(with = "scalar_serde")]
    pub tweak: Scalar,
    /// Public key the signature verifies under
    #[serde(with = "point_serde")]
    pub public_key: ProjectivePoint,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub(super) struct Round1State<V: SignVariant> {
    pub session_seed: [u8; 32],
    #[serde(with = "scalar_serde")]
    pub r: Scalar,
    #[serde(with = "scalar_serde")]
    pub phi: Scalar,
    pub blind: [u8; 32],
    pub channel_secret: [u8; 32],
    pub secret: V::Secret,
    pub announce: V::Announce,
}

impl<V: SignVariant> Drop for Round1State<V> {
    fn drop(&mut self) {
        self.r.zeroize();
        self.phi.zeroize();
        self.blind.zeroize();
        self.channel_secret.zeroize();
    }
}

/// Receiver side of the multiplication with one peer
#[derive(Clone, Serialize, Deserialize)]
pub(super) struct Receiver {
    #[serde(with = "scalar_serde")]
    pub chi: Scalar,
    pub choices: Vec<bool>,
    pub keys: Vec<[u8; 32]>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub(super) struct Round2State<V: SignVariant> {
    pub round1: Round1State<V>,
    pub session_id: SessionId,
    /// Every signer including this party, ascending
    pub signers: Vec<PartyId>,
    pub peers: BTreeMap<PartyId, SignMsg1<V::Announce>>,
    /// Additive share of the (derived) key among the signers
    #[serde(with = "scalar_serde")]
    pub sk: Scalar,
    pub receivers: BTreeMap<PartyId, Receiver>,
}

/// Sender outputs of the multiplication with one peer
#[derive(Clone, Serialize, Deserialize)]
pub(super) struct Products {
    #[serde(with = "scalar_serde")]
    pub u: Scalar,
    #[serde(with = "scalar_serde")]
    pub v: Scalar,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub(super) struct Round3State<V: SignVariant> {
    pub round2: Round2State<V>,
    pub products: BTreeMap<PartyId, Products>,
}

/// Everything but the digest
#[derive(Clone)]
pub(crate) struct PreSignature {
    pub session_id: SessionId,
    pub signers: Vec<PartyId>,
    /// `x(R) mod q`
    pub r: Scalar,
    pub y_odd: bool,
    pub phi: Scalar,
    pub u: Scalar,
    pub v: Scalar,
}

impl Drop for PreSignature {
    fn drop(&mut self) {
        self.phi.zeroize();
        self.v.zeroize();
    }
}

/// This party's share of `s`, waiting for the others
#[derive(Clone)]
pub(crate) struct PartialSignature {
    pub pre: PreSignature,
    pub digest: [u8; 32],
    pub w: Scalar,
}

fn nonce_commitment(session_seed: &[u8; 32], party: PartyId, big_r: &ProjectivePoint, blind: &[u8; 32]) -> [u8; 32] {
    commit(
        "dkls23-engine sign nonce",
        &[session_seed, &[party], &point_bytes(big_r), blind],
    )
}

fn session_id<A>(
    tag: ProtocolTag,
    inputs: &SignInputs,
    own: (PartyId, &[u8; 32]),
    peers: &BTreeMap<PartyId, SignMsg1<A>>,
) -> SessionId {
    let mut seeds: BTreeMap<PartyId, &[u8; 32]> = peers
        .iter()
        .map(|(&id, msg)| (id, &msg.session_seed))
        .collect();
    seeds.insert(own.0, own.1);

    let tag = [tag.as_byte()];
    let root = point_bytes(&inputs.keyshare.public_key);
    let derived = point_bytes(&inputs.public_key);
    let mut parts: Vec<&[u8]> = vec![tag.as_slice(), root.as_slice(), derived.as_slice()];
    for (id, seed) in &seeds {
        parts.push(std::slice::from_ref(id));
        parts.push(seed.as_slice());
    }
    commit("dkls23-engine sign session", &parts)
}

/// This party's additive key share among `signers`; the lowest signer also carries the tweak
fn additive_share(keyshare: &Keyshare, signers: &[PartyId], tweak: &Scalar) -> Scalar {
    let me = keyshare.party_id;
    let share = lagrange(signers, me, &Scalar::ZERO) * keyshare.secret_share;
    if signers.first() == Some(&me) {
        share + tweak
    } else {
        share
    }
}

fn expected_public_share(inputs: &SignInputs, signers: &[PartyId], id: PartyId) -> ProjectivePoint {
    let share = inputs.keyshare.public_shares[id as usize] * lagrange(signers, id, &Scalar::ZERO);
    if signers.first() == Some(&id) {
        share + ProjectivePoint::GENERATOR * inputs.tweak
    } else {
        share
    }
}

fn peer_channel<A>(
    core: &SessionCore,
    secret: &[u8; 32],
    session_id: &SessionId,
    peer: &SignMsg1<A>,
    id: PartyId,
) -> Channel {
    Channel::establish(secret, &peer.channel_key, session_id, core.tag, core.party_id(), id)
}

fn scalar_bytes(scalar: &Scalar) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&scalar.to_bytes());
    bytes
}

/// Round 1: commit to the nonce share
pub(super) fn round1<V: SignVariant>(core: &SessionCore, inputs: &SignInputs) -> Result<(Round1State<V>, Envelope)> {
    let me = core.party_id();
    let mut rng = core.seed.rng(b"sign-round1");

    let mut session_seed = [0u8; 32];
    rng.fill_bytes(&mut session_seed);
    let r = Scalar::random(&mut rng);
    let phi = Scalar::random(&mut rng);
    let mut blind = [0u8; 32];
    rng.fill_bytes(&mut blind);
    let (channel_secret, channel_key) = channel::keypair(&mut rng);
    let (secret, announce) = V::prepare(&inputs.keyshare, &mut rng)?;

    let msg = SignMsg1 {
        session_seed,
        commitment: nonce_commitment(&session_seed, me, &(ProjectivePoint::GENERATOR * r), &blind),
        channel_key,
        announce: announce.clone(),
    };
    let envelope = Envelope::encode(core.tag, me, &msg)?;

    Ok((
        Round1State {
            session_seed,
            r,
            phi,
            blind,
            channel_secret,
            secret,
            announce,
        },
        envelope,
    ))
}

/// Round 2: fix the signer set and request a multiplication from every peer
pub(super) fn round2<V: SignVariant>(
    core: &SessionCore,
    inputs: &SignInputs,
    state: &Round1State<V>,
    inbound: &[Envelope],
) -> Result<(Round2State<V>, Vec<Envelope>)> {
    let config = &core.config;
    let me = config.party_id;
    let batch = core.collect_open(
        inbound,
        config.threshold as usize - 1,
        config.participants as usize - 1,
    )?;

    let mut peers = BTreeMap::new();
    for (&id, envelope) in &batch {
        let msg: SignMsg1<V::Announce> = envelope.decode(core.tag)?;
        V::accept_announce(&inputs.keyshare, &state.announce, id, &msg.announce)?;
        peers.insert(id, msg);
    }

    let peer_ids: Vec<PartyId> = peers.keys().copied().collect();
    let mut signers = peer_ids.clone();
    signers.push(me);
    signers.sort_unstable();

    let session_id = session_id(core.tag, inputs, (me, &state.session_seed), &peers);
    let sk = additive_share(&inputs.keyshare, &signers, &inputs.tweak);
    debug!(
        session_id = hex::encode(session_id),
        signers = ?signers,
        "Sign round 2: requesting multiplications"
    );

    let requested = map_peers(&peer_ids, |id| {
        let peer = &peers[&id];
        let mut rng = core.seed.peer_rng(b"sign-round2", id);
        let pair = PairContext::new(session_id, id, me);

        let chi = Scalar::random(&mut rng);
        let choices = mta::encode(&mut rng, &chi, &mta::gadget(&pair));
        let (request, keys) = V::request(&inputs.keyshare, &state.secret, &pair, &peer.announce, &choices, &mut rng)?;

        let envelope =
            peer_channel(core, &state.channel_secret, &session_id, peer, id).seal(2, &SignMsg2 { request })?;
        Ok((envelope, Receiver { chi, choices, keys }))
    })?;

    let mut outbound = Vec::with_capacity(requested.len());
    let mut receivers = BTreeMap::new();
    for (id, (envelope, receiver)) in requested {
        outbound.push(envelope);
        receivers.insert(id, receiver);
    }

    Ok((
        Round2State {
            round1: state.clone(),
            session_id,
            signers,
            peers,
            sk,
            receivers,
        },
        outbound,
    ))
}

/// Round 3: answer every request and open the nonce share
pub(super) fn round3<V: SignVariant>(
    core: &SessionCore,
    inputs: &SignInputs,
    state: &Round2State<V>,
    inbound: &[Envelope],
) -> Result<(Round3State<V>, Vec<Envelope>)> {
    let me = core.party_id();
    let peer_ids: Vec<PartyId> = state.peers.keys().copied().collect();
    let batch = core.collect(inbound, &peer_ids, Delivery::Direct)?;
    let round1 = &state.round1;
    let big_r = ProjectivePoint::GENERATOR * round1.r;
    let public_share = ProjectivePoint::GENERATOR * state.sk;
    debug!("Sign round 3: answering multiplications");

    let answered = map_peers(&peer_ids, |id| {
        let channel = peer_channel(core, &round1.channel_secret, &state.session_id, &state.peers[&id], id);
        let msg: SignMsg2<V::Request> = channel.open(2, batch[&id])?;

        let pair = PairContext::new(state.session_id, me, id);
        let pads = V::respond(&inputs.keyshare, &round1.secret, &round1.announce, &pair, &msg.request)?;
        if pads.len() != MTA_BITS {
            return Err(Error::abort(id, "multiplication request has the wrong size"));
        }
        let (response, [u, v]) = mta::sender_respond(&pads, [round1.r, state.sk], &mta::gadget(&pair));

        let envelope = channel.seal(
            3,
            &SignMsg3 {
                big_r,
                blind: round1.blind,
                public_share,
                response,
                gamma_u: ProjectivePoint::GENERATOR * u,
                gamma_v: ProjectivePoint::GENERATOR * v,
                psi: round1.phi - state.receivers[&id].chi,
            },
        )?;
        Ok((envelope, Products { u, v }))
    })?;

    let mut outbound = Vec::with_capacity(answered.len());
    let mut products = BTreeMap::new();
    for (id, (envelope, product)) in answered {
        outbound.push(envelope);
        products.insert(id, product);
    }

    Ok((
        Round3State {
            round2: state.clone(),
            products,
        },
        outbound,
    ))
}

/// Round 4: check every opening and multiplication, build the pre-signature
pub(super) fn round4<V: SignVariant>(
    core: &SessionCore,
    inputs: &SignInputs,
    state: &Round3State<V>,
    inbound: &[Envelope],
) -> Result<PreSignature> {
    let me = core.party_id();
    let round2 = &state.round2;
    let round1 = &round2.round1;
    let peer_ids: Vec<PartyId> = round2.peers.keys().copied().collect();
    let batch = core.collect(inbound, &peer_ids, Delivery::Direct)?;
    debug!("Sign round 4: verifying multiplications");

    let opened = map_peers(&peer_ids, |id| {
        let announced = &round2.peers[&id];
        let msg: SignMsg3 = peer_channel(core, &round1.channel_secret, &round2.session_id, announced, id)
            .open(3, batch[&id])?;

        if nonce_commitment(&announced.session_seed, id, &msg.big_r, &msg.blind) != announced.commitment {
            return Err(Error::abort(id, "nonce share does not match its commitment"));
        }
        if msg.public_share != expected_public_share(inputs, &round2.signers, id) {
            return Err(Error::abort(id, "public share does not match the keyshare"));
        }

        let receiver = &round2.receivers[&id];
        let pair = PairContext::new(round2.session_id, id, me);
        let [u, v] = mta::receiver_finish(&receiver.keys, &receiver.choices, &msg.response, &mta::gadget(&pair))
            .ok_or_else(|| Error::abort(id, "malformed multiplication response"))?;

        if ProjectivePoint::GENERATOR * u != msg.big_r * receiver.chi - msg.gamma_u
            || ProjectivePoint::GENERATOR * v != msg.public_share * receiver.chi - msg.gamma_v
        {
            return Err(Error::abort(id, "multiplication consistency check failed"));
        }

        Ok((msg.big_r, msg.psi, Products { u, v }))
    })?;

    let mut big_r = ProjectivePoint::GENERATOR * round1.r;
    let mut phi = round1.phi;
    let mut u_cross = Scalar::ZERO;
    let mut v_cross = Scalar::ZERO;
    for (id, (peer_r, psi, received)) in opened {
        let sent = state
            .products
            .get(&id)
            .ok_or(Error::InvalidState("missing multiplication outputs"))?;
        big_r += peer_r;
        phi += psi;
        u_cross += sent.u + received.u;
        v_cross += sent.v + received.v;
    }

    if bool::from(big_r.is_identity()) {
        return Err(Error::abort_unknown("nonce shares sum to the identity"));
    }
    let affine = big_r.to_affine();
    let r = <Scalar as Reduce<U256>>::reduce_bytes(&affine.x());
    if bool::from(r.is_zero()) {
        return Err(Error::abort_unknown("nonce has a zero x-coordinate"));
    }

    Ok(PreSignature {
        session_id: round2.session_id,
        signers: round2.signers.clone(),
        r,
        y_odd: bool::from(affine.y_is_odd()),
        phi: round1.phi,
        u: round1.r * phi + u_cross,
        v: round2.sk * phi + v_cross,
    })
}

/// Bind the digest into this party's share of `s`
pub(super) fn partial(core: &SessionCore, pre: &PreSignature, digest: [u8; 32]) -> Result<(PartialSignature, Envelope)> {
    let w = scalar_from_digest(&digest) * pre.phi + pre.r * pre.v;
    let envelope = Envelope::encode(
        core.tag,
        core.party_id(),
        &SignMsg4 {
            session_id: pre.session_id,
            digest,
            w,
            u: pre.u,
        },
    )?;

    Ok((
        PartialSignature {
            pre: pre.clone(),
            digest,
            w,
        },
        envelope,
    ))
}

/// Sum every share of `s` and verify the result
pub(super) fn combine(
    core: &SessionCore,
    inputs: &SignInputs,
    partial: &PartialSignature,
    inbound: &[Envelope],
) -> Result<Signature> {
    let pre = &partial.pre;
    let me = core.party_id();
    let peer_ids: Vec<PartyId> = pre.signers.iter().copied().filter(|&id| id != me).collect();
    let batch = core.collect(inbound, &peer_ids, Delivery::Broadcast)?;

    let mut w = partial.w;
    let mut u = pre.u;
    for (&id, envelope) in &batch {
        let msg: SignMsg4 = envelope.decode(core.tag)?;
        if msg.session_id != pre.session_id {
            return Err(Error::abort(id, "signature share belongs to another session"));
        }
        if msg.digest != partial.digest {
            return Err(Error::abort(id, "signature share covers a different digest"));
        }
        w += msg.w;
        u += msg.u;
    }

    let u_inv = Option::<Scalar>::from(u.invert())
        .ok_or_else(|| Error::abort_unknown("nonce shares sum to zero"))?;
    let mut s = w * u_inv;
    let mut recovery_id = u8::from(pre.y_odd);
    if bool::from(s.is_high()) {
        s = -s;
        recovery_id ^= 1;
    }

    let signature = Signature::new(scalar_bytes(&pre.r), scalar_bytes(&s), recovery_id);
    signature
        .verify_prehash(&point_bytes(&inputs.public_key), &partial.digest)
        .map_err(|_| Error::abort_unknown("combined signature does not verify"))?;

    Ok(signature)
}
