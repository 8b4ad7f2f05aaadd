//! Pluggable transfer layer under the signing multiplications
//!
//! Every pair of signers runs one multiplication per direction. The receiver
//! encodes its `chi` into choice bits and obtains one key per bit; the sender
//! obtains both keys of every transfer. A [`SignVariant`] decides how those
//! random OTs come about.

use k256::{elliptic_curve::Group, ProjectivePoint, Scalar};
use rand_chacha::ChaCha20Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    error::{Error, Result},
    keyshare::Keyshare,
    message::ProtocolTag,
    oblivious::{ExtensionMatrix, PairContext, SimplestOt, SoftSpokenOt},
    types::{point_serde, points_serde, scalar_serde, PartyId, SessionId},
    MTA_BITS,
};

/// Source of random OTs for the signing multiplications
pub trait SignVariant: Clone + Send + Sync + 'static {
    /// Tag framing every envelope of this variant
    const TAG: ProtocolTag;

    /// Per-session secret kept between rounds
    type Secret: Serialize + DeserializeOwned + Clone + Send + Sync;
    /// Public data broadcast in round 1
    type Announce: Serialize + DeserializeOwned + Clone + Send + Sync;
    /// Receiver's round-2 message to one sender
    type Request: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Whether `keyshare` carries what this variant needs
    fn check_keyshare(keyshare: &Keyshare) -> Result<()>;

    fn prepare(keyshare: &Keyshare, rng: &mut ChaCha20Rng) -> Result<(Self::Secret, Self::Announce)>;

    /// Check a peer's round-1 announcement against our own
    fn accept_announce(
        keyshare: &Keyshare,
        own: &Self::Announce,
        peer: PartyId,
        announce: &Self::Announce,
    ) -> Result<()>;

    /// Receiver side: request for `choices` and the keys it learns
    fn request(
        keyshare: &Keyshare,
        secret: &Self::Secret,
        pair: &PairContext,
        sender_announce: &Self::Announce,
        choices: &[bool],
        rng: &mut ChaCha20Rng,
    ) -> Result<(Self::Request, Vec<[u8; 32]>)>;

    /// Sender side: both keys of every requested transfer
    fn respond(
        keyshare: &Keyshare,
        secret: &Self::Secret,
        own_announce: &Self::Announce,
        pair: &PairContext,
        request: &Self::Request,
    ) -> Result<Vec<[[u8; 32]; 2]>>;
}

const BASE_OT_LABEL: &[u8] = b"dkls23-engine/sign-ot";

/// Fresh Diffie-Hellman base OTs in every session
#[derive(Debug, Clone, Copy)]
pub struct BaseMta;

#[derive(Clone, Serialize, Deserialize)]
pub struct BaseSecret(#[serde(with = "scalar_serde")] pub(super) Scalar);

impl Drop for BaseSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseAnnounce {
    #[serde(with = "point_serde")]
    ot_key: ProjectivePoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseRequest {
    #[serde(with = "points_serde")]
    points: Vec<ProjectivePoint>,
}

impl SignVariant for BaseMta {
    const TAG: ProtocolTag = ProtocolTag::SignBase;

    type Secret = BaseSecret;
    type Announce = BaseAnnounce;
    type Request = BaseRequest;

    fn check_keyshare(_keyshare: &Keyshare) -> Result<()> {
        Ok(())
    }

    fn prepare(_keyshare: &Keyshare, rng: &mut ChaCha20Rng) -> Result<(BaseSecret, BaseAnnounce)> {
        let (y, ot_key) = SimplestOt::sender_setup(rng);
        Ok((BaseSecret(y), BaseAnnounce { ot_key }))
    }

    fn accept_announce(
        _keyshare: &Keyshare,
        _own: &BaseAnnounce,
        peer: PartyId,
        announce: &BaseAnnounce,
    ) -> Result<()> {
        if bool::from(announce.ot_key.is_identity()) {
            return Err(Error::abort(peer, "OT key is the identity"));
        }
        Ok(())
    }

    fn request(
        _keyshare: &Keyshare,
        _secret: &BaseSecret,
        pair: &PairContext,
        sender_announce: &BaseAnnounce,
        choices: &[bool],
        rng: &mut ChaCha20Rng,
    ) -> Result<(BaseRequest, Vec<[u8; 32]>)> {
        let (points, keys) =
            SimplestOt::new(*pair, BASE_OT_LABEL).receiver_choose(rng, &sender_announce.ot_key, choices);
        Ok((BaseRequest { points }, keys))
    }

    fn respond(
        _keyshare: &Keyshare,
        secret: &BaseSecret,
        own_announce: &BaseAnnounce,
        pair: &PairContext,
        request: &BaseRequest,
    ) -> Result<Vec<[[u8; 32]; 2]>> {
        if request.points.len() != MTA_BITS {
            return Err(Error::abort(pair.receiver, "wrong number of OT points"));
        }
        Ok(SimplestOt::new(*pair, BASE_OT_LABEL).sender_derive(&secret.0, &own_announce.ot_key, &request.points))
    }
}

/// OT extension over the seed OTs recorded at keygen
#[derive(Debug, Clone, Copy)]
pub struct OtMta;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtAnnounce {
    setup_id: SessionId,
}

impl SignVariant for OtMta {
    const TAG: ProtocolTag = ProtocolTag::SignOt;

    type Secret = ();
    type Announce = OtAnnounce;
    type Request = ExtensionMatrix;

    fn check_keyshare(keyshare: &Keyshare) -> Result<()> {
        let missing: Vec<PartyId> = (0..keyshare.participants)
            .filter(|&id| id != keyshare.party_id && keyshare.seeds(id).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::ConfigurationMismatch(format!(
                "keyshare has no seed OTs with parties {missing:?}"
            )));
        }
        Ok(())
    }

    fn prepare(keyshare: &Keyshare, _rng: &mut ChaCha20Rng) -> Result<((), OtAnnounce)> {
        Ok((
            (),
            OtAnnounce {
                setup_id: keyshare.setup_id,
            },
        ))
    }

    fn accept_announce(
        _keyshare: &Keyshare,
        own: &OtAnnounce,
        peer: PartyId,
        announce: &OtAnnounce,
    ) -> Result<()> {
        if announce.setup_id != own.setup_id {
            return Err(Error::ConfigurationMismatch(format!(
                "party {peer} holds seed OTs from setup {}, ours are from {}",
                hex::encode(announce.setup_id),
                hex::encode(own.setup_id)
            )));
        }
        Ok(())
    }

    fn request(
        keyshare: &Keyshare,
        _secret: &(),
        pair: &PairContext,
        _sender_announce: &OtAnnounce,
        choices: &[bool],
        _rng: &mut ChaCha20Rng,
    ) -> Result<(ExtensionMatrix, Vec<[u8; 32]>)> {
        let seeds = keyshare
            .seeds(pair.sender)
            .ok_or_else(|| Error::ConfigurationMismatch(format!("no seed OTs with party {}", pair.sender)))?;
        Ok(SoftSpokenOt::new(*pair, choices.len()).extend_receiver(&seeds.sender, choices))
    }

    fn respond(
        keyshare: &Keyshare,
        _secret: &(),
        _own_announce: &OtAnnounce,
        pair: &PairContext,
        request: &ExtensionMatrix,
    ) -> Result<Vec<[[u8; 32]; 2]>> {
        let seeds = keyshare
            .seeds(pair.receiver)
            .ok_or_else(|| Error::ConfigurationMismatch(format!("no seed OTs with party {}", pair.receiver)))?;
        SoftSpokenOt::new(*pair, MTA_BITS)
            .extend_sender(&seeds.delta, &seeds.received, request)
            .ok_or_else(|| Error::abort(pair.receiver, "malformed extension matrix"))
    }
}
