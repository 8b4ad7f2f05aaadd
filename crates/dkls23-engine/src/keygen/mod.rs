//! Distributed Key Generation (DKG) module
//!
//! One [`KeygenSession`] drives a five-round DKG for the local party. The
//! same rounds serve a fresh keygen, a rotation of an existing key and the
//! recovery of lost shares; only the initializer differs.

mod dkg;
mod key_refresh;
mod messages;

use std::fmt;

use k256::ProjectivePoint;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    error::{Error, Result},
    keyshare::Keyshare,
    message::{Envelope, ProtocolTag},
    session::{Round, SessionCore},
    types::{point_serde, PartyConfig, PartyId},
    utils::{decode_point, point_bytes},
};

use dkg::{Round1State, Round2State, Round3State, Round4State};
use messages::{RunKind, RunSetup};

/// What a keygen session starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeygenRole {
    /// No prior key
    Fresh,
    /// Re-share an existing key
    Rotation,
    /// Holds a share and helps rebuild the lost ones
    RecoveryHelper,
    /// Lost its share and only knows the public key
    RecoveryLost,
}

/// Key material a run starts from
#[derive(Clone, Serialize, Deserialize)]
enum Prior {
    Fresh,
    Rotation(Box<Keyshare>),
    Helper {
        keyshare: Box<Keyshare>,
        lost: Vec<PartyId>,
    },
    Lost {
        #[serde(with = "point_serde")]
        public_key: ProjectivePoint,
        lost: Vec<PartyId>,
    },
}

impl Prior {
    fn role(&self) -> KeygenRole {
        match self {
            Prior::Fresh => KeygenRole::Fresh,
            Prior::Rotation(_) => KeygenRole::Rotation,
            Prior::Helper { .. } => KeygenRole::RecoveryHelper,
            Prior::Lost { .. } => KeygenRole::RecoveryLost,
        }
    }

    fn public_key(&self) -> Option<ProjectivePoint> {
        match self {
            Prior::Fresh => None,
            Prior::Rotation(keyshare) | Prior::Helper { keyshare, .. } => Some(keyshare.public_key),
            Prior::Lost { public_key, .. } => Some(*public_key),
        }
    }

    /// Parties being recovered, empty unless this is a recovery run
    fn lost(&self) -> &[PartyId] {
        match self {
            Prior::Helper { lost, .. } | Prior::Lost { lost, .. } => lost,
            _ => &[],
        }
    }

    /// Run parameters announced in round 1; every party must announce the same
    fn setup(&self, config: &PartyConfig) -> RunSetup {
        let kind = match self {
            Prior::Fresh => RunKind::Fresh,
            Prior::Rotation(_) => RunKind::Rotation,
            Prior::Helper { .. } | Prior::Lost { .. } => RunKind::Recovery,
        };
        RunSetup {
            participants: config.participants,
            threshold: config.threshold,
            kind,
            public_key: self
                .public_key()
                .map(|point| point_bytes(&point).to_vec())
                .unwrap_or_default(),
            lost: self.lost().to_vec(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
enum KeygenState {
    Created,
    R1Sent(Round1State),
    R2Sent(Round2State),
    R3Sent(Round3State),
    R4Sent(Round4State),
    Completed(Box<Keyshare>),
    Aborted,
}

impl KeygenState {
    fn round(&self) -> Option<Round> {
        Some(match self {
            KeygenState::Created => Round::Created,
            KeygenState::R1Sent(_) => Round::R1Sent,
            KeygenState::R2Sent(_) => Round::R2Sent,
            KeygenState::R3Sent(_) => Round::R3Sent,
            KeygenState::R4Sent(_) => Round::R4Sent,
            KeygenState::Completed(_) => Round::Completed,
            KeygenState::Aborted => return None,
        })
    }
}

/// Keygen session of one party
#[derive(Clone, Serialize, Deserialize)]
pub struct KeygenSession {
    core: SessionCore,
    prior: Prior,
    state: KeygenState,
}

impl fmt::Debug for KeygenSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeygenSession")
            .field("party_id", &self.core.party_id())
            .field("role", &self.prior.role())
            .field("round", &self.state.round())
            .finish_non_exhaustive()
    }
}

impl KeygenSession {
    fn start(config: PartyConfig, prior: Prior, seed: Option<[u8; 32]>) -> Self {
        info!(
            party_id = config.party_id,
            participants = config.participants,
            threshold = config.threshold,
            role = ?prior.role(),
            "Starting keygen"
        );
        Self {
            core: SessionCore::new(config, ProtocolTag::Keygen, seed),
            prior,
            state: KeygenState::Created,
        }
    }

    /// Fresh keygen for party `party_id` of a `threshold`-of-`participants` key
    pub fn new(participants: u8, threshold: u8, party_id: PartyId, seed: Option<[u8; 32]>) -> Result<Self> {
        let config = PartyConfig::new(participants, threshold, party_id)?;
        Ok(Self::start(config, Prior::Fresh, seed))
    }

    /// Re-share the key behind `old` among the same parties
    pub fn init_rotation(old: &Keyshare, seed: Option<[u8; 32]>) -> Result<Self> {
        let config = keyshare_config(old)?;
        Ok(Self::start(config, Prior::Rotation(Box::new(old.clone())), seed))
    }

    /// Help the parties in `lost` rebuild their shares
    pub fn init_recovery(old: &Keyshare, lost: &[PartyId], seed: Option<[u8; 32]>) -> Result<Self> {
        let config = keyshare_config(old)?;
        let lost = key_refresh::normalize_lost(&config, lost)?;
        if lost.contains(&config.party_id) {
            return Err(Error::ConfigurationMismatch(format!(
                "party {} holds a share but is listed as lost",
                config.party_id
            )));
        }
        let prior = Prior::Helper {
            keyshare: Box::new(old.clone()),
            lost,
        };
        Ok(Self::start(config, prior, seed))
    }

    /// Rebuild this party's share of `public_key` with the help of the others
    pub fn init_lost_share_recovery(
        participants: u8,
        threshold: u8,
        party_id: PartyId,
        public_key: &[u8],
        lost: &[PartyId],
        seed: Option<[u8; 32]>,
    ) -> Result<Self> {
        let config = PartyConfig::new(participants, threshold, party_id)?;
        let public_key = decode_point(public_key)
            .ok_or_else(|| Error::InvalidInput("public key is not a valid compressed point".into()))?;
        let lost = key_refresh::normalize_lost(&config, lost)?;
        if !lost.contains(&party_id) {
            return Err(Error::ConfigurationMismatch(format!(
                "party {party_id} recovers its share but is not listed as lost"
            )));
        }
        Ok(Self::start(config, Prior::Lost { public_key, lost }, seed))
    }

    pub fn party_id(&self) -> PartyId {
        self.core.party_id()
    }

    pub fn role(&self) -> KeygenRole {
        self.prior.role()
    }

    /// Current round, `None` once the session has aborted
    pub fn round(&self) -> Option<Round> {
        self.state.round()
    }

    /// Apply a round result: success moves to the next state, an abort
    /// terminates the session, anything else leaves it as it was
    fn settle<T>(&mut self, result: Result<(KeygenState, T)>) -> Result<T> {
        match result {
            Ok((state, out)) => {
                self.state = state;
                Ok(out)
            }
            Err(err) => {
                if err.is_abort() {
                    warn!(party_id = self.core.party_id(), error = %err, "Keygen aborted");
                    self.state = KeygenState::Aborted;
                }
                Err(err)
            }
        }
    }

    /// Round 1 broadcast
    pub fn produce_first(&mut self) -> Result<Envelope> {
        match &self.state {
            KeygenState::Created => {}
            KeygenState::Aborted => return Err(Error::ConsumedSession),
            _ => return Err(Error::DuplicateCall("produce_first")),
        }
        let result = dkg::round1(&self.core, &self.prior)
            .map(|(state, envelope)| (KeygenState::R1Sent(state), envelope));
        self.settle(result)
    }

    /// Consume the previous round's batch and produce the next one.
    ///
    /// The call that follows [`commitment_digest`](Self::commitment_digest)
    /// needs the concatenation of every party's digest, in party-id order,
    /// as `commitments`. The final call returns an empty batch.
    #[instrument(skip_all, fields(party_id = self.core.party_id(), round = ?self.state.round()))]
    pub fn advance(&mut self, inbound: &[Envelope], commitments: Option<&[u8]>) -> Result<Vec<Envelope>> {
        let (core, prior) = (&self.core, &self.prior);
        let result = match &self.state {
            KeygenState::Created => return Err(Error::InvalidState("produce_first has not been called")),
            KeygenState::R1Sent(state) => {
                dkg::round2(core, prior, state, inbound).map(|(next, out)| (KeygenState::R2Sent(next), out))
            }
            KeygenState::R2Sent(state) => dkg::round3(core, prior, state, inbound, commitments)
                .map(|(next, out)| (KeygenState::R3Sent(next), out)),
            KeygenState::R3Sent(state) => {
                dkg::round4(core, prior, state, inbound).map(|(next, out)| (KeygenState::R4Sent(next), out))
            }
            KeygenState::R4Sent(state) => dkg::round5(core, state, inbound)
                .map(|keyshare| (KeygenState::Completed(Box::new(keyshare)), Vec::new())),
            KeygenState::Completed(_) => return Err(Error::InvalidState("keygen already completed")),
            KeygenState::Aborted => return Err(Error::ConsumedSession),
        };
        self.settle(result)
    }

    /// This party's 32-byte chain code commitment, available between rounds 2 and 3
    pub fn commitment_digest(&self) -> Result<[u8; 32]> {
        match &self.state {
            KeygenState::R2Sent(state) => Ok(state.commitment),
            KeygenState::Aborted => Err(Error::ConsumedSession),
            _ => Err(Error::InvalidState("commitment digest exists only after round 2")),
        }
    }

    /// Take the keyshare out of a completed session
    pub fn extract(self) -> Result<Keyshare> {
        let keyshare = match self.state {
            KeygenState::Completed(keyshare) => keyshare,
            KeygenState::Aborted => return Err(Error::ConsumedSession),
            _ => return Err(Error::InvalidState("keygen has not completed")),
        };

        keyshare.validate()?;
        if let Some(expected) = self.prior.public_key() {
            if keyshare.public_key != expected {
                return Err(Error::abort_unknown("run produced a different public key"));
            }
        }

        info!(
            party_id = keyshare.party_id,
            public_key = hex::encode(keyshare.public_key()),
            "Keygen completed"
        );
        Ok(*keyshare)
    }

    /// Snapshot the session
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::SerializationUnsupported(e.to_string()))
    }

    /// Restore a snapshot taken with [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn keyshare_config(keyshare: &Keyshare) -> Result<PartyConfig> {
    keyshare.validate()?;
    PartyConfig::new(keyshare.participants, keyshare.threshold, keyshare.party_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Offender, keyshare::tests::dealt, mpc::memory::run_keygen};
    use k256::Scalar;

    fn assert_blames(err: Error, party: PartyId, reason_part: &str) {
        match err {
            Error::ProtocolAbort {
                offender: Offender::Party(id),
                reason,
            } if id == party => assert!(reason.contains(reason_part), "{reason}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    fn fresh(participants: u8, threshold: u8) -> Vec<KeygenSession> {
        (0..participants)
            .map(|id| KeygenSession::new(participants, threshold, id, Some([id + 1; 32])).unwrap())
            .collect()
    }

    #[test]
    fn test_fresh_keygen_agrees_on_public_key() {
        let shares = run_keygen(fresh(3, 2)).unwrap();
        assert_eq!(shares.len(), 3);
        for share in &shares {
            assert_eq!(share.public_key(), shares[0].public_key());
            assert_eq!(share.chain_code(), shares[0].chain_code());
            assert_eq!(share.setup_id(), shares[0].setup_id());
        }
        assert_ne!(shares[0].secret_share, shares[1].secret_share);
    }

    #[test]
    fn test_seeded_keygen_is_reproducible() {
        let first = run_keygen(fresh(2, 2)).unwrap();
        let second = run_keygen(fresh(2, 2)).unwrap();
        assert_eq!(first[0].public_key(), second[0].public_key());
        assert_eq!(first[1].secret_share, second[1].secret_share);
    }

    #[test]
    fn test_rotation_keeps_public_key() {
        let old = run_keygen(fresh(3, 2)).unwrap();
        let sessions = old
            .iter()
            .map(|share| KeygenSession::init_rotation(share, None).unwrap())
            .collect();
        let new = run_keygen(sessions).unwrap();

        for (old, new) in old.iter().zip(&new) {
            assert_eq!(old.public_key(), new.public_key());
            assert_eq!(old.chain_code(), new.chain_code());
            assert_ne!(old.secret_share, new.secret_share);
        }
    }

    #[test]
    fn test_recovery_rebuilds_lost_share() {
        let old = run_keygen(fresh(3, 2)).unwrap();
        let public_key = old[0].public_key();
        let sessions = vec![
            KeygenSession::init_recovery(&old[0], &[1], None).unwrap(),
            KeygenSession::init_lost_share_recovery(3, 2, 1, &public_key, &[1], None).unwrap(),
            KeygenSession::init_recovery(&old[2], &[1], None).unwrap(),
        ];
        let new = run_keygen(sessions).unwrap();

        assert_eq!(new[1].secret_share, old[1].secret_share);
        assert_eq!(new[1].chain_code(), old[1].chain_code());
        assert_eq!(new[0].secret_share, old[0].secret_share);
        assert_eq!(new[1].public_key(), public_key);
    }

    #[test]
    fn test_round_order_enforced() {
        let mut session = KeygenSession::new(2, 2, 0, None).unwrap();
        assert!(matches!(session.advance(&[], None), Err(Error::InvalidState(_))));
        assert!(matches!(session.commitment_digest(), Err(Error::InvalidState(_))));

        session.produce_first().unwrap();
        assert_eq!(session.round(), Some(Round::R1Sent));
        assert!(matches!(session.produce_first(), Err(Error::DuplicateCall(_))));
        assert!(matches!(
            session.clone().extract(),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_round3_requires_commitments() {
        let mut sessions = fresh(2, 2);
        let first: Vec<Envelope> = sessions.iter_mut().map(|s| s.produce_first().unwrap()).collect();
        let second: Vec<Vec<Envelope>> = sessions
            .iter_mut()
            .enumerate()
            .map(|(id, s)| s.advance(&[first[1 - id].clone()], None).unwrap())
            .collect();

        let inbound = second[1].clone();
        assert!(matches!(
            sessions[0].advance(&inbound, None),
            Err(Error::MissingInput(_))
        ));
        assert!(matches!(
            sessions[0].advance(&inbound, Some(&[0u8; 10][..])),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(sessions[0].round(), Some(Round::R2Sent));

        let mut commitments = Vec::new();
        for session in &sessions {
            commitments.extend_from_slice(&session.commitment_digest().unwrap());
        }
        sessions[0].advance(&inbound, Some(commitments.as_slice())).unwrap();
        assert_eq!(sessions[0].round(), Some(Round::R3Sent));
    }

    #[test]
    fn test_mismatched_setup_rejected() {
        let mut a = KeygenSession::new(2, 2, 0, None).unwrap();
        let mut b = KeygenSession::new(2, 1, 1, None).unwrap();
        a.produce_first().unwrap();
        let from_b = b.produce_first().unwrap();
        assert!(matches!(
            a.advance(&[from_b], None),
            Err(Error::ConfigurationMismatch(_))
        ));
        assert_eq!(a.round(), Some(Round::R1Sent));
    }

    #[test]
    fn test_recovery_roles_checked() {
        let shares = dealt(3, 2);
        assert!(matches!(
            KeygenSession::init_recovery(&shares[0], &[0], None),
            Err(Error::ConfigurationMismatch(_))
        ));
        assert!(matches!(
            KeygenSession::init_recovery(&shares[0], &[1, 2], None),
            Err(Error::ConfigurationMismatch(_))
        ));
        assert!(matches!(
            KeygenSession::init_recovery(&shares[0], &[], None),
            Err(Error::InvalidInput(_))
        ));

        let public_key = shares[0].public_key();
        assert!(matches!(
            KeygenSession::init_lost_share_recovery(3, 2, 1, &public_key, &[2], None),
            Err(Error::ConfigurationMismatch(_))
        ));
        assert!(matches!(
            KeygenSession::init_lost_share_recovery(3, 2, 1, &[2u8; 12], &[1], None),
            Err(Error::InvalidInput(_))
        ));
        let session = KeygenSession::init_lost_share_recovery(3, 2, 1, &public_key, &[1], None).unwrap();
        assert_eq!(session.role(), KeygenRole::RecoveryLost);
    }

    #[test]
    fn test_snapshot_resumes() {
        let mut session = KeygenSession::new(3, 2, 1, Some([9u8; 32])).unwrap();
        let envelope = session.produce_first().unwrap();

        let restored = KeygenSession::from_bytes(&session.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.round(), Some(Round::R1Sent));
        assert_eq!(restored.party_id(), 1);

        let mut replay = KeygenSession::new(3, 2, 1, Some([9u8; 32])).unwrap();
        assert_eq!(replay.produce_first().unwrap(), envelope);
        assert!(matches!(
            KeygenSession::from_bytes(b"{}"),
            Err(Error::DeserializationFailed(_))
        ));
    }

    #[test]
    fn test_share_off_the_committed_polynomial_blamed() {
        let mut sessions = fresh(3, 2);
        let first: Vec<Envelope> = sessions.iter_mut().map(|s| s.produce_first().unwrap()).collect();
        if let KeygenState::R1Sent(state) = &mut sessions[2].state {
            if let dkg::LocalDealing::Polynomial(coefficients) = &mut state.dealing {
                coefficients[1] += Scalar::ONE;
            }
        }

        let second: Vec<Vec<Envelope>> = sessions
            .iter_mut()
            .enumerate()
            .map(|(id, session)| {
                let inbound: Vec<Envelope> = first
                    .iter()
                    .filter(|e| e.from_id as usize != id)
                    .cloned()
                    .collect();
                session.advance(&inbound, None).unwrap()
            })
            .collect();
        let commitments: Vec<u8> = sessions
            .iter()
            .flat_map(|session| session.commitment_digest().unwrap())
            .collect();
        let to_first: Vec<Envelope> = second
            .iter()
            .flatten()
            .filter(|e| e.to_id == Some(0))
            .cloned()
            .collect();

        let err = sessions[0].advance(&to_first, Some(&commitments)).unwrap_err();
        assert_blames(err, 2, "VSS share does not match");
        assert_eq!(sessions[0].round(), None);
    }

    #[test]
    fn test_wrong_rotation_constant_blamed() {
        let old = run_keygen(fresh(3, 2)).unwrap();
        let mut sessions: Vec<KeygenSession> = old
            .iter()
            .map(|share| KeygenSession::init_rotation(share, None).unwrap())
            .collect();
        if let Prior::Rotation(keyshare) = &mut sessions[2].prior {
            keyshare.secret_share += Scalar::ONE;
        }

        let first: Vec<Envelope> = sessions.iter_mut().map(|s| s.produce_first().unwrap()).collect();
        let err = sessions[0]
            .advance(&first[1..], None)
            .unwrap_err();
        assert_blames(err, 2, "rotation constant does not match");
    }
}
