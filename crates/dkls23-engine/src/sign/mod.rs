//! Distributed Signature Generation (DSG) module
//!
//! A [`SignSession`] runs the four interactive rounds that produce a
//! pre-signature, then binds a digest with [`SignSession::last_message`] and
//! combines everyone's shares into an ECDSA signature. The transfer layer
//! under the multiplications is chosen by the [`SignVariant`] parameter.

mod dsg;
mod messages;
mod variant;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

pub use crate::oblivious::PairContext;
pub use variant::{BaseAnnounce, BaseMta, BaseRequest, BaseSecret, OtAnnounce, OtMta, SignVariant};

use crate::{
    error::{Error, Result},
    keyshare::{parse_path, Keyshare},
    message::{Envelope, ProtocolTag},
    session::{Round, SessionCore},
    types::{PartyConfig, PartyId, PublicKey, Signature},
    utils::point_bytes,
};

use dsg::{PartialSignature, PreSignature, Round1State, Round2State, Round3State, SignInputs};

/// Signing over fresh base OTs
pub type BaseSignSession = SignSession<BaseMta>;

/// Signing over the keyshare's seed OTs
pub type OtSignSession = SignSession<OtMta>;

#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "")]
enum SignState<V: SignVariant> {
    Created,
    R1Sent(Round1State<V>),
    R2Sent(Round2State<V>),
    R3Sent(Round3State<V>),
    #[serde(skip)]
    Pre(PreSignature),
    #[serde(skip)]
    Partial(PartialSignature),
    Aborted,
}

impl<V: SignVariant> SignState<V> {
    fn round(&self) -> Option<Round> {
        Some(match self {
            SignState::Created => Round::Created,
            SignState::R1Sent(_) => Round::R1Sent,
            SignState::R2Sent(_) => Round::R2Sent,
            SignState::R3Sent(_) => Round::R3Sent,
            SignState::Pre(_) => Round::R4Sent,
            SignState::Partial(_) => Round::Completed,
            SignState::Aborted => return None,
        })
    }
}

/// Signing session of one party
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SignSession<V: SignVariant> {
    core: SessionCore,
    inputs: SignInputs,
    state: SignState<V>,
}

impl<V: SignVariant> fmt::Debug for SignSession<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignSession")
            .field("party_id", &self.core.party_id())
            .field("protocol", &V::TAG)
            .field("round", &self.state.round())
            .finish_non_exhaustive()
    }
}

impl<V: SignVariant> SignSession<V> {
    /// Sign with `keyshare` under the key derived along `chain_path` (e.g. `m` or `m/0/7`)
    pub fn new(keyshare: &Keyshare, chain_path: &str, seed: Option<[u8; 32]>) -> Result<Self> {
        keyshare.validate()?;
        V::check_keyshare(keyshare)?;
        let (tweak, public_key) = keyshare.derive(&parse_path(chain_path)?)?;
        let config = PartyConfig::new(keyshare.participants, keyshare.threshold, keyshare.party_id)?;

        info!(
            party_id = config.party_id,
            protocol = %V::TAG,
            chain_path,
            public_key = hex::encode(point_bytes(&public_key)),
            "Starting signing"
        );

        Ok(Self {
            core: SessionCore::new(config, V::TAG, seed),
            inputs: SignInputs {
                keyshare: keyshare.clone(),
                tweak,
                public_key,
            },
            state: SignState::Created,
        })
    }

    pub fn party_id(&self) -> PartyId {
        self.core.party_id()
    }

    pub fn protocol(&self) -> ProtocolTag {
        V::TAG
    }

    /// Key the final signature verifies under
    pub fn public_key(&self) -> PublicKey {
        point_bytes(&self.inputs.public_key)
    }

    /// Current round, `None` once the session has aborted.
    ///
    /// `R4Sent` means the pre-signature is ready. `Completed` means the
    /// signature share has been produced and the session waits for the
    /// consuming [`combine`](Self::combine), the way a completed
    /// [`KeygenSession`](crate::KeygenSession) waits for `extract`.
    pub fn round(&self) -> Option<Round> {
        self.state.round()
    }

    fn settle<T>(&mut self, result: Result<(SignState<V>, T)>) -> Result<T> {
        match result {
            Ok((state, out)) => {
                self.state = state;
                Ok(out)
            }
            Err(err) => {
                if err.is_abort() {
                    warn!(party_id = self.core.party_id(), error = %err, "Signing aborted");
                    self.state = SignState::Aborted;
                }
                Err(err)
            }
        }
    }

    /// Round 1 broadcast
    pub fn produce_first(&mut self) -> Result<Envelope> {
        match &self.state {
            SignState::Created => {}
            SignState::Aborted => return Err(Error::ConsumedSession),
            _ => return Err(Error::DuplicateCall("produce_first")),
        }
        let result = dsg::round1::<V>(&self.core, &self.inputs)
            .map(|(state, envelope)| (SignState::R1Sent(state), envelope));
        self.settle(result)
    }

    /// Consume the previous round's batch and produce the next one.
    ///
    /// The third call completes the pre-signature and returns an empty batch.
    #[instrument(skip_all, fields(party_id = self.core.party_id(), round = ?self.state.round()))]
    pub fn advance(&mut self, inbound: &[Envelope]) -> Result<Vec<Envelope>> {
        let (core, inputs) = (&self.core, &self.inputs);
        let result = match &self.state {
            SignState::Created => return Err(Error::InvalidState("produce_first has not been called")),
            SignState::R1Sent(state) => {
                dsg::round2(core, inputs, state, inbound).map(|(next, out)| (SignState::R2Sent(next), out))
            }
            SignState::R2Sent(state) => {
                dsg::round3(core, inputs, state, inbound).map(|(next, out)| (SignState::R3Sent(next), out))
            }
            SignState::R3Sent(state) => {
                dsg::round4(core, inputs, state, inbound).map(|pre| (SignState::Pre(pre), Vec::new()))
            }
            SignState::Pre(_) | SignState::Partial(_) => {
                return Err(Error::InvalidState("pre-signature already complete"))
            }
            SignState::Aborted => return Err(Error::ConsumedSession),
        };
        self.settle(result)
    }

    /// Bind the 32-byte message digest and broadcast this party's signature share
    pub fn last_message(&mut self, digest: &[u8]) -> Result<Envelope> {
        let pre = match &self.state {
            SignState::Pre(pre) => pre,
            SignState::Partial(_) => return Err(Error::DuplicateCall("last_message")),
            SignState::Aborted => return Err(Error::ConsumedSession),
            _ => return Err(Error::InvalidState("pre-signature is not ready")),
        };
        let digest: [u8; 32] = digest
            .try_into()
            .map_err(|_| Error::InvalidInput(format!("digest must be 32 bytes, got {}", digest.len())))?;

        let result = dsg::partial(&self.core, pre, digest)
            .map(|(partial, envelope)| (SignState::Partial(partial), envelope));
        self.settle(result)
    }

    /// Combine every signer's share into the final signature
    pub fn combine(self, inbound: &[Envelope]) -> Result<Signature> {
        let partial = match &self.state {
            SignState::Partial(partial) => partial,
            SignState::Aborted => return Err(Error::ConsumedSession),
            _ => return Err(Error::InvalidState("last_message has not been called")),
        };

        match dsg::combine(&self.core, &self.inputs, partial, inbound) {
            Ok(signature) => {
                info!(
                    party_id = self.core.party_id(),
                    r = hex::encode(signature.r),
                    "Signature combined"
                );
                Ok(signature)
            }
            Err(err) => {
                if err.is_abort() {
                    warn!(party_id = self.core.party_id(), error = %err, "Signing aborted");
                }
                Err(err)
            }
        }
    }

    /// Snapshot the session; refused once a pre-signature exists
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if let SignState::Pre(_) | SignState::Partial(_) = self.state {
            return Err(Error::SerializationUnsupported(
                "signing session holds a pre-signature".into(),
            ));
        }
        serde_json::to_vec(self).map_err(|e| Error::SerializationUnsupported(e.to_string()))
    }

    /// Restore a snapshot taken with [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
