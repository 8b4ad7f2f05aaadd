//! Shared session scaffolding
//!
//! Both protocols walk the same linear round sequence. The pieces here
//! enforce that sequence from the outside: per-round randomness, inbound
//! batch validation and the session identity every round needs.

use std::collections::BTreeMap;

use rand::rngs::OsRng;
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    error::{Error, Result},
    message::{Envelope, ProtocolTag},
    types::{PartyConfig, PartyId},
    utils::kdf,
};

/// Position of a session in its round sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Round {
    /// Constructed, nothing sent yet
    Created,
    /// First broadcast produced
    R1Sent,
    R2Sent,
    R3Sent,
    /// Keygen: final round sent. Signing: pre-signature ready
    R4Sent,
    /// Result available
    Completed,
}

/// Master randomness of one session.
///
/// Every round draws from its own ChaCha20 stream derived from this seed, so a
/// seeded session is fully reproducible.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct SessionSeed([u8; 32]);

impl SessionSeed {
    pub fn new(seed: Option<[u8; 32]>) -> Self {
        match seed {
            Some(seed) => Self(seed),
            None => {
                let mut seed = [0u8; 32];
                OsRng.fill_bytes(&mut seed);
                Self(seed)
            }
        }
    }

    pub fn rng(&self, label: &[u8]) -> ChaCha20Rng {
        ChaCha20Rng::from_seed(kdf(b"dkls23-engine/rng", &[&self.0, label]))
    }

    /// Stream for work done on behalf of one peer, independent of scheduling order
    pub fn peer_rng(&self, label: &[u8], peer: PartyId) -> ChaCha20Rng {
        ChaCha20Rng::from_seed(kdf(b"dkls23-engine/rng", &[&self.0, label, &[peer]]))
    }
}

/// How a round's messages are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Broadcast,
    Direct,
}

/// Identity shared by every round of a session
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct SessionCore {
    pub config: PartyConfig,
    pub tag: ProtocolTag,
    pub seed: SessionSeed,
}

impl SessionCore {
    pub fn new(config: PartyConfig, tag: ProtocolTag, seed: Option<[u8; 32]>) -> Self {
        Self {
            config,
            tag,
            seed: SessionSeed::new(seed),
        }
    }

    pub fn party_id(&self) -> PartyId {
        self.config.party_id
    }

    /// Addressing checks applied to every inbound envelope before anything else
    fn check_routing(&self, inbound: &[Envelope], delivery: Delivery) -> Result<()> {
        let me = self.party_id();
        for envelope in inbound {
            if envelope.from_id == me {
                return Err(Error::SelfMessage(me));
            }
            let addressed = match (delivery, envelope.to_id) {
                (Delivery::Broadcast, None) => true,
                (Delivery::Direct, Some(to)) => to == me,
                _ => false,
            };
            if !addressed {
                return Err(Error::WrongParty {
                    from: envelope.from_id,
                    to: envelope.to_id,
                });
            }
        }
        Ok(())
    }

    /// Index a batch by sender, requiring exactly one message from each of `expected`
    pub fn collect<'a>(
        &self,
        inbound: &'a [Envelope],
        expected: &[PartyId],
        delivery: Delivery,
    ) -> Result<BTreeMap<PartyId, &'a Envelope>> {
        self.check_routing(inbound, delivery)?;

        let mut batch = BTreeMap::new();
        for envelope in inbound {
            if !expected.contains(&envelope.from_id) {
                return Err(Error::InvalidInput(format!(
                    "unexpected message from party {}",
                    envelope.from_id
                )));
            }
            if batch.insert(envelope.from_id, envelope).is_some() {
                return Err(Error::InvalidInput(format!(
                    "duplicate message from party {}",
                    envelope.from_id
                )));
            }
        }

        if let Some(missing) = expected.iter().find(|id| !batch.contains_key(id)) {
            return Err(Error::InvalidInput(format!(
                "missing message from party {missing}"
            )));
        }

        Ok(batch)
    }

    /// Index a batch whose sender set is chosen by the senders themselves.
    ///
    /// Between `min` and `max` distinct known parties must be present.
    pub fn collect_open<'a>(
        &self,
        inbound: &'a [Envelope],
        min: usize,
        max: usize,
    ) -> Result<BTreeMap<PartyId, &'a Envelope>> {
        let known = self.config.peers();
        let batch = {
            self.check_routing(inbound, Delivery::Broadcast)?;
            let mut batch = BTreeMap::new();
            for envelope in inbound {
                if !known.contains(&envelope.from_id) {
                    return Err(Error::InvalidInput(format!(
                        "unknown party {}",
                        envelope.from_id
                    )));
                }
                if batch.insert(envelope.from_id, envelope).is_some() {
                    return Err(Error::InvalidInput(format!(
                        "duplicate message from party {}",
                        envelope.from_id
                    )));
                }
            }
            batch
        };

        if batch.len() < min || batch.len() > max {
            return Err(Error::InvalidInput(format!(
                "expected between {min} and {max} messages, got {}",
                batch.len()
            )));
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(id: PartyId) -> SessionCore {
        SessionCore::new(
            PartyConfig::new(3, 2, id).unwrap(),
            ProtocolTag::Keygen,
            Some([1u8; 32]),
        )
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let a = SessionSeed::new(Some([5u8; 32]));
        let b = SessionSeed::new(Some([5u8; 32]));
        assert_eq!(a.rng(b"round1").next_u64(), b.rng(b"round1").next_u64());
        assert_ne!(a.rng(b"round1").next_u64(), a.rng(b"round2").next_u64());
        assert_ne!(
            a.peer_rng(b"round2", 1).next_u64(),
            a.peer_rng(b"round2", 2).next_u64()
        );
    }

    #[test]
    fn test_collect_broadcast() {
        let core = core(0);
        let inbound = vec![Envelope::broadcast(2, vec![1]), Envelope::broadcast(1, vec![2])];
        let batch = core.collect(&inbound, &[1, 2], Delivery::Broadcast).unwrap();
        assert_eq!(batch.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_collect_rejects_self_message() {
        let core = core(0);
        let inbound = vec![Envelope::broadcast(0, vec![1])];
        assert!(matches!(
            core.collect(&inbound, &[1, 2], Delivery::Broadcast),
            Err(Error::SelfMessage(0))
        ));
    }

    #[test]
    fn test_collect_rejects_misrouted() {
        let core = core(0);
        let inbound = vec![Envelope::direct(1, 2, vec![1])];
        assert!(matches!(
            core.collect(&inbound, &[1, 2], Delivery::Direct),
            Err(Error::WrongParty { from: 1, to: Some(2) })
        ));

        let inbound = vec![Envelope::direct(1, 0, vec![1])];
        assert!(matches!(
            core.collect(&inbound, &[1, 2], Delivery::Broadcast),
            Err(Error::WrongParty { from: 1, .. })
        ));
    }

    #[test]
    fn test_collect_rejects_duplicates_and_gaps() {
        let core = core(0);
        let inbound = vec![Envelope::broadcast(1, vec![1]), Envelope::broadcast(1, vec![2])];
        assert!(matches!(
            core.collect(&inbound, &[1, 2], Delivery::Broadcast),
            Err(Error::InvalidInput(_))
        ));

        let inbound = vec![Envelope::broadcast(1, vec![1])];
        assert!(matches!(
            core.collect(&inbound, &[1, 2], Delivery::Broadcast),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_collect_open_bounds() {
        let core = core(1);
        let inbound = vec![Envelope::broadcast(0, vec![1])];
        assert_eq!(core.collect_open(&inbound, 1, 2).unwrap().len(), 1);
        assert!(matches!(core.collect_open(&[], 1, 2), Err(Error::InvalidInput(_))));

        let inbound = vec![Envelope::broadcast(7, vec![1])];
        assert!(matches!(
            core.collect_open(&inbound, 1, 2),
            Err(Error::InvalidInput(_))
        ));
    }
}
