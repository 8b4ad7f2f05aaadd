//! In-memory relay implementation for testing

use std::collections::BTreeMap;

use tracing::debug;

use super::Relay;
use crate::{
    keygen::KeygenSession,
    keyshare::Keyshare,
    message::Envelope,
    sign::{SignSession, SignVariant},
    Error, PartyId, Result, Signature,
};

/// In-memory message relay for local testing
#[derive(Debug, Default)]
pub struct MemoryRelay {
    /// Inbox of every party taking part
    queues: BTreeMap<PartyId, Vec<Envelope>>,
}

impl MemoryRelay {
    /// Create a relay between `parties`
    pub fn new(parties: &[PartyId]) -> Self {
        Self {
            queues: parties.iter().map(|&id| (id, Vec::new())).collect(),
        }
    }

    /// Number of envelopes waiting for `party`
    pub fn pending(&self, party: PartyId) -> usize {
        self.queues.get(&party).map_or(0, Vec::len)
    }

    /// Each party's inbox, drained all at once so a round only sees the previous round
    fn take_all(&mut self, parties: &[PartyId]) -> Vec<Vec<Envelope>> {
        parties.iter().map(|&id| self.take(id)).collect()
    }
}

impl Relay for MemoryRelay {
    fn post(&mut self, envelope: Envelope) -> Result<()> {
        match envelope.to_id {
            Some(to) => {
                let queue = self.queues.get_mut(&to).ok_or(Error::WrongParty {
                    from: envelope.from_id,
                    to: Some(to),
                })?;
                queue.push(envelope);
            }
            None => {
                for (&id, queue) in self.queues.iter_mut() {
                    if id != envelope.from_id {
                        queue.push(envelope.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn take(&mut self, party: PartyId) -> Vec<Envelope> {
        self.queues
            .get_mut(&party)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

/// Drive a set of keygen sessions, one per party, to completion
pub fn run_keygen(mut sessions: Vec<KeygenSession>) -> Result<Vec<Keyshare>> {
    let ids: Vec<PartyId> = sessions.iter().map(KeygenSession::party_id).collect();
    let mut relay = MemoryRelay::new(&ids);

    for session in &mut sessions {
        relay.post(session.produce_first()?)?;
    }

    for round in 2..=5 {
        let commitments = if round == 3 {
            let mut digests = sessions
                .iter()
                .map(|session| Ok((session.party_id(), session.commitment_digest()?)))
                .collect::<Result<Vec<_>>>()?;
            digests.sort_unstable_by_key(|(id, _)| *id);
            Some(digests.into_iter().flat_map(|(_, digest)| digest).collect::<Vec<u8>>())
        } else {
            None
        };
        debug!(round, "Relaying keygen round");

        let inbound = relay.take_all(&ids);
        for (session, batch) in sessions.iter_mut().zip(inbound) {
            for envelope in session.advance(&batch, commitments.as_deref())? {
                relay.post(envelope)?;
            }
        }
    }

    sessions.into_iter().map(KeygenSession::extract).collect()
}

/// Drive a set of signing sessions over `digest`; every signer returns the signature
pub fn run_sign<V: SignVariant>(mut sessions: Vec<SignSession<V>>, digest: &[u8; 32]) -> Result<Vec<Signature>> {
    let ids: Vec<PartyId> = sessions.iter().map(SignSession::party_id).collect();
    let mut relay = MemoryRelay::new(&ids);

    for session in &mut sessions {
        relay.post(session.produce_first()?)?;
    }

    for round in 2..=4 {
        debug!(round, "Relaying sign round");
        let inbound = relay.take_all(&ids);
        for (session, batch) in sessions.iter_mut().zip(inbound) {
            for envelope in session.advance(&batch)? {
                relay.post(envelope)?;
            }
        }
    }

    for session in &mut sessions {
        relay.post(session.last_message(digest)?)?;
    }

    let inbound = relay.take_all(&ids);
    sessions
        .into_iter()
        .zip(inbound)
        .map(|(session, batch)| session.combine(&batch))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast() {
        let mut relay = MemoryRelay::new(&[0, 1, 2]);
        relay.post(Envelope::broadcast(0, vec![42])).unwrap();
        relay.post(Envelope::broadcast(1, vec![43])).unwrap();

        assert_eq!(relay.pending(0), 1);
        let messages = relay.take(2);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload, vec![42]);
        assert_eq!(messages[1].payload, vec![43]);
        assert_eq!(relay.pending(2), 0);
    }

    #[test]
    fn test_direct() {
        let mut relay = MemoryRelay::new(&[0, 1]);
        relay.post(Envelope::direct(0, 1, vec![100])).unwrap();

        assert!(relay.take(0).is_empty());
        let messages = relay.take(1);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].to_id, Some(1));

        assert!(matches!(
            relay.post(Envelope::direct(0, 5, vec![1])),
            Err(Error::WrongParty { from: 0, to: Some(5) })
        ));
    }
}
