//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::Once;

use dkls23_engine::{
    keygen::KeygenSession,
    mpc::{memory, MemoryRelay, Relay},
    Envelope, Keyshare, PartyId, SignSession, SignVariant, Signature,
};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route engine logs to the test output; filter with `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn seed(party: PartyId, run: u8) -> Option<[u8; 32]> {
    let mut seed = [run; 32];
    seed[0] = party;
    Some(seed)
}

/// Seeded fresh keygen among `participants` parties
pub fn keygen(participants: u8, threshold: u8) -> Vec<Keyshare> {
    init_tracing();
    let sessions = (0..participants)
        .map(|id| KeygenSession::new(participants, threshold, id, seed(id, 1)).unwrap())
        .collect();
    memory::run_keygen(sessions).unwrap()
}

pub fn sign<V: SignVariant>(shares: &[&Keyshare], digest: &[u8; 32], run: u8) -> Vec<Signature> {
    let sessions = shares
        .iter()
        .map(|share| SignSession::<V>::new(share, "m", seed(share.party_id(), run)).unwrap())
        .collect();
    memory::run_sign(sessions, digest).unwrap()
}

/// Drive keygen sessions through round 2 and return each party's round-2 inbox
/// together with the concatenated commitments
pub fn keygen_to_round3(sessions: &mut [KeygenSession]) -> (Vec<Vec<Envelope>>, Vec<u8>) {
    let ids: Vec<PartyId> = sessions.iter().map(KeygenSession::party_id).collect();
    let mut relay = MemoryRelay::new(&ids);

    for session in sessions.iter_mut() {
        relay.post(session.produce_first().unwrap()).unwrap();
    }
    let inbound: Vec<Vec<Envelope>> = ids.iter().map(|&id| relay.take(id)).collect();
    for (session, batch) in sessions.iter_mut().zip(&inbound) {
        for envelope in session.advance(batch, None).unwrap() {
            relay.post(envelope).unwrap();
        }
    }

    let commitments = sessions
        .iter()
        .flat_map(|session| session.commitment_digest().unwrap())
        .collect();
    (ids.iter().map(|&id| relay.take(id)).collect(), commitments)
}

/// Drive signing sessions through round 3 and return each party's round-3 inbox
pub fn sign_to_round4<V: SignVariant>(sessions: &mut [SignSession<V>]) -> Vec<Vec<Envelope>> {
    let ids: Vec<PartyId> = sessions.iter().map(SignSession::party_id).collect();
    let mut relay = MemoryRelay::new(&ids);

    for session in sessions.iter_mut() {
        relay.post(session.produce_first().unwrap()).unwrap();
    }
    for _ in 0..2 {
        let inbound: Vec<Vec<Envelope>> = ids.iter().map(|&id| relay.take(id)).collect();
        for (session, batch) in sessions.iter_mut().zip(&inbound) {
            for envelope in session.advance(batch).unwrap() {
                relay.post(envelope).unwrap();
            }
        }
    }

    ids.iter().map(|&id| relay.take(id)).collect()
}
