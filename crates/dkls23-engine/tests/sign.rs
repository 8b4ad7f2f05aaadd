mod common;

use dkls23_engine::{
    keygen::KeygenSession,
    mpc::{memory, MemoryRelay, Relay},
    sign::{BaseMta, OtMta},
    BaseSignSession, Envelope, Error, Keyshare, OtSignSession, ProtocolTag, Round, SignVariant,
};

use common::{keygen, seed, sign, sign_to_round4};

const ZERO_DIGEST: [u8; 32] = [0u8; 32];
const DIGEST: [u8; 32] = [0x5a; 32];

fn signs_with<V: SignVariant>(shares: &[&Keyshare], digest: &[u8; 32]) {
    let signatures = sign::<V>(shares, digest, 3);
    assert_eq!(signatures.len(), shares.len());
    for signature in &signatures {
        assert_eq!(signature, &signatures[0]);
        assert!(signature.recovery_id < 2);
    }
    signatures[0]
        .verify_prehash(&shares[0].public_key(), digest)
        .unwrap();
}

#[test]
fn test_two_of_two_signs_zero_digest() {
    let shares = keygen(2, 2);
    let all: Vec<&Keyshare> = shares.iter().collect();
    signs_with::<BaseMta>(&all, &ZERO_DIGEST);
    signs_with::<OtMta>(&all, &ZERO_DIGEST);
}

#[test]
fn test_any_quorum_signs() {
    let shares = keygen(3, 2);
    for quorum in [[0, 1], [1, 2], [0, 2]] {
        let signers: Vec<&Keyshare> = quorum.iter().map(|&i| &shares[i]).collect();
        signs_with::<BaseMta>(&signers, &DIGEST);
        signs_with::<OtMta>(&signers, &DIGEST);
    }

    let all: Vec<&Keyshare> = shares.iter().collect();
    signs_with::<OtMta>(&all, &DIGEST);
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let shares = keygen(2, 2);
    let all: Vec<&Keyshare> = shares.iter().collect();
    assert_eq!(
        sign::<OtMta>(&all, &DIGEST, 7),
        sign::<OtMta>(&all, &DIGEST, 7)
    );
    assert_ne!(
        sign::<OtMta>(&all, &DIGEST, 7)[0].r,
        sign::<OtMta>(&all, &DIGEST, 8)[0].r
    );
}

#[test]
fn test_derived_key_signs() {
    let shares = keygen(3, 2);
    let sessions = vec![
        BaseSignSession::new(&shares[0], "m/0/7", seed(0, 4)).unwrap(),
        BaseSignSession::new(&shares[2], "m/0/7", seed(2, 4)).unwrap(),
    ];
    let derived = sessions[0].public_key();
    assert_eq!(derived, shares[1].derive_public_key("m/0/7").unwrap());
    assert_ne!(derived, shares[0].public_key());

    let signatures = memory::run_sign(sessions, &DIGEST).unwrap();
    signatures[0].verify_prehash(&derived, &DIGEST).unwrap();
    assert!(signatures[0]
        .verify_prehash(&shares[0].public_key(), &DIGEST)
        .is_err());
}

#[test]
fn test_restored_keyshare_signs_identically() {
    let shares = keygen(2, 2);
    let restored: Vec<Keyshare> = shares
        .iter()
        .map(|share| Keyshare::from_bytes(&share.to_bytes().unwrap()).unwrap())
        .collect();

    let original = sign::<OtMta>(&shares.iter().collect::<Vec<_>>(), &DIGEST, 5);
    let again = sign::<OtMta>(&restored.iter().collect::<Vec<_>>(), &DIGEST, 5);
    assert_eq!(original, again);
}

#[test]
fn test_rotated_shares_sign() {
    let old = keygen(3, 2);
    let rotated = memory::run_keygen(
        old.iter()
            .map(|share| KeygenSession::init_rotation(share, seed(share.party_id(), 2)).unwrap())
            .collect(),
    )
    .unwrap();

    signs_with::<OtMta>(&[&rotated[0], &rotated[2]], &DIGEST);
    signs_with::<BaseMta>(&[&rotated[1], &rotated[2]], &DIGEST);
    assert_eq!(rotated[0].public_key(), old[0].public_key());
}

#[test]
fn test_recovered_share_signs() {
    let shares = keygen(3, 2);
    let public_key = shares[0].public_key();

    let recovered = memory::run_keygen(vec![
        KeygenSession::init_recovery(&shares[0], &[1], seed(0, 6)).unwrap(),
        KeygenSession::init_lost_share_recovery(3, 2, 1, &public_key, &[1], seed(1, 6)).unwrap(),
        KeygenSession::init_recovery(&shares[2], &[1], seed(2, 6)).unwrap(),
    ])
    .unwrap();

    // the rebuilt share sits on the old polynomial, next to untouched shares
    signs_with::<BaseMta>(&[&recovered[1], &shares[0]], &DIGEST);
    signs_with::<OtMta>(&[&recovered[1], &recovered[2]], &DIGEST);

    let mut sessions = vec![
        OtSignSession::new(&recovered[1], "m", seed(1, 3)).unwrap(),
        OtSignSession::new(&shares[2], "m", seed(2, 3)).unwrap(),
    ];
    let first: Vec<Envelope> = sessions
        .iter_mut()
        .map(|session| session.produce_first().unwrap())
        .collect();
    assert!(matches!(
        sessions[0].advance(&first[1..]),
        Err(Error::ConfigurationMismatch(_))
    ));
    assert_eq!(sessions[0].round(), Some(Round::R1Sent));
}

#[test]
fn test_tampered_round_blames_sender() {
    let shares = keygen(3, 2);
    let mut sessions: Vec<BaseSignSession> = shares
        .iter()
        .map(|share| BaseSignSession::new(share, "m", seed(share.party_id(), 1)).unwrap())
        .collect();
    let mut relay = MemoryRelay::new(&[0, 1, 2]);
    for session in &mut sessions {
        relay.post(session.produce_first().unwrap()).unwrap();
    }
    let round1: Vec<Vec<Envelope>> = (0..3).map(|id| relay.take(id)).collect();
    for (session, inbox) in sessions.iter_mut().zip(&round1) {
        for envelope in session.advance(inbox).unwrap() {
            relay.post(envelope).unwrap();
        }
    }

    let mut inbox = relay.take(0);
    let tampered = inbox.iter_mut().find(|e| e.from_id == 1).unwrap();
    let last = tampered.payload.len() - 1;
    tampered.payload[last] ^= 0x20;

    let err = sessions[0].advance(&inbox).unwrap_err();
    assert_eq!(err.offending_party(), Some(1));
    assert_eq!(sessions[0].round(), None);
    assert!(matches!(
        sessions[0].advance(&inbox),
        Err(Error::ConsumedSession)
    ));

    let mut restored = BaseSignSession::from_bytes(&sessions[0].to_bytes().unwrap()).unwrap();
    assert!(matches!(
        restored.produce_first(),
        Err(Error::ConsumedSession)
    ));
}

#[test]
fn test_foreign_signature_share_blames_sender() {
    let shares = keygen(2, 2);
    let mut sessions: Vec<OtSignSession> = shares
        .iter()
        .map(|share| OtSignSession::new(share, "m", seed(share.party_id(), 1)).unwrap())
        .collect();
    let inboxes = sign_to_round4(&mut sessions);
    for (session, inbox) in sessions.iter_mut().zip(&inboxes) {
        assert!(session.advance(inbox).unwrap().is_empty());
        assert_eq!(session.round(), Some(Round::R4Sent));
    }

    let share_zero = sessions[0].last_message(&DIGEST).unwrap();
    let other_digest = sessions[1].last_message(&ZERO_DIGEST).unwrap();

    let err = sessions.remove(0).combine(&[other_digest]).unwrap_err();
    assert_eq!(err.offending_party(), Some(1));

    let signature = sessions.remove(0).combine(&[share_zero]);
    assert!(signature.unwrap_err().is_abort());
}

#[test]
fn test_call_order_is_enforced() {
    let shares = keygen(2, 2);
    let mut session = BaseSignSession::new(&shares[0], "m", None).unwrap();
    let mut peer = BaseSignSession::new(&shares[1], "m", None).unwrap();

    assert!(matches!(session.advance(&[]), Err(Error::InvalidState(_))));
    assert!(matches!(
        session.last_message(&DIGEST),
        Err(Error::InvalidState(_))
    ));

    let first = session.produce_first().unwrap();
    assert!(matches!(
        session.produce_first(),
        Err(Error::DuplicateCall(_))
    ));
    assert!(matches!(
        session.advance(&[first.clone()]),
        Err(Error::SelfMessage(0))
    ));
    assert!(matches!(
        session.advance(&[Envelope::direct(1, 0, first.payload.clone())]),
        Err(Error::WrongParty { from: 1, to: Some(0) })
    ));
    assert!(matches!(session.advance(&[]), Err(Error::InvalidInput(_))));

    let ot_peer = {
        let mut ot = OtSignSession::new(&shares[1], "m", None).unwrap();
        ot.produce_first().unwrap()
    };
    assert!(matches!(
        session.advance(&[ot_peer]),
        Err(Error::ProtocolMismatch {
            from: 1,
            expected: ProtocolTag::SignBase,
            found: ProtocolTag::SignOt
        })
    ));

    assert_eq!(session.round(), Some(Round::R1Sent));
    session.advance(&[peer.produce_first().unwrap()]).unwrap();
    assert_eq!(session.round(), Some(Round::R2Sent));

    assert!(matches!(
        BaseSignSession::new(&shares[0], "x/0", None),
        Err(Error::InvalidDerivationPath(_))
    ));
}

#[test]
fn test_snapshots_stop_at_pre_signature() {
    let shares = keygen(2, 2);
    let mut sessions: Vec<OtSignSession> = shares
        .iter()
        .map(|share| OtSignSession::new(share, "m", seed(share.party_id(), 2)).unwrap())
        .collect();
    let inboxes = sign_to_round4(&mut sessions);

    // a restored session finishes the run like the live one
    let mut restored: Vec<OtSignSession> = sessions
        .iter()
        .map(|session| OtSignSession::from_bytes(&session.to_bytes().unwrap()).unwrap())
        .collect();
    assert_eq!(restored[0].round(), Some(Round::R3Sent));

    for (session, inbox) in restored.iter_mut().zip(&inboxes) {
        session.advance(inbox).unwrap();
        assert!(matches!(
            session.to_bytes(),
            Err(Error::SerializationUnsupported(_))
        ));
    }

    let last: Vec<Envelope> = restored
        .iter_mut()
        .map(|session| session.last_message(&DIGEST).unwrap())
        .collect();
    assert!(matches!(
        restored[0].last_message(&DIGEST),
        Err(Error::DuplicateCall(_))
    ));
    assert!(matches!(
        restored[0].to_bytes(),
        Err(Error::SerializationUnsupported(_))
    ));

    let mut restored = restored.into_iter();
    let first = restored.next().unwrap().combine(&last[1..]).unwrap();
    let second = restored.next().unwrap().combine(&last[..1]).unwrap();
    assert_eq!(first, second);
    first
        .verify_prehash(&shares[0].public_key(), &DIGEST)
        .unwrap();
}
