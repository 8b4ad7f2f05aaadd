//! Pairwise confidential channel for point-to-point payloads
//!
//! Every party announces an X25519 key in its first broadcast. Direct
//! bodies are sealed with ChaCha20-Poly1305 under a key derived from the
//! Diffie-Hellman secret and the session id; the nonce and associated
//! data bind protocol, round, sender and recipient.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand_core::{CryptoRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{
    error::{Error, Result},
    message::{decode_body, encode_body, frame, Envelope, ProtocolTag},
    types::{PartyId, SessionId},
    utils::kdf,
};

/// Fresh X25519 key pair as (secret, public) bytes
pub(crate) fn keypair<R: RngCore + CryptoRng>(rng: &mut R) -> ([u8; 32], [u8; 32]) {
    let mut secret = [0u8; 32];
    rng.fill_bytes(&mut secret);
    let public = PublicKey::from(&StaticSecret::from(secret));
    (secret, *public.as_bytes())
}

/// Sealing state between this party and one peer
pub(crate) struct Channel {
    cipher: ChaCha20Poly1305,
    tag: ProtocolTag,
    me: PartyId,
    peer: PartyId,
}

impl Channel {
    pub fn establish(
        secret: &[u8; 32],
        peer_public: &[u8; 32],
        session_id: &SessionId,
        tag: ProtocolTag,
        me: PartyId,
        peer: PartyId,
    ) -> Self {
        let shared = StaticSecret::from(*secret).diffie_hellman(&PublicKey::from(*peer_public));
        let (low, high) = (me.min(peer), me.max(peer));
        let mut key = kdf(
            b"dkls23-engine/channel",
            &[session_id, &[tag.as_byte(), low, high], shared.as_bytes()],
        );
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        key.zeroize();

        Self {
            cipher,
            tag,
            me,
            peer,
        }
    }

    fn nonce(round: u8, from: PartyId, to: PartyId) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..3].copy_from_slice(&[round, from, to]);
        nonce
    }

    fn aad(&self, round: u8, from: PartyId, to: PartyId) -> [u8; 4] {
        [self.tag.as_byte(), round, from, to]
    }

    /// Serialize `body` and seal it into a direct envelope for the peer
    pub fn seal<T: Serialize>(&self, round: u8, body: &T) -> Result<Envelope> {
        let mut plaintext = encode_body(body)?;
        let sealed = self.cipher.encrypt(
            Nonce::from_slice(&Self::nonce(round, self.me, self.peer)),
            Payload {
                msg: &plaintext,
                aad: &self.aad(round, self.me, self.peer),
            },
        );
        plaintext.zeroize();
        let sealed =
            sealed.map_err(|_| Error::SerializationUnsupported("payload too large to seal".into()))?;

        Ok(Envelope::direct(self.me, self.peer, frame(self.tag, sealed)))
    }

    /// Open a direct envelope from the peer; any tampering blames the sender
    pub fn open<T: DeserializeOwned>(&self, round: u8, envelope: &Envelope) -> Result<T> {
        let sealed = envelope.body(self.tag)?;
        let mut plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&Self::nonce(round, self.peer, self.me)),
                Payload {
                    msg: sealed,
                    aad: &self.aad(round, self.peer, self.me),
                },
            )
            .map_err(|_| Error::abort(self.peer, "sealed payload failed authentication"))?;
        let body = decode_body(self.peer, &plaintext);
        plaintext.zeroize();
        body
    }
}
