//! Message envelopes exchanged between sessions
//!
//! Every payload starts with a one-byte protocol tag followed by the
//! serialized round body. Direct payloads carry the body sealed under the
//! pairwise channel of the two parties.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    types::PartyId,
};

/// Protocol family a payload belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolTag {
    /// DKG, rotation and recovery
    Keygen,
    /// Signing with per-session base OT
    SignBase,
    /// Signing with OT extension over keyshare seed OTs
    SignOt,
}

impl ProtocolTag {
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            ProtocolTag::Keygen => 0x4b,
            ProtocolTag::SignBase => 0x53,
            ProtocolTag::SignOt => 0x4f,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x4b => Some(ProtocolTag::Keygen),
            0x53 => Some(ProtocolTag::SignBase),
            0x4f => Some(ProtocolTag::SignOt),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolTag::Keygen => "keygen",
            ProtocolTag::SignBase => "base-sign",
            ProtocolTag::SignOt => "ot-sign",
        })
    }
}

/// A routed protocol message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender
    pub from_id: PartyId,
    /// Recipient, or `None` for a broadcast
    pub to_id: Option<PartyId>,
    /// Opaque protocol payload
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Create a broadcast envelope
    pub fn broadcast(from_id: PartyId, payload: Vec<u8>) -> Self {
        Self {
            from_id,
            to_id: None,
            payload,
        }
    }

    /// Create a point-to-point envelope
    pub fn direct(from_id: PartyId, to_id: PartyId, payload: Vec<u8>) -> Self {
        Self {
            from_id,
            to_id: Some(to_id),
            payload,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_id.is_none()
    }

    /// Frame `body` as a broadcast from `from_id`
    pub(crate) fn encode<T: Serialize>(tag: ProtocolTag, from_id: PartyId, body: &T) -> Result<Self> {
        Ok(Self::broadcast(from_id, frame(tag, encode_body(body)?)))
    }

    /// Strip the protocol tag, checking it belongs to `expected`
    pub(crate) fn body(&self, expected: ProtocolTag) -> Result<&[u8]> {
        let (&tag, body) = self
            .payload
            .split_first()
            .ok_or_else(|| Error::abort(self.from_id, "empty payload"))?;

        match ProtocolTag::from_byte(tag) {
            Some(found) if found == expected => Ok(body),
            Some(found) => Err(Error::ProtocolMismatch {
                from: self.from_id,
                expected,
                found,
            }),
            None => Err(Error::abort(self.from_id, "unknown protocol tag")),
        }
    }

    /// Decode a broadcast body
    pub(crate) fn decode<T: DeserializeOwned>(&self, expected: ProtocolTag) -> Result<T> {
        decode_body(self.from_id, self.body(expected)?)
    }
}

pub(crate) fn frame(tag: ProtocolTag, body: Vec<u8>) -> Vec<u8> {
    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(tag.as_byte());
    payload.extend(body);
    payload
}

pub(crate) fn encode_body<T: Serialize>(body: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| Error::SerializationUnsupported(e.to_string()))
}

/// Malformed bodies are the sender's fault
pub(crate) fn decode_body<T: DeserializeOwned>(from: PartyId, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::abort(from, format!("malformed message body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        value: u32,
    }

    #[test]
    fn test_tagged_body() {
        let envelope = Envelope::encode(ProtocolTag::Keygen, 1, &Ping { value: 7 }).unwrap();
        assert!(envelope.is_broadcast());
        assert_eq!(envelope.payload[0], ProtocolTag::Keygen.as_byte());
        let ping: Ping = envelope.decode(ProtocolTag::Keygen).unwrap();
        assert_eq!(ping, Ping { value: 7 });
    }

    #[test]
    fn test_tag_mismatch() {
        let envelope = Envelope::encode(ProtocolTag::SignOt, 2, &Ping { value: 1 }).unwrap();
        let err = envelope.decode::<Ping>(ProtocolTag::SignBase).unwrap_err();
        assert!(matches!(
            err,
            Error::ProtocolMismatch {
                from: 2,
                expected: ProtocolTag::SignBase,
                found: ProtocolTag::SignOt
            }
        ));
    }

    #[test]
    fn test_garbage_is_attributed() {
        let envelope = Envelope::broadcast(4, vec![0xee, 1, 2]);
        assert_eq!(
            envelope.decode::<Ping>(ProtocolTag::Keygen).unwrap_err().offending_party(),
            Some(4)
        );

        let envelope = Envelope::broadcast(5, frame(ProtocolTag::Keygen, b"{".to_vec()));
        assert_eq!(
            envelope.decode::<Ping>(ProtocolTag::Keygen).unwrap_err().offending_party(),
            Some(5)
        );

        let envelope = Envelope::broadcast(6, Vec::new());
        assert_eq!(
            envelope.decode::<Ping>(ProtocolTag::Keygen).unwrap_err().offending_party(),
            Some(6)
        );
    }
}
