//! The two-field message envelope and the codec boundary.
//!
//! The engine never looks inside application payloads: every data event is an
//! [`Envelope`] of `(kind, buffer)` and routing happens purely on `kind`. The
//! byte-level encoding is behind [`EnvelopeCodec`] so the application can swap
//! it out; [`BincodeCodec`] is the default.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Wire envelope for application messages: a type discriminator and an opaque
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind discriminator used to pick the application handler.
    pub kind: String,
    /// Opaque payload bytes; content is owned by the application layer.
    pub buffer: Bytes,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, buffer: Bytes) -> Self {
        Self {
            kind: kind.into(),
            buffer,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(String),
    #[error("failed to decode envelope: {0}")]
    Decode(String),
}

/// Byte-level encoding of an [`Envelope`]. Implementations must round-trip
/// `(kind, buffer)` faithfully; everything else is up to them.
pub trait EnvelopeCodec {
    /// Encodes `envelope` into `out`. `out` is a reused scratch buffer and
    /// arrives cleared.
    fn encode_into(&self, envelope: &Envelope, out: &mut Vec<u8>) -> Result<(), CodecError>;

    /// Decodes one envelope from `bytes`.
    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError>;

    /// Convenience wrapper allocating a fresh buffer.
    fn encode(&self, envelope: &Envelope) -> Result<Bytes, CodecError> {
        let mut out = Vec::new();
        self.encode_into(envelope, &mut out)?;
        Ok(Bytes::from(out))
    }
}

/// Default codec: bincode over the serde derives of [`Envelope`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl EnvelopeCodec for BincodeCodec {
    fn encode_into(&self, envelope: &Envelope, out: &mut Vec<u8>) -> Result<(), CodecError> {
        bincode::serialize_into(&mut *out, envelope).map_err(|err| CodecError::Encode(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        bincode::deserialize(bytes).map_err(|err| CodecError::Decode(err.to_string()))
    }
}
