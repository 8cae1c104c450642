//! Wire codecs for protocol frames.
//!
//! The engine never encodes frames itself; transports pick a [`Codec`] from the
//! negotiated [`Format`] and translate between bytes and [`ProtocolMessage`]s.

use thiserror::Error;

use crate::message::ProtocolMessage;

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// JSON encoding or decoding failed.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding failed.
    #[error("msgpack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed.
    #[error("msgpack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),
}

/// Translates protocol frames to and from wire bytes.
pub trait Codec: Send + Sync {
    /// MIME type announced to the service.
    fn content_type(&self) -> &'static str;

    /// Encode a frame.
    fn encode(&self, msg: &ProtocolMessage) -> Result<Vec<u8>, CodecError>;

    /// Decode a frame.
    fn decode(&self, bytes: &[u8]) -> Result<ProtocolMessage, CodecError>;
}

/// Textual JSON codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, msg: &ProtocolMessage) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(msg)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<ProtocolMessage, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Binary MessagePack codec.
///
/// Frames are encoded as maps keyed by field name, so omitted optional fields
/// stay omitted on the wire.
#[derive(Clone, Copy, Debug, Default)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn content_type(&self) -> &'static str {
        "application/x-msgpack"
    }

    fn encode(&self, msg: &ProtocolMessage) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(msg)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<ProtocolMessage, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Negotiated wire format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    /// JSON text frames.
    Json,
    /// MessagePack binary frames.
    #[default]
    Msgpack,
}

impl Format {
    /// Pick the format from the `use_binary_protocol` client option.
    #[must_use]
    pub const fn from_binary_flag(use_binary_protocol: bool) -> Self {
        if use_binary_protocol {
            Format::Msgpack
        } else {
            Format::Json
        }
    }

    /// Codec implementing this format.
    #[must_use]
    pub fn codec(self) -> Box<dyn Codec> {
        match self {
            Format::Json => Box::new(JsonCodec),
            Format::Msgpack => Box::new(MsgpackCodec),
        }
    }
}
