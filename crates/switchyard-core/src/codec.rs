//! Message payload codecs.
//!
//! The binary protocol negotiates a codec through the `content-type` subtype:
//! `application/grpc` and `application/grpc+msgpack` carry MessagePack,
//! `application/grpc+json` carries JSON. The JSON bridge always uses
//! [`Codec::Json`].

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Errors produced while encoding or decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("invalid JSON: {0}")]
    Json(String),

    /// MessagePack (de)serialization failed.
    #[error("invalid MessagePack: {0}")]
    MsgPack(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CodecError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::MsgPack(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for CodecError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::MsgPack(err.to_string())
    }
}

/// Serialization format for message payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Codec {
    /// MessagePack with named struct fields.
    #[default]
    MsgPack,
    /// JSON.
    Json,
}

impl Codec {
    /// Selects a codec from a binary-protocol `content-type` header value.
    ///
    /// Returns `None` for anything that is not `application/grpc[+codec]`
    /// with a supported codec. Parameters after `;` are ignored.
    #[must_use]
    pub fn from_grpc_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/grpc" | "application/grpc+msgpack" => Some(Self::MsgPack),
            "application/grpc+json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Returns the binary-protocol `content-type` for responses.
    #[must_use]
    pub const fn grpc_content_type(self) -> &'static str {
        match self {
            Self::MsgPack => "application/grpc+msgpack",
            Self::Json => "application/grpc+json",
        }
    }

    /// Encodes a value.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Bytes, CodecError> {
        let buf = match self {
            Self::MsgPack => rmp_serde::to_vec_named(value)?,
            Self::Json => serde_json::to_vec(value)?,
        };
        Ok(Bytes::from(buf))
    }

    /// Decodes a value.
    pub fn decode<T: DeserializeOwned>(self, payload: &[u8]) -> Result<T, CodecError> {
        match self {
            Self::MsgPack => Ok(rmp_serde::from_slice(payload)?),
            Self::Json => Ok(serde_json::from_slice(payload)?),
        }
    }
}
