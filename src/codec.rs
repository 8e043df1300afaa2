//! Pluggable serialization for settlement payloads.
//!
//! Producers and waiters agree on how values cross the wire through a
//! [`PayloadCodec`]. [`JsonCodec`] is the default; [`RawCodec`] passes the
//! bytes through untouched for instances whose payload type is opaque.

use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use snafu::Snafu;

/// Errors from payload codecs.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[snafu(display("json codec: {source}"))]
    Json {
        /// The underlying error.
        source: serde_json::Error,
    },

    /// A custom codec failed.
    #[snafu(display("{message}"))]
    Custom {
        /// Description of what went wrong.
        message: String,
    },
}

impl CodecError {
    /// Build a codec error from any message.
    ///
    /// Intended for [`PayloadCodec`] implementations outside this crate.
    pub fn custom(message: impl Into<String>) -> Self {
        CodecError::Custom {
            message: message.into(),
        }
    }
}

/// Converts values to and from the byte payload carried in envelopes.
///
/// Implementations must be pure: encoding a value and decoding the result
/// reconstructs an observably equal value.
pub trait PayloadCodec<T>: Send + Sync {
    /// Encode a value into payload bytes.
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode payload bytes back into a value.
    fn decode(&self, payload: &[u8]) -> Result<T, CodecError>;
}

/// Default codec: JSON through serde.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> PayloadCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).context(JsonSnafu)
    }

    fn decode(&self, payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).context(JsonSnafu)
    }
}

/// Passthrough codec: the payload bytes are the value.
///
/// Used by raw instances, which deliver whatever the producer published
/// without interpreting it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl PayloadCodec<Vec<u8>> for RawCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(payload.to_vec())
    }
}
