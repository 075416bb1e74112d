//! Command serialization at the broadcast boundary.
//!
//! The coordination core treats the broadcast payload as an opaque blob;
//! typed commands enter and leave through a [`CommandCodec`].

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CoordinationError;

/// Packs commands into bytes for the store and back.
pub trait CommandCodec: Send + Sync {
    /// The command type carried by broadcasts.
    type Command: Send;

    /// Serialize a command into store bytes.
    fn pack(&self, command: &Self::Command) -> Result<Vec<u8>, CoordinationError>;

    /// Deserialize a command from store bytes.
    fn unpack(&self, raw: &[u8]) -> Result<Self::Command, CoordinationError>;
}

/// Postcard-backed codec for any serde command type.
pub struct PostcardCodec<T> {
    _command: PhantomData<fn() -> T>,
}

impl<T> PostcardCodec<T> {
    /// Create a codec for command type `T`.
    pub fn new() -> Self {
        Self { _command: PhantomData }
    }
}

impl<T> Default for PostcardCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CommandCodec for PostcardCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    type Command = T;

    fn pack(&self, command: &T) -> Result<Vec<u8>, CoordinationError> {
        postcard::to_stdvec(command).map_err(|error| CoordinationError::Codec {
            operation: "packing command",
            reason: error.to_string(),
        })
    }

    fn unpack(&self, raw: &[u8]) -> Result<T, CoordinationError> {
        postcard::from_bytes(raw).map_err(|error| CoordinationError::Codec {
            operation: "unpacking command",
            reason: error.to_string(),
        })
    }
}

/// Identity codec for raw byte commands. Mostly useful in tests and for
/// callers that own their serialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl CommandCodec for BytesCodec {
    type Command = Vec<u8>;

    fn pack(&self, command: &Vec<u8>) -> Result<Vec<u8>, CoordinationError> {
        Ok(command.clone())
    }

    fn unpack(&self, raw: &[u8]) -> Result<Vec<u8>, CoordinationError> {
        Ok(raw.to_vec())
    }
}
