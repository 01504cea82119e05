//! Protocol-buffer strategy for prost messages.

use super::SerDe;
use crate::error::{Error, Result};
use std::marker::PhantomData;

/// Protobuf strategy for `prost` messages.
///
/// Most compact and schema-stable of the strategies: fields can be added to the
/// message without invalidating entries already in the cache.
pub struct ProtoSerDe<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ProtoSerDe<T> {
    pub fn new() -> Self {
        ProtoSerDe {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ProtoSerDe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SerDe<T> for ProtoSerDe<T>
where
    T: prost::Message + Default,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        Ok(value.encode_to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        T::decode(bytes).map_err(|e| Error::DeserializationError(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "protobuf"
    }
}
