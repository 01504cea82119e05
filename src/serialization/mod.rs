//! Pluggable value serialization for the remote engine.
//!
//! The remote server only stores byte strings, so a typed [`Cache<T>`](crate::Cache)
//! needs a strategy that turns `T` into bytes and back. The strategy is picked once,
//! when the cache is constructed, and never changes per call.
//!
//! | Strategy | Format | Use for |
//! |----------|--------|---------|
//! | [`DefaultSerDe`] | plain text for scalars, JSON otherwise | default; counters, strings, flags |
//! | [`JsonSerDe`] | JSON | any serde type, readable in `redis-cli` |
//! | [`ProtoSerDe`] | protobuf wire format | prost messages (feature `protobuf`) |
//! | [`PostcardSerDe`] | postcard | compact binary for serde types |
//!
//! # Example
//!
//! ```rust
//! use svc_cache::serialization::{DefaultSerDe, SerDe};
//!
//! # fn main() -> svc_cache::Result<()> {
//! let serde = DefaultSerDe::<i64>::new();
//! let bytes = serde.serialize(&42)?;
//! assert_eq!(bytes, b"42");
//! assert_eq!(serde.deserialize(&bytes)?, 42);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shape::{ScalarReader, ScalarWriter, ShapeError};
use std::marker::PhantomData;

#[cfg(feature = "protobuf")]
mod proto;
mod shape;

#[cfg(feature = "protobuf")]
pub use proto::ProtoSerDe;

/// Strategy converting cache values to bytes and back.
///
/// Implementations must round-trip: `deserialize(serialize(v)) == v` for every
/// value they accept.
pub trait SerDe<T>: Send + Sync {
    /// Encode a value for storage.
    ///
    /// # Errors
    /// Returns `Error::SerializationError` if the value cannot be encoded.
    fn serialize(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode a stored value.
    ///
    /// # Errors
    /// Returns `Error::DeserializationError` if the bytes are not a valid `T`.
    fn deserialize(&self, bytes: &[u8]) -> Result<T>;

    /// Short name used in log lines.
    fn name(&self) -> &'static str;
}

/// JSON strategy backed by `serde_json`.
pub struct JsonSerDe<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerDe<T> {
    pub fn new() -> Self {
        JsonSerDe {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSerDe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SerDe<T> for JsonSerDe<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| {
            error!("JSON serialization failed: {}", e);
            Error::SerializationError(e.to_string())
        })
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::DeserializationError(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Type-aware default strategy.
///
/// Scalars (strings, integers, floats, booleans, chars, unit enum variants and
/// newtypes around them) are stored as their plain text representation, so the
/// remote server can operate on them directly: a counter written with `INCRBY`
/// reads back as an `i64`, and a string is stored without JSON quoting.
/// Non-finite floats are written `+Inf`, `-Inf` and `NaN`. Everything else,
/// `Option` included, is stored as JSON.
///
/// The shape is taken from `T`'s serde implementation, not from the value, so
/// decoding asks the same questions encoding did.
pub struct DefaultSerDe<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> DefaultSerDe<T> {
    pub fn new() -> Self {
        DefaultSerDe {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for DefaultSerDe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SerDe<T> for DefaultSerDe<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        match value.serialize(ScalarWriter) {
            Ok(text) => Ok(text.into_bytes()),
            Err(ShapeError::Composite) => serde_json::to_vec(value).map_err(|e| {
                error!("Default serialization failed: {}", e);
                Error::SerializationError(e.to_string())
            }),
            Err(e) => {
                error!("Default serialization failed: {}", e);
                Err(Error::SerializationError(e.to_string()))
            }
        }
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        T::deserialize(ScalarReader::new(bytes))
            .map_err(|e| Error::DeserializationError(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Compact binary strategy backed by `postcard`.
///
/// Smaller than JSON but not self-describing: entries written with another
/// strategy or another type fail to decode.
pub struct PostcardSerDe<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> PostcardSerDe<T> {
    pub fn new() -> Self {
        PostcardSerDe {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for PostcardSerDe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SerDe<T> for PostcardSerDe<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        postcard::to_allocvec(value).map_err(|e| {
            error!("Postcard serialization failed: {}", e);
            Error::SerializationError(e.to_string())
        })
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        postcard::from_bytes(bytes).map_err(|e| Error::DeserializationError(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "postcard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct SessionToken {
        token: String,
        user_id: u64,
        active: bool,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Copy)]
    enum Device {
        Mobile,
        Desktop,
    }

    fn token() -> SessionToken {
        SessionToken {
            token: "abc".to_string(),
            user_id: 7,
            active: true,
        }
    }

    #[test]
    fn test_default_scalars_are_plain_text() {
        assert_eq!(DefaultSerDe::<i64>::new().serialize(&-42).unwrap(), b"-42");
        assert_eq!(DefaultSerDe::<u8>::new().serialize(&255).unwrap(), b"255");
        assert_eq!(DefaultSerDe::<f64>::new().serialize(&1.5).unwrap(), b"1.5");
        assert_eq!(DefaultSerDe::<bool>::new().serialize(&true).unwrap(), b"true");
        assert_eq!(
            DefaultSerDe::<String>::new()
                .serialize(&"hello".to_string())
                .unwrap(),
            b"hello"
        );
    }

    #[test]
    fn test_default_scalar_roundtrip() {
        let ints = DefaultSerDe::<i64>::new();
        assert_eq!(ints.deserialize(&ints.serialize(&i64::MIN).unwrap()).unwrap(), i64::MIN);

        let floats = DefaultSerDe::<f64>::new();
        assert_eq!(floats.deserialize(b"0.1").unwrap(), 0.1);

        let flags = DefaultSerDe::<bool>::new();
        assert!(!flags.deserialize(b"false").unwrap());
    }

    #[test]
    fn test_default_strings_are_not_reinterpreted() {
        let serde = DefaultSerDe::<String>::new();
        for text in ["42", "true", "\"quoted\"", "{\"a\":1}", ""] {
            let bytes = serde.serialize(&text.to_string()).unwrap();
            assert_eq!(bytes, text.as_bytes());
            assert_eq!(serde.deserialize(&bytes).unwrap(), text);
        }
    }

    #[test]
    fn test_default_unit_enum_is_text() {
        let serde = DefaultSerDe::<Device>::new();
        let bytes = serde.serialize(&Device::Mobile).unwrap();
        assert_eq!(bytes, b"Mobile");
        assert_eq!(serde.deserialize(&bytes).unwrap(), Device::Mobile);
        assert_eq!(serde.deserialize(b"Desktop").unwrap(), Device::Desktop);
    }

    #[test]
    fn test_default_composite_falls_back_to_json() {
        let serde = DefaultSerDe::<SessionToken>::new();
        let bytes = serde.serialize(&token()).unwrap();
        assert_eq!(bytes, serde_json::to_vec(&token()).unwrap());
        assert_eq!(serde.deserialize(&bytes).unwrap(), token());
    }

    #[test]
    fn test_default_rejects_garbage_integer() {
        let result = DefaultSerDe::<i64>::new().deserialize(b"not a number");
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[test]
    fn test_default_option_is_json() {
        let serde = DefaultSerDe::<Option<String>>::new();
        assert_eq!(serde.serialize(&None).unwrap(), b"null");
        assert_eq!(serde.deserialize(b"null").unwrap(), None);

        let bytes = serde.serialize(&Some("null".to_string())).unwrap();
        assert_eq!(bytes, b"\"null\"");
        assert_eq!(serde.deserialize(&bytes).unwrap(), Some("null".to_string()));
    }

    #[test]
    fn test_default_non_finite_floats() {
        let serde = DefaultSerDe::<f64>::new();
        assert_eq!(serde.serialize(&f64::INFINITY).unwrap(), b"+Inf");
        assert_eq!(serde.serialize(&f64::NEG_INFINITY).unwrap(), b"-Inf");
        assert_eq!(serde.serialize(&f64::NAN).unwrap(), b"NaN");

        assert_eq!(serde.deserialize(b"+Inf").unwrap(), f64::INFINITY);
        assert_eq!(serde.deserialize(b"-Inf").unwrap(), f64::NEG_INFINITY);
        assert!(serde.deserialize(b"NaN").unwrap().is_nan());
        assert_eq!(serde.serialize(&2.0).unwrap(), b"2.0");
    }

    #[test]
    fn test_default_untyped_json_value() {
        let serde = DefaultSerDe::<serde_json::Value>::new();
        for value in [
            serde_json::json!(42),
            serde_json::json!(-1.5),
            serde_json::json!(true),
            serde_json::json!("hello"),
            serde_json::json!(null),
            serde_json::json!({"a": [1, 2]}),
        ] {
            let bytes = serde.serialize(&value).unwrap();
            assert_eq!(serde.deserialize(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_default_newtype_and_data_enum() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct UserId(u64);

        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        enum Presence {
            Offline,
            Online { device: String },
        }

        let ids = DefaultSerDe::<UserId>::new();
        assert_eq!(ids.serialize(&UserId(9)).unwrap(), b"9");
        assert_eq!(ids.deserialize(b"9").unwrap(), UserId(9));

        let presence = DefaultSerDe::<Presence>::new();
        let online = Presence::Online {
            device: "mobile".to_string(),
        };
        let bytes = presence.serialize(&online).unwrap();
        assert_eq!(presence.deserialize(&bytes).unwrap(), online);
        assert_eq!(presence.deserialize(b"Offline").unwrap(), Presence::Offline);
    }

    #[test]
    fn test_default_char_and_vec() {
        let chars = DefaultSerDe::<char>::new();
        assert_eq!(chars.serialize(&'x').unwrap(), b"x");
        assert_eq!(chars.deserialize(b"x").unwrap(), 'x');
        assert!(chars.deserialize(b"xy").is_err());

        let list = DefaultSerDe::<Vec<i64>>::new();
        let bytes = list.serialize(&vec![1, 2, 3]).unwrap();
        assert_eq!(bytes, b"[1,2,3]");
        assert_eq!(list.deserialize(&bytes).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_json_roundtrip() {
        let serde = JsonSerDe::<SessionToken>::new();
        let bytes = serde.serialize(&token()).unwrap();
        assert_eq!(serde.deserialize(&bytes).unwrap(), token());
    }

    #[test]
    fn test_json_string_is_quoted() {
        let serde = JsonSerDe::<String>::new();
        assert_eq!(serde.serialize(&"x".to_string()).unwrap(), b"\"x\"");
    }

    #[test]
    fn test_postcard_roundtrip_and_size() {
        let serde = PostcardSerDe::<SessionToken>::new();
        let bytes = serde.serialize(&token()).unwrap();
        assert_eq!(serde.deserialize(&bytes).unwrap(), token());
        assert!(bytes.len() < serde_json::to_vec(&token()).unwrap().len());
    }

    #[test]
    fn test_postcard_truncated_payload_rejected() {
        let serde = PostcardSerDe::<SessionToken>::new();
        let mut bytes = serde.serialize(&token()).unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(matches!(
            serde.deserialize(&bytes),
            Err(Error::DeserializationError(_))
        ));
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(SerDe::<u8>::name(&DefaultSerDe::<u8>::new()), "default");
        assert_eq!(SerDe::<u8>::name(&JsonSerDe::<u8>::new()), "json");
        assert_eq!(SerDe::<u8>::name(&PostcardSerDe::<u8>::new()), "postcard");
    }
}
