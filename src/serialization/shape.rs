//! Shape-directed text encoding for [`DefaultSerDe`](super::DefaultSerDe).
//!
//! [`ScalarWriter`] accepts only a top-level scalar (string, integer, float, bool,
//! char, unit enum variant, possibly wrapped in newtype structs) and renders it as
//! plain text. Anything else reports [`ShapeError::Composite`] and the caller falls
//! back to JSON. [`ScalarReader`] mirrors it on the way back: the target type asks
//! for a scalar and receives the parsed text, or asks for a composite and receives
//! a JSON deserializer over the same bytes.

use serde::de::{self, IntoDeserializer, Visitor};
use serde::ser::{self, Impossible, Serialize};
use serde::Deserializer as _;
use serde_json::de::SliceRead;
use std::fmt::{self, Display};
use std::str::FromStr;

#[derive(Debug)]
pub(super) enum ShapeError {
    /// The value is not a top-level scalar.
    Composite,
    Message(String),
}

impl Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeError::Composite => write!(f, "value is not a scalar"),
            ShapeError::Message(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ShapeError {}

impl ser::Error for ShapeError {
    fn custom<T: Display>(msg: T) -> Self {
        ShapeError::Message(msg.to_string())
    }
}

impl de::Error for ShapeError {
    fn custom<T: Display>(msg: T) -> Self {
        ShapeError::Message(msg.to_string())
    }
}

impl From<serde_json::Error> for ShapeError {
    fn from(e: serde_json::Error) -> Self {
        ShapeError::Message(e.to_string())
    }
}

/// Text for a float. Non-finite values are spelled `+Inf`, `-Inf` and `NaN`;
/// integral values keep a `.0` so untyped readers still see a float.
fn float_text<F: Display>(v: F, finite: bool, nan: bool, negative: bool) -> String {
    if nan {
        return "NaN".to_string();
    }
    if !finite {
        return if negative { "-Inf" } else { "+Inf" }.to_string();
    }
    let text = v.to_string();
    if text.contains('.') {
        text
    } else {
        text + ".0"
    }
}

pub(super) struct ScalarWriter;

type Composite = Impossible<String, ShapeError>;

impl ser::Serializer for ScalarWriter {
    type Ok = String;
    type Error = ShapeError;
    type SerializeSeq = Composite;
    type SerializeTuple = Composite;
    type SerializeTupleStruct = Composite;
    type SerializeTupleVariant = Composite;
    type SerializeMap = Composite;
    type SerializeStruct = Composite;
    type SerializeStructVariant = Composite;

    fn serialize_bool(self, v: bool) -> Result<String, ShapeError> {
        Ok(v.to_string())
    }

    fn serialize_i8(self, v: i8) -> Result<String, ShapeError> {
        Ok(v.to_string())
    }

    fn serialize_i16(self, v: i16) -> Result<String, ShapeError> {
        Ok(v.to_string())
    }

    fn serialize_i32(self, v: i32) -> Result<String, ShapeError> {
        Ok(v.to_string())
    }

    fn serialize_i64(self, v: i64) -> Result<String, ShapeError> {
        Ok(v.to_string())
    }

    fn serialize_i128(self, v: i128) -> Result<String, ShapeError> {
        Ok(v.to_string())
    }

    fn serialize_u8(self, v: u8) -> Result<String, ShapeError> {
        Ok(v.to_string())
    }

    fn serialize_u16(self, v: u16) -> Result<String, ShapeError> {
        Ok(v.to_string())
    }

    fn serialize_u32(self, v: u32) -> Result<String, ShapeError> {
        Ok(v.to_string())
    }

    fn serialize_u64(self, v: u64) -> Result<String, ShapeError> {
        Ok(v.to_string())
    }

    fn serialize_u128(self, v: u128) -> Result<String, ShapeError> {
        Ok(v.to_string())
    }

    fn serialize_f32(self, v: f32) -> Result<String, ShapeError> {
        Ok(float_text(v, v.is_finite(), v.is_nan(), v.is_sign_negative()))
    }

    fn serialize_f64(self, v: f64) -> Result<String, ShapeError> {
        Ok(float_text(v, v.is_finite(), v.is_nan(), v.is_sign_negative()))
    }

    fn serialize_char(self, v: char) -> Result<String, ShapeError> {
        Ok(v.to_string())
    }

    fn serialize_str(self, v: &str) -> Result<String, ShapeError> {
        Ok(v.to_owned())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<String, ShapeError> {
        Err(ShapeError::Composite)
    }

    fn serialize_none(self) -> Result<String, ShapeError> {
        Err(ShapeError::Composite)
    }

    fn serialize_some<T>(self, _value: &T) -> Result<String, ShapeError>
    where
        T: ?Sized + Serialize,
    {
        Err(ShapeError::Composite)
    }

    fn serialize_unit(self) -> Result<String, ShapeError> {
        Err(ShapeError::Composite)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<String, ShapeError> {
        Err(ShapeError::Composite)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<String, ShapeError> {
        Ok(variant.to_owned())
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<String, ShapeError>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<String, ShapeError>
    where
        T: ?Sized + Serialize,
    {
        Err(ShapeError::Composite)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Composite, ShapeError> {
        Err(ShapeError::Composite)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Composite, ShapeError> {
        Err(ShapeError::Composite)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Composite, ShapeError> {
        Err(ShapeError::Composite)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Composite, ShapeError> {
        Err(ShapeError::Composite)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Composite, ShapeError> {
        Err(ShapeError::Composite)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Composite, ShapeError> {
        Err(ShapeError::Composite)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Composite, ShapeError> {
        Err(ShapeError::Composite)
    }
}

pub(super) struct ScalarReader<'de> {
    bytes: &'de [u8],
}

impl<'de> ScalarReader<'de> {
    pub(super) fn new(bytes: &'de [u8]) -> Self {
        ScalarReader { bytes }
    }

    fn text(&self) -> Result<&'de str, ShapeError> {
        std::str::from_utf8(self.bytes).map_err(|e| ShapeError::Message(e.to_string()))
    }

    fn parse<N>(&self) -> Result<N, ShapeError>
    where
        N: FromStr,
        N::Err: Display,
    {
        let text = self.text()?;
        text.parse()
            .map_err(|e| ShapeError::Message(format!("{:?}: {}", text, e)))
    }

    /// Run a JSON deserializer over the whole payload, rejecting trailing bytes.
    fn json<V>(
        self,
        visit: impl FnOnce(&mut serde_json::Deserializer<SliceRead<'de>>) -> serde_json::Result<V>,
    ) -> Result<V, ShapeError> {
        let mut de = serde_json::Deserializer::from_slice(self.bytes);
        let value = visit(&mut de)?;
        de.end()?;
        Ok(value)
    }
}

macro_rules! parse_scalar {
    ($($method:ident => $visit:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ShapeError> {
                visitor.$visit(self.parse::<$ty>()?)
            }
        )*
    };
}

macro_rules! forward_to_json {
    ($($method:ident($($arg:ident: $ty:ty),*)),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, $($arg: $ty,)* visitor: V) -> Result<V::Value, ShapeError> {
                self.json(|de| de.$method($($arg,)* visitor))
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for ScalarReader<'de> {
    type Error = ShapeError;

    /// Untyped targets see JSON when the payload parses as JSON, otherwise the text.
    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ShapeError> {
        match serde_json::from_slice::<serde_json::Value>(self.bytes) {
            Ok(value) => Ok(de::Deserializer::deserialize_any(value, visitor)?),
            Err(_) => match std::str::from_utf8(self.bytes) {
                Ok(text) => visitor.visit_borrowed_str(text),
                Err(_) => visitor.visit_borrowed_bytes(self.bytes),
            },
        }
    }

    parse_scalar! {
        deserialize_bool => visit_bool(bool),
        deserialize_i8 => visit_i8(i8),
        deserialize_i16 => visit_i16(i16),
        deserialize_i32 => visit_i32(i32),
        deserialize_i64 => visit_i64(i64),
        deserialize_i128 => visit_i128(i128),
        deserialize_u8 => visit_u8(u8),
        deserialize_u16 => visit_u16(u16),
        deserialize_u32 => visit_u32(u32),
        deserialize_u64 => visit_u64(u64),
        deserialize_u128 => visit_u128(u128),
        deserialize_f32 => visit_f32(f32),
        deserialize_f64 => visit_f64(f64),
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ShapeError> {
        let text = self.text()?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(ShapeError::Message(format!("{:?} is not a single char", text))),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ShapeError> {
        visitor.visit_borrowed_str(self.text()?)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ShapeError> {
        visitor.visit_borrowed_str(self.text()?)
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ShapeError> {
        visitor.visit_borrowed_str(self.text()?)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, ShapeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, ShapeError> {
        // Data-carrying variants were written as a JSON object.
        if self.bytes.first() == Some(&b'{') {
            return self.json(|de| de.deserialize_enum(name, variants, visitor));
        }
        let variant: de::value::StrDeserializer<'de, ShapeError> = self.text()?.into_deserializer();
        visitor.visit_enum(variant)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ShapeError> {
        visitor.visit_unit()
    }

    forward_to_json! {
        deserialize_bytes(),
        deserialize_byte_buf(),
        deserialize_option(),
        deserialize_unit(),
        deserialize_unit_struct(name: &'static str),
        deserialize_seq(),
        deserialize_tuple(len: usize),
        deserialize_tuple_struct(name: &'static str, len: usize),
        deserialize_map(),
        deserialize_struct(name: &'static str, fields: &'static [&'static str]),
    }
}
