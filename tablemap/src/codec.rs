//! Bidirectional conversion between native values and [`AttributeValue`]
//!
//! Every supported native type implements [`WireCodec`]. Conversions always go
//! through [`Codec::to_wire`] / [`Codec::from_wire`], which consult the bound
//! [`ConverterRegistry`] first, so a registered converter also applies to
//! elements of sequences, maps and optionals.
//!
//! | native | wire |
//! |---|---|
//! | `String`, `Uuid` | S |
//! | integers, floats, `BigDecimal`, `Duration` (nanoseconds) | N |
//! | `bool` | BOOL |
//! | `Bytes` | B |
//! | chrono timestamps | S (RFC 3339 / ISO 8601) |
//! | `Vec<T>`, `BTreeSet<T>` | L |
//! | `HashMap<K, V>`, `BTreeMap<K, V>` | M (keys via `Display`/`FromStr`) |
//! | `Option<T>` | NULL when `None` |

use bigdecimal::BigDecimal;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;
use std::hash::Hash;
use std::str::FromStr;
use std::time::Duration;
use tablemap_core::{AttributeValue, BoxError};
use thiserror::Error;
use uuid::Uuid;

use crate::registry::ConverterRegistry;

const NAIVE_DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const NAIVE_DATE_FORMAT: &str = "%Y-%m-%d";
const NAIVE_TIME_FORMAT: &str = "%H:%M:%S%.f";
const NANOS_PER_SEC: u128 = 1_000_000_000;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(
        "Type '{type_name}' not supported. If this is a custom type, register a converter for it in the ConverterRegistry"
    )]
    UnsupportedType { type_name: &'static str },

    #[error("Expected a {expected} attribute for '{type_name}', found {found}")]
    TypeMismatch {
        type_name: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Could not parse '{value}' as '{type_name}': {reason}")]
    Parse {
        type_name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Value of type '{type_name}' has no number representation: {value}")]
    NotRepresentable { type_name: &'static str, value: String },

    #[error("Converter for '{type_name}' failed: {source}")]
    Converter {
        type_name: &'static str,
        #[source]
        source: BoxError,
    },
}

impl CodecError {
    fn mismatch<T>(expected: &'static str, found: &AttributeValue) -> Self {
        CodecError::TypeMismatch {
            type_name: std::any::type_name::<T>(),
            expected,
            found: found.type_tag(),
        }
    }

    fn parse<T>(value: &str, reason: impl Display) -> Self {
        CodecError::Parse {
            type_name: std::any::type_name::<T>(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A native type with a wire representation.
///
/// Implementations for nested values must convert their children through
/// `codec.to_wire` / `codec.from_wire` rather than calling the child's
/// methods directly, so custom converters stay in effect.
pub trait WireCodec: Sized + Send + Sync + 'static {
    fn encode(&self, codec: &Codec) -> Result<AttributeValue, CodecError>;

    fn decode(value: &AttributeValue, codec: &Codec) -> Result<Self, CodecError>;

    /// Whether values of this type are text on the wire (eligible as a
    /// convention-resolved key)
    fn is_text() -> bool {
        false
    }
}

/// Native/wire converter bound to one [`ConverterRegistry`]
#[derive(Debug, Clone, Default)]
pub struct Codec {
    converters: ConverterRegistry,
}

impl Codec {
    pub fn new(converters: ConverterRegistry) -> Self {
        Self { converters }
    }

    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    pub fn to_wire<T: WireCodec>(&self, value: &T) -> Result<AttributeValue, CodecError> {
        match self.converters.get::<T>() {
            Some(converter) => {
                (converter.encode)(value as &dyn Any).map_err(|source| CodecError::Converter {
                    type_name: converter.type_name,
                    source,
                })
            }
            None => value.encode(self),
        }
    }

    pub fn from_wire<T: WireCodec>(&self, value: &AttributeValue) -> Result<T, CodecError> {
        match self.converters.get::<T>() {
            Some(converter) => decode_registered(converter, value),
            None => T::decode(value, self),
        }
    }

    /// Encode a type that has no built-in conversion; only a registered
    /// converter can handle it
    pub fn encode_custom<T: Send + Sync + 'static>(
        &self,
        value: &T,
    ) -> Result<AttributeValue, CodecError> {
        let converter = self
            .converters
            .get::<T>()
            .ok_or(CodecError::UnsupportedType {
                type_name: std::any::type_name::<T>(),
            })?;
        (converter.encode)(value as &dyn Any).map_err(|source| CodecError::Converter {
            type_name: converter.type_name,
            source,
        })
    }

    pub fn decode_custom<T: Send + Sync + 'static>(
        &self,
        value: &AttributeValue,
    ) -> Result<T, CodecError> {
        let converter = self
            .converters
            .get::<T>()
            .ok_or(CodecError::UnsupportedType {
                type_name: std::any::type_name::<T>(),
            })?;
        decode_registered(converter, value)
    }
}

fn decode_registered<T: 'static>(
    converter: &crate::registry::Converter,
    value: &AttributeValue,
) -> Result<T, CodecError> {
    let decoded = (converter.decode)(value).map_err(|source| CodecError::Converter {
        type_name: converter.type_name,
        source,
    })?;
    decoded
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| CodecError::Converter {
            type_name: converter.type_name,
            source: "converter produced a value of another type".into(),
        })
}

/// Implement [`WireCodec`] for types that are converted only through the
/// [`ConverterRegistry`].
///
/// Without a registered converter, encoding or decoding such a type fails
/// with [`CodecError::UnsupportedType`].
#[macro_export]
macro_rules! custom_codec {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::codec::WireCodec for $ty {
            fn encode(
                &self,
                codec: &$crate::codec::Codec,
            ) -> ::std::result::Result<$crate::AttributeValue, $crate::codec::CodecError> {
                codec.encode_custom(self)
            }

            fn decode(
                value: &$crate::AttributeValue,
                codec: &$crate::codec::Codec,
            ) -> ::std::result::Result<Self, $crate::codec::CodecError> {
                codec.decode_custom(value)
            }
        }
    )+};
}

// === Scalars ===

impl WireCodec for String {
    fn encode(&self, _: &Codec) -> Result<AttributeValue, CodecError> {
        Ok(AttributeValue::S(self.clone()))
    }

    fn decode(value: &AttributeValue, _: &Codec) -> Result<Self, CodecError> {
        value
            .as_string()
            .map(str::to_string)
            .ok_or_else(|| CodecError::mismatch::<Self>("S", value))
    }

    fn is_text() -> bool {
        true
    }
}

impl WireCodec for bool {
    fn encode(&self, _: &Codec) -> Result<AttributeValue, CodecError> {
        Ok(AttributeValue::Bool(*self))
    }

    fn decode(value: &AttributeValue, _: &Codec) -> Result<Self, CodecError> {
        value
            .as_bool()
            .ok_or_else(|| CodecError::mismatch::<Self>("BOOL", value))
    }
}

impl WireCodec for Bytes {
    fn encode(&self, _: &Codec) -> Result<AttributeValue, CodecError> {
        Ok(AttributeValue::B(self.clone()))
    }

    fn decode(value: &AttributeValue, _: &Codec) -> Result<Self, CodecError> {
        value
            .as_bytes()
            .cloned()
            .ok_or_else(|| CodecError::mismatch::<Self>("B", value))
    }
}

impl WireCodec for AttributeValue {
    fn encode(&self, _: &Codec) -> Result<AttributeValue, CodecError> {
        Ok(self.clone())
    }

    fn decode(value: &AttributeValue, _: &Codec) -> Result<Self, CodecError> {
        Ok(value.clone())
    }
}

/// Types stored as N and parsed back through `FromStr`
macro_rules! number_codec {
    ($($ty:ty),+) => {$(
        impl WireCodec for $ty {
            fn encode(&self, _: &Codec) -> Result<AttributeValue, CodecError> {
                Ok(AttributeValue::N(self.to_string()))
            }

            fn decode(value: &AttributeValue, _: &Codec) -> Result<Self, CodecError> {
                let text = value
                    .as_number()
                    .ok_or_else(|| CodecError::mismatch::<Self>("N", value))?;
                text.parse::<$ty>().map_err(|e| CodecError::parse::<Self>(text, e))
            }
        }
    )+};
}

number_codec!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, BigDecimal);

/// Floats use shortest round-trip formatting; NaN and infinities have no
/// number form and are rejected
macro_rules! float_codec {
    ($($ty:ty),+) => {$(
        impl WireCodec for $ty {
            fn encode(&self, _: &Codec) -> Result<AttributeValue, CodecError> {
                if !self.is_finite() {
                    return Err(CodecError::NotRepresentable {
                        type_name: stringify!($ty),
                        value: self.to_string(),
                    });
                }
                Ok(AttributeValue::N(self.to_string()))
            }

            fn decode(value: &AttributeValue, _: &Codec) -> Result<Self, CodecError> {
                let text = value
                    .as_number()
                    .ok_or_else(|| CodecError::mismatch::<Self>("N", value))?;
                text.parse::<$ty>().map_err(|e| CodecError::parse::<Self>(text, e))
            }
        }
    )+};
}

float_codec!(f32, f64);

impl WireCodec for Uuid {
    fn encode(&self, _: &Codec) -> Result<AttributeValue, CodecError> {
        Ok(AttributeValue::S(self.hyphenated().to_string()))
    }

    fn decode(value: &AttributeValue, _: &Codec) -> Result<Self, CodecError> {
        let text = value
            .as_string()
            .ok_or_else(|| CodecError::mismatch::<Self>("S", value))?;
        Uuid::parse_str(text).map_err(|e| CodecError::parse::<Self>(text, e))
    }
}

impl WireCodec for Duration {
    fn encode(&self, _: &Codec) -> Result<AttributeValue, CodecError> {
        Ok(AttributeValue::N(self.as_nanos().to_string()))
    }

    fn decode(value: &AttributeValue, _: &Codec) -> Result<Self, CodecError> {
        let text = value
            .as_number()
            .ok_or_else(|| CodecError::mismatch::<Self>("N", value))?;
        let nanos: u128 = text
            .parse()
            .map_err(|e| CodecError::parse::<Self>(text, e))?;
        let secs = u64::try_from(nanos / NANOS_PER_SEC)
            .map_err(|e| CodecError::parse::<Self>(text, e))?;
        let subsec = u32::try_from(nanos % NANOS_PER_SEC)
            .map_err(|e| CodecError::parse::<Self>(text, e))?;
        Ok(Duration::new(secs, subsec))
    }
}

// === Timestamps ===

impl WireCodec for DateTime<Utc> {
    fn encode(&self, _: &Codec) -> Result<AttributeValue, CodecError> {
        Ok(AttributeValue::S(
            self.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ))
    }

    fn decode(value: &AttributeValue, _: &Codec) -> Result<Self, CodecError> {
        let text = value
            .as_string()
            .ok_or_else(|| CodecError::mismatch::<Self>("S", value))?;
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| CodecError::parse::<Self>(text, e))
    }
}

impl WireCodec for DateTime<FixedOffset> {
    fn encode(&self, _: &Codec) -> Result<AttributeValue, CodecError> {
        Ok(AttributeValue::S(
            self.to_rfc3339_opts(SecondsFormat::AutoSi, false),
        ))
    }

    fn decode(value: &AttributeValue, _: &Codec) -> Result<Self, CodecError> {
        let text = value
            .as_string()
            .ok_or_else(|| CodecError::mismatch::<Self>("S", value))?;
        DateTime::parse_from_rfc3339(text).map_err(|e| CodecError::parse::<Self>(text, e))
    }
}

macro_rules! naive_codec {
    ($ty:ty, $format:expr) => {
        impl WireCodec for $ty {
            fn encode(&self, _: &Codec) -> Result<AttributeValue, CodecError> {
                Ok(AttributeValue::S(self.format($format).to_string()))
            }

            fn decode(value: &AttributeValue, _: &Codec) -> Result<Self, CodecError> {
                let text = value
                    .as_string()
                    .ok_or_else(|| CodecError::mismatch::<Self>("S", value))?;
                <$ty>::parse_from_str(text, $format).map_err(|e| CodecError::parse::<Self>(text, e))
            }
        }
    };
}

naive_codec!(NaiveDateTime, NAIVE_DATE_TIME_FORMAT);
naive_codec!(NaiveDate, NAIVE_DATE_FORMAT);
naive_codec!(NaiveTime, NAIVE_TIME_FORMAT);

// === Containers ===

impl<T: WireCodec> WireCodec for Option<T> {
    fn encode(&self, codec: &Codec) -> Result<AttributeValue, CodecError> {
        match self {
            Some(value) => codec.to_wire(value),
            None => Ok(AttributeValue::null()),
        }
    }

    fn decode(value: &AttributeValue, codec: &Codec) -> Result<Self, CodecError> {
        if value.is_null() {
            return Ok(None);
        }
        codec.from_wire(value).map(Some)
    }

    fn is_text() -> bool {
        T::is_text()
    }
}

impl<T: WireCodec> WireCodec for Box<T> {
    fn encode(&self, codec: &Codec) -> Result<AttributeValue, CodecError> {
        codec.to_wire(self.as_ref())
    }

    fn decode(value: &AttributeValue, codec: &Codec) -> Result<Self, CodecError> {
        codec.from_wire(value).map(Box::new)
    }

    fn is_text() -> bool {
        T::is_text()
    }
}

impl<T: WireCodec> WireCodec for Vec<T> {
    fn encode(&self, codec: &Codec) -> Result<AttributeValue, CodecError> {
        self.iter()
            .map(|v| codec.to_wire(v))
            .collect::<Result<Vec<_>, _>>()
            .map(AttributeValue::L)
    }

    fn decode(value: &AttributeValue, codec: &Codec) -> Result<Self, CodecError> {
        value
            .as_list()
            .ok_or_else(|| CodecError::mismatch::<Self>("L", value))?
            .iter()
            .map(|v| codec.from_wire(v))
            .collect()
    }
}

impl<T: WireCodec + Ord> WireCodec for BTreeSet<T> {
    fn encode(&self, codec: &Codec) -> Result<AttributeValue, CodecError> {
        self.iter()
            .map(|v| codec.to_wire(v))
            .collect::<Result<Vec<_>, _>>()
            .map(AttributeValue::L)
    }

    fn decode(value: &AttributeValue, codec: &Codec) -> Result<Self, CodecError> {
        value
            .as_list()
            .ok_or_else(|| CodecError::mismatch::<Self>("L", value))?
            .iter()
            .map(|v| codec.from_wire(v))
            .collect()
    }
}

fn encode_map<'a, K, V>(
    entries: impl Iterator<Item = (&'a K, &'a V)>,
    codec: &Codec,
) -> Result<AttributeValue, CodecError>
where
    K: Display + 'a,
    V: WireCodec,
{
    entries
        .map(|(k, v)| Ok((k.to_string(), codec.to_wire(v)?)))
        .collect::<Result<HashMap<_, _>, CodecError>>()
        .map(AttributeValue::M)
}

fn decode_map<K, V, M>(value: &AttributeValue, codec: &Codec) -> Result<M, CodecError>
where
    K: FromStr,
    K::Err: Display,
    V: WireCodec,
    M: FromIterator<(K, V)>,
{
    value
        .as_map()
        .ok_or_else(|| CodecError::mismatch::<M>("M", value))?
        .iter()
        .map(|(k, v)| {
            let key = k.parse::<K>().map_err(|e| CodecError::parse::<K>(k, e))?;
            Ok((key, codec.from_wire(v)?))
        })
        .collect()
}

impl<K, V> WireCodec for HashMap<K, V>
where
    K: Display + FromStr + Eq + Hash + Send + Sync + 'static,
    K::Err: Display,
    V: WireCodec,
{
    fn encode(&self, codec: &Codec) -> Result<AttributeValue, CodecError> {
        encode_map(self.iter(), codec)
    }

    fn decode(value: &AttributeValue, codec: &Codec) -> Result<Self, CodecError> {
        decode_map(value, codec)
    }
}

impl<K, V> WireCodec for BTreeMap<K, V>
where
    K: Display + FromStr + Ord + Send + Sync + 'static,
    K::Err: Display,
    V: WireCodec,
{
    fn encode(&self, codec: &Codec) -> Result<AttributeValue, CodecError> {
        encode_map(self.iter(), codec)
    }

    fn decode(value: &AttributeValue, codec: &Codec) -> Result<Self, CodecError> {
        decode_map(value, codec)
    }
}
