//! The store's tagged-union attribute value
//!
//! Serializes in the DynamoDB JSON shape (`{"S": "..."}`, `{"N": "42"}`,
//! binary as base64 text), so items can be logged or persisted as JSON.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// An item: attribute name to value
pub type Item = HashMap<String, AttributeValue>;

/// A single attribute value as it travels on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Text
    S(String),
    /// Number, carried as its decimal text
    N(String),
    /// Binary
    #[serde(with = "base64_bytes")]
    B(Bytes),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    L(Vec<AttributeValue>),
    M(HashMap<String, AttributeValue>),
}

impl AttributeValue {
    pub fn string(s: impl Into<String>) -> Self {
        AttributeValue::S(s.into())
    }

    pub fn number(n: impl Into<String>) -> Self {
        AttributeValue::N(n.into())
    }

    pub fn null() -> Self {
        AttributeValue::Null(true)
    }

    /// Get the string value if this is an S type
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// Get the number text if this is an N type
    pub fn as_number(&self) -> Option<&str> {
        match self {
            AttributeValue::N(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            AttributeValue::B(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::L(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, AttributeValue>> {
        match self {
            AttributeValue::M(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null(_))
    }

    /// Text form of a scalar usable as a key component (S or N)
    pub fn key_text(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) | AttributeValue::N(s) => Some(s),
            _ => None,
        }
    }

    /// The wire type tag ("S", "N", "B", "BOOL", "NULL", "L", "M")
    pub fn type_tag(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::B(_) => "B",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null(_) => "NULL",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
        }
    }

    /// Store ordering between two values of the same scalar type.
    ///
    /// Strings compare bytewise, numbers numerically, binaries bytewise.
    /// Values of different types (or non-scalars) are unordered.
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        match (self, other) {
            (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (AttributeValue::N(a), AttributeValue::N(b)) => compare_numbers(a, b),
            (AttributeValue::B(a), AttributeValue::B(b)) => Some(a.cmp(b)),
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Compare two decimal number strings without going through a float.
///
/// Falls back to `f64` when either side uses exponent notation.
fn compare_numbers(a: &str, b: &str) -> Option<Ordering> {
    if a.contains(['e', 'E']) || b.contains(['e', 'E']) {
        let x: f64 = a.parse().ok()?;
        let y: f64 = b.parse().ok()?;
        return x.partial_cmp(&y);
    }

    let (neg_a, int_a, frac_a) = split_number(a)?;
    let (neg_b, int_b, frac_b) = split_number(b)?;

    let zero_a = int_a.is_empty() && frac_a.is_empty();
    let zero_b = int_b.is_empty() && frac_b.is_empty();
    let neg_a = neg_a && !zero_a;
    let neg_b = neg_b && !zero_b;

    let magnitude = int_a
        .len()
        .cmp(&int_b.len())
        .then_with(|| int_a.cmp(int_b))
        .then_with(|| frac_a.cmp(frac_b));

    Some(match (neg_a, neg_b) {
        (false, false) => magnitude,
        (true, true) => magnitude.reverse(),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
    })
}

/// Split into sign, integer digits without leading zeros, fraction digits
/// without trailing zeros.
fn split_number(n: &str) -> Option<(bool, &str, &str)> {
    let n = n.trim();
    let (negative, digits) = match n.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, n.strip_prefix('+').unwrap_or(n)),
    };
    let (int, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if int.is_empty() && frac.is_empty() {
        return None;
    }
    if !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((
        negative,
        int.trim_start_matches('0'),
        frac.trim_end_matches('0'),
    ))
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::S(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::S(s.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<Bytes> for AttributeValue {
    fn from(b: Bytes) -> Self {
        AttributeValue::B(b)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(l: Vec<AttributeValue>) -> Self {
        AttributeValue::L(l)
    }
}

impl From<HashMap<String, AttributeValue>> for AttributeValue {
    fn from(m: HashMap<String, AttributeValue>) -> Self {
        AttributeValue::M(m)
    }
}

macro_rules! number_from {
    ($($ty:ty),+) => {$(
        impl From<$ty> for AttributeValue {
            fn from(n: $ty) -> Self {
                AttributeValue::N(n.to_string())
            }
        }
    )+};
}

number_from!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let value = AttributeValue::M(HashMap::from([
            ("name".to_string(), AttributeValue::string("Ada")),
            ("age".to_string(), AttributeValue::from(36)),
        ]));
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["M"]["name"]["S"], "Ada");
        assert_eq!(json["M"]["age"]["N"], "36");
    }

    #[test]
    fn test_binary_is_base64() {
        let value = AttributeValue::B(Bytes::from_static(b"hello"));
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"B":"aGVsbG8="}"#);

        let back: AttributeValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_bool_and_null_tags() {
        assert_eq!(
            serde_json::to_string(&AttributeValue::Bool(true)).unwrap(),
            r#"{"BOOL":true}"#
        );
        assert_eq!(
            serde_json::to_string(&AttributeValue::null()).unwrap(),
            r#"{"NULL":true}"#
        );
    }

    #[test]
    fn test_number_ordering() {
        let n = |s: &str| AttributeValue::number(s);
        assert_eq!(n("10").compare(&n("9")), Some(Ordering::Greater));
        assert_eq!(n("-10").compare(&n("-9")), Some(Ordering::Less));
        assert_eq!(n("1.50").compare(&n("1.5")), Some(Ordering::Equal));
        assert_eq!(n("0.001").compare(&n("0.01")), Some(Ordering::Less));
        assert_eq!(n("-0").compare(&n("0")), Some(Ordering::Equal));
        assert_eq!(
            n("170141183460469231731687303715884105727").compare(&n("170141183460469231731687303715884105726")),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_mixed_types_unordered() {
        assert_eq!(
            AttributeValue::string("1").compare(&AttributeValue::number("1")),
            None
        );
    }
}
