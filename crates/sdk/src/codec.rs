//! Cache blob codec.
//!
//! Cache blobs are JSON, with two value kinds JSON cannot carry natively
//! encoded as tagged strings:
//!
//! | Kind | Encoding |
//! | --- | --- |
//! | [`BigInt`] | `"bigint:<decimal digits, optional leading '-'>"` |
//! | [`Blob`] | `"binary:0x<hex>"` |
//!
//! Typed records embed [`BigInt`] / [`Blob`] fields and get the tagging from
//! their serde impls. Untyped blobs decode into the dynamic [`Value`] tree,
//! which recognizes the tags anywhere in the document.

use std::{collections::BTreeMap, fmt, ops::Sub, str::FromStr};

use alloy::primitives::{Bytes, U256, hex};
use num_bigint::{BigUint, Sign};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::DeserializeOwned};

use crate::error::{EngineError, Result};

pub const BIGINT_TAG: &str = "bigint:";
pub const BINARY_TAG: &str = "binary:";

/// Encodes a value into the cache blob format.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decodes a value from the cache blob format.
pub fn decode<T: DeserializeOwned>(blob: &str) -> Result<T> { Ok(serde_json::from_str(blob)?) }

/// Arbitrary-precision signed integer.
///
/// Converts losslessly from and, when in range, to the `U256` amounts used on
/// chain.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BigInt(num_bigint::BigInt);

impl BigInt {
    pub const ZERO: Self = Self(num_bigint::BigInt::ZERO);

    pub fn is_zero(&self) -> bool { self.0.sign() == Sign::NoSign }

    pub fn is_negative(&self) -> bool { self.0.sign() == Sign::Minus }

    /// Value as an on-chain amount; `None` when negative or wider than 256
    /// bits.
    pub fn to_u256(&self) -> Option<U256> {
        if self.is_negative() {
            return None;
        }
        U256::try_from_le_slice(&self.0.magnitude().to_bytes_le())
    }
}

impl From<U256> for BigInt {
    fn from(value: U256) -> Self {
        Self(BigUint::from_bytes_le(&value.to_le_bytes::<32>()).into())
    }
}

impl From<u64> for BigInt {
    fn from(value: u64) -> Self { Self(value.into()) }
}

impl From<u128> for BigInt {
    fn from(value: u128) -> Self { Self(value.into()) }
}

impl From<i64> for BigInt {
    fn from(value: i64) -> Self { Self(value.into()) }
}

impl Sub for BigInt {
    type Output = BigInt;

    fn sub(self, rhs: Self) -> Self::Output { Self(self.0 - rhs.0) }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(&self.0, f) }
}

impl fmt::Debug for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(self, f) }
}

impl FromStr for BigInt {
    type Err = EngineError;

    /// Decimal digits with an optional leading `-`. `-0` reads as zero.
    fn from_str(s: &str) -> Result<Self> {
        let (sign, digits) = match s.strip_prefix('-') {
            Some(digits) => (Sign::Minus, digits),
            None => (Sign::Plus, s),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EngineError::Codec(format!("invalid bigint: {s:?}")));
        }
        let magnitude: BigUint = digits
            .parse()
            .map_err(|err| EngineError::Codec(format!("invalid bigint {s:?}: {err}")))?;
        Ok(Self(num_bigint::BigInt::from_biguint(sign, magnitude)))
    }
}

impl Serialize for BigInt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{BIGINT_TAG}{self}"))
    }
}

impl<'de> Deserialize<'de> for BigInt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let digits = s
            .strip_prefix(BIGINT_TAG)
            .ok_or_else(|| serde::de::Error::custom(format!("missing {BIGINT_TAG} tag")))?;
        digits.parse().map_err(serde::de::Error::custom)
    }
}

/// Binary blob.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Blob(Bytes);

impl Blob {
    pub fn new(bytes: impl Into<Bytes>) -> Self { Self(bytes.into()) }

    pub fn as_bytes(&self) -> &[u8] { &self.0 }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl From<Vec<u8>> for Blob {
    fn from(value: Vec<u8>) -> Self { Self(value.into()) }
}

impl From<&[u8]> for Blob {
    fn from(value: &[u8]) -> Self { Self(Bytes::copy_from_slice(value)) }
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_prefixed(&self.0))
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(self, f) }
}

impl FromStr for Blob {
    type Err = EngineError;

    /// Parses `0x`-prefixed hex.
    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| EngineError::Codec(format!("binary without 0x prefix: {s:?}")))?;
        hex::decode(digits)
            .map(Self::from)
            .map_err(|err| EngineError::Codec(format!("invalid binary {s:?}: {err}")))
    }
}

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{BINARY_TAG}{self}"))
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let hex = s
            .strip_prefix(BINARY_TAG)
            .ok_or_else(|| serde::de::Error::custom(format!("missing {BINARY_TAG} tag")))?;
        hex.parse().map_err(serde::de::Error::custom)
    }
}

/// Dynamic cache value: plain JSON plus [`BigInt`] and [`Blob`] leaves.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    BigInt(BigInt),
    Binary(Blob),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Field of an object value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.get(field),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<BigInt> {
        match self {
            Value::BigInt(n) => Some(n.clone()),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    fn untag(s: String) -> Result<Self> {
        if let Some(digits) = s.strip_prefix(BIGINT_TAG) {
            return digits.parse().map(Value::BigInt);
        }
        if let Some(hex) = s.strip_prefix(BINARY_TAG) {
            return hex.parse().map(Value::Binary);
        }
        Ok(Value::String(s))
    }
}

impl From<BigInt> for Value {
    fn from(value: BigInt) -> Self { Value::BigInt(value) }
}

impl From<Blob> for Value {
    fn from(value: Blob) -> Self { Value::Binary(value) }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self { Value::String(value.to_string()) }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self { Value::Bool(value) }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self { Value::Number(value.into()) }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::BigInt(n) => serde_json::Value::String(format!("{BIGINT_TAG}{n}")),
            Value::Binary(b) => serde_json::Value::String(format!("{BINARY_TAG}{b}")),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Into::into).collect()),
            Value::Object(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.into())).collect(),
            ),
        }
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = EngineError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        Ok(match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::untag(s)?,
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::try_from).collect::<Result<_>>()?)
            },
            serde_json::Value::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| Ok((k, Value::try_from(v)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serde_json::Value::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Value::try_from(raw).map_err(serde::de::Error::custom)
    }
}
