//! Dynamic values carried by call envelopes, responses and broadcast items.
//!
//! `Value` covers the plain data model (null, booleans, numbers, strings,
//! lists, string-keyed maps) shared by every serializer, plus two binary-only
//! variants: raw bytes and opaque bincode-encoded custom types.

use std::collections::BTreeMap;
use std::fmt;

use bincode::de::Decoder;
use bincode::error::{AllowedEnumVariants, DecodeError};
use bincode::{Decode, Encode};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Deepest list/map nesting accepted when decoding binary input.
pub const MAX_NESTING: usize = 128;

/// Keyword arguments of a call, ordered by name.
pub type Kwargs = BTreeMap<String, Value>;

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Default, Encode)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Raw bytes. Binary serializer only.
    Bytes(Vec<u8>),
    /// A custom type encoded with bincode. Binary serializer only.
    Opaque {
        /// Fully qualified Rust type name of the encoded value.
        type_name: String,
        /// bincode-encoded payload.
        data: Vec<u8>,
    },
}

/// bincode decode context for [`Value`]: the current list/map nesting.
#[derive(Debug, Default)]
pub struct DecodeDepth {
    depth: usize,
}

impl DecodeDepth {
    fn enter(&mut self) -> std::result::Result<(), DecodeError> {
        if self.depth >= MAX_NESTING {
            return Err(DecodeError::OtherString(format!(
                "value nested deeper than {} levels",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }
}

// Mirrors the derived `Encode` layout (u32 variant index, then fields), with
// nesting bounded so hostile input fails instead of exhausting the stack.
impl Decode<DecodeDepth> for Value {
    fn decode<D: Decoder<Context = DecodeDepth>>(
        decoder: &mut D,
    ) -> std::result::Result<Self, DecodeError> {
        let variant = u32::decode(decoder)?;
        let value = match variant {
            0 => Value::Null,
            1 => Value::Bool(Decode::decode(decoder)?),
            2 => Value::Int(Decode::decode(decoder)?),
            3 => Value::Float(Decode::decode(decoder)?),
            4 => Value::Str(Decode::decode(decoder)?),
            5 => {
                decoder.context().enter()?;
                let items = <Vec<Value> as Decode<DecodeDepth>>::decode(decoder);
                decoder.context().leave();
                Value::List(items?)
            }
            6 => {
                decoder.context().enter()?;
                let map = <BTreeMap<String, Value> as Decode<DecodeDepth>>::decode(decoder);
                decoder.context().leave();
                Value::Map(map?)
            }
            7 => Value::Bytes(Decode::decode(decoder)?),
            8 => Value::Opaque {
                type_name: Decode::decode(decoder)?,
                data: Decode::decode(decoder)?,
            },
            found => {
                return Err(DecodeError::UnexpectedVariant {
                    type_name: "Value",
                    allowed: &AllowedEnumVariants::Range { min: 0, max: 8 },
                    found,
                });
            }
        };
        Ok(value)
    }
}

impl Value {
    /// Wrap an arbitrary bincode-encodable value.
    pub fn opaque<T: Encode>(value: &T) -> Result<Self> {
        let data = bincode::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| Error::Serialization(format!("Failed to encode opaque value: {}", e)))?;
        Ok(Value::Opaque {
            type_name: std::any::type_name::<T>().to_string(),
            data,
        })
    }

    /// Recover a custom type previously wrapped with [`Value::opaque`].
    pub fn decode_opaque<T: Decode<()>>(&self) -> Result<T> {
        let Value::Opaque { type_name, data } = self else {
            return Err(Error::Serialization(format!(
                "expected opaque value, found {}",
                self.kind()
            )));
        };

        let expected = std::any::type_name::<T>();
        if type_name != expected {
            return Err(Error::Serialization(format!(
                "opaque value holds {}, not {}",
                type_name, expected
            )));
        }

        let (value, _) = bincode::decode_from_slice(data, bincode::config::standard())
            .map_err(|e| Error::Serialization(format!("Failed to decode opaque value: {}", e)))?;
        Ok(value)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Bytes(_) => "bytes",
            Value::Opaque { .. } => "opaque",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as a float, promoting integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", key, item)?;
                }
                write!(f, "}}")
            }
            Value::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Opaque { type_name, .. } => write!(f, "<{}>", type_name),
        }
    }
}

// Conversions

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(i: $ty) -> Self {
                    Value::Int(i64::from(i))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Value::Float(f64::from(x))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// Plain-data serde mapping. Bytes, opaque values and non-finite floats have
// no textual representation and are rejected.

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) if x.is_finite() => serializer.serialize_f64(*x),
            Value::Float(x) => Err(ser::Error::custom(format!(
                "non-finite float {} is not representable",
                x
            ))),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, item) in map {
                    out.serialize_entry(key, item)?;
                }
                out.end()
            }
            other => Err(ser::Error::custom(format!(
                "{} values are not supported by this format",
                other.kind()
            ))),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("null, a boolean, a number, a string, a list or a map")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        Deserialize::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, i: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> std::result::Result<Value, E> {
        Ok(i64::try_from(u).map_or(Value::Float(u as f64), Value::Int))
    }

    fn visit_f64<E: de::Error>(self, x: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(x))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> std::result::Result<Value, E> {
        Ok(Value::Str(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> std::result::Result<Value, E> {
        Ok(Value::Str(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, item)) = access.next_entry::<String, Value>()? {
            map.insert(key, item);
        }
        Ok(Value::Map(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}
