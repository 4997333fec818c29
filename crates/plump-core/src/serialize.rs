//! Pluggable value serializers.
//!
//! A channel only ever calls [`Serializer::dumps`] and [`Serializer::loads`];
//! which strategy is active is fixed when the channel is constructed.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{DecodeDepth, Value};

/// Converts values to and from their wire representation.
///
/// `loads(dumps(v))` must equal `v` for every value the strategy supports.
pub trait Serializer: Send + Sync {
    /// Strategy name, for logs.
    fn name(&self) -> &'static str;

    /// Encode a value.
    fn dumps(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decode a value.
    fn loads(&self, bytes: &[u8]) -> Result<Value>;
}

/// Lossless binary strategy backed by bincode.
///
/// Supports every [`Value`] variant, including raw bytes and opaque custom
/// types. The encoding is not guaranteed to be stable across versions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinarySerializer;

impl Serializer for BinarySerializer {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn dumps(&self, value: &Value) -> Result<Vec<u8>> {
        bincode::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| Error::Serialization(format!("Failed to encode value: {}", e)))
    }

    fn loads(&self, bytes: &[u8]) -> Result<Value> {
        let (value, read): (Value, usize) = bincode::decode_from_slice_with_context(
            bytes,
            bincode::config::standard(),
            DecodeDepth::default(),
        )
        .map_err(|e| Error::Serialization(format!("Failed to decode value: {}", e)))?;

        if read != bytes.len() {
            return Err(Error::Serialization(format!(
                "{} trailing bytes after value",
                bytes.len() - read
            )));
        }

        Ok(value)
    }
}

/// Restricted textual strategy backed by JSON.
///
/// Only null, booleans, numbers, strings, lists and string-keyed maps are
/// accepted; anything else fails with a serialization error.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn dumps(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| Error::Serialization(format!("Failed to encode JSON: {}", e)))
    }

    fn loads(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Serialization(format!("Failed to decode JSON: {}", e)))
    }
}

/// Selector for the built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializerKind {
    #[default]
    Binary,
    Json,
}

impl SerializerKind {
    /// Instantiate the selected strategy.
    pub fn build(self) -> Arc<dyn Serializer> {
        match self {
            SerializerKind::Binary => Arc::new(BinarySerializer),
            SerializerKind::Json => Arc::new(JsonSerializer),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SerializerKind::Binary => "binary",
            SerializerKind::Json => "json",
        }
    }
}

impl fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerializerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "bincode" => Ok(SerializerKind::Binary),
            "json" => Ok(SerializerKind::Json),
            other => Err(Error::InvalidOperation(format!(
                "unknown serializer '{}' (expected 'binary' or 'json')",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::{Decode, Encode};

    #[derive(Debug, PartialEq, Encode, Decode)]
    struct Job {
        id: u32,
        tags: Vec<String>,
    }

    fn sample_plain() -> Value {
        Value::from_iter([
            ("null", Value::Null),
            ("flag", Value::Bool(true)),
            ("count", Value::Int(-42)),
            ("ratio", Value::Float(0.25)),
            ("whole_float", Value::Float(3.0)),
            ("name", Value::from("plump")),
            (
                "nested",
                Value::from(vec![Value::from(1), Value::from(vec!["a", "b"])]),
            ),
        ])
    }

    #[test]
    fn test_binary_roundtrip_plain() {
        let value = sample_plain();
        let bytes = BinarySerializer.dumps(&value).unwrap();
        assert_eq!(BinarySerializer.loads(&bytes).unwrap(), value);
    }

    #[test]
    fn test_binary_roundtrip_custom_types() {
        let value = Value::from(vec![
            Value::Bytes(vec![0, 159, 255]),
            Value::opaque(&Job {
                id: 7,
                tags: vec!["x".to_string()],
            })
            .unwrap(),
        ]);

        let bytes = BinarySerializer.dumps(&value).unwrap();
        let decoded = BinarySerializer.loads(&bytes).unwrap();
        assert_eq!(decoded, value);

        let job: Job = decoded.as_list().unwrap()[1].decode_opaque().unwrap();
        assert_eq!(job.id, 7);
    }

    #[test]
    fn test_binary_rejects_garbage() {
        let err = BinarySerializer.loads(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_binary_rejects_deep_nesting() {
        // A million single-element lists wrapped around a null: small on the
        // wire, far too deep to decode recursively.
        let mut bytes = [5u8, 1].repeat(1_000_000);
        bytes.push(0);

        let err = BinarySerializer.loads(&bytes).unwrap_err();
        assert!(
            matches!(err, Error::Serialization(ref m) if m.contains("nested deeper")),
            "{:?}",
            err
        );
    }

    #[test]
    fn test_binary_accepts_nesting_up_to_limit() {
        let mut value = Value::Null;
        for _ in 0..crate::value::MAX_NESTING {
            value = Value::from(vec![value]);
        }
        let bytes = BinarySerializer.dumps(&value).unwrap();
        assert_eq!(BinarySerializer.loads(&bytes).unwrap(), value);

        let deeper = BinarySerializer.dumps(&Value::from(vec![value])).unwrap();
        assert!(matches!(
            BinarySerializer.loads(&deeper),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_binary_rejects_trailing_bytes() {
        let mut bytes = BinarySerializer.dumps(&Value::Int(1)).unwrap();
        bytes.push(0);
        assert!(matches!(
            BinarySerializer.loads(&bytes),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_json_roundtrip_plain() {
        let value = sample_plain();
        let bytes = JsonSerializer.dumps(&value).unwrap();
        assert_eq!(JsonSerializer.loads(&bytes).unwrap(), value);
    }

    #[test]
    fn test_json_is_plain_json() {
        let value = Value::from_iter([("a", Value::from(vec![1, 2])), ("b", Value::Null)]);
        let bytes = JsonSerializer.dumps(&value).unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), r#"{"a":[1,2],"b":null}"#);
    }

    #[test]
    fn test_json_rejects_custom_types() {
        let opaque = Value::opaque(&Job { id: 1, tags: vec![] }).unwrap();
        for value in [opaque, Value::Bytes(vec![1]), Value::Float(f64::NAN)] {
            let err = JsonSerializer.dumps(&value).unwrap_err();
            assert!(matches!(err, Error::Serialization(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_json_rejects_malformed_input() {
        let err = JsonSerializer.loads(b"{\"a\": [1, 2").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("json".parse::<SerializerKind>().unwrap(), SerializerKind::Json);
        assert_eq!("Binary".parse::<SerializerKind>().unwrap(), SerializerKind::Binary);
        assert!("pickle".parse::<SerializerKind>().is_err());
        assert_eq!(SerializerKind::Json.build().name(), "json");
    }
}
