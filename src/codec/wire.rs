//! Low-level helpers shared by the envelope and typed-body codecs.
//!
//! Everything here works against `rmpv::Value`, the dynamic MessagePack
//! value tree: a self-describing `Value::Map` naturally expresses "this key
//! may or may not be present" without a derive macro inferring shape from a
//! Rust struct, and parsing is bounded for free since `read_value` reads
//! directly off the remaining byte slice and errors on short input.

use crate::error::{DecodeError, DeviceError, DeviceResult, EncodeError};
use rmpv::Value;

pub(crate) fn encode_value(value: &Value) -> DeviceResult<Vec<u8>> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value).map_err(|e| EncodeError::Io(e.to_string()))?;
    Ok(buf)
}

/// Decode exactly one value from `bytes`, rejecting trailing input.
pub(crate) fn decode_single_value(bytes: &[u8]) -> DeviceResult<Value> {
    let mut cursor = bytes;
    let value = rmpv::decode::read_value(&mut cursor)
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if !cursor.is_empty() {
        return Err(DecodeError::TrailingBytes(cursor.len()).into());
    }
    Ok(value)
}

pub(crate) fn map_get<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

pub(crate) fn expect_map(value: &Value) -> DeviceResult<&[(Value, Value)]> {
    value.as_map().ok_or_else(|| {
        DeviceError::from(DecodeError::TypeMismatch {
            expected: "map",
            found: value_type_name(value),
        })
    })
}

pub(crate) fn expect_str<'a>(value: &'a Value) -> DeviceResult<&'a str> {
    value.as_str().ok_or_else(|| {
        DeviceError::from(DecodeError::TypeMismatch {
            expected: "string",
            found: value_type_name(value),
        })
    })
}

pub(crate) fn expect_u64(value: &Value) -> DeviceResult<u64> {
    value.as_u64().ok_or_else(|| {
        DeviceError::from(DecodeError::TypeMismatch {
            expected: "unsigned integer",
            found: value_type_name(value),
        })
    })
}

pub(crate) fn expect_i64(value: &Value) -> DeviceResult<i64> {
    value.as_i64().ok_or_else(|| {
        DeviceError::from(DecodeError::TypeMismatch {
            expected: "integer",
            found: value_type_name(value),
        })
    })
}

pub(crate) fn expect_u16(value: &Value) -> DeviceResult<u16> {
    let n = expect_u64(value)?;
    u16::try_from(n)
        .map_err(|_| DeviceError::from(DecodeError::Malformed(format!("{n} does not fit in u16"))))
}

pub(crate) fn expect_u32(value: &Value) -> DeviceResult<u32> {
    let n = expect_u64(value)?;
    u32::try_from(n)
        .map_err(|_| DeviceError::from(DecodeError::Malformed(format!("{n} does not fit in u32"))))
}

pub(crate) fn value_type_name(value: &Value) -> String {
    match value {
        Value::Nil => "nil",
        Value::Boolean(_) => "bool",
        Value::Integer(_) => "integer",
        Value::F32(_) => "f32",
        Value::F64(_) => "f64",
        Value::String(_) => "string",
        Value::Binary(_) => "binary",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(_, _) => "ext",
    }
    .to_string()
}
