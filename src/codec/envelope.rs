//! The self-describing binary message envelope ("protomsg") and its
//! properties map.

use super::wire::{
    decode_single_value, encode_value, expect_map, expect_str, expect_u16, expect_u32, map_get,
    value_type_name,
};
use crate::error::{DecodeError, DeviceError, DeviceResult};
use rmpv::Value;

/// The 16-bit discriminator selecting which handler owns an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proto {
    Invalid = 0x0000,
    Shell = 0x0001,
    FileTransfer = 0x0002,
    PortForward = 0x0003,
    UpdateTrigger = 0x0004,
    Control = 0xFFFF,
}

impl Proto {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Proto {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0x0000 => Ok(Proto::Invalid),
            0x0001 => Ok(Proto::Shell),
            0x0002 => Ok(Proto::FileTransfer),
            0x0003 => Ok(Proto::PortForward),
            0x0004 => Ok(Proto::UpdateTrigger),
            0xFFFF => Ok(Proto::Control),
            other => Err(other),
        }
    }
}

/// The `status` property: distinguishes a normal reply from an error or a
/// transport-level control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Normal = 1,
    Error = 2,
    Control = 3,
}

impl Status {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u64> for Status {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, u64> {
        match value {
            1 => Ok(Status::Normal),
            2 => Ok(Status::Error),
            3 => Ok(Status::Control),
            other => Err(other),
        }
    }
}

/// The well-known property bag. Every field is independently optional;
/// absence is distinct from a zero/empty value and must round-trip as such.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub terminal_width: Option<u16>,
    pub terminal_height: Option<u16>,
    pub user_id: Option<String>,
    pub timeout: Option<u32>,
    pub status: Option<Status>,
    pub offset: Option<u64>,
    pub connection_id: Option<String>,
}

impl Properties {
    pub fn is_empty(&self) -> bool {
        self == &Properties::default()
    }
}

fn encode_properties(props: &Properties) -> DeviceResult<Value> {
    let mut entries: Vec<(Value, Value)> = Vec::new();
    if let Some(w) = props.terminal_width {
        entries.push((Value::from("terminal_width"), Value::from(u64::from(w))));
    }
    if let Some(h) = props.terminal_height {
        entries.push((Value::from("terminal_height"), Value::from(u64::from(h))));
    }
    if let Some(u) = &props.user_id {
        entries.push((Value::from("user_id"), Value::from(u.clone())));
    }
    if let Some(t) = props.timeout {
        entries.push((Value::from("timeout"), Value::from(u64::from(t))));
    }
    if let Some(s) = props.status {
        entries.push((Value::from("status"), Value::from(u64::from(s.as_u8()))));
    }
    if let Some(o) = props.offset {
        entries.push((Value::from("offset"), Value::from(o)));
    }
    if let Some(c) = &props.connection_id {
        entries.push((Value::from("connection_id"), Value::from(c.clone())));
    }
    Ok(Value::Map(entries))
}

fn decode_properties(value: &Value) -> DeviceResult<Properties> {
    let map = expect_map(value)?;
    let mut props = Properties::default();
    for (key, v) in map {
        let Some(key) = key.as_str() else {
            continue;
        };
        match key {
            "terminal_width" => props.terminal_width = Some(expect_u16(v)?),
            "terminal_height" => props.terminal_height = Some(expect_u16(v)?),
            "user_id" => props.user_id = Some(expect_str(v)?.to_string()),
            "timeout" => props.timeout = Some(expect_u32(v)?),
            "status" => {
                let raw = v.as_u64().ok_or_else(|| {
                    DeviceError::from(DecodeError::TypeMismatch {
                        expected: "unsigned integer",
                        found: value_type_name(v),
                    })
                })?;
                props.status = Some(Status::try_from(raw).map_err(|raw| {
                    DeviceError::from(DecodeError::Malformed(format!(
                        "unknown status value {raw}"
                    )))
                })?);
            }
            "offset" => {
                props.offset = Some(v.as_u64().ok_or_else(|| {
                    DeviceError::from(DecodeError::TypeMismatch {
                        expected: "unsigned integer",
                        found: value_type_name(v),
                    })
                })?)
            }
            "connection_id" => props.connection_id = Some(expect_str(v)?.to_string()),
            // Forward-compatibility: unknown keys are tolerated and ignored.
            _ => {}
        }
    }
    Ok(props)
}

/// The top-level framed message: carries the header, the session, the
/// optional properties, and an optional raw or typed-and-then-opaque body.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub proto: Proto,
    pub typ: String,
    pub sid: Option<String>,
    pub properties: Option<Properties>,
    pub body: Option<Vec<u8>>,
}

impl Envelope {
    pub fn new(proto: Proto, typ: impl Into<String>) -> Self {
        Envelope {
            proto,
            typ: typ.into(),
            sid: None,
            properties: None,
            body: None,
        }
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn status(&self) -> Option<Status> {
        self.properties.as_ref().and_then(|p| p.status)
    }
}

/// Encode an envelope as a deterministic byte string.
///
/// The envelope is a 4-key map with keys, in fixed order, `"proto"`,
/// `"typ"`, `"sid"` (omitted if absent), `"props"` (omitted if absent), and
/// `"body"` (raw bytes or nil).
pub fn encode_envelope(envelope: &Envelope) -> DeviceResult<Vec<u8>> {
    let mut entries: Vec<(Value, Value)> = Vec::with_capacity(5);
    entries.push((
        Value::from("proto"),
        Value::from(u64::from(envelope.proto.as_u16())),
    ));
    entries.push((Value::from("typ"), Value::from(envelope.typ.clone())));
    if let Some(sid) = &envelope.sid {
        entries.push((Value::from("sid"), Value::from(sid.clone())));
    }
    if let Some(props) = &envelope.properties {
        entries.push((Value::from("props"), encode_properties(props)?));
    }
    let body_value = match &envelope.body {
        Some(bytes) => Value::Binary(bytes.clone()),
        None => Value::Nil,
    };
    entries.push((Value::from("body"), body_value));

    encode_value(&Value::Map(entries))
}

/// Decode one complete envelope; trailing bytes are an error. Unknown
/// top-level or property keys are tolerated and ignored.
pub fn decode_envelope(bytes: &[u8]) -> DeviceResult<Envelope> {
    let value = decode_single_value(bytes)?;
    let map = expect_map(&value)?;

    let proto_value = map_get(map, "proto").ok_or_else(|| {
        DeviceError::from(DecodeError::Malformed("envelope missing \"proto\"".into()))
    })?;
    let proto_num = proto_value.as_u64().ok_or_else(|| {
        DeviceError::from(DecodeError::TypeMismatch {
            expected: "unsigned integer",
            found: value_type_name(proto_value),
        })
    })?;
    let proto_num = u16::try_from(proto_num).map_err(|_| {
        DeviceError::from(DecodeError::Malformed(format!(
            "proto discriminant {proto_num} out of range"
        )))
    })?;
    let proto = Proto::try_from(proto_num).map_err(|raw| {
        DeviceError::from(DecodeError::Malformed(format!(
            "unknown proto discriminant 0x{raw:04x}"
        )))
    })?;

    let typ_value = map_get(map, "typ").ok_or_else(|| {
        DeviceError::from(DecodeError::Malformed("envelope missing \"typ\"".into()))
    })?;
    let typ = expect_str(typ_value)?.to_string();

    let sid = match map_get(map, "sid") {
        Some(Value::Nil) | None => None,
        Some(v) => Some(expect_str(v)?.to_string()),
    };

    let properties = match map_get(map, "props") {
        Some(Value::Nil) | None => None,
        Some(v) => Some(decode_properties(v)?),
    };

    let body = match map_get(map, "body") {
        Some(Value::Nil) | None => None,
        Some(Value::Binary(b)) => Some(b.clone()),
        Some(other) => {
            return Err(DecodeError::TypeMismatch {
                expected: "binary",
                found: value_type_name(other),
            }
            .into())
        }
    };

    Ok(Envelope {
        proto,
        typ,
        sid,
        properties,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_minimal_envelope() {
        let env = Envelope::new(Proto::Shell, "ping");
        let bytes = encode_envelope(&env).unwrap();
        let decoded = decode_envelope(&bytes).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn round_trips_full_envelope() {
        let props = Properties {
            terminal_width: Some(80),
            terminal_height: Some(24),
            user_id: Some("u1".to_string()),
            timeout: Some(60),
            status: Some(Status::Normal),
            offset: Some(2048),
            connection_id: Some("C1".to_string()),
        };
        let env = Envelope::new(Proto::FileTransfer, "file_chunk")
            .with_sid("S1")
            .with_properties(props)
            .with_body(vec![1, 2, 3, 4]);

        let bytes = encode_envelope(&env).unwrap();
        let decoded = decode_envelope(&bytes).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn absent_properties_are_not_zero() {
        let env = Envelope::new(Proto::Shell, "new").with_properties(Properties {
            terminal_width: Some(80),
            ..Default::default()
        });
        let bytes = encode_envelope(&env).unwrap();
        let decoded = decode_envelope(&bytes).unwrap();
        let props = decoded.properties.unwrap();
        assert_eq!(props.terminal_width, Some(80));
        assert_eq!(props.terminal_height, None);
        assert_eq!(props.offset, None);
    }

    #[test]
    fn rejects_unknown_proto() {
        let mut entries = vec![
            (Value::from("proto"), Value::from(0x1234u64)),
            (Value::from("typ"), Value::from("x")),
        ];
        entries.push((Value::from("body"), Value::Nil));
        let bytes = encode_value(&Value::Map(entries)).unwrap();
        assert!(decode_envelope(&bytes).is_err());
    }

    #[test]
    fn unknown_property_keys_are_ignored() {
        let props_map = vec![
            (Value::from("terminal_width"), Value::from(80u64)),
            (Value::from("from_the_future"), Value::from("whatever")),
        ];
        let entries = vec![
            (Value::from("proto"), Value::from(u64::from(Proto::Shell.as_u16()))),
            (Value::from("typ"), Value::from("new")),
            (Value::from("props"), Value::Map(props_map)),
            (Value::from("body"), Value::Nil),
        ];
        let bytes = encode_value(&Value::Map(entries)).unwrap();
        let decoded = decode_envelope(&bytes).unwrap();
        assert_eq!(decoded.properties.unwrap().terminal_width, Some(80));
    }

    #[test]
    fn rejects_truncated_input() {
        let env = Envelope::new(Proto::Shell, "ping").with_sid("S1");
        let bytes = encode_envelope(&env).unwrap();
        assert!(decode_envelope(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn rejects_trailing_bytes() {
        let env = Envelope::new(Proto::Shell, "ping");
        let mut bytes = encode_envelope(&env).unwrap();
        bytes.push(0xff);
        assert!(decode_envelope(&bytes).is_err());
    }
}
