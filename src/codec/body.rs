//! Typed body payloads carried inside an envelope's opaque `body` bytes.
//!
//! Each type is (de)serialized as a keyed map of the same underlying wire
//! format as the envelope itself, then placed into the envelope as a byte
//! string — so a typed body is just "decode the envelope, then decode its
//! body bytes again as one of these".

use super::wire::{
    decode_single_value, encode_value, expect_i64, expect_map, expect_str, expect_u32, map_get,
    value_type_name,
};
use crate::error::{DecodeError, DeviceError, DeviceResult};
use rmpv::Value;

/// The MessagePack extension subtype used for `modtime`, matching the
/// format's own reserved Timestamp extension family.
const MODTIME_EXT_TYPE: i8 = -1;

fn encode_modtime(secs: i64) -> DeviceResult<Value> {
    let secs32 = i32::try_from(secs).map_err(|_| {
        DeviceError::from(crate::error::EncodeError::Overflow {
            field: "modtime",
            value: secs,
        })
    })?;
    Ok(Value::Ext(MODTIME_EXT_TYPE, secs32.to_be_bytes().to_vec()))
}

fn decode_modtime(value: &Value) -> DeviceResult<i64> {
    match value {
        Value::Ext(ty, data) if *ty == MODTIME_EXT_TYPE && data.len() == 4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(data);
            Ok(i64::from(i32::from_be_bytes(buf)))
        }
        other => Err(DecodeError::Malformed(format!(
            "modtime must be a 4-byte extension of type -1, got {}",
            value_type_name(other)
        ))
        .into()),
    }
}

/// `FILE_TRANSFER/put_file` body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadRequest {
    pub src_path: Option<String>,
    pub path: String,
}

impl UploadRequest {
    pub fn encode(&self) -> DeviceResult<Vec<u8>> {
        let mut entries = Vec::new();
        if let Some(src) = &self.src_path {
            entries.push((Value::from("src_path"), Value::from(src.clone())));
        }
        entries.push((Value::from("path"), Value::from(self.path.clone())));
        encode_value(&Value::Map(entries))
    }

    pub fn decode(bytes: &[u8]) -> DeviceResult<Self> {
        let value = decode_single_value(bytes)?;
        let map = expect_map(&value)?;
        let path = map_get(map, "path")
            .ok_or_else(|| {
                DeviceError::from(DecodeError::Malformed("UploadRequest missing \"path\"".into()))
            })
            .and_then(|v| expect_str(v).map(str::to_string))?;
        let src_path = match map_get(map, "src_path") {
            Some(Value::Nil) | None => None,
            Some(v) => Some(expect_str(v)?.to_string()),
        };
        Ok(UploadRequest { src_path, path })
    }
}

/// `FILE_TRANSFER/get_file` body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetFile {
    pub path: String,
}

impl GetFile {
    pub fn encode(&self) -> DeviceResult<Vec<u8>> {
        encode_value(&Value::Map(vec![(
            Value::from("path"),
            Value::from(self.path.clone()),
        )]))
    }

    pub fn decode(bytes: &[u8]) -> DeviceResult<Self> {
        let value = decode_single_value(bytes)?;
        let map = expect_map(&value)?;
        let path = map_get(map, "path")
            .ok_or_else(|| {
                DeviceError::from(DecodeError::Malformed("GetFile missing \"path\"".into()))
            })
            .and_then(|v| expect_str(v).map(str::to_string))?;
        Ok(GetFile { path })
    }
}

/// `FILE_TRANSFER/stat` body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatFile {
    pub path: String,
}

impl StatFile {
    pub fn encode(&self) -> DeviceResult<Vec<u8>> {
        encode_value(&Value::Map(vec![(
            Value::from("path"),
            Value::from(self.path.clone()),
        )]))
    }

    pub fn decode(bytes: &[u8]) -> DeviceResult<Self> {
        let value = decode_single_value(bytes)?;
        let map = expect_map(&value)?;
        let path = map_get(map, "path")
            .ok_or_else(|| {
                DeviceError::from(DecodeError::Malformed("StatFile missing \"path\"".into()))
            })
            .and_then(|v| expect_str(v).map(str::to_string))?;
        Ok(StatFile { path })
    }
}

/// `FILE_TRANSFER/file_info` body: reply to `stat`. Every field but `path`
/// is independently optional, and a missing field is simply omitted from
/// the map rather than encoded as a null/zero.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileInfo {
    pub path: String,
    pub size: Option<i64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: Option<u32>,
    /// Seconds since epoch; wire form is always a 4-byte extension of type -1.
    pub modtime: Option<i64>,
}

impl FileInfo {
    pub fn encode(&self) -> DeviceResult<Vec<u8>> {
        let mut entries = vec![(Value::from("path"), Value::from(self.path.clone()))];
        if let Some(size) = self.size {
            entries.push((Value::from("size"), Value::from(size)));
        }
        if let Some(uid) = self.uid {
            entries.push((Value::from("uid"), Value::from(u64::from(uid))));
        }
        if let Some(gid) = self.gid {
            entries.push((Value::from("gid"), Value::from(u64::from(gid))));
        }
        if let Some(mode) = self.mode {
            entries.push((Value::from("mode"), Value::from(u64::from(mode))));
        }
        if let Some(modtime) = self.modtime {
            entries.push((Value::from("modtime"), encode_modtime(modtime)?));
        }
        encode_value(&Value::Map(entries))
    }

    pub fn decode(bytes: &[u8]) -> DeviceResult<Self> {
        let value = decode_single_value(bytes)?;
        let map = expect_map(&value)?;
        let path = map_get(map, "path")
            .ok_or_else(|| {
                DeviceError::from(DecodeError::Malformed("FileInfo missing \"path\"".into()))
            })
            .and_then(|v| expect_str(v).map(str::to_string))?;
        let size = match map_get(map, "size") {
            Some(Value::Nil) | None => None,
            Some(v) => Some(expect_i64(v)?),
        };
        let uid = match map_get(map, "uid") {
            Some(Value::Nil) | None => None,
            Some(v) => Some(expect_u32(v)?),
        };
        let gid = match map_get(map, "gid") {
            Some(Value::Nil) | None => None,
            Some(v) => Some(expect_u32(v)?),
        };
        let mode = match map_get(map, "mode") {
            Some(Value::Nil) | None => None,
            Some(v) => Some(expect_u32(v)?),
        };
        let modtime = match map_get(map, "modtime") {
            Some(Value::Nil) | None => None,
            Some(v) => Some(decode_modtime(v)?),
        };
        Ok(FileInfo {
            path,
            size,
            uid,
            gid,
            mode,
            modtime,
        })
    }
}

/// `PORT_FORWARD/new` body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortForwardConnect {
    pub remote_host: String,
    pub remote_port: u16,
    pub protocol: String,
}

impl PortForwardConnect {
    pub fn encode(&self) -> DeviceResult<Vec<u8>> {
        let entries = vec![
            (Value::from("remote_host"), Value::from(self.remote_host.clone())),
            (Value::from("remote_port"), Value::from(u64::from(self.remote_port))),
            (Value::from("protocol"), Value::from(self.protocol.clone())),
        ];
        encode_value(&Value::Map(entries))
    }

    pub fn decode(bytes: &[u8]) -> DeviceResult<Self> {
        let value = decode_single_value(bytes)?;
        let map = expect_map(&value)?;
        let remote_host = map_get(map, "remote_host")
            .ok_or_else(|| {
                DeviceError::from(DecodeError::Malformed(
                    "PortForwardConnect missing \"remote_host\"".into(),
                ))
            })
            .and_then(|v| expect_str(v).map(str::to_string))?;
        let remote_port = map_get(map, "remote_port")
            .ok_or_else(|| {
                DeviceError::from(DecodeError::Malformed(
                    "PortForwardConnect missing \"remote_port\"".into(),
                ))
            })
            .and_then(super::wire::expect_u16)?;
        let protocol = map_get(map, "protocol")
            .ok_or_else(|| {
                DeviceError::from(DecodeError::Malformed(
                    "PortForwardConnect missing \"protocol\"".into(),
                ))
            })
            .and_then(|v| expect_str(v).map(str::to_string))?;
        Ok(PortForwardConnect {
            remote_host,
            remote_port,
            protocol,
        })
    }
}

/// Carried by the `error` type of the file-transfer and port-forward
/// protocols.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorBody {
    pub err: Option<String>,
    pub msgtype: Option<String>,
    pub msgid: Option<String>,
}

impl ErrorBody {
    pub fn description(description: impl Into<String>) -> Self {
        ErrorBody {
            err: Some(description.into()),
            msgtype: None,
            msgid: None,
        }
    }

    pub fn encode(&self) -> DeviceResult<Vec<u8>> {
        let mut entries = Vec::new();
        if let Some(err) = &self.err {
            entries.push((Value::from("err"), Value::from(err.clone())));
        }
        if let Some(msgtype) = &self.msgtype {
            entries.push((Value::from("msgtype"), Value::from(msgtype.clone())));
        }
        if let Some(msgid) = &self.msgid {
            entries.push((Value::from("msgid"), Value::from(msgid.clone())));
        }
        encode_value(&Value::Map(entries))
    }

    pub fn decode(bytes: &[u8]) -> DeviceResult<Self> {
        let value = decode_single_value(bytes)?;
        let map = expect_map(&value)?;
        let err = match map_get(map, "err") {
            Some(Value::Nil) | None => None,
            Some(v) => Some(expect_str(v)?.to_string()),
        };
        let msgtype = match map_get(map, "msgtype") {
            Some(Value::Nil) | None => None,
            Some(v) => Some(expect_str(v)?.to_string()),
        };
        let msgid = match map_get(map, "msgid") {
            Some(Value::Nil) | None => None,
            Some(v) => Some(expect_str(v)?.to_string()),
        };
        Ok(ErrorBody {
            err,
            msgtype,
            msgid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_request_round_trip_without_src_path() {
        let req = UploadRequest {
            src_path: None,
            path: "/tmp/out".to_string(),
        };
        let bytes = req.encode().unwrap();
        assert_eq!(UploadRequest::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn file_info_omits_absent_fields() {
        let info = FileInfo {
            path: "/a".to_string(),
            size: Some(2500),
            uid: None,
            gid: None,
            mode: Some(0o644),
            modtime: Some(1_700_000_000),
        };
        let bytes = info.encode().unwrap();
        let decoded = FileInfo::decode(&bytes).unwrap();
        assert_eq!(decoded, info);
        assert_eq!(decoded.uid, None);
        assert_eq!(decoded.gid, None);
    }

    #[test]
    fn modtime_roundtrips_through_extension_type() {
        let info = FileInfo {
            path: "/a".to_string(),
            modtime: Some(-5),
            ..Default::default()
        };
        let bytes = info.encode().unwrap();
        let value = decode_single_value(&bytes).unwrap();
        let map = expect_map(&value).unwrap();
        let modtime_value = map_get(map, "modtime").unwrap();
        match modtime_value {
            Value::Ext(ty, data) => {
                assert_eq!(*ty, -1);
                assert_eq!(data.len(), 4);
            }
            other => panic!("expected ext, got {other:?}"),
        }
        assert_eq!(FileInfo::decode(&bytes).unwrap().modtime, Some(-5));
    }

    #[test]
    fn port_forward_connect_round_trip() {
        let req = PortForwardConnect {
            remote_host: "10.0.0.2".to_string(),
            remote_port: 22,
            protocol: "tcp".to_string(),
        };
        let bytes = req.encode().unwrap();
        assert_eq!(PortForwardConnect::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn error_body_round_trip() {
        let err = ErrorBody::description("no such file");
        let bytes = err.encode().unwrap();
        assert_eq!(ErrorBody::decode(&bytes).unwrap(), err);
    }

    #[test]
    fn get_file_requires_path() {
        let bytes = encode_value(&Value::Map(vec![])).unwrap();
        assert!(GetFile::decode(&bytes).is_err());
    }
}
