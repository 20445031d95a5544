//! The five protocol state machines, one module each, dispatched by
//! `proto` discriminant from `dispatcher.rs`.

pub mod control;
pub mod file_transfer;
pub mod port_forward;
pub mod shell;
pub mod update_trigger;

use crate::codec::{Envelope, ErrorBody, Properties, Proto, Status};
use crate::error::DeviceResult;

/// Build a reply envelope with only a status property set.
pub(crate) fn reply(proto: Proto, typ: impl Into<String>, sid: Option<&str>, status: Status) -> Envelope {
    let props = Properties {
        status: Some(status),
        ..Default::default()
    };
    let mut env = Envelope::new(proto, typ).with_properties(props);
    if let Some(sid) = sid {
        env = env.with_sid(sid.to_string());
    }
    env
}

/// Build an `error` reply carrying a short description, per §7.
pub(crate) fn error_envelope(
    proto: Proto,
    sid: Option<&str>,
    description: impl Into<String>,
) -> DeviceResult<Envelope> {
    let body = ErrorBody::description(description).encode()?;
    Ok(reply(proto, "error", sid, Status::Error).with_body(body))
}
