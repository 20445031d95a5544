//! Binary wire codec: the envelope format and the typed payloads carried
//! inside envelope bodies.

mod wire;

pub mod body;
pub mod envelope;

pub use body::{ErrorBody, FileInfo, GetFile, PortForwardConnect, StatFile, UploadRequest};
pub use envelope::{decode_envelope, encode_envelope, Envelope, Properties, Proto, Status};
