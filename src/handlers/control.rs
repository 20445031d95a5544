//! Control handler: reserved for transport-level control messages. The
//! reference implementation only needs to acknowledge. See §4.7.

use tracing::debug;

use crate::codec::{Envelope, Proto, Status};
use crate::error::DeviceResult;

use super::reply;

#[derive(Debug, Default)]
pub struct ControlHandler;

impl ControlHandler {
    pub fn new() -> Self {
        ControlHandler
    }

    pub async fn handle(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        debug!(typ = %env.typ, "control: acknowledging");
        Ok(Some(reply(Proto::Control, "ack", env.sid.as_deref(), Status::Control)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acknowledges_any_control_message() {
        let mut h = ControlHandler::new();
        let resp = h
            .handle(Envelope::new(Proto::Control, "ping").with_sid("S1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.typ, "ack");
    }
}
