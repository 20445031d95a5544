//! Update-trigger handler: two stateless commands, each acknowledged with
//! the outcome of the corresponding host callback. See §4.6.

use std::sync::Arc;

use tracing::warn;

use crate::codec::{Envelope, Proto, Status};
use crate::error::DeviceResult;
use crate::host::UpdateHost;

use super::reply;

pub struct UpdateTriggerHandler {
    host: Arc<dyn UpdateHost>,
}

impl UpdateTriggerHandler {
    pub fn new(host: Arc<dyn UpdateHost>) -> Self {
        UpdateTriggerHandler { host }
    }

    pub async fn handle(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        let sid = env.sid.clone();
        match env.typ.as_str() {
            "check-update" => {
                let status = match self.host.check_update().await {
                    Ok(()) => Status::Normal,
                    Err(e) => {
                        warn!(error = %e, "update-trigger: check-update failed");
                        Status::Error
                    }
                };
                Ok(Some(reply(Proto::UpdateTrigger, "check-update", sid.as_deref(), status)))
            }
            "send-inventory" => {
                let status = match self.host.send_inventory().await {
                    Ok(()) => Status::Normal,
                    Err(e) => {
                        warn!(error = %e, "update-trigger: send-inventory failed");
                        Status::Error
                    }
                };
                Ok(Some(reply(Proto::UpdateTrigger, "send-inventory", sid.as_deref(), status)))
            }
            other => {
                warn!(typ = other, "update-trigger: unknown message type");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockUpdateHost;

    #[tokio::test]
    async fn check_update_acks_normal_on_success() {
        let mut h = UpdateTriggerHandler::new(Arc::new(MockUpdateHost::default()));
        let resp = h
            .handle(Envelope::new(Proto::UpdateTrigger, "check-update").with_sid("S1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.typ, "check-update");
        assert_eq!(resp.status(), Some(Status::Normal));
    }

    #[tokio::test]
    async fn send_inventory_acks_error_on_host_failure() {
        let mut h = UpdateTriggerHandler::new(Arc::new(MockUpdateHost { fail: true, ..Default::default() }));
        let resp = h
            .handle(Envelope::new(Proto::UpdateTrigger, "send-inventory").with_sid("S1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.status(), Some(Status::Error));
    }
}
