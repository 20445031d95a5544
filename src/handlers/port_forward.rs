//! Port-forward handler: `NO_SESSION` ↔ `LIVE`, keyed by `(sid,
//! connection_id)`. See §4.5. No vestigial file-transfer-shaped state here —
//! the session record is exactly `{ sid, connection_id, handle }`.

use std::sync::Arc;

use tracing::warn;

use crate::codec::{Envelope, PortForwardConnect, Properties, Proto, Status};
use crate::error::DeviceResult;
use crate::host::PortForwardHost;
use crate::session::PortForwardSession;

use super::{error_envelope, reply};

pub struct PortForwardHandler {
    host: Arc<dyn PortForwardHost>,
    session: PortForwardSession,
}

impl PortForwardHandler {
    pub fn new(host: Arc<dyn PortForwardHost>) -> Self {
        PortForwardHandler {
            host,
            session: PortForwardSession::default(),
        }
    }

    pub fn session(&self) -> &PortForwardSession {
        &self.session
    }

    pub async fn handle(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        match env.typ.as_str() {
            "new" => self.handle_new(env).await,
            "forward" => self.handle_forward(env).await,
            "stop" => self.handle_stop(env).await,
            "ack" | "error" => Ok(None),
            other => {
                warn!(typ = other, "port-forward: unknown message type");
                Ok(None)
            }
        }
    }

    async fn handle_new(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        let sid = env.sid.clone();
        let props = env.properties.clone().unwrap_or_default();
        let connection_id = props.connection_id.clone();

        if self.session.is_live() {
            return Ok(Some(error_envelope(
                Proto::PortForward,
                sid.as_deref(),
                "a forwarded connection is already open",
            )?));
        }

        let (Some(sid), Some(connection_id)) = (sid.clone(), connection_id.clone()) else {
            return Ok(Some(error_envelope(
                Proto::PortForward,
                sid.as_deref(),
                "new requires sid and connection_id",
            )?));
        };

        let Some(body) = env.body.as_deref() else {
            return Ok(Some(error_envelope(Proto::PortForward, Some(&sid), "new missing body")?));
        };
        let request = match PortForwardConnect::decode(body) {
            Ok(r) => r,
            Err(e) => {
                return Ok(Some(error_envelope(
                    Proto::PortForward,
                    Some(&sid),
                    format!("malformed new: {e}"),
                )?))
            }
        };
        if request.remote_port == 0 {
            return Ok(Some(error_envelope(Proto::PortForward, Some(&sid), "remote_port must be nonzero")?));
        }

        match self
            .host
            .connect(&request.remote_host, request.remote_port, &request.protocol)
            .await
        {
            Ok(handle) => {
                self.session.start(sid.clone(), connection_id.clone(), handle);
                let props = Properties {
                    connection_id: Some(connection_id),
                    status: Some(Status::Normal),
                    ..Default::default()
                };
                Ok(Some(Envelope::new(Proto::PortForward, "ack").with_sid(sid).with_properties(props)))
            }
            Err(e) => {
                warn!(error = %e, "port-forward: connect failed");
                Ok(Some(error_envelope(Proto::PortForward, Some(&sid), e.to_string())?))
            }
        }
    }

    async fn handle_forward(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        let sid = env.sid.clone();
        let props = env.properties.clone().unwrap_or_default();
        let Some(connection_id) = props.connection_id.as_deref() else {
            return Ok(None);
        };
        if !self.session.is_live() || !self.session.matches(connection_id) {
            return Ok(None);
        }
        let Some(body) = env.body else {
            return Ok(Some(error_envelope(Proto::PortForward, sid.as_deref(), "forward missing body")?));
        };
        let handle = self.session.handle().expect("session is live");
        match self.host.send(handle, &body).await {
            Ok(()) => Ok(Some(reply(Proto::PortForward, "ack", sid.as_deref(), Status::Normal))),
            Err(e) => {
                warn!(error = %e, "port-forward: send failed");
                Ok(Some(error_envelope(Proto::PortForward, sid.as_deref(), e.to_string())?))
            }
        }
    }

    async fn handle_stop(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        if !self.session.is_live() {
            warn!(sid = ?env.sid, "port-forward: stop requested with no live session");
            return Ok(None);
        }
        let sid = self.session.sid().map(str::to_string);
        let connection_id = self.session.connection_id().map(str::to_string);
        let handle = self.session.handle().expect("session is live");
        if let Err(e) = self.host.close(handle).await {
            warn!(error = %e, "port-forward: host close failed");
        }
        self.session.clear();

        let props = Properties {
            connection_id,
            status: Some(Status::Normal),
            ..Default::default()
        };
        let mut resp = Envelope::new(Proto::PortForward, "stop").with_properties(props);
        if let Some(sid) = sid {
            resp = resp.with_sid(sid);
        }
        Ok(Some(resp))
    }

    /// Device-originated: forward bytes read from the connection back to the
    /// server. Fails if no session is open.
    pub fn forward(&self, data: Vec<u8>) -> DeviceResult<Envelope> {
        let sid = self
            .session
            .sid()
            .ok_or_else(|| crate::error::DeviceError::protocol("forward with no live session"))?;
        let connection_id = self.session.connection_id().expect("sid implies connection_id");
        let props = Properties {
            connection_id: Some(connection_id.to_string()),
            status: Some(Status::Normal),
            ..Default::default()
        };
        Ok(Envelope::new(Proto::PortForward, "forward")
            .with_sid(sid.to_string())
            .with_properties(props)
            .with_body(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockPortForwardHost;

    fn new_envelope(sid: &str, connection_id: &str, remote_port: u16) -> Envelope {
        let body = PortForwardConnect {
            remote_host: "10.0.0.1".to_string(),
            remote_port,
            protocol: "tcp".to_string(),
        }
        .encode()
        .unwrap();
        let props = Properties {
            connection_id: Some(connection_id.to_string()),
            user_id: Some("u1".to_string()),
            ..Default::default()
        };
        Envelope::new(Proto::PortForward, "new")
            .with_sid(sid)
            .with_properties(props)
            .with_body(body)
    }

    #[tokio::test]
    async fn new_connects_and_acks() {
        let mut h = PortForwardHandler::new(Arc::new(MockPortForwardHost::default()));
        let resp = h.handle(new_envelope("S1", "C1", 22)).await.unwrap().unwrap();
        assert_eq!(resp.typ, "ack");
        assert!(h.session().is_live());
        assert_eq!(h.session().connection_id(), Some("C1"));
    }

    #[tokio::test]
    async fn second_new_is_rejected() {
        let mut h = PortForwardHandler::new(Arc::new(MockPortForwardHost::default()));
        h.handle(new_envelope("S1", "C1", 22)).await.unwrap();
        let resp = h.handle(new_envelope("S1", "C2", 22)).await.unwrap().unwrap();
        assert_eq!(resp.typ, "error");
        assert_eq!(h.session().connection_id(), Some("C1"));
    }

    #[tokio::test]
    async fn zero_port_is_rejected() {
        let mut h = PortForwardHandler::new(Arc::new(MockPortForwardHost::default()));
        let resp = h.handle(new_envelope("S1", "C1", 0)).await.unwrap().unwrap();
        assert_eq!(resp.typ, "error");
        assert!(!h.session().is_live());
    }

    #[tokio::test]
    async fn stop_clears_session() {
        let mut h = PortForwardHandler::new(Arc::new(MockPortForwardHost::default()));
        h.handle(new_envelope("S1", "C1", 22)).await.unwrap();
        let resp = h
            .handle(Envelope::new(Proto::PortForward, "stop").with_sid("S1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.typ, "stop");
        assert!(!h.session().is_live());
    }

    #[tokio::test]
    async fn forward_without_session_fails() {
        let h = PortForwardHandler::new(Arc::new(MockPortForwardHost::default()));
        assert!(h.forward(vec![1]).is_err());
    }
}
