//! Shell handler: `NO_SESSION` ↔ `LIVE`, keyed by `sid`. See §4.3.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::{Envelope, Proto, Status};
use crate::error::DeviceResult;
use crate::host::ShellHost;
use crate::session::ShellSession;

use super::reply;

pub struct ShellHandler {
    host: Arc<dyn ShellHost>,
    session: ShellSession,
}

impl ShellHandler {
    pub fn new(host: Arc<dyn ShellHost>) -> Self {
        ShellHandler {
            host,
            session: ShellSession::default(),
        }
    }

    pub fn session(&self) -> &ShellSession {
        &self.session
    }

    pub async fn handle(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        match env.typ.as_str() {
            "new" => self.handle_new(env).await,
            "resize" => self.handle_resize(env).await,
            "shell" => self.handle_data(env).await,
            "ping" => Ok(Some(self.handle_ping(env))),
            "pong" => {
                debug!("shell: discarding inbound pong");
                Ok(None)
            }
            "stop" => self.handle_stop(env).await,
            other => {
                warn!(typ = other, "shell: unknown message type");
                Ok(None)
            }
        }
    }

    async fn handle_new(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        if self.session.is_live() {
            warn!(sid = ?env.sid, "shell: new requested while a session is already live");
            return Ok(None);
        }
        let Some(sid) = env.sid.clone() else {
            warn!("shell: new requested with no sid");
            return Ok(None);
        };
        let props = env.properties.clone().unwrap_or_default();
        let width = props.terminal_width.unwrap_or(0);
        let height = props.terminal_height.unwrap_or(0);

        match self.host.open(width, height).await {
            Ok(()) => {
                self.session.start(sid.clone());
                Ok(Some(reply(Proto::Shell, "ack", Some(&sid), Status::Normal)))
            }
            Err(e) => {
                warn!(error = %e, "shell: host open failed");
                Ok(Some(reply(Proto::Shell, "ack", Some(&sid), Status::Error)))
            }
        }
    }

    async fn handle_resize(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        if !self.session.is_live() || self.session.sid() != env.sid.as_deref() {
            debug!("shell: resize ignored, no matching live session");
            return Ok(None);
        }
        let Some(props) = env.properties else {
            return Ok(None);
        };
        let (Some(width), Some(height)) = (props.terminal_width, props.terminal_height) else {
            return Ok(None);
        };
        self.host.resize(width, height).await?;
        Ok(None)
    }

    async fn handle_data(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        if !self.session.is_live() || self.session.sid() != env.sid.as_deref() {
            debug!("shell: data ignored, no matching live session");
            return Ok(None);
        }
        let Some(body) = env.body else {
            return Ok(None);
        };
        self.host.write(&body).await?;
        Ok(None)
    }

    fn handle_ping(&self, env: Envelope) -> Envelope {
        reply(Proto::Shell, "pong", env.sid.as_deref(), Status::Control)
    }

    async fn handle_stop(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        if !self.session.is_live() {
            warn!(sid = ?env.sid, "shell: stop requested with no live session");
            return Ok(None);
        }
        let sid = self.session.sid().map(str::to_string);
        let status = match self.host.close().await {
            Ok(()) => Status::Normal,
            Err(e) => {
                warn!(error = %e, "shell: host close failed");
                Status::Error
            }
        };
        self.session.clear();
        Ok(Some(reply(Proto::Shell, "stop", sid.as_deref(), status)))
    }

    /// Device-originated: emit `data` read from the host as a `shell`
    /// envelope. Fails if no session is open.
    pub fn print(&self, data: Vec<u8>) -> DeviceResult<Envelope> {
        let sid = self.session.sid().ok_or_else(|| {
            crate::error::DeviceError::protocol("shell print with no live session")
        })?;
        Ok(reply(Proto::Shell, "shell", Some(sid), Status::Normal).with_body(data))
    }

    /// Device-originated: the liveness loop's periodic probe. Emits nothing
    /// if no shell session is open.
    pub fn healthcheck(&self, interval_secs: i64) -> Option<Envelope> {
        let sid = self.session.sid()?;
        let mut env = reply(Proto::Shell, "ping", Some(sid), Status::Control);
        if interval_secs > 0 {
            if let Some(props) = env.properties.as_mut() {
                props.timeout = Some((interval_secs * 2) as u32);
            }
        }
        Some(env)
    }

    /// Device-originated: forced close from the liveness loop's recovery
    /// path. Unconditionally reports `status=ERROR`; a no-op (no outbound
    /// `stop`) if no session is open, so repeated calls stay idempotent.
    pub async fn close(&mut self) -> DeviceResult<Option<Envelope>> {
        if !self.session.is_live() {
            return Ok(None);
        }
        let sid = self.session.sid().map(str::to_string);
        if let Err(e) = self.host.close().await {
            warn!(error = %e, "shell: host close failed during forced close");
        }
        self.session.clear();
        Ok(Some(reply(Proto::Shell, "stop", sid.as_deref(), Status::Error)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Properties;
    use crate::host::mock::MockShellHost;

    fn handler() -> ShellHandler {
        ShellHandler::new(Arc::new(MockShellHost::default()))
    }

    #[tokio::test]
    async fn new_spawns_and_acks() {
        let mut h = handler();
        let env = Envelope::new(Proto::Shell, "new").with_sid("S1");
        let resp = h.handle(env).await.unwrap().unwrap();
        assert_eq!(resp.typ, "ack");
        assert_eq!(resp.status(), Some(Status::Normal));
        assert!(h.session().is_live());
    }

    #[tokio::test]
    async fn second_new_is_ignored() {
        let mut h = handler();
        h.handle(Envelope::new(Proto::Shell, "new").with_sid("S1"))
            .await
            .unwrap();
        let resp = h
            .handle(Envelope::new(Proto::Shell, "new").with_sid("S2"))
            .await
            .unwrap();
        assert!(resp.is_none());
        assert_eq!(h.session().sid(), Some("S1"));
    }

    #[tokio::test]
    async fn ping_replies_pong_with_same_sid() {
        let mut h = handler();
        let resp = h
            .handle(Envelope::new(Proto::Shell, "ping").with_sid("S1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.typ, "pong");
        assert_eq!(resp.sid.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn stop_clears_session_and_acks_normal() {
        let mut h = handler();
        h.handle(Envelope::new(Proto::Shell, "new").with_sid("S1"))
            .await
            .unwrap();
        let resp = h
            .handle(Envelope::new(Proto::Shell, "stop").with_sid("S1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.typ, "stop");
        assert_eq!(resp.status(), Some(Status::Normal));
        assert!(!h.session().is_live());
    }

    #[tokio::test]
    async fn idempotent_close_emits_at_most_one_stop() {
        let mut h = handler();
        h.handle(Envelope::new(Proto::Shell, "new").with_sid("S1"))
            .await
            .unwrap();
        let first = h.close().await.unwrap();
        let second = h.close().await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn healthcheck_is_silent_without_a_session() {
        let h = handler();
        assert!(h.healthcheck(30).is_none());
    }

    #[tokio::test]
    async fn healthcheck_sets_timeout_when_interval_positive() {
        let mut h = handler();
        h.handle(Envelope::new(Proto::Shell, "new").with_sid("S1"))
            .await
            .unwrap();
        let ping = h.healthcheck(30).unwrap();
        assert_eq!(
            ping.properties.unwrap_or_else(Properties::default).timeout,
            Some(60)
        );
    }

    #[tokio::test]
    async fn print_fails_without_a_session() {
        let h = handler();
        assert!(h.print(vec![1, 2, 3]).is_err());
    }
}
