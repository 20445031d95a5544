//! Single entry point fed by the transport: decode → route by `proto` →
//! handler → zero or more response envelopes. See §4.2.
//!
//! The dispatcher itself holds no state; the five handlers it routes into
//! live in `Handlers`, owned by `Engine` and locked for the duration of one
//! inbound frame.

use tracing::{debug, warn};

use crate::codec::{decode_envelope, Envelope, Proto};
use crate::handlers::control::ControlHandler;
use crate::handlers::file_transfer::FileTransferHandler;
use crate::handlers::port_forward::PortForwardHandler;
use crate::handlers::shell::ShellHandler;
use crate::handlers::update_trigger::UpdateTriggerHandler;
use crate::handlers::error_envelope;
use crate::host::{FileHost, PortForwardHost, ShellHost, UpdateHost};

/// The five protocol handlers, bundled so `Engine` can hold and lock them as
/// one unit. `port_forward` is `None` when the embedding build has no
/// port-forward host available; the dispatcher then replies with an error
/// instead of routing to it, per §4.2 step 3.
pub struct Handlers {
    pub shell: ShellHandler,
    pub file_transfer: FileTransferHandler,
    pub port_forward: Option<PortForwardHandler>,
    pub update_trigger: UpdateTriggerHandler,
    pub control: ControlHandler,
}

impl Handlers {
    pub fn new(
        shell_host: std::sync::Arc<dyn ShellHost>,
        file_host: std::sync::Arc<dyn FileHost>,
        port_forward_host: Option<std::sync::Arc<dyn PortForwardHost>>,
        update_host: std::sync::Arc<dyn UpdateHost>,
    ) -> Self {
        Handlers {
            shell: ShellHandler::new(shell_host),
            file_transfer: FileTransferHandler::new(file_host),
            port_forward: port_forward_host.map(PortForwardHandler::new),
            update_trigger: UpdateTriggerHandler::new(update_host),
            control: ControlHandler::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher
    }

    /// Decode one frame and route it. Decode failures and envelopes with an
    /// unroutable `proto` are dropped silently (there is no sid to address a
    /// reply to). Returns the response envelope(s), if any, to send back.
    pub async fn dispatch(&self, bytes: &[u8], handlers: &mut Handlers) -> Vec<Envelope> {
        let envelope = match decode_envelope(bytes) {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "dispatcher: dropping frame that failed to decode");
                return Vec::new();
            }
        };

        match envelope.proto {
            Proto::Shell => self.route_shell(envelope, handlers).await,
            Proto::FileTransfer => self.route_file_transfer(envelope, handlers).await,
            Proto::PortForward => self.route_port_forward(envelope, handlers).await,
            Proto::UpdateTrigger => self.route_update_trigger(envelope, handlers).await,
            Proto::Control => self.route_control(envelope, handlers).await,
            Proto::Invalid => {
                warn!("dispatcher: dropping envelope with proto=INVALID");
                Vec::new()
            }
        }
    }

    async fn route_shell(&self, envelope: Envelope, handlers: &mut Handlers) -> Vec<Envelope> {
        match handlers.shell.handle(envelope).await {
            Ok(resp) => resp.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "dispatcher: shell handler failed");
                Vec::new()
            }
        }
    }

    async fn route_file_transfer(&self, envelope: Envelope, handlers: &mut Handlers) -> Vec<Envelope> {
        match handlers.file_transfer.handle(envelope).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "dispatcher: file-transfer handler failed");
                Vec::new()
            }
        }
    }

    async fn route_port_forward(&self, envelope: Envelope, handlers: &mut Handlers) -> Vec<Envelope> {
        let sid = envelope.sid.clone();
        match handlers.port_forward.as_mut() {
            Some(handler) => match handler.handle(envelope).await {
                Ok(resp) => resp.into_iter().collect(),
                Err(e) => {
                    warn!(error = %e, "dispatcher: port-forward handler failed");
                    Vec::new()
                }
            },
            None => {
                warn!("dispatcher: port-forward requested but unavailable in this build");
                error_envelope(Proto::PortForward, sid.as_deref(), "port-forward is not available")
                    .map(|e| vec![e])
                    .unwrap_or_default()
            }
        }
    }

    async fn route_update_trigger(&self, envelope: Envelope, handlers: &mut Handlers) -> Vec<Envelope> {
        match handlers.update_trigger.handle(envelope).await {
            Ok(resp) => resp.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "dispatcher: update-trigger handler failed");
                Vec::new()
            }
        }
    }

    async fn route_control(&self, envelope: Envelope, handlers: &mut Handlers) -> Vec<Envelope> {
        match handlers.control.handle(envelope).await {
            Ok(resp) => resp.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "dispatcher: control handler failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_envelope, Envelope, Proto, Status};
    use crate::host::mock::{MockFileHost, MockPortForwardHost, MockShellHost, MockUpdateHost};
    use std::sync::Arc;

    fn handlers_with_port_forward() -> Handlers {
        Handlers::new(
            Arc::new(MockShellHost::default()),
            Arc::new(MockFileHost::default()),
            Some(Arc::new(MockPortForwardHost::default())),
            Arc::new(MockUpdateHost::default()),
        )
    }

    fn handlers_without_port_forward() -> Handlers {
        Handlers::new(
            Arc::new(MockShellHost::default()),
            Arc::new(MockFileHost::default()),
            None,
            Arc::new(MockUpdateHost::default()),
        )
    }

    #[tokio::test]
    async fn routes_shell_new_to_shell_handler() {
        let mut handlers = handlers_with_port_forward();
        let dispatcher = Dispatcher::new();
        let bytes = encode_envelope(&Envelope::new(Proto::Shell, "new").with_sid("S1")).unwrap();
        let resp = dispatcher.dispatch(&bytes, &mut handlers).await;
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].typ, "ack");
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_silently() {
        let mut handlers = handlers_with_port_forward();
        let dispatcher = Dispatcher::new();
        let resp = dispatcher.dispatch(&[0xc1], &mut handlers).await;
        assert!(resp.is_empty());
    }

    #[tokio::test]
    async fn port_forward_unavailable_replies_with_error() {
        let mut handlers = handlers_without_port_forward();
        let dispatcher = Dispatcher::new();
        let bytes = encode_envelope(&Envelope::new(Proto::PortForward, "new").with_sid("S1")).unwrap();
        let resp = dispatcher.dispatch(&bytes, &mut handlers).await;
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].typ, "error");
        assert_eq!(resp[0].status(), Some(Status::Error));
        assert_eq!(resp[0].sid.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn update_trigger_routes_to_update_trigger_handler() {
        let mut handlers = handlers_with_port_forward();
        let dispatcher = Dispatcher::new();
        let bytes = encode_envelope(&Envelope::new(Proto::UpdateTrigger, "check-update")).unwrap();
        let resp = dispatcher.dispatch(&bytes, &mut handlers).await;
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].typ, "check-update");
    }

    #[tokio::test]
    async fn control_routes_to_control_handler() {
        let mut handlers = handlers_with_port_forward();
        let dispatcher = Dispatcher::new();
        let bytes = encode_envelope(&Envelope::new(Proto::Control, "ping").with_sid("S1")).unwrap();
        let resp = dispatcher.dispatch(&bytes, &mut handlers).await;
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].typ, "ack");
    }
}
