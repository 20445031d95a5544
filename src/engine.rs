//! `Engine`: the owning value that ties the transport, the dispatcher, the
//! five handlers, and the liveness loop together. See §2 and §4.8.
//!
//! Two logical tasks share one `Engine`: the inbound-frame task (driven by
//! transport events) and the liveness-loop task. Both run through the same
//! `tokio::sync::Mutex`-guarded `Handlers`, so at most one is ever doing
//! protocol work at a time — the mutex exists only to let two tasks share
//! one value safely, not to express real parallel mutation (§5).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::codec::{encode_envelope, Envelope};
use crate::config::DeviceConfig;
use crate::dispatcher::{Dispatcher, Handlers};
use crate::error::DeviceResult;
use crate::host::{FileHost, PortForwardHost, ShellHost, UpdateHost};
use crate::transport::{Transport, TransportEvent};

pub struct Engine {
    handlers: Mutex<Handlers>,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    config: DeviceConfig,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DeviceConfig,
        transport: Arc<dyn Transport>,
        shell_host: Arc<dyn ShellHost>,
        file_host: Arc<dyn FileHost>,
        port_forward_host: Option<Arc<dyn PortForwardHost>>,
        update_host: Arc<dyn UpdateHost>,
    ) -> Arc<Self> {
        Arc::new(Engine {
            handlers: Mutex::new(Handlers::new(shell_host, file_host, port_forward_host, update_host)),
            transport,
            dispatcher: Dispatcher::new(),
            config,
        })
    }

    /// The dispatcher entry point, registered with the transport as its
    /// inbound callback. Encodes and sends every response the dispatch
    /// produces; a failed send is dropped, per §4.2 step 4.
    pub async fn on_frame(&self, bytes: &[u8]) {
        let responses = {
            let mut handlers = self.handlers.lock().await;
            self.dispatcher.dispatch(bytes, &mut handlers).await
        };
        for response in responses {
            self.send_envelope(response).await;
        }
    }

    /// Device-originated: forward a chunk of shell output read from the
    /// host. A no-op (propagates the handler's error) if no shell session
    /// is open.
    pub async fn shell_print(&self, data: Vec<u8>) -> DeviceResult<()> {
        let envelope = {
            let handlers = self.handlers.lock().await;
            handlers.shell.print(data)?
        };
        self.send_envelope_fallible(envelope).await
    }

    /// Device-originated: forward bytes read from an open forwarded
    /// connection. Fails if no port-forward session is open, or the build
    /// has no port-forward host at all.
    pub async fn port_forward_send(&self, data: Vec<u8>) -> DeviceResult<()> {
        let envelope = {
            let handlers = self.handlers.lock().await;
            let port_forward = handlers
                .port_forward
                .as_ref()
                .ok_or_else(|| crate::error::DeviceError::protocol("port-forward is not available"))?;
            port_forward.forward(data)?
        };
        self.send_envelope_fallible(envelope).await
    }

    /// Starts the liveness loop and the transport-event pump. Dropping the
    /// returned handle aborts both tasks.
    pub fn run(self: &Arc<Self>) -> EngineHandles {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let pump_engine = Arc::clone(self);
        let events_task = tokio::spawn(async move { pump_engine.pump_events(events_rx).await });

        let liveness_engine = Arc::clone(self);
        let liveness_task = tokio::spawn(async move { liveness_engine.liveness_loop(events_tx).await });

        EngineHandles { events_task, liveness_task }
    }

    async fn pump_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => info!("transport connected"),
                TransportEvent::DataReceived(bytes) => self.on_frame(&bytes).await,
                TransportEvent::Disconnected => warn!("transport disconnected"),
                TransportEvent::Error(e) => {
                    warn!(error = %e, "transport error, recovering");
                    self.recover().await;
                }
            }
        }
    }

    /// §4.8 step 3: close any live shell, disconnect the transport. The next
    /// liveness tick retries the connection from scratch.
    async fn recover(&self) {
        let stop = {
            let mut handlers = self.handlers.lock().await;
            handlers.shell.close().await.unwrap_or_else(|e| {
                warn!(error = %e, "recover: shell close failed");
                None
            })
        };
        if let Some(stop) = stop {
            self.send_envelope(stop).await;
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "recover: transport disconnect failed");
        }
    }

    async fn liveness_loop(self: Arc<Self>, events_tx: mpsc::UnboundedSender<TransportEvent>) {
        if !self.config.healthcheck_enabled() {
            info!("liveness loop disabled (healthcheck_interval_secs <= 0)");
            return;
        }
        let period = Duration::from_secs(self.config.healthcheck_interval_secs as u64);
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = self.liveness_tick(&events_tx).await {
                warn!(error = %e, "liveness tick failed, retrying next interval");
            }
        }
    }

    async fn liveness_tick(&self, events_tx: &mpsc::UnboundedSender<TransportEvent>) -> DeviceResult<()> {
        if !self.transport.is_connected().await {
            return self.transport.connect(events_tx.clone()).await;
        }

        let ping = {
            let handlers = self.handlers.lock().await;
            handlers.shell.healthcheck(self.config.healthcheck_interval_secs as i64)
        };
        let Some(ping) = ping else {
            return Ok(());
        };

        let bytes = encode_envelope(&ping)?;
        if let Err(e) = self.transport.send(&bytes).await {
            self.recover().await;
            return Err(e);
        }
        Ok(())
    }

    /// Encode-and-send that swallows transport failures, matching §4.2 step
    /// 4: a dropped response is not itself an engine-level error.
    async fn send_envelope(&self, envelope: Envelope) {
        match encode_envelope(&envelope) {
            Ok(bytes) => {
                if let Err(e) = self.transport.send(&bytes).await {
                    warn!(error = %e, "dropping response, transport send failed");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode response envelope"),
        }
    }

    /// Encode-and-send that surfaces transport failures, for the
    /// device-originated entry points whose callers need to know whether
    /// the message actually went out.
    async fn send_envelope_fallible(&self, envelope: Envelope) -> DeviceResult<()> {
        let bytes = encode_envelope(&envelope)?;
        self.transport.send(&bytes).await
    }
}

/// Handles to the two background tasks `Engine::run` starts. Dropping this
/// value aborts both; there is no other cancellation primitive (§5).
pub struct EngineHandles {
    pub events_task: JoinHandle<()>,
    pub liveness_task: JoinHandle<()>,
}

impl Drop for EngineHandles {
    fn drop(&mut self) {
        self.events_task.abort();
        self.liveness_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_envelope, Proto};
    use crate::host::mock::{MockFileHost, MockPortForwardHost, MockShellHost, MockUpdateHost};
    use crate::transport::InMemoryTransport;
    use std::sync::Arc;

    fn engine_with_transport() -> (Arc<Engine>, Arc<InMemoryTransport>, crate::transport::InMemoryTransportHandle) {
        let (transport, handle) = InMemoryTransport::pair();
        let transport = Arc::new(transport);
        let engine = Engine::new(
            DeviceConfig { healthcheck_interval_secs: 0, ..Default::default() },
            transport.clone() as Arc<dyn Transport>,
            Arc::new(MockShellHost::default()),
            Arc::new(MockFileHost::default()),
            Some(Arc::new(MockPortForwardHost::default())),
            Arc::new(MockUpdateHost::default()),
        );
        (engine, transport, handle)
    }

    #[tokio::test]
    async fn on_frame_decodes_dispatches_and_sends_response() {
        let (engine, transport, _handle) = engine_with_transport();
        transport.connect(mpsc::unbounded_channel().0).await.unwrap();

        let frame = encode_envelope(&Envelope::new(Proto::Shell, "new").with_sid("S1")).unwrap();
        engine.on_frame(&frame).await;

        let sent = transport.sent_messages().await;
        assert_eq!(sent.len(), 1);
        let resp = decode_envelope(&sent[0]).unwrap();
        assert_eq!(resp.typ, "ack");
    }

    #[tokio::test]
    async fn shell_print_requires_a_live_session() {
        let (engine, transport, _handle) = engine_with_transport();
        transport.connect(mpsc::unbounded_channel().0).await.unwrap();
        assert!(engine.shell_print(vec![1, 2, 3]).await.is_err());
    }

    #[tokio::test]
    async fn shell_print_sends_after_session_open() {
        let (engine, transport, _handle) = engine_with_transport();
        transport.connect(mpsc::unbounded_channel().0).await.unwrap();

        let frame = encode_envelope(&Envelope::new(Proto::Shell, "new").with_sid("S1")).unwrap();
        engine.on_frame(&frame).await;

        engine.shell_print(b"hello".to_vec()).await.unwrap();
        let sent = transport.sent_messages().await;
        let print = decode_envelope(&sent[1]).unwrap();
        assert_eq!(print.typ, "shell");
        assert_eq!(print.body.as_deref(), Some(b"hello".as_slice()));
    }

    #[tokio::test]
    async fn liveness_disabled_when_interval_non_positive() {
        let (engine, _transport, _handle) = engine_with_transport();
        assert!(!engine.config.healthcheck_enabled());
    }
}
