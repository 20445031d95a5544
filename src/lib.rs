//! deviceconnect — the device-side protocol engine for a remote
//! troubleshooting channel.
//!
//! A central server pushes interactive requests over a persistent
//! bidirectional message stream — open a shell, transfer a file, forward a
//! TCP/UDP port, trigger an update check or inventory report, or exercise
//! the transport itself — and this crate decodes each request, dispatches
//! it to the right subsystem, drives its small stateful dialog, and returns
//! framed responses.
//!
//! # Layout
//!
//! - [`codec`]: the self-describing binary envelope and its typed body
//!   payloads.
//! - [`handlers`]: the five protocol state machines (shell, file-transfer,
//!   port-forward, update-trigger, control).
//! - [`dispatcher`]: routes a decoded envelope to its handler by `proto`.
//! - [`transport`]: the `Transport` trait, a `WebSocketTransport` reference
//!   implementation, and an `InMemoryTransport` test double.
//! - [`engine`]: wires the above together and drives the liveness loop.
//! - [`host`]: the callback traits the embedding application implements to
//!   provide a real pty, filesystem, outbound sockets, and update trigger.
//! - [`session`]: the per-protocol session records the handlers own.
//! - [`config`], [`error`]: configuration and the crate's error type.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use deviceconnect::config::DeviceConfig;
//! use deviceconnect::engine::Engine;
//! use deviceconnect::host::mock::{MockFileHost, MockPortForwardHost, MockShellHost, MockUpdateHost};
//! use deviceconnect::transport::WebSocketTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DeviceConfig::default();
//!     config.validate()?;
//!
//!     let transport = Arc::new(WebSocketTransport::new(config.host.clone(), "device-token"));
//!     let engine = Engine::new(
//!         config,
//!         transport,
//!         Arc::new(MockShellHost::default()),
//!         Arc::new(MockFileHost::default()),
//!         Some(Arc::new(MockPortForwardHost::default())),
//!         Arc::new(MockUpdateHost::default()),
//!     );
//!
//!     let _handles = engine.run();
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod host;
pub mod session;
pub mod transport;

pub use config::DeviceConfig;
pub use engine::{Engine, EngineHandles};
pub use error::{DeviceError, DeviceResult};
