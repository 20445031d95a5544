//! Device connection configuration
//!
//! Parsing this from a file or CLI arguments is the embedding binary's job
//! (out of scope here, per the protocol engine's charter); this module only
//! owns the struct, its defaults, and validation.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// The reference deployment's hosted endpoint.
const DEFAULT_HOST: &str = "wss://remote-terminal.hosted.example.com/api/devices/v1/deviceconnect/connect";

/// Default liveness-loop interval, in seconds.
const DEFAULT_HEALTHCHECK_INTERVAL_SECS: i32 = 30;

/// Configuration for the device connectivity engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Server URL the transport connects to.
    pub host: String,

    /// Liveness loop interval in seconds. `<= 0` disables the loop entirely.
    pub healthcheck_interval_secs: i32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            host: DEFAULT_HOST.to_string(),
            healthcheck_interval_secs: DEFAULT_HEALTHCHECK_INTERVAL_SECS,
        }
    }
}

impl DeviceConfig {
    /// Basic sanity checks; does not attempt to resolve or connect to `host`.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if !(self.host.starts_with("ws://") || self.host.starts_with("wss://")) {
            bail!("host must be a ws:// or wss:// URL, got: {}", self.host);
        }
        Ok(())
    }

    /// Whether the liveness loop should run at all.
    pub fn healthcheck_enabled(&self) -> bool {
        self.healthcheck_interval_secs > 0
    }
}
