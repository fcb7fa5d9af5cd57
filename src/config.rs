/// Link configuration
///
/// Window size, retransmission timeout and per-tick resend cap are fixed
/// constants in the reference behavior; here they are loadable options with
/// those constants as defaults. Keys are camelCase in TOML:
///
/// ```toml
/// windowSize = 60
/// retransmitTimeoutMs = 10000
/// maxResendsPerTick = 3
/// sendSize = 10240
/// sendKbps = 800
///
/// [logging]
/// filter = "rtmlink_core=debug"
/// ```
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{LinkError, Result};
use crate::{
    DEFAULT_SEND_SIZE, DEFAULT_WINDOW_SIZE, MAX_PAYLOAD_SIZE, MAX_RESENDS_PER_TICK,
    RETRANSMIT_TIMEOUT_MS,
};

/// Default bitrate: ten messages of the default size per second
pub const DEFAULT_SEND_KBPS: u32 = default_kbps_for(DEFAULT_SEND_SIZE);

const fn default_kbps_for(send_size: usize) -> u32 {
    (send_size * 8 * 10 / 1024) as u32
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkConfig {
    /// Max in-flight messages
    pub window_size: usize,

    /// Time before an unacknowledged message is resent
    pub retransmit_timeout_ms: u64,

    /// Backpressure cap on resends per sweep
    pub max_resends_per_tick: usize,

    /// Payload bytes per data message
    pub send_size: usize,

    /// Target producer bitrate
    pub send_kbps: u32,

    pub logging: LoggingConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            retransmit_timeout_ms: RETRANSMIT_TIMEOUT_MS,
            max_resends_per_tick: MAX_RESENDS_PER_TICK,
            send_size: DEFAULT_SEND_SIZE,
            send_kbps: DEFAULT_SEND_KBPS,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set
    pub filter: Option<String>,

    /// Colored output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            ansi: true,
        }
    }
}

impl LinkConfig {
    /// Parse a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| LinkError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            LinkError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject values the protocol cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(LinkError::InvalidConfig("windowSize must be at least 1".into()));
        }
        if self.retransmit_timeout_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "retransmitTimeoutMs must be positive".into(),
            ));
        }
        if self.max_resends_per_tick == 0 {
            return Err(LinkError::InvalidConfig(
                "maxResendsPerTick must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Clamp the pacing options into their accepted ranges
    ///
    /// `sendSize` must lie in `1..=31 KiB`; `sendKbps` must allow between one
    /// and sixty messages per second. Out-of-range values fall back to the
    /// defaults for the effective send size.
    pub fn normalized(mut self) -> Self {
        if self.send_size == 0 || self.send_size > MAX_PAYLOAD_SIZE {
            warn!(
                send_size = self.send_size,
                default = DEFAULT_SEND_SIZE,
                "sendSize must be between 1 and {} bytes, using default",
                MAX_PAYLOAD_SIZE
            );
            self.send_size = DEFAULT_SEND_SIZE;
        }

        let min_kbps = (self.send_size * 8 / 1024) as u32;
        let max_kbps = (self.send_size * 8 * 60 / 1024) as u32;
        let def_kbps = default_kbps_for(self.send_size);
        if self.send_kbps < min_kbps || self.send_kbps > max_kbps {
            warn!(
                send_kbps = self.send_kbps,
                min_kbps, max_kbps, def_kbps, "sendKbps out of range, using default"
            );
            self.send_kbps = def_kbps;
        }
        self
    }

    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }

    /// Producer pacing interval derived from `sendKbps` and `sendSize`
    pub fn send_interval(&self) -> Duration {
        let bits_per_msg = (self.send_size.max(1) * 8) as u64;
        let msgs_per_sec = (u64::from(self.send_kbps) * 1000 / bits_per_msg).max(1);
        Duration::from_micros(1_000_000 / msgs_per_sec)
    }
}

/// LinkConfigBuilder - Fluent interface for link configuration
pub struct LinkConfigBuilder {
    config: LinkConfig,
}

impl LinkConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LinkConfig::default(),
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.config.window_size = window_size;
        self
    }

    pub fn with_retransmit_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.retransmit_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_resends_per_tick(mut self, cap: usize) -> Self {
        self.config.max_resends_per_tick = cap;
        self
    }

    pub fn with_send_size(mut self, send_size: usize) -> Self {
        self.config.send_size = send_size;
        self
    }

    pub fn with_send_kbps(mut self, send_kbps: u32) -> Self {
        self.config.send_kbps = send_kbps;
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.logging.filter = Some(filter.into());
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<LinkConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for LinkConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
