//! Typed configuration for clients, the connection registry and engines.
//!
//! Every field has a documented default; `ClientConfig::validate` runs once
//! when a client is constructed.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::mc_define::{FrameFormat, Transport, DEFAULT_ENGINE_LOG_LEVEL};
use crate::plc_series::PlcSeries;
use crate::toml_helpers::describe_toml_error;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_READ_PACING_MS: u64 = 50;
pub const DEFAULT_WRITE_PACING_MS: u64 = 100;

/// Caller overrides for engine parameters. Unset fields fall back to the
/// registry defaults (TCP, binary, 3E, Q, auto-connect, no auto-reconnect, WARN).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOverrides {
    pub protocol: Option<Transport>,
    pub ascii: Option<bool>,
    pub frame: Option<FrameFormat>,
    pub plc_type: Option<PlcSeries>,
    pub auto_connect: Option<bool>,
    pub prevent_auto_reconnect: Option<bool>,
    pub log_level: Option<String>,
}

/// Fully resolved parameters handed to `ProtocolEngine::open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineOptions {
    pub host: String,
    pub port: u16,
    pub protocol: Transport,
    pub ascii: bool,
    pub frame: FrameFormat,
    pub plc_type: PlcSeries,
    pub auto_connect: bool,
    pub prevent_auto_reconnect: bool,
    pub log_level: String,
}

impl EngineOptions {
    /// Protocol defaults for `host:port` with `overrides` applied on top.
    #[must_use]
    pub fn merged(host: &str, port: u16, overrides: &EngineOverrides) -> Self {
        Self {
            host: host.to_string(),
            port,
            protocol: overrides.protocol.unwrap_or_default(),
            ascii: overrides.ascii.unwrap_or(false),
            frame: overrides.frame.unwrap_or_default(),
            plc_type: overrides.plc_type.unwrap_or_default(),
            auto_connect: overrides.auto_connect.unwrap_or(true),
            prevent_auto_reconnect: overrides.prevent_auto_reconnect.unwrap_or(true),
            log_level: overrides
                .log_level
                .clone()
                .unwrap_or_else(|| DEFAULT_ENGINE_LOG_LEVEL.to_string()),
        }
    }
}

/// Options for a single `ConnectionRegistry::acquire`.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Bound on the engine reaching `Open`; `None` uses the registry default.
    pub connect_timeout: Option<Duration>,
    pub engine: EngineOverrides,
}

/// Registry-wide timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// How long a caller waits on another caller's in-flight attempt. Default 30 s.
    pub wait_timeout: Duration,
    /// How long `release` waits for the engine's close notification. Default 5 s.
    pub close_timeout: Duration,
    /// Connect bound when the caller gives none. Default 30 s.
    pub connect_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Per-call overrides for client operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
}

impl CallOptions {
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Client configuration.
///
/// ```toml
/// host = "192.168.8.106"
/// port = 1281
/// timeout_ms = 30000
///
/// [engine]
/// protocol = "TCP"
/// frame = "3E"
/// plc_type = "Q"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Per elementary call, and the connect bound. Default 30 000 ms.
    pub timeout_ms: u64,
    /// Advisory; no automatic retry loop runs. Default 2 000 ms.
    pub retry_interval_ms: u64,
    /// Advisory; callers re-invoke on failure. Default 3.
    pub max_retries: u32,
    /// Pause after every elementary read. Default 50 ms.
    pub read_pacing_ms: u64,
    /// Pause after every elementary write. Default 100 ms.
    pub write_pacing_ms: u64,
    pub engine: EngineOverrides,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let ep = Endpoint::default();
        Self {
            host: ep.host,
            port: ep.port,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            read_pacing_ms: DEFAULT_READ_PACING_MS,
            write_pacing_ms: DEFAULT_WRITE_PACING_MS,
            engine: EngineOverrides::default(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = millis(timeout);
        self
    }
    #[must_use]
    pub fn with_pacing(mut self, read: Duration, write: Duration) -> Self {
        self.read_pacing_ms = millis(read);
        self.write_pacing_ms = millis(write);
        self
    }
    #[must_use]
    pub fn with_engine(mut self, engine: EngineOverrides) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
    #[must_use]
    pub const fn read_pacing(&self) -> Duration {
        Duration::from_millis(self.read_pacing_ms)
    }
    #[must_use]
    pub const fn write_pacing(&self) -> Duration {
        Duration::from_millis(self.write_pacing_ms)
    }

    /// Options used when this client acquires its connection.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Some(self.timeout()),
            engine: self.engine.clone(),
        }
    }

    /// Check semantic constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.host.trim().is_empty() {
            return Err(ClientError::Config("host is empty".into()));
        }
        if self.port == 0 {
            return Err(ClientError::Config("port must be non-zero".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ClientError::Config("timeout_ms must be non-zero".into()));
        }
        if let Some(level) = self.engine.log_level.as_deref() {
            if level.trim().is_empty() {
                return Err(ClientError::Config("engine.log_level is empty".into()));
            }
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ClientError> {
        let cfg: Self = toml::from_str(s)
            .map_err(|e| ClientError::Config(describe_toml_error("client config", &e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ClientError> {
        let s = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("read client config {}: {e}", path.display()))
        })?;
        Self::from_str(&s)
    }
}

// Saturates instead of truncating the u128 millisecond count.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl std::str::FromStr for ClientConfig {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s)
    }
}
