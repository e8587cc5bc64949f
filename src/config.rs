//! Exporter configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! command-line overrides (see [`Config::apply_args`]).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cli::Args;
use crate::error::{ExporterError, Result};
use crate::sampler::DEFAULT_CAPACITY;

pub const DEFAULT_PORT: u16 = 9407;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub bridge: BridgeConfig,
    pub log: LogConfig,
    pub sim: SimConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        }
    }
}

/// Settings consumed by [`MetricBridge`](crate::bridge::MetricBridge).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Prefix of every metric name.
    pub namespace: String,
    /// Ring slots per (source, channel, measurement kind).
    pub sampler_capacity: usize,
    /// Track this many channels per source instead of asking the engine.
    pub fixed_audio_channels: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            namespace: "obs".to_string(),
            sampler_capacity: DEFAULT_CAPACITY,
            fixed_audio_channels: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Mirror log events into the engine's own log.
    pub forward_to_engine: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            forward_to_engine: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub meter_interval_ms: u64,
}

impl SimConfig {
    pub fn meter_interval(&self) -> Duration {
        Duration::from_millis(self.meter_interval_ms)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self { meter_interval_ms: 50 }
    }
}

impl Config {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ExporterError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Self::parse(text, Path::new("<inline>"))
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let cfg: Config = toml::from_str(text).map_err(|source| ExporterError::ConfigParse {
            path: PathBuf::from(path),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults, then the file named by `--config` if any, then CLI flags.
    pub fn resolve(args: &Args) -> Result<Self> {
        let mut cfg = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        cfg.apply_args(args);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(listen) = args.listen {
            self.server.listen = listen;
        }
        if let Some(ns) = &args.namespace {
            self.bridge.namespace = ns.clone();
        }
        if let Some(level) = &args.log_level {
            self.log.level = level.clone();
        }
        if let Some(channels) = args.fixed_audio_channels {
            self.bridge.fixed_audio_channels = Some(channels);
        }
        if let Some(ms) = args.meter_interval_ms {
            self.sim.meter_interval_ms = ms;
        }
        if args.forward_logs {
            self.log.forward_to_engine = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bridge.sampler_capacity == 0 {
            return Err(ExporterError::InvalidConfig(
                "bridge.sampler_capacity must be > 0".into(),
            ));
        }
        if self.bridge.fixed_audio_channels == Some(0) {
            return Err(ExporterError::InvalidConfig(
                "bridge.fixed_audio_channels must be > 0 when set".into(),
            ));
        }
        if !is_metric_prefix(&self.bridge.namespace) {
            return Err(ExporterError::InvalidConfig(format!(
                "bridge.namespace '{}' is not a valid metric name prefix",
                self.bridge.namespace
            )));
        }
        if self.sim.meter_interval_ms == 0 {
            return Err(ExporterError::InvalidConfig(
                "sim.meter_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`
fn is_metric_prefix(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
