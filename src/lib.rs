//! # studio-exporter
//!
//! Mirrors the live state of a multimedia production engine (frame
//! statistics, outputs, encoders, audio sources) into metrics that can be
//! scraped on demand.
//!
//! The heart of the crate is [`bridge::MetricBridge`]: it reconciles the
//! engine's synchronous enumeration with its asynchronous audio-meter pushes
//! into one thread-safe, scrape-consistent view.
//!
//! ```rust,ignore
//! let engine = Arc::new(SimulatedEngine::new());
//! let bridge = Arc::new(MetricBridge::new(engine.clone(), BridgeConfig::default()));
//! let text = exposition::encode(&bridge.scrape())?;
//! ```

pub mod bridge;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod exposition;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod sampler;
pub mod server;
pub mod sim;

pub use bridge::{MetricBridge, ReconcileReport};
pub use config::{BridgeConfig, Config};
pub use engine::{EncoderInfo, EncoderKind, Engine, GlobalStats, MeterHandle, MeterSink, OutputInfo, SourceInfo};
pub use error::{EngineError, ExporterError};
pub use metrics::{MetricKind, Sample};
pub use sampler::ChannelLevels;
