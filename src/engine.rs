//! Engine collaborator interface.
//!
//! The bridge never talks to the production engine directly; it goes through
//! the [`Engine`] trait. Enumeration is synchronous and returns plain data
//! read at call time. Audio metering is push based: the bridge subscribes a
//! source with [`Engine::attach_meter`], handing over a [`MeterSink`], and the
//! engine calls [`MeterSink::push`] from its own audio thread until the
//! returned [`MeterHandle`] is detached.

use crate::error::EngineError;
pub use crate::registry::MeterSink;

/// Engine-wide frame statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalStats {
    pub active_fps: f64,
    pub average_frame_time_ns: u64,
    pub total_frames: u64,
    pub lagged_frames: u64,
}

/// An audio-capable source as seen during one enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    /// Stable identifier, unique among sources.
    pub id: String,
    pub name: String,
    /// Channel count reported by the engine right now.
    pub audio_channels: usize,
}

/// An output sink (stream, recording, replay buffer, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputInfo {
    /// Must identify this output instance, not its type; series are keyed on it.
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub active: bool,
    pub total_bytes: u64,
    pub total_frames: u64,
    pub dropped_frames: u64,
    pub width: u32,
    pub height: u32,
    /// Unitless congestion estimate supplied by the engine.
    pub congestion: f64,
    pub connect_time_ms: u64,
    pub reconnecting: bool,
}

/// Media type of an encoder, carrying the dimensions that apply to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncoderKind {
    Audio { sample_rate: u32 },
    Video { width: u32, height: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderInfo {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub codec: String,
    pub active: bool,
    pub kind: EncoderKind,
}

/// Category of an enumerable engine entity. Tags de-duplication logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Source,
    Output,
    Encoder,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Source => write!(f, "source"),
            EntityKind::Output => write!(f, "output"),
            EntityKind::Encoder => write!(f, "encoder"),
        }
    }
}

/// Native meter subscription owned by a tracked source.
///
/// `detach` consumes the handle, so the compiler enforces that a handle is
/// released at most once.
pub trait MeterHandle: Send {
    fn detach(self: Box<Self>);
}

/// The production engine, as far as the bridge is concerned.
///
/// Enumerations may yield the same entity more than once; the bridge
/// de-duplicates by identifier.
pub trait Engine: Send + Sync {
    fn global_stats(&self) -> GlobalStats;

    fn sources(&self) -> Vec<SourceInfo>;

    fn outputs(&self) -> Vec<OutputInfo>;

    fn encoders(&self) -> Vec<EncoderInfo>;

    /// Start delivering meter readings for `source` to `sink`.
    fn attach_meter(
        &self,
        source: &SourceInfo,
        sink: MeterSink,
    ) -> Result<Box<dyn MeterHandle>, EngineError>;
}
