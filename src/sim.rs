//! Simulated production engine.
//!
//! Stands in for a real engine when the exporter runs standalone: a couple
//! of outputs and encoders whose counters advance on every scrape, a few
//! audio sources (one of which comes and goes), and a background meter
//! thread that pushes random levels through every attached [`MeterSink`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::engine::{
    EncoderInfo, EncoderKind, Engine, GlobalStats, MeterHandle, MeterSink, OutputInfo, SourceInfo,
};
use crate::error::EngineError;
use crate::logging::{HostLogLevel, HostLogSink};
use crate::sampler::ChannelLevels;

/// Width of the level array every meter push carries.
pub const MAX_AUDIO_CHANNELS: usize = 8;

/// Ticks a transient source stays present, then absent.
const TRANSIENT_PERIOD: u64 = 5;

type MeterTable = Arc<Mutex<HashMap<u64, MeterSink>>>;

struct SimState {
    tick: u64,
    rng: StdRng,
    global: GlobalStats,
    outputs: Vec<OutputInfo>,
    encoders: Vec<EncoderInfo>,
    /// Sources whose next attach attempt is refused.
    refuse_once: Vec<String>,
}

pub struct SimulatedEngine {
    state: Mutex<SimState>,
    meters: MeterTable,
    next_meter: Mutex<u64>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::with_seed(0x5eed)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Mutex::new(SimState {
                tick: 0,
                rng: StdRng::seed_from_u64(seed),
                global: GlobalStats {
                    active_fps: 60.0,
                    ..GlobalStats::default()
                },
                outputs: vec![
                    OutputInfo {
                        id: "rtmp1".into(),
                        name: "simple_stream".into(),
                        display_name: "RTMP Output".into(),
                        active: true,
                        width: 1920,
                        height: 1080,
                        connect_time_ms: 250,
                        ..OutputInfo::default()
                    },
                    OutputInfo {
                        id: "file1".into(),
                        name: "simple_file_output".into(),
                        display_name: "File Output".into(),
                        ..OutputInfo::default()
                    },
                ],
                encoders: vec![
                    EncoderInfo {
                        id: "aac1".into(),
                        name: "simple_aac".into(),
                        display_name: "FFmpeg AAC".into(),
                        codec: "aac".into(),
                        active: true,
                        kind: EncoderKind::Audio { sample_rate: 48_000 },
                    },
                    EncoderInfo {
                        id: "h264".into(),
                        name: "simple_h264_stream".into(),
                        display_name: "x264".into(),
                        codec: "h264".into(),
                        active: true,
                        kind: EncoderKind::Video { width: 1920, height: 1080 },
                    },
                ],
                refuse_once: vec!["mic_aux".into()],
            }),
            meters: Arc::new(Mutex::new(HashMap::new())),
            next_meter: Mutex::new(0),
        }
    }

    /// Number of meter subscriptions currently attached.
    pub fn attached_meters(&self) -> usize {
        self.meters.lock().len()
    }

    /// Start pushing random meter levels to every attached sink.
    pub fn start_meter_pump(&self, interval: Duration) -> MeterPump {
        let stop = Arc::new(AtomicBool::new(false));
        let meters = Arc::clone(&self.meters);
        let flag = Arc::clone(&stop);
        let thread = std::thread::spawn(move || {
            let mut rng = rand::thread_rng();
            while !flag.load(Ordering::Relaxed) {
                let sinks: Vec<MeterSink> = meters.lock().values().cloned().collect();
                for sink in sinks {
                    let levels: Vec<ChannelLevels> = (0..MAX_AUDIO_CHANNELS)
                        .map(|_| {
                            let magnitude = rng.gen_range(-60.0..-12.0);
                            let peak = magnitude + rng.gen_range(0.0..9.0);
                            ChannelLevels::new(magnitude, peak, peak + rng.gen_range(0.0..3.0))
                        })
                        .collect();
                    sink.push(&levels);
                }
                std::thread::sleep(interval);
            }
        });
        MeterPump { stop, thread: Some(thread) }
    }

    fn advance(&self) -> GlobalStats {
        let mut s = self.state.lock();
        s.tick += 1;
        let rendered = 60 * 5;
        let lagged = s.rng.gen_range(0..3);
        s.global.total_frames += rendered;
        s.global.lagged_frames += lagged;
        s.global.active_fps = 60.0 - s.rng.gen_range(0.0..0.5);
        s.global.average_frame_time_ns = s.rng.gen_range(2_000_000..6_000_000);

        let congestion = s.rng.gen_range(0.0..0.3);
        let dropped = s.rng.gen_range(0..2);
        if let Some(stream) = s.outputs.iter_mut().find(|o| o.active) {
            stream.total_frames += rendered;
            stream.total_bytes += 6_000_000 / 8 * 5;
            stream.dropped_frames += dropped;
            stream.congestion = congestion;
        }
        s.global
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for SimulatedEngine {
    fn global_stats(&self) -> GlobalStats {
        self.advance()
    }

    fn sources(&self) -> Vec<SourceInfo> {
        let tick = self.state.lock().tick;
        let mut sources = vec![
            SourceInfo { id: "desktop_audio".into(), name: "Desktop Audio".into(), audio_channels: 2 },
            SourceInfo { id: "mic_aux".into(), name: "Mic/Aux".into(), audio_channels: 1 },
            SourceInfo { id: "game_capture".into(), name: "Game Capture".into(), audio_channels: 0 },
            // the desktop audio is bound into two scenes and enumerates twice
            SourceInfo { id: "desktop_audio".into(), name: "Desktop Audio".into(), audio_channels: 2 },
        ];
        if (tick / TRANSIENT_PERIOD) % 2 == 0 {
            sources.push(SourceInfo { id: "alerts".into(), name: "Alerts".into(), audio_channels: 2 });
        }
        sources
    }

    fn outputs(&self) -> Vec<OutputInfo> {
        self.state.lock().outputs.clone()
    }

    fn encoders(&self) -> Vec<EncoderInfo> {
        self.state.lock().encoders.clone()
    }

    fn attach_meter(
        &self,
        source: &SourceInfo,
        sink: MeterSink,
    ) -> Result<Box<dyn MeterHandle>, EngineError> {
        {
            let mut s = self.state.lock();
            if let Some(pos) = s.refuse_once.iter().position(|id| *id == source.id) {
                s.refuse_once.remove(pos);
                return Err(EngineError::SubscriptionRefused {
                    source_id: source.id.clone(),
                    reason: "audio device busy".into(),
                });
            }
        }
        let key = {
            let mut next = self.next_meter.lock();
            *next += 1;
            *next
        };
        self.meters.lock().insert(key, sink);
        debug!(source_id = %source.id, key, "sim meter attached");
        Ok(Box::new(SimMeterHandle { key, meters: Arc::clone(&self.meters) }))
    }
}

impl HostLogSink for SimulatedEngine {
    fn log(&self, level: HostLogLevel, line: &str) {
        eprintln!("[engine] {level}: {line}");
    }
}

struct SimMeterHandle {
    key: u64,
    meters: MeterTable,
}

impl MeterHandle for SimMeterHandle {
    fn detach(self: Box<Self>) {
        self.meters.lock().remove(&self.key);
    }
}

/// Background meter thread. Stops and joins on drop.
pub struct MeterPump {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MeterPump {
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MeterPump {
    fn drop(&mut self) {
        self.halt();
    }
}
