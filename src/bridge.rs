//! # Metric Bridge
//!
//! ## Responsibility
//! Turns the engine's two access patterns into one scrape-consistent sample
//! list: synchronous enumeration (global stats, outputs, encoders, sources)
//! and asynchronous audio meter pushes.
//!
//! ## Guarantees
//! - At most one scrape runs at a time (`scrape_lock`)
//! - After a scrape the registry holds exactly the sources that scrape
//!   enumerated, minus any whose subscription the engine refused
//! - A source contributes audio summaries from its second observed scrape on
//! - Every series of a family carries the same label keys on every scrape
//! - Meter pushes never take the scrape lock and never create entities
//!
//! ## Lock order
//! `scrape_lock` → registry `RwLock` → entity `Mutex`. The push path only
//! ever takes the last two, and never holds both at once.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::engine::{EncoderKind, Engine, EntityKind, GlobalStats, SourceInfo};
use crate::error::EngineError;
use crate::metrics::{self, bool_value, Sample};
use crate::registry::{EntityRegistry, MeterSink, TrackedEntity};
use crate::sampler::{ChannelLevels, SampleWindow};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub destroyed: usize,
    pub failed: usize,
    pub duplicates: usize,
}

pub struct MetricBridge {
    engine: Arc<dyn Engine>,
    config: BridgeConfig,
    registry: Arc<EntityRegistry>,
    scrape_lock: Mutex<ReconcileReport>,
}

impl MetricBridge {
    /// Build the bridge. Must happen before the engine can deliver pushes or
    /// the server can accept scrapes.
    pub fn new(engine: Arc<dyn Engine>, mut config: BridgeConfig) -> Self {
        config.sampler_capacity = config.sampler_capacity.max(1);
        Self {
            engine,
            config,
            registry: Arc::new(EntityRegistry::new()),
            scrape_lock: Mutex::new(ReconcileReport::default()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Sorted ids of the sources currently under audio monitoring.
    pub fn tracked_ids(&self) -> Vec<String> {
        let mut ids = self.registry.ids();
        ids.sort();
        ids
    }

    pub fn tracked_count(&self) -> usize {
        self.registry.len()
    }

    /// Report of the most recent reconciliation pass.
    pub fn last_reconcile(&self) -> ReconcileReport {
        *self.scrape_lock.lock()
    }

    // -----------------------------------------------------------------------
    // Scrape path
    // -----------------------------------------------------------------------

    /// Produce the complete sample set for one scrape.
    ///
    /// Order: global scalars, per-source audio summaries, per-output fields,
    /// per-encoder fields.
    pub fn scrape(&self) -> Vec<Sample> {
        let mut last = self.scrape_lock.lock();
        let mut out = Vec::new();

        self.collect_global(self.engine.global_stats(), &mut out);
        let report = self.reconcile(&mut out);
        self.collect_outputs(&mut out);
        self.collect_encoders(&mut out);

        debug!(
            samples = out.len(),
            tracked = self.registry.len(),
            created = report.created,
            destroyed = report.destroyed,
            failed = report.failed,
            "scrape complete"
        );
        *last = report;
        out
    }

    fn collect_global(&self, stats: GlobalStats, out: &mut Vec<Sample>) {
        let ns = self.config.namespace.as_str();
        out.push(metrics::GLOBAL_ACTIVE_FPS.sample(ns, &[], stats.active_fps));
        out.push(metrics::GLOBAL_AVERAGE_FRAME_TIME_NS.sample(
            ns,
            &[],
            stats.average_frame_time_ns as f64,
        ));
        out.push(metrics::GLOBAL_FRAMES_TOTAL.sample(ns, &[], stats.total_frames as f64));
        out.push(metrics::GLOBAL_LAGGED_FRAMES_TOTAL.sample(ns, &[], stats.lagged_frames as f64));
    }

    /// Synchronise the registry with the engine's current sources, emitting
    /// audio summaries for sources that were already tracked.
    fn reconcile(&self, out: &mut Vec<Sample>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        for source in self.engine.sources() {
            if !seen.insert(source.id.clone()) {
                debug!(kind = %EntityKind::Source, id = %source.id, "duplicate entity in enumeration skipped");
                report.duplicates += 1;
                continue;
            }
            match self.registry.get(&source.id) {
                Some(entity) => self.collect_audio(&entity, out),
                None => match self.track(&source) {
                    Ok(true) => report.created += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(source_id = %source.id, error = %e, "could not track source, retrying next scrape");
                        report.failed += 1;
                    }
                },
            }
        }

        for id in self.registry.ids() {
            if !seen.contains(&id) && self.registry.remove(&id) {
                info!(source_id = %id, "source gone, meter released");
                report.destroyed += 1;
            }
        }
        report
    }

    /// Subscribe `source` and start tracking it. `Ok(false)` when the source
    /// has no audio channels to monitor.
    fn track(&self, source: &SourceInfo) -> Result<bool, EngineError> {
        let channels = self
            .config
            .fixed_audio_channels
            .unwrap_or(source.audio_channels);
        if channels == 0 {
            debug!(source_id = %source.id, "source has no audio channels, not tracked");
            return Ok(false);
        }

        let generation = self.registry.next_generation();
        let sink = MeterSink::new(&source.id, generation, Arc::downgrade(&self.registry));
        let handle = self.engine.attach_meter(source, sink)?;
        let window = SampleWindow::new(channels, self.config.sampler_capacity);
        self.registry.insert(TrackedEntity::new(
            source.id.as_str(),
            source.name.as_str(),
            generation,
            window,
            handle,
        ));
        info!(source_id = %source.id, channels, generation, "tracking source");
        Ok(true)
    }

    fn collect_audio(&self, entity: &TrackedEntity, out: &mut Vec<Sample>) {
        let ns = self.config.namespace.as_str();
        for (channel, [magnitude, peak, input_peak]) in entity.summaries().into_iter().enumerate() {
            let channel = channel.to_string();
            let labels = [entity.id(), entity.name(), channel.as_str()];
            out.push(metrics::SOURCE_AUDIO_MAGNITUDE_DB.sample(ns, &labels, magnitude));
            out.push(metrics::SOURCE_AUDIO_PEAK_DB.sample(ns, &labels, peak));
            out.push(metrics::SOURCE_AUDIO_INPUT_PEAK_DB.sample(ns, &labels, input_peak));
        }
    }

    fn collect_outputs(&self, out: &mut Vec<Sample>) {
        let ns = self.config.namespace.as_str();
        let mut seen = HashSet::new();
        for o in self.engine.outputs() {
            if !seen.insert(o.id.clone()) {
                debug!(kind = %EntityKind::Output, id = %o.id, "duplicate entity in enumeration skipped");
                continue;
            }
            let labels = [o.id.as_str(), o.name.as_str()];
            out.push(metrics::OUTPUT_INFO.sample(
                ns,
                &[o.id.as_str(), o.name.as_str(), o.display_name.as_str()],
                1.0,
            ));
            out.push(metrics::OUTPUT_ACTIVE.sample(ns, &labels, bool_value(o.active)));
            out.push(metrics::OUTPUT_BYTES_TOTAL.sample(ns, &labels, o.total_bytes as f64));
            out.push(metrics::OUTPUT_FRAMES_TOTAL.sample(ns, &labels, o.total_frames as f64));
            out.push(metrics::OUTPUT_DROPPED_FRAMES_TOTAL.sample(ns, &labels, o.dropped_frames as f64));
            out.push(metrics::OUTPUT_VIDEO_WIDTH.sample(ns, &labels, f64::from(o.width)));
            out.push(metrics::OUTPUT_VIDEO_HEIGHT.sample(ns, &labels, f64::from(o.height)));
            out.push(metrics::OUTPUT_CONGESTION.sample(ns, &labels, o.congestion));
            out.push(metrics::OUTPUT_CONNECT_TIME_SECONDS.sample(
                ns,
                &labels,
                o.connect_time_ms as f64 / 1000.0,
            ));
            out.push(metrics::OUTPUT_RECONNECTING.sample(ns, &labels, bool_value(o.reconnecting)));
        }
    }

    fn collect_encoders(&self, out: &mut Vec<Sample>) {
        let ns = self.config.namespace.as_str();
        let mut seen = HashSet::new();
        for e in self.engine.encoders() {
            if !seen.insert(e.id.clone()) {
                debug!(kind = %EntityKind::Encoder, id = %e.id, "duplicate entity in enumeration skipped");
                continue;
            }
            let labels = [e.id.as_str(), e.name.as_str()];
            out.push(metrics::ENCODER_INFO.sample(
                ns,
                &[
                    e.id.as_str(),
                    e.name.as_str(),
                    e.display_name.as_str(),
                    e.codec.as_str(),
                ],
                1.0,
            ));
            out.push(metrics::ENCODER_ACTIVE.sample(ns, &labels, bool_value(e.active)));

            // inapplicable dimensions are zeroed, never omitted
            let (width, height, sample_rate) = match e.kind {
                EncoderKind::Video { width, height } => (width, height, 0),
                EncoderKind::Audio { sample_rate } => (0, 0, sample_rate),
            };
            out.push(metrics::ENCODER_VIDEO_WIDTH.sample(ns, &labels, f64::from(width)));
            out.push(metrics::ENCODER_VIDEO_HEIGHT.sample(ns, &labels, f64::from(height)));
            out.push(metrics::ENCODER_SAMPLE_RATE.sample(ns, &labels, f64::from(sample_rate)));
        }
    }

    // -----------------------------------------------------------------------
    // Push path
    // -----------------------------------------------------------------------

    /// Record one meter callback for source `id`.
    ///
    /// Never blocks on the scrape lock and never fails: unknown ids and short
    /// channel slices are logged and dropped.
    pub fn on_audio_sample(&self, id: &str, levels: &[ChannelLevels]) {
        self.registry.ingest(id, None, levels);
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Release every meter subscription. Waits for an in-flight scrape.
    /// Returns the number of sources released.
    pub fn shutdown(&self) -> usize {
        let _scrape = self.scrape_lock.lock();
        let released = self.registry.drain();
        info!(released, "metric bridge shut down");
        released
    }
}

impl std::fmt::Debug for MetricBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricBridge")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}
