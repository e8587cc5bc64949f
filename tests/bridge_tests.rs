//! External tests for the metric bridge: reconciliation, push ingest,
//! emission order and per-field metric kinds, driven by a scripted engine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use rstest::rstest;

use studio_exporter::engine::{EncoderInfo, EncoderKind, Engine, GlobalStats, MeterHandle, MeterSink, OutputInfo, SourceInfo};
use studio_exporter::registry::IngestOutcome;
use studio_exporter::{BridgeConfig, ChannelLevels, EngineError, MetricBridge, MetricKind, Sample};

// ---------------------------------------------------------------------------
// Scripted engine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    global: GlobalStats,
    sources: Vec<SourceInfo>,
    outputs: Vec<OutputInfo>,
    encoders: Vec<EncoderInfo>,
    refuse: HashSet<String>,
}

#[derive(Default)]
struct ScriptedEngine {
    script: Mutex<Script>,
    sinks: Arc<Mutex<HashMap<String, MeterSink>>>,
    attaches: AtomicUsize,
    detaches: Arc<AtomicUsize>,
}

struct ScriptedHandle {
    id: String,
    sinks: Arc<Mutex<HashMap<String, MeterSink>>>,
    detaches: Arc<AtomicUsize>,
}

impl MeterHandle for ScriptedHandle {
    fn detach(self: Box<Self>) {
        self.sinks.lock().remove(&self.id);
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

impl ScriptedEngine {
    fn set_sources(&self, sources: Vec<SourceInfo>) {
        self.script.lock().sources = sources;
    }

    fn refuse(&self, id: &str, refuse: bool) {
        let mut s = self.script.lock();
        if refuse {
            s.refuse.insert(id.to_string());
        } else {
            s.refuse.remove(id);
        }
    }

    /// Push through the sink the bridge handed us, like a real audio thread.
    fn push(&self, id: &str, levels: &[ChannelLevels]) -> Option<IngestOutcome> {
        let sink = self.sinks.lock().get(id).cloned();
        sink.map(|s| s.push(levels))
    }

    fn sink(&self, id: &str) -> Option<MeterSink> {
        self.sinks.lock().get(id).cloned()
    }

    fn attached(&self) -> usize {
        self.sinks.lock().len()
    }
}

impl Engine for ScriptedEngine {
    fn global_stats(&self) -> GlobalStats {
        self.script.lock().global
    }

    fn sources(&self) -> Vec<SourceInfo> {
        self.script.lock().sources.clone()
    }

    fn outputs(&self) -> Vec<OutputInfo> {
        self.script.lock().outputs.clone()
    }

    fn encoders(&self) -> Vec<EncoderInfo> {
        self.script.lock().encoders.clone()
    }

    fn attach_meter(&self, source: &SourceInfo, sink: MeterSink) -> Result<Box<dyn MeterHandle>, EngineError> {
        if self.script.lock().refuse.contains(&source.id) {
            return Err(EngineError::SubscriptionRefused {
                source_id: source.id.clone(),
                reason: "scripted refusal".into(),
            });
        }
        self.attaches.fetch_add(1, Ordering::SeqCst);
        self.sinks.lock().insert(source.id.clone(), sink);
        Ok(Box::new(ScriptedHandle {
            id: source.id.clone(),
            sinks: Arc::clone(&self.sinks),
            detaches: Arc::clone(&self.detaches),
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn source(id: &str, channels: usize) -> SourceInfo {
    SourceInfo {
        id: id.to_string(),
        name: format!("{id} name"),
        audio_channels: channels,
    }
}

fn setup() -> (Arc<ScriptedEngine>, MetricBridge) {
    let engine = Arc::new(ScriptedEngine::default());
    let bridge = MetricBridge::new(engine.clone(), BridgeConfig::default());
    (engine, bridge)
}

fn mono(m: f64) -> Vec<ChannelLevels> {
    vec![ChannelLevels::new(m, m + 1.0, m + 2.0)]
}

fn find<'a>(samples: &'a [Sample], name: &str, key: &str, value: &str) -> Option<&'a Sample> {
    samples
        .iter()
        .find(|s| s.name == name && s.label(key) == Some(value))
}

fn audio_samples(samples: &[Sample]) -> Vec<&Sample> {
    samples.iter().filter(|s| s.name.starts_with("obs_source_")).collect()
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[test]
fn test_new_source_tracked_without_audio_on_first_scrape() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("mic", 1)]);
    let samples = bridge.scrape();
    assert_eq!(bridge.tracked_ids(), vec!["mic"]);
    assert!(audio_samples(&samples).is_empty());
    assert_eq!(bridge.last_reconcile().created, 1);
}

#[test]
fn test_tracked_source_emits_audio_on_second_scrape() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("desk", 2)]);
    bridge.scrape();
    let samples = bridge.scrape();
    // 2 channels x 3 kinds
    assert_eq!(audio_samples(&samples).len(), 6);
    let s = find(&samples, "obs_source_audio_peak_db", "channel", "1").unwrap();
    assert_eq!(s.label("source_id"), Some("desk"));
    assert_eq!(s.label("source_name"), Some("desk name"));
    assert_eq!(s.value, f64::NEG_INFINITY);
}

#[rstest]
#[case("obs_source_audio_magnitude_db", -10.0, -40.0)]
#[case("obs_source_audio_peak_db", -9.0, -39.0)]
#[case("obs_source_audio_input_peak_db", -8.0, -38.0)]
fn test_stereo_channels_reported_separately(#[case] name: &str, #[case] left: f64, #[case] right: f64) {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("desk", 2)]);
    bridge.scrape();
    let levels = [
        ChannelLevels::new(-10.0, -9.0, -8.0),
        ChannelLevels::new(-40.0, -39.0, -38.0),
    ];
    assert_eq!(engine.push("desk", &levels), Some(IngestOutcome::Recorded));
    let samples = bridge.scrape();
    assert_eq!(find(&samples, name, "channel", "0").unwrap().value, left);
    assert_eq!(find(&samples, name, "channel", "1").unwrap().value, right);
}

#[test]
fn test_three_scrape_magnitude_example() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("mic", 1)]);
    bridge.scrape();
    bridge.scrape();
    for m in [-30.0, -25.0, -40.0] {
        assert_eq!(engine.push("mic", &mono(m)), Some(IngestOutcome::Recorded));
    }
    let samples = bridge.scrape();
    let mag = find(&samples, "obs_source_audio_magnitude_db", "source_id", "mic").unwrap();
    assert_eq!(mag.value, -25.0);
    let peak = find(&samples, "obs_source_audio_peak_db", "source_id", "mic").unwrap();
    assert_eq!(peak.value, -24.0);
}

#[test]
fn test_removed_source_destroyed_and_detached() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("a", 1), source("b", 1)]);
    bridge.scrape();
    assert_eq!(engine.attached(), 2);

    engine.set_sources(vec![source("b", 1)]);
    bridge.scrape();
    assert_eq!(bridge.tracked_ids(), vec!["b"]);
    assert_eq!(engine.detaches.load(Ordering::SeqCst), 1);
    assert_eq!(engine.attached(), 1);
    assert_eq!(bridge.last_reconcile().destroyed, 1);
}

#[test]
fn test_reappearing_source_recreated_and_waits_a_scrape() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("a", 1)]);
    bridge.scrape();
    engine.set_sources(vec![]);
    bridge.scrape();
    engine.set_sources(vec![source("a", 1)]);
    let samples = bridge.scrape();
    assert!(audio_samples(&samples).is_empty());
    assert_eq!(engine.attaches.load(Ordering::SeqCst), 2);
    assert_eq!(engine.detaches.load(Ordering::SeqCst), 1);
}

#[test]
fn test_duplicate_enumeration_yields_one_series() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("desk", 1), source("desk", 1)]);
    bridge.scrape();
    let samples = bridge.scrape();
    assert_eq!(audio_samples(&samples).len(), 3);
    assert_eq!(engine.attaches.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.last_reconcile().duplicates, 1);
}

#[test]
fn test_refused_subscription_skipped_then_retried() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("flaky", 1), source("ok", 1)]);
    engine.refuse("flaky", true);

    let samples = bridge.scrape();
    assert_eq!(bridge.tracked_ids(), vec!["ok"]);
    assert_eq!(bridge.last_reconcile().failed, 1);
    // the rest of the scrape is unaffected
    assert!(samples.iter().any(|s| s.name == "obs_global_active_fps"));

    engine.refuse("flaky", false);
    bridge.scrape();
    assert_eq!(bridge.tracked_ids(), vec!["flaky", "ok"]);
}

#[test]
fn test_zero_channel_source_not_tracked() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("video_only", 0)]);
    bridge.scrape();
    assert_eq!(bridge.tracked_count(), 0);
    assert_eq!(engine.attached(), 0);
}

#[test]
fn test_fixed_channel_policy_overrides_engine() {
    let engine = Arc::new(ScriptedEngine::default());
    let config = BridgeConfig {
        fixed_audio_channels: Some(2),
        ..BridgeConfig::default()
    };
    let bridge = MetricBridge::new(engine.clone(), config);
    engine.set_sources(vec![source("mono", 1)]);
    bridge.scrape();
    let samples = bridge.scrape();
    assert_eq!(audio_samples(&samples).len(), 6);
}

#[test]
fn test_shutdown_releases_everything() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("a", 1), source("b", 2)]);
    bridge.scrape();
    assert_eq!(bridge.shutdown(), 2);
    assert_eq!(engine.attached(), 0);
    assert_eq!(bridge.tracked_count(), 0);
    drop(bridge);
    assert_eq!(engine.detaches.load(Ordering::SeqCst), 2);
}

#[test]
fn test_drop_bridge_releases_once() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("a", 1)]);
    bridge.scrape();
    drop(bridge);
    assert_eq!(engine.detaches.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Push ingest
// ---------------------------------------------------------------------------

#[test]
fn test_push_for_unknown_id_is_noop() {
    let (engine, bridge) = setup();
    bridge.on_audio_sample("ghost", &mono(-3.0));
    assert_eq!(bridge.tracked_count(), 0);
    engine.set_sources(vec![source("ghost", 1)]);
    bridge.scrape();
    let samples = bridge.scrape();
    let mag = find(&samples, "obs_source_audio_magnitude_db", "source_id", "ghost").unwrap();
    assert_eq!(mag.value, f64::NEG_INFINITY);
}

#[test]
fn test_malformed_push_is_dropped() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("desk", 2)]);
    bridge.scrape();
    bridge.on_audio_sample("desk", &mono(-1.0));
    bridge.on_audio_sample("desk", &[]);
    let samples = bridge.scrape();
    assert!(audio_samples(&samples).iter().all(|s| s.value == f64::NEG_INFINITY));
}

#[test]
fn test_direct_push_entry_point_records() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("mic", 1)]);
    bridge.scrape();
    bridge.on_audio_sample("mic", &mono(-12.0));
    let samples = bridge.scrape();
    let mag = find(&samples, "obs_source_audio_magnitude_db", "source_id", "mic").unwrap();
    assert_eq!(mag.value, -12.0);
}

#[test]
fn test_stale_sink_cannot_feed_recreated_entity() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("mic", 1)]);
    bridge.scrape();
    let old_sink = engine.sink("mic").unwrap();

    engine.set_sources(vec![]);
    bridge.scrape();
    engine.set_sources(vec![source("mic", 1)]);
    bridge.scrape();

    assert_eq!(old_sink.push(&mono(-1.0)), IngestOutcome::StaleSubscription);
    let samples = bridge.scrape();
    let mag = find(&samples, "obs_source_audio_magnitude_db", "source_id", "mic").unwrap();
    assert_eq!(mag.value, f64::NEG_INFINITY);
}

#[test]
fn test_concurrent_pushes_during_scrapes() {
    let (engine, bridge) = setup();
    let bridge = Arc::new(bridge);
    engine.set_sources(vec![source("a", 1), source("b", 1)]);
    bridge.scrape();

    let pushers: Vec<_> = ["a", "b", "nobody"]
        .into_iter()
        .map(|id| {
            let bridge = Arc::clone(&bridge);
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    bridge.on_audio_sample(id, &mono(-(i % 60) as f64));
                }
            })
        })
        .collect();

    for round in 0..50 {
        if round % 2 == 0 {
            engine.set_sources(vec![source("a", 1), source("b", 1)]);
        } else {
            engine.set_sources(vec![source("a", 1)]);
        }
        bridge.scrape();
        assert_eq!(engine.attached(), bridge.tracked_count());
    }
    for p in pushers {
        p.join().unwrap();
    }

    let samples = bridge.scrape();
    let mag = find(&samples, "obs_source_audio_magnitude_db", "source_id", "a").unwrap();
    assert_eq!(mag.value, 0.0);
}

// ---------------------------------------------------------------------------
// Snapshot collection
// ---------------------------------------------------------------------------

fn rtmp1() -> OutputInfo {
    OutputInfo {
        id: "rtmp1".into(),
        name: "stream".into(),
        display_name: "RTMP Output".into(),
        active: true,
        total_bytes: 500,
        total_frames: 900,
        dropped_frames: 2,
        width: 1920,
        height: 1080,
        congestion: 0.1,
        connect_time_ms: 250,
        reconnecting: false,
    }
}

#[rstest]
#[case("obs_output_active", 1.0, MetricKind::Gauge)]
#[case("obs_output_bytes_total", 500.0, MetricKind::Counter)]
#[case("obs_output_frames_total", 900.0, MetricKind::Counter)]
#[case("obs_output_dropped_frames_total", 2.0, MetricKind::Counter)]
#[case("obs_output_video_width", 1920.0, MetricKind::Gauge)]
#[case("obs_output_video_height", 1080.0, MetricKind::Gauge)]
#[case("obs_output_congestion", 0.1, MetricKind::Gauge)]
#[case("obs_output_connect_time_seconds", 0.25, MetricKind::Gauge)]
#[case("obs_output_reconnecting", 0.0, MetricKind::Gauge)]
#[case("obs_output_info", 1.0, MetricKind::Gauge)]
fn test_output_fields(#[case] name: &str, #[case] value: f64, #[case] kind: MetricKind) {
    let (engine, bridge) = setup();
    engine.script.lock().outputs = vec![rtmp1()];
    let samples = bridge.scrape();
    let s = find(&samples, name, "output_id", "rtmp1").unwrap();
    assert_eq!(s.value, value);
    assert_eq!(s.kind, kind);
    assert_eq!(s.label("output_name"), Some("stream"));
}

#[test]
fn test_output_info_carries_display_name() {
    let (engine, bridge) = setup();
    engine.script.lock().outputs = vec![rtmp1()];
    let samples = bridge.scrape();
    let info = find(&samples, "obs_output_info", "output_id", "rtmp1").unwrap();
    assert_eq!(info.label("output_display_name"), Some("RTMP Output"));
}

fn encoder(id: &str, kind: EncoderKind) -> EncoderInfo {
    EncoderInfo {
        id: id.into(),
        name: format!("{id} name"),
        display_name: id.to_uppercase(),
        codec: id.into(),
        active: true,
        kind,
    }
}

#[rstest]
#[case(encoder("aac1", EncoderKind::Audio { sample_rate: 48_000 }), 0.0, 0.0, 48_000.0)]
#[case(encoder("h264", EncoderKind::Video { width: 1280, height: 720 }), 1280.0, 720.0, 0.0)]
fn test_encoder_dimensions(
    #[case] enc: EncoderInfo,
    #[case] width: f64,
    #[case] height: f64,
    #[case] sample_rate: f64,
) {
    let (engine, bridge) = setup();
    let id = enc.id.clone();
    engine.script.lock().encoders = vec![enc];
    let samples = bridge.scrape();
    let get = |name: &str| find(&samples, name, "encoder_id", &id).unwrap().value;
    assert_eq!(get("obs_encoder_video_width"), width);
    assert_eq!(get("obs_encoder_video_height"), height);
    assert_eq!(get("obs_encoder_sample_rate"), sample_rate);
    assert_eq!(get("obs_encoder_active"), 1.0);
    let info = find(&samples, "obs_encoder_info", "encoder_id", &id).unwrap();
    assert_eq!(info.label("encoder_codec"), Some(id.as_str()));
}

#[test]
fn test_global_scalars_and_kinds() {
    let (engine, bridge) = setup();
    engine.script.lock().global = GlobalStats {
        active_fps: 59.94,
        average_frame_time_ns: 4_000_000,
        total_frames: 1_000,
        lagged_frames: 3,
    };
    let samples = bridge.scrape();
    assert_eq!(samples.len(), 4);
    let by_name: HashMap<&str, &Sample> = samples.iter().map(|s| (s.name.as_str(), s)).collect();
    assert_eq!(by_name["obs_global_active_fps"].value, 59.94);
    assert_eq!(by_name["obs_global_average_frame_time_ns"].kind, MetricKind::Gauge);
    assert_eq!(by_name["obs_global_frames_total"].kind, MetricKind::Counter);
    assert_eq!(by_name["obs_global_lagged_frames_total"].value, 3.0);
}

#[test]
fn test_emission_order() {
    let (engine, bridge) = setup();
    {
        let mut s = engine.script.lock();
        s.sources = vec![source("mic", 1)];
        s.outputs = vec![rtmp1()];
        s.encoders = vec![encoder("aac1", EncoderKind::Audio { sample_rate: 48_000 })];
    }
    bridge.scrape();
    let samples = bridge.scrape();
    let rank = |s: &Sample| {
        if s.name.starts_with("obs_global_") {
            0
        } else if s.name.starts_with("obs_source_") {
            1
        } else if s.name.starts_with("obs_output_") {
            2
        } else {
            3
        }
    };
    let ranks: Vec<u8> = samples.iter().map(rank).collect();
    let mut sorted = ranks.clone();
    sorted.sort();
    assert_eq!(ranks, sorted);
    assert!(ranks.contains(&1) && ranks.contains(&3));
}

#[test]
fn test_label_keys_stable_across_scrapes() {
    let (engine, bridge) = setup();
    engine.set_sources(vec![source("mic", 1)]);
    engine.script.lock().outputs = vec![rtmp1()];
    let mut keys: HashMap<String, Vec<&'static str>> = HashMap::new();
    for _ in 0..3 {
        for s in bridge.scrape() {
            let k: Vec<&'static str> = s.labels.iter().map(|(k, _)| *k).collect();
            let prev = keys.entry(s.name.clone()).or_insert_with(|| k.clone());
            assert_eq!(*prev, k, "label keys changed for {}", s.name);
        }
    }
}

#[test]
fn test_custom_namespace() {
    let engine = Arc::new(ScriptedEngine::default());
    let config = BridgeConfig {
        namespace: "studio".into(),
        ..BridgeConfig::default()
    };
    let bridge = MetricBridge::new(engine, config);
    assert!(bridge.scrape().iter().all(|s| s.name.starts_with("studio_global_")));
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_registry_matches_latest_enumeration(
        passes in proptest::collection::vec(proptest::collection::vec(0usize..6, 0..10), 1..12)
    ) {
        let (engine, bridge) = setup();
        for ids in &passes {
            let sources: Vec<SourceInfo> = ids.iter().map(|i| source(&format!("s{i}"), 1)).collect();
            engine.set_sources(sources);
            bridge.scrape();
            let mut expected: Vec<String> = ids
                .iter()
                .map(|i| format!("s{i}"))
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            expected.sort();
            prop_assert_eq!(bridge.tracked_ids(), expected);
            prop_assert_eq!(engine.attached(), bridge.tracked_count());
        }
        let attaches = engine.attaches.load(Ordering::SeqCst);
        let detaches = engine.detaches.load(Ordering::SeqCst);
        prop_assert_eq!(attaches - detaches, bridge.tracked_count());
    }
}
