//! Metric sample model and the fixed metric catalogue.
//!
//! Every series the exporter can emit is declared once here as a
//! [`MetricDesc`]: its subsystem, short name, kind and label keys. Names are
//! assembled as `<namespace>_<subsystem>_<name>`.

/// How the scrape consumer should interpret a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Instantaneous value that may rise or fall.
    Gauge,
    /// Monotonically non-decreasing cumulative total.
    Counter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Global,
    Output,
    Encoder,
    Source,
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Subsystem::Global => "global",
            Subsystem::Output => "output",
            Subsystem::Encoder => "encoder",
            Subsystem::Source => "source",
        };
        write!(f, "{s}")
    }
}

/// Static description of one metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDesc {
    pub subsystem: Subsystem,
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: &'static [&'static str],
}

impl MetricDesc {
    pub fn full_name(&self, namespace: &str) -> String {
        format!("{namespace}_{}_{}", self.subsystem, self.name)
    }

    /// Build a sample. `label_values` must line up with [`MetricDesc::labels`].
    pub fn sample(&self, namespace: &str, label_values: &[&str], value: f64) -> Sample {
        debug_assert_eq!(
            label_values.len(),
            self.labels.len(),
            "label arity mismatch for {}",
            self.name
        );
        Sample {
            name: self.full_name(namespace),
            help: self.help,
            kind: self.kind,
            labels: self
                .labels
                .iter()
                .zip(label_values)
                .map(|(k, v)| (*k, (*v).to_string()))
                .collect(),
            value,
        }
    }
}

/// One named, labelled numeric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub fn bool_value(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

// ---------------------------------------------------------------------------
// Catalogue
// ---------------------------------------------------------------------------

const OUTPUT_LABELS: &[&str] = &["output_id", "output_name"];
const ENCODER_LABELS: &[&str] = &["encoder_id", "encoder_name"];
const SOURCE_LABELS: &[&str] = &["source_id", "source_name", "channel"];

const fn gauge(
    subsystem: Subsystem,
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
) -> MetricDesc {
    MetricDesc { subsystem, name, help, kind: MetricKind::Gauge, labels }
}

const fn counter(
    subsystem: Subsystem,
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
) -> MetricDesc {
    MetricDesc { subsystem, name, help, kind: MetricKind::Counter, labels }
}

pub const GLOBAL_ACTIVE_FPS: MetricDesc =
    gauge(Subsystem::Global, "active_fps", "Active frames per second.", &[]);
pub const GLOBAL_AVERAGE_FRAME_TIME_NS: MetricDesc = gauge(
    Subsystem::Global,
    "average_frame_time_ns",
    "Average time to render a frame in nanoseconds.",
    &[],
);
pub const GLOBAL_FRAMES_TOTAL: MetricDesc =
    counter(Subsystem::Global, "frames_total", "Total frames rendered.", &[]);
pub const GLOBAL_LAGGED_FRAMES_TOTAL: MetricDesc = counter(
    Subsystem::Global,
    "lagged_frames_total",
    "Frames that missed their render deadline.",
    &[],
);

pub const SOURCE_AUDIO_MAGNITUDE_DB: MetricDesc = gauge(
    Subsystem::Source,
    "audio_magnitude_db",
    "Loudest recent audio magnitude of this source channel in dBFS.",
    SOURCE_LABELS,
);
pub const SOURCE_AUDIO_PEAK_DB: MetricDesc = gauge(
    Subsystem::Source,
    "audio_peak_db",
    "Loudest recent audio peak of this source channel in dBFS.",
    SOURCE_LABELS,
);
pub const SOURCE_AUDIO_INPUT_PEAK_DB: MetricDesc = gauge(
    Subsystem::Source,
    "audio_input_peak_db",
    "Loudest recent pre-fader input peak of this source channel in dBFS.",
    SOURCE_LABELS,
);

pub const OUTPUT_INFO: MetricDesc = gauge(
    Subsystem::Output,
    "info",
    "Information about this output.",
    &["output_id", "output_name", "output_display_name"],
);
pub const OUTPUT_ACTIVE: MetricDesc =
    gauge(Subsystem::Output, "active", "Whether the output is active.", OUTPUT_LABELS);
pub const OUTPUT_BYTES_TOTAL: MetricDesc = counter(
    Subsystem::Output,
    "bytes_total",
    "Total bytes sent by this output.",
    OUTPUT_LABELS,
);
pub const OUTPUT_FRAMES_TOTAL: MetricDesc = counter(
    Subsystem::Output,
    "frames_total",
    "Total frames sent by this output.",
    OUTPUT_LABELS,
);
pub const OUTPUT_DROPPED_FRAMES_TOTAL: MetricDesc = counter(
    Subsystem::Output,
    "dropped_frames_total",
    "Frames dropped by this output.",
    OUTPUT_LABELS,
);
pub const OUTPUT_VIDEO_WIDTH: MetricDesc =
    gauge(Subsystem::Output, "video_width", "Video width of this output.", OUTPUT_LABELS);
pub const OUTPUT_VIDEO_HEIGHT: MetricDesc =
    gauge(Subsystem::Output, "video_height", "Video height of this output.", OUTPUT_LABELS);
pub const OUTPUT_CONGESTION: MetricDesc = gauge(
    Subsystem::Output,
    "congestion",
    "Engine congestion estimate for this output.",
    OUTPUT_LABELS,
);
pub const OUTPUT_CONNECT_TIME_SECONDS: MetricDesc = gauge(
    Subsystem::Output,
    "connect_time_seconds",
    "Time this output took to connect, in seconds.",
    OUTPUT_LABELS,
);
pub const OUTPUT_RECONNECTING: MetricDesc = gauge(
    Subsystem::Output,
    "reconnecting",
    "Whether the output is reconnecting.",
    OUTPUT_LABELS,
);

pub const ENCODER_INFO: MetricDesc = gauge(
    Subsystem::Encoder,
    "info",
    "Information about this encoder.",
    &["encoder_id", "encoder_name", "encoder_display_name", "encoder_codec"],
);
pub const ENCODER_ACTIVE: MetricDesc =
    gauge(Subsystem::Encoder, "active", "Whether the encoder is active.", ENCODER_LABELS);
pub const ENCODER_VIDEO_WIDTH: MetricDesc = gauge(
    Subsystem::Encoder,
    "video_width",
    "Video width of this encoder, 0 for audio encoders.",
    ENCODER_LABELS,
);
pub const ENCODER_VIDEO_HEIGHT: MetricDesc = gauge(
    Subsystem::Encoder,
    "video_height",
    "Video height of this encoder, 0 for audio encoders.",
    ENCODER_LABELS,
);
pub const ENCODER_SAMPLE_RATE: MetricDesc = gauge(
    Subsystem::Encoder,
    "sample_rate",
    "Audio sample rate of this encoder, 0 for video encoders.",
    ENCODER_LABELS,
);

/// Every metric family, in emission order.
pub const CATALOGUE: &[MetricDesc] = &[
    GLOBAL_ACTIVE_FPS,
    GLOBAL_AVERAGE_FRAME_TIME_NS,
    GLOBAL_FRAMES_TOTAL,
    GLOBAL_LAGGED_FRAMES_TOTAL,
    SOURCE_AUDIO_MAGNITUDE_DB,
    SOURCE_AUDIO_PEAK_DB,
    SOURCE_AUDIO_INPUT_PEAK_DB,
    OUTPUT_INFO,
    OUTPUT_ACTIVE,
    OUTPUT_BYTES_TOTAL,
    OUTPUT_FRAMES_TOTAL,
    OUTPUT_DROPPED_FRAMES_TOTAL,
    OUTPUT_VIDEO_WIDTH,
    OUTPUT_VIDEO_HEIGHT,
    OUTPUT_CONGESTION,
    OUTPUT_CONNECT_TIME_SECONDS,
    OUTPUT_RECONNECTING,
    ENCODER_INFO,
    ENCODER_ACTIVE,
    ENCODER_VIDEO_WIDTH,
    ENCODER_VIDEO_HEIGHT,
    ENCODER_SAMPLE_RATE,
];
