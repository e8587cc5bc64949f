//! Logging setup.
//!
//! Events go to stderr through `tracing-subscriber`'s fmt layer. When the
//! exporter runs inside a host engine, [`HostLogLayer`] additionally mirrors
//! every event into the engine's own log with the engine's level scale.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{ExporterError, Result};

pub const DEFAULT_PREFIX: &str = "studio-exporter";

/// Severity scale of the host engine's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HostLogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<&Level> for HostLogLevel {
    fn from(level: &Level) -> Self {
        match *level {
            Level::TRACE | Level::DEBUG => HostLogLevel::Debug,
            Level::INFO => HostLogLevel::Info,
            Level::WARN => HostLogLevel::Warning,
            Level::ERROR => HostLogLevel::Error,
        }
    }
}

impl std::fmt::Display for HostLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HostLogLevel::Debug => "debug",
            HostLogLevel::Info => "info",
            HostLogLevel::Warning => "warning",
            HostLogLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Destination for mirrored log lines.
pub trait HostLogSink: Send + Sync + 'static {
    fn log(&self, level: HostLogLevel, line: &str);
}

// ---------------------------------------------------------------------------
// HostLogLayer
// ---------------------------------------------------------------------------

/// Forwards every event to a [`HostLogSink`] as
/// `[<prefix>] <span.key=value ...> <message>`.
pub struct HostLogLayer {
    prefix: String,
    sink: Arc<dyn HostLogSink>,
}

impl HostLogLayer {
    pub fn new(prefix: impl Into<String>, sink: Arc<dyn HostLogSink>) -> Self {
        Self {
            prefix: prefix.into(),
            sink,
        }
    }
}

impl<S> Layer<S> for HostLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let spans: Vec<&'static str> = ctx
            .event_scope(event)
            .map(|scope| scope.from_root().map(|span| span.name()).collect())
            .unwrap_or_default();

        let line = format_line(&self.prefix, &spans, &fields.fields, &fields.message);
        self.sink.log(HostLogLevel::from(event.metadata().level()), &line);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Vec<(&'static str, String)>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push((field.name(), format!("{value:?}")));
        }
    }
}

/// Render one host log line. Field keys are qualified by the enclosing span
/// names joined with `.`.
pub fn format_line(
    prefix: &str,
    spans: &[&str],
    fields: &[(&str, String)],
    message: &str,
) -> String {
    let group = if spans.is_empty() {
        String::new()
    } else {
        format!("{}.", spans.join("."))
    };
    let mut line = format!("[{prefix}] ");
    for (key, value) in fields {
        let _ = write!(line, "{group}{key}={value} ");
    }
    line.push_str(message);
    line
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

/// Install the global subscriber. `RUST_LOG` overrides `level`.
pub fn init(level: &str, host: Option<Arc<dyn HostLogSink>>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| ExporterError::InvalidConfig(format!("log level '{level}': {e}")))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let host_layer = host.map(|sink| HostLogLayer::new(DEFAULT_PREFIX, sink));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(host_layer)
        .try_init()
        .map_err(|e| ExporterError::Logging(e.to_string()))
}
