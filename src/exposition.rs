//! Text exposition of a scrape.
//!
//! Samples are grouped into metric families in first-seen order and rendered
//! with the `prometheus` crate's [`TextEncoder`].

use std::collections::HashMap;

use prometheus::proto::{Counter, Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};

use crate::error::Result;
use crate::metrics::{MetricKind, Sample};

/// Content type of [`encode`]'s output.
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Group samples by name into protobuf metric families.
pub fn families(samples: &[Sample]) -> Vec<MetricFamily> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<MetricFamily> = Vec::new();

    for sample in samples {
        let slot = *index.entry(sample.name.as_str()).or_insert_with(|| {
            let mut family = MetricFamily::default();
            family.set_name(sample.name.clone());
            family.set_help(sample.help.to_string());
            family.set_field_type(match sample.kind {
                MetricKind::Gauge => MetricType::GAUGE,
                MetricKind::Counter => MetricType::COUNTER,
            });
            out.push(family);
            out.len() - 1
        });
        out[slot].mut_metric().push(to_metric(sample));
    }
    out
}

fn to_metric(sample: &Sample) -> Metric {
    let mut metric = Metric::default();
    for (key, value) in &sample.labels {
        let mut pair = LabelPair::default();
        pair.set_name((*key).to_string());
        pair.set_value(value.clone());
        metric.mut_label().push(pair);
    }
    match sample.kind {
        MetricKind::Gauge => {
            let mut gauge = Gauge::default();
            gauge.set_value(sample.value);
            metric.set_gauge(gauge);
        }
        MetricKind::Counter => {
            let mut counter = Counter::default();
            counter.set_value(sample.value);
            metric.set_counter(counter);
        }
    }
    metric
}

/// Render a scrape in the text exposition format.
pub fn encode(samples: &[Sample]) -> Result<String> {
    let mut buf = Vec::with_capacity(samples.len() * 64);
    TextEncoder::new().encode(&families(samples), &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
