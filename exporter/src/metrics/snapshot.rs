//! Immutable metric snapshots and text exposition.

use std::collections::{BTreeMap, HashSet};
use std::time::SystemTime;

use prometheus::proto::MetricFamily;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder,
};

use super::model::{Metric, MetricKind, ModelError, Sample};

/// Content type of the Prometheus text exposition format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Complete set of samples from one successful poll.
///
/// A snapshot is validated and encoded into metric families once, when it
/// is built. After that nothing mutates it, so any number of readers can
/// render it concurrently.
#[derive(Clone, Debug)]
pub struct Snapshot {
    poll_sequence: u64,
    collected_at: SystemTime,
    samples: Vec<Sample>,
    families: Vec<MetricFamily>,
}

impl Snapshot {
    pub fn new(
        poll_sequence: u64,
        collected_at: SystemTime,
        samples: Vec<Sample>,
    ) -> Result<Self, ModelError> {
        let families = build_families(&samples)?;
        Ok(Self {
            poll_sequence,
            collected_at,
            samples,
            families,
        })
    }

    pub fn poll_sequence(&self) -> u64 {
        self.poll_sequence
    }

    pub fn collected_at(&self) -> SystemTime {
        self.collected_at
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Value of the label-less sample of `metric`, if present.
    pub fn value_of(&self, metric: &Metric) -> Option<f64> {
        self.samples
            .iter()
            .find(|s| std::ptr::eq(s.metric(), metric) && s.label_values().is_empty())
            .map(Sample::value)
    }

    pub(crate) fn families(&self) -> &[MetricFamily] {
        &self.families
    }
}

/// Groups samples per metric and turns them into Prometheus metric families.
///
/// Fails on duplicate samples (same metric, same label values) instead of
/// letting one silently overwrite the other.
pub(crate) fn build_families(samples: &[Sample]) -> Result<Vec<MetricFamily>, ModelError> {
    let mut seen: HashSet<(&str, &[String])> = HashSet::new();
    let mut grouped: BTreeMap<&'static str, (&'static Metric, Vec<&Sample>)> = BTreeMap::new();

    for sample in samples {
        let metric = sample.metric();
        if !seen.insert((metric.name, sample.label_values())) {
            return Err(ModelError::DuplicateSample {
                metric: metric.name,
                labels: sample.label_values().to_vec(),
            });
        }
        grouped
            .entry(metric.name)
            .or_insert_with(|| (metric, Vec::new()))
            .1
            .push(sample);
    }

    let registry = Registry::new();
    for (metric, group) in grouped.into_values() {
        register_group(&registry, metric, &group)?;
    }
    Ok(registry.gather())
}

fn register_group(
    registry: &Registry,
    metric: &'static Metric,
    group: &[&Sample],
) -> Result<(), ModelError> {
    let opts = Opts::new(metric.name, metric.help);

    match (metric.kind, metric.labels.is_empty()) {
        (MetricKind::Gauge, true) => {
            let gauge = Gauge::with_opts(opts)?;
            for sample in group {
                gauge.set(sample.value());
            }
            registry.register(Box::new(gauge))?;
        }
        (MetricKind::Gauge, false) => {
            let gauges = GaugeVec::new(opts, metric.labels)?;
            for sample in group {
                gauges
                    .with_label_values(label_refs(sample).as_slice())
                    .set(sample.value());
            }
            registry.register(Box::new(gauges))?;
        }
        (MetricKind::Counter, true) => {
            let counter = Counter::with_opts(opts)?;
            for sample in group {
                counter.inc_by(sample.value());
            }
            registry.register(Box::new(counter))?;
        }
        (MetricKind::Counter, false) => {
            let counters = CounterVec::new(opts, metric.labels)?;
            for sample in group {
                counters
                    .with_label_values(label_refs(sample).as_slice())
                    .inc_by(sample.value());
            }
            registry.register(Box::new(counters))?;
        }
    }
    Ok(())
}

fn label_refs(sample: &Sample) -> Vec<&str> {
    sample.label_values().iter().map(String::as_str).collect()
}

/// Appends `families` to `buf` in the text exposition format.
pub fn encode_text(families: &[MetricFamily], buf: &mut Vec<u8>) -> Result<(), ModelError> {
    TextEncoder::new().encode(families, buf)?;
    Ok(())
}
