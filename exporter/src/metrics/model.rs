//! Metric definitions and samples.
//!
//! Every metric the exporter can emit is declared once, as a `static`, in
//! this module. Samples always point at one of these definitions, so names,
//! help texts and label sets cannot drift between polls.
//!
//! Label names are declared in ascending order. The text encoder writes
//! labels sorted by name, so this keeps the declared order and the rendered
//! order identical.

use std::fmt;

use thiserror::Error;

/// Prometheus metric type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Immutable metric definition.
#[derive(Debug, PartialEq, Eq)]
pub struct Metric {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: &'static [&'static str],
}

impl Metric {
    pub const fn gauge(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Gauge,
            labels: &[],
        }
    }

    pub const fn counter(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Counter,
            labels: &[],
        }
    }

    pub const fn with_labels(self, labels: &'static [&'static str]) -> Self {
        Self { labels, ..self }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------
// Node metrics
// ---------------------------

pub static CHAIN_HEAD: Metric = Metric::gauge(
    "polkadot_chain_head",
    "Number of the highest block in chain as seen by the node",
);

pub static BLOCKS: Metric = Metric::counter(
    "polkadot_blocks_total",
    "Number of blocks seen by the exporter since it started",
);

pub static EXTRINSICS: Metric = Metric::counter(
    "polkadot_extrinsics_total",
    "Number of extrinsics in blocks seen by the exporter since it started",
);

pub static PEER_COUNT: Metric = Metric::gauge("polkadot_peer_count", "Number of connected peers");

pub static NODE_SYNCING: Metric = Metric::gauge(
    "polkadot_node_syncing",
    "1 if the node is syncing, 0 otherwise",
);

pub static NODE_SHOULD_HAVE_PEERS: Metric = Metric::gauge(
    "polkadot_node_should_have_peers",
    "1 if the node should have peers, 0 otherwise",
);

pub static FINAL_BLOCK: Metric =
    Metric::gauge("polkadot_final_block", "Number of the last finalized block");

pub static FINALITY_DELAY: Metric = Metric::gauge(
    "polkadot_finality_delay_blocks",
    "Difference in blocks between head and finalized blocks",
);

pub static PENDING_EXTRINSICS: Metric = Metric::gauge(
    "polkadot_pending_extrinsics",
    "Number of extrinsics in the node's transaction pool",
);

pub static SYSTEM_INFO: Metric = Metric::gauge(
    "polkadot_system_info",
    "Node name, version and chain; the value is always 1",
)
.with_labels(&["chain", "name", "version"]);

pub static RUNTIME_INFO: Metric = Metric::gauge(
    "polkadot_runtime_info",
    "Runtime versions reported by the node; the value is always 1",
)
.with_labels(&[
    "authoring_version",
    "impl_name",
    "impl_version",
    "spec_name",
    "spec_version",
]);

// ---------------------------
// Exporter meta metrics
// ---------------------------

pub static EXPORTER_CONSECUTIVE_FAILURES: Metric = Metric::gauge(
    "polkadot_exporter_consecutive_failures",
    "Number of poll attempts that failed in a row since the last success",
);

pub static EXPORTER_POLLS: Metric = Metric::counter(
    "polkadot_exporter_polls_total",
    "Number of completed poll attempts by outcome",
)
.with_labels(&["outcome"]);

pub static EXPORTER_SNAPSHOT_SEQUENCE: Metric = Metric::gauge(
    "polkadot_exporter_snapshot_sequence",
    "Sequence number of the snapshot being served",
);

pub static EXPORTER_LAST_SUCCESS: Metric = Metric::gauge(
    "polkadot_exporter_last_success_timestamp_seconds",
    "Unix time at which the served snapshot was collected",
);

pub static EXPORTER_RPC_CALLS: Metric = Metric::counter(
    "polkadot_exporter_rpc_calls_total",
    "Total number of RPC calls made by the exporter",
);

pub static EXPORTER_RPC_ERRORS: Metric = Metric::counter(
    "polkadot_exporter_rpc_errors_total",
    "Total number of failed RPC calls by error kind",
)
.with_labels(&["kind"]);

/// Every metric the exporter declares.
pub static ALL: &[&Metric] = &[
    &CHAIN_HEAD,
    &BLOCKS,
    &EXTRINSICS,
    &PEER_COUNT,
    &NODE_SYNCING,
    &NODE_SHOULD_HAVE_PEERS,
    &FINAL_BLOCK,
    &FINALITY_DELAY,
    &PENDING_EXTRINSICS,
    &SYSTEM_INFO,
    &RUNTIME_INFO,
    &EXPORTER_CONSECUTIVE_FAILURES,
    &EXPORTER_POLLS,
    &EXPORTER_SNAPSHOT_SEQUENCE,
    &EXPORTER_LAST_SUCCESS,
    &EXPORTER_RPC_CALLS,
    &EXPORTER_RPC_ERRORS,
];

/// Errors raised while building samples or snapshots.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("metric {metric}: expected labels {expected:?}, got {got:?}")]
    LabelMismatch {
        metric: &'static str,
        expected: &'static [&'static str],
        got: Vec<String>,
    },
    #[error("metric {metric}: invalid value {value}")]
    InvalidValue { metric: &'static str, value: f64 },
    #[error("metric {metric}: duplicate sample for labels {labels:?}")]
    DuplicateSample {
        metric: &'static str,
        labels: Vec<String>,
    },
    #[error("prometheus error: {0}")]
    Prometheus(String),
}

impl From<prometheus::Error> for ModelError {
    fn from(e: prometheus::Error) -> Self {
        ModelError::Prometheus(e.to_string())
    }
}

/// One observed value of a [`Metric`].
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    metric: &'static Metric,
    label_values: Vec<String>,
    value: f64,
}

impl Sample {
    /// Sample of a metric without labels.
    pub fn new(metric: &'static Metric, value: f64) -> Result<Self, ModelError> {
        Self::with_labels(metric, &[], value)
    }

    /// Sample of a labelled metric.
    ///
    /// `labels` may be given in any order but must name exactly the labels
    /// declared by `metric`. Counters must be finite and non-negative,
    /// gauges finite.
    pub fn with_labels(
        metric: &'static Metric,
        labels: &[(&str, &str)],
        value: f64,
    ) -> Result<Self, ModelError> {
        let mismatch = || ModelError::LabelMismatch {
            metric: metric.name,
            expected: metric.labels,
            got: labels.iter().map(|(k, _)| k.to_string()).collect(),
        };

        if labels.len() != metric.labels.len() {
            return Err(mismatch());
        }

        let label_values = metric
            .labels
            .iter()
            .map(|declared| {
                labels
                    .iter()
                    .find(|(k, _)| k == declared)
                    .map(|(_, v)| v.to_string())
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(mismatch)?;

        let valid = match metric.kind {
            MetricKind::Gauge => value.is_finite(),
            MetricKind::Counter => value.is_finite() && value >= 0.0,
        };
        if !valid {
            return Err(ModelError::InvalidValue {
                metric: metric.name,
                value,
            });
        }

        Ok(Self {
            metric,
            label_values,
            value,
        })
    }

    pub fn metric(&self) -> &'static Metric {
        self.metric
    }

    /// Label values in the metric's declared label order.
    pub fn label_values(&self) -> &[String] {
        &self.label_values
    }

    /// Value of `label`, if the metric declares it.
    pub fn label(&self, label: &str) -> Option<&str> {
        self.metric
            .labels
            .iter()
            .position(|l| *l == label)
            .map(|i| self.label_values[i].as_str())
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}
