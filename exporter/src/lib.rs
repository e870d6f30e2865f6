//! Polkadot exporter library crate.
//!
//! This crate provides the building blocks of a Prometheus exporter for
//! Polkadot / Substrate nodes:
//!
//! - a JSON-RPC client for the node (`rpc`),
//! - the fixed metric catalogue and immutable snapshots (`metrics`),
//! - a collector that turns one poll of the node into samples (`collector`),
//! - a poller that runs the collector on a timer and publishes state (`poller`),
//! - the `/metrics` HTTP server (`publisher`),
//! - and a top-level configuration (`config`).
//!
//! The `polkadot-exporter` binary wires these together; tests and other
//! binaries can compose them with a different transport or collector.

pub mod collector;
pub mod config;
pub mod metrics;
pub mod poller;
pub mod publisher;
pub mod rpc;

// Re-export top-level configuration types.
pub use config::{
    Cli, CollectorConfig, ConfigError, ExporterConfig, PollerConfig, PublisherConfig, RpcConfig,
};

pub use collector::{Collect, CollectError, NodeCollector};
pub use metrics::{Metric, MetricKind, ModelError, Sample, Snapshot};
pub use poller::{PollOutcome, PollState, Poller, StateReader};
pub use publisher::ServeError;
pub use rpc::{HttpTransport, NodeClient, RpcError, RpcErrorKind, RpcTransport};

/// Collector stack used by the binary: typed client over HTTP.
pub type DefaultCollector = NodeCollector<HttpTransport>;
