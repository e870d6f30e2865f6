//! Metric model for the exporter.
//!
//! This module defines the fixed catalogue of exported metrics
//! ([`model`]) and immutable, pre-encoded snapshots of their values
//! ([`snapshot`]). The exposition itself is done by the `prometheus`
//! crate's text encoder.
//!
//! Typical usage from a collector:
//!
//! ```ignore
//! use polkadot_exporter::metrics::{Sample, Snapshot, model};
//!
//! let samples = vec![
//!     Sample::new(&model::CHAIN_HEAD, 100.0)?,
//!     Sample::new(&model::PEER_COUNT, 5.0)?,
//! ];
//! let snapshot = Snapshot::new(1, std::time::SystemTime::now(), samples)?;
//! ```

pub mod model;
pub mod snapshot;

pub use model::{Metric, MetricKind, ModelError, Sample};
pub use snapshot::{Snapshot, TEXT_CONTENT_TYPE, encode_text};
