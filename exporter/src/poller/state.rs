//! Published poll state.
//!
//! A [`PollState`] is what scrapes see: the latest successful snapshot plus
//! the failure bookkeeping of the poll attempts since. The poller builds a
//! brand new value after every attempt and swaps it in; nothing ever
//! mutates a published one.

use std::sync::Arc;
use std::time::UNIX_EPOCH;

use prometheus::proto::MetricFamily;
use tracing::error;

use crate::collector::CollectError;
use crate::metrics::model::{
    EXPORTER_CONSECUTIVE_FAILURES, EXPORTER_LAST_SUCCESS, EXPORTER_POLLS, EXPORTER_RPC_CALLS,
    EXPORTER_RPC_ERRORS, EXPORTER_SNAPSHOT_SEQUENCE,
};
use crate::metrics::snapshot::build_families;
use crate::metrics::{ModelError, Sample, Snapshot, encode_text};
use crate::rpc::{RpcCounts, RpcErrorKind};

#[derive(Debug, Default)]
pub struct PollState {
    snapshot: Option<Arc<Snapshot>>,
    last_error: Option<CollectError>,
    consecutive_failures: u64,
    polls_succeeded: u64,
    polls_failed: u64,
    rpc: RpcCounts,
    meta: Vec<MetricFamily>,
}

impl PollState {
    /// State before the first poll attempt.
    pub fn empty() -> Self {
        Self::default()
    }

    /// State after a successful poll produced `snapshot`.
    pub(crate) fn published(prev: &PollState, snapshot: Snapshot, rpc: RpcCounts) -> Self {
        Self {
            snapshot: Some(Arc::new(snapshot)),
            last_error: None,
            consecutive_failures: 0,
            polls_succeeded: prev.polls_succeeded + 1,
            polls_failed: prev.polls_failed,
            rpc,
            meta: Vec::new(),
        }
        .with_meta()
    }

    /// State after a failed poll: the previous snapshot stays as it is.
    pub(crate) fn failed(prev: &PollState, err: CollectError, rpc: RpcCounts) -> Self {
        Self {
            snapshot: prev.snapshot.clone(),
            last_error: Some(err),
            consecutive_failures: prev.consecutive_failures + 1,
            polls_succeeded: prev.polls_succeeded,
            polls_failed: prev.polls_failed + 1,
            rpc,
            meta: Vec::new(),
        }
        .with_meta()
    }

    fn with_meta(mut self) -> Self {
        match self.meta_samples().and_then(|s| build_families(&s)) {
            Ok(meta) => self.meta = meta,
            Err(e) => error!(error = %e, "failed to build exporter meta metrics"),
        }
        self
    }

    fn meta_samples(&self) -> Result<Vec<Sample>, ModelError> {
        let mut samples = vec![
            Sample::new(
                &EXPORTER_CONSECUTIVE_FAILURES,
                self.consecutive_failures as f64,
            )?,
            Sample::with_labels(
                &EXPORTER_POLLS,
                &[("outcome", "success")],
                self.polls_succeeded as f64,
            )?,
            Sample::with_labels(
                &EXPORTER_POLLS,
                &[("outcome", "failure")],
                self.polls_failed as f64,
            )?,
            Sample::new(&EXPORTER_RPC_CALLS, self.rpc.calls as f64)?,
        ];

        for kind in RpcErrorKind::ALL {
            samples.push(Sample::with_labels(
                &EXPORTER_RPC_ERRORS,
                &[("kind", kind.as_str())],
                self.rpc.errors(kind) as f64,
            )?);
        }

        if let Some(snapshot) = &self.snapshot {
            samples.push(Sample::new(
                &EXPORTER_SNAPSHOT_SEQUENCE,
                snapshot.poll_sequence() as f64,
            )?);
            let collected_at = snapshot
                .collected_at()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or_default();
            samples.push(Sample::new(&EXPORTER_LAST_SUCCESS, collected_at)?);
        }

        Ok(samples)
    }

    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        self.snapshot.as_ref()
    }

    /// Sequence number of the served snapshot, `None` before the first success.
    pub fn poll_sequence(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|s| s.poll_sequence())
    }

    pub fn last_error(&self) -> Option<&CollectError> {
        self.last_error.as_ref()
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures
    }

    pub fn polls_succeeded(&self) -> u64 {
        self.polls_succeeded
    }

    pub fn polls_failed(&self) -> u64 {
        self.polls_failed
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Renders the snapshot followed by the exporter meta metrics.
    ///
    /// Returns `Ok(None)` while no poll has succeeded yet.
    pub fn render(&self) -> Result<Option<Vec<u8>>, ModelError> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(None);
        };

        let mut buf = Vec::with_capacity(4096);
        encode_text(snapshot.families(), &mut buf)?;
        encode_text(&self.meta, &mut buf)?;
        Ok(Some(buf))
    }
}
