//! Poller: drives the collector on a fixed interval and publishes state.
//!
//! Each cycle goes `Idle -> Polling -> Published | Failed -> Idle`:
//!
//! - on success the samples become a new [`Snapshot`] with the next
//!   sequence number and a fresh [`PollState`] is published;
//! - on failure the previous snapshot is kept, `consecutive_failures` is
//!   bumped and the error is recorded.
//!
//! Polls run inline in the poller task, so at most one is ever in flight.
//! Ticks that fire while a poll is still running are skipped.
//!
//! The state is handed to readers through a `tokio::sync::watch` channel
//! holding an `Arc<PollState>`. Readers clone the `Arc` and render from
//! it without holding anything, so a scrape never waits for a poll.

pub mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::collector::{Collect, CollectError};
use crate::config::PollerConfig;
use crate::metrics::Snapshot;

pub use state::PollState;

/// Result of a single poll attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Published { poll_sequence: u64 },
    Failed { consecutive_failures: u64 },
}

/// Read-only handle to the currently published [`PollState`].
#[derive(Clone)]
pub struct StateReader {
    rx: watch::Receiver<Arc<PollState>>,
}

impl StateReader {
    /// The state current at the time of the call.
    pub fn current(&self) -> Arc<PollState> {
        self.rx.borrow().clone()
    }
}

pub struct Poller<C> {
    collector: C,
    cfg: PollerConfig,
    state: watch::Sender<Arc<PollState>>,
}

impl<C> Poller<C>
where
    C: Collect,
{
    pub fn new(collector: C, cfg: PollerConfig) -> Self {
        let (state, _) = watch::channel(Arc::new(PollState::empty()));
        Self {
            collector,
            cfg,
            state,
        }
    }

    /// Returns a handle readers can use to fetch the current state.
    pub fn reader(&self) -> StateReader {
        StateReader {
            rx: self.state.subscribe(),
        }
    }

    pub fn current(&self) -> Arc<PollState> {
        self.state.borrow().clone()
    }

    /// Runs one poll and publishes the resulting state.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let started = Instant::now();
        let result = self.collector.collect().await;
        let rpc = self.collector.rpc_counts();

        let prev = self.current();
        let next_sequence = prev.poll_sequence().unwrap_or(0) + 1;

        let result = result.and_then(|samples| {
            Snapshot::new(next_sequence, SystemTime::now(), samples).map_err(CollectError::from)
        });

        let (next, outcome) = match result {
            Ok(snapshot) => {
                debug!(
                    poll_sequence = next_sequence,
                    samples = snapshot.samples().len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "poll published"
                );
                if prev.consecutive_failures() > 0 {
                    info!(
                        failures = prev.consecutive_failures(),
                        "node polling recovered"
                    );
                }
                (
                    PollState::published(&prev, snapshot, rpc),
                    PollOutcome::Published {
                        poll_sequence: next_sequence,
                    },
                )
            }
            Err(err) => {
                let state = PollState::failed(&prev, err, rpc);
                let consecutive_failures = state.consecutive_failures();
                if let Some(err) = state.last_error() {
                    warn!(
                        error = %err,
                        consecutive_failures,
                        "poll failed, keeping previous snapshot"
                    );
                }
                (
                    state,
                    PollOutcome::Failed {
                        consecutive_failures,
                    },
                )
            }
        };

        self.state.send_replace(Arc::new(next));
        outcome
    }

    /// Polls on the configured interval until `shutdown` resolves.
    ///
    /// A poll that is in flight when shutdown starts gets
    /// `shutdown_grace` to finish and is dropped after that.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let grace = self.cfg.shutdown_grace;

        info!(
            interval_ms = self.cfg.interval.as_millis() as u64,
            "poller started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            let poll = self.poll_once();
            tokio::pin!(poll);

            let stop = tokio::select! {
                biased;
                _ = &mut poll => false,
                _ = &mut shutdown => {
                    info!(grace_ms = grace.as_millis() as u64, "shutdown during poll, waiting for it to finish");
                    if tokio::time::timeout(grace, &mut poll).await.is_err() {
                        warn!("abandoning in-flight poll after grace period");
                    }
                    true
                }
            };
            if stop {
                break;
            }
        }

        info!("poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::oneshot;

    use super::*;
    use crate::collector::NodeCollector;
    use crate::config::CollectorConfig;
    use crate::metrics::Sample;
    use crate::metrics::model::{CHAIN_HEAD, PEER_COUNT};
    use crate::rpc::testing::ScriptedTransport;
    use crate::rpc::{NodeClient, RpcError, RpcErrorKind};

    /// Collector that replays a fixed list of outcomes, then keeps failing.
    struct Replay {
        outcomes: VecDeque<Result<Vec<Sample>, CollectError>>,
    }

    impl Replay {
        fn new(outcomes: Vec<Result<Vec<Sample>, CollectError>>) -> Self {
            Self {
                outcomes: outcomes.into(),
            }
        }
    }

    #[async_trait]
    impl Collect for Replay {
        async fn collect(&mut self) -> Result<Vec<Sample>, CollectError> {
            self.outcomes.pop_front().unwrap_or_else(|| {
                Err(CollectError::Rpc {
                    query: "system_health",
                    source: RpcError::ConnectionRefused,
                })
            })
        }
    }

    fn head(n: f64) -> Result<Vec<Sample>, CollectError> {
        Ok(vec![
            Sample::new(&CHAIN_HEAD, n).unwrap(),
            Sample::new(&PEER_COUNT, 5.0).unwrap(),
        ])
    }

    fn refused() -> Result<Vec<Sample>, CollectError> {
        Err(CollectError::Rpc {
            query: "chain_getBlockHash",
            source: RpcError::ConnectionRefused,
        })
    }

    #[tokio::test]
    async fn sequence_counts_successful_polls() {
        let mut poller = Poller::new(
            Replay::new(vec![head(1.0), refused(), head(2.0), head(3.0)]),
            PollerConfig::default(),
        );

        let outcomes = [
            poller.poll_once().await,
            poller.poll_once().await,
            poller.poll_once().await,
            poller.poll_once().await,
        ];
        assert_eq!(
            outcomes,
            [
                PollOutcome::Published { poll_sequence: 1 },
                PollOutcome::Failed {
                    consecutive_failures: 1
                },
                PollOutcome::Published { poll_sequence: 2 },
                PollOutcome::Published { poll_sequence: 3 },
            ]
        );

        let state = poller.current();
        assert_eq!(state.poll_sequence(), Some(3));
        assert_eq!(state.polls_succeeded(), 3);
        assert_eq!(
            state.snapshot().and_then(|s| s.value_of(&CHAIN_HEAD)),
            Some(3.0)
        );
    }

    #[tokio::test]
    async fn failure_leaves_served_snapshot_untouched() {
        let mut poller = Poller::new(
            Replay::new(vec![head(100.0), refused(), refused()]),
            PollerConfig::default(),
        );
        poller.poll_once().await;
        let before = poller.current();

        poller.poll_once().await;
        poller.poll_once().await;
        let after = poller.current();

        assert!(Arc::ptr_eq(
            before.snapshot().unwrap(),
            after.snapshot().unwrap()
        ));
        assert_eq!(after.poll_sequence(), Some(1));
        assert_eq!(after.consecutive_failures(), 2);
    }

    #[tokio::test]
    async fn invalid_samples_fail_the_poll() {
        let duplicate = Ok(vec![
            Sample::new(&CHAIN_HEAD, 1.0).unwrap(),
            Sample::new(&CHAIN_HEAD, 2.0).unwrap(),
        ]);
        let mut poller = Poller::new(Replay::new(vec![duplicate]), PollerConfig::default());

        let outcome = poller.poll_once().await;
        assert_eq!(
            outcome,
            PollOutcome::Failed {
                consecutive_failures: 1
            }
        );
        assert!(matches!(
            poller.current().last_error(),
            Some(CollectError::Model(_))
        ));
        assert!(!poller.current().is_ready());
    }

    #[tokio::test]
    async fn rpc_timeout_is_recorded_once() {
        let node = ScriptedTransport::new();
        node.fail("chain_getBlockHash", RpcError::Timeout);
        let collector = NodeCollector::new(NodeClient::new(node), CollectorConfig::default());
        let mut poller = Poller::new(collector, PollerConfig::default());

        let before = poller.current().consecutive_failures();
        poller.poll_once().await;
        let state = poller.current();

        assert_eq!(state.consecutive_failures(), before + 1);
        assert_eq!(
            state.last_error().and_then(CollectError::rpc_kind),
            Some(RpcErrorKind::Timeout)
        );
    }

    #[tokio::test]
    async fn reader_sees_published_state() {
        let mut poller = Poller::new(Replay::new(vec![head(7.0)]), PollerConfig::default());
        let reader = poller.reader();
        assert!(!reader.current().is_ready());

        poller.poll_once().await;
        assert_eq!(reader.current().poll_sequence(), Some(1));
    }

    fn slow_node(latency: Duration) -> ScriptedTransport {
        let node = ScriptedTransport::new();
        node.respond(
            "chain_getBlockHash",
            json!("0x0000000000000000000000000000000000000000000000000000000000000001"),
        );
        node.respond(
            "chain_getBlock",
            json!({"block": {"header": {"number": "0x1"}, "extrinsics": []}}),
        );
        node.respond(
            "system_health",
            json!({"isSyncing": false, "peers": 1, "shouldHavePeers": true}),
        );
        node.set_latency(latency);
        node
    }

    #[tokio::test]
    async fn polls_never_overlap_when_rpc_is_slower_than_the_interval() {
        let node = slow_node(Duration::from_millis(20));
        let collector = NodeCollector::new(NodeClient::new(node.clone()), CollectorConfig::default());
        let cfg = PollerConfig {
            interval: Duration::from_millis(1),
            shutdown_grace: Duration::from_millis(500),
        };
        let poller = Poller::new(collector, cfg);
        let reader = poller.reader();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(poller.run(async move {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = stop_tx.send(());
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("poller stops")
            .expect("poller task does not panic");

        assert_eq!(node.max_in_flight(), 1);
        assert!(reader.current().poll_sequence().unwrap_or(0) >= 1);
    }

    #[tokio::test]
    async fn shutdown_abandons_a_stuck_poll_after_grace() {
        let node = slow_node(Duration::ZERO);
        node.hold();
        let collector = NodeCollector::new(NodeClient::new(node.clone()), CollectorConfig::default());
        let cfg = PollerConfig {
            interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_millis(50),
        };
        let poller = Poller::new(collector, cfg);
        let reader = poller.reader();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(poller.run(async move {
            let _ = stop_rx.await;
        }));

        while node.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = stop_tx.send(());

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("poller gives up on the stuck poll")
            .expect("poller task does not panic");

        assert_eq!(node.in_flight(), 0, "abandoned call was dropped");
        assert!(!reader.current().is_ready());
    }
}
