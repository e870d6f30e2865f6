//! Collector: one poll of the node, turned into samples.
//!
//! Queries are split in two groups:
//!
//! - **required**: chain head (+ block walk) and `system_health`. If any of
//!   them fails, the whole collection fails and no collector state moves.
//! - **best-effort**: finality, pending extrinsics and node identity. A
//!   failure is logged and only drops that query's own samples.
//!
//! The block walk keeps counting blocks and extrinsics across polls. The
//! running totals are only committed once every required query of a poll
//! has succeeded, so a failed poll never advances them halfway.

pub mod cache;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CollectorConfig;
use crate::metrics::model::{
    BLOCKS, CHAIN_HEAD, EXTRINSICS, FINAL_BLOCK, FINALITY_DELAY, NODE_SHOULD_HAVE_PEERS,
    NODE_SYNCING, PEER_COUNT, PENDING_EXTRINSICS, RUNTIME_INFO, SYSTEM_INFO,
};
use crate::metrics::{ModelError, Sample};
use crate::rpc::{
    BlockHash, NodeClient, RpcCounts, RpcError, RpcErrorKind, RpcTransport, RuntimeVersion,
    SignedBlock, SystemInfo,
};

pub use cache::BlockCache;

/// Failure of one collection as a whole.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CollectError {
    #[error("{query} failed: {source}")]
    Rpc {
        query: &'static str,
        #[source]
        source: RpcError,
    },
    #[error("node does not know block {0}")]
    MissingBlock(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl CollectError {
    fn rpc(query: &'static str) -> impl FnOnce(RpcError) -> CollectError {
        move |source| CollectError::Rpc { query, source }
    }

    /// Kind of the underlying RPC failure, if this was one.
    pub fn rpc_kind(&self) -> Option<RpcErrorKind> {
        match self {
            CollectError::Rpc { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// Something that can produce the samples of one poll.
#[async_trait]
pub trait Collect: Send {
    async fn collect(&mut self) -> Result<Vec<Sample>, CollectError>;

    /// RPC call statistics accumulated so far.
    fn rpc_counts(&self) -> RpcCounts {
        RpcCounts::default()
    }
}

/// Running totals of the block walk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct ChainProgress {
    last_number: Option<u64>,
    last_hash: Option<BlockHash>,
    blocks: u64,
    extrinsics: u64,
}

impl ChainProgress {
    fn count(&mut self, hash: BlockHash, block: &SignedBlock) {
        self.blocks += 1;
        self.extrinsics += block.extrinsics as u64;
        self.last_number = Some(block.number);
        self.last_hash = Some(hash);
    }
}

/// A value that is refetched at most once per interval.
struct Refreshing<V> {
    value: Option<V>,
    fetched_at: Option<Instant>,
}

impl<V> Default for Refreshing<V> {
    fn default() -> Self {
        Self {
            value: None,
            fetched_at: None,
        }
    }
}

impl<V> Refreshing<V> {
    fn is_due(&self, every: Duration, now: Instant) -> bool {
        self.fetched_at
            .is_none_or(|at| now.saturating_duration_since(at) >= every)
    }

    /// Stores a fresh value, or forgets the old one so the next poll retries.
    fn update(&mut self, result: Result<V, RpcError>, now: Instant, what: &str) {
        match result {
            Ok(v) => {
                self.value = Some(v);
                self.fetched_at = Some(now);
            }
            Err(e) => {
                warn!(error = %e, "failed to refresh {what}");
                self.value = None;
                self.fetched_at = None;
            }
        }
    }
}

/// Collector for a Polkadot / Substrate node.
pub struct NodeCollector<T> {
    client: NodeClient<T>,
    cfg: CollectorConfig,
    cache: BlockCache,
    progress: ChainProgress,
    system: Refreshing<SystemInfo>,
    runtime: Refreshing<RuntimeVersion>,
}

impl<T> NodeCollector<T>
where
    T: RpcTransport,
{
    pub fn new(client: NodeClient<T>, cfg: CollectorConfig) -> Self {
        let cache = BlockCache::new(cfg.block_cache_size);
        Self {
            client,
            cfg,
            cache,
            progress: ChainProgress::default(),
            system: Refreshing::default(),
            runtime: Refreshing::default(),
        }
    }

    pub fn client(&self) -> &NodeClient<T> {
        &self.client
    }

    /// Fetches a block through the cache. Unknown blocks are an error here:
    /// every hash we ask for came from the node itself.
    async fn block(&mut self, hash: BlockHash) -> Result<SignedBlock, CollectError> {
        if let Some(block) = self.cache.get(&hash) {
            return Ok(block.clone());
        }

        let block = self
            .client
            .block(&hash)
            .await
            .map_err(CollectError::rpc("chain_getBlock"))?
            .ok_or_else(|| CollectError::MissingBlock(hash.to_string()))?;

        self.cache.insert(hash, block.clone());
        Ok(block)
    }

    /// Walks from the last counted block up to `head`, bounded per poll.
    ///
    /// Works on a copy of the running totals; the caller commits it.
    async fn walk(
        &mut self,
        head_hash: BlockHash,
        head: &SignedBlock,
    ) -> Result<ChainProgress, CollectError> {
        let mut progress = self.progress.clone();

        if progress.last_hash == Some(head_hash) {
            return Ok(progress);
        }

        let Some(last) = progress.last_number else {
            progress.count(head_hash, head);
            return Ok(progress);
        };

        if head.number <= last {
            debug!(head = head.number, last, "head did not advance past last counted block");
            return Ok(progress);
        }

        let end = head
            .number
            .min(last.saturating_add(self.cfg.max_blocks_per_poll));
        for number in last + 1..=end {
            let hash = if number == head.number {
                head_hash
            } else {
                self.client
                    .block_hash(number)
                    .await
                    .map_err(CollectError::rpc("chain_getBlockHash"))?
                    .ok_or_else(|| CollectError::MissingBlock(format!("#{number}")))?
            };
            let block = self.block(hash).await?;
            progress.count(hash, &block);
        }

        if end < head.number {
            debug!(
                counted_up_to = end,
                head = head.number,
                "block walk capped, continuing next poll"
            );
        }
        Ok(progress)
    }

    async fn finality_samples(&mut self, head: &SignedBlock) -> Result<Vec<Sample>, CollectError> {
        let Some(final_hash) = self
            .client
            .finalized_head()
            .await
            .map_err(CollectError::rpc("chain_getFinalizedHead"))?
        else {
            return Ok(Vec::new());
        };

        let finalized = self.block(final_hash).await?;
        let delay = head.number.saturating_sub(finalized.number);

        Ok(vec![
            Sample::new(&FINAL_BLOCK, finalized.number as f64)?,
            Sample::new(&FINALITY_DELAY, delay as f64)?,
        ])
    }

    async fn mempool_samples(&mut self) -> Result<Vec<Sample>, CollectError> {
        let pending = self
            .client
            .pending_extrinsics()
            .await
            .map_err(CollectError::rpc("author_pendingExtrinsics"))?;
        Ok(vec![Sample::new(&PENDING_EXTRINSICS, pending as f64)?])
    }

    async fn identity_samples(&mut self) -> Result<Vec<Sample>, CollectError> {
        let now = Instant::now();
        let every = self.cfg.identity_refresh;

        if self.system.is_due(every, now) {
            let result = self.client.system_info().await;
            self.system.update(result, now, "system info");
        }
        if self.runtime.is_due(every, now) {
            let result = self.client.runtime_version().await;
            self.runtime.update(result, now, "runtime version");
        }

        let mut samples = Vec::new();
        if let Some(info) = &self.system.value {
            samples.push(Sample::with_labels(
                &SYSTEM_INFO,
                &[
                    ("chain", info.chain.as_str()),
                    ("name", info.name.as_str()),
                    ("version", info.version.as_str()),
                ],
                1.0,
            )?);
        }
        if let Some(rv) = &self.runtime.value {
            let authoring_version = rv.authoring_version.to_string();
            let impl_version = rv.impl_version.to_string();
            let spec_version = rv.spec_version.to_string();
            samples.push(Sample::with_labels(
                &RUNTIME_INFO,
                &[
                    ("authoring_version", authoring_version.as_str()),
                    ("impl_name", rv.impl_name.as_str()),
                    ("impl_version", impl_version.as_str()),
                    ("spec_name", rv.spec_name.as_str()),
                    ("spec_version", spec_version.as_str()),
                ],
                1.0,
            )?);
        }
        Ok(samples)
    }
}

/// Appends the result of a best-effort query, or logs why it is missing.
fn best_effort(samples: &mut Vec<Sample>, query: &str, result: Result<Vec<Sample>, CollectError>) {
    match result {
        Ok(extra) => samples.extend(extra),
        Err(e) => warn!(error = %e, "best-effort {query} query failed, omitting its samples"),
    }
}

#[async_trait]
impl<T> Collect for NodeCollector<T>
where
    T: RpcTransport,
{
    async fn collect(&mut self) -> Result<Vec<Sample>, CollectError> {
        // Required: chain head, block walk, health.
        let head_hash = self
            .client
            .best_block_hash()
            .await
            .map_err(CollectError::rpc("chain_getBlockHash"))?;
        let head = self.block(head_hash).await?;
        let progress = self.walk(head_hash, &head).await?;

        let health = self
            .client
            .health()
            .await
            .map_err(CollectError::rpc("system_health"))?;

        let mut samples = vec![
            Sample::new(&CHAIN_HEAD, head.number as f64)?,
            Sample::new(&BLOCKS, progress.blocks as f64)?,
            Sample::new(&EXTRINSICS, progress.extrinsics as f64)?,
            Sample::new(&PEER_COUNT, health.peers as f64)?,
            Sample::new(&NODE_SYNCING, f64::from(u8::from(health.is_syncing)))?,
            Sample::new(
                &NODE_SHOULD_HAVE_PEERS,
                f64::from(u8::from(health.should_have_peers)),
            )?,
        ];

        // Everything required succeeded; the walk can be committed.
        self.progress = progress;

        let finality = self.finality_samples(&head).await;
        best_effort(&mut samples, "finality", finality);
        let mempool = self.mempool_samples().await;
        best_effort(&mut samples, "mempool", mempool);
        let identity = self.identity_samples().await;
        best_effort(&mut samples, "identity", identity);

        debug!(
            head = head.number,
            peers = health.peers,
            samples = samples.len(),
            "collection complete"
        );
        Ok(samples)
    }

    fn rpc_counts(&self) -> RpcCounts {
        self.client.stats()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::rpc::testing::ScriptedTransport;

    fn hash_of(n: u64) -> String {
        format!("0x{n:064x}")
    }

    fn block_json(n: u64, extrinsics: usize) -> Value {
        let body = vec!["0x00"; extrinsics];
        json!({
            "block": {
                "header": { "number": format!("0x{n:x}") },
                "extrinsics": body,
            },
            "justifications": null
        })
    }

    /// Scripts block `n` with `extrinsics` extrinsics, addressable by number and hash.
    fn add_block(node: &ScriptedTransport, n: u64, extrinsics: usize) {
        node.respond_to("chain_getBlockHash", json!([n]), json!(hash_of(n)));
        node.respond_to("chain_getBlock", json!([hash_of(n)]), block_json(n, extrinsics));
    }

    fn set_head(node: &ScriptedTransport, n: u64) {
        node.respond_to("chain_getBlockHash", json!([]), json!(hash_of(n)));
    }

    fn healthy_node(head: u64) -> ScriptedTransport {
        let node = ScriptedTransport::new();
        add_block(&node, head, 2);
        set_head(&node, head);
        node.respond(
            "system_health",
            json!({"isSyncing": false, "peers": 5, "shouldHavePeers": true}),
        );
        node.respond("chain_getFinalizedHead", json!(hash_of(head)));
        node.respond("author_pendingExtrinsics", json!(["0x01", "0x02"]));
        node.respond("system_name", json!("Parity Polkadot"));
        node.respond("system_version", json!("1.2.0"));
        node.respond("system_chain", json!("Polkadot"));
        node.respond(
            "state_getRuntimeVersion",
            json!({
                "specName": "polkadot",
                "implName": "parity-polkadot",
                "authoringVersion": 0,
                "specVersion": 9430,
                "implVersion": 0
            }),
        );
        node
    }

    fn new_collector(
        node: &ScriptedTransport,
        cfg: CollectorConfig,
    ) -> NodeCollector<ScriptedTransport> {
        NodeCollector::new(NodeClient::new(node.clone()), cfg)
    }

    fn value(samples: &[Sample], name: &str) -> Option<f64> {
        samples
            .iter()
            .find(|s| s.metric().name == name)
            .map(Sample::value)
    }

    #[tokio::test]
    async fn first_collection_reports_head_health_and_extras() {
        let node = healthy_node(100);
        let mut c = new_collector(&node, CollectorConfig::default());

        let samples = c.collect().await.expect("collection succeeds");

        assert_eq!(value(&samples, "polkadot_chain_head"), Some(100.0));
        assert_eq!(value(&samples, "polkadot_peer_count"), Some(5.0));
        assert_eq!(value(&samples, "polkadot_node_syncing"), Some(0.0));
        assert_eq!(value(&samples, "polkadot_node_should_have_peers"), Some(1.0));
        assert_eq!(value(&samples, "polkadot_blocks_total"), Some(1.0));
        assert_eq!(value(&samples, "polkadot_extrinsics_total"), Some(2.0));
        assert_eq!(value(&samples, "polkadot_final_block"), Some(100.0));
        assert_eq!(value(&samples, "polkadot_finality_delay_blocks"), Some(0.0));
        assert_eq!(value(&samples, "polkadot_pending_extrinsics"), Some(2.0));

        let info = samples
            .iter()
            .find(|s| s.metric().name == "polkadot_system_info")
            .expect("system info sample");
        assert_eq!(info.label("chain"), Some("Polkadot"));
        let runtime = samples
            .iter()
            .find(|s| s.metric().name == "polkadot_runtime_info")
            .expect("runtime info sample");
        assert_eq!(runtime.label("spec_version"), Some("9430"));
    }

    #[tokio::test]
    async fn block_walk_counts_every_new_block() {
        let node = healthy_node(100);
        let mut c = new_collector(&node, CollectorConfig::default());
        c.collect().await.unwrap();

        for n in 101..=103 {
            add_block(&node, n, 1);
        }
        set_head(&node, 103);

        let samples = c.collect().await.unwrap();
        assert_eq!(value(&samples, "polkadot_chain_head"), Some(103.0));
        assert_eq!(value(&samples, "polkadot_blocks_total"), Some(4.0));
        assert_eq!(value(&samples, "polkadot_extrinsics_total"), Some(5.0));
        assert_eq!(value(&samples, "polkadot_finality_delay_blocks"), Some(3.0));
    }

    #[tokio::test]
    async fn unchanged_head_is_not_counted_twice() {
        let node = healthy_node(100);
        let mut c = new_collector(&node, CollectorConfig::default());
        c.collect().await.unwrap();

        let samples = c.collect().await.unwrap();
        assert_eq!(value(&samples, "polkadot_blocks_total"), Some(1.0));
    }

    #[tokio::test]
    async fn block_walk_is_capped_per_poll() {
        let node = healthy_node(100);
        let cfg = CollectorConfig {
            max_blocks_per_poll: 2,
            ..CollectorConfig::default()
        };
        let mut c = new_collector(&node, cfg);
        c.collect().await.unwrap();

        for n in 101..=105 {
            add_block(&node, n, 0);
        }
        set_head(&node, 105);

        let samples = c.collect().await.unwrap();
        assert_eq!(value(&samples, "polkadot_chain_head"), Some(105.0));
        assert_eq!(value(&samples, "polkadot_blocks_total"), Some(3.0));

        let samples = c.collect().await.unwrap();
        assert_eq!(value(&samples, "polkadot_blocks_total"), Some(5.0));

        let samples = c.collect().await.unwrap();
        assert_eq!(value(&samples, "polkadot_blocks_total"), Some(6.0));
    }

    #[tokio::test]
    async fn failed_required_query_does_not_advance_totals() {
        let node = healthy_node(100);
        let mut c = new_collector(&node, CollectorConfig::default());
        c.collect().await.unwrap();

        add_block(&node, 101, 4);
        set_head(&node, 101);
        node.fail("system_health", RpcError::Timeout);

        let err = c.collect().await.expect_err("health is required");
        assert_eq!(err.rpc_kind(), Some(RpcErrorKind::Timeout));

        node.respond(
            "system_health",
            json!({"isSyncing": true, "peers": 6, "shouldHavePeers": true}),
        );
        let samples = c.collect().await.unwrap();
        assert_eq!(value(&samples, "polkadot_blocks_total"), Some(2.0));
        assert_eq!(value(&samples, "polkadot_extrinsics_total"), Some(6.0));
        assert_eq!(value(&samples, "polkadot_node_syncing"), Some(1.0));
    }

    #[tokio::test]
    async fn missing_intermediate_block_fails_collection() {
        let node = healthy_node(100);
        let mut c = new_collector(&node, CollectorConfig::default());
        c.collect().await.unwrap();

        add_block(&node, 102, 0);
        node.respond_to("chain_getBlockHash", json!([101]), Value::Null);
        set_head(&node, 102);

        let err = c.collect().await.expect_err("gap in the chain");
        assert_eq!(err, CollectError::MissingBlock("#101".to_string()));
    }

    #[tokio::test]
    async fn best_effort_failures_only_drop_their_own_samples() {
        let node = healthy_node(100);
        node.fail("chain_getFinalizedHead", RpcError::Timeout);
        node.fail("author_pendingExtrinsics", RpcError::HttpStatus(500));
        let mut c = new_collector(&node, CollectorConfig::default());

        let samples = c.collect().await.expect("best-effort failures are tolerated");
        assert_eq!(value(&samples, "polkadot_chain_head"), Some(100.0));
        assert_eq!(value(&samples, "polkadot_final_block"), None);
        assert_eq!(value(&samples, "polkadot_pending_extrinsics"), None);
        assert!(
            samples
                .iter()
                .any(|s| s.metric().name == "polkadot_system_info")
        );
    }

    #[tokio::test]
    async fn no_finalized_head_omits_finality() {
        let node = healthy_node(100);
        node.respond("chain_getFinalizedHead", Value::Null);
        let mut c = new_collector(&node, CollectorConfig::default());

        let samples = c.collect().await.unwrap();
        assert_eq!(value(&samples, "polkadot_final_block"), None);
        assert_eq!(value(&samples, "polkadot_finality_delay_blocks"), None);
    }

    #[tokio::test]
    async fn identity_is_cached_between_refreshes() {
        let node = healthy_node(100);
        let mut c = new_collector(&node, CollectorConfig::default());
        c.collect().await.unwrap();

        node.fail("system_name", RpcError::ConnectionRefused);
        let samples = c.collect().await.unwrap();
        assert!(
            samples
                .iter()
                .any(|s| s.metric().name == "polkadot_system_info"),
            "cached identity survives until the next refresh"
        );
    }

    #[tokio::test]
    async fn failed_identity_refresh_is_retried_next_poll() {
        let node = healthy_node(100);
        node.fail("system_version", RpcError::Timeout);
        let mut c = new_collector(&node, CollectorConfig::default());

        let samples = c.collect().await.unwrap();
        assert!(
            !samples
                .iter()
                .any(|s| s.metric().name == "polkadot_system_info")
        );

        node.respond("system_version", json!("1.2.0"));
        let samples = c.collect().await.unwrap();
        assert!(
            samples
                .iter()
                .any(|s| s.metric().name == "polkadot_system_info")
        );
    }

    #[tokio::test]
    async fn head_block_is_served_from_cache() {
        let node = healthy_node(100);
        let mut c = new_collector(&node, CollectorConfig::default());
        c.collect().await.unwrap();
        let calls_after_first = node.calls();

        c.collect().await.unwrap();
        // Second poll: best hash, health, finalized head, pending. No chain_getBlock.
        assert_eq!(node.calls() - calls_after_first, 4);
        assert_eq!(c.rpc_counts().calls as usize, node.calls());
    }
}
