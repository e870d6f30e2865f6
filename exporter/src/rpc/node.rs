//! Typed Polkadot / Substrate node API on top of an [`RpcTransport`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::trace;

use super::RpcTransport;
use super::error::{RpcError, RpcErrorKind};
use super::types::{
    BlockHash, NodeHealth, RawSignedBlock, RuntimeVersion, SignedBlock, SystemInfo,
    parse_hex_quantity,
};

/// Running call statistics of a [`NodeClient`].
#[derive(Debug, Default)]
struct RpcStats {
    calls: AtomicU64,
    errors: [AtomicU64; RpcErrorKind::ALL.len()],
}

/// Point-in-time copy of the RPC call statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RpcCounts {
    pub calls: u64,
    errors: [u64; RpcErrorKind::ALL.len()],
}

impl RpcCounts {
    /// Number of failed calls of the given kind.
    pub fn errors(&self, kind: RpcErrorKind) -> u64 {
        self.errors[kind_index(kind)]
    }

    /// Total number of failed calls, all kinds.
    pub fn total_errors(&self) -> u64 {
        self.errors.iter().sum()
    }
}

fn kind_index(kind: RpcErrorKind) -> usize {
    RpcErrorKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_default()
}

/// Node client speaking the Substrate RPC dialect.
///
/// Every method issues one or more JSON-RPC calls and validates the result
/// shape. Anything that does not match is a [`RpcError::MalformedResponse`].
/// No method retries.
pub struct NodeClient<T> {
    transport: T,
    stats: RpcStats,
}

impl<T> NodeClient<T>
where
    T: RpcTransport,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            stats: RpcStats::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stats(&self) -> RpcCounts {
        let mut errors = [0u64; RpcErrorKind::ALL.len()];
        for (slot, counter) in errors.iter_mut().zip(self.stats.errors.iter()) {
            *slot = counter.load(Ordering::Relaxed);
        }
        RpcCounts {
            calls: self.stats.calls.load(Ordering::Relaxed),
            errors,
        }
    }

    fn record(&self, err: &RpcError) {
        self.stats.errors[kind_index(err.kind())].fetch_add(1, Ordering::Relaxed);
    }

    async fn call<D>(&self, method: &str, params: Value) -> Result<D, RpcError>
    where
        D: DeserializeOwned,
    {
        self.stats.calls.fetch_add(1, Ordering::Relaxed);
        trace!(method, "rpc call");

        let result = self
            .transport
            .fetch(method, params)
            .await
            .and_then(|value| {
                serde_json::from_value(value)
                    .map_err(|e| RpcError::malformed(format!("{method}: {e}")))
            });

        if let Err(err) = &result {
            self.record(err);
        }
        result
    }

    /// Hash of the current best block (`chain_getBlockHash` without params).
    pub async fn best_block_hash(&self) -> Result<BlockHash, RpcError> {
        let hash: Option<BlockHash> = self.call("chain_getBlockHash", json!([])).await?;
        hash.ok_or_else(|| {
            let err = RpcError::malformed("chain_getBlockHash returned null for the best block");
            self.record(&err);
            err
        })
    }

    /// Hash of the block at `number`, or `None` if the node does not know it.
    pub async fn block_hash(&self, number: u64) -> Result<Option<BlockHash>, RpcError> {
        self.call("chain_getBlockHash", json!([number])).await
    }

    /// Block by hash, or `None` if the node does not know it.
    pub async fn block(&self, hash: &BlockHash) -> Result<Option<SignedBlock>, RpcError> {
        let raw: Option<RawSignedBlock> = self
            .call("chain_getBlock", json!([hash.to_string()]))
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let number = parse_hex_quantity(&raw.block.header.number).ok_or_else(|| {
            let err = RpcError::malformed(format!(
                "block {hash} has invalid number {:?}",
                raw.block.header.number
            ));
            self.record(&err);
            err
        })?;

        Ok(Some(SignedBlock {
            number,
            extrinsics: raw.block.extrinsics.len(),
        }))
    }

    /// Hash of the last finalized block, if the node reports one.
    pub async fn finalized_head(&self) -> Result<Option<BlockHash>, RpcError> {
        self.call("chain_getFinalizedHead", json!([])).await
    }

    pub async fn health(&self) -> Result<NodeHealth, RpcError> {
        self.call("system_health", json!([])).await
    }

    /// Number of extrinsics currently in the node's transaction pool.
    pub async fn pending_extrinsics(&self) -> Result<usize, RpcError> {
        let pending: Vec<Value> = self.call("author_pendingExtrinsics", json!([])).await?;
        Ok(pending.len())
    }

    pub async fn system_info(&self) -> Result<SystemInfo, RpcError> {
        let name: String = self.call("system_name", json!([])).await?;
        let version: String = self.call("system_version", json!([])).await?;
        let chain: String = self.call("system_chain", json!([])).await?;
        Ok(SystemInfo {
            name,
            version,
            chain,
        })
    }

    pub async fn runtime_version(&self) -> Result<RuntimeVersion, RpcError> {
        self.call("state_getRuntimeVersion", json!([])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::testing::ScriptedTransport;

    const HASH_A: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    #[tokio::test]
    async fn block_is_decoded_into_number_and_extrinsic_count() {
        let transport = ScriptedTransport::new();
        transport.respond(
            "chain_getBlock",
            json!({
                "block": {
                    "header": { "number": "0x64", "parentHash": HASH_A },
                    "extrinsics": ["0x01", "0x02", "0x03"]
                },
                "justifications": null
            }),
        );
        let client = NodeClient::new(transport);

        let hash: BlockHash = HASH_A.parse().unwrap();
        let block = client.block(&hash).await.unwrap().expect("block exists");
        assert_eq!(block.number, 100);
        assert_eq!(block.extrinsics, 3);
    }

    #[tokio::test]
    async fn unknown_block_is_none() {
        let transport = ScriptedTransport::new();
        transport.respond("chain_getBlock", Value::Null);
        let client = NodeClient::new(transport);

        let hash: BlockHash = HASH_A.parse().unwrap();
        assert_eq!(client.block(&hash).await.unwrap(), None);
    }

    #[tokio::test]
    async fn null_best_block_hash_is_malformed() {
        let transport = ScriptedTransport::new();
        transport.respond("chain_getBlockHash", Value::Null);
        let client = NodeClient::new(transport);

        let err = client.best_block_hash().await.unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::MalformedResponse);
        assert_eq!(client.stats().errors(RpcErrorKind::MalformedResponse), 1);
    }

    #[tokio::test]
    async fn wrong_shape_is_malformed_and_counted() {
        let transport = ScriptedTransport::new();
        transport.respond("system_health", json!({"peers": "many"}));
        let client = NodeClient::new(transport);

        let err = client.health().await.unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::MalformedResponse);

        let stats = client.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.total_errors(), 1);
    }

    #[tokio::test]
    async fn transport_errors_are_counted_by_kind() {
        let transport = ScriptedTransport::new();
        transport.fail("system_health", RpcError::Timeout);
        transport.fail("author_pendingExtrinsics", RpcError::ConnectionRefused);
        let client = NodeClient::new(transport);

        assert_eq!(client.health().await.unwrap_err(), RpcError::Timeout);
        assert_eq!(
            client.pending_extrinsics().await.unwrap_err(),
            RpcError::ConnectionRefused
        );

        let stats = client.stats();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.errors(RpcErrorKind::Timeout), 1);
        assert_eq!(stats.errors(RpcErrorKind::ConnectionRefused), 1);
        assert_eq!(stats.errors(RpcErrorKind::NodeError), 0);
    }

    #[tokio::test]
    async fn system_info_combines_three_calls() {
        let transport = ScriptedTransport::new();
        transport.respond("system_name", json!("Parity Polkadot"));
        transport.respond("system_version", json!("1.2.0"));
        transport.respond("system_chain", json!("Polkadot"));
        let client = NodeClient::new(transport);

        let info = client.system_info().await.unwrap();
        assert_eq!(info.name, "Parity Polkadot");
        assert_eq!(info.chain, "Polkadot");
        assert_eq!(client.stats().calls, 3);
    }
}
