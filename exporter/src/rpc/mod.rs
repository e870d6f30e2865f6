//! JSON-RPC client for the Polkadot node.
//!
//! Two layers:
//!
//! - [`RpcTransport`]: one raw call, `method + params -> result`, with the
//!   per-call timeout and error classification. [`HttpTransport`] is the
//!   production implementation.
//! - [`NodeClient`]: typed node API (best block, health, finality, ...)
//!   that validates response shapes and keeps call statistics.
//!
//! Neither layer retries; retry policy belongs to the poller.

pub mod error;
pub mod http;
pub mod node;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

pub use error::{RpcError, RpcErrorKind};
pub use http::HttpTransport;
pub use node::{NodeClient, RpcCounts};
pub use types::{BlockHash, NodeHealth, RuntimeVersion, SignedBlock, SystemInfo};

/// A single JSON-RPC round trip.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Calls `method` with `params` and returns the `result` member.
    async fn fetch(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}
