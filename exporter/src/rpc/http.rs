//! HTTP JSON-RPC transport.
//!
//! Each call is a single `POST` to the configured node URL:
//!
//! ```json
//! { "jsonrpc": "2.0", "method": "system_health", "params": [], "id": 7 }
//! ```
//!
//! and the node answers with either
//!
//! ```json
//! { "jsonrpc": "2.0", "id": 7, "result": { ... } }
//! ```
//!
//! or an `error` object carrying a code and a message.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::RpcTransport;
use super::error::RpcError;

/// JSON-RPC transport over HTTP(S).
///
/// Holds one pooled `reqwest` client, so connections to the node are reused
/// between polls. The only other state is the request id counter.
pub struct HttpTransport {
    url: String,
    client: Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Builds a transport for `url` where every call is bounded by `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<Value>,
    /// `Some(Value::Null)` for `"result": null`, `None` when the member is absent.
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Turns a decoded envelope into the `result` value or an [`RpcError`].
fn unpack_response(resp: RpcResponse, expected_id: u64) -> Result<Value, RpcError> {
    if let Some(err) = resp.error {
        return Err(RpcError::NodeError {
            code: err.code,
            message: err.message,
        });
    }

    match resp.id {
        Some(Value::Number(n)) if n.as_u64() == Some(expected_id) => {}
        other => {
            return Err(RpcError::malformed(format!(
                "response id {other:?} does not match request id {expected_id}"
            )));
        }
    }

    // A `null` result is legitimate (e.g. unknown block hash), a missing one is not.
    resp.result
        .ok_or_else(|| RpcError::malformed("response has neither result nor error"))
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn fetch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req_body = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        let resp = self.client.post(&self.url).json(&req_body).send().await?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(RpcError::HttpStatus(status.as_u16()));
        }

        let bytes = resp.bytes().await?;
        let body: RpcResponse = serde_json::from_slice(&bytes)
            .map_err(|e| RpcError::malformed(format!("invalid JSON-RPC envelope: {e}")))?;

        unpack_response(body, id)
    }
}
