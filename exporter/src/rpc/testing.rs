//! In-memory [`RpcTransport`] with scripted replies.
//!
//! Used by the unit and integration tests to stand in for a node. Replies
//! are keyed by method and, optionally, by exact params; an exact match wins
//! over a method-wide reply. The transport can also add latency or hold
//! every call at a gate until it is released, which is how tests keep a
//! poll in flight on purpose.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use super::RpcTransport;
use super::error::RpcError;

#[derive(Clone, Debug)]
enum Reply {
    Value(Value),
    Error(RpcError),
}

#[derive(Default)]
struct Script {
    by_method: HashMap<String, Reply>,
    by_params: HashMap<(String, String), Reply>,
    latency: Option<Duration>,
}

struct Inner {
    script: Mutex<Script>,
    gate: watch::Sender<bool>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

/// Cloneable handle to a scripted node. All clones share one script.
#[derive(Clone)]
pub struct ScriptedTransport {
    inner: Arc<Inner>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(Script::default()),
                gate,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        // A panicking test thread must not take the rest of the script down with it.
        self.inner
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answers every call to `method` with `result`.
    pub fn respond(&self, method: &str, result: Value) {
        self.script()
            .by_method
            .insert(method.to_string(), Reply::Value(result));
    }

    /// Answers calls to `method` with exactly `params` with `result`.
    pub fn respond_to(&self, method: &str, params: Value, result: Value) {
        self.script()
            .by_params
            .insert((method.to_string(), params.to_string()), Reply::Value(result));
    }

    /// Fails every call to `method` with `err`.
    pub fn fail(&self, method: &str, err: RpcError) {
        self.script()
            .by_method
            .insert(method.to_string(), Reply::Error(err));
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.script().latency = Some(latency);
    }

    /// Makes new and pending calls wait until [`ScriptedTransport::release`].
    pub fn hold(&self) {
        self.inner.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.inner.gate.send_replace(true);
    }

    /// Calls currently inside `fetch`.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were ever inside `fetch` at once.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Total number of calls made so far.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, method: &str, params: &Value) -> (Option<Reply>, Option<Duration>) {
        let script = self.script();
        let reply = script
            .by_params
            .get(&(method.to_string(), params.to_string()))
            .or_else(|| script.by_method.get(method))
            .cloned();
        (reply, script.latency)
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn fetch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.inner.in_flight);

        let mut gate = self.inner.gate.subscribe();
        // The sender lives in `inner`, so the channel cannot close under us.
        let _ = gate.wait_for(|open| *open).await;

        let (reply, latency) = self.lookup(method, &params);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match reply {
            Some(Reply::Value(v)) => Ok(v),
            Some(Reply::Error(e)) => Err(e),
            None => Err(RpcError::NodeError {
                code: -32601,
                message: format!("Method not found: {method}"),
            }),
        }
    }
}
