//! Request/response correlation for concurrent JSON-RPC traffic.
//!
//! Every outbound request registers a oneshot slot keyed by its id.
//! The transport's read loop settles responses by id, so replies may
//! arrive in any order while each caller still gets exactly its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::protocol::JsonRpcResponse;

/// Allocates request ids and routes responses back to their callers.
///
/// Ids are monotonically increasing and never reused within one
/// correlator. The pending map is only ever touched briefly, so a
/// synchronous lock is fine in async context.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh request id without registering a pending slot.
    ///
    /// Used for best-effort requests whose response we never wait for;
    /// any reply that does come back is dropped as unmatched.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Allocate an id and register a slot for its response.
    pub fn register(&self) -> (u64, oneshot::Receiver<JsonRpcResponse>) {
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        (id, rx)
    }

    /// Deliver a response to whoever is waiting on its id.
    ///
    /// Returns `false` when no request is waiting: an unknown id, a
    /// duplicate reply, or a response that arrived after a timeout.
    pub fn settle(&self, response: JsonRpcResponse) -> bool {
        let Some(tx) = self.pending.lock().remove(&response.id) else {
            return false;
        };
        // The caller may have given up between removal and send; that
        // counts as settled either way.
        let _ = tx.send(response);
        true
    }

    /// Drop the pending slot for `id`, if still present.
    ///
    /// Called when a request times out so a late reply is no longer
    /// correlated.
    pub fn forget(&self, id: u64) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    /// Fail every in-flight request by dropping its sender.
    ///
    /// Each waiting caller observes a closed channel. Returns how many
    /// requests were aborted.
    pub fn abort_all(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
