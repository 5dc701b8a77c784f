//! Request correlation
//!
//! Every outbound `request` registers here before it is sent. The table
//! guarantees exactly one terminal transition per registered id: either the
//! matching `response` settles the entry (timer aborted, waiter resolved) or
//! the timeout fires first (entry removed, waiter resolved with
//! [`RequestTimeout`]). Whichever side loses the race finds the entry gone
//! and does nothing.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::envelope::Envelope;

/// A registered request expired before its response arrived
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Request '{name}' to peer '{peer}' timed out after {timeout_ms} ms (id: {id})")]
pub struct RequestTimeout {
    pub id: String,
    pub name: String,
    pub peer: String,
    pub timeout_ms: u64,
}

/// What a waiter eventually receives
pub type ResponseResult = std::result::Result<Envelope, RequestTimeout>;

struct Pending {
    reply: oneshot::Sender<ResponseResult>,
    timer: tokio::task::JoinHandle<()>,
}

/// Outstanding requests awaiting responses
///
/// Cheap to clone; all clones share one table. Requires a tokio runtime for
/// the per-request timeout tasks.
#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<String, Pending>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outstanding request and receive the waiter half
    ///
    /// The returned receiver resolves with the response envelope or with a
    /// [`RequestTimeout`] after `timeout`, never both.
    pub fn register(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        peer: impl Into<String>,
        timeout: Duration,
    ) -> oneshot::Receiver<ResponseResult> {
        let id = id.into();
        let name = name.into();
        let peer = peer.into();
        let (reply_tx, reply_rx) = oneshot::channel();

        let timer = {
            let table = Arc::clone(&self.inner);
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(pending) = table.lock().remove(&id) {
                    let _ = pending.reply.send(Err(RequestTimeout {
                        id,
                        name,
                        peer,
                        timeout_ms: timeout.as_millis() as u64,
                    }));
                }
            })
        };

        self.inner.lock().insert(
            id,
            Pending {
                reply: reply_tx,
                timer,
            },
        );
        reply_rx
    }

    /// Deliver a response to its waiter
    ///
    /// Returns false when no request with this id is outstanding (already
    /// settled, timed out, or never registered) — the response is then an
    /// ordinary inbound message for the caller to route.
    pub fn settle(&self, id: &str, response: Envelope) -> bool {
        match self.inner.lock().remove(id) {
            Some(pending) => {
                pending.timer.abort();
                let _ = pending.reply.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Withdraw a registration without resolving it, e.g. when the request
    /// could not be sent at all; the waiter observes a closed channel
    pub fn cancel(&self, id: &str) -> bool {
        match self.inner.lock().remove(id) {
            Some(pending) => {
                pending.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every outstanding entry; waiters observe a closed channel
    pub fn abandon_all(&self) {
        for (_, pending) in self.inner.lock().drain() {
            pending.timer.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
