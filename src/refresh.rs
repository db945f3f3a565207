//! Single-flight refresh coordination.
//!
//! Without coordination, N concurrent requests that each observe an
//! expired token would each fire their own refresh call, racing to
//! overwrite the refresh token and producing inconsistent session state.
//! The coordinator makes refresh at-most-once-per-expiry-window: the
//! first caller runs the network call, everyone else awaits the shared
//! outcome, and requests that failed mid-refresh are queued and replayed
//! when it settles.
//!
//! State is a plain mutex held only for state flips, never across an
//! await; the shared outcome travels over a `watch` channel and each
//! queued request settles over its own `oneshot`.

use std::future::Future;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::error::AuthFault;

/// Outcome of a refresh: the new access token, or the fault every waiter
/// shares.
pub type RefreshOutcome = Result<String, AuthFault>;

/// Result routed to a queued request when its replay settles.
pub type ReplayResult = Result<serde_json::Value, AuthFault>;

type RetryFn = Box<dyn FnOnce() -> BoxFuture<'static, ReplayResult> + Send>;

/// A caller's deferred HTTP call: the replay closure plus the channel its
/// settlement is delivered on. Consumed exactly once.
struct PendingRequest {
    retry: RetryFn,
    done: oneshot::Sender<ReplayResult>,
}

enum RefreshState {
    Idle,
    /// Carries the shared in-flight outcome every concurrent caller awaits.
    Refreshing(watch::Receiver<Option<RefreshOutcome>>),
}

struct Inner {
    state: RefreshState,
    queue: Vec<PendingRequest>,
    /// Incremented per refresh so a stale settlement cannot stomp state
    /// after a `clear()`.
    epoch: u64,
}

pub struct RefreshCoordinator {
    inner: Mutex<Inner>,
}

enum Role {
    Owner {
        tx: watch::Sender<Option<RefreshOutcome>>,
        epoch: u64,
    },
    Joiner(watch::Receiver<Option<RefreshOutcome>>),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RefreshState::Idle,
                queue: Vec::new(),
                epoch: 0,
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(
            self.inner.lock().unwrap().state,
            RefreshState::Refreshing(_)
        )
    }

    /// Run `refresh_fn` single-flight. If a refresh is already in flight
    /// the existing shared outcome is returned and `refresh_fn` is never
    /// invoked. On settlement the queue is taken and state reset to
    /// `Idle` *before* any draining side effect, so a failure while
    /// replaying cannot wedge the coordinator.
    pub async fn start_refresh<F, Fut>(&self, refresh_fn: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let role = {
            let mut inner = self.inner.lock().unwrap();
            match &inner.state {
                RefreshState::Refreshing(rx) => Role::Joiner(rx.clone()),
                RefreshState::Idle => {
                    let (tx, rx) = watch::channel(None);
                    inner.state = RefreshState::Refreshing(rx);
                    inner.epoch += 1;
                    Role::Owner {
                        tx,
                        epoch: inner.epoch,
                    }
                }
            }
        };

        match role {
            Role::Joiner(rx) => self.join(rx).await,
            Role::Owner { tx, epoch } => {
                debug!("starting token refresh");
                let outcome = refresh_fn().await;

                let drained = {
                    let mut inner = self.inner.lock().unwrap();
                    if inner.epoch == epoch {
                        inner.state = RefreshState::Idle;
                        std::mem::take(&mut inner.queue)
                    } else {
                        // A clear() superseded this refresh; its queue is
                        // already settled.
                        Vec::new()
                    }
                };
                let _ = tx.send(Some(outcome.clone()));

                match &outcome {
                    Ok(_) => {
                        debug!(queued = drained.len(), "refresh succeeded, replaying queue");
                        for pending in drained {
                            let result = (pending.retry)().await;
                            let _ = pending.done.send(result);
                        }
                    }
                    Err(fault) => {
                        warn!(queued = drained.len(), fault = %fault, "refresh failed, rejecting queue");
                        for pending in drained {
                            let _ = pending.done.send(Err(fault.clone()));
                        }
                    }
                }

                outcome
            }
        }
    }

    /// Await the outcome of the refresh already in flight.
    async fn join(&self, mut rx: watch::Receiver<Option<RefreshOutcome>>) -> RefreshOutcome {
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // The owning task was dropped before settling. Restore
                // Idle so the next refresh can start, and reject anything
                // still queued.
                let fault = AuthFault::Unknown {
                    message: "refresh abandoned before settling".into(),
                };
                let drained = {
                    let mut inner = self.inner.lock().unwrap();
                    if matches!(inner.state, RefreshState::Refreshing(_)) {
                        inner.state = RefreshState::Idle;
                        std::mem::take(&mut inner.queue)
                    } else {
                        Vec::new()
                    }
                };
                warn!(queued = drained.len(), "refresh owner dropped mid-flight");
                for pending in drained {
                    let _ = pending.done.send(Err(fault.clone()));
                }
                return Err(fault);
            }
        }
    }

    /// Defer a request until the current refresh settles. The returned
    /// receiver resolves with the replay's outcome on success, or with
    /// the refresh fault on failure. Only meaningful while a refresh is
    /// in flight; entries queued while idle sit until the next settlement
    /// or `clear()`.
    pub fn queue_request<F>(&self, retry: F) -> oneshot::Receiver<ReplayResult>
    where
        F: FnOnce() -> BoxFuture<'static, ReplayResult> + Send + 'static,
    {
        let (done, rx) = oneshot::channel();
        self.inner.lock().unwrap().queue.push(PendingRequest {
            retry: Box::new(retry),
            done,
        });
        rx
    }

    /// Reject everything queued and force `Idle`. Used on logout and
    /// session teardown so no stale request resolves against a torn-down
    /// session.
    pub fn clear(&self) {
        let drained = {
            let mut inner = self.inner.lock().unwrap();
            inner.state = RefreshState::Idle;
            std::mem::take(&mut inner.queue)
        };
        if !drained.is_empty() {
            debug!(queued = drained.len(), "clearing refresh queue");
        }
        let fault = AuthFault::Unknown {
            message: "refresh coordinator cleared".into(),
        };
        for pending in drained {
            let _ = pending.done.send(Err(fault.clone()));
        }
    }
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
