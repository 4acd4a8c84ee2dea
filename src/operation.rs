//! Tracking of a single server-side operation.
//!
//! An [`Operation`] wraps the snapshot returned by a state-changing
//! request and turns the best-effort shared event stream into a reliable
//! "wait until this job finishes" primitive: waiting, handler
//! registration, cancellation, and refresh, all safe to use from multiple
//! tasks at once.
//!
//! # Subscription
//!
//! The event subscription is established lazily by the first wait or
//! handler registration, exactly once, behind an async latch. Setup
//! registers an id-filtered updater on the shared listener, spawns a
//! watcher that converts listener death into a terminal error, and then
//! performs one refresh to close the race with a job that finished before
//! the subscription was wired up. Events are delivered best-effort, so
//! that confirmation step is required for correctness, not an
//! optimization.
//!
//! # Terminal state
//!
//! The outcome is recorded at most once under the state lock; the
//! terminal signal fires only after the outcome is recorded, and every
//! later event or refresh result for the operation is ignored.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::listener::HandlerId;
use crate::events::manager::{EventListenerManager, ListenerHandle};
use crate::transport::RemoteServer;
use crate::types::{EventKind, OperationSnapshot};

/// Listener pieces owned by an operation, torn down on terminal state.
struct Subscription {
    handle: ListenerHandle,
    updater: Option<HandlerId>,
    user_handlers: Vec<HandlerId>,
}

struct OperationState {
    snapshot: OperationSnapshot,
    /// Recorded at most once; `done` fires only after this is set.
    outcome: Option<Result<()>>,
    subscription: Option<Subscription>,
}

pub(crate) struct OperationInner {
    server: Arc<dyn RemoteServer>,
    listeners: Arc<EventListenerManager>,
    state: Mutex<OperationState>,
    /// Latch for the lazily-established subscription: idempotent, held
    /// across the async setup so concurrent first callers serialize.
    setup: tokio::sync::Mutex<bool>,
    /// Terminal signal, cancelled exactly once.
    done: CancellationToken,
    poll_interval: Duration,
}

/// One asynchronous server job.
///
/// Cloning shares the same tracked state; all clones observe the same
/// terminal outcome.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationInner>,
}

impl Operation {
    pub(crate) fn new(
        server: Arc<dyn RemoteServer>,
        listeners: Arc<EventListenerManager>,
        snapshot: OperationSnapshot,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(OperationInner {
                server,
                listeners,
                state: Mutex::new(OperationState {
                    snapshot,
                    outcome: None,
                    subscription: None,
                }),
                setup: tokio::sync::Mutex::new(false),
                done: CancellationToken::new(),
                poll_interval,
            }),
        }
    }

    /// Stores a speculatively opened listener lease for the subscription
    /// to pick up, avoiding a second stream when one is already at hand.
    pub(crate) fn preset_listener(&self, handle: ListenerHandle) {
        let mut state = self.inner.state.lock();
        if state.outcome.is_some() || state.subscription.is_some() {
            drop(state);
            handle.release();
            return;
        }

        state.subscription = Some(Subscription {
            handle,
            updater: None,
            user_handlers: Vec::new(),
        });
    }

    /// The operation's unique identifier.
    pub fn id(&self) -> String {
        self.inner.state.lock().snapshot.id.clone()
    }

    /// The last known snapshot of the operation.
    pub fn get(&self) -> OperationSnapshot {
        self.inner.state.lock().snapshot.clone()
    }

    /// Blocks until the operation reaches a terminal state.
    ///
    /// Returns immediately once terminal; every subsequent call returns
    /// the same result without re-blocking.
    ///
    /// # Errors
    ///
    /// - [`Error::OperationFailed`] when the server marked the operation
    ///   failed or cancelled; the failure detail is surfaced verbatim.
    /// - [`Error::StreamClosed`] when the event stream died before the
    ///   operation's terminal event arrived.
    /// - Transport errors from subscription setup or polling.
    pub async fn wait(&self) -> Result<()> {
        if let Some(result) = self.inner.outcome() {
            return result;
        }

        if !self.inner.server.supports_events() {
            return self.wait_polling().await;
        }

        self.inner.ensure_subscribed().await?;
        self.inner.done.cancelled().await;
        self.inner.outcome().unwrap_or(Ok(()))
    }

    /// Like [`wait`](Self::wait), aborting with [`Error::Cancelled`] when
    /// `cancel` fires first. The subscription and its watcher survive the
    /// abort; a later wait resumes on the same subscription.
    pub async fn wait_with(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            result = self.wait() => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Like [`wait`](Self::wait), returning [`Error::Timeout`] when the
    /// operation is still running after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Registers `handler` to be called for every future event belonging
    /// to this operation.
    ///
    /// Returns `Ok(None)` without registering when the operation is
    /// already terminal: there is nothing left to observe.
    ///
    /// # Errors
    ///
    /// [`Error::EventsUnsupported`] when the connection has no event
    /// stream; subscription setup errors otherwise.
    pub async fn add_handler<F>(&self, handler: F) -> Result<Option<HandlerId>>
    where
        F: Fn(&OperationSnapshot) + Send + Sync + 'static,
    {
        if !self.inner.server.supports_events() {
            return Err(Error::EventsUnsupported);
        }

        self.inner.ensure_subscribed().await?;

        let mut state = self.inner.state.lock();
        if state.outcome.is_some() {
            return Ok(None);
        }

        let op_id = state.snapshot.id.clone();
        let Some(subscription) = state.subscription.as_mut() else {
            // Subscription torn down between the terminal check and here.
            return Ok(None);
        };

        let id = subscription
            .handle
            .add_handler(&[EventKind::Operation], move |event| {
                let Some(snapshot) = event.operation() else {
                    return;
                };
                if snapshot.id == op_id {
                    handler(&snapshot);
                }
            })?;

        subscription.user_handlers.push(id);
        Ok(Some(id))
    }

    /// Unregisters a handler added with [`add_handler`](Self::add_handler).
    /// A no-op when the subscription has already been torn down.
    pub fn remove_handler(&self, id: HandlerId) -> Result<()> {
        let mut state = self.inner.state.lock();
        let Some(subscription) = state.subscription.as_mut() else {
            return Ok(());
        };

        subscription.handle.remove_handler(id)?;
        subscription.user_handlers.retain(|handler| *handler != id);
        Ok(())
    }

    /// Requests server-side cancellation.
    ///
    /// Local state is not touched: the terminal transition still arrives
    /// through the event path or a subsequent refresh.
    pub async fn cancel(&self) -> Result<()> {
        let id = self.id();
        self.inner.server.cancel_operation(&id).await
    }

    /// Fetches the current server-side state and overwrites the local
    /// snapshot. Updates after a recorded terminal state are ignored.
    pub async fn refresh(&self) -> Result<()> {
        let id = self.id();
        let snapshot = self.inner.server.fetch_operation(&id).await?;
        self.inner.apply_snapshot(snapshot);
        Ok(())
    }

    async fn wait_polling(&self) -> Result<()> {
        loop {
            if let Some(result) = self.inner.outcome() {
                return result;
            }

            self.refresh().await?;
            if let Some(result) = self.inner.outcome() {
                return result;
            }

            tokio::time::sleep(self.inner.poll_interval).await;
        }
    }
}

impl OperationInner {
    fn outcome(&self) -> Option<Result<()>> {
        self.state.lock().outcome.clone()
    }

    /// Applies a snapshot from the event path or a refresh. Reaching a
    /// terminal state records the outcome, tears the subscription down,
    /// and fires the terminal signal.
    fn apply_snapshot(&self, snapshot: OperationSnapshot) {
        let subscription = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return;
            }
            if snapshot.id != state.snapshot.id {
                return;
            }

            tracing::trace!(id = %snapshot.id, status = %snapshot.status, "operation update");
            state.snapshot = snapshot;

            match state.snapshot.outcome() {
                Some(result) => {
                    state.outcome = Some(result);
                    state.subscription.take()
                },
                None => return,
            }
        };

        self.finish(subscription);
    }

    /// Records a synthesized failure (stream loss, setup failure) unless
    /// an outcome has already been recorded.
    fn fail(&self, error: Error) {
        let subscription = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return;
            }

            tracing::debug!(id = %state.snapshot.id, error = %error, "operation wait failed");
            state.outcome = Some(Err(error));
            state.subscription.take()
        };

        self.finish(subscription);
    }

    /// Releases the listener pieces and fires the terminal signal. Called
    /// outside the state lock.
    fn finish(&self, subscription: Option<Subscription>) {
        if let Some(subscription) = subscription {
            if let Some(id) = subscription.updater {
                let _ = subscription.handle.remove_handler(id);
            }
            for id in subscription.user_handlers {
                let _ = subscription.handle.remove_handler(id);
            }
            subscription.handle.release();
        }

        self.done.cancel();
    }

    /// Establishes the listener subscription exactly once.
    ///
    /// Failures before the subscription is wired leave the latch open so
    /// the next caller can retry; a failure of the race-closing refresh is
    /// recorded as the terminal outcome, matching what a waiter would
    /// observe.
    async fn ensure_subscribed(self: &Arc<Self>) -> Result<()> {
        let mut ready = self.setup.lock().await;
        if *ready {
            return Ok(());
        }

        if self.state.lock().outcome.is_some() {
            *ready = true;
            return Ok(());
        }

        // Reuse the speculative listener when one is alive.
        let preset = {
            let mut state = self.state.lock();
            state.subscription.take().map(|s| s.handle)
        };
        let handle = match preset {
            Some(handle) if handle.is_active() => handle,
            stale => {
                if let Some(handle) = stale {
                    handle.release();
                }
                self.listeners.get().await?
            },
        };

        let closed = handle.closed();
        let listener = handle.listener().clone();
        let op_id = self.state.lock().snapshot.id.clone();

        // Filtered updater: matching events drive the state machine.
        let updater = {
            let weak = Arc::downgrade(self);
            let op_id = op_id.clone();
            handle.add_handler(&[EventKind::Operation], move |event| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let Some(snapshot) = event.operation() else {
                    return;
                };
                if snapshot.id == op_id {
                    inner.apply_snapshot(snapshot);
                }
            })
        };
        let updater = match updater {
            Ok(id) => id,
            Err(err) => {
                // The listener closed under us; retry on the next call.
                handle.release();
                return Err(err);
            },
        };

        {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                // A terminal event won the race before the subscription
                // was stored; give the lease straight back.
                drop(state);
                let _ = handle.remove_handler(updater);
                handle.release();
                *ready = true;
                return Ok(());
            }

            state.subscription = Some(Subscription {
                handle,
                updater: Some(updater),
                user_handlers: Vec::new(),
            });
        }

        // Watcher: the stream dying before our terminal event arrives is a
        // terminal error. It self-terminates once the operation is done.
        {
            let weak = Arc::downgrade(self);
            let done = self.done.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = done.cancelled() => {},
                    _ = closed.cancelled() => {
                        if let Some(inner) = weak.upgrade() {
                            let reason = listener
                                .close_reason()
                                .unwrap_or_else(|| "event stream closed".to_string());
                            inner.fail(Error::StreamClosed { reason });
                        }
                    },
                }
            });
        }

        // Race-closing refresh: the job may have finished before the
        // updater was registered.
        match self.server.fetch_operation(&op_id).await {
            Ok(snapshot) => self.apply_snapshot(snapshot),
            Err(err) => {
                self.fail(err.clone());
                *ready = true;
                return Err(err);
            },
        }

        *ready = true;
        Ok(())
    }
}

impl Drop for OperationInner {
    fn drop(&mut self) {
        // An abandoned operation must not keep the shared stream alive.
        let subscription = self.state.get_mut().subscription.take();
        if let Some(subscription) = subscription {
            if let Some(id) = subscription.updater {
                let _ = subscription.handle.remove_handler(id);
            }
            for id in subscription.user_handlers {
                let _ = subscription.handle.remove_handler(id);
            }
            subscription.handle.release();
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Operation")
            .field("id", &state.snapshot.id)
            .field("status", &state.snapshot.status)
            .field("terminal", &state.outcome.is_some())
            .finish()
    }
}
