//! Multiplexing event listener.
//!
//! An [`EventListener`] exclusively owns one [`EventStream`] connection and
//! fans incoming events out to any number of registered handlers, each
//! filtered by event kind. Handlers register and remove themselves
//! independently, concurrently with event delivery.
//!
//! # Concurrency
//!
//! One mutex guards the combined handler-list / closed-reason / lease
//! state; every registration, removal, and terminal-marking path takes it.
//! The closed *signal* is a [`CancellationToken`] cancelled exactly once,
//! after the reason has been recorded, so waiters observing the signal
//! always see the reason. Dispatch collects matching handlers under the
//! lock but invokes them outside it, so a handler may re-enter
//! `add_handler` / `remove_handler` / `disconnect` without deadlocking the
//! stream reader.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transport::EventStream;
use crate::types::{Event, EventKind};

/// Reason recorded when a listener shuts itself down on caller request.
pub(crate) const DISCONNECT_REASON: &str = "listener disconnected";

/// Opaque registration token returned by
/// [`add_handler`](EventListener::add_handler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

type HandlerFn = Arc<dyn Fn(&Event) + Send + Sync>;

struct HandlerEntry {
    id: HandlerId,
    kinds: Vec<EventKind>,
    callback: HandlerFn,
}

struct ListenerState {
    /// Registration order is delivery order.
    handlers: Vec<HandlerEntry>,
    /// `Some(reason)` once the listener has closed.
    closed: Option<String>,
    /// Outstanding manager-issued leases; the last release disconnects.
    leases: usize,
}

struct ListenerInner {
    state: Mutex<ListenerState>,
    closed_signal: CancellationToken,
}

impl ListenerInner {
    /// Marks the listener closed exactly once, dropping all handlers, then
    /// fires the closed signal.
    fn close(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return;
            }

            state.closed = Some(reason.to_string());
            state.handlers.clear();
        }

        self.closed_signal.cancel();
        tracing::debug!(reason, "event listener closed");
    }

    fn dispatch(&self, event: &Event) {
        let matching: Vec<HandlerFn> = {
            let state = self.state.lock();
            state
                .handlers
                .iter()
                .filter(|entry| entry.kinds.contains(&event.kind))
                .map(|entry| entry.callback.clone())
                .collect()
        };

        tracing::trace!(kind = %event.kind, handlers = matching.len(), "dispatching event");

        // Invoked outside the lock: handlers may re-enter the registry,
        // and a close triggered mid-batch must not cut the batch short.
        for callback in matching {
            callback(event);
        }
    }
}

/// Fan-out over one event stream connection.
///
/// Cloning shares the same underlying listener; the connection closes when
/// [`disconnect`](Self::disconnect) is called, when the stream ends, or
/// when the last manager-issued lease is released.
#[derive(Clone)]
pub struct EventListener {
    inner: Arc<ListenerInner>,
}

impl EventListener {
    /// Takes ownership of `stream` and spawns the reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(mut stream: Box<dyn EventStream>) -> Self {
        let listener = Self {
            inner: Arc::new(ListenerInner {
                state: Mutex::new(ListenerState {
                    handlers: Vec::new(),
                    closed: None,
                    leases: 0,
                }),
                closed_signal: CancellationToken::new(),
            }),
        };

        let inner = listener.inner.clone();
        let stop = listener.inner.closed_signal.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    next = stream.next_event() => match next {
                        Ok(Some(event)) => inner.dispatch(&event),
                        Ok(None) => {
                            inner.close("event stream ended");
                            break;
                        },
                        Err(err) => {
                            inner.close(&err.to_string());
                            break;
                        },
                    },
                }
            }

            if let Err(err) = stream.close().await {
                tracing::debug!(error = %err, "error closing event stream");
            }
        });

        listener
    }

    /// Registers `callback` for every future event whose kind is in
    /// `kinds`, in registration order relative to other handlers.
    ///
    /// # Errors
    ///
    /// [`Error::ListenerClosed`] if the stream has already closed.
    pub fn add_handler<F>(&self, kinds: &[EventKind], callback: F) -> Result<HandlerId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.closed.is_some() {
            return Err(Error::ListenerClosed);
        }

        let id = HandlerId::new();
        state.handlers.push(HandlerEntry {
            id,
            kinds: kinds.to_vec(),
            callback: Arc::new(callback),
        });
        Ok(id)
    }

    /// Unregisters a handler.
    ///
    /// A no-op once the listener has closed (teardown already released all
    /// handlers).
    ///
    /// # Errors
    ///
    /// [`Error::HandlerNotFound`] if the listener is open and no handler
    /// with this id is registered.
    pub fn remove_handler(&self, id: HandlerId) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.closed.is_some() {
            return Ok(());
        }

        let before = state.handlers.len();
        state.handlers.retain(|entry| entry.id != id);
        if state.handlers.len() == before {
            return Err(Error::HandlerNotFound);
        }

        Ok(())
    }

    /// Closes the underlying stream and fires the closed signal.
    ///
    /// Idempotent: safe to call multiple times and concurrently with a
    /// stream-driven closure.
    pub fn disconnect(&self) {
        self.inner.close(DISCONNECT_REASON);
    }

    /// Returns `true` while the stream is open.
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().closed.is_none()
    }

    /// The reason the listener closed, if it has.
    pub fn close_reason(&self) -> Option<String> {
        self.inner.state.lock().closed.clone()
    }

    /// A token cancelled exactly once when the listener closes.
    pub fn closed(&self) -> CancellationToken {
        self.inner.closed_signal.clone()
    }

    /// Waits until the listener closes and returns the recorded reason.
    pub async fn wait_closed(&self) -> String {
        self.inner.closed_signal.cancelled().await;
        self.close_reason().unwrap_or_default()
    }

    /// Takes a lease on this listener. Returns `false` if it has already
    /// closed, in which case the caller must obtain a fresh listener.
    pub(crate) fn attach(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed.is_some() {
            return false;
        }

        state.leases += 1;
        true
    }

    /// Releases a lease. Disconnects when the last lease goes away.
    pub(crate) fn detach(&self) {
        let close_now = {
            let mut state = self.inner.state.lock();
            if state.closed.is_some() {
                false
            } else {
                state.leases = state.leases.saturating_sub(1);
                state.leases == 0
            }
        };

        if close_now {
            self.inner.close(DISCONNECT_REASON);
        }
    }
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("EventListener")
            .field("handlers", &state.handlers.len())
            .field("closed", &state.closed)
            .field("leases", &state.leases)
            .finish()
    }
}
