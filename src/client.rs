//! Client facade tying the collaborator, the listener manager, and
//! operation construction together.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::events::manager::{EventListenerManager, ListenerHandle};
use crate::operation::Operation;
use crate::transport::RemoteServer;
use crate::types::OperationSnapshot;

/// Poll interval used when the connection has no event stream.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Entry point for tracking operations on one server connection.
///
/// The client owns the shared [`EventListenerManager`] so that every
/// operation it constructs observes the same event stream instead of each
/// opening its own.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use opstream::{Client, OperationSnapshot, RemoteServer};
///
/// # async fn demo(server: Arc<dyn RemoteServer>, snapshot: OperationSnapshot) -> opstream::Result<()> {
/// let client = Client::new(server);
/// let operation = client.operation_with_events(snapshot).await;
/// operation.wait().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    server: Arc<dyn RemoteServer>,
    listeners: Arc<EventListenerManager>,
    poll_interval: Duration,
}

impl Client {
    /// Creates a client over the given collaborator.
    pub fn new(server: Arc<dyn RemoteServer>) -> Self {
        let listeners = Arc::new(EventListenerManager::new(server.clone()));
        Self {
            server,
            listeners,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the poll interval used by waits when the connection has no
    /// event stream.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The collaborator this client talks to.
    pub fn server(&self) -> &Arc<dyn RemoteServer> {
        &self.server
    }

    /// Returns a lease on the connection's event listener, for callers
    /// that want to observe the raw feed.
    pub async fn events(&self) -> Result<ListenerHandle> {
        self.listeners.get().await
    }

    /// Wraps an operation snapshot returned by a state-changing request.
    ///
    /// The event subscription is established lazily by the first wait or
    /// handler registration.
    pub fn operation(&self, snapshot: OperationSnapshot) -> Operation {
        Operation::new(
            self.server.clone(),
            self.listeners.clone(),
            snapshot,
            self.poll_interval,
        )
    }

    /// Wraps an operation snapshot and speculatively opens the event
    /// listener right away, closing the window in which a fast job could
    /// finish unobserved.
    ///
    /// A listener failure here is not fatal: it is logged and the
    /// operation falls back to subscribing at wait time (or to polling
    /// when the connection has no event stream at all).
    pub async fn operation_with_events(&self, snapshot: OperationSnapshot) -> Operation {
        let operation = self.operation(snapshot);

        if self.server.supports_events() {
            match self.listeners.get().await {
                Ok(handle) => operation.preset_listener(handle),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "speculative event listener failed; falling back to on-demand subscription"
                    );
                },
            }
        }

        operation
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
