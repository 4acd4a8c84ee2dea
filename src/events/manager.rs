//! Lazy, shared access to the event listener for a logical connection.
//!
//! Every operation that needs to observe events asks the
//! [`EventListenerManager`] for a listener instead of opening its own
//! stream. The manager keeps at most one live listener, reuses it while it
//! is alive, and transparently opens a fresh stream once a previous one
//! has closed.
//!
//! Sharing is explicit: [`get`](EventListenerManager::get) returns a
//! [`ListenerHandle`] lease. The lease count lives inside the listener's
//! own state lock, and releasing the last lease disconnects the underlying
//! stream deterministically, so the connection closes as soon as nothing
//! needs it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::listener::{EventListener, HandlerId};
use crate::transport::RemoteServer;
use crate::types::{Event, EventKind};

/// A lease on a shared [`EventListener`].
///
/// Handler registration and closed-signal access delegate to the shared
/// listener. [`release`](Self::release) gives the lease back; releasing
/// the last lease disconnects the stream. Dropping the handle releases it
/// as well, so an abandoned lease cannot keep the connection open.
pub struct ListenerHandle {
    listener: EventListener,
    released: AtomicBool,
}

impl ListenerHandle {
    pub(crate) fn new(listener: EventListener) -> Self {
        Self {
            listener,
            released: AtomicBool::new(false),
        }
    }

    /// Registers a handler on the shared listener.
    ///
    /// # Errors
    ///
    /// [`crate::Error::ListenerClosed`] once the stream has closed.
    pub fn add_handler<F>(&self, kinds: &[EventKind], callback: F) -> Result<HandlerId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listener.add_handler(kinds, callback)
    }

    /// Unregisters a handler; a no-op once the stream has closed.
    pub fn remove_handler(&self, id: HandlerId) -> Result<()> {
        self.listener.remove_handler(id)
    }

    /// Returns `true` while the shared listener's stream is open.
    pub fn is_active(&self) -> bool {
        self.listener.is_active()
    }

    /// A token cancelled exactly once when the shared listener closes.
    pub fn closed(&self) -> CancellationToken {
        self.listener.closed()
    }

    /// Waits until the shared listener closes and returns the reason.
    pub async fn wait_closed(&self) -> String {
        self.listener.wait_closed().await
    }

    /// The reason the shared listener closed, if it has.
    pub fn close_reason(&self) -> Option<String> {
        self.listener.close_reason()
    }

    /// The shared listener behind this lease. Cloning it does not extend
    /// the lease.
    pub fn listener(&self) -> &EventListener {
        &self.listener
    }

    /// Releases the lease. Idempotent per handle; the last release across
    /// all handles disconnects the underlying stream.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.listener.detach();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("listener", &self.listener)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

/// Factory handing out leases on the per-connection event listener.
pub struct EventListenerManager {
    server: Arc<dyn RemoteServer>,
    active: tokio::sync::Mutex<Option<EventListener>>,
}

impl EventListenerManager {
    /// Creates a manager opening streams through `server`.
    pub fn new(server: Arc<dyn RemoteServer>) -> Self {
        Self {
            server,
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns a lease on the live listener, opening a fresh stream when
    /// there is none or the previous one has closed.
    ///
    /// # Errors
    ///
    /// Propagates the stream-open failure from the collaborator.
    pub async fn get(&self) -> Result<ListenerHandle> {
        let mut slot = self.active.lock().await;

        if let Some(listener) = slot.as_ref() {
            if listener.attach() {
                return Ok(ListenerHandle::new(listener.clone()));
            }
        }

        tracing::debug!("opening a fresh event stream");
        let stream = self.server.open_event_stream().await?;
        let listener = EventListener::spawn(stream);
        listener.attach();
        *slot = Some(listener.clone());

        Ok(ListenerHandle::new(listener))
    }
}

impl std::fmt::Debug for EventListenerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListenerManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::transport::EventStream;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    struct IdleStream {
        rx: mpsc::UnboundedReceiver<Event>,
    }

    #[async_trait]
    impl EventStream for IdleStream {
        async fn next_event(&mut self) -> Result<Option<Event>> {
            Ok(self.rx.recv().await)
        }

        async fn close(&mut self) -> Result<()> {
            self.rx.close();
            Ok(())
        }
    }

    struct CountingServer {
        opens: AtomicUsize,
        fail: AtomicBool,
        senders: parking_lot::Mutex<Vec<mpsc::UnboundedSender<Event>>>,
    }

    impl CountingServer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                senders: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteServer for CountingServer {
        async fn open_event_stream(&self) -> Result<Box<dyn EventStream>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::transport("stream refused"));
            }

            self.opens.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().push(tx);
            Ok(Box::new(IdleStream { rx }))
        }

        async fn fetch_operation(&self, id: &str) -> Result<crate::types::OperationSnapshot> {
            Err(Error::transport(format!("operation {id} not found")))
        }

        async fn cancel_operation(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn reuses_live_listener() {
        let server = CountingServer::new();
        let manager = EventListenerManager::new(server.clone());

        let first = manager.get().await.unwrap();
        let second = manager.get().await.unwrap();

        assert_eq!(server.opens(), 1);
        first.release();
        second.release();
    }

    #[tokio::test]
    async fn last_release_disconnects_stream() {
        let server = CountingServer::new();
        let manager = EventListenerManager::new(server.clone());

        let first = manager.get().await.unwrap();
        let second = manager.get().await.unwrap();
        let listener = first.listener().clone();

        first.release();
        assert!(listener.is_active());
        second.release();
        listener.wait_closed().await;
    }

    #[tokio::test]
    async fn reopens_after_closure() {
        let server = CountingServer::new();
        let manager = EventListenerManager::new(server.clone());

        let handle = manager.get().await.unwrap();
        handle.release();
        handle.listener().wait_closed().await;

        let fresh = manager.get().await.unwrap();
        assert_eq!(server.opens(), 2);
        assert!(fresh.is_active());
        fresh.release();
    }

    #[tokio::test]
    async fn release_is_idempotent_per_handle() {
        let server = CountingServer::new();
        let manager = EventListenerManager::new(server.clone());

        let first = manager.get().await.unwrap();
        let second = manager.get().await.unwrap();
        let listener = first.listener().clone();

        // Double release of one handle must not steal the other's lease.
        first.release();
        first.release();
        assert!(listener.is_active());

        second.release();
        listener.wait_closed().await;
    }

    #[tokio::test]
    async fn open_failure_propagates() {
        let server = CountingServer::new();
        server.fail.store(true, Ordering::SeqCst);
        let manager = EventListenerManager::new(server.clone());

        let result = manager.get().await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
