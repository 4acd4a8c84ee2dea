//! Collaborator contract consumed by the tracking core.
//!
//! The core never speaks HTTP or websockets itself. It consumes exactly
//! two narrow capabilities: "send an authenticated request and get back a
//! structured response or error" ([`RemoteServer`]) and "a live sequence
//! of tagged events" ([`EventStream`]). Authentication, TLS, retries, and
//! request building all live behind these traits.
//!
//! Reference implementations are feature-gated: `http::HttpRemoteServer`
//! (`http-client`) and `ws::WsEventStream` (`websocket`).

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Event, OperationSnapshot};

#[cfg(feature = "http-client")]
pub mod http;
#[cfg(feature = "websocket")]
pub mod ws;

/// One event-delivery connection, exclusively owned by its listener.
///
/// Implementations yield events in the order the server sent them.
/// `Ok(None)` signals a clean end of stream; an `Err` signals an abnormal
/// termination and ends the stream as well.
#[async_trait]
pub trait EventStream: Send {
    /// Receives the next event, `Ok(None)` at end of stream.
    async fn next_event(&mut self) -> Result<Option<Event>>;

    /// Closes the connection. Called once during listener teardown;
    /// errors are logged, not propagated.
    async fn close(&mut self) -> Result<()>;
}

/// The server-side collaborator the tracking core talks to.
///
/// Implementations are expected to be cheap to share (`Arc`) and safe to
/// call concurrently.
#[async_trait]
pub trait RemoteServer: Send + Sync {
    /// Opens one event-delivery connection.
    async fn open_event_stream(&self) -> Result<Box<dyn EventStream>>;

    /// Synchronous point lookup of an operation by identifier.
    async fn fetch_operation(&self, id: &str) -> Result<OperationSnapshot>;

    /// Requests server-side cancellation of an operation. The resulting
    /// terminal transition still arrives through the event path or a
    /// subsequent refresh.
    async fn cancel_operation(&self, id: &str) -> Result<()>;

    /// Whether this connection can deliver events at all. When `false`,
    /// waits fall back to polling [`fetch_operation`](Self::fetch_operation)
    /// and handler registration is rejected.
    fn supports_events(&self) -> bool {
        true
    }
}
