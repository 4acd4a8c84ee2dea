//! Client-side tracking of long-running server operations over a
//! multiplexed event stream.
//!
//! Servers that execute jobs asynchronously answer state-changing requests
//! with an operation descriptor and announce progress on one shared event
//! stream. This crate turns that fire-and-forget pair into a reliable,
//! cancellable, observable wait primitive:
//!
//! - [`Operation`] -- one server job: wait for completion, attach handlers,
//!   cancel, refresh. Completion is observed through a lazily established
//!   subscription on the shared stream, with a synchronous refresh closing
//!   the race against jobs that finish before the subscription is wired.
//! - [`EventListener`] / [`EventListenerManager`] -- multiplex one stream
//!   connection across every operation (and any direct subscriber) on the
//!   same logical connection, with explicit lease-based cleanup.
//! - [`RemoteOperation`] -- a uniform wait surface over a server operation,
//!   a client-driven background step, or both in sequence.
//! - [`Client`] -- ties a [`RemoteServer`] collaborator and the listener
//!   manager together and constructs operations from snapshots.
//!
//! Transport concerns (auth, TLS, request building) stay behind the
//! [`RemoteServer`] and [`EventStream`] traits; reference implementations
//! are available behind the `http-client` (reqwest) and `websocket`
//! (tokio-tungstenite) features.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use opstream::{Client, OperationSnapshot, RemoteServer};
//!
//! # async fn demo(server: Arc<dyn RemoteServer>, snapshot: OperationSnapshot) -> opstream::Result<()> {
//! let client = Client::new(server);
//!
//! // A state-changing request returned `snapshot`; track it to completion.
//! let operation = client.operation_with_events(snapshot).await;
//! operation.wait().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod client;
pub mod error;
pub mod events;
pub mod operation;
pub mod remote;
pub mod transport;
pub mod types;

pub use client::Client;
pub use error::{Error, Result};
pub use events::{EventListener, EventListenerManager, HandlerId, ListenerHandle};
pub use operation::Operation;
pub use remote::{RemoteDriver, RemoteHandlerRef, RemoteOperation, RemoteOperationBuilder};
pub use transport::{EventStream, RemoteServer};
pub use types::{Event, EventKind, OperationSnapshot, OperationStatus};
