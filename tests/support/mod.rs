//! Shared test collaborator: a scripted in-memory server.
//!
//! `FakeServer` implements the collaborator contract over channels so
//! tests can drive the event stream frame by frame. Sequencing is
//! observable through watch counters (`wait_opens`, `wait_fetches`)
//! instead of sleeps: a subscription is known to be fully wired once the
//! race-closing refresh has hit the fetch counter.
#![allow(dead_code)]

use async_trait::async_trait;
use opstream::{
    Error, Event, EventStream, OperationSnapshot, OperationStatus, RemoteServer, Result,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};

/// One scripted frame on a fake event stream.
pub enum Frame {
    Event(Event),
    Error(String),
    Eof,
}

pub struct FakeServer {
    state: Mutex<HashMap<String, OperationSnapshot>>,
    streams: Mutex<Vec<mpsc::UnboundedSender<Frame>>>,
    opens: watch::Sender<usize>,
    fetches: watch::Sender<usize>,
    cancels: Mutex<Vec<String>>,
    fail_open: AtomicBool,
    events_supported: AtomicBool,
}

impl FakeServer {
    pub fn new() -> std::sync::Arc<Self> {
        let (opens, _) = watch::channel(0);
        let (fetches, _) = watch::channel(0);
        std::sync::Arc::new(Self {
            state: Mutex::new(HashMap::new()),
            streams: Mutex::new(Vec::new()),
            opens,
            fetches,
            cancels: Mutex::new(Vec::new()),
            fail_open: AtomicBool::new(false),
            events_supported: AtomicBool::new(true),
        })
    }

    /// Registers or replaces the server-side snapshot of an operation.
    pub fn insert(&self, snapshot: OperationSnapshot) {
        self.state
            .lock()
            .unwrap()
            .insert(snapshot.id.clone(), snapshot);
    }

    /// Updates the stored snapshot without emitting an event, as a server
    /// would when the client never hears about a transition.
    pub fn set_status(&self, id: &str, status: OperationStatus, err: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        if let Some(snapshot) = state.get_mut(id) {
            snapshot.status = status;
            snapshot.err = err.map(str::to_string);
        }
    }

    /// Broadcasts an event to every open stream.
    pub fn push_event(&self, event: Event) {
        let mut streams = self.streams.lock().unwrap();
        streams.retain(|tx| tx.send(Frame::Event(event.clone())).is_ok());
    }

    /// Updates the stored snapshot and broadcasts the matching event.
    pub fn push_operation(&self, snapshot: OperationSnapshot) {
        self.insert(snapshot.clone());
        self.push_event(Event::from_operation(&snapshot));
    }

    /// Terminates every open stream with a transport error.
    pub fn close_streams_with_error(&self, reason: &str) {
        let mut streams = self.streams.lock().unwrap();
        for tx in streams.drain(..) {
            let _ = tx.send(Frame::Error(reason.to_string()));
        }
    }

    /// Terminates every open stream cleanly.
    pub fn close_streams(&self) {
        let mut streams = self.streams.lock().unwrap();
        for tx in streams.drain(..) {
            let _ = tx.send(Frame::Eof);
        }
    }

    /// Number of streams opened so far.
    pub fn opens(&self) -> usize {
        *self.opens.borrow()
    }

    /// Number of point lookups served so far.
    pub fn fetches(&self) -> usize {
        *self.fetches.borrow()
    }

    /// Identifiers whose cancellation was requested, in order.
    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }

    /// Makes every subsequent stream open fail.
    pub fn refuse_streams(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// Toggles event support, switching clients to the polling path.
    pub fn set_events_supported(&self, supported: bool) {
        self.events_supported.store(supported, Ordering::SeqCst);
    }

    /// Waits until at least `at_least` streams have been opened.
    pub async fn wait_opens(&self, at_least: usize) {
        let mut rx = self.opens.subscribe();
        while *rx.borrow_and_update() < at_least {
            rx.changed().await.expect("open counter closed");
        }
    }

    /// Waits until at least `at_least` point lookups have been served.
    /// After the first lookup for an operation, its subscription is fully
    /// wired: the updater registers before the race-closing refresh runs.
    pub async fn wait_fetches(&self, at_least: usize) {
        let mut rx = self.fetches.subscribe();
        while *rx.borrow_and_update() < at_least {
            rx.changed().await.expect("fetch counter closed");
        }
    }
}

#[async_trait]
impl RemoteServer for FakeServer {
    async fn open_event_stream(&self) -> Result<Box<dyn EventStream>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::transport("stream refused"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().push(tx);
        self.opens.send_modify(|count| *count += 1);
        Ok(Box::new(ScriptedStream { rx }))
    }

    async fn fetch_operation(&self, id: &str) -> Result<OperationSnapshot> {
        let snapshot = self
            .state
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::transport(format!("operation {id} not found")))?;
        self.fetches.send_modify(|count| *count += 1);
        Ok(snapshot)
    }

    async fn cancel_operation(&self, id: &str) -> Result<()> {
        self.cancels.lock().unwrap().push(id.to_string());
        Ok(())
    }

    fn supports_events(&self) -> bool {
        self.events_supported.load(Ordering::SeqCst)
    }
}

struct ScriptedStream {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl EventStream for ScriptedStream {
    async fn next_event(&mut self) -> Result<Option<Event>> {
        match self.rx.recv().await {
            Some(Frame::Event(event)) => Ok(Some(event)),
            Some(Frame::Error(reason)) => Err(Error::Transport(reason)),
            Some(Frame::Eof) | None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.rx.close();
        Ok(())
    }
}

/// A pending snapshot for the given id.
pub fn pending(id: &str) -> OperationSnapshot {
    OperationSnapshot::new(id, OperationStatus::Pending)
}

/// A snapshot for the given id and status.
pub fn with_status(id: &str, status: OperationStatus) -> OperationSnapshot {
    OperationSnapshot::new(id, status)
}
