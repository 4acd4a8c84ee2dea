//! Composite wait over a server operation and local post-processing.
//!
//! A [`RemoteOperation`] presents one wait/handler/cancel surface over
//! (a) a true server operation, (b) a purely client-driven asynchronous
//! step such as a background transfer loop, or (c) both in sequence. The
//! driving task holds the [`RemoteDriver`] half and reports completion
//! through it; callers hold the [`RemoteOperation`] and wait.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::listener::HandlerId;
use crate::operation::Operation;
use crate::types::OperationSnapshot;

type RemoteHandlerFn = Arc<dyn Fn(&OperationSnapshot) + Send + Sync>;

/// Uniform registration token returned by
/// [`RemoteOperation::add_handler`], whether or not a target operation
/// exists yet.
#[derive(Debug, Clone, Copy)]
pub struct RemoteHandlerRef {
    target: Option<HandlerId>,
}

impl RemoteHandlerRef {
    /// The handler id on the target operation, when one was registered.
    pub fn target_id(&self) -> Option<HandlerId> {
        self.target
    }
}

struct RemoteState {
    target: Option<Operation>,
    /// Caller-registered handlers, replayed onto a late-attached target.
    handlers: Vec<RemoteHandlerFn>,
    primary_err: Option<Error>,
    post_err: Option<Error>,
    finished: bool,
    post_finished: bool,
}

struct RemoteInner {
    state: Mutex<RemoteState>,
    done: CancellationToken,
    post: Option<CancellationToken>,
}

/// Builder for a [`RemoteOperation`] / [`RemoteDriver`] pair.
#[derive(Debug, Default)]
pub struct RemoteOperationBuilder {
    target: Option<Operation>,
    post_processing: bool,
}

impl RemoteOperationBuilder {
    /// Sets the target server operation.
    pub fn target(mut self, operation: Operation) -> Self {
        self.target = Some(operation);
        self
    }

    /// Declares a secondary post-processing phase. [`RemoteOperation::wait`]
    /// will not return until the driver has reported it finished.
    pub fn post_processing(mut self) -> Self {
        self.post_processing = true;
        self
    }

    /// Builds the caller-facing operation and its driver half.
    pub fn build(self) -> (RemoteOperation, RemoteDriver) {
        let inner = Arc::new(RemoteInner {
            state: Mutex::new(RemoteState {
                target: self.target,
                handlers: Vec::new(),
                primary_err: None,
                post_err: None,
                finished: false,
                post_finished: false,
            }),
            done: CancellationToken::new(),
            post: self.post_processing.then(CancellationToken::new),
        });

        (
            RemoteOperation {
                inner: inner.clone(),
            },
            RemoteDriver { inner },
        )
    }
}

/// Caller-facing composite operation.
#[derive(Clone)]
pub struct RemoteOperation {
    inner: Arc<RemoteInner>,
}

impl RemoteOperation {
    /// Starts building a remote operation.
    pub fn builder() -> RemoteOperationBuilder {
        RemoteOperationBuilder::default()
    }

    /// Registers `handler` for events belonging to the target operation.
    ///
    /// With no target yet, the registration token is inert; the handler is
    /// recorded either way and replayed onto a target attached later via
    /// [`RemoteDriver::set_target`].
    pub async fn add_handler<F>(&self, handler: F) -> Result<RemoteHandlerRef>
    where
        F: Fn(&OperationSnapshot) + Send + Sync + 'static,
    {
        let callback: RemoteHandlerFn = Arc::new(handler);

        let target = {
            let mut state = self.inner.state.lock();
            state.handlers.push(callback.clone());
            state.target.clone()
        };

        let target_id = match target {
            Some(operation) => {
                operation
                    .add_handler(move |snapshot| callback(snapshot))
                    .await?
            },
            None => None,
        };

        Ok(RemoteHandlerRef { target: target_id })
    }

    /// Requests cancellation of the target operation.
    ///
    /// # Errors
    ///
    /// [`Error::NoTarget`] when there is no underlying server operation.
    pub async fn cancel_target(&self) -> Result<()> {
        let target = self.inner.state.lock().target.clone();
        match target {
            Some(operation) => operation.cancel().await,
            None => Err(Error::NoTarget),
        }
    }

    /// Returns the last known snapshot of the target operation.
    ///
    /// # Errors
    ///
    /// [`Error::NoTarget`] when there is no underlying server operation.
    pub fn get_target(&self) -> Result<OperationSnapshot> {
        self.inner
            .state
            .lock()
            .target
            .as_ref()
            .map(Operation::get)
            .ok_or(Error::NoTarget)
    }

    /// Blocks until the primary phase has finished and, when declared, the
    /// post-processing phase too. Both phases are guaranteed to have
    /// concluded before this returns; the primary error takes precedence
    /// when both failed. Repeatable: later calls return the same result
    /// immediately.
    pub async fn wait(&self) -> Result<()> {
        self.inner.done.cancelled().await;
        if let Some(post) = &self.inner.post {
            post.cancelled().await;
        }

        let state = self.inner.state.lock();
        if let Some(err) = &state.primary_err {
            return Err(err.clone());
        }
        if let Some(err) = &state.post_err {
            return Err(err.clone());
        }
        Ok(())
    }

    /// Like [`wait`](Self::wait), aborting with [`Error::Cancelled`] when
    /// `cancel` fires first.
    pub async fn wait_with(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            result = self.wait() => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

impl std::fmt::Debug for RemoteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RemoteOperation")
            .field("has_target", &state.target.is_some())
            .field("finished", &state.finished)
            .field("post_finished", &state.post_finished)
            .finish()
    }
}

/// Completion side of a [`RemoteOperation`], held by the driving task.
///
/// Dropping the driver without reporting completion records an
/// "abandoned" transport error and releases all waiters; a driver must
/// never leave its waiters hanging.
pub struct RemoteDriver {
    inner: Arc<RemoteInner>,
}

impl RemoteDriver {
    /// Records the primary outcome, at most once, and releases waiters of
    /// the primary phase.
    pub fn finish(&self, result: Result<()>) {
        {
            let mut state = self.inner.state.lock();
            if state.finished {
                tracing::debug!("duplicate remote operation completion ignored");
                return;
            }

            state.finished = true;
            if let Err(err) = result {
                state.primary_err = Some(err);
            }
        }

        self.inner.done.cancel();
    }

    /// Records the post-processing outcome, at most once. Ignored (with a
    /// warning) when no post-processing phase was declared at build time.
    pub fn finish_post(&self, result: Result<()>) {
        let Some(post) = &self.inner.post else {
            tracing::warn!("post-processing completion reported but none was declared");
            return;
        };

        {
            let mut state = self.inner.state.lock();
            if state.post_finished {
                tracing::debug!("duplicate post-processing completion ignored");
                return;
            }

            state.post_finished = true;
            if let Err(err) = result {
                state.post_err = Some(err);
            }
        }

        post.cancel();
    }

    /// Attaches a target operation created after the fact and replays the
    /// handlers registered so far onto it.
    pub async fn set_target(&self, operation: Operation) -> Result<()> {
        let handlers = {
            let mut state = self.inner.state.lock();
            state.target = Some(operation.clone());
            state.handlers.clone()
        };

        for callback in handlers {
            operation
                .add_handler(move |snapshot| callback(snapshot))
                .await?;
        }

        Ok(())
    }
}

impl Drop for RemoteDriver {
    fn drop(&mut self) {
        let (finished, post_finished) = {
            let state = self.inner.state.lock();
            (state.finished, state.post_finished)
        };

        if !finished {
            self.finish(Err(Error::transport(
                "remote operation abandoned before completion",
            )));
        }

        if self.inner.post.is_some() && !post_finished {
            self.finish_post(Err(Error::transport(
                "remote operation abandoned before post-processing completed",
            )));
        }
    }
}

impl std::fmt::Debug for RemoteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDriver").finish_non_exhaustive()
    }
}
