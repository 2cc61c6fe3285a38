//! Named background tasks with cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::CaptureError;

/// Shared stop flag observed by a running task.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A background thread plus its stop signal.
///
/// The task body receives the token and returns a value that is handed back
/// by [`SupervisedTask::cancel_and_join`]. Dropping an unjoined task cancels
/// and joins it.
pub struct SupervisedTask<T: Send + 'static> {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> SupervisedTask<T> {
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self, CaptureError>
    where
        F: FnOnce(CancellationToken) -> T + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(task_token))
            .map_err(CaptureError::ThreadSpawn)?;
        debug!(task = %name, "Spawned task");
        Ok(Self {
            name,
            token,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signal the task and block until it has exited.
    pub fn cancel_and_join(mut self) -> Result<T, CaptureError> {
        self.token.cancel();
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<T, CaptureError> {
        let Some(handle) = self.handle.take() else {
            return Err(CaptureError::TaskPanicked(self.name.clone()));
        };
        let result = handle
            .join()
            .map_err(|_| CaptureError::TaskPanicked(self.name.clone()));
        debug!(task = %self.name, "Joined task");
        result
    }
}

impl<T: Send + 'static> Drop for SupervisedTask<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.token.cancel();
            if let Err(e) = self.join_inner() {
                warn!(error = %e, "Task ended abnormally");
            }
        }
    }
}
