//! Stage deadlines
//!
//! A stage runs on its own named worker thread; the caller waits on a
//! channel with `recv_timeout`. On a miss the worker's [`Cancellation`] is
//! tripped and the worker is left to wind down on its own, so any
//! [`RunScope`](crate::tracking::RunScope) it holds still closes as `Failed`.
//!
//! A worker that has already called [`Cancellation::begin_commit`] can no
//! longer be cancelled: the caller then waits for its result instead, so a
//! registered model is never reported as a failed run.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::{Error, Result};

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const COMMITTING: u8 = 2;

/// Shared flag between a deadline-bound worker and the thread waiting on it.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    state: Arc<AtomicU8>,
}

impl Cancellation {
    /// A token that is neither cancelled nor committing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the waiting side gave up on this worker.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Fail with [`Error::TrackingStore`] if the stage was cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrackingStore`] once the deadline has passed.
    pub fn check(&self, step: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::TrackingStore(format!(
                "{step} skipped: stage deadline passed"
            )));
        }
        Ok(())
    }

    /// Pass the point of no return. After this the stage cannot be cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrackingStore`] if the stage was cancelled first.
    pub fn begin_commit(&self, step: &str) -> Result<()> {
        match self
            .state
            .compare_exchange(ACTIVE, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) | Err(COMMITTING) => Ok(()),
            Err(_) => self.check(step),
        }
    }

    /// Cancel unless the worker is already committing. Returns whether the
    /// worker is now cancelled.
    pub fn cancel(&self) -> bool {
        match self
            .state
            .compare_exchange(ACTIVE, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) | Err(CANCELLED) => true,
            Err(_) => false,
        }
    }
}

/// Run `work` on a worker thread and wait at most `timeout` for its result.
///
/// `on_timeout` builds the error reported when the deadline passes. `work`
/// receives the stage's [`Cancellation`]; stages with side effects should
/// check it between steps and call `begin_commit` before the last one.
///
/// # Errors
///
/// Returns the worker's own error, `on_timeout(..)` on a deadline miss, or
/// [`Error::Other`] if the worker could not be spawned or panicked.
pub fn run_with_deadline<T, F>(
    stage: &str,
    timeout: Duration,
    on_timeout: impl FnOnce(String) -> Error,
    work: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Cancellation) -> Result<T> + Send + 'static,
{
    let cancellation = Cancellation::new();
    let (tx, rx) = mpsc::sync_channel(1);
    {
        let cancellation = cancellation.clone();
        thread::Builder::new()
            .name(format!("readmission-{stage}"))
            .spawn(move || {
                // The receiver is gone after a deadline miss; nothing to report to.
                let _ = tx.send(work(cancellation));
            })
            .map_err(|e| Error::Other(format!("spawning {stage} worker: {e}")))?;
    }

    let panicked = || Error::Other(format!("{stage} worker panicked"));
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            if cancellation.cancel() {
                warn!(stage, timeout_secs = timeout.as_secs_f64(), "stage deadline exceeded");
                Err(on_timeout(format!(
                    "{stage} did not finish within {:.1}s",
                    timeout.as_secs_f64()
                )))
            } else {
                warn!(stage, "stage deadline exceeded while committing; waiting for it");
                rx.recv().map_err(|_| panicked())?
            }
        }
        Err(RecvTimeoutError::Disconnected) => Err(panicked()),
    }
}
