use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a run stopped before finishing its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("run deadline exceeded")]
    DeadlineExceeded,
    #[error("run cancelled")]
    Cancelled,
}

/// Owner side of a cooperative cancellation flag.
///
/// Dropping the handle without calling [`cancel`](Self::cancel) does not
/// cancel anything; subscribed runs simply lose the ability to be cancelled.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Signals every subscribed run to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline and cancellation observed by a single ingestion run.
///
/// Cheap to clone; every feed in a batch shares the same signal so the
/// whole run stops together.
#[derive(Debug, Clone, Default)]
pub struct RunSignal {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl RunSignal {
    /// A signal that never fires.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A signal that fires `budget` from now. `None` means no deadline.
    pub fn with_budget(budget: Option<Duration>) -> Self {
        Self {
            deadline: budget.map(|b| Instant::now() + b),
            cancel: None,
        }
    }

    /// Also fire when `handle` is cancelled.
    pub fn cancellable_by(mut self, handle: &CancelHandle) -> Self {
        self.cancel = Some(handle.subscribe());
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the interruption if the signal has already fired.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drives `fut` to completion unless the signal fires first.
    ///
    /// The future is dropped when interrupted, so any work it had in flight
    /// (an HTTP request, a pending query) is abandoned.
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        self.check()?;

        let mut cancel = self.cancel.clone();
        let cancelled = async move {
            if let Some(rx) = cancel.as_mut() {
                if rx.wait_for(|flag| *flag).await.is_ok() {
                    return;
                }
            }
            // No handle, or the handle was dropped without cancelling
            std::future::pending::<()>().await
        };

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => Err(Interrupted::Cancelled),
            () = expired => Err(Interrupted::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}
