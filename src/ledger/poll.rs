//! Bounded, cancellable polling for chain conditions (balances, receipts).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::LedgerError;

/// Why a poll stopped without producing a value.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("Polling cancelled")]
    Cancelled,

    #[error("Condition not met after {attempts} attempts")]
    TimedOut { attempts: u32 },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once [`CancelHandle::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Fixed-interval poller with an attempt bound.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Poller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Calls `check` until it yields `Some`, sleeping `interval` between
    /// attempts.
    ///
    /// Ledger errors are treated as transient and retried; if the final
    /// attempt failed with one, that error is returned instead of
    /// [`PollError::TimedOut`].
    pub async fn until<T, F, Fut>(&self, cancel: &CancelHandle, mut check: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, LedgerError>>,
    {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }

            match check().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {
                    debug!(attempt, "condition not met yet");
                    last_error = None;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "poll attempt failed");
                    last_error = Some(e);
                }
            }

            if attempt == self.max_attempts {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
            }
        }

        match last_error {
            Some(e) => Err(PollError::Ledger(e)),
            None => Err(PollError::TimedOut {
                attempts: self.max_attempts,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> Poller {
        Poller::new(Duration::from_millis(1), max_attempts)
    }

    #[tokio::test]
    async fn test_returns_first_ready_value() {
        let calls = AtomicU32::new(0);
        let result = fast(10)
            .until(&CancelHandle::new(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(if n == 3 { Some(n) } else { None }) }
            })
            .await
            .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_after_bound() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast(4)
            .until(&CancelHandle::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            })
            .await;

        assert!(matches!(result, Err(PollError::TimedOut { attempts: 4 })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let cancel = CancelHandle::new();
        cancel.cancel();

        let result: Result<(), _> = fast(10).until(&cancel, || async { Ok(None) }).await;
        assert!(matches!(result, Err(PollError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_while_sleeping() {
        let cancel = CancelHandle::new();
        let poller = Poller::new(Duration::from_secs(3600), 5);

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.until::<(), _, _>(&cancel, || async { Ok(None) }).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PollError::Cancelled)));
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let calls = AtomicU32::new(0);
        let result = fast(5)
            .until(&CancelHandle::new(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(LedgerError::Transport("flaky".to_string()))
                    } else {
                        Ok(Some("done"))
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "done");
    }

    #[tokio::test]
    async fn test_persistent_error_surfaces() {
        let result: Result<(), _> = fast(2)
            .until(&CancelHandle::new(), || async {
                Err(LedgerError::Transport("down".to_string()))
            })
            .await;
        assert!(matches!(result, Err(PollError::Ledger(LedgerError::Transport(_)))));
    }
}
