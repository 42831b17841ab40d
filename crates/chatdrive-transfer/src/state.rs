//! Shared abort state for one upload.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::TransferError;

/// Abort flag and reason, shared by the writer, the part task and the watcher.
///
/// `aborted` is set with a compare-and-set: the first caller of
/// [`abort`](Self::abort) records its reason and every later call is a no-op.
#[derive(Debug, Default)]
pub struct TransferState {
    aborted: AtomicBool,
    reason: Mutex<Option<String>>,
    cancel: CancellationToken,
}

impl TransferState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort with `err` unless already aborted. Returns whether this call won.
    pub fn abort(&self, err: &TransferError) -> bool {
        if self
            .aborted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.reason.lock() = Some(err.to_string());
        // Reason is visible before anyone wakes on the token.
        self.cancel.cancel();
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// The error recorded by the winning abort.
    pub fn error(&self) -> TransferError {
        let reason = self.reason.lock().clone();
        TransferError::Aborted(reason.unwrap_or_else(|| "aborted".to_string()))
    }

    /// Fail fast if the transfer has been aborted.
    pub fn check(&self) -> Result<(), TransferError> {
        if self.is_aborted() {
            Err(self.error())
        } else {
            Ok(())
        }
    }

    /// Resolves once the transfer is aborted.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_abort_wins() {
        let state = TransferState::new();
        assert!(state.check().is_ok());

        assert!(state.abort(&TransferError::remote("part 2 failed")));
        assert!(!state.abort(&TransferError::aborted("cancelled")));

        let err = state.error().to_string();
        assert!(err.contains("part 2 failed"), "{err}");
        assert!(state.check().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_abort() {
        let state = std::sync::Arc::new(TransferState::new());
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move {
                state.cancelled().await;
                state.error()
            })
        };
        state.abort(&TransferError::aborted("stop"));
        let err = waiter.await.unwrap();
        assert!(err.is_aborted());
    }
}
