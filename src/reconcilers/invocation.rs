//! Cancellation and deadline carried by one reconciliation pass

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// Per-pass cancellation token and deadline.
///
/// Every store call made during a pass goes through [`Invocation::guard`], so
/// shutdown or an expired deadline stops the pass at the next I/O boundary.
/// Nothing is compensated; the next pass picks up where this one stopped.
#[derive(Debug, Clone)]
pub struct Invocation {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Invocation {
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// No deadline and a token nobody cancels
    pub fn unbounded() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Race a store call against cancellation and the deadline
    pub async fn guard<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled),
            _ = expired => Err(StoreError::DeadlineExceeded),
            result = call => result,
        }
    }

    /// Sleep between retries, waking early on cancellation or deadline
    pub async fn pause(&self, delay: Duration) -> Result<(), StoreError> {
        if delay.is_zero() {
            return if self.cancel.is_cancelled() {
                Err(StoreError::Cancelled)
            } else {
                Ok(())
            };
        }
        self.guard(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}
