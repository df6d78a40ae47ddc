//! Cancellation and deadline for remote calls.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ApiError, ApplyError};

/// Carries the caller's cancellation signal and optional deadline into every
/// remote call an apply makes.
///
/// The cancellation signal is the same `watch` channel the supervisor uses for
/// shutdown: a `true` value cancels.
#[derive(Debug, Clone)]
pub struct ApplyContext {
    cancel: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl ApplyContext {
    pub fn new(cancel: watch::Receiver<bool>) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(rx)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Fails if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), ApplyError> {
        if self.is_cancelled() {
            return Err(ApplyError::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(ApplyError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run a remote call, aborting it if the context is cancelled or its
    /// deadline passes first.
    pub async fn call<T, F>(&self, fut: F) -> Result<T, ApplyError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        self.check()?;

        let mut cancel = self.cancel.clone();
        let deadline = self.deadline;

        tokio::select! {
            res = fut => res.map_err(ApplyError::from),
            _ = cancelled(&mut cancel) => Err(ApplyError::Cancelled),
            _ = expired(deadline) => Err(ApplyError::DeadlineExceeded),
        }
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    // A dropped sender can never cancel.
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_background_passes_through() {
        let ctx = ApplyContext::background();
        let res: Result<u32, _> = ctx.call(async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_call() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let ctx = ApplyContext::new(rx);

        let polled = AtomicBool::new(false);
        let res = ctx
            .call(async {
                polled.store(true, Ordering::SeqCst);
                Ok::<_, ApiError>(())
            })
            .await;
        assert!(matches!(res, Err(ApplyError::Cancelled)));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_call() {
        let (tx, rx) = watch::channel(false);
        let ctx = ApplyContext::new(rx);

        let call = ctx.call(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ApiError>(())
        });
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(true).unwrap();
        };

        let (res, _) = tokio::join!(call, cancel);
        assert!(matches!(res, Err(ApplyError::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = ApplyContext::background().with_timeout(Duration::from_millis(20));

        let res = ctx
            .call(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ApiError>(())
            })
            .await;
        assert!(matches!(res, Err(ApplyError::DeadlineExceeded)));
    }
}
