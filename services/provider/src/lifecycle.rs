//! Lifecycle primitives: completion signals and the supervisor state machine.
//!
//! Every long-running component exposes a [`Done`] handle that resolves once
//! its task has fully stopped. Cancellation flows the other way through a
//! `watch::Receiver<bool>` that flips to `true` exactly once.

use std::future::pending;

use serde::Serialize;
use tokio::sync::watch;

/// Resolves once `rx` observes `true`. A receiver whose sender is gone
/// without having signalled stays pending forever.
pub async fn signalled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|v| *v).await.is_err() {
        pending::<()>().await;
    }
}

// =============================================================================
// Done
// =============================================================================

/// One-shot completion signal. Clones observe the same completion.
///
/// A signal whose [`DoneSender`] was dropped without firing counts as done:
/// the task that owned it can no longer be running.
#[derive(Debug, Clone)]
pub struct Done(watch::Receiver<bool>);

impl Done {
    /// Wait until the signal fires.
    pub async fn wait(&self) {
        let mut rx = self.0.clone();
        // Err means the sender was dropped, which is also completion.
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn is_done(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }
}

/// Firing side of a [`Done`].
#[derive(Debug)]
pub struct DoneSender(watch::Sender<bool>);

impl DoneSender {
    /// Fire the signal. Returns `false` if it had already fired.
    pub fn fire(&self) -> bool {
        self.0.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        })
    }
}

/// Create a linked completion signal pair.
pub fn done_channel() -> (DoneSender, Done) {
    let (tx, rx) = watch::channel(false);
    (DoneSender(tx), Done(rx))
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Supervisor lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Subsystems are being started.
    Starting,
    /// All subsystems are up.
    Running,
    /// Shutdown has been triggered and subsystems are being awaited.
    ShuttingDown,
    /// Every subsystem has stopped.
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one supervisor: its state, the external shutdown request and
/// its own completion signal.
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<LifecycleState>,
    shutdown: watch::Sender<bool>,
    done_tx: DoneSender,
    done: Done,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        let (shutdown, _) = watch::channel(false);
        let (done_tx, done) = done_channel();
        Self {
            state,
            shutdown,
            done_tx,
            done,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Move to `next`. Returns `false` and leaves the state alone if `next`
    /// is not ahead of the current state.
    pub fn transition(&self, next: LifecycleState) -> bool {
        self.state.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Ask the run loop to stop. Idempotent.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_requested(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn done(&self) -> Done {
        self.done.clone()
    }

    /// Enter [`LifecycleState::Stopped`] and fire the completion signal.
    /// Returns `false` if completion had already been signalled.
    pub fn complete(&self) -> bool {
        self.transition(LifecycleState::Stopped);
        self.done_tx.fire()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_done_fires_once() {
        let (tx, done) = done_channel();
        assert!(!done.is_done());

        let waiter = tokio::spawn({
            let done = done.clone();
            async move { done.wait().await }
        });

        assert!(tx.fire());
        assert!(!tx.fire());
        waiter.await.unwrap();
        assert!(done.is_done());
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_done() {
        let (tx, done) = done_channel();
        drop(tx);
        assert!(done.is_done());
        tokio::time::timeout(Duration::from_secs(1), done.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_signalled_pends_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let res = tokio::time::timeout(Duration::from_millis(20), signalled(&mut rx)).await;
        assert!(res.is_err());
    }

    #[test]
    fn test_lifecycle_moves_forward_only() {
        let lc = Lifecycle::new();
        assert_eq!(lc.state(), LifecycleState::Starting);
        assert!(lc.transition(LifecycleState::Running));
        assert!(!lc.transition(LifecycleState::Starting));
        assert!(lc.transition(LifecycleState::ShuttingDown));
        assert!(!lc.transition(LifecycleState::Running));
        assert_eq!(lc.state(), LifecycleState::ShuttingDown);
    }

    #[test]
    fn test_complete_is_single_shot() {
        let lc = Lifecycle::new();
        assert!(lc.complete());
        assert!(!lc.complete());
        assert_eq!(lc.state(), LifecycleState::Stopped);
        assert!(lc.done().is_done());
    }
}
