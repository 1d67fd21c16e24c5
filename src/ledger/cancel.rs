//! Caller-controlled cancellation and deadlines for units of work

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation signal handed to the executor.
///
/// Clones share the same flag; a deadline is per clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    /// `None` for a signal that cannot be tripped
    state: Option<Arc<CancelState>>,
    deadline: Option<Instant>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            state: Some(Arc::default()),
            deadline: None,
        }
    }

    /// A signal that never fires: `cancel()` is a no-op and there is no
    /// deadline
    pub fn none() -> Self {
        Self {
            state: None,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Trip the signal for every clone
    pub fn cancel(&self) {
        if let Some(state) = &self.state {
            state.cancelled.store(true, Ordering::SeqCst);
            state.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.cancelled.load(Ordering::SeqCst))
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once cancelled or past the deadline
    pub async fn cancelled(&self) {
        let tripped = async {
            let Some(state) = &self.state else {
                return std::future::pending().await;
            };
            loop {
                let notified = state.notify.notified();
                if state.cancelled.load(Ordering::SeqCst) {
                    return;
                }
                notified.await;
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tripped => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => tripped.await,
        }
    }
}
