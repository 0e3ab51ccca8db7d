//! Cooperative cancellation
//!
//! A [`CancelSignal`] is a shared flag carrying the first reason it was
//! cancelled with. Clones observe the same signal. Plugins poll it through
//! [`InvocationContext::checkpoint`](crate::InvocationContext::checkpoint);
//! the runtime also races it against running calls.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Why an operation was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// A deadline elapsed
    Timeout,
    /// The caller asked for it
    Requested,
    /// Every interested caller went away
    Abandoned,
}

impl CancelReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CancelReason::Timeout => "timeout",
            CancelReason::Requested => "requested",
            CancelReason::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared cancellation flag
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<Option<CancelReason>>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel with `reason`; returns false if already cancelled
    ///
    /// The first reason sticks.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// `Err(reason)` once cancelled
    ///
    /// # Errors
    /// The cancellation reason.
    pub fn check(&self) -> Result<(), CancelReason> {
        match self.reason() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    /// Resolves when the signal is cancelled
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            // The sender lives as long as `self`, so this cannot close.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
