use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;

/// Shared cancellation scope for one orchestration pass.
///
/// Every clone observes the same token and deadline, so cancelling any clone
/// stops all of them. Jobs must poll [`RunContext::check`] or race their
/// long-running awaits through [`RunContext::run`] so cancellation is observed
/// promptly.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// `None` while the context is live. Explicit cancellation wins over an
    /// elapsed deadline when both apply.
    pub fn error(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<(), ContextError> {
        match self.error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => ContextError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => {
                        // A cancel racing the deadline still reports as a cancel.
                        self.error().unwrap_or(ContextError::DeadlineExceeded)
                    }
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the context finishes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ContextError>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}
