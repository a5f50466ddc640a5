//! Request-scoped cancellation and deadline.
//!
//! Every engine operation receives a `&Context`. The engine calls
//! [`Context::check`] before each store call, so a request that was cancelled
//! (client gone, server shutting down) or ran past its deadline stops at the
//! next boundary instead of finishing work nobody will read.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::AuthError;

#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context cancelled together with `cancel` (including its parents).
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Attach a deadline `timeout` from now. An earlier existing deadline wins.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail fast if the request should no longer be worked on.
    pub fn check(&self) -> Result<(), AuthError> {
        if self.cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(AuthError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_context_is_live() {
        assert!(Context::background().check().is_ok());
    }

    #[test]
    fn test_cancelled_context() {
        let ctx = Context::background();
        ctx.cancel();
        assert!(matches!(ctx.check(), Err(AuthError::Cancelled)));
    }

    #[test]
    fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let ctx = Context::with_cancellation(parent.child_token());
        assert!(ctx.check().is_ok());

        parent.cancel();
        assert!(matches!(ctx.check(), Err(AuthError::Cancelled)));
    }

    #[test]
    fn test_elapsed_deadline() {
        let ctx = Context::background().with_timeout(Duration::ZERO);
        assert!(matches!(ctx.check(), Err(AuthError::DeadlineExceeded)));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let ctx = Context::background()
            .with_timeout(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(3600));
        let remaining = ctx.deadline().unwrap() - Instant::now();
        assert!(remaining <= Duration::from_secs(1));
    }
}
