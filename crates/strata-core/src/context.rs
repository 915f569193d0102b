use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::error::{FsError, FsResult};

/// Request-scoped bundle threaded through every file-system call.
///
/// One context is created per inbound request (or per CLI invocation) and
/// cloned down the backend stack. Cancellation is cooperative: operations
/// re-check the token at every suspension point, and in-flight remote
/// requests abort when it fires.
#[derive(Debug, Clone)]
pub struct Context {
    operation_id: String,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new() -> Self {
        Self::with_operation_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_operation_id(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast once the request is cancelled or past its deadline.
    pub fn check_cancelled(&self) -> FsResult<()> {
        if self.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::Context;
    use crate::error::FsError;

    #[test]
    fn cancel_makes_checks_fail() {
        let ctx = Context::new();
        assert!(ctx.check_cancelled().is_ok());
        ctx.cancel();
        assert_eq!(ctx.check_cancelled(), Err(FsError::Cancelled));
    }

    #[test]
    fn expired_deadline_counts_as_cancelled() {
        let ctx = Context::new().with_deadline(Instant::now() - Duration::from_secs(1));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn clones_share_the_cancel_token() {
        let ctx = Context::new();
        let child = ctx.clone();
        ctx.cancel();
        assert!(child.is_cancelled());
    }
}
