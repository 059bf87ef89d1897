//! Absolute deadline shared by every step of one establishment call.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::{Result, SessionError};

/// Deadline fixed when the establishment call starts.
///
/// Each remote call gets only what is left, so time spent acquiring
/// credentials or failing over shrinks the budget of later steps.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Deadline `timeout` from now.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` for a zero timeout.
    pub fn after(timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(SessionError::Config("timeout must be greater than zero".into()));
        }
        Ok(Self {
            expires_at: Instant::now() + timeout,
            timeout,
        })
    }

    /// Timeout the deadline was created with.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before `operation` would start too late.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Timeout` once the deadline has passed.
    pub fn remaining(&self, operation: &str) -> Result<Duration> {
        let left = self.expires_at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(self.expired(operation));
        }
        Ok(left)
    }

    /// Run `call` with whatever time is left.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Timeout` if the deadline passes first, or the
    /// call's own error.
    pub async fn run<T, F>(&self, operation: &str, call: impl FnOnce(Duration) -> F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let left = self.remaining(operation)?;
        tokio::time::timeout(left, call(left))
            .await
            .map_err(|_| self.expired(operation))?
    }

    fn expired(&self, operation: &str) -> SessionError {
        SessionError::Timeout {
            timeout: self.timeout,
            message: format!("{operation} did not complete in time"),
        }
    }
}
