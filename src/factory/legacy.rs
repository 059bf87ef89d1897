//! Begin/end form of session creation.
//!
//! [`SessionFactory::begin_create_session`] spawns the create state machine
//! on the current Tokio runtime and returns a [`PendingSession`] that can be
//! canceled. [`SessionFactory::end_create_session`] waits for the outcome.
//! Attempts are bounded by `retry.legacy_max_attempts`, which is configured
//! separately from the awaitable path.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use super::SessionFactory;
use crate::broker::Session;
use crate::models::start_info::StartInfo;
use crate::{Result, SessionError};

/// A create-session call running in the background.
#[derive(Debug)]
pub struct PendingSession {
    cancel: CancellationToken,
    handle: JoinHandle<Result<Session>>,
}

impl PendingSession {
    /// Request cancellation.
    ///
    /// A remote call already in flight is allowed to finish; if it succeeded,
    /// whatever it acquired is released and the outcome is
    /// `SessionError::Canceled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the background call has completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl SessionFactory {
    /// Start creating a session in the background.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` when called outside a Tokio runtime.
    pub fn begin_create_session(
        &self,
        info: StartInfo,
        durable: bool,
        timeout: Option<Duration>,
    ) -> Result<PendingSession> {
        self.begin_create_session_with(info, durable, timeout, |_| {})
    }

    /// Start creating a session and invoke `on_complete` with the outcome
    /// before it is handed to [`end_create_session`](Self::end_create_session).
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` when called outside a Tokio runtime.
    pub fn begin_create_session_with<F>(
        &self,
        info: StartInfo,
        durable: bool,
        timeout: Option<Duration>,
        on_complete: F,
    ) -> Result<PendingSession>
    where
        F: FnOnce(&Result<Session>) + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|err| {
            SessionError::Config(format!("begin_create_session needs a tokio runtime: {err}"))
        })?;

        let cancel = CancellationToken::new();
        let factory = self.clone();
        let policy = self.legacy_policy();
        let token = cancel.clone();
        let span = info_span!(
            "begin_create_session",
            head_node = %info.target.head_node,
            service = %info.service_name,
            durable
        );

        let handle = runtime.spawn(
            async move {
                let outcome = factory
                    .run_create(&info, durable, timeout, policy, token)
                    .await;
                on_complete(&outcome);
                outcome
            }
            .instrument(span),
        );

        Ok(PendingSession { cancel, handle })
    }

    /// Wait for a call started by
    /// [`begin_create_session`](Self::begin_create_session).
    ///
    /// # Errors
    ///
    /// Returns the call's own error, `SessionError::Canceled` if it was
    /// canceled, or `SessionError::Unclassified` if the task panicked.
    #[allow(clippy::unused_self)] // Paired with begin_create_session on the same receiver.
    pub async fn end_create_session(&self, pending: PendingSession) -> Result<Session> {
        match pending.handle.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => Err(SessionError::Canceled(
                "create session task aborted".into(),
            )),
            Err(err) => Err(SessionError::Unclassified(format!(
                "create session task failed: {err}"
            ))),
        }
    }
}
