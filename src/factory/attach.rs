//! Attach to a session that already exists.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use super::deadline::Deadline;
use super::endpoints::HostRewriter;
use super::retry::{after_allocation_failure, AllocationStep, RetryCursor};
use super::SessionFactory;
use crate::broker::{BrokerConnection, EstablishmentReport, Session, SessionKind};
use crate::models::credential::CredType;
use crate::models::session_info::SessionInfo;
use crate::models::start_info::{AttachInfo, Binding};
use crate::{Result, SessionError};

impl SessionFactory {
    /// Look up an existing session and reconnect to its broker.
    ///
    /// Credential failures are retried exactly as in
    /// [`create_session`](Self::create_session). Nothing is freed on failure;
    /// the resource belongs to the session, not to this call.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionStarting` when the session has no broker
    /// yet but its job can still start one, `SessionError::BrokerUnavailable`
    /// when the job has terminated without one, or any error
    /// [`create_session`](Self::create_session) can return before a broker
    /// is reached.
    pub async fn attach_session(
        &self,
        info: &AttachInfo,
        timeout: Option<Duration>,
    ) -> Result<Session> {
        let span = info_span!(
            "attach_session",
            head_node = %info.target.head_node,
            session_id = info.session_id
        );
        self.run_attach(info, timeout, CancellationToken::new())
            .instrument(span)
            .await
    }

    /// [`attach_session`](Self::attach_session) that stops early once
    /// `cancel` fires.
    ///
    /// Cancellation is observed before each lookup attempt, during the
    /// retry backoff, and before the broker is contacted. A lookup already
    /// in flight is allowed to finish.
    ///
    /// # Errors
    ///
    /// Same as [`attach_session`](Self::attach_session), plus
    /// `SessionError::Canceled`.
    pub async fn attach_session_with_cancel(
        &self,
        info: &AttachInfo,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<Session> {
        let span = info_span!(
            "attach_session",
            head_node = %info.target.head_node,
            session_id = info.session_id
        );
        self.run_attach(info, timeout, cancel).instrument(span).await
    }

    async fn run_attach(
        &self,
        info: &AttachInfo,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<Session> {
        info.validate()?;
        let deadline = Deadline::after(timeout.unwrap_or_else(|| self.config.default_timeout()))?;
        let policy = self.policy();
        let mut work = info.clone();
        let mut cursor = RetryCursor::default();

        loop {
            if cancel.is_cancelled() {
                return Err(attach_canceled("before session lookup"));
            }
            let attempt = self.acquire_credential(&work.target, cursor.cred_type).await?;
            work.target = attempt.target;
            let provider = self.provider_for(&work.target, &attempt.binding)?;
            cursor.record_attempt(attempt.prompted);

            let result = deadline
                .run("get session resource info", |left| {
                    provider.get_resource_info(&work, left)
                })
                .await;

            let err = match result {
                Ok(session_info) => {
                    if cancel.is_cancelled() {
                        return Err(attach_canceled("before broker attach"));
                    }
                    self.save_credential(&work.target).await;
                    let connection = self
                        .connect_attached(&work, session_info, &attempt.binding, &deadline)
                        .await?;
                    let report = EstablishmentReport {
                        allocation_attempts: cursor.attempts,
                        cred_type: cursor.cred_type,
                        failed_endpoints: Vec::new(),
                    };
                    return Ok(attached(connection, report));
                }
                Err(err) => err,
            };

            match after_allocation_failure(&policy, &cursor, self.classify(&err)) {
                AllocationStep::Retry(escalation) => {
                    drop(provider);
                    work.target = self
                        .escalate(&work.target, &mut cursor, escalation, &deadline)
                        .await;
                    tokio::select! {
                        () = self.pause_before_retry(cursor.attempts, &deadline) => {}
                        () = cancel.cancelled() => {}
                    }
                }
                AllocationStep::Fail => return Err(err),
            }
        }
    }

    /// Connect to the broker of a session whose descriptor is already known.
    ///
    /// # Errors
    ///
    /// Same broker-side errors as [`attach_session`](Self::attach_session).
    pub async fn attach_broker(
        &self,
        info: &AttachInfo,
        session_info: SessionInfo,
        timeout: Option<Duration>,
    ) -> Result<Session> {
        info.validate()?;
        let deadline = Deadline::after(timeout.unwrap_or_else(|| self.config.default_timeout()))?;
        let binding = info.target.binding(CredType::Undetermined)?;
        let connection = self
            .connect_attached(info, session_info, &binding, &deadline)
            .instrument(info_span!("attach_broker", session_id = info.session_id))
            .await?;
        Ok(attached(connection, EstablishmentReport::default()))
    }

    /// Resolve the broker for `session_info` and connect to it.
    pub(super) async fn connect_attached(
        &self,
        info: &AttachInfo,
        session_info: SessionInfo,
        binding: &Binding,
        deadline: &Deadline,
    ) -> Result<BrokerConnection> {
        let in_process = session_info.use_in_process_broker || info.target.debug_mode;

        if session_info.broker_endpoint.is_none() && !in_process {
            let state = session_info.job_state;
            return Err(if state.is_pre_running() {
                SessionError::SessionStarting {
                    session_id: session_info.id,
                    state,
                }
            } else {
                SessionError::BrokerUnavailable(format!(
                    "session {} has no broker and its job is {state:?}",
                    session_info.id
                ))
            });
        }

        let session_info = match HostRewriter::for_target(&self.config.iaas, &info.target)? {
            Some(rewriter) => session_info.map_endpoints(|endpoint| rewriter.rewrite(endpoint)),
            None => session_info,
        };
        let session_info = SessionInfo {
            use_in_process_broker: in_process,
            ..session_info
        };

        let brokers = self.broker_factory_for(in_process);
        let connection = deadline
            .run("attach broker", |left| {
                brokers.attach_broker(info, &session_info, left, binding)
            })
            .await?;
        info!(
            session_id = session_info.id,
            endpoint = %connection.endpoint,
            in_process,
            "broker attached"
        );
        Ok(connection)
    }
}

fn attached(connection: BrokerConnection, report: EstablishmentReport) -> Session {
    let kind = SessionKind::from_durable(connection.info.durable);
    Session::new(kind, connection, Vec::new(), report)
}

fn attach_canceled(phase: &str) -> SessionError {
    SessionError::Canceled(format!("session attach canceled {phase}"))
}
