//! Create-session state machine.
//!
//! ```text
//! Allocating ──► ConnectingToBroker{index} ──► Creating ──► Finished
//!     │  ▲                │
//!     └──┘ credential     └──► AttachingPooled ──► Creating
//!          retry
//! ```
//!
//! Every step that fails after a resource was allocated frees it; every
//! failure deletes the dependency files this call uploaded. Cleanup errors
//! are logged and never replace the original error.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::deadline::Deadline;
use super::endpoints::HostRewriter;
use super::retry::{
    after_allocation_failure, after_broker_failure, AllocationStep, BrokerStep, RetryCursor,
    RetryPolicy,
};
use super::SessionFactory;
use crate::broker::{BrokerConnection, EstablishmentReport, Session, SessionKind};
use crate::files;
use crate::models::session_info::{Allocation, SessionInfo};
use crate::models::start_info::{AttachInfo, Binding, StartInfo};
use crate::resource::ResourceProvider;
use crate::{Result, SessionError};

/// Upper bound on a single cleanup call; the establishment deadline may
/// already have passed when cleanup runs.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Allocated resource awaiting a broker.
struct Connecting {
    provider: Arc<dyn ResourceProvider>,
    binding: Binding,
    session_id: u64,
    candidates: Vec<String>,
    index: usize,
}

/// Pooled session returned by the scheduler instead of broker candidates.
struct Pooled {
    provider: Arc<dyn ResourceProvider>,
    binding: Binding,
    session_info: SessionInfo,
}

/// Broker reached; the session handle is not built yet.
struct Created {
    provider: Arc<dyn ResourceProvider>,
    session_id: u64,
    connection: BrokerConnection,
    /// Shared pool sessions are never freed by a single client.
    pooled: bool,
}

enum Phase {
    Allocating,
    ConnectingToBroker(Connecting),
    AttachingPooled(Pooled),
    Creating(Created),
    Finished(Session),
}

/// One create-session call in flight.
pub(super) struct Establishment<'f> {
    factory: &'f SessionFactory,
    info: StartInfo,
    durable: bool,
    deadline: Deadline,
    policy: RetryPolicy,
    cancel: CancellationToken,
    cursor: RetryCursor,
    uploaded: Vec<String>,
    failed_endpoints: Vec<String>,
}

impl<'f> Establishment<'f> {
    pub(super) fn new(
        factory: &'f SessionFactory,
        info: StartInfo,
        durable: bool,
        deadline: Deadline,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            info,
            durable,
            deadline,
            policy,
            cancel,
            cursor: RetryCursor::default(),
            uploaded: Vec::new(),
            failed_endpoints: Vec::new(),
        }
    }

    pub(super) async fn run(mut self) -> Result<Session> {
        let mut phase = Phase::Allocating;
        loop {
            phase = match phase {
                Phase::Allocating => self.allocate().await?,
                Phase::ConnectingToBroker(connecting) => self.connect(connecting).await?,
                Phase::AttachingPooled(pooled) => self.attach_pooled(pooled).await?,
                Phase::Creating(created) => self.finish(created).await?,
                Phase::Finished(session) => return Ok(session),
            };
        }
    }

    async fn allocate(&mut self) -> Result<Phase> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(self.abandon(None, canceled("before allocation")).await);
            }

            let attempt = match self
                .factory
                .acquire_credential(&self.info.target, self.cursor.cred_type)
                .await
            {
                Ok(attempt) => attempt,
                Err(err) => return Err(self.abandon(None, err).await),
            };
            self.info.target = attempt.target;

            let provider = match self.factory.provider_for(&self.info.target, &attempt.binding) {
                Ok(provider) => provider,
                Err(err) => return Err(self.abandon(None, err).await),
            };

            if let Err(err) = self.upload_dependencies().await {
                return Err(self.abandon(None, err).await);
            }

            self.cursor.record_attempt(attempt.prompted);
            info!(
                attempt = self.cursor.attempts,
                cred_type = ?self.cursor.cred_type,
                "allocating session resource"
            );

            let result = self
                .deadline
                .run("allocate session resource", |left| {
                    provider.allocate_resource(&self.info, self.durable, left)
                })
                .await;

            let err = match result {
                Ok(allocation) => return self.allocated(provider, attempt.binding, allocation).await,
                Err(err) => err,
            };

            match after_allocation_failure(&self.policy, &self.cursor, self.factory.classify(&err)) {
                AllocationStep::Retry(escalation) => {
                    drop(provider);
                    self.info.target = self
                        .factory
                        .escalate(&self.info.target, &mut self.cursor, escalation, &self.deadline)
                        .await;
                    tokio::select! {
                        () = self.factory.pause_before_retry(self.cursor.attempts, &self.deadline) => {}
                        () = self.cancel.cancelled() => {}
                    }
                }
                AllocationStep::Fail => return Err(self.abandon(None, err).await),
            }
        }
    }

    /// Upload dependency files once per call; retries reuse the ids.
    ///
    /// Blobs are recorded in `uploaded` as soon as they exist, so a deadline
    /// that cuts the upload short still rolls them back.
    async fn upload_dependencies(&mut self) -> Result<()> {
        if self.info.dependency_files.is_empty() || self.info.dependencies_uploaded() {
            return Ok(());
        }
        let store = self.factory.files.as_ref();
        let target = &self.info.target;
        let paths = &self.info.dependency_files;
        let uploaded = &mut self.uploaded;
        let ids = self
            .deadline
            .run("upload dependency files", |_| {
                files::upload_tracked(store, target, paths, uploaded)
            })
            .await?;
        self.info.dependency_file_ids = ids;
        Ok(())
    }

    async fn allocated(
        &mut self,
        provider: Arc<dyn ResourceProvider>,
        binding: Binding,
        allocation: Allocation,
    ) -> Result<Phase> {
        let session_id = allocation.session_id;
        info!(
            session_id,
            candidates = allocation.candidates.len(),
            service_version = ?allocation.service_version,
            "session resource allocated"
        );
        if allocation.service_version.is_some() {
            self.info.service_version = allocation.service_version;
        }

        if self.cancel.is_cancelled() {
            return Err(self
                .abandon(Some((provider.as_ref(), session_id)), canceled("during allocation"))
                .await);
        }

        self.factory.save_credential(&self.info.target).await;

        if allocation.candidates.is_empty() {
            if self.info.use_session_pool {
                if let Some(session_info) = allocation.session_info {
                    debug!(session_id, "attaching to pooled session");
                    return Ok(Phase::AttachingPooled(Pooled {
                        provider,
                        binding,
                        session_info,
                    }));
                }
            }
            let err = SessionError::NoBrokerNodeFound(format!(
                "scheduler returned no broker candidates for session {session_id}"
            ));
            return Err(self.abandon(Some((provider.as_ref(), session_id)), err).await);
        }

        let candidates = match HostRewriter::for_target(&self.factory.config.iaas, &self.info.target)
        {
            Ok(Some(rewriter)) => rewriter.rewrite_all(&allocation.candidates),
            Ok(None) => allocation.candidates,
            Err(err) => return Err(self.abandon(Some((provider.as_ref(), session_id)), err).await),
        };

        Ok(Phase::ConnectingToBroker(Connecting {
            provider,
            binding,
            session_id,
            candidates,
            index: 0,
        }))
    }

    async fn connect(&mut self, mut connecting: Connecting) -> Result<Phase> {
        let session_id = connecting.session_id;
        let factory = self.factory;
        let brokers = factory.broker_factory_for(self.info.target.debug_mode);

        loop {
            if self.cancel.is_cancelled() {
                let err = canceled("before broker connection");
                return Err(self
                    .abandon(Some((connecting.provider.as_ref(), session_id)), err)
                    .await);
            }

            let Some(endpoint) = connecting.candidates.get(connecting.index).cloned() else {
                let err = SessionError::NoBrokerNodeFound(format!(
                    "no broker candidate left for session {session_id}"
                ));
                return Err(self
                    .abandon(Some((connecting.provider.as_ref(), session_id)), err)
                    .await);
            };

            info!(session_id, %endpoint, candidate = connecting.index, "creating broker");
            let result = self
                .deadline
                .run("create broker", |left| {
                    brokers.create_broker(
                        &self.info,
                        session_id,
                        self.durable,
                        left,
                        &endpoint,
                        &connecting.binding,
                    )
                })
                .await;

            let err = match result {
                Ok(connection) => {
                    return Ok(Phase::Creating(Created {
                        provider: connecting.provider,
                        session_id,
                        connection,
                        pooled: false,
                    }))
                }
                Err(err) => err,
            };

            match after_broker_failure(connecting.index, connecting.candidates.len(), err.kind()) {
                BrokerStep::NextCandidate(next) => {
                    warn!(session_id, %endpoint, %err, "broker node unreachable, failing over");
                    self.failed_endpoints.push(endpoint);
                    connecting.index = next;
                }
                BrokerStep::Exhausted => {
                    self.failed_endpoints.push(endpoint);
                    let err = SessionError::NoBrokerNodeFound(format!(
                        "all {} broker candidates for session {session_id} were unreachable; last error: {err}",
                        connecting.candidates.len()
                    ));
                    return Err(self
                        .abandon(Some((connecting.provider.as_ref(), session_id)), err)
                        .await);
                }
                BrokerStep::Fail => {
                    return Err(self
                        .abandon(Some((connecting.provider.as_ref(), session_id)), err)
                        .await);
                }
            }
        }
    }

    async fn attach_pooled(&mut self, pooled: Pooled) -> Result<Phase> {
        let session_id = pooled.session_info.id;
        let attach = AttachInfo {
            target: self.info.target.clone(),
            session_id,
        };
        match self
            .factory
            .connect_attached(&attach, pooled.session_info, &pooled.binding, &self.deadline)
            .await
        {
            Ok(connection) => Ok(Phase::Creating(Created {
                provider: pooled.provider,
                session_id,
                connection,
                pooled: true,
            })),
            Err(err) => Err(self.abandon(None, err).await),
        }
    }

    async fn finish(&mut self, created: Created) -> Result<Phase> {
        if self.cancel.is_cancelled() {
            let allocated = (!created.pooled).then_some((created.provider.as_ref(), created.session_id));
            return Err(self.abandon(allocated, canceled("during broker connection")).await);
        }

        let kind = SessionKind::from_durable(self.durable);
        let report = EstablishmentReport {
            allocation_attempts: self.cursor.attempts,
            cred_type: self.cursor.cred_type,
            failed_endpoints: mem::take(&mut self.failed_endpoints),
        };
        let session = Session::new(
            kind,
            created.connection,
            self.info.dependency_file_ids.clone(),
            report,
        );
        info!(
            session_id = session.id(),
            endpoint = session.endpoint(),
            ?kind,
            "session established"
        );
        Ok(Phase::Finished(session))
    }

    /// Release what this call acquired and hand back `err`.
    async fn abandon(
        &mut self,
        allocated: Option<(&dyn ResourceProvider, u64)>,
        err: SessionError,
    ) -> SessionError {
        if let Some((provider, session_id)) = allocated {
            let freed = tokio::time::timeout(
                CLEANUP_TIMEOUT,
                provider.free_resource(&self.info.target, session_id),
            )
            .await;
            match freed {
                Ok(Ok(())) => info!(session_id, "session resource freed"),
                Ok(Err(cleanup)) => warn!(session_id, %cleanup, "failed to free session resource"),
                Err(_) => warn!(session_id, "timed out freeing session resource"),
            }
        }

        let uploaded = mem::take(&mut self.uploaded);
        files::delete_uploaded(self.factory.files.as_ref(), &self.info.target, &uploaded).await;

        if matches!(err, SessionError::Canceled(_)) {
            info!("session establishment canceled");
        } else {
            error!(%err, "session establishment failed");
        }
        err
    }
}

fn canceled(phase: &str) -> SessionError {
    SessionError::Canceled(format!("session establishment canceled {phase}"))
}
