//! Session factory: allocate or attach a session and connect its broker.
//!
//! One state machine ([`machine`]) implements the create protocol. It is
//! exposed three ways:
//!
//! - [`SessionFactory::create_session`] is awaitable.
//! - [`SessionFactory::create_session_blocking`] drives the same future on
//!   a private current-thread runtime.
//! - [`SessionFactory::begin_create_session`] and
//!   [`SessionFactory::end_create_session`] run it as a spawned, cancellable
//!   task with its own attempt bound (`retry.legacy_max_attempts`).
//!
//! Attach flows live in [`attach`]; retry decisions in [`retry`].

pub mod attach;
pub mod deadline;
pub mod endpoints;
pub mod legacy;
mod machine;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::broker::{BrokerFactory, InProcessBrokerFactory, Session};
use crate::config::FactoryConfig;
use crate::credential::CredentialNegotiator;
use crate::errors::FailureKind;
use crate::files::FileStore;
use crate::models::credential::CredType;
use crate::models::start_info::{Binding, ClusterTarget, StartInfo};
use crate::resource::{InMemoryResourceProvider, ProviderFactory, ResourceProvider};
use crate::{Result, SessionError};

use self::deadline::Deadline;
use self::machine::Establishment;
use self::retry::{resolve_escalation, Escalation, RetryCursor, RetryPolicy};

pub use self::legacy::PendingSession;

/// Credential resolved for one attempt.
#[derive(Debug, Clone)]
struct CredentialAttempt {
    target: ClusterTarget,
    binding: Binding,
    prompted: bool,
}

/// Orchestrates resource allocation, credential negotiation, and broker
/// connection.
///
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct SessionFactory {
    config: Arc<FactoryConfig>,
    negotiator: Arc<dyn CredentialNegotiator>,
    brokers: Arc<dyn BrokerFactory>,
    in_process_brokers: Arc<dyn BrokerFactory>,
    providers: Option<Arc<dyn ProviderFactory>>,
    debug_provider: Arc<InMemoryResourceProvider>,
    files: Arc<dyn FileStore>,
}

impl SessionFactory {
    /// Factory without a live provider factory; only debug-mode targets
    /// can allocate until [`with_providers`](Self::with_providers) is called.
    #[must_use]
    pub fn new(
        config: FactoryConfig,
        negotiator: Arc<dyn CredentialNegotiator>,
        brokers: Arc<dyn BrokerFactory>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            negotiator,
            brokers,
            in_process_brokers: Arc::new(InProcessBrokerFactory),
            providers: None,
            debug_provider: Arc::new(InMemoryResourceProvider::new()),
            files,
        }
    }

    /// Use `providers` to reach non-debug head nodes.
    #[must_use]
    pub fn with_providers(mut self, providers: Arc<dyn ProviderFactory>) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Replace the broker factory used for in-process brokers.
    #[must_use]
    pub fn with_in_process_brokers(mut self, brokers: Arc<dyn BrokerFactory>) -> Self {
        self.in_process_brokers = brokers;
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Provider used for debug-mode targets.
    #[must_use]
    pub fn debug_provider(&self) -> Arc<InMemoryResourceProvider> {
        Arc::clone(&self.debug_provider)
    }

    /// Allocate a session and connect a broker to it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` or `SessionError::InvalidCredential`
    /// for local preconditions, `SessionError::NoBrokerNodeFound` when every
    /// candidate broker is unreachable, `SessionError::Timeout` when the
    /// deadline passes, or the last classified remote failure once retries
    /// are exhausted.
    pub async fn create_session(
        &self,
        info: &StartInfo,
        durable: bool,
        timeout: Option<Duration>,
    ) -> Result<Session> {
        let span = info_span!(
            "create_session",
            head_node = %info.target.head_node,
            service = %info.service_name,
            durable
        );
        self.run_create(info, durable, timeout, self.policy(), CancellationToken::new())
            .instrument(span)
            .await
    }

    /// Blocking form of [`create_session`](Self::create_session).
    ///
    /// Must not be called from inside an async runtime.
    ///
    /// # Errors
    ///
    /// Same as [`create_session`](Self::create_session), plus
    /// `SessionError::Config` if the private runtime cannot be built.
    pub fn create_session_blocking(
        &self,
        info: &StartInfo,
        durable: bool,
        timeout: Option<Duration>,
    ) -> Result<Session> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| SessionError::Config(format!("failed to build tokio runtime: {err}")))?
            .block_on(self.create_session(info, durable, timeout))
    }

    async fn run_create(
        &self,
        info: &StartInfo,
        durable: bool,
        timeout: Option<Duration>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Result<Session> {
        info.validate()?;
        let deadline = Deadline::after(timeout.unwrap_or_else(|| self.config.default_timeout()))?;
        Establishment::new(self, info.clone(), durable, deadline, policy, cancel)
            .run()
            .await
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.retry.max_attempts,
            max_prompts: self.config.retry.max_credential_prompts,
        }
    }

    fn legacy_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.retry.legacy_max_attempts,
            max_prompts: self.config.retry.max_credential_prompts,
        }
    }

    /// Retrieve and locally validate a credential for the next attempt.
    async fn acquire_credential(
        &self,
        target: &ClusterTarget,
        cred_type: CredType,
    ) -> Result<CredentialAttempt> {
        let binding = target.binding(cred_type)?;
        let route = target.credential_route(&binding);
        let retrieved = self
            .negotiator
            .retrieve_credential(target, route, &binding)
            .await?;
        let target = target.with_credential(retrieved.credential);
        self.negotiator.check_credential(&target, route)?;
        debug!(?route, prompted = retrieved.prompted_user, "credential ready");
        Ok(CredentialAttempt {
            target,
            binding,
            prompted: retrieved.prompted_user,
        })
    }

    fn provider_for(
        &self,
        target: &ClusterTarget,
        binding: &Binding,
    ) -> Result<Arc<dyn ResourceProvider>> {
        if target.debug_mode {
            return Ok(self.debug_provider.clone());
        }
        match &self.providers {
            Some(providers) => providers.build(target, binding),
            None => Err(SessionError::Config(format!(
                "no resource provider configured for head node {}",
                target.head_node
            ))),
        }
    }

    fn broker_factory_for(&self, in_process: bool) -> &dyn BrokerFactory {
        if in_process {
            self.in_process_brokers.as_ref()
        } else {
            self.brokers.as_ref()
        }
    }

    /// Classify a failure, consulting the negotiator for fault codes.
    fn classify(&self, err: &SessionError) -> FailureKind {
        match err {
            SessionError::Fault { code, .. } => {
                match self.negotiator.cred_type_from_fault_code(*code) {
                    CredType::Undetermined => FailureKind::Fault(*code),
                    kind => FailureKind::CredentialFault(kind),
                }
            }
            other => other.kind(),
        }
    }

    /// Escalate the expected credential kind and forget the rejected credential.
    async fn escalate(
        &self,
        target: &ClusterTarget,
        cursor: &mut RetryCursor,
        escalation: Escalation,
        deadline: &Deadline,
    ) -> ClusterTarget {
        let observed = match escalation {
            Escalation::QueryCluster { fallback } => {
                cursor.cluster_queried = true;
                let answer = deadline
                    .run("query credential type", |_| {
                        self.negotiator.cred_type_from_cluster(target)
                    })
                    .await
                    .map_err(|err| warn!(%err, "could not query cluster credential type"))
                    .ok();
                resolve_escalation(answer, fallback)
            }
            Escalation::Observed(kind) => kind,
        };
        cursor.escalate(observed);
        warn!(
            attempt = cursor.attempts,
            cred_type = ?cursor.cred_type,
            "credential rejected, retrying"
        );

        if let Err(err) = self.negotiator.purge_credential(target).await {
            warn!(%err, "failed to purge stored credential");
        }
        self.negotiator.clear_credential(target)
    }

    /// Sleep before retry `retry`, never past the deadline.
    async fn pause_before_retry(&self, retry: u32, deadline: &Deadline) {
        let delay = self.config.backoff(retry);
        let left = deadline.remaining("retry backoff").unwrap_or_default();
        let delay = delay.min(left);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn save_credential(&self, target: &ClusterTarget) {
        if let Err(err) = self.negotiator.save_credential(target).await {
            warn!(%err, "failed to persist credential");
        }
    }
}
