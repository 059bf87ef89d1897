//! Retry and failover decision tables.
//!
//! Both functions here are pure: the establishment state machine records
//! what happened in a [`RetryCursor`], classifies the failure into a
//! [`FailureKind`], and asks what to do next. Nothing in this module
//! performs I/O.

use crate::errors::FailureKind;
use crate::models::credential::CredType;

/// Attempt and prompt bounds for one establishment call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum allocation (or resource-info) calls.
    pub max_attempts: u32,
    /// Maximum interactive credential prompts.
    pub max_prompts: u32,
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` calls.
    #[must_use]
    pub fn can_retry(&self, attempts: u32, prompted_for_credential: bool, prompt_count: u32) -> bool {
        attempts < self.max_attempts && (!prompted_for_credential || prompt_count < self.max_prompts)
    }
}

/// Counters carried across attempts of one establishment call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCursor {
    /// Allocation calls made so far.
    pub attempts: u32,
    /// Interactive prompts shown so far.
    pub prompt_count: u32,
    /// The most recent attempt prompted the user.
    pub prompted_last: bool,
    /// Credential kind expected for the next attempt.
    pub cred_type: CredType,
    /// The cluster has already been asked for its credential kind.
    pub cluster_queried: bool,
}

impl RetryCursor {
    /// Record one allocation call.
    pub fn record_attempt(&mut self, prompted: bool) {
        self.attempts += 1;
        self.prompted_last = prompted;
        if prompted {
            self.prompt_count += 1;
        }
    }

    /// Apply a resolved credential kind; never regresses to undetermined.
    pub fn escalate(&mut self, observed: CredType) {
        self.cred_type = self.cred_type.escalate(observed);
    }
}

/// How to learn the credential kind for the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Ask the cluster; fall back to `fallback` if it cannot say.
    QueryCluster {
        /// Kind implied by the failure itself.
        fallback: CredType,
    },
    /// Use the kind implied by the failure.
    Observed(CredType),
}

/// Decision after an allocation (or resource-info) failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStep {
    /// Clear the credential, escalate, and try again.
    Retry(Escalation),
    /// Clean up and surface the error.
    Fail,
}

/// Decision after a broker creation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerStep {
    /// Try the candidate at this index.
    NextCandidate(usize),
    /// Every candidate failed with a communication error.
    Exhausted,
    /// Clean up and surface the error.
    Fail,
}

/// Retry table for allocation failures.
#[must_use]
pub fn after_allocation_failure(
    policy: &RetryPolicy,
    cursor: &RetryCursor,
    kind: FailureKind,
) -> AllocationStep {
    let observed = match kind {
        FailureKind::Authentication => CredType::Undetermined,
        FailureKind::CredentialFault(kind) => kind,
        FailureKind::LocalPrecondition
        | FailureKind::Fault(_)
        | FailureKind::Communication
        | FailureKind::Timeout
        | FailureKind::Canceled
        | FailureKind::Unclassified => return AllocationStep::Fail,
    };

    if !policy.can_retry(cursor.attempts, cursor.prompted_last, cursor.prompt_count) {
        return AllocationStep::Fail;
    }

    if cursor.cluster_queried {
        AllocationStep::Retry(Escalation::Observed(observed))
    } else {
        AllocationStep::Retry(Escalation::QueryCluster { fallback: observed })
    }
}

/// Failover table for broker creation failures at candidate `index`.
#[must_use]
pub fn after_broker_failure(index: usize, candidates: usize, kind: FailureKind) -> BrokerStep {
    match kind {
        FailureKind::Communication if index + 1 < candidates => BrokerStep::NextCandidate(index + 1),
        FailureKind::Communication => BrokerStep::Exhausted,
        _ => BrokerStep::Fail,
    }
}

/// Combine a cluster answer with the kind implied by the failure.
///
/// The cluster's answer wins when it is concrete.
#[must_use]
pub fn resolve_escalation(cluster: Option<CredType>, fallback: CredType) -> CredType {
    cluster.map_or(fallback, |answer| fallback.escalate(answer))
}
