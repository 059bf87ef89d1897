//! Credential negotiation collaborator.
//!
//! The factory never touches credential storage directly. It asks a
//! [`CredentialNegotiator`] to fill in a credential for the current route,
//! checks it locally, and on rejection asks the negotiator what kind of
//! credential the cluster actually wants.

pub mod keyring_store;

use std::future::Future;
use std::pin::Pin;

use crate::errors::FaultCode;
use crate::models::credential::{CredType, Credential, CredentialRoute};
use crate::models::start_info::{Binding, ClusterTarget};
use crate::Result;

pub use keyring_store::KeyringNegotiator;

/// Credential produced by [`CredentialNegotiator::retrieve_credential`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievedCredential {
    /// Credential to use for the next attempt; `None` keeps integrated identity.
    pub credential: Option<Credential>,
    /// The user was asked interactively.
    pub prompted_user: bool,
}

/// Collaborator that supplies, validates, persists, and forgets credentials.
pub trait CredentialNegotiator: Send + Sync {
    /// Produce a credential for `route`.
    ///
    /// Returns the caller's own credential untouched when it already fits.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store cannot be read.
    fn retrieve_credential<'a>(
        &'a self,
        target: &'a ClusterTarget,
        route: CredentialRoute,
        binding: &'a Binding,
    ) -> Pin<Box<dyn Future<Output = Result<RetrievedCredential>> + Send + 'a>>;

    /// Reject a missing or placeholder credential before any remote call.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidCredential` if the credential is unusable.
    fn check_credential(&self, target: &ClusterTarget, route: CredentialRoute) -> Result<()> {
        target
            .credential
            .clone()
            .unwrap_or_default()
            .validate_for(route)
    }

    /// Ask the cluster which credential kind it expects.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster cannot be queried.
    fn cred_type_from_cluster<'a>(
        &'a self,
        target: &'a ClusterTarget,
    ) -> Pin<Box<dyn Future<Output = Result<CredType>> + Send + 'a>>;

    /// Credential kind implied by a fault code.
    fn cred_type_from_fault_code(&self, code: FaultCode) -> CredType {
        code.cred_type().unwrap_or_default()
    }

    /// Persist the credential that just succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store rejects the write.
    fn save_credential<'a>(
        &'a self,
        target: &'a ClusterTarget,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Remove any persisted credential for the target.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store rejects the delete.
    fn purge_credential<'a>(
        &'a self,
        target: &'a ClusterTarget,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Copy of `target` without credential material.
    fn clear_credential(&self, target: &ClusterTarget) -> ClusterTarget {
        target.with_credential(None)
    }
}

/// Scheduler query for the credential kind a cluster expects.
pub trait ClusterProbe: Send + Sync {
    /// Query the head node.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Communication` if the head node is unreachable.
    fn expected_cred_type<'a>(
        &'a self,
        target: &'a ClusterTarget,
    ) -> Pin<Box<dyn Future<Output = Result<CredType>> + Send + 'a>>;
}

/// Probe that always answers with the same credential kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub CredType);

impl ClusterProbe for FixedProbe {
    fn expected_cred_type<'a>(
        &'a self,
        _target: &'a ClusterTarget,
    ) -> Pin<Box<dyn Future<Output = Result<CredType>> + Send + 'a>> {
        let kind = self.0;
        Box::pin(async move { Ok(kind) })
    }
}
