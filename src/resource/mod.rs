//! Cluster-side session resource collaborator.
//!
//! A [`ResourceProvider`] is bound to one head node and one binding; the
//! factory builds a fresh provider for every credential attempt and drops
//! the previous one when a credential is rejected.

pub mod in_memory;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::models::session_info::{Allocation, SessionInfo};
use crate::models::start_info::{AttachInfo, Binding, ClusterTarget, StartInfo};
use crate::Result;

pub use in_memory::InMemoryResourceProvider;

/// Allocates, describes, and frees session resources on the scheduler.
pub trait ResourceProvider: Send + Sync {
    /// Allocate a new session resource.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Authentication`, `SessionError::Fault`,
    /// `SessionError::Communication`, or `SessionError::Timeout` as reported
    /// by the scheduler.
    fn allocate_resource<'a>(
        &'a self,
        info: &'a StartInfo,
        durable: bool,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Allocation>> + Send + 'a>>;

    /// Describe an existing session resource.
    ///
    /// # Errors
    ///
    /// Same classes as [`ResourceProvider::allocate_resource`].
    fn get_resource_info<'a>(
        &'a self,
        info: &'a AttachInfo,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<SessionInfo>> + Send + 'a>>;

    /// Release a session resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler rejects the release.
    fn free_resource<'a>(
        &'a self,
        target: &'a ClusterTarget,
        session_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Builds live providers bound to a head node.
pub trait ProviderFactory: Send + Sync {
    /// Provider for `target` using `binding`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` if the target cannot be reached with
    /// the requested binding.
    fn build(&self, target: &ClusterTarget, binding: &Binding)
        -> Result<Arc<dyn ResourceProvider>>;
}
