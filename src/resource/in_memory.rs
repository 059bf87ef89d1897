//! No-op resource provider used in debug mode.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

use super::ResourceProvider;
use crate::models::session_info::{Allocation, JobState, SessionInfo};
use crate::models::start_info::{AttachInfo, ClusterTarget, StartInfo};
use crate::{Result, SessionError};

/// Endpoint handed out for debug sessions.
pub const LOOPBACK_ENDPOINT: &str = "net.tcp://localhost:9087/broker";

/// First id handed out; keeps debug ids clear of scheduler ids.
const FIRST_DEBUG_SESSION_ID: u64 = 1_000_000;

/// In-memory provider: every allocation succeeds with one loopback candidate
/// and an in-process broker descriptor.
#[derive(Debug)]
pub struct InMemoryResourceProvider {
    next_id: AtomicU64,
    live: Mutex<HashSet<u64>>,
}

impl Default for InMemoryResourceProvider {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(FIRST_DEBUG_SESSION_ID),
            live: Mutex::new(HashSet::new()),
        }
    }
}

impl InMemoryResourceProvider {
    /// Empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `session_id` is allocated and not yet freed.
    #[must_use]
    pub fn is_live(&self, session_id: u64) -> bool {
        self.live
            .lock()
            .map(|live| live.contains(&session_id))
            .unwrap_or(false)
    }

    fn descriptor(session_id: u64, service_version: Option<String>) -> SessionInfo {
        SessionInfo {
            id: session_id,
            service_version,
            broker_endpoint: Some(LOOPBACK_ENDPOINT.into()),
            controller_endpoint: Some(format!("{LOOPBACK_ENDPOINT}/controller")),
            response_endpoint: Some(format!("{LOOPBACK_ENDPOINT}/response")),
            use_in_process_broker: true,
            durable: false,
            job_state: JobState::Running,
        }
    }
}

impl ResourceProvider for InMemoryResourceProvider {
    fn allocate_resource<'a>(
        &'a self,
        info: &'a StartInfo,
        durable: bool,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Allocation>> + Send + 'a>> {
        Box::pin(async move {
            let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.live
                .lock()
                .map_err(|_| SessionError::Unclassified("provider mutex poisoned".into()))?
                .insert(session_id);
            debug!(session_id, durable, service = %info.service_name, "debug allocation");
            Ok(Allocation {
                session_id,
                service_version: info.service_version.clone(),
                session_info: None,
                candidates: vec![LOOPBACK_ENDPOINT.into()],
            })
        })
    }

    fn get_resource_info<'a>(
        &'a self,
        info: &'a AttachInfo,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<SessionInfo>> + Send + 'a>> {
        Box::pin(async move { Ok(Self::descriptor(info.session_id, None)) })
    }

    fn free_resource<'a>(
        &'a self,
        _target: &'a ClusterTarget,
        session_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.live
                .lock()
                .map_err(|_| SessionError::Unclassified("provider mutex poisoned".into()))?
                .remove(&session_id);
            debug!(session_id, "debug allocation freed");
            Ok(())
        })
    }
}
