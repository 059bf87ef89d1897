//! Runtime session descriptors returned by the scheduler.

use serde::{Deserialize, Serialize};

/// Scheduler-side state of the job backing a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is being configured.
    #[default]
    Configuring,
    /// Job was submitted.
    Submitted,
    /// Scheduler is validating the job.
    Validating,
    /// Job is waiting for resources.
    Queued,
    /// Job tasks are running.
    Running,
    /// Job is shutting down.
    Finishing,
    /// Job completed.
    Finished,
    /// Job failed.
    Failed,
    /// Job was canceled.
    Canceled,
}

impl JobState {
    /// Whether the broker may still appear for a job in this state.
    #[must_use]
    pub fn is_pre_running(self) -> bool {
        matches!(
            self,
            Self::Configuring | Self::Submitted | Self::Validating | Self::Queued | Self::Running
        )
    }
}

/// Resolved runtime descriptor of an allocated session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionInfo {
    /// Scheduler-assigned session id.
    pub id: u64,
    /// Resolved service version.
    #[serde(default)]
    pub service_version: Option<String>,
    /// Endpoint carrying requests to the broker.
    #[serde(default)]
    pub broker_endpoint: Option<String>,
    /// Endpoint for broker control operations.
    #[serde(default)]
    pub controller_endpoint: Option<String>,
    /// Endpoint from which responses are pulled.
    #[serde(default)]
    pub response_endpoint: Option<String>,
    /// Broker runs inside the client process.
    #[serde(default)]
    pub use_in_process_broker: bool,
    /// Session state survives a client restart.
    #[serde(default)]
    pub durable: bool,
    /// State of the backing job.
    #[serde(default)]
    pub job_state: JobState,
}

impl SessionInfo {
    /// Descriptor for `id` with no endpoints resolved yet.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            service_version: None,
            broker_endpoint: None,
            controller_endpoint: None,
            response_endpoint: None,
            use_in_process_broker: false,
            durable: false,
            job_state: JobState::Running,
        }
    }

    /// Copy of this descriptor with every endpoint passed through `rewrite`.
    #[must_use]
    pub fn map_endpoints(&self, rewrite: impl Fn(&str) -> String) -> Self {
        Self {
            broker_endpoint: self.broker_endpoint.as_deref().map(&rewrite),
            controller_endpoint: self.controller_endpoint.as_deref().map(&rewrite),
            response_endpoint: self.response_endpoint.as_deref().map(&rewrite),
            ..self.clone()
        }
    }
}

/// Outcome of one allocation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Scheduler-assigned session id.
    pub session_id: u64,
    /// Resolved service version.
    pub service_version: Option<String>,
    /// Descriptor of a pooled session, when the scheduler reused one.
    pub session_info: Option<SessionInfo>,
    /// Broker-launcher endpoints in the order they must be tried.
    pub candidates: Vec<String>,
}
