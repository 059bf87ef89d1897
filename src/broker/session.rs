//! Session handle returned by the factory.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::BrokerConnection;
use crate::callback::CallbackManager;
use crate::models::credential::CredType;
use crate::models::session_info::SessionInfo;

/// Whether session state survives a client restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Persisted by the broker.
    Durable,
    /// Lives only as long as its clients.
    Transient,
}

impl SessionKind {
    /// Kind for a durability flag.
    #[must_use]
    pub fn from_durable(durable: bool) -> Self {
        if durable {
            Self::Durable
        } else {
            Self::Transient
        }
    }
}

/// How the session was reached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EstablishmentReport {
    /// Allocation or resource-info calls made, including the successful one.
    pub allocation_attempts: u32,
    /// Credential kind in force when the session was reached.
    pub cred_type: CredType,
    /// Candidate endpoints abandoned after communication failures, in order.
    pub failed_endpoints: Vec<String>,
}

/// A client's handle to allocated resources plus a broker connection.
#[derive(Debug)]
pub struct Session {
    kind: SessionKind,
    info: SessionInfo,
    endpoint: String,
    callbacks: Arc<CallbackManager>,
    data_client_ids: Vec<String>,
    report: EstablishmentReport,
}

impl Session {
    pub(crate) fn new(
        kind: SessionKind,
        connection: BrokerConnection,
        data_client_ids: Vec<String>,
        report: EstablishmentReport,
    ) -> Self {
        let mut info = connection.info;
        info.durable = kind == SessionKind::Durable;
        Self {
            kind,
            info,
            endpoint: connection.endpoint,
            callbacks: Arc::new(CallbackManager::new()),
            data_client_ids,
            report,
        }
    }

    /// Scheduler-assigned session id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.info.id
    }

    /// Durable or transient.
    #[must_use]
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Resolved descriptor.
    #[must_use]
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Endpoint the broker connection is bound to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Response demultiplexer for this session.
    #[must_use]
    pub fn callbacks(&self) -> Arc<CallbackManager> {
        Arc::clone(&self.callbacks)
    }

    /// Data-client ids of dependency files owned by this session.
    #[must_use]
    pub fn data_client_ids(&self) -> &[String] {
        &self.data_client_ids
    }

    /// How the session was reached.
    #[must_use]
    pub fn report(&self) -> &EstablishmentReport {
        &self.report
    }

    /// Close the session's callback channel.
    pub fn close(&self) {
        self.callbacks.close();
        info!(session_id = self.info.id, "session closed");
    }
}
