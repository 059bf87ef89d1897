//! Error types shared across the session-establishment layer.
//!
//! Every failure surfaced by the factory is a [`SessionError`]. The retry
//! machinery never inspects variants directly; it asks
//! [`SessionError::kind`] for a [`FailureKind`] and feeds that into the
//! pure transition functions in [`crate::factory::retry`].

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::credential::CredType;
use crate::models::session_info::JobState;

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Small integer carried on a remote session fault.
///
/// Upstream CLI/API layers translate these into user-facing errors, so the
/// numeric values are part of the external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultCode(pub i32);

impl FaultCode {
    /// Fault code could not be determined.
    pub const UNKNOWN: Self = Self(0);
    /// The scheduler requires a username/password credential.
    pub const PASSWORD_REQUIRED: Self = Self(0x0101);
    /// The scheduler requires a client certificate.
    pub const CERTIFICATE_REQUIRED: Self = Self(0x0102);
    /// The scheduler requires a cloud identity token.
    pub const CLOUD_TOKEN_REQUIRED: Self = Self(0x0103);
    /// The scheduler requires integrated (domain) authentication.
    pub const INTEGRATED_AUTH_REQUIRED: Self = Self(0x0104);
    /// The caller is authenticated but not allowed to use the resource.
    pub const ACCESS_DENIED: Self = Self(0x0201);
    /// The requested session does not exist.
    pub const SESSION_NOT_FOUND: Self = Self(0x0202);
    /// The requested service is not deployed on the cluster.
    pub const SERVICE_NOT_FOUND: Self = Self(0x0203);
    /// A session parameter was rejected by the scheduler.
    pub const INVALID_ARGUMENT: Self = Self(0x0204);
    /// The user or cluster session quota is exhausted.
    pub const SESSION_LIMIT_EXCEEDED: Self = Self(0x0205);
    /// No broker node is currently able to host the session.
    pub const BROKER_UNAVAILABLE: Self = Self(0x0206);

    /// Credential kind the remote end is asking for, if this code is one of
    /// the credential-negotiation codes.
    #[must_use]
    pub fn cred_type(self) -> Option<CredType> {
        match self {
            Self::PASSWORD_REQUIRED => Some(CredType::UsernamePassword),
            Self::CERTIFICATE_REQUIRED => Some(CredType::Certificate),
            Self::CLOUD_TOKEN_REQUIRED => Some(CredType::CloudToken),
            Self::INTEGRATED_AUTH_REQUIRED => Some(CredType::Integrated),
            _ => None,
        }
    }
}

impl Display for FaultCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Error enumeration covering all session-establishment failure modes.
#[derive(Debug)]
pub enum SessionError {
    /// Invalid configuration or call argument; never retried.
    Config(String),
    /// Missing or placeholder credential detected before any remote call.
    InvalidCredential(String),
    /// Credential rejected at the transport or message-security layer.
    Authentication(String),
    /// Remote session fault carrying a [`FaultCode`].
    Fault {
        /// Fault code reported by the remote end.
        code: FaultCode,
        /// Fault reason text.
        message: String,
    },
    /// Transport-level failure reaching a remote endpoint.
    Communication(String),
    /// The establishment deadline elapsed.
    Timeout {
        /// Timeout configured for the whole establishment call.
        timeout: Duration,
        /// Operation that was in flight.
        message: String,
    },
    /// Every candidate broker endpoint failed.
    NoBrokerNodeFound(String),
    /// The session exists but its job has not reached the broker yet.
    SessionStarting {
        /// Session being attached.
        session_id: u64,
        /// Job state reported by the scheduler.
        state: JobState,
    },
    /// The session has no broker and is not going to get one.
    BrokerUnavailable(String),
    /// A response consumer is already registered on the session.
    AlreadyRegistered(String),
    /// The caller canceled the establishment.
    Canceled(String),
    /// Local file-system failure.
    Io(String),
    /// Anything the classifier does not recognise.
    Unclassified(String),
}

/// Classification of a [`SessionError`] for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Local precondition; terminal.
    LocalPrecondition,
    /// Credential rejected without a fault code.
    Authentication,
    /// Fault whose code names the credential kind the remote end expects.
    CredentialFault(CredType),
    /// Any other session fault; terminal.
    Fault(FaultCode),
    /// Transport failure; terminal during allocation, failover during broker connect.
    Communication,
    /// Deadline elapsed; terminal.
    Timeout,
    /// Caller cancellation; terminal.
    Canceled,
    /// Everything else; terminal.
    Unclassified,
}

impl SessionError {
    /// Classify this error for the retry and failover tables.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config(_) | Self::InvalidCredential(_) | Self::AlreadyRegistered(_) => {
                FailureKind::LocalPrecondition
            }
            Self::Authentication(_) => FailureKind::Authentication,
            Self::Fault { code, .. } => code
                .cred_type()
                .map_or(FailureKind::Fault(*code), FailureKind::CredentialFault),
            Self::Communication(_) => FailureKind::Communication,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Canceled(_) => FailureKind::Canceled,
            Self::NoBrokerNodeFound(_)
            | Self::SessionStarting { .. }
            | Self::BrokerUnavailable(_)
            | Self::Io(_)
            | Self::Unclassified(_) => FailureKind::Unclassified,
        }
    }

    /// Fault code for upstream translation, when one applies.
    #[must_use]
    pub fn fault_code(&self) -> Option<FaultCode> {
        match self {
            Self::Fault { code, .. } => Some(*code),
            Self::NoBrokerNodeFound(_) | Self::BrokerUnavailable(_) => {
                Some(FaultCode::BROKER_UNAVAILABLE)
            }
            Self::SessionStarting { .. } => Some(FaultCode::SESSION_NOT_FOUND),
            _ => None,
        }
    }
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::InvalidCredential(msg) => write!(f, "invalid credential: {msg}"),
            Self::Authentication(msg) => write!(f, "authentication: {msg}"),
            Self::Fault { code, message } => write!(f, "fault {code}: {message}"),
            Self::Communication(msg) => write!(f, "communication: {msg}"),
            Self::Timeout { timeout, message } => {
                write!(f, "timeout after {timeout:?}: {message}")
            }
            Self::NoBrokerNodeFound(msg) => write!(f, "no broker node found: {msg}"),
            Self::SessionStarting { session_id, state } => {
                write!(f, "session {session_id} is still starting ({state:?})")
            }
            Self::BrokerUnavailable(msg) => write!(f, "broker unavailable: {msg}"),
            Self::AlreadyRegistered(msg) => write!(f, "already registered: {msg}"),
            Self::Canceled(msg) => write!(f, "canceled: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Unclassified(msg) => write!(f, "unclassified: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<toml::de::Error> for SessionError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unclassified(format!("json: {err}"))
    }
}

impl From<keyring::Error> for SessionError {
    fn from(err: keyring::Error) -> Self {
        Self::InvalidCredential(format!("credential store: {err}"))
    }
}
