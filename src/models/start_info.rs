//! Caller-supplied session parameters.
//!
//! [`StartInfo`] and [`AttachInfo`] are owned by the caller and borrowed by
//! the factory. The factory never writes through the borrow: it works on a
//! private copy and replaces the whole [`ClusterTarget`] whenever the
//! credential changes between attempts.

use std::env;
use std::ops::BitOr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::credential::{CredType, Credential, CredentialRoute};
use crate::{Result, SessionError};

/// Head-node suffixes that identify a cloud-hosted cluster.
const CLOUD_HOST_SUFFIXES: &[&str] = &[".cloudapp.net", ".cloudapp.azure.com"];

/// Bitmask of transports the caller is willing to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportScheme(pub u32);

impl TransportScheme {
    /// No transport enabled.
    pub const NONE: Self = Self(0);
    /// Binary TCP transport with message security.
    pub const NET_TCP: Self = Self(0x1);
    /// SOAP over HTTPS.
    pub const HTTP: Self = Self(0x2);
    /// REST web API gateway.
    pub const WEB_API: Self = Self(0x4);
    /// Caller-provided binding.
    pub const CUSTOM: Self = Self(0x8);

    /// Selection order when several transports are enabled.
    const PRIORITY: [Self; 4] = [Self::NET_TCP, Self::CUSTOM, Self::HTTP, Self::WEB_API];

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Whether no transport is enabled.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether this single scheme is carried over HTTP.
    #[must_use]
    pub fn is_http_based(self) -> bool {
        self == Self::HTTP || self == Self::WEB_API
    }

    /// Highest-priority scheme enabled in the mask.
    #[must_use]
    pub fn preferred(self) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|scheme| self.contains(*scheme))
    }
}

impl Default for TransportScheme {
    fn default() -> Self {
        Self::NET_TCP
    }
}

impl BitOr for TransportScheme {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Transport and credential kind used for one remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// Single transport scheme chosen from the caller's mask.
    pub scheme: TransportScheme,
    /// Credential kind the binding presents.
    pub cred_type: CredType,
}

/// Head node, transport, and credential shared by create and attach flows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClusterTarget {
    /// Scheduler head node host name.
    pub head_node: String,
    /// Enabled transports.
    #[serde(default)]
    pub transport_scheme: TransportScheme,
    /// Cluster runs on cloud IaaS virtual machines.
    #[serde(default)]
    pub iaas: bool,
    /// Use the in-memory provider and the in-process broker.
    #[serde(default)]
    pub debug_mode: bool,
    /// Credential for the current attempt; never read from config files.
    #[serde(skip)]
    pub credential: Option<Credential>,
}

impl ClusterTarget {
    /// Target with default transport and no credential.
    #[must_use]
    pub fn new(head_node: impl Into<String>) -> Self {
        Self {
            head_node: head_node.into(),
            transport_scheme: TransportScheme::default(),
            iaas: false,
            debug_mode: false,
            credential: None,
        }
    }

    /// Whether the head node lives in a cloud deployment.
    #[must_use]
    pub fn is_cloud_hosted(&self) -> bool {
        let host = self.head_node.to_ascii_lowercase();
        self.iaas || CLOUD_HOST_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
    }

    /// Pick the binding for the next remote call.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` if no transport is enabled.
    pub fn binding(&self, cred_type: CredType) -> Result<Binding> {
        let scheme = self.transport_scheme.preferred().ok_or_else(|| {
            SessionError::Config(format!(
                "transport scheme {:#x} enables no known transport",
                self.transport_scheme.0
            ))
        })?;
        Ok(Binding { scheme, cred_type })
    }

    /// Credential route for the given expectation.
    #[must_use]
    pub fn credential_route(&self, binding: &Binding) -> CredentialRoute {
        if self.is_cloud_hosted() || binding.scheme.is_http_based() {
            CredentialRoute::Cloud
        } else {
            CredentialRoute::OnPremise(binding.cred_type)
        }
    }

    /// Copy of this target carrying `credential` instead of the current one.
    #[must_use]
    pub fn with_credential(&self, credential: Option<Credential>) -> Self {
        Self {
            credential,
            ..self.clone()
        }
    }

    /// DNS domain of the head node (`hn.contoso.com` → `contoso.com`).
    #[must_use]
    pub fn head_node_domain(&self) -> Option<&str> {
        self.head_node
            .split_once('.')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }

    /// Account name used for data ownership.
    #[must_use]
    pub fn owner(&self) -> String {
        self.credential
            .as_ref()
            .and_then(|cred| cred.username.clone())
            .filter(|name| !name.trim().is_empty())
            .or_else(|| env::var("USER").ok())
            .or_else(|| env::var("USERNAME").ok())
            .unwrap_or_else(|| "anonymous".into())
    }

    fn validate(&self) -> Result<()> {
        if self.head_node.trim().is_empty() {
            return Err(SessionError::Config("head_node must not be empty".into()));
        }
        if self.transport_scheme.is_empty() {
            return Err(SessionError::Config(
                "transport_scheme must enable at least one transport".into(),
            ));
        }
        Ok(())
    }
}

/// Parameters for allocating a new session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StartInfo {
    /// Where and how to connect.
    #[serde(flatten)]
    pub target: ClusterTarget,
    /// Service the session hosts.
    pub service_name: String,
    /// Pinned service version, if any.
    #[serde(default)]
    pub service_version: Option<String>,
    /// Minimum compute units to allocate.
    #[serde(default)]
    pub min_units: Option<u32>,
    /// Maximum compute units to allocate.
    #[serde(default)]
    pub max_units: Option<u32>,
    /// Local files the service needs on the compute nodes.
    #[serde(default)]
    pub dependency_files: Vec<PathBuf>,
    /// Data-client ids of the uploaded dependency files.
    #[serde(skip)]
    pub dependency_file_ids: Vec<String>,
    /// Allow the scheduler to hand back a pooled session.
    #[serde(default)]
    pub use_session_pool: bool,
}

impl StartInfo {
    /// Start info for `service_name` on `head_node` with defaults elsewhere.
    #[must_use]
    pub fn new(head_node: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            target: ClusterTarget::new(head_node),
            service_name: service_name.into(),
            service_version: None,
            min_units: None,
            max_units: None,
            dependency_files: Vec::new(),
            dependency_file_ids: Vec::new(),
            use_session_pool: false,
        }
    }

    /// Whether every dependency file already has a data-client id.
    #[must_use]
    pub fn dependencies_uploaded(&self) -> bool {
        self.dependency_file_ids.len() >= self.dependency_files.len()
    }

    /// Validate caller-supplied parameters.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` on an empty head node or service name,
    /// an empty transport mask, or an inverted unit range.
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        if self.service_name.trim().is_empty() {
            return Err(SessionError::Config("service_name must not be empty".into()));
        }
        if let (Some(min), Some(max)) = (self.min_units, self.max_units) {
            if min > max {
                return Err(SessionError::Config(format!(
                    "min_units ({min}) exceeds max_units ({max})"
                )));
            }
        }
        Ok(())
    }
}

/// Parameters for reconnecting to an existing session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AttachInfo {
    /// Where and how to connect.
    #[serde(flatten)]
    pub target: ClusterTarget,
    /// Session to attach to.
    pub session_id: u64,
}

impl AttachInfo {
    /// Attach info for `session_id` on `head_node`.
    #[must_use]
    pub fn new(head_node: impl Into<String>, session_id: u64) -> Self {
        Self {
            target: ClusterTarget::new(head_node),
            session_id,
        }
    }

    /// Validate caller-supplied parameters.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` on an empty head node or transport mask.
    pub fn validate(&self) -> Result<()> {
        self.target.validate()
    }
}
