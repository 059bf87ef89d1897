//! Host-name rewriting for clusters deployed on cloud virtual machines.
//!
//! Nodes in an IaaS deployment report bare machine names (`BN001`) that
//! only resolve inside the virtual network. Clients outside it reach the
//! same machines through `<name>.<domain>`.

use regex::Regex;

use crate::config::IaasConfig;
use crate::models::start_info::ClusterTarget;
use crate::{Result, SessionError};

const ENDPOINT_PATTERN: &str =
    r"^(?P<scheme>[A-Za-z][A-Za-z0-9+.\-]*://)(?P<host>[^/:\[\]]+)(?P<rest>.*)$";

/// Qualifies bare host names inside endpoint URIs.
#[derive(Debug, Clone)]
pub struct HostRewriter {
    pattern: Regex,
    domain: String,
}

impl HostRewriter {
    /// Rewriter for `target`, or `None` when no rewriting applies.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` if the endpoint pattern fails to compile.
    pub fn for_target(config: &IaasConfig, target: &ClusterTarget) -> Result<Option<Self>> {
        if !target.iaas {
            return Ok(None);
        }
        let domain = config
            .domain_suffix
            .as_deref()
            .or_else(|| target.head_node_domain())
            .map(|domain| domain.trim_matches('.').to_owned())
            .filter(|domain| !domain.is_empty());
        let Some(domain) = domain else {
            return Ok(None);
        };
        Ok(Some(Self::new(domain)?))
    }

    /// Rewriter appending `domain` to bare host names.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` if the endpoint pattern fails to compile.
    pub fn new(domain: impl Into<String>) -> Result<Self> {
        let pattern = Regex::new(ENDPOINT_PATTERN)
            .map_err(|err| SessionError::Config(format!("endpoint pattern: {err}")))?;
        Ok(Self {
            pattern,
            domain: domain.into(),
        })
    }

    /// Endpoint with its host qualified; anything unparseable or already
    /// qualified is returned unchanged.
    #[must_use]
    pub fn rewrite(&self, endpoint: &str) -> String {
        let Some(caps) = self.pattern.captures(endpoint) else {
            return endpoint.to_owned();
        };
        let host = &caps["host"];
        if host.contains('.') || host.eq_ignore_ascii_case("localhost") {
            return endpoint.to_owned();
        }
        format!(
            "{}{host}.{}{}",
            &caps["scheme"],
            self.domain,
            &caps["rest"]
        )
    }

    /// Rewrite every endpoint in order.
    #[must_use]
    pub fn rewrite_all(&self, endpoints: &[String]) -> Vec<String> {
        endpoints.iter().map(|ep| self.rewrite(ep)).collect()
    }
}
