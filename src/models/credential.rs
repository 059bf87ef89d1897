//! Credential kinds, credential values, and the route used to obtain them.

use std::fmt::{Debug, Formatter};

use serde::{Deserialize, Serialize};

use crate::{Result, SessionError};

/// Secret value callers pass when they want the factory to look the real
/// secret up instead.
pub const PLACEHOLDER_SECRET: &str = "*";

/// Category of credential the remote end currently expects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredType {
    /// Not yet known; the first attempt runs with whatever the caller supplied.
    #[default]
    Undetermined,
    /// Integrated (domain) identity of the calling process.
    Integrated,
    /// Explicit username and password.
    UsernamePassword,
    /// Client certificate identified by thumbprint.
    Certificate,
    /// Bearer token issued by the cloud identity provider.
    CloudToken,
}

impl CredType {
    /// Combine the current expectation with a newly observed one.
    ///
    /// An undetermined observation never replaces a concrete expectation.
    #[must_use]
    pub fn escalate(self, observed: Self) -> Self {
        if observed == Self::Undetermined {
            self
        } else {
            observed
        }
    }

    /// Whether the credential kind is still unknown.
    #[must_use]
    pub fn is_undetermined(self) -> bool {
        self == Self::Undetermined
    }
}

/// How a credential is obtained for a given head node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRoute {
    /// Cloud/IaaS-hosted cluster or HTTP-only transport: token based.
    Cloud,
    /// On-premise cluster, parameterized by the expected credential kind.
    OnPremise(CredType),
}

impl CredentialRoute {
    /// Credential kind the route will present.
    #[must_use]
    pub fn expected(self) -> CredType {
        match self {
            Self::Cloud => CredType::CloudToken,
            Self::OnPremise(kind) => kind,
        }
    }
}

/// Credential material supplied by the caller or the credential store.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Credential {
    /// Account name, `DOMAIN\user` or `user@domain`.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for the account.
    #[serde(default)]
    pub password: Option<String>,
    /// Thumbprint of a client certificate in the local store.
    #[serde(default)]
    pub certificate_thumbprint: Option<String>,
    /// Bearer token for the cloud route.
    #[serde(default)]
    pub token: Option<String>,
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("certificate_thumbprint", &self.certificate_thumbprint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credential {
    /// Username/password credential.
    #[must_use]
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    /// Certificate credential.
    #[must_use]
    pub fn certificate(thumbprint: impl Into<String>) -> Self {
        Self {
            certificate_thumbprint: Some(thumbprint.into()),
            ..Self::default()
        }
    }

    /// Cloud token credential.
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Check the credential against what `route` will present, locally.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidCredential` when a required field is
    /// missing or still holds [`PLACEHOLDER_SECRET`].
    pub fn validate_for(&self, route: CredentialRoute) -> Result<()> {
        match route {
            CredentialRoute::Cloud | CredentialRoute::OnPremise(CredType::CloudToken) => {
                require("token", self.token.as_deref())
            }
            CredentialRoute::OnPremise(CredType::UsernamePassword) => {
                require("username", self.username.as_deref())?;
                require("password", self.password.as_deref())
            }
            CredentialRoute::OnPremise(CredType::Certificate) => {
                require("certificate thumbprint", self.certificate_thumbprint.as_deref())
            }
            CredentialRoute::OnPremise(CredType::Undetermined | CredType::Integrated) => {
                match self.password.as_deref() {
                    Some(PLACEHOLDER_SECRET) => Err(SessionError::InvalidCredential(
                        "password is a placeholder".into(),
                    )),
                    _ => Ok(()),
                }
            }
        }
    }
}

fn require(field: &str, value: Option<&str>) -> Result<()> {
    match value.map(str::trim) {
        None | Some("") => Err(SessionError::InvalidCredential(format!("{field} is missing"))),
        Some(PLACEHOLDER_SECRET) => Err(SessionError::InvalidCredential(format!(
            "{field} is a placeholder"
        ))),
        Some(_) => Ok(()),
    }
}
