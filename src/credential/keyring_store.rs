//! OS keychain backed [`CredentialNegotiator`].
//!
//! Lookup order for a missing credential: OS keychain entry keyed by head
//! node, then `CLUSTER_SESSION_*` environment variables, then the optional
//! interactive prompt hook. Only the prompt counts as "prompted user".

use std::env;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{ClusterProbe, CredentialNegotiator, RetrievedCredential};
use crate::models::credential::{CredType, Credential, CredentialRoute};
use crate::models::start_info::{Binding, ClusterTarget};
use crate::{Result, SessionError};

/// Default keychain service name.
pub const KEYRING_SERVICE: &str = "cluster-session";

const ENV_USERNAME: &str = "CLUSTER_SESSION_USERNAME";
const ENV_PASSWORD: &str = "CLUSTER_SESSION_PASSWORD";
const ENV_TOKEN: &str = "CLUSTER_SESSION_TOKEN";

/// Interactive credential prompt; returns `None` when the user declines.
pub type CredentialPrompt =
    Arc<dyn Fn(&ClusterTarget, CredentialRoute) -> Option<Credential> + Send + Sync>;

/// Negotiator backed by the OS keychain via `keyring`.
pub struct KeyringNegotiator {
    service: String,
    probe: Arc<dyn ClusterProbe>,
    prompt: Option<CredentialPrompt>,
}

impl KeyringNegotiator {
    /// Negotiator using [`KEYRING_SERVICE`] and the given cluster probe.
    #[must_use]
    pub fn new(probe: Arc<dyn ClusterProbe>) -> Self {
        Self {
            service: KEYRING_SERVICE.into(),
            probe,
            prompt: None,
        }
    }

    /// Use a different keychain service name.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Install an interactive prompt hook.
    #[must_use]
    pub fn with_prompt(mut self, prompt: CredentialPrompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Store `credential` for `head_node`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidCredential` if the keychain rejects the write.
    pub async fn store(&self, head_node: &str, credential: &Credential) -> Result<()> {
        let payload = serde_json::to_string(credential)?;
        let service = self.service.clone();
        let key = entry_key(head_node);
        tokio::task::spawn_blocking(move || {
            keyring::Entry::new(&service, &key).and_then(|entry| entry.set_password(&payload))
        })
        .await
        .map_err(|err| SessionError::Unclassified(format!("keychain task panicked: {err}")))??;
        debug!(head_node, "credential stored in keychain");
        Ok(())
    }

    /// Remove the stored credential for `head_node`; a missing entry is fine.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidCredential` if the keychain rejects the delete.
    pub async fn remove(&self, head_node: &str) -> Result<()> {
        let service = self.service.clone();
        let key = entry_key(head_node);
        let outcome = tokio::task::spawn_blocking(move || {
            keyring::Entry::new(&service, &key).and_then(|entry| entry.delete_credential())
        })
        .await
        .map_err(|err| SessionError::Unclassified(format!("keychain task panicked: {err}")))?;
        match outcome {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn load(&self, head_node: &str) -> Option<Credential> {
        let service = self.service.clone();
        let key = entry_key(head_node);
        let lookup = tokio::task::spawn_blocking(move || {
            keyring::Entry::new(&service, &key).and_then(|entry| entry.get_password())
        })
        .await;

        match lookup {
            Ok(Ok(raw)) => match serde_json::from_str::<Credential>(&raw) {
                Ok(credential) => Some(credential),
                Err(err) => {
                    warn!(head_node, %err, "stored credential is not valid json, ignoring");
                    None
                }
            },
            Ok(Err(keyring::Error::NoEntry)) => None,
            Ok(Err(err)) => {
                warn!(head_node, ?err, "keychain lookup failed, trying env vars");
                None
            }
            Err(err) => {
                warn!(head_node, %err, "keychain task panicked");
                None
            }
        }
    }
}

impl CredentialNegotiator for KeyringNegotiator {
    fn retrieve_credential<'a>(
        &'a self,
        target: &'a ClusterTarget,
        route: CredentialRoute,
        _binding: &'a Binding,
    ) -> Pin<Box<dyn Future<Output = Result<RetrievedCredential>> + Send + 'a>> {
        Box::pin(async move {
            if fits(target.credential.as_ref(), route) {
                return Ok(RetrievedCredential {
                    credential: target.credential.clone(),
                    prompted_user: false,
                });
            }

            let stored = self.load(&target.head_node).await;
            if fits(stored.as_ref(), route) {
                debug!(head_node = %target.head_node, "using keychain credential");
                return Ok(RetrievedCredential {
                    credential: stored,
                    prompted_user: false,
                });
            }

            let from_env = credential_from_env(target.credential.as_ref());
            if fits(from_env.as_ref(), route) {
                debug!(head_node = %target.head_node, "using credential from environment");
                return Ok(RetrievedCredential {
                    credential: from_env,
                    prompted_user: false,
                });
            }

            if let Some(prompt) = &self.prompt {
                let answered = prompt(target, route);
                return Ok(RetrievedCredential {
                    credential: answered.or_else(|| target.credential.clone()),
                    prompted_user: true,
                });
            }

            Ok(RetrievedCredential {
                credential: target.credential.clone(),
                prompted_user: false,
            })
        })
    }

    fn cred_type_from_cluster<'a>(
        &'a self,
        target: &'a ClusterTarget,
    ) -> Pin<Box<dyn Future<Output = Result<CredType>> + Send + 'a>> {
        self.probe.expected_cred_type(target)
    }

    fn save_credential<'a>(
        &'a self,
        target: &'a ClusterTarget,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match &target.credential {
                Some(credential) if credential.password.is_some() || credential.token.is_some() => {
                    self.store(&target.head_node, credential).await
                }
                _ => Ok(()),
            }
        })
    }

    fn purge_credential<'a>(
        &'a self,
        target: &'a ClusterTarget,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.remove(&target.head_node).await })
    }
}

/// Keychain user name for a head node.
fn entry_key(head_node: &str) -> String {
    head_node.trim().to_ascii_lowercase()
}

fn fits(credential: Option<&Credential>, route: CredentialRoute) -> bool {
    match (credential, route) {
        (None, CredentialRoute::OnPremise(CredType::Undetermined | CredType::Integrated)) => true,
        (None, _) => false,
        (Some(credential), route) => credential.validate_for(route).is_ok(),
    }
}

/// Credential assembled from `CLUSTER_SESSION_*` variables, keeping any
/// username the caller already supplied.
fn credential_from_env(current: Option<&Credential>) -> Option<Credential> {
    let username = env::var(ENV_USERNAME)
        .ok()
        .or_else(|| current.and_then(|cred| cred.username.clone()));
    let password = env::var(ENV_PASSWORD).ok();
    let token = env::var(ENV_TOKEN).ok();
    if password.is_none() && token.is_none() {
        return None;
    }
    Some(Credential {
        username,
        password,
        certificate_thumbprint: current.and_then(|cred| cred.certificate_thumbprint.clone()),
        token,
    })
}
