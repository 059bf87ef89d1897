//! Unit tests for start info, transport selection, and credential routes.

use cluster_session::models::credential::{CredType, Credential, CredentialRoute};
use cluster_session::models::session_info::{JobState, SessionInfo};
use cluster_session::models::start_info::{AttachInfo, ClusterTarget, StartInfo, TransportScheme};
use cluster_session::SessionError;

#[test]
fn transport_priority_prefers_custom_over_http() {
    let mask = TransportScheme::HTTP | TransportScheme::CUSTOM | TransportScheme::WEB_API;
    assert_eq!(mask.preferred(), Some(TransportScheme::CUSTOM));
    assert_eq!(TransportScheme::WEB_API.preferred(), Some(TransportScheme::WEB_API));
    assert_eq!(TransportScheme(0x40).preferred(), None);
}

#[test]
fn unknown_only_mask_has_no_binding() {
    let mut target = ClusterTarget::new("hn.contoso.com");
    target.transport_scheme = TransportScheme(0x40);
    assert!(matches!(
        target.binding(CredType::Undetermined),
        Err(SessionError::Config(_))
    ));
}

#[test]
fn iaas_flag_selects_cloud_route() {
    let mut target = ClusterTarget::new("hn.contoso.com");
    target.iaas = true;
    let binding = target.binding(CredType::UsernamePassword).expect("binding");
    assert_eq!(target.credential_route(&binding), CredentialRoute::Cloud);
    assert_eq!(CredentialRoute::Cloud.expected(), CredType::CloudToken);
}

#[test]
fn with_credential_leaves_original_untouched() {
    let target = ClusterTarget::new("hn.contoso.com");
    let updated = target.with_credential(Some(Credential::token("t")));
    assert!(target.credential.is_none());
    assert_eq!(updated.credential, Some(Credential::token("t")));
    assert_eq!(updated.head_node, target.head_node);
}

#[test]
fn owner_prefers_credential_username() {
    let target = ClusterTarget::new("hn").with_credential(Some(Credential::password(
        "contoso\\bob",
        "pw",
    )));
    assert_eq!(target.owner(), "contoso\\bob");
}

#[test]
fn route_validation_requires_matching_fields() {
    let password = Credential::password("alice", "pw");
    assert!(password
        .validate_for(CredentialRoute::OnPremise(CredType::UsernamePassword))
        .is_ok());
    assert!(password.validate_for(CredentialRoute::Cloud).is_err());
    assert!(password
        .validate_for(CredentialRoute::OnPremise(CredType::Certificate))
        .is_err());
    assert!(Credential::certificate("AB12")
        .validate_for(CredentialRoute::OnPremise(CredType::Certificate))
        .is_ok());
    assert!(Credential::token("  ")
        .validate_for(CredentialRoute::Cloud)
        .is_err());
}

#[test]
fn credential_serializes_for_keychain() {
    let json = serde_json::to_string(&Credential::token("abc")).expect("serialize");
    let back: Credential = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, Credential::token("abc"));
}

#[test]
fn start_info_tracks_uploaded_dependencies() {
    let mut info = StartInfo::new("hn", "echo");
    assert!(info.dependencies_uploaded());
    info.dependency_files = vec!["a.bin".into()];
    assert!(!info.dependencies_uploaded());
    info.dependency_file_ids = vec!["owner-abc".into()];
    assert!(info.dependencies_uploaded());
}

#[test]
fn blank_service_name_is_rejected() {
    let info = StartInfo::new("hn", "  ");
    assert!(matches!(info.validate(), Err(SessionError::Config(_))));
    let mut attach = AttachInfo::new("hn", 4);
    attach.target.transport_scheme = TransportScheme::NONE;
    assert!(matches!(attach.validate(), Err(SessionError::Config(_))));
}

#[test]
fn pre_running_states() {
    for state in [
        JobState::Configuring,
        JobState::Submitted,
        JobState::Validating,
        JobState::Queued,
        JobState::Running,
    ] {
        assert!(state.is_pre_running(), "{state:?}");
    }
    for state in [JobState::Finished, JobState::Failed, JobState::Canceled] {
        assert!(!state.is_pre_running(), "{state:?}");
    }
}

#[test]
fn map_endpoints_rewrites_only_present_endpoints() {
    let mut info = SessionInfo::new(3);
    info.broker_endpoint = Some("net.tcp://bn1/broker".into());
    let mapped = info.map_endpoints(|ep| ep.replace("bn1", "bn1.contoso.com"));
    assert_eq!(
        mapped.broker_endpoint.as_deref(),
        Some("net.tcp://bn1.contoso.com/broker")
    );
    assert!(mapped.controller_endpoint.is_none());
    assert_eq!(info.broker_endpoint.as_deref(), Some("net.tcp://bn1/broker"));
}
