//! Unit tests for error display, classification, and fault codes.

use std::time::Duration;

use cluster_session::errors::{FailureKind, FaultCode};
use cluster_session::models::credential::CredType;
use cluster_session::models::session_info::JobState;
use cluster_session::SessionError;

#[test]
fn display_prefixes_name_the_failure_area() {
    let cases = [
        (SessionError::Config("bad".into()), "config: bad"),
        (
            SessionError::InvalidCredential("password is missing".into()),
            "invalid credential: password is missing",
        ),
        (SessionError::Authentication("nope".into()), "authentication: nope"),
        (SessionError::Communication("reset".into()), "communication: reset"),
        (
            SessionError::NoBrokerNodeFound("3 tried".into()),
            "no broker node found: 3 tried",
        ),
        (SessionError::Canceled("by caller".into()), "canceled: by caller"),
        (SessionError::Io("denied".into()), "io: denied"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn timeout_display_carries_duration_and_operation() {
    let err = SessionError::Timeout {
        timeout: Duration::from_secs(5),
        message: "allocate resource".into(),
    };
    assert_eq!(err.to_string(), "timeout after 5s: allocate resource");
    assert_eq!(err.kind(), FailureKind::Timeout);
}

#[test]
fn session_starting_reports_job_state() {
    let err = SessionError::SessionStarting {
        session_id: 12,
        state: JobState::Queued,
    };
    assert_eq!(err.to_string(), "session 12 is still starting (Queued)");
    assert_eq!(err.fault_code(), Some(FaultCode::SESSION_NOT_FOUND));
}

#[test]
fn local_preconditions_are_terminal_kinds() {
    assert_eq!(
        SessionError::Config("x".into()).kind(),
        FailureKind::LocalPrecondition
    );
    assert_eq!(
        SessionError::InvalidCredential("x".into()).kind(),
        FailureKind::LocalPrecondition
    );
    assert_eq!(
        SessionError::AlreadyRegistered("x".into()).kind(),
        FailureKind::LocalPrecondition
    );
}

#[test]
fn every_credential_code_maps_to_its_kind() {
    let cases = [
        (FaultCode::PASSWORD_REQUIRED, CredType::UsernamePassword),
        (FaultCode::CERTIFICATE_REQUIRED, CredType::Certificate),
        (FaultCode::CLOUD_TOKEN_REQUIRED, CredType::CloudToken),
        (FaultCode::INTEGRATED_AUTH_REQUIRED, CredType::Integrated),
    ];
    for (code, cred_type) in cases {
        let err = SessionError::Fault {
            code,
            message: String::new(),
        };
        assert_eq!(err.kind(), FailureKind::CredentialFault(cred_type));
    }
    assert_eq!(FaultCode::ACCESS_DENIED.cred_type(), None);
}

#[test]
fn broker_failures_surface_broker_unavailable_code() {
    assert_eq!(
        SessionError::NoBrokerNodeFound("none".into()).fault_code(),
        Some(FaultCode::BROKER_UNAVAILABLE)
    );
    assert_eq!(
        SessionError::BrokerUnavailable("gone".into()).fault_code(),
        Some(FaultCode::BROKER_UNAVAILABLE)
    );
    assert_eq!(SessionError::Communication("reset".into()).fault_code(), None);
}

#[test]
fn fault_code_displays_as_hex() {
    assert_eq!(FaultCode::SESSION_LIMIT_EXCEEDED.to_string(), "0x0205");
}

#[test]
fn io_errors_convert_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: SessionError = io.into();
    assert!(matches!(err, SessionError::Io(_)));
    assert_eq!(err.kind(), FailureKind::Unclassified);
}
