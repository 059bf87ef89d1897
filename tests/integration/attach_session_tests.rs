//! Attach flows: resource-info lookup, broker state checks, in-process mode.

use std::sync::atomic::Ordering;
use std::time::Duration;

use cluster_session::errors::FaultCode;
use cluster_session::models::credential::{CredType, Credential};
use cluster_session::models::session_info::{JobState, SessionInfo};
use cluster_session::models::start_info::AttachInfo;
use cluster_session::{FactoryConfig, SessionError, SessionKind};
use tokio_util::sync::CancellationToken;

use super::test_helpers::{
    brokerless_session, running_session, Harness, ScriptedBrokers, ScriptedNegotiator,
    ScriptedProvider,
};

fn attach_info(session_id: u64) -> AttachInfo {
    AttachInfo::new("hn.contoso.com", session_id)
}

#[tokio::test]
async fn attach_reconnects_to_running_broker() {
    let harness = Harness::new(
        ScriptedProvider::new(&[]),
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(None),
    );

    let session = harness
        .factory
        .attach_session(&attach_info(9), None)
        .await
        .expect("attached");

    assert_eq!(session.id(), 9);
    assert_eq!(session.endpoint(), "net.tcp://bn1:9091/broker");
    assert_eq!(session.kind(), SessionKind::Transient);
    assert_eq!(harness.provider.allocation_count(), 0, "attach never allocates");
    assert_eq!(harness.provider.info_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.negotiator.saved.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn brokerless_pre_running_session_is_still_starting() {
    let provider = ScriptedProvider::new(&[])
        .then_resource_info(Ok(brokerless_session(9, JobState::Queued)));
    let harness = Harness::new(
        provider,
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(None),
    );

    let err = harness
        .factory
        .attach_session(&attach_info(9), None)
        .await
        .expect_err("not started yet");

    match err {
        SessionError::SessionStarting { session_id, state } => {
            assert_eq!(session_id, 9);
            assert_eq!(state, JobState::Queued);
        }
        other => panic!("expected SessionStarting, got {other:?}"),
    }
    assert!(harness.brokers.attached.lock().unwrap().is_empty());
}

#[tokio::test]
async fn brokerless_terminated_session_is_unavailable() {
    let provider = ScriptedProvider::new(&[])
        .then_resource_info(Ok(brokerless_session(9, JobState::Failed)));
    let harness = Harness::new(
        provider,
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(None),
    );

    let err = harness
        .factory
        .attach_session(&attach_info(9), None)
        .await
        .expect_err("terminated");

    assert!(matches!(err, SessionError::BrokerUnavailable(_)), "got {err:?}");
    assert_eq!(err.fault_code(), Some(FaultCode::BROKER_UNAVAILABLE));
}

#[tokio::test]
async fn remote_in_process_flag_bypasses_remote_broker_factory() {
    let descriptor = SessionInfo {
        use_in_process_broker: true,
        ..brokerless_session(9, JobState::Running)
    };
    let provider = ScriptedProvider::new(&[]).then_resource_info(Ok(descriptor));
    let harness = Harness::new(
        provider,
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(None),
    );

    let session = harness
        .factory
        .attach_session(&attach_info(9), None)
        .await
        .expect("in-process attach");

    assert!(session.info().use_in_process_broker);
    assert_eq!(session.endpoint(), "inproc://session/9");
    assert!(harness.brokers.attached.lock().unwrap().is_empty());
}

#[tokio::test]
async fn local_debug_mode_forces_in_process_broker() {
    let harness = Harness::new(
        ScriptedProvider::new(&[]),
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(None),
    );
    let mut info = attach_info(1_000_000);
    info.target.debug_mode = true;

    let session = harness
        .factory
        .attach_session(&info, None)
        .await
        .expect("debug attach");

    assert!(session.info().use_in_process_broker);
    assert_eq!(
        harness.provider.info_calls.load(Ordering::SeqCst),
        0,
        "debug mode uses the in-memory provider"
    );
}

#[tokio::test]
async fn iaas_attach_rewrites_all_three_endpoints() {
    let harness = Harness::new(
        ScriptedProvider::new(&[]),
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(None),
    );
    let mut info = attach_info(9);
    info.target.iaas = true;
    info.target.credential = Some(Credential::token("bearer"));

    harness
        .factory
        .attach_session(&info, None)
        .await
        .expect("attached");

    let attached = harness.brokers.attached.lock().unwrap().clone();
    assert_eq!(attached.len(), 1);
    let rewritten = &attached[0];
    assert_eq!(
        rewritten.broker_endpoint.as_deref(),
        Some("net.tcp://bn1.contoso.com:9091/broker")
    );
    assert_eq!(
        rewritten.controller_endpoint.as_deref(),
        Some("net.tcp://bn1.contoso.com:9091/broker/controller")
    );
    assert_eq!(
        rewritten.response_endpoint.as_deref(),
        Some("net.tcp://bn1.contoso.com:9091/broker/response")
    );
}

#[tokio::test]
async fn attach_retries_credential_failures_like_create() {
    let provider = ScriptedProvider::new(&[])
        .then_resource_info(Err(SessionError::Fault {
            code: FaultCode::PASSWORD_REQUIRED,
            message: "password required".into(),
        }))
        .then_resource_info(Ok(running_session(9, "net.tcp://bn2/broker")));
    let harness = Harness::new(
        provider,
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(Some(CredType::UsernamePassword)),
    );

    let session = harness
        .factory
        .attach_session(&attach_info(9), None)
        .await
        .expect("second lookup succeeds");

    assert_eq!(harness.provider.info_calls.load(Ordering::SeqCst), 2);
    assert_eq!(session.report().allocation_attempts, 2);
    assert_eq!(session.report().cred_type, CredType::UsernamePassword);
    assert!(harness.provider.freed().is_empty(), "attach never frees");
}

#[tokio::test]
async fn attach_broker_uses_known_descriptor_without_lookup() {
    let harness = Harness::new(
        ScriptedProvider::new(&[]),
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(None),
    );
    let descriptor = SessionInfo {
        durable: true,
        ..running_session(11, "net.tcp://bn4/broker")
    };

    let session = harness
        .factory
        .attach_broker(&attach_info(11), descriptor, None)
        .await
        .expect("attached");

    assert_eq!(session.kind(), SessionKind::Durable);
    assert_eq!(session.endpoint(), "net.tcp://bn4/broker");
    assert_eq!(harness.provider.info_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancel_interrupts_attach_retry_backoff() {
    let config = FactoryConfig::from_toml_str(
        "[retry]\ninitial_backoff_millis = 10000\nmax_backoff_millis = 10000\n\n[timeouts]\nsession_seconds = 60\n",
    )
    .expect("valid config");
    let provider = ScriptedProvider::new(&[]).then_resource_info(Err(SessionError::Fault {
        code: FaultCode::PASSWORD_REQUIRED,
        message: "password required".into(),
    }));
    let harness = Harness::with_config(
        config,
        provider,
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(Some(CredType::UsernamePassword)),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        harness
            .factory
            .attach_session_with_cancel(&attach_info(9), None, cancel),
    )
    .await
    .expect("cancellation cut the 10s backoff short")
    .expect_err("canceled");

    assert!(matches!(err, SessionError::Canceled(_)), "got {err:?}");
    assert_eq!(harness.provider.info_calls.load(Ordering::SeqCst), 1);
    assert!(harness.brokers.attached.lock().unwrap().is_empty());
}
