//! Debug-mode sessions run entirely in process.

use std::sync::Arc;

use cluster_session::broker::InProcessBrokerFactory;
use cluster_session::files::InMemoryFileStore;
use cluster_session::models::start_info::StartInfo;
use cluster_session::{SessionError, SessionFactory};

use super::test_helpers::{test_config, ScriptedNegotiator};

fn local_factory() -> SessionFactory {
    SessionFactory::new(
        test_config(),
        Arc::new(ScriptedNegotiator::new(None)),
        Arc::new(InProcessBrokerFactory),
        Arc::new(InMemoryFileStore::new()),
    )
}

#[tokio::test]
async fn debug_session_uses_in_memory_provider_and_in_process_broker() {
    let factory = local_factory();
    let mut info = StartInfo::new("localhost", "echo");
    info.target.debug_mode = true;

    let session = factory
        .create_session(&info, false, None)
        .await
        .expect("debug session");

    assert!(session.info().use_in_process_broker);
    assert!(session.id() >= 1_000_000);
    assert!(factory.debug_provider().is_live(session.id()));
    assert_eq!(session.report().allocation_attempts, 1);
}

#[tokio::test]
async fn debug_ids_are_monotonic() {
    let factory = local_factory();
    let mut info = StartInfo::new("localhost", "echo");
    info.target.debug_mode = true;

    let first = factory.create_session(&info, false, None).await.expect("first");
    let second = factory.create_session(&info, false, None).await.expect("second");

    assert!(second.id() > first.id());
}

#[tokio::test]
async fn remote_target_without_provider_factory_is_a_config_error() {
    let factory = local_factory();

    let err = factory
        .create_session(&StartInfo::new("hn.contoso.com", "echo"), false, None)
        .await
        .expect_err("no live provider configured");

    assert!(matches!(err, SessionError::Config(_)), "got {err:?}");
}
