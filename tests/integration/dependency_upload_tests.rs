//! Dependency files flowing through session creation.

use std::fs;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cluster_session::errors::FaultCode;
use cluster_session::files::{self, DataClient, FileStore, InMemoryFileStore};
use cluster_session::models::credential::CredType;
use cluster_session::models::start_info::ClusterTarget;
use cluster_session::{Result, SessionError, SessionFactory};

use super::test_helpers::{
    start_info, test_config, Harness, ScriptedBrokers, ScriptedNegotiator, ScriptedProvider,
    SharedProviders,
};

/// Store whose creates after the first hang well past any test deadline.
#[derive(Default)]
struct StallingStore {
    inner: InMemoryFileStore,
    creates: AtomicUsize,
}

impl FileStore for StallingStore {
    fn open<'a>(
        &'a self,
        target: &'a ClusterTarget,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DataClient>>> + Send + 'a>> {
        self.inner.open(target, client_id)
    }

    fn create<'a>(
        &'a self,
        target: &'a ClusterTarget,
        client_id: &'a str,
        content: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<DataClient>> + Send + 'a>> {
        Box::pin(async move {
            if self.creates.fetch_add(1, Ordering::SeqCst) >= 1 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.inner.create(target, client_id, content).await
        })
    }

    fn delete<'a>(
        &'a self,
        target: &'a ClusterTarget,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.inner.delete(target, client_id)
    }
}

fn write_files(dir: &tempfile::TempDir) -> Vec<std::path::PathBuf> {
    let model = dir.path().join("model.bin");
    let config = dir.path().join("service.json");
    fs::write(&model, b"weights").expect("write model");
    fs::write(&config, br#"{"threads":4}"#).expect("write config");
    vec![model, config]
}

#[tokio::test]
async fn uploaded_ids_are_recorded_on_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(
        ScriptedProvider::new(&["net.tcp://a/bl"]),
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(None),
    );
    let mut info = start_info();
    info.dependency_files = write_files(&dir);

    let session = harness
        .factory
        .create_session(&info, false, None)
        .await
        .expect("session");

    assert_eq!(session.data_client_ids().len(), 2);
    assert_eq!(harness.files.ids().len(), 2);
    let calls = harness.provider.allocate_calls.lock().unwrap().clone();
    assert_eq!(calls[0].dependency_file_ids, session.data_client_ids());
}

#[tokio::test]
async fn credential_retry_does_not_upload_twice() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = ScriptedProvider::new(&["net.tcp://a/bl"]).then_allocate(Err(
        SessionError::Fault {
            code: FaultCode::PASSWORD_REQUIRED,
            message: "password required".into(),
        },
    ));
    let harness = Harness::new(
        provider,
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(Some(CredType::UsernamePassword)),
    );
    let mut info = start_info();
    info.dependency_files = write_files(&dir);

    harness
        .factory
        .create_session(&info, false, None)
        .await
        .expect("session");

    assert_eq!(harness.provider.allocation_count(), 2);
    assert_eq!(harness.files.create_count(), 2, "one upload per file");
}

#[tokio::test]
async fn identical_content_is_reused_across_sessions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(
        ScriptedProvider::new(&["net.tcp://a/bl"]),
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(None),
    );
    let mut info = start_info();
    info.dependency_files = write_files(&dir);

    let first = harness
        .factory
        .create_session(&info, false, None)
        .await
        .expect("first session");
    let second = harness
        .factory
        .create_session(&info, false, None)
        .await
        .expect("second session");

    assert_eq!(first.data_client_ids(), second.data_client_ids());
    assert_eq!(harness.files.create_count(), 2);
}

#[tokio::test]
async fn failed_creation_deletes_only_files_it_uploaded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = write_files(&dir);
    let harness = Harness::new(
        ScriptedProvider::new(&["net.tcp://a/bl"]),
        ScriptedBrokers::unreachable(&["net.tcp://a/bl"]),
        ScriptedNegotiator::new(None),
    );
    let mut info = start_info();

    let existing = files::upload_dependencies(harness.files.as_ref(), &info.target, &paths[..1])
        .await
        .expect("seed upload");
    assert_eq!(existing.created.len(), 1);

    info.dependency_files = paths;
    let err = harness
        .factory
        .create_session(&info, false, None)
        .await
        .expect_err("no broker");

    assert!(matches!(err, SessionError::NoBrokerNodeFound(_)), "got {err:?}");
    assert_eq!(
        harness.files.ids(),
        existing.ids,
        "pre-existing blob survives, new blob is rolled back"
    );
    assert_eq!(harness.provider.freed(), vec![42]);
}

#[tokio::test]
async fn unreadable_dependency_fails_before_allocation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(
        ScriptedProvider::new(&["net.tcp://a/bl"]),
        ScriptedBrokers::default(),
        ScriptedNegotiator::new(None),
    );
    let mut info = start_info();
    info.dependency_files = vec![dir.path().join("missing.bin")];

    let err = harness
        .factory
        .create_session(&info, false, None)
        .await
        .expect_err("missing file");

    assert!(matches!(err, SessionError::Io(_)), "got {err:?}");
    assert_eq!(harness.provider.allocation_count(), 0);
}

#[tokio::test]
async fn stalled_upload_times_out_and_rolls_back_created_blobs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(StallingStore::default());
    let provider = Arc::new(ScriptedProvider::new(&["net.tcp://a/bl"]));
    let factory = SessionFactory::new(
        test_config(),
        Arc::new(ScriptedNegotiator::new(None)),
        Arc::new(ScriptedBrokers::default()),
        store.clone(),
    )
    .with_providers(Arc::new(SharedProviders::new(Arc::clone(&provider))));
    let mut info = start_info();
    info.dependency_files = write_files(&dir);

    let err = factory
        .create_session(&info, false, Some(Duration::from_millis(200)))
        .await
        .expect_err("upload overran the deadline");

    assert!(matches!(err, SessionError::Timeout { .. }), "got {err:?}");
    assert_eq!(store.creates.load(Ordering::SeqCst), 2);
    assert!(store.inner.ids().is_empty(), "first blob rolled back");
    assert_eq!(provider.allocation_count(), 0);
}
