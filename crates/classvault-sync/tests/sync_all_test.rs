//! sync_all against an in-memory remote: last-writer-wins per key, failure
//! isolation, and the single-flight latch.

mod common;

use std::sync::Arc;

use classvault_storage::RemoteStore;
use classvault_store::{KvBackend, LocalStore, MemoryBackend};
use classvault_sync::{AuthSession, CloudSync};
use common::*;
use secrecy::SecretString;
use tokio::sync::Notify;

#[tokio::test]
async fn local_only_key_is_uploaded_with_its_ledger_timestamp() {
    let store = memory_store();
    let remote = memory_remote();
    store
        .set_raw_item_with_timestamp("classes", "s:i:classes", ts("2024-01-01T10:00:00Z"))
        .unwrap();

    let result = engine(store, remote.clone()).sync_all().await;

    assert!(result.success, "{:?}", result.errors);
    assert!(result.uploaded.contains(&"classes".to_string()));
    assert!(!result.downloaded.contains(&"classes".to_string()));

    let row = remote.fetch(USER, "classes").await.unwrap().unwrap();
    assert_eq!(row.updated_at, ts("2024-01-01T10:00:00Z"));
    assert_eq!(row.encrypted_data, "s:i:classes");
}

#[tokio::test]
async fn newer_local_overwrites_remote() {
    let store = memory_store();
    let remote = memory_remote();
    remote
        .upsert(&row("exams", "old", "2024-01-01T10:00:00Z"))
        .await
        .unwrap();
    store
        .set_raw_item_with_timestamp("exams", "new", ts("2024-01-02T10:00:00Z"))
        .unwrap();

    let result = engine(store, remote.clone()).sync_all().await;

    assert_eq!(result.uploaded, vec!["exams"]);
    let row = remote.fetch(USER, "exams").await.unwrap().unwrap();
    assert_eq!(row.encrypted_data, "new");
    assert_eq!(row.updated_at, ts("2024-01-02T10:00:00Z"));
}

#[tokio::test]
async fn newer_remote_is_adopted_with_remote_timestamp() {
    let store = memory_store();
    let remote = memory_remote();
    store
        .set_raw_item_with_timestamp("lessons", "old", ts("2024-01-01T10:00:00Z"))
        .unwrap();
    remote
        .upsert(&row("lessons", "new", "2024-01-03T10:00:00Z"))
        .await
        .unwrap();
    remote
        .upsert(&row("themes", "remote-only", "2024-01-01T00:00:00Z"))
        .await
        .unwrap();

    let sync = engine(store.clone(), remote);
    let result = sync.sync_all().await;

    assert!(result.success);
    assert_eq!(result.downloaded, vec!["lessons", "themes"]);
    assert!(result.uploaded.is_empty());
    assert_eq!(store.get_raw_item("lessons").unwrap().as_deref(), Some("new"));
    assert_eq!(
        store.get_timestamp("lessons").unwrap(),
        Some(ts("2024-01-03T10:00:00Z"))
    );

    // Adopting the remote timestamp means the next pass has nothing to do.
    let again = sync.sync_all().await;
    assert!(again.success);
    assert!(again.uploaded.is_empty() && again.downloaded.is_empty());
}

#[tokio::test]
async fn equal_timestamps_change_nothing() {
    let store = memory_store();
    let remote = memory_remote();
    store
        .set_raw_item_with_timestamp("holidays", "local", ts("2024-01-01T10:00:00Z"))
        .unwrap();
    remote
        .upsert(&row("holidays", "remote", "2024-01-01T10:00:00Z"))
        .await
        .unwrap();

    let result = engine(store.clone(), remote.clone()).sync_all().await;

    assert!(result.success);
    assert!(result.uploaded.is_empty() && result.downloaded.is_empty());
    assert_eq!(store.get_raw_item("holidays").unwrap().as_deref(), Some("local"));
    assert_eq!(
        remote.fetch(USER, "holidays").await.unwrap().unwrap().encrypted_data,
        "remote"
    );
}

#[tokio::test]
async fn local_only_keys_never_leave_the_device() {
    let store = memory_store();
    store.set_password(SecretString::from("pw"));
    store.set_item("lessonDrafts", "draft").await.unwrap();
    store.set_item("uiState", "x").await.unwrap();
    let remote = memory_remote();

    let result = engine(store, remote.clone()).sync_all().await;

    assert!(result.success);
    assert!(result.uploaded.is_empty());
    assert_eq!(remote.count(USER).await.unwrap(), 0);
}

#[tokio::test]
async fn one_failing_key_does_not_block_siblings() {
    let store = memory_store();
    store
        .set_raw_item_with_timestamp("classes", "c", ts("2024-01-01T10:00:00Z"))
        .unwrap();
    store
        .set_raw_item_with_timestamp("exams", "e", ts("2024-01-01T10:00:00Z"))
        .unwrap();
    let inner = memory_remote();
    let remote = Arc::new(FaultyRemote::new(inner.clone()).failing_on("exams"));

    let result = engine(store, remote).sync_all().await;

    assert!(!result.success);
    assert!(result.uploaded.contains(&"classes".to_string()));
    assert!(result.has_error_for("exams"));
    assert_eq!(result.errors.len(), 1);
    assert!(inner.fetch(USER, "classes").await.unwrap().is_some());
    assert!(inner.fetch(USER, "exams").await.unwrap().is_none());
}

#[tokio::test]
async fn failed_sync_does_not_record_last_sync() {
    let store = memory_store();
    store
        .set_raw_item_with_timestamp("exams", "e", ts("2024-01-01T10:00:00Z"))
        .unwrap();
    let remote = Arc::new(FaultyRemote::new(memory_remote()).failing_on("exams"));

    let sync = engine(store.clone(), remote);
    assert!(!sync.sync_all().await.success);
    assert!(store.last_sync().unwrap().is_none());
}

#[tokio::test]
async fn successful_sync_records_last_sync() {
    let store = memory_store();
    let sync = engine(store.clone(), memory_remote());
    assert!(sync.sync_all().await.success);
    assert!(store.last_sync().unwrap().is_some());
}

#[tokio::test]
async fn second_sync_while_running_is_rejected_without_remote_calls() {
    let store = memory_store();
    let gate = Arc::new(Notify::new());
    let remote = Arc::new(FaultyRemote::new(memory_remote()).gated(gate.clone()));
    let sync = Arc::new(engine(store, remote.clone()));

    let first = tokio::spawn({
        let sync = sync.clone();
        async move { sync.sync_all().await }
    });
    while remote.calls() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(sync.is_syncing());

    let second = sync.sync_all().await;
    assert!(!second.success);
    assert_eq!(second.errors[0].message, "sync already in progress");
    assert_eq!(remote.calls(), 1, "rejected call must not touch the remote");

    // Bulk operations share the latch.
    assert!(!sync.upload_all().await.success);
    assert!(!sync.download_all().await.success);
    assert_eq!(remote.calls(), 1);

    gate.notify_one();
    let first = first.await.unwrap();
    assert!(first.success);
    assert!(!sync.is_syncing());
}

#[tokio::test]
async fn unconfigured_backend_fails_softly() {
    let store = memory_store();
    let sync = CloudSync::new(store, None, Arc::new(AuthSession::signed_in(USER)));

    let result = sync.sync_all().await;
    assert!(!result.success);
    assert_eq!(result.errors[0].message, "cloud sync is not configured");
    assert!(!sync.upload_data_type("classes").await.success);
    assert!(!sync.has_cloud_data().await.unwrap());
}

#[tokio::test]
async fn signed_out_user_is_not_authenticated() {
    let store = memory_store();
    let remote = Arc::new(FaultyRemote::new(memory_remote()));
    let sync = CloudSync::new(
        store,
        Some(remote.clone() as Arc<dyn RemoteStore>),
        Arc::new(AuthSession::new()),
    );

    let result = sync.sync_all().await;
    assert!(!result.success);
    assert_eq!(result.errors[0].message, "not authenticated");
    assert_eq!(remote.calls(), 0);

    sync.auth().sign_in(USER);
    assert!(sync.sync_all().await.success);
}

#[tokio::test]
async fn single_key_primitives() {
    let store = memory_store();
    let remote = memory_remote();
    let sync = engine(store.clone(), remote.clone());

    // Nothing on either side: both are no-ops, not errors.
    let up = sync.upload_data_type("schedules").await;
    assert!(up.success && up.uploaded.is_empty());
    let down = sync.download_data_type("schedules").await;
    assert!(down.success && down.downloaded.is_empty());

    store
        .set_raw_item_with_timestamp("schedules", "v1", ts("2024-04-01T08:00:00Z"))
        .unwrap();
    assert_eq!(sync.upload_data_type("schedules").await.uploaded, vec!["schedules"]);

    remote
        .upsert(&row("schedules", "v2", "2024-04-02T08:00:00Z"))
        .await
        .unwrap();
    assert_eq!(
        sync.download_data_type("schedules").await.downloaded,
        vec!["schedules"]
    );
    assert_eq!(store.get_raw_item("schedules").unwrap().as_deref(), Some("v2"));

    assert!(!sync.upload_data_type("lessonDrafts").await.success);
}

#[tokio::test]
async fn plaintext_key_without_ledger_entry_gets_stamped_on_upload() {
    // Data written before the ledger existed.
    let backend = Arc::new(MemoryBackend::new());
    backend.set("appSettings", "{}").unwrap();
    let store = Arc::new(LocalStore::with_backend(backend, fast_cipher()));
    assert!(store.get_timestamp("appSettings").unwrap().is_none());
    let remote = memory_remote();

    let sync = engine(store.clone(), remote.clone());
    assert_eq!(sync.upload_data_type("appSettings").await.uploaded, vec!["appSettings"]);
    let row = remote.fetch(USER, "appSettings").await.unwrap().unwrap();
    assert_eq!(store.get_timestamp("appSettings").unwrap(), Some(row.updated_at));
}

#[tokio::test]
async fn cloud_data_probe_and_delete() {
    let store = memory_store();
    let remote = memory_remote();
    let sync = engine(store, remote.clone());
    assert!(!sync.has_cloud_data().await.unwrap());

    remote
        .upsert(&row("classes", "c", "2024-01-01T00:00:00Z"))
        .await
        .unwrap();
    remote
        .upsert(&row("exams", "e", "2024-01-01T00:00:00Z"))
        .await
        .unwrap();
    assert!(sync.has_cloud_data().await.unwrap());

    assert_eq!(sync.delete_all_cloud_data().await.unwrap(), 2);
    assert!(!sync.has_cloud_data().await.unwrap());
}

#[tokio::test]
async fn encrypted_values_round_trip_between_devices() {
    let remote = memory_remote();
    let password = || SecretString::from("shared password");

    let laptop = memory_store();
    laptop.setup_password(password()).await.unwrap();
    laptop.set_item("classes", r#"[{"name":"7b"}]"#).await.unwrap();
    assert_eq!(
        engine(laptop.clone(), remote.clone()).sync_all().await.uploaded,
        vec!["classes"]
    );

    // The server only ever sees ciphertext.
    let row = remote.fetch(USER, "classes").await.unwrap().unwrap();
    assert!(!row.encrypted_data.contains("7b"));

    let tablet = memory_store();
    tablet.set_password(password());
    assert_eq!(
        engine(tablet.clone(), remote.clone()).sync_all().await.downloaded,
        vec!["classes"]
    );
    assert_eq!(
        tablet.get_item("classes").await.unwrap().as_deref(),
        Some(r#"[{"name":"7b"}]"#)
    );

    // An edit on the tablet flows back to the laptop.
    tablet.set_item("classes", r#"[{"name":"8a"}]"#).await.unwrap();
    assert!(engine(tablet, remote.clone()).sync_all().await.success);
    let back = engine(laptop.clone(), remote).sync_all().await;
    assert_eq!(back.downloaded, vec!["classes"]);
    assert_eq!(
        laptop.get_item("classes").await.unwrap().as_deref(),
        Some(r#"[{"name":"8a"}]"#)
    );
}

#[tokio::test]
async fn local_write_racing_an_upload_is_sent_on_the_next_pass() {
    let backend = Arc::new(InterleavingBackend::new(
        "classes",
        "new",
        ts("2024-01-02T00:00:00Z"),
    ));
    let store = Arc::new(LocalStore::with_backend(backend.clone(), fast_cipher()));
    store
        .set_raw_item_with_timestamp("classes", "old", ts("2024-01-01T00:00:00Z"))
        .unwrap();
    let remote = memory_remote();
    let sync = engine(store.clone(), remote.clone());

    // The edit lands right after the engine reads the value it uploads.
    backend.arm();
    assert_eq!(sync.sync_all().await.uploaded, vec!["classes"]);
    let row = remote.fetch(USER, "classes").await.unwrap().unwrap();
    assert_eq!(row.encrypted_data, "old");
    assert_eq!(row.updated_at, ts("2024-01-01T00:00:00Z"));

    assert_eq!(sync.sync_all().await.uploaded, vec!["classes"]);
    let row = remote.fetch(USER, "classes").await.unwrap().unwrap();
    assert_eq!(row.encrypted_data, "new");
    assert_eq!(row.updated_at, ts("2024-01-02T00:00:00Z"));
}

#[tokio::test]
async fn local_write_racing_a_download_is_kept() {
    let store = memory_store();
    store
        .set_raw_item_with_timestamp("classes", "old", ts("2024-01-01T00:00:00Z"))
        .unwrap();
    let inner = memory_remote();
    inner
        .upsert(&row("classes", "remote", "2024-03-01T00:00:00Z"))
        .await
        .unwrap();
    let remote = Arc::new(FaultyRemote::new(inner.clone()).after_fetch({
        let store = store.clone();
        move || store.set_raw_item("classes", "edited").unwrap()
    }));

    let first = engine(store.clone(), remote).sync_all().await;
    assert!(first.success, "{:?}", first.errors);
    assert!(first.downloaded.is_empty());
    assert_eq!(store.get_raw_item("classes").unwrap().as_deref(), Some("edited"));

    let second = engine(store, inner.clone()).sync_all().await;
    assert_eq!(second.uploaded, vec!["classes"]);
    assert_eq!(
        inner.fetch(USER, "classes").await.unwrap().unwrap().encrypted_data,
        "edited"
    );
}

#[tokio::test]
async fn corrupt_remote_row_does_not_block_siblings() {
    let remote = memory_remote();
    remote
        .operator()
        .write(
            &format!("classvault/user_data/{USER}/exams.json"),
            b"garbage".to_vec(),
        )
        .await
        .unwrap();
    let store = memory_store();
    store
        .set_raw_item_with_timestamp("classes", "c", ts("2024-01-01T10:00:00Z"))
        .unwrap();

    let result = engine(store, remote.clone()).sync_all().await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.uploaded, vec!["classes"]);
    assert!(remote.fetch(USER, "classes").await.unwrap().is_some());
}
