use super::*;

use std::time::Duration;

use tokio::time::timeout;

#[tokio::test]
async fn missing_key_loads_as_none() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert!(storage.load("queue_state").await.expect("load").is_none());
}

#[tokio::test]
async fn save_overwrites_and_bumps_revision() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.save("queue_state", "first").await.expect("save");
    storage.save("queue_state", "second").await.expect("save");

    let blob = storage
        .fetch_blob("queue_state")
        .await
        .expect("fetch")
        .expect("blob");
    assert_eq!(blob.value, "second");
    assert_eq!(blob.revision, 2);
    assert_eq!(
        storage.load("queue_state").await.expect("load").as_deref(),
        Some("second")
    );
}

#[tokio::test]
async fn keys_are_independent() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.save("a", "one").await.expect("save a");
    storage.save("b", "two").await.expect("save b");
    assert_eq!(storage.load("a").await.expect("load").as_deref(), Some("one"));
    assert_eq!(storage.load("b").await.expect("load").as_deref(), Some("two"));
}

#[tokio::test]
async fn save_notifies_watchers_of_the_same_key_only() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let mut watched = storage.watch("queue_state");
    let mut other = storage.watch("other");

    storage.save("queue_state", "payload").await.expect("save");

    assert_eq!(watched.recv().await.expect("recv"), "payload");
    assert!(other.try_recv().is_err());
}

#[tokio::test]
async fn save_succeeds_after_every_watcher_is_gone() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    drop(storage.watch("queue_state"));

    storage.save("queue_state", "unseen").await.expect("save");
    let mut late = storage.watch("queue_state");
    storage.save("queue_state", "seen").await.expect("save");

    assert_eq!(late.recv().await.expect("recv"), "seen");
    assert!(late.try_recv().is_err());
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("kiosk.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn poller_republishes_writes_from_another_handle() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("shared.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let writer = Storage::new(&database_url).await.expect("writer");
    let reader = Storage::new(&database_url).await.expect("reader");
    let mut changes = reader.watch("queue_state");
    let poller = reader.spawn_change_poller(Duration::from_millis(20));

    // Let the poller observe the empty key before the first write lands.
    tokio::time::sleep(Duration::from_millis(60)).await;
    writer.save("queue_state", "from-writer").await.expect("save");

    let received = timeout(Duration::from_secs(2), changes.recv())
        .await
        .expect("poll within timeout")
        .expect("recv");
    assert_eq!(received, "from-writer");
    poller.abort();
}

#[tokio::test]
async fn poller_does_not_echo_own_writes() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let mut changes = storage.watch("queue_state");
    let poller = storage.spawn_change_poller(Duration::from_millis(10));

    storage.save("queue_state", "local").await.expect("save");
    assert_eq!(changes.recv().await.expect("recv"), "local");

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(changes.try_recv().is_err());
    poller.abort();
}

#[tokio::test]
async fn memory_storage_clones_share_blobs_and_feed() {
    let kiosk = MemoryStorage::new();
    let display = kiosk.clone();
    let mut changes = display.watch("queue_state");

    kiosk.save("queue_state", "doc").await.expect("save");

    assert_eq!(display.load("queue_state").await.expect("load").as_deref(), Some("doc"));
    assert_eq!(changes.recv().await.expect("recv"), "doc");
}

#[tokio::test]
async fn put_silently_skips_the_feed() {
    let storage = MemoryStorage::new();
    let mut changes = storage.watch("queue_state");

    storage.put_silently("queue_state", "seeded");

    assert_eq!(storage.get("queue_state").as_deref(), Some("seeded"));
    assert!(changes.try_recv().is_err());
}

#[test]
fn memory_url_has_no_parent_directory() {
    assert!(sqlite_path("sqlite::memory:").is_none());
    assert_eq!(
        sqlite_path("sqlite://./data/kiosk.db?mode=rwc"),
        Some(PathBuf::from("./data/kiosk.db"))
    );
}
