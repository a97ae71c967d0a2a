use super::*;
use time::macros::datetime;

async fn make_store() -> QueueStore {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let store = QueueStore::from_pool(pool);
    store.init().await.unwrap();
    store
}

fn new_entry(filename: &str, content: &[u8]) -> NewEntry {
    NewEntry {
        payload: FilePayload::new(filename, content.to_vec()),
        filename: filename.to_string(),
    }
}

#[tokio::test]
async fn list_all_preserves_insertion_order() {
    let store = make_store().await;
    let names = ["c.txt", "a.txt", "b.txt", "a.txt"];
    let mut ids = Vec::new();
    for name in names {
        ids.push(store.insert(&new_entry(name, b"x")).await.unwrap());
    }

    let entries = store.list_all().await.unwrap();

    assert_eq!(
        entries.iter().map(|e| e.id).collect::<Vec<_>>(),
        ids,
        "ids come back in insertion order"
    );
    assert_eq!(
        entries.iter().map(|e| e.filename.as_str()).collect::<Vec<_>>(),
        names
    );
}

#[tokio::test]
async fn insert_keeps_payload_and_display_name_apart() {
    let store = make_store().await;
    let id = store
        .insert(&NewEntry {
            payload: FilePayload::new("IMG_0001.jpg", b"jpeg".to_vec()),
            filename: "holiday.jpg".into(),
        })
        .await
        .unwrap();

    let entry = store.get(id).await.unwrap().expect("entry");
    assert_eq!(entry.filename, "holiday.jpg");
    assert_eq!(entry.payload.name, "IMG_0001.jpg");
    assert_eq!(entry.payload.content, b"jpeg");
    assert_eq!(entry.last_error(), None);
    assert_eq!(entry.last_attempt_at(), None);
}

#[tokio::test]
async fn ids_are_not_reused_after_delete() {
    let store = make_store().await;
    let first = store.insert(&new_entry("a.txt", b"a")).await.unwrap();
    let second = store.insert(&new_entry("b.txt", b"b")).await.unwrap();
    store.delete_by_id(second).await.unwrap();

    let third = store.insert(&new_entry("c.txt", b"c")).await.unwrap();

    assert!(second > first);
    assert!(third > second);
}

#[tokio::test]
async fn delete_missing_id_reports_not_found() {
    let store = make_store().await;
    let id = store.insert(&new_entry("a.txt", b"a")).await.unwrap();

    assert_eq!(store.delete_by_id(id).await.unwrap(), StoreOutcome::Applied);
    assert_eq!(store.delete_by_id(id).await.unwrap(), StoreOutcome::NotFound);
    assert_eq!(
        store.delete_by_id(9_999).await.unwrap(),
        StoreOutcome::NotFound
    );
    assert!(store.is_empty().await.unwrap());
}

#[tokio::test]
async fn annotate_error_sets_message_and_time_together() {
    let store = make_store().await;
    let id = store.insert(&new_entry("x.txt", b"x")).await.unwrap();
    let at = datetime!(2024-05-01 10:15:30.250 UTC);

    let outcome = store
        .annotate_error(id, "Invalid file name.", at)
        .await
        .unwrap();

    assert_eq!(outcome, StoreOutcome::Applied);
    let entry = store.get(id).await.unwrap().unwrap();
    assert_eq!(
        entry.last_failure,
        Some(AttemptFailure {
            message: "Invalid file name.".into(),
            at,
        })
    );
}

#[tokio::test]
async fn annotate_error_overwrites_previous_diagnostic() {
    let store = make_store().await;
    let id = store.insert(&new_entry("x.txt", b"x")).await.unwrap();
    store
        .annotate_error(id, "Storage full", datetime!(2024-05-01 10:00 UTC))
        .await
        .unwrap();
    store
        .annotate_error(id, "Invalid file name.", datetime!(2024-05-01 11:00 UTC))
        .await
        .unwrap();

    let entry = store.get(id).await.unwrap().unwrap();
    assert_eq!(entry.last_error(), Some("Invalid file name."));
    assert_eq!(
        entry.last_attempt_at(),
        Some(datetime!(2024-05-01 11:00 UTC))
    );
}

#[tokio::test]
async fn annotate_missing_id_reports_not_found() {
    let store = make_store().await;
    let outcome = store
        .annotate_error(42, "gone", datetime!(2024-05-01 10:00 UTC))
        .await
        .unwrap();
    assert_eq!(outcome, StoreOutcome::NotFound);
}

#[tokio::test]
async fn schema_rejects_half_written_diagnostics() {
    let store = make_store().await;
    let id = store.insert(&new_entry("x.txt", b"x")).await.unwrap();

    let result = sqlx::query("UPDATE upload_requests SET last_error = 'oops' WHERE id = ?1")
        .bind(id)
        .execute(store.pool())
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn summaries_report_size_without_payload() {
    let store = make_store().await;
    let id = store.insert(&new_entry("doc.pdf", b"12345")).await.unwrap();
    store
        .annotate_error(id, "Storage full", datetime!(2024-05-01 10:00 UTC))
        .await
        .unwrap();

    let summaries = store.list_summaries().await.unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].filename, "doc.pdf");
    assert_eq!(summaries[0].size, 5);
    assert_eq!(
        summaries[0].last_failure.as_ref().map(|f| f.message.as_str()),
        Some("Storage full")
    );
}

#[tokio::test]
async fn slot_opens_once_and_reuses_store() {
    let dir = tempfile::tempdir().unwrap();
    let slot = StoreSlot::in_dir(&dir.path().join("nested"));

    let first = slot.get().await.unwrap();
    first.insert(&new_entry("a.txt", b"a")).await.unwrap();
    let second = slot.get().await.unwrap();

    assert!(std::ptr::eq(first, second));
    assert_eq!(second.len().await.unwrap(), 1);
    assert!(slot.db_path().exists());
}

#[tokio::test]
async fn queue_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("queue.db");
    {
        let store = QueueStore::open(&db_path).await.unwrap();
        store.insert(&new_entry("doc.pdf", b"pdf")).await.unwrap();
        store.pool().close().await;
    }

    let reopened = QueueStore::open(&db_path).await.unwrap();
    let entries = reopened.list_all().await.unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].filename, "doc.pdf");
}

#[tokio::test]
async fn blocked_data_dir_is_a_retryable_failure() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("data");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let slot = StoreSlot::in_dir(&blocker);

    let err = slot.get().await.unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
    assert!(err.is_retryable());

    // Once the path is usable again the same slot opens.
    std::fs::remove_file(&blocker).unwrap();
    assert!(slot.get().await.unwrap().is_empty().await.unwrap());
}

#[test]
fn configuration_errors_are_not_retryable() {
    assert!(!StoreError::MissingDataDir.is_retryable());
    assert!(!StoreError::InvalidTimestamp(i64::MAX).is_retryable());
}

#[test]
fn millis_conversion_round_trips() {
    let at = datetime!(2024-05-01 10:15:30.250 UTC);
    assert_eq!(from_unix_millis(unix_millis(at)).unwrap(), at);
}
