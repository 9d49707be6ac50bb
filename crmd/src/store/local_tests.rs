use sqlx::sqlite::SqlitePoolOptions;

use super::*;
use crate::store::model::FollowUp;

async fn memory_store() -> LocalStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = LocalStore::from_pool(pool);
    store.init().await.unwrap();
    store
}

fn prospect(record_id: &str, name: &str, agent: &str) -> Prospect {
    Prospect {
        record_id: record_id.into(),
        name: name.into(),
        channel: record_id.into(),
        first_contact: Some("01/02/2025".into()),
        interest: Some("Alto".into()),
        summary: None,
        freshness: Freshness::Current,
        next_contact: Some("10/02/2025".into()),
        final_status: FinalStatus::InProgress,
        comments: None,
        agent: agent.into(),
        images_url: None,
        follow_ups: vec![FollowUp {
            index: 1,
            date: Some("05/02/2025".into()),
            notes: Some("llamar".into()),
        }],
        validation: ValidationFlag::Pending,
        updated_at: 100,
    }
}

fn entry(sync_id: &str, lookup_key: &str) -> NewQueueEntry {
    NewQueueEntry {
        sync_id: sync_id.into(),
        kind: MutationKind::Update,
        lookup_key: lookup_key.into(),
        payload: "{}".into(),
        created_at: 1,
    }
}

async fn seed(store: &LocalStore, prospects: &[Prospect], entries: &[NewQueueEntry]) {
    let mut tx = store.transaction().await.unwrap();
    for prospect in prospects {
        tx.upsert_prospect(prospect).await.unwrap();
    }
    for entry in entries {
        tx.insert_queue_entry(entry).await.unwrap();
    }
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn prospect_round_trips_with_follow_ups() {
    let store = memory_store().await;
    let original = prospect("5512345678", "Ana", "Lucia");
    seed(&store, std::slice::from_ref(&original), &[]).await;

    let loaded = store.get_prospect("5512345678").await.unwrap().unwrap();
    assert_eq!(loaded, original);
}

#[tokio::test]
async fn dropped_transaction_leaves_nothing_behind() {
    let store = memory_store().await;
    {
        let mut tx = store.transaction().await.unwrap();
        tx.upsert_prospect(&prospect("5512345678", "Ana", "Lucia"))
            .await
            .unwrap();
        tx.insert_queue_entry(&entry("S1", "5512345678")).await.unwrap();
    }

    assert!(store.list_prospects().await.unwrap().is_empty());
    assert!(store.list_queue().await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_sync_id_is_reported_as_such() {
    let store = memory_store().await;
    seed(&store, &[], &[entry("S1", "5512345678")]).await;

    let mut tx = store.transaction().await.unwrap();
    let err = tx
        .insert_queue_entry(&entry("S1", "5512345678"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateSyncId(id) if id == "S1"));
}

#[tokio::test]
async fn name_lookup_ignores_case_and_padding() {
    let store = memory_store().await;
    seed(&store, &[prospect("5512345678", "Ana Maria", "Lucia")], &[]).await;

    let mut tx = store.transaction().await.unwrap();
    let found = tx.prospect_by_name("  ana maria ").await.unwrap().unwrap();
    assert_eq!(found.record_id, "5512345678");
    assert!(tx.prospect_by_name("Ana").await.unwrap().is_none());
}

#[tokio::test]
async fn agent_listing_is_case_insensitive() {
    let store = memory_store().await;
    seed(
        &store,
        &[
            prospect("5500000001", "Ana", "Lucia"),
            prospect("5500000002", "Luis", "LUCIA"),
            prospect("5500000003", "Eva", "Marta"),
        ],
        &[],
    )
    .await;

    let listed = store.list_by_agent("lucia").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(store.list_prospects().await.unwrap().len(), 3);
}

#[tokio::test]
async fn next_pending_is_fifo_and_claims_once() {
    let store = memory_store().await;
    seed(&store, &[], &[entry("S1", "a"), entry("S2", "a"), entry("S3", "b")]).await;

    let first = store.next_pending().await.unwrap().unwrap();
    assert_eq!(first.sync_id, "S1");
    assert!(store.mark_processing(first.id).await.unwrap());
    assert!(!store.mark_processing(first.id).await.unwrap());

    let second = store.next_pending().await.unwrap().unwrap();
    assert_eq!(second.sync_id, "S2");
}

#[tokio::test]
async fn success_confirms_record_only_when_nothing_else_is_outstanding() {
    let store = memory_store().await;
    seed(
        &store,
        &[prospect("5512345678", "Ana", "Lucia")],
        &[entry("S1", "5512345678"), entry("S2", "5512345678")],
    )
    .await;

    let first = store.next_pending().await.unwrap().unwrap();
    store.mark_processing(first.id).await.unwrap();
    let confirmed = store
        .complete_success(&first, Some("row 2"), Some("https://drive/folder"), 10)
        .await
        .unwrap();
    assert!(!confirmed);
    let record = store.get_prospect("5512345678").await.unwrap().unwrap();
    assert_eq!(record.validation, ValidationFlag::Pending);
    assert_eq!(record.images_url.as_deref(), Some("https://drive/folder"));

    let second = store.next_pending().await.unwrap().unwrap();
    store.mark_processing(second.id).await.unwrap();
    assert!(store.complete_success(&second, None, None, 11).await.unwrap());
    let record = store.get_prospect("5512345678").await.unwrap().unwrap();
    assert_eq!(record.validation, ValidationFlag::Ok);
    assert_eq!(record.images_url.as_deref(), Some("https://drive/folder"));

    let done = store.queue_entry("S1").await.unwrap().unwrap();
    assert_eq!(done.status, QueueStatus::Success);
    assert_eq!(done.remote_ref.as_deref(), Some("row 2"));
    assert_eq!(done.completed_at, Some(10));
}

#[tokio::test]
async fn failures_return_to_pending_until_attempts_run_out() {
    let store = memory_store().await;
    seed(&store, &[], &[entry("S1", "a")]).await;
    let id = store.next_pending().await.unwrap().unwrap().id;

    store.mark_processing(id).await.unwrap();
    let status = store.record_failure(id, "timeout", 2, 5).await.unwrap();
    assert_eq!(status, QueueStatus::Pending);

    store.mark_processing(id).await.unwrap();
    let status = store.record_failure(id, "still failing", 2, 6).await.unwrap();
    assert_eq!(status, QueueStatus::Dead);

    let dead = store.queue_entry("S1").await.unwrap().unwrap();
    assert_eq!(dead.attempts, 2);
    assert_eq!(dead.last_error.as_deref(), Some("still failing"));
    assert!(store.next_pending().await.unwrap().is_none());
    assert_eq!(store.pending_snapshot().await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_status_write_leaves_attempts_untouched() {
    let store = memory_store().await;
    seed(&store, &[], &[entry("S1", "a")]).await;
    let id = store.next_pending().await.unwrap().unwrap().id;
    store.mark_processing(id).await.unwrap();
    sqlx::query(
        "CREATE TRIGGER refuse_dead BEFORE UPDATE OF status ON sync_queue
         WHEN NEW.status = 'DEAD'
         BEGIN SELECT RAISE(ABORT, 'status write refused'); END",
    )
    .execute(&store.pool)
    .await
    .unwrap();

    assert!(store.record_failure(id, "boom", 1, 5).await.is_err());

    let entry = store.queue_entry("S1").await.unwrap().unwrap();
    assert_eq!(entry.attempts, 0);
    assert_eq!(entry.status, QueueStatus::Processing);
    assert!(entry.last_error.is_none());
}

#[tokio::test]
async fn stale_processing_entries_are_requeued() {
    let store = memory_store().await;
    seed(&store, &[], &[entry("S1", "a")]).await;
    let id = store.next_pending().await.unwrap().unwrap().id;
    store.mark_processing(id).await.unwrap();
    assert!(store.next_pending().await.unwrap().is_none());

    assert_eq!(store.reset_stale_processing().await.unwrap(), 1);
    assert_eq!(store.next_pending().await.unwrap().unwrap().id, id);
}

#[tokio::test]
async fn latest_logs_are_newest_first() {
    let store = memory_store().await;
    store
        .record_log(LogLevel::Warn, "sync", "first", 1)
        .await
        .unwrap();
    store
        .record_log(LogLevel::Error, "sync", "second", 2)
        .await
        .unwrap();

    let logs = store.latest_logs(1).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "second");
    assert_eq!(logs[0].level, LogLevel::Error);
}

#[tokio::test]
async fn open_creates_database_file_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("crm.sqlite3");
    let store = LocalStore::open(&path).await.unwrap();
    seed(&store, &[prospect("5512345678", "Ana", "Lucia")], &[]).await;
    assert!(path.exists());

    let reopened = LocalStore::open(&path).await.unwrap();
    assert_eq!(reopened.list_prospects().await.unwrap().len(), 1);
}
