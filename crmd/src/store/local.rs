use std::{fs, path::Path, sync::Arc, time::Duration};

use sqlx::{
    Row, Sqlite, SqlitePool, Transaction,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::StoreError;
use super::model::{
    FinalStatus, Freshness, LogEntry, LogLevel, MutationKind, NewQueueEntry, Prospect, QueueEntry,
    QueueStatus, ValidationFlag,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const PROSPECT_COLUMNS: &str = "record_id, name, channel, first_contact, interest, summary, freshness, next_contact, final_status, comments, agent, images_url, follow_ups, validation, updated_at";
const QUEUE_COLUMNS: &str = "id, sync_id, kind, lookup_key, payload, status, attempts, created_at, completed_at, last_error, remote_ref";

/// Prospect table plus the sync queue, backed by SQLite.
///
/// Connections are pooled but not kept warm: the pool drops idle connections
/// quickly so request handlers and the worker each open what they need.
/// Writes are serialized through `write_gate` so that a transaction never
/// races another writer for the database lock.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl LocalStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .min_connections(0)
            .max_connections(4)
            .idle_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Starts a write transaction. Dropping the returned handle without
    /// calling [`StoreTx::commit`] rolls everything back.
    pub async fn transaction(&self) -> Result<StoreTx, StoreError> {
        let guard = Arc::clone(&self.write_gate).lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(StoreTx { tx, _guard: guard })
    }

    pub async fn get_prospect(&self, record_id: &str) -> Result<Option<Prospect>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PROSPECT_COLUMNS} FROM prospects WHERE record_id = ?1"
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(prospect_from_row).transpose()
    }

    pub async fn list_prospects(&self) -> Result<Vec<Prospect>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROSPECT_COLUMNS} FROM prospects ORDER BY updated_at DESC, record_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(prospect_from_row).collect()
    }

    pub async fn list_by_agent(&self, agent: &str) -> Result<Vec<Prospect>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROSPECT_COLUMNS} FROM prospects
             WHERE agent = ?1 COLLATE NOCASE
             ORDER BY updated_at DESC, record_id ASC"
        ))
        .bind(agent.trim())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(prospect_from_row).collect()
    }

    pub async fn queue_entry(&self, sync_id: &str) -> Result<Option<QueueEntry>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE sync_id = ?1"
        ))
        .bind(sync_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(queue_entry_from_row).transpose()
    }

    pub async fn list_queue(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(queue_entry_from_row).collect()
    }

    /// Every entry that has not reached `SUCCESS`, dead letters included.
    pub async fn pending_snapshot(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE status != ?1 ORDER BY id ASC"
        ))
        .bind(QueueStatus::Success.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(queue_entry_from_row).collect()
    }

    /// Oldest `PENDING` entry by insertion order.
    pub async fn next_pending(&self) -> Result<Option<QueueEntry>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE status = ?1 ORDER BY id ASC LIMIT 1"
        ))
        .bind(QueueStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(queue_entry_from_row).transpose()
    }

    /// Claims a pending entry. Returns `false` if it was no longer `PENDING`.
    pub async fn mark_processing(&self, id: i64) -> Result<bool, StoreError> {
        let _guard = self.write_gate.lock().await;
        let result = sqlx::query("UPDATE sync_queue SET status = ?1 WHERE id = ?2 AND status = ?3")
            .bind(QueueStatus::Processing.as_str())
            .bind(id)
            .bind(QueueStatus::Pending.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Marks the entry `SUCCESS` and, when no other unsynced entry targets the
    /// same record, flips that record's validation flag to `OK`.
    pub async fn complete_success(
        &self,
        entry: &QueueEntry,
        remote_ref: Option<&str>,
        images_url: Option<&str>,
        completed_at: i64,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE sync_queue
             SET status = ?1, completed_at = ?2, remote_ref = ?3, last_error = NULL
             WHERE id = ?4",
        )
        .bind(QueueStatus::Success.as_str())
        .bind(completed_at)
        .bind(remote_ref)
        .bind(entry.id)
        .execute(&mut *tx)
        .await?;

        let outstanding: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_queue WHERE lookup_key = ?1 AND status IN (?2, ?3)",
        )
        .bind(&entry.lookup_key)
        .bind(QueueStatus::Pending.as_str())
        .bind(QueueStatus::Processing.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let validation = if outstanding == 0 {
            ValidationFlag::Ok
        } else {
            ValidationFlag::Pending
        };
        let updated = sqlx::query(
            "UPDATE prospects
             SET validation = ?1, images_url = COALESCE(?2, images_url)
             WHERE record_id = ?3",
        )
        .bind(validation.as_str())
        .bind(images_url)
        .bind(&entry.lookup_key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated.rows_affected() == 1 && validation == ValidationFlag::Ok)
    }

    /// Records a failed attempt and returns the entry's new status: back to
    /// `PENDING`, or `DEAD` once `max_attempts` is reached.
    pub async fn record_failure(
        &self,
        id: i64,
        error: &str,
        max_attempts: u32,
        failed_at: i64,
    ) -> Result<QueueStatus, StoreError> {
        let _guard = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        let attempts: u32 = sqlx::query_scalar(
            "UPDATE sync_queue SET attempts = attempts + 1, last_error = ?1 WHERE id = ?2 RETURNING attempts",
        )
        .bind(error)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let (status, completed_at) = if attempts >= max_attempts {
            (QueueStatus::Dead, Some(failed_at))
        } else {
            (QueueStatus::Pending, None)
        };
        sqlx::query("UPDATE sync_queue SET status = ?1, completed_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(completed_at)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(status)
    }

    /// Returns entries left in `PROCESSING` by a crash to `PENDING`.
    pub async fn reset_stale_processing(&self) -> Result<u64, StoreError> {
        let _guard = self.write_gate.lock().await;
        let result = sqlx::query("UPDATE sync_queue SET status = ?1 WHERE status = ?2")
            .bind(QueueStatus::Pending.as_str())
            .bind(QueueStatus::Processing.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn record_log(
        &self,
        level: LogLevel,
        source: &str,
        message: &str,
        created_at: i64,
    ) -> Result<(), StoreError> {
        let _guard = self.write_gate.lock().await;
        sqlx::query(
            "INSERT INTO system_logs (level, source, message, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(level.as_str())
        .bind(source)
        .bind(message)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Newest first.
    pub async fn latest_logs(&self, limit: u32) -> Result<Vec<LogEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, level, source, message, created_at FROM system_logs ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let level: String = row.try_get("level")?;
            out.push(LogEntry {
                id: row.try_get("id")?,
                level: LogLevel::parse(&level)?,
                source: row.try_get("source")?,
                message: row.try_get("message")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(out)
    }
}

/// A write transaction holding the store's write gate.
pub struct StoreTx {
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl StoreTx {
    pub async fn queue_status(&mut self, sync_id: &str) -> Result<Option<QueueStatus>, StoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM sync_queue WHERE sync_id = ?1")
                .bind(sync_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        status.as_deref().map(QueueStatus::parse).transpose()
    }

    pub async fn prospect_by_id(&mut self, record_id: &str) -> Result<Option<Prospect>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PROSPECT_COLUMNS} FROM prospects WHERE record_id = ?1"
        ))
        .bind(record_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(prospect_from_row).transpose()
    }

    /// Case-insensitive lookup; the most recently touched match wins.
    pub async fn prospect_by_name(&mut self, name: &str) -> Result<Option<Prospect>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PROSPECT_COLUMNS} FROM prospects
             WHERE trim(name) = ?1 COLLATE NOCASE
             ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(name.trim())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(prospect_from_row).transpose()
    }

    pub async fn upsert_prospect(&mut self, prospect: &Prospect) -> Result<(), StoreError> {
        let follow_ups = serde_json::to_string(&prospect.follow_ups)?;
        sqlx::query(
            "INSERT INTO prospects (
                record_id, name, channel, first_contact, interest, summary, freshness,
                next_contact, final_status, comments, agent, images_url, follow_ups,
                validation, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(record_id) DO UPDATE SET
                name = excluded.name,
                channel = excluded.channel,
                first_contact = excluded.first_contact,
                interest = excluded.interest,
                summary = excluded.summary,
                freshness = excluded.freshness,
                next_contact = excluded.next_contact,
                final_status = excluded.final_status,
                comments = excluded.comments,
                agent = excluded.agent,
                images_url = excluded.images_url,
                follow_ups = excluded.follow_ups,
                validation = excluded.validation,
                updated_at = excluded.updated_at",
        )
        .bind(&prospect.record_id)
        .bind(&prospect.name)
        .bind(&prospect.channel)
        .bind(&prospect.first_contact)
        .bind(&prospect.interest)
        .bind(&prospect.summary)
        .bind(prospect.freshness.as_str())
        .bind(&prospect.next_contact)
        .bind(prospect.final_status.as_str())
        .bind(&prospect.comments)
        .bind(&prospect.agent)
        .bind(&prospect.images_url)
        .bind(follow_ups)
        .bind(prospect.validation.as_str())
        .bind(prospect.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn delete_prospect(&mut self, record_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM prospects WHERE record_id = ?1")
            .bind(record_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Appends a `PENDING` entry. A reused sync id surfaces as
    /// [`StoreError::DuplicateSyncId`] from the table's unique constraint.
    pub async fn insert_queue_entry(&mut self, entry: &NewQueueEntry) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO sync_queue (sync_id, kind, lookup_key, payload, status, attempts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        )
        .bind(&entry.sync_id)
        .bind(entry.kind.as_str())
        .bind(&entry.lookup_key)
        .bind(&entry.payload)
        .bind(QueueStatus::Pending.as_str())
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateSyncId(entry.sync_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn prospect_from_row(row: &SqliteRow) -> Result<Prospect, StoreError> {
    let freshness: String = row.try_get("freshness")?;
    let final_status: String = row.try_get("final_status")?;
    let validation: String = row.try_get("validation")?;
    let follow_ups: String = row.try_get("follow_ups")?;
    Ok(Prospect {
        record_id: row.try_get("record_id")?,
        name: row.try_get("name")?,
        channel: row.try_get("channel")?,
        first_contact: row.try_get("first_contact")?,
        interest: row.try_get("interest")?,
        summary: row.try_get("summary")?,
        freshness: Freshness::parse(&freshness)?,
        next_contact: row.try_get("next_contact")?,
        final_status: FinalStatus::parse(&final_status)?,
        comments: row.try_get("comments")?,
        agent: row.try_get("agent")?,
        images_url: row.try_get("images_url")?,
        follow_ups: serde_json::from_str(&follow_ups)?,
        validation: ValidationFlag::parse(&validation)?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn queue_entry_from_row(row: &SqliteRow) -> Result<QueueEntry, StoreError> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    Ok(QueueEntry {
        id: row.try_get("id")?,
        sync_id: row.try_get("sync_id")?,
        kind: MutationKind::parse(&kind)?,
        lookup_key: row.try_get("lookup_key")?,
        payload: row.try_get("payload")?,
        status: QueueStatus::parse(&status)?,
        attempts: row.try_get("attempts")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        last_error: row.try_get("last_error")?,
        remote_ref: row.try_get("remote_ref")?,
    })
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
