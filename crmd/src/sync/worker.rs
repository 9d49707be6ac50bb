use std::time::Duration;

use crate::journal::{Journal, JournalEvent};
use crate::store::{LocalStore, LogLevel, QueueEntry, QueueStatus, StoreError, unix_now};

use super::adapter::{FailureCode, RemoteAdapter, SyncFailure, SyncReceipt};
use super::backoff::Backoff;
use super::mutation::QueuedMutation;

const LOG_SOURCE: &str = "sync_worker";

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Failed cycles before an entry is dead-lettered.
    pub max_attempts: u32,
    /// Tries per cycle while the remote reports quota exhaustion.
    pub quota_retries: u32,
    pub quota_backoff: Backoff,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 25,
            quota_retries: 5,
            quota_backoff: Backoff::quota(),
        }
    }
}

/// What one worker cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleResult {
    Idle,
    Synced { sync_id: String },
    Retrying { sync_id: String, attempts: u32 },
    DeadLettered { sync_id: String },
}

/// Drains the sync queue one entry at a time, oldest first.
///
/// Only the worker moves entries out of `PENDING`, so ordering per record is
/// the insertion order of the queue.
pub struct SyncWorker<A> {
    store: LocalStore,
    adapter: A,
    journal: Journal,
    settings: WorkerSettings,
}

impl<A: RemoteAdapter> SyncWorker<A> {
    pub fn new(store: LocalStore, adapter: A, journal: Journal) -> Self {
        Self {
            store,
            adapter,
            journal,
            settings: WorkerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn run_once(&self) -> Result<CycleResult, StoreError> {
        let Some(entry) = self.store.next_pending().await? else {
            return Ok(CycleResult::Idle);
        };
        if !self.store.mark_processing(entry.id).await? {
            return Ok(CycleResult::Idle);
        }

        let mutation = match serde_json::from_str::<QueuedMutation>(&entry.payload) {
            Ok(mutation) => mutation,
            Err(err) => {
                // Retrying cannot fix an undecodable payload.
                let failure = SyncFailure::new(
                    FailureCode::Permanent,
                    format!("queued payload is unreadable: {err}"),
                );
                return self.fail(&entry, &failure, 1).await;
            }
        };

        match self.apply_with_quota_retries(&entry, &mutation).await {
            Ok(receipt) => self.succeed(&entry, receipt).await,
            Err(failure) => self.fail(&entry, &failure, self.settings.max_attempts).await,
        }
    }

    /// Polls forever. Store failures pause the loop with a growing delay but
    /// never end it.
    pub async fn run(&self, poll: Duration) {
        let error_backoff = Backoff::loop_error(poll);
        let mut consecutive_errors = 0u32;
        loop {
            match self.run_once().await {
                // Keep draining while entries go through.
                Ok(CycleResult::Synced { .. }) => consecutive_errors = 0,
                // A failed entry is still the oldest; the poll interval is
                // its backoff.
                Ok(_) => {
                    consecutive_errors = 0;
                    tokio::time::sleep(poll).await;
                }
                Err(err) => {
                    let delay = error_backoff.delay(consecutive_errors);
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    tracing::error!(
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "sync worker cycle failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn apply_with_quota_retries(
        &self,
        entry: &QueueEntry,
        mutation: &QueuedMutation,
    ) -> Result<SyncReceipt, SyncFailure> {
        let mut attempt = 0u32;
        loop {
            match self.adapter.apply(&entry.sync_id, mutation).await {
                Err(failure)
                    if failure.is_quota() && attempt + 1 < self.settings.quota_retries =>
                {
                    let delay = self.settings.quota_backoff.delay(attempt);
                    tracing::warn!(
                        sync_id = %entry.sync_id,
                        attempt,
                        wait_ms = delay.as_millis() as u64,
                        "remote quota exhausted, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    async fn succeed(
        &self,
        entry: &QueueEntry,
        receipt: SyncReceipt,
    ) -> Result<CycleResult, StoreError> {
        let confirmed = self
            .store
            .complete_success(
                entry,
                receipt.remote_ref.as_deref(),
                receipt.images_url.as_deref(),
                unix_now(),
            )
            .await?;
        let detail = receipt.remote_ref.as_deref().unwrap_or("");
        self.journal
            .record(JournalEvent::Success, &entry.sync_id, entry.kind, detail)
            .await;
        tracing::info!(
            sync_id = %entry.sync_id,
            kind = entry.kind.as_str(),
            record_id = %entry.lookup_key,
            confirmed,
            "mutation synced"
        );
        Ok(CycleResult::Synced {
            sync_id: entry.sync_id.clone(),
        })
    }

    async fn fail(
        &self,
        entry: &QueueEntry,
        failure: &SyncFailure,
        max_attempts: u32,
    ) -> Result<CycleResult, StoreError> {
        let message = failure.to_string();
        let now = unix_now();
        let status = self
            .store
            .record_failure(entry.id, &message, max_attempts, now)
            .await?;

        if status == QueueStatus::Dead {
            let log = format!("{} {} dead-lettered: {message}", entry.kind.as_str(), entry.sync_id);
            self.store
                .record_log(LogLevel::Error, LOG_SOURCE, &log, now)
                .await?;
            self.journal
                .record(JournalEvent::Dead, &entry.sync_id, entry.kind, &message)
                .await;
            tracing::error!(sync_id = %entry.sync_id, error = %message, "mutation dead-lettered");
            return Ok(CycleResult::DeadLettered {
                sync_id: entry.sync_id.clone(),
            });
        }

        let log = format!("{} {} failed: {message}", entry.kind.as_str(), entry.sync_id);
        self.store
            .record_log(LogLevel::Warn, LOG_SOURCE, &log, now)
            .await?;
        self.journal
            .record(JournalEvent::Error, &entry.sync_id, entry.kind, &message)
            .await;
        let attempts = entry.attempts.saturating_add(1);
        tracing::warn!(
            sync_id = %entry.sync_id,
            attempts,
            error = %message,
            "mutation sync failed, will retry"
        );
        Ok(CycleResult::Retrying {
            sync_id: entry.sync_id.clone(),
            attempts,
        })
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
