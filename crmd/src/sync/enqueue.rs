use std::sync::Arc;

use thiserror::Error;
use time::Date;

use super::fields::{FieldKey, FieldMap};
use super::idempotency::{SyncId, Verdict};
use super::mutation::{
    AddRequest, ColumnValue, DeleteRequest, MutationEnvelope, MutationRequest, QueuedMutation,
    RenameRequest, UpdateRequest, prepare_images, value_text,
};
use super::normalize::{freshness, normalize_channel, today_utc};
use crate::journal::{Journal, JournalEvent};
use crate::store::{
    FinalStatus, LocalStore, NewQueueEntry, Prospect, StoreError, StoreTx, ValidationFlag,
    unix_now,
};

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("{0}")]
    Validation(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record already registered: {0}")]
    AlreadyExists(String),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued {
        sync_id: String,
        queue_id: i64,
        record_id: String,
    },
    AlreadyPending {
        sync_id: String,
    },
    AlreadyProcessed {
        sync_id: String,
    },
    /// The id belongs to an entry that was dead-lettered; it is not retried.
    PreviouslyFailed {
        sync_id: String,
    },
}

impl EnqueueOutcome {
    pub fn sync_id(&self) -> &str {
        match self {
            EnqueueOutcome::Enqueued { sync_id, .. }
            | EnqueueOutcome::AlreadyPending { sync_id }
            | EnqueueOutcome::AlreadyProcessed { sync_id }
            | EnqueueOutcome::PreviouslyFailed { sync_id } => sync_id,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, EnqueueOutcome::PreviouslyFailed { .. })
    }

    pub fn message(&self) -> String {
        match self {
            EnqueueOutcome::Enqueued { record_id, .. } => {
                format!("queued for sync (record {record_id})")
            }
            EnqueueOutcome::AlreadyPending { .. } => "already pending".to_string(),
            EnqueueOutcome::AlreadyProcessed { .. } => "already processed".to_string(),
            EnqueueOutcome::PreviouslyFailed { sync_id } => {
                format!("sync id {sync_id} previously failed and was abandoned")
            }
        }
    }
}

/// Applies mutations to the local store and appends their queue entries,
/// both inside one transaction.
#[derive(Clone)]
pub struct Enqueuer {
    store: LocalStore,
    fields: Arc<FieldMap>,
    journal: Journal,
    today: Option<Date>,
}

impl Enqueuer {
    pub fn new(store: LocalStore, fields: Arc<FieldMap>, journal: Journal) -> Self {
        Self {
            store,
            fields,
            journal,
            today: None,
        }
    }

    /// Pins "today" for freshness computation.
    pub fn with_today(mut self, today: Date) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> Date {
        self.today.unwrap_or_else(today_utc)
    }

    pub async fn enqueue(&self, envelope: MutationEnvelope) -> Result<EnqueueOutcome, EnqueueError> {
        let sync_id = SyncId::resolve(envelope.sync_id.as_deref());
        let kind = envelope.mutation.kind();
        self.journal
            .record(JournalEvent::Received, sync_id.as_str(), kind, "")
            .await;

        let result = self.apply(&sync_id, envelope.mutation).await;
        match &result {
            Ok(EnqueueOutcome::Enqueued {
                queue_id, record_id, ..
            }) => {
                tracing::info!(
                    sync_id = %sync_id,
                    kind = kind.as_str(),
                    record_id = %record_id,
                    queue_id = *queue_id,
                    "mutation queued"
                );
                self.journal
                    .record(
                        JournalEvent::Enqueued,
                        sync_id.as_str(),
                        kind,
                        &format!("record={record_id} queue_id={queue_id}"),
                    )
                    .await;
            }
            Ok(outcome) => {
                tracing::info!(
                    sync_id = %sync_id,
                    kind = kind.as_str(),
                    outcome = %outcome.message(),
                    "duplicate sync id"
                );
                self.journal
                    .record(JournalEvent::Duplicate, sync_id.as_str(), kind, &outcome.message())
                    .await;
            }
            Err(err) => {
                tracing::warn!(sync_id = %sync_id, kind = kind.as_str(), error = %err, "mutation rejected");
            }
        }
        result
    }

    async fn apply(
        &self,
        sync_id: &SyncId,
        mutation: MutationRequest,
    ) -> Result<EnqueueOutcome, EnqueueError> {
        let mut tx = self.store.transaction().await?;
        let verdict = Verdict::for_status(tx.queue_status(sync_id.as_str()).await?);
        if let Some(outcome) = duplicate_outcome(sync_id, verdict) {
            return Ok(outcome);
        }

        let now = unix_now();
        let queued = match mutation {
            MutationRequest::Add(request) => self.stage_add(&mut tx, request, now).await?,
            MutationRequest::Update(request) => {
                self.stage_update(&mut tx, sync_id, request, now).await?
            }
            MutationRequest::Rename(request) => self.stage_rename(&mut tx, request, now).await?,
            MutationRequest::Delete(request) => stage_delete(&mut tx, request).await?,
        };

        let record_id = queued.record_id().to_string();
        let entry = NewQueueEntry {
            sync_id: sync_id.as_str().to_string(),
            kind: queued.kind(),
            lookup_key: record_id.clone(),
            payload: serde_json::to_string(&queued).map_err(StoreError::from)?,
            created_at: now,
        };
        let queue_id = match tx.insert_queue_entry(&entry).await {
            Ok(id) => id,
            Err(StoreError::DuplicateSyncId(_)) => {
                return Ok(EnqueueOutcome::AlreadyPending {
                    sync_id: sync_id.as_str().to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        tx.commit().await?;

        Ok(EnqueueOutcome::Enqueued {
            sync_id: sync_id.as_str().to_string(),
            queue_id,
            record_id,
        })
    }

    async fn stage_add(
        &self,
        tx: &mut StoreTx,
        request: AddRequest,
        now: i64,
    ) -> Result<QueuedMutation, EnqueueError> {
        let name = required(request.name.as_deref(), "name")?;
        let agent = required(request.agent.as_deref(), "agent")?;
        let channel = parse_channel(request.channel.as_deref())?;
        let final_status = match optional(request.final_status.as_deref()) {
            None => FinalStatus::InProgress,
            Some(label) => FinalStatus::from_label(&label).ok_or_else(|| {
                EnqueueError::Validation(format!("unknown final status: {label}"))
            })?,
        };

        if tx.prospect_by_id(&channel).await?.is_some() {
            return Err(EnqueueError::AlreadyExists(channel));
        }

        let next_contact = optional(request.next_contact.as_deref());
        let record = Prospect {
            record_id: channel.clone(),
            name: name.clone(),
            channel,
            first_contact: optional(request.first_contact.as_deref()),
            interest: optional(request.interest.as_deref()),
            summary: optional(request.summary.as_deref()),
            freshness: freshness(next_contact.as_deref(), self.today()),
            next_contact,
            final_status,
            comments: optional(request.comments.as_deref()),
            agent,
            images_url: None,
            follow_ups: Vec::new(),
            validation: ValidationFlag::Pending,
            updated_at: now,
        };
        tx.upsert_prospect(&record).await?;

        let images = prepare_images(
            &name,
            "registro",
            &request.files_payload,
            request.file_payload.as_ref(),
        );
        Ok(QueuedMutation::Add { record, images })
    }

    async fn stage_update(
        &self,
        tx: &mut StoreTx,
        sync_id: &SyncId,
        request: UpdateRequest,
        now: i64,
    ) -> Result<QueuedMutation, EnqueueError> {
        let record_id = optional(request.record_id.as_deref());
        let name = optional(request.name.as_deref());
        if record_id.is_none() && name.is_none() {
            return Err(EnqueueError::Validation(
                "update needs record_id or name".to_string(),
            ));
        }

        let mut keys: Vec<(FieldKey, String)> = Vec::with_capacity(request.updates.len());
        for (field, value) in &request.updates {
            let key = self
                .fields
                .resolve_updatable(field)
                .map_err(|err| EnqueueError::Validation(err.to_string()))?;
            keys.retain(|(existing, _)| *existing != key);
            keys.push((key, value_text(value)));
        }
        let has_files = request.files_payload.iter().any(|file| file.has_data())
            || request.file_payload.as_ref().is_some_and(|file| file.has_data());
        if keys.is_empty() && !has_files {
            return Err(EnqueueError::Validation("nothing to update".to_string()));
        }

        let mut record = locate(tx, record_id.as_deref(), None, name.as_deref())
            .await?
            .ok_or_else(|| {
                EnqueueError::NotFound(record_id.or(name).unwrap_or_default())
            })?;
        let lookup_name = record.name.clone();

        for (key, value) in &keys {
            key.apply(&mut record, value)
                .map_err(|err| EnqueueError::Validation(err.to_string()))?;
        }
        record.freshness = freshness(record.next_contact.as_deref(), self.today());
        record.validation = ValidationFlag::Pending;
        record.updated_at = now;
        tx.upsert_prospect(&record).await?;

        let changes = keys
            .iter()
            .map(|(key, _)| ColumnValue {
                column: self.fields.display_name(*key),
                value: key.read(&record, sync_id.as_str()),
            })
            .collect();
        let stage = keys
            .iter()
            .filter_map(|(key, _)| key.follow_up_index())
            .max()
            .map(|n| format!("seguimiento{n}"))
            .unwrap_or_else(|| "actualizacion".to_string());
        let images = prepare_images(
            &record.name,
            &stage,
            &request.files_payload,
            request.file_payload.as_ref(),
        );

        Ok(QueuedMutation::Update {
            record,
            lookup_name,
            changes,
            images,
        })
    }

    async fn stage_rename(
        &self,
        tx: &mut StoreTx,
        request: RenameRequest,
        now: i64,
    ) -> Result<QueuedMutation, EnqueueError> {
        let channel = parse_channel(request.channel.as_deref())?;
        let new_name = required(request.new_name.as_deref(), "new_name")?;

        let mut record = locate(tx, None, Some(&channel), request.old_name.as_deref())
            .await?
            .ok_or_else(|| EnqueueError::NotFound(channel.clone()))?;
        let old_name = std::mem::replace(&mut record.name, new_name.clone());
        record.validation = ValidationFlag::Pending;
        record.updated_at = now;
        tx.upsert_prospect(&record).await?;

        Ok(QueuedMutation::Rename {
            record_id: record.record_id,
            channel: record.channel,
            old_name,
            new_name,
            updated_at: now,
        })
    }
}

async fn stage_delete(
    tx: &mut StoreTx,
    request: DeleteRequest,
) -> Result<QueuedMutation, EnqueueError> {
    let record_id = optional(request.record_id.as_deref());
    let channel = optional(request.channel.as_deref());
    let name = optional(request.name.as_deref());
    let Some(target) = record_id.clone().or(channel.clone()).or(name.clone()) else {
        return Err(EnqueueError::Validation(
            "delete needs record_id, channel or name".to_string(),
        ));
    };

    let record = locate(
        tx,
        record_id.as_deref(),
        channel.as_deref(),
        name.as_deref(),
    )
    .await?
    .ok_or(EnqueueError::NotFound(target))?;
    tx.delete_prospect(&record.record_id).await?;

    Ok(QueuedMutation::Delete {
        record_id: record.record_id,
        channel: record.channel,
        name: record.name,
        images_url: record.images_url,
    })
}

/// Identifier first, then channel digits, then case-insensitive name.
async fn locate(
    tx: &mut StoreTx,
    record_id: Option<&str>,
    channel: Option<&str>,
    name: Option<&str>,
) -> Result<Option<Prospect>, StoreError> {
    for candidate in [record_id, channel].into_iter().flatten() {
        let key = normalize_channel(candidate).unwrap_or_else(|| candidate.trim().to_string());
        if let Some(found) = tx.prospect_by_id(&key).await? {
            return Ok(Some(found));
        }
    }
    match name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => tx.prospect_by_name(name).await,
        None => Ok(None),
    }
}

/// `None` when the id has never been queued.
fn duplicate_outcome(sync_id: &SyncId, verdict: Verdict) -> Option<EnqueueOutcome> {
    let sync_id = sync_id.as_str().to_string();
    let outcome = match verdict {
        Verdict::Fresh => return None,
        Verdict::AlreadyPending => EnqueueOutcome::AlreadyPending { sync_id },
        Verdict::AlreadyProcessed => EnqueueOutcome::AlreadyProcessed { sync_id },
        Verdict::PreviouslyFailed => EnqueueOutcome::PreviouslyFailed { sync_id },
    };
    Some(outcome)
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn required(value: Option<&str>, field: &str) -> Result<String, EnqueueError> {
    optional(value).ok_or_else(|| EnqueueError::Validation(format!("missing required field: {field}")))
}

fn parse_channel(value: Option<&str>) -> Result<String, EnqueueError> {
    let raw = required(value, "channel")?;
    normalize_channel(&raw).ok_or_else(|| {
        EnqueueError::Validation(format!(
            "channel must contain at least 10 digits: {raw}"
        ))
    })
}

#[cfg(test)]
#[path = "enqueue_tests.rs"]
mod tests;
