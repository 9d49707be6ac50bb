use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use time::Date;

use crate::journal::Journal;
use crate::store::{
    FinalStatus, Freshness, LocalStore, LogEntry, Prospect, QueueEntry, StoreError, ValidationFlag,
};
use crate::sync::enqueue::{EnqueueError, Enqueuer};
use crate::sync::fields::{FieldKey, FieldMap};
use crate::sync::mutation::MutationEnvelope;
use crate::sync::normalize::{freshness, today_utc};

/// Caller-facing result of a mutation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<String>,
}

impl ServiceResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            sync_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub agent: String,
    pub total: usize,
    pub in_progress: usize,
    pub sold: usize,
    pub not_interested: usize,
    pub overdue: usize,
    /// Records with local changes not yet confirmed remotely.
    pub unconfirmed: usize,
}

/// The request-facing entry point. Built once by the process owner and
/// shared by reference; holds no global state.
#[derive(Clone)]
pub struct CrmService {
    store: LocalStore,
    fields: Arc<FieldMap>,
    enqueuer: Enqueuer,
    journal: Journal,
    today: Option<Date>,
}

impl CrmService {
    pub fn new(store: LocalStore, fields: Arc<FieldMap>, journal: Journal) -> Self {
        let enqueuer = Enqueuer::new(store.clone(), Arc::clone(&fields), journal.clone());
        Self {
            store,
            fields,
            enqueuer,
            journal,
            today: None,
        }
    }

    pub fn with_today(mut self, today: Date) -> Self {
        self.enqueuer = self.enqueuer.with_today(today);
        self.today = Some(today);
        self
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub async fn enqueue(&self, envelope: MutationEnvelope) -> ServiceResponse {
        match self.enqueuer.enqueue(envelope).await {
            Ok(outcome) => ServiceResponse {
                success: outcome.is_success(),
                message: outcome.message(),
                sync_id: Some(outcome.sync_id().to_string()),
            },
            Err(EnqueueError::Store(err)) => {
                tracing::error!(error = %err, "mutation rejected: local store failure");
                ServiceResponse::failure(format!("local storage failure: {err}"))
            }
            Err(err) => ServiceResponse::failure(err.to_string()),
        }
    }

    /// Same as [`CrmService::enqueue`] for a raw JSON request body.
    pub async fn enqueue_json(&self, body: &str) -> ServiceResponse {
        match serde_json::from_str::<MutationEnvelope>(body) {
            Ok(envelope) => self.enqueue(envelope).await,
            Err(err) => ServiceResponse::failure(format!("invalid request: {err}")),
        }
    }

    pub async fn all_clients(&self) -> Result<Vec<Map<String, Value>>, StoreError> {
        let records = self.store.list_prospects().await?;
        Ok(self.views(records))
    }

    pub async fn clients_for_agent(
        &self,
        agent: &str,
    ) -> Result<Vec<Map<String, Value>>, StoreError> {
        let records = self.store.list_by_agent(agent.trim()).await?;
        Ok(self.views(records))
    }

    pub async fn agent_stats(&self, agent: &str) -> Result<AgentStats, StoreError> {
        let records = self.store.list_by_agent(agent.trim()).await?;
        let today = self.today();
        let mut stats = AgentStats {
            agent: agent.trim().to_string(),
            total: records.len(),
            ..AgentStats::default()
        };
        for record in &records {
            match record.final_status {
                FinalStatus::InProgress => stats.in_progress += 1,
                FinalStatus::Sold => stats.sold += 1,
                FinalStatus::NotInterested => stats.not_interested += 1,
            }
            if freshness(record.next_contact.as_deref(), today) == Freshness::Overdue {
                stats.overdue += 1;
            }
            if record.validation == ValidationFlag::Pending {
                stats.unconfirmed += 1;
            }
        }
        Ok(stats)
    }

    /// Every entry that has not synced, including dead-lettered ones.
    pub async fn pending_queue(&self) -> Result<Vec<QueueEntry>, StoreError> {
        self.store.pending_snapshot().await
    }

    pub async fn journal_tail(&self, limit: usize) -> std::io::Result<Vec<String>> {
        self.journal.tail(limit).await
    }

    pub async fn latest_logs(&self, limit: u32) -> Result<Vec<LogEntry>, StoreError> {
        self.store.latest_logs(limit).await
    }

    fn today(&self) -> Date {
        self.today.unwrap_or_else(today_utc)
    }

    fn views(&self, records: Vec<Prospect>) -> Vec<Map<String, Value>> {
        let today = self.today();
        records
            .into_iter()
            .map(|mut record| {
                // Stored freshness is only as current as the last write.
                record.freshness = freshness(record.next_contact.as_deref(), today);
                self.view(&record)
            })
            .collect()
    }

    fn view(&self, record: &Prospect) -> Map<String, Value> {
        let mut out = Map::new();
        for key in self.fields.columns_for(record) {
            let value = match key {
                FieldKey::SyncId => continue,
                FieldKey::Validation => record.validation.as_str().to_string(),
                other => other.read(record, ""),
            };
            out.insert(self.fields.display_name(key), Value::String(value));
        }
        out
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
