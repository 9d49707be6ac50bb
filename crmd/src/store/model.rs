use serde::{Deserialize, Serialize};

use super::StoreError;

/// Whether the next planned contact is still ahead of us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Current,
    Overdue,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Current => "current",
            Freshness::Overdue => "overdue",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "current" => Ok(Freshness::Current),
            "overdue" => Ok(Freshness::Overdue),
            other => Err(StoreError::InvalidValue("freshness", other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    InProgress,
    Sold,
    NotInterested,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::InProgress => "in_progress",
            FinalStatus::Sold => "sold",
            FinalStatus::NotInterested => "not_interested",
        }
    }

    /// Label written to the remote sheet and shown to agents.
    pub fn display(&self) -> &'static str {
        match self {
            FinalStatus::InProgress => "Seguimiento",
            FinalStatus::Sold => "Vendido",
            FinalStatus::NotInterested => "No interesado",
        }
    }

    /// Accepts the stored form as well as the labels agents type in.
    pub fn from_label(value: &str) -> Option<Self> {
        let folded = crate::sync::normalize::normalize_header(value);
        match folded.as_str() {
            "inprogress" | "seguimiento" | "enproceso" | "enseguimiento" => {
                Some(FinalStatus::InProgress)
            }
            "sold" | "vendido" | "vendida" | "venta" => Some(FinalStatus::Sold),
            "notinterested" | "nointeresado" | "nointeresada" => Some(FinalStatus::NotInterested),
            _ => None,
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "in_progress" => Ok(FinalStatus::InProgress),
            "sold" => Ok(FinalStatus::Sold),
            "not_interested" => Ok(FinalStatus::NotInterested),
            other => Err(StoreError::InvalidValue("final_status", other.to_string())),
        }
    }
}

/// `Pending` means the local row has diverged from what the remote confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationFlag {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "PENDING")]
    Pending,
}

impl ValidationFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationFlag::Ok => "OK",
            ValidationFlag::Pending => "PENDING",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "OK" => Ok(ValidationFlag::Ok),
            "PENDING" => Ok(ValidationFlag::Pending),
            other => Err(StoreError::InvalidValue("validation", other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    pub index: u32,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prospect {
    pub record_id: String,
    pub name: String,
    pub channel: String,
    pub first_contact: Option<String>,
    pub interest: Option<String>,
    pub summary: Option<String>,
    pub freshness: Freshness,
    pub next_contact: Option<String>,
    pub final_status: FinalStatus,
    pub comments: Option<String>,
    pub agent: String,
    pub images_url: Option<String>,
    #[serde(default)]
    pub follow_ups: Vec<FollowUp>,
    pub validation: ValidationFlag,
    pub updated_at: i64,
}

impl Prospect {
    pub fn follow_up(&self, index: u32) -> Option<&FollowUp> {
        self.follow_ups.iter().find(|entry| entry.index == index)
    }

    /// Returns the entry for `index`, creating it in index order if missing.
    pub fn follow_up_mut(&mut self, index: u32) -> &mut FollowUp {
        let position = match self
            .follow_ups
            .binary_search_by_key(&index, |entry| entry.index)
        {
            Ok(position) => position,
            Err(position) => {
                self.follow_ups.insert(
                    position,
                    FollowUp {
                        index,
                        date: None,
                        notes: None,
                    },
                );
                position
            }
        };
        &mut self.follow_ups[position]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationKind {
    Add,
    Update,
    Rename,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Add => "ADD",
            MutationKind::Update => "UPDATE",
            MutationKind::Rename => "RENAME",
            MutationKind::Delete => "DELETE",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "ADD" => Ok(MutationKind::Add),
            "UPDATE" => Ok(MutationKind::Update),
            "RENAME" => Ok(MutationKind::Rename),
            "DELETE" => Ok(MutationKind::Delete),
            other => Err(StoreError::InvalidValue("kind", other.to_string())),
        }
    }
}

/// Queue entry lifecycle: `Pending → Processing → Success`, or back to
/// `Pending` on failure until the attempt budget is spent, then `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueStatus {
    Pending,
    Processing,
    Success,
    Dead,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Processing => "PROCESSING",
            QueueStatus::Success => "SUCCESS",
            QueueStatus::Dead => "DEAD",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Success | QueueStatus::Dead)
    }

    pub(crate) fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "PENDING" => Ok(QueueStatus::Pending),
            "PROCESSING" => Ok(QueueStatus::Processing),
            "SUCCESS" => Ok(QueueStatus::Success),
            "DEAD" => Ok(QueueStatus::Dead),
            other => Err(StoreError::InvalidValue("status", other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueEntry {
    pub sync_id: String,
    pub kind: MutationKind,
    pub lookup_key: String,
    pub payload: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub id: i64,
    pub sync_id: String,
    pub kind: MutationKind,
    pub lookup_key: String,
    #[serde(skip)]
    pub payload: String,
    pub status: QueueStatus,
    pub attempts: u32,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub last_error: Option<String>,
    pub remote_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(StoreError::InvalidValue("level", other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    pub created_at: i64,
}
