mod local;
pub mod model;

use thiserror::Error;

pub use local::{LocalStore, StoreTx};
pub use model::{
    FinalStatus, FollowUp, Freshness, LogEntry, LogLevel, MutationKind, NewQueueEntry, Prospect,
    QueueEntry, QueueStatus, ValidationFlag,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {0} value in store: {1}")]
    InvalidValue(&'static str, String),
    #[error("sync id already queued: {0}")]
    DuplicateSyncId(String),
}

pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
