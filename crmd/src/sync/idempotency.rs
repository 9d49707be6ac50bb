use std::fmt;

use crate::store::QueueStatus;

/// Idempotency key carried by every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncId(String);

impl SyncId {
    /// Honors a caller-supplied id as-is; blank or missing ids are replaced
    /// by a generated one.
    pub fn resolve(supplied: Option<&str>) -> Self {
        match supplied {
            Some(value) if !value.trim().is_empty() => Self(value.to_string()),
            _ => Self::generate(),
        }
    }

    /// `<unix millis>-<8 hex digits>`.
    pub fn generate() -> Self {
        let millis = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let salt: u32 = rand::random();
        Self(format!("{millis}-{salt:08x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to do with a mutation given any queue entry already holding its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Fresh,
    AlreadyPending,
    AlreadyProcessed,
    PreviouslyFailed,
}

impl Verdict {
    pub fn for_status(existing: Option<QueueStatus>) -> Self {
        match existing {
            None => Verdict::Fresh,
            Some(QueueStatus::Success) => Verdict::AlreadyProcessed,
            Some(QueueStatus::Pending | QueueStatus::Processing) => Verdict::AlreadyPending,
            Some(QueueStatus::Dead) => Verdict::PreviouslyFailed,
        }
    }
}
