use std::fmt;

use async_trait::async_trait;
use crm_core::ApiErrorClass;

use super::mutation::QueuedMutation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    Quota,
    Transient,
    NotFound,
    Auth,
    Schema,
    Permanent,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::Quota => "quota",
            FailureCode::Transient => "transient",
            FailureCode::NotFound => "not_found",
            FailureCode::Auth => "auth",
            FailureCode::Schema => "schema",
            FailureCode::Permanent => "permanent",
        }
    }
}

impl From<ApiErrorClass> for FailureCode {
    fn from(class: ApiErrorClass) -> Self {
        match class {
            ApiErrorClass::Quota => FailureCode::Quota,
            ApiErrorClass::Transient => FailureCode::Transient,
            ApiErrorClass::NotFound => FailureCode::NotFound,
            ApiErrorClass::Auth => FailureCode::Auth,
            ApiErrorClass::Permanent => FailureCode::Permanent,
        }
    }
}

/// What a successful remote application produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReceipt {
    /// Where the change landed remotely, e.g. the appended range.
    pub remote_ref: Option<String>,
    /// Folder reference returned by the first successful image upload.
    pub images_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub code: FailureCode,
    pub message: String,
}

impl SyncFailure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_quota(&self) -> bool {
        self.code == FailureCode::Quota
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

/// Applies one queued mutation to the remote store. Implementations must
/// not touch the local store and must report every failure as a value.
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    async fn apply(
        &self,
        sync_id: &str,
        mutation: &QueuedMutation,
    ) -> Result<SyncReceipt, SyncFailure>;
}
