pub mod adapter;
pub mod backoff;
pub mod columns;
pub mod enqueue;
pub mod fields;
pub mod idempotency;
pub mod mutation;
pub mod normalize;
pub mod sheets_adapter;
pub mod worker;

pub use adapter::{FailureCode, RemoteAdapter, SyncFailure, SyncReceipt};
pub use enqueue::{EnqueueError, EnqueueOutcome, Enqueuer};
pub use fields::FieldMap;
pub use mutation::{MutationEnvelope, QueuedMutation};
pub use sheets_adapter::SheetsAdapter;
pub use worker::{CycleResult, SyncWorker, WorkerSettings};
