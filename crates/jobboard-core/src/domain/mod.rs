//! Domain - ドメインモデル
//!
//! ids, worker lease, 統計・一覧ビュー, job descriptor, エラー型

pub mod descriptor;
pub mod errors;
pub mod ids;
pub mod lease;
pub mod stats;

pub use descriptor::{FetchJobRequest, JobDescriptor, JobMetadata, JobScript};
pub use errors::{CollaboratorError, FetchJobError, JobQueueError, StoreError};
pub use ids::JobId;
pub use lease::WorkerLease;
pub use stats::{JobListing, QueueListing, QueueStats, ReconcileStats, SiteStats, WorkerStats};
