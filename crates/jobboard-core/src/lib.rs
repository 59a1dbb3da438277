//! jobboard-core
//!
//! Lease-based job queue over a shared keyed store.
//!
//! # Modules
//! - **domain**: ids, worker lease record, statistics and listing views, job descriptor, errors
//! - **ports**: `KeyedStore`/`Txn`, `Clock`, `IdGenerator`, job-assembly collaborators
//! - **impls**: `InMemoryStore` (TTL keys, all-or-nothing transactions)
//! - **queue**: `JobQueue` claim/release protocol, key schema, `JobQueueReconciler`
//! - **app**: `FetchJob` pipeline, `ReconcileLoop`
//! - **config**: `JobBoardConfig`
//! - **observability**: tracing subscriber setup

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use app::{FetchJob, ReconcileLoop};
pub use config::JobBoardConfig;
pub use domain::{JobId, JobQueueError, ReconcileStats, StoreError};
pub use impls::InMemoryStore;
pub use ports::{Clock, KeyedStore, SystemClock};
pub use queue::{JobQueue, JobQueueReconciler};
