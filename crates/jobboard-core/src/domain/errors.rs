//! エラー型
//!
//! - `StoreError`: `KeyedStore` の通信・データエラー
//! - `JobQueueError`: `JobQueue` と reconciler が呼び出し側に返すもの
//! - `CollaboratorError` / `FetchJobError`: job 組み立てパイプライン

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("wrong value type at key={key}")]
    WrongType { key: String },

    #[error("corrupt value at key={key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("transaction aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum JobQueueError {
    /// The site has never been registered (not the same as registered but empty).
    #[error("invalid site={site}: not registered")]
    Invalid { site: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobQueueError {
    pub fn is_invalid(&self) -> bool {
        matches!(self, JobQueueError::Invalid { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    pub collaborator: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchJobError {
    #[error("no job_state/log_parts urls configured for site={site}")]
    MissingSiteConfig { site: String },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}
