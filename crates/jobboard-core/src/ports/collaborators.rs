//! Collaborator ports - job descriptor 組み立て用
//!
//! 各ステップは型付きの部分結果を返す。どれも queue には触れない。

use async_trait::async_trait;

use crate::domain::{CollaboratorError, JobId, JobMetadata};

/// Relational job record lookup.
#[async_trait]
pub trait JobMetadataSource: Send + Sync {
    async fn lookup(&self, site: &str, job_id: &JobId)
    -> Result<Option<JobMetadata>, CollaboratorError>;
}

/// Produces the raw (unencoded) build script for a job.
#[async_trait]
pub trait JobScriptFetcher: Send + Sync {
    async fn fetch(&self, job: &JobMetadata) -> Result<String, CollaboratorError>;
}

/// Issues the token a worker uses to report state and logs.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, site: &str, job_id: &JobId) -> Result<String, CollaboratorError>;
}

pub trait ImageAssigner: Send + Sync {
    fn assign(&self, job: &JobMetadata) -> String;
}

/// Assigns the same image to every job.
#[derive(Debug, Clone)]
pub struct DefaultImageAssigner {
    image: String,
}

impl DefaultImageAssigner {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

impl Default for DefaultImageAssigner {
    fn default() -> Self {
        Self::new("default")
    }
}

impl ImageAssigner for DefaultImageAssigner {
    fn assign(&self, _job: &JobMetadata) -> String {
        self.image.clone()
    }
}
