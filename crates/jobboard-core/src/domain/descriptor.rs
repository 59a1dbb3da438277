//! Job descriptor handed to a worker after it claims a job.

use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// Request for a descriptor. Empty fields yield no descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchJobRequest {
    pub job_id: String,
    pub site: String,
}

impl FetchJobRequest {
    pub fn new(job_id: impl Into<String>, site: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            site: site.into(),
        }
    }
}

/// Persisted metadata for one job, as returned by the metadata source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub id: JobId,
    pub site: String,
    /// Opaque job payload; the queue never interprets it.
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobScript {
    pub name: String,
    pub encoding: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: JobId,
    pub site: String,
    pub data: serde_json::Value,
    pub job_script: JobScript,
    pub job_state_url: String,
    pub log_parts_url: String,
    pub jwt: String,
    pub image_name: String,
}
