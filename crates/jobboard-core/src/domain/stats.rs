//! Serializable views: reconciliation statistics and job listings.

use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// Result of one reconciliation sweep over every known site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub sites: Vec<SiteStats>,
}

impl ReconcileStats {
    pub fn site(&self, name: &str) -> Option<&SiteStats> {
        self.sites.iter().find(|s| s.site == name)
    }

    pub fn total_reclaimed(&self) -> usize {
        self.sites.iter().map(|s| s.reclaimed).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStats {
    pub site: String,
    /// Live workers only, in registration order.
    pub workers: Vec<WorkerStats>,
    pub queues: Vec<QueueStats>,
    /// Jobs moved back to pending during this sweep.
    pub reclaimed: usize,
    pub claimed: usize,
    pub capacity: usize,
    pub available: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub name: String,
    pub claimed: usize,
}

/// Per-queue counts. `capacity` is the site's live capacity: workers are
/// not bound to a single queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub name: String,
    pub queued: usize,
    pub claimed: usize,
    pub capacity: usize,
    pub available: usize,
}

/// One row of a queue listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobListing {
    pub id: JobId,
    pub claimed_by: Option<String>,
}

impl JobListing {
    pub fn pending(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            claimed_by: None,
        }
    }

    pub fn claimed(id: impl Into<JobId>, worker: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            claimed_by: Some(worker.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueListing {
    pub queue: String,
    pub jobs: Vec<JobListing>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_serialize_with_sites_key() {
        let stats = ReconcileStats::default();
        assert_eq!(
            serde_json::to_value(&stats).unwrap(),
            serde_json::json!({ "sites": [] })
        );
    }

    #[test]
    fn unclaimed_listing_has_null_owner() {
        let row = JobListing::pending("3");
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            serde_json::json!({ "id": "3", "claimed_by": null })
        );
    }
}
