//! Read-only projections over a site's queues.
//!
//! These take the store directly instead of a `JobQueue` value: an operator
//! view spans every queue of a site. Each call reads one snapshot.

use super::{JobQueue, keys};
use crate::domain::{JobId, JobListing, JobQueueError, QueueListing, StoreError};
use crate::ports::{KeyedStore, Txn};

impl<S: KeyedStore> JobQueue<S> {
    /// Job ids claimed by `worker` on `site`, in claim order.
    ///
    /// `queue_name = None` covers every queue of the site.
    /// Fails with `Invalid` if the site was never registered.
    pub async fn for_worker(
        store: &S,
        site: &str,
        worker: &str,
        queue_name: Option<&str>,
    ) -> Result<Vec<JobId>, JobQueueError> {
        let held = store
            .transaction(move |txn| {
                if !txn.sismember(keys::SITES, site)? {
                    return Ok(None);
                }
                let queues = match queue_name {
                    Some(queue) => vec![queue.to_string()],
                    None => txn.smembers(&keys::queues(site))?,
                };

                let mut held = Vec::new();
                for queue in &queues {
                    for (id, owner) in txn.hgetall(&keys::claims(site, queue))? {
                        if owner == worker {
                            held.push(JobId::from(id));
                        }
                    }
                }
                Ok(Some(held))
            })
            .await?;

        held.ok_or_else(|| invalid(site))
    }

    /// Every queue registered under `site` with its jobs, newest first.
    pub async fn for_site(store: &S, site: &str) -> Result<Vec<QueueListing>, JobQueueError> {
        let listing = store
            .transaction(move |txn| {
                if !txn.sismember(keys::SITES, site)? {
                    return Ok(None);
                }
                let mut listing = Vec::new();
                for queue in txn.smembers(&keys::queues(site))? {
                    let jobs = queue_jobs(&*txn, site, &queue)?;
                    listing.push(QueueListing { queue, jobs });
                }
                Ok(Some(listing))
            })
            .await?;

        listing.ok_or_else(|| invalid(site))
    }

    /// Jobs of one queue, newest first. An unknown queue on a known site is
    /// empty, not invalid.
    pub async fn for_queue(
        store: &S,
        site: &str,
        queue_name: &str,
    ) -> Result<Vec<JobListing>, JobQueueError> {
        let jobs = store
            .transaction(move |txn| {
                if !txn.sismember(keys::SITES, site)? {
                    return Ok(None);
                }
                queue_jobs(&*txn, site, queue_name).map(Some)
            })
            .await?;

        jobs.ok_or_else(|| invalid(site))
    }
}

/// Pending ids newest-added first, then claimed ids most-recently-claimed
/// first.
fn queue_jobs(txn: &dyn Txn, site: &str, queue: &str) -> Result<Vec<JobListing>, StoreError> {
    let mut jobs: Vec<JobListing> = txn
        .lrange_all(&keys::pending(site, queue))?
        .into_iter()
        .rev()
        .map(|id| JobListing::pending(id))
        .collect();

    jobs.extend(
        txn.hgetall(&keys::claims(site, queue))?
            .into_iter()
            .rev()
            .map(|(id, worker)| JobListing::claimed(id, worker)),
    );
    Ok(jobs)
}

fn invalid(site: &str) -> JobQueueError {
    JobQueueError::Invalid {
        site: site.to_string(),
    }
}
