//! JobQueueReconciler - 期限切れ worker の claim を回収し、site ごとの統計を返す
//!
//! # フロー（site ごと）
//! 1. 登録済み worker ごとに生存判定し、期限切れなら同じ transaction 内で
//!    回収する（claim 済み id を各 queue の pending 末尾へ戻し、登録を外す）
//! 2. live worker と queue の件数を 1 回の snapshot で読む
//!
//! sweep は実行間で状態を持たず、通常の操作と並行して走れる。
//! いつ走らせるかは呼び出し側が決める（`app::ReconcileLoop` を参照）。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use super::keys;
use super::presence::{self, Presence};
use crate::domain::{
    JobQueueError, QueueStats, ReconcileStats, SiteStats, StoreError, WorkerStats,
};
use crate::ports::{Clock, KeyedStore, SystemClock, Txn};

pub struct JobQueueReconciler<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for JobQueueReconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: KeyedStore> JobQueueReconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sweep every known site. No sites is an empty result, not an error.
    #[instrument(skip(self), err)]
    pub async fn reconcile(&self) -> Result<ReconcileStats, JobQueueError> {
        let sites = self.store.transaction(|txn| txn.smembers(keys::SITES)).await?;

        let mut stats = ReconcileStats::default();
        for site in sites {
            stats.sites.push(self.reconcile_site(&site).await?);
        }
        Ok(stats)
    }

    /// One `now` covers the whole site, so the reclaim pass and the
    /// snapshot agree on which workers are live.
    async fn reconcile_site(&self, site: &str) -> Result<SiteStats, JobQueueError> {
        let now = self.clock.now();
        let workers = self
            .store
            .transaction(move |txn| txn.smembers(&keys::workers(site)))
            .await?;

        let mut reclaimed = 0;
        for worker in &workers {
            if let Some(moved) = self.reclaim_if_expired(site, worker, now).await? {
                info!(site, worker = %worker, reclaimed = moved, "expired worker reclaimed");
                reclaimed += moved;
            }
        }

        let mut stats = self
            .store
            .transaction(move |txn| site_snapshot(&*txn, site, now))
            .await?;
        stats.reclaimed = reclaimed;

        debug!(
            site,
            workers = stats.workers.len(),
            claimed = stats.claimed,
            capacity = stats.capacity,
            reclaimed,
            "site reconciled"
        );
        Ok(stats)
    }

    /// `Some(moved)` if the worker was expired and has been removed.
    ///
    /// Liveness is re-tested inside the transaction, so a worker that renews
    /// between listing and reclaiming keeps its claims.
    async fn reclaim_if_expired(
        &self,
        site: &str,
        worker: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<usize>, StoreError> {
        self.store
            .transaction(move |txn| {
                if let Presence::Live { .. } = presence::presence(&*txn, site, worker, now)? {
                    return Ok(None);
                }
                presence::reclaim(txn, site, worker).map(Some)
            })
            .await
    }
}

fn site_snapshot(txn: &dyn Txn, site: &str, now: DateTime<Utc>) -> Result<SiteStats, StoreError> {
    let mut stats = SiteStats {
        site: site.to_string(),
        ..SiteStats::default()
    };

    for worker in txn.smembers(&keys::workers(site))? {
        if let Presence::Live { capacity } = presence::presence(txn, site, &worker, now)? {
            let claimed = txn.llen(&keys::worker_index(site, &worker))?;
            stats.capacity += capacity as usize;
            stats.workers.push(WorkerStats {
                name: worker,
                claimed,
            });
        }
    }

    for queue in txn.smembers(&keys::queues(site))? {
        let queued = txn.llen(&keys::pending(site, &queue))?;
        let claimed = txn.hlen(&keys::claims(site, &queue))?;
        stats.claimed += claimed;
        stats.queues.push(QueueStats {
            name: queue,
            queued,
            claimed,
            capacity: stats.capacity,
            available: stats.capacity.saturating_sub(claimed),
        });
    }

    stats.available = stats.capacity.saturating_sub(stats.claimed);
    Ok(stats)
}
