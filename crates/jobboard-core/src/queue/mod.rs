//! Queue - lease ベースの claim/release プロトコル
//!
//! `JobQueue` の 1 値が 1 つの (site, queue name) を指す。自身は状態を持たず、
//! すべて store 上にある。変更系の呼び出しはそれぞれ 1 transaction なので、
//! 複数プロセスから同じ queue を同時に操作できる。
//!
//! # Job のライフサイクル（queue 内）
//! - Pending -> Claimed(worker): `claim`（古い順）
//! - Claimed(worker) -> 削除: `remove`
//! - Claimed(worker) -> Pending（末尾）: reconciler が worker の期限切れを
//!   検出したとき、または lease が切れた worker 自身が再登録したとき

pub mod keys;
mod presence;
mod query;
mod reconciler;

pub use reconciler::JobQueueReconciler;

use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use tracing::{debug, info, instrument};

use crate::config::JobBoardConfig;
use crate::domain::{JobId, JobQueueError};
use crate::ports::{Clock, KeyedStore, SystemClock};

pub struct JobQueue<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    site: String,
    queue_name: String,
    worker_ttl: Duration,
    default_capacity: u32,
}

impl<S> Clone for JobQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            site: self.site.clone(),
            queue_name: self.queue_name.clone(),
            worker_ttl: self.worker_ttl,
            default_capacity: self.default_capacity,
        }
    }
}

impl<S: KeyedStore> JobQueue<S> {
    pub fn new(store: Arc<S>, site: impl Into<String>, queue_name: impl Into<String>) -> Self {
        let defaults = JobBoardConfig::default();
        Self {
            store,
            clock: Arc::new(SystemClock),
            site: site.into(),
            queue_name: queue_name.into(),
            worker_ttl: defaults.worker_ttl,
            default_capacity: defaults.default_capacity,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: &JobBoardConfig) -> Self {
        self.worker_ttl = config.worker_ttl;
        self.default_capacity = config.default_capacity;
        self
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Register `worker` (and this site/queue) and renew its lease.
    ///
    /// `None` capacity uses the configured default.
    #[instrument(skip(self), fields(site = %self.site, queue = %self.queue_name), err)]
    pub async fn register(&self, worker: &str, capacity: Option<u32>) -> Result<(), JobQueueError> {
        let capacity = capacity.unwrap_or(self.default_capacity);
        let (site, queue) = (self.site.as_str(), self.queue_name.as_str());
        let now = self.clock.now();
        let ttl = self.worker_ttl;

        let reclaimed = self
            .store
            .transaction(move |txn| presence::renew(txn, site, queue, worker, capacity, now, ttl))
            .await?;
        if reclaimed > 0 {
            info!(worker, reclaimed, "lapsed claims returned on re-register");
        }
        Ok(())
    }

    /// Append `job_id` to the tail of the pending list.
    ///
    /// Returns the pending length afterwards. An id that is already pending
    /// or claimed in this queue is not added twice.
    #[instrument(skip_all, fields(site = %self.site, queue = %self.queue_name), err)]
    pub async fn add(&self, job_id: impl Into<JobId>) -> Result<usize, JobQueueError> {
        let job_id = job_id.into();
        let (site, queue) = (self.site.as_str(), self.queue_name.as_str());
        let id = job_id.as_str();

        let len = self
            .store
            .transaction(move |txn| {
                txn.sadd(keys::SITES, site)?;
                txn.sadd(&keys::queues(site), queue)?;

                let pending_key = keys::pending(site, queue);
                let duplicate = txn.hget(&keys::claims(site, queue), id)?.is_some()
                    || txn.lrange_all(&pending_key)?.iter().any(|p| p == id);
                if duplicate {
                    return txn.llen(&pending_key);
                }
                txn.rpush(&pending_key, id)
            })
            .await?;

        debug!(job_id = %job_id, pending = len, "job added");
        Ok(len)
    }

    /// `worker` を renew し、空き容量分だけ古い順に pending job を渡す
    ///
    /// # 不変条件
    /// - 渡す件数は `min(pending, capacity - 既存の claim 数)`（0 件もあり得る）
    /// - 判定から付与までが 1 transaction なので、同じ id が二重に渡ることはなく、
    ///   先に積まれた job が必ず先に渡る
    /// - lease が切れていた worker は、先に古い claim を pending 末尾へ戻す
    #[instrument(skip(self), fields(site = %self.site, queue = %self.queue_name), err)]
    pub async fn claim(
        &self,
        worker: &str,
        capacity: Option<u32>,
    ) -> Result<Vec<JobId>, JobQueueError> {
        let capacity = capacity.unwrap_or(self.default_capacity);
        let (site, queue) = (self.site.as_str(), self.queue_name.as_str());
        let now = self.clock.now();
        let ttl = self.worker_ttl;

        let (reclaimed, claimed) = self
            .store
            .transaction(move |txn| {
                let reclaimed = presence::renew(txn, site, queue, worker, capacity, now, ttl)?;

                let index_key = keys::worker_index(site, worker);
                let held = txn.llen(&index_key)?;
                let room = (capacity as usize).saturating_sub(held);
                if room == 0 {
                    return Ok((reclaimed, Vec::new()));
                }

                let popped = txn.lpop_n(&keys::pending(site, queue), room)?;
                let claims_key = keys::claims(site, queue);
                let timestamps_key = keys::claim_timestamps(site, queue);
                let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
                for id in &popped {
                    txn.hset(&claims_key, id, worker)?;
                    txn.hset(&timestamps_key, id, &stamp)?;
                    txn.rpush(&index_key, id)?;
                }
                Ok((reclaimed, popped))
            })
            .await?;

        if reclaimed > 0 {
            info!(worker, reclaimed, "lapsed claims returned before claiming");
        }
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "jobs claimed");
        }
        Ok(claimed.into_iter().map(JobId::from).collect())
    }

    /// Drop `job_id` from this queue, pending or claimed.
    ///
    /// Returns 1 if it was present, 0 otherwise.
    #[instrument(skip_all, fields(site = %self.site, queue = %self.queue_name), err)]
    pub async fn remove(&self, job_id: impl Into<JobId>) -> Result<usize, JobQueueError> {
        let job_id = job_id.into();
        let (site, queue) = (self.site.as_str(), self.queue_name.as_str());
        let id = job_id.as_str();

        let removed = self
            .store
            .transaction(move |txn| {
                let mut removed = txn.lrem(&keys::pending(site, queue), id)?;

                let claims_key = keys::claims(site, queue);
                if let Some(owner) = txn.hget(&claims_key, id)? {
                    txn.hdel(&claims_key, id)?;
                    txn.hdel(&keys::claim_timestamps(site, queue), id)?;
                    txn.lrem(&keys::worker_index(site, &owner), id)?;
                    removed += 1;
                }
                Ok(removed.min(1))
            })
            .await?;

        debug!(job_id = %job_id, removed, "job removed");
        Ok(removed)
    }

    /// The subset of `job_ids` currently claimed by `worker` in this queue,
    /// in input order. Read-only.
    pub async fn check_claims<I, J>(
        &self,
        worker: &str,
        job_ids: I,
    ) -> Result<Vec<JobId>, JobQueueError>
    where
        I: IntoIterator<Item = J>,
        J: Into<JobId>,
    {
        let candidates: Vec<JobId> = job_ids.into_iter().map(Into::into).collect();
        let claims_key = keys::claims(&self.site, &self.queue_name);

        let held = self
            .store
            .transaction(move |txn| {
                let mut held = Vec::new();
                for id in candidates {
                    if txn.hget(&claims_key, id.as_str())?.as_deref() == Some(worker) {
                        held.push(id);
                    }
                }
                Ok(held)
            })
            .await?;
        Ok(held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobListing, QueueListing, StoreError};
    use crate::impls::InMemoryStore;
    use crate::ports::Txn;
    use async_trait::async_trait;
    use rstest::rstest;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    const SITE: &str = "test";
    const QUEUE: &str = "lel";

    fn queue() -> JobQueue<InMemoryStore> {
        JobQueue::new(Arc::new(InMemoryStore::new()), SITE, QUEUE)
    }

    async fn queue_with_jobs(n: u64) -> JobQueue<InMemoryStore> {
        let q = queue();
        q.register("a", None).await.unwrap();
        for id in 0..n {
            q.add(id).await.unwrap();
        }
        q
    }

    fn ids(raw: &[&str]) -> Vec<JobId> {
        raw.iter().map(|s| JobId::from(*s)).collect()
    }

    // Store wrapper that runs the transaction body and then fails the commit.
    struct FailingStore {
        inner: InMemoryStore,
        fail: AtomicBool,
    }

    #[async_trait]
    impl KeyedStore for FailingStore {
        async fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
        where
            T: Send,
            F: FnOnce(&mut dyn Txn) -> Result<T, StoreError> + Send,
        {
            let fail = self.fail.load(Ordering::SeqCst);
            self.inner
                .transaction(move |txn| {
                    let out = f(txn)?;
                    if fail {
                        return Err(StoreError::Unavailable("connection reset".to_string()));
                    }
                    Ok(out)
                })
                .await
        }
    }

    // with no data

    #[tokio::test]
    async fn register_creates_site_queue_and_worker_sets() {
        let q = queue();
        q.register("a", None).await.unwrap();

        let keys = q.store().keys().await;
        for key in ["sites", "queues:test", "workers:test"] {
            assert!(keys.contains(&key.to_string()), "missing {key}");
        }
        for key in keys::worker_presence(SITE, "a") {
            assert!(keys.contains(&key), "missing {key}");
        }
    }

    #[tokio::test]
    async fn queries_on_unknown_site_are_invalid() {
        let q = queue();
        let store = q.store().as_ref();

        let err = JobQueue::for_worker(store, SITE, "a", None).await.unwrap_err();
        assert!(err.is_invalid());
        let err = JobQueue::for_site(store, SITE).await.unwrap_err();
        assert!(matches!(err, JobQueueError::Invalid { site } if site == SITE));
        let err = JobQueue::for_queue(store, SITE, QUEUE).await.unwrap_err();
        assert!(err.is_invalid());
    }

    #[tokio::test]
    async fn check_claims_on_empty_store_is_empty() {
        let claimed = queue().check_claims("a", ["0", "1", "2", "3"]).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn claim_on_empty_queue_yields_nothing() {
        let q = queue();
        assert!(q.claim("a", None).await.unwrap().is_empty());

        q.register("b", Some(3)).await.unwrap();
        assert!(q.claim("b", Some(3)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_on_empty_queue_returns_zero() {
        assert_eq!(queue().remove("0").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn first_add_returns_one() {
        let q = queue();
        q.register("a", None).await.unwrap();
        assert_eq!(q.add("0").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn add_registers_site_without_a_worker() {
        let q = queue();
        q.add("0").await.unwrap();

        let listing = JobQueue::for_queue(q.store().as_ref(), SITE, QUEUE).await.unwrap();
        assert_eq!(listing, vec![JobListing::pending("0")]);
    }

    // with queued job ids

    #[tokio::test]
    async fn for_worker_is_empty_before_claims() {
        let q = queue_with_jobs(4).await;
        let held = JobQueue::for_worker(q.store().as_ref(), SITE, "a", Some(QUEUE))
            .await
            .unwrap();
        assert!(held.is_empty());
    }

    #[tokio::test]
    async fn for_site_lists_newest_first() {
        let q = queue_with_jobs(4).await;
        let listing = JobQueue::for_site(q.store().as_ref(), SITE).await.unwrap();
        assert_eq!(
            listing,
            vec![QueueListing {
                queue: QUEUE.to_string(),
                jobs: vec![
                    JobListing::pending("3"),
                    JobListing::pending("2"),
                    JobListing::pending("1"),
                    JobListing::pending("0"),
                ],
            }]
        );
    }

    #[tokio::test]
    async fn for_queue_shows_claimed_after_pending() {
        let q = queue_with_jobs(4).await;
        q.claim("a", Some(2)).await.unwrap();

        let listing = JobQueue::for_queue(q.store().as_ref(), SITE, QUEUE).await.unwrap();
        assert_eq!(
            listing,
            vec![
                JobListing::pending("3"),
                JobListing::pending("2"),
                JobListing::claimed("1", "a"),
                JobListing::claimed("0", "a"),
            ]
        );
    }

    #[tokio::test]
    async fn registered_site_with_empty_queue_lists_nothing() {
        let q = queue();
        q.register("a", None).await.unwrap();
        let store = q.store().as_ref();

        assert!(JobQueue::for_queue(store, SITE, QUEUE).await.unwrap().is_empty());
        assert!(JobQueue::for_queue(store, SITE, "other").await.unwrap().is_empty());
        let listing = JobQueue::for_site(store, SITE).await.unwrap();
        assert!(listing.iter().all(|q| q.jobs.is_empty()));
    }

    #[tokio::test]
    async fn check_claims_before_claim_is_empty() {
        let q = queue_with_jobs(4).await;
        let claimed = q.check_claims("a", ["0", "1", "2", "3"]).await.unwrap();
        assert_eq!(claimed, Vec::<JobId>::new());
    }

    #[tokio::test]
    async fn claim_with_default_capacity_takes_oldest() {
        let q = queue_with_jobs(4).await;
        assert_eq!(q.claim("a", None).await.unwrap(), ids(&["0"]));
    }

    #[tokio::test]
    async fn remove_pending_returns_one() {
        let q = queue_with_jobs(4).await;
        assert_eq!(q.remove("0").await.unwrap(), 1);
        assert_eq!(q.remove("0").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fifth_add_returns_five() {
        let q = queue_with_jobs(4).await;
        assert_eq!(q.add("4").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn duplicate_add_is_ignored() {
        let q = queue_with_jobs(4).await;
        assert_eq!(q.add("2").await.unwrap(), 4);

        q.claim("a", Some(1)).await.unwrap();
        assert_eq!(q.add("0").await.unwrap(), 3);
    }

    #[rstest]
    #[case::one(1, &["0"])]
    #[case::some(3, &["0", "1", "2"])]
    #[case::exact(5, &["0", "1", "2", "3", "4"])]
    #[case::more_than_pending(9, &["0", "1", "2", "3", "4"])]
    #[tokio::test]
    async fn claim_grants_oldest_first(#[case] capacity: u32, #[case] expected: &[&str]) {
        let q = queue_with_jobs(5).await;
        assert_eq!(q.claim("a", Some(capacity)).await.unwrap(), ids(expected));
    }

    #[tokio::test]
    async fn claim_respects_capacity_across_calls() {
        let q = queue_with_jobs(6).await;

        assert_eq!(q.claim("a", Some(2)).await.unwrap(), ids(&["0", "1"]));
        assert!(q.claim("a", Some(2)).await.unwrap().is_empty());

        // raising capacity grants only the difference
        assert_eq!(q.claim("a", Some(3)).await.unwrap(), ids(&["2"]));
        // lowering it grants nothing and reclaims nothing
        assert!(q.claim("a", Some(1)).await.unwrap().is_empty());

        let held = JobQueue::for_worker(q.store().as_ref(), SITE, "a", Some(QUEUE))
            .await
            .unwrap();
        assert_eq!(held, ids(&["0", "1", "2"]));
    }

    #[tokio::test]
    async fn claims_are_fifo_across_workers() {
        let q = queue_with_jobs(4).await;

        assert_eq!(q.claim("a", Some(2)).await.unwrap(), ids(&["0", "1"]));
        assert_eq!(q.claim("b", Some(2)).await.unwrap(), ids(&["2", "3"]));
        assert!(q.claim("c", Some(2)).await.unwrap().is_empty());

        assert_eq!(q.check_claims("a", ["0", "1", "2"]).await.unwrap(), ids(&["0", "1"]));
        assert_eq!(q.check_claims("b", ["3", "2", "9"]).await.unwrap(), ids(&["3", "2"]));
    }

    #[tokio::test]
    async fn removing_a_claimed_job_frees_capacity() {
        let q = queue_with_jobs(3).await;
        q.claim("a", Some(2)).await.unwrap();

        assert_eq!(q.remove("0").await.unwrap(), 1);
        assert!(q.check_claims("a", ["0"]).await.unwrap().is_empty());

        assert_eq!(q.claim("a", Some(2)).await.unwrap(), ids(&["2"]));
        let held = JobQueue::for_worker(q.store().as_ref(), SITE, "a", None)
            .await
            .unwrap();
        assert_eq!(held, ids(&["1", "2"]));
    }

    #[tokio::test]
    async fn queues_on_one_site_are_independent() {
        let store = Arc::new(InMemoryStore::new());
        let builds = JobQueue::new(Arc::clone(&store), SITE, "builds");
        let deploys = JobQueue::new(Arc::clone(&store), SITE, "deploys");

        builds.add("b0").await.unwrap();
        deploys.add("d0").await.unwrap();

        assert_eq!(builds.claim("a", Some(5)).await.unwrap(), ids(&["b0"]));
        // capacity is per worker, shared across queues
        assert_eq!(deploys.claim("a", Some(1)).await.unwrap(), Vec::<JobId>::new());
        assert_eq!(deploys.claim("a", Some(2)).await.unwrap(), ids(&["d0"]));

        let all = JobQueue::for_worker(store.as_ref(), SITE, "a", None).await.unwrap();
        assert_eq!(all, ids(&["b0", "d0"]));
        let listing = JobQueue::for_site(store.as_ref(), SITE).await.unwrap();
        let names: Vec<&str> = listing.iter().map(|l| l.queue.as_str()).collect();
        assert_eq!(names, vec!["builds", "deploys"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_share_a_job() {
        let q = queue();
        for id in 0..40u64 {
            q.add(id).await.unwrap();
        }

        let mut handles = Vec::new();
        for w in 0..8 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                let worker = format!("w{w}");
                let mut mine = Vec::new();
                for _ in 0..4 {
                    mine.extend(q.claim(&worker, Some(3)).await.unwrap());
                    tokio::task::yield_now().await;
                }
                (worker, mine)
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            let (worker, mine) = handle.await.unwrap();
            assert!(mine.len() <= 3, "{worker} exceeded capacity: {mine:?}");
            total += mine.len();
            for id in mine {
                assert!(seen.insert(id.clone()), "{id} claimed twice");
            }
        }
        assert_eq!(total, 24);
        assert_eq!(seen.len(), 24);

        // the oldest 24 went out, the newest 16 are still pending
        let expected: HashSet<JobId> = (0..24u64).map(JobId::from).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn failed_claim_leaves_no_trace() {
        let store = Arc::new(FailingStore {
            inner: InMemoryStore::new(),
            fail: AtomicBool::new(false),
        });
        let q = JobQueue::new(Arc::clone(&store), SITE, QUEUE);
        for id in 0..3u64 {
            q.add(id).await.unwrap();
        }

        store.fail.store(true, Ordering::SeqCst);
        let err = q.claim("z", Some(2)).await.unwrap_err();
        assert!(matches!(err, JobQueueError::Store(StoreError::Unavailable(_))));
        store.fail.store(false, Ordering::SeqCst);

        let listing = JobQueue::for_queue(store.as_ref(), SITE, QUEUE).await.unwrap();
        assert!(listing.iter().all(|job| job.claimed_by.is_none()));
        assert_eq!(listing.len(), 3);
        let keys = store.inner.keys().await;
        assert!(!keys.iter().any(|k| k.starts_with("worker:test:z")));
        assert_eq!(q.claim("z", Some(2)).await.unwrap(), ids(&["0", "1"]));
    }
}
