//! Worker presence - lease の更新と生存判定
//!
//! register/claim 時の renew と、reconciler が使う生存判定・回収。
//! どれも呼び出し側のトランザクション内で動く。

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::keys;
use crate::domain::{StoreError, WorkerLease};
use crate::ports::Txn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Presence {
    Live { capacity: u32 },
    Expired,
}

/// Register `worker` under `site`/`queue` and renew its lease.
///
/// Writes the lease record and capacity with `ttl`, creates the claimed
/// index if absent and renews its TTL. If the worker was not live before
/// this call, claims it still holds from a lapsed lease are first moved
/// back to pending, so the new index starts consistent with the claims.
/// Returns how many jobs were moved.
pub(crate) fn renew(
    txn: &mut dyn Txn,
    site: &str,
    queue: &str,
    worker: &str,
    capacity: u32,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<usize, StoreError> {
    let reclaimed = match presence(&*txn, site, worker, now)? {
        Presence::Live { .. } => 0,
        Presence::Expired => reclaim(txn, site, worker)?,
    };

    txn.sadd(keys::SITES, site)?;
    txn.sadd(&keys::queues(site), queue)?;
    txn.sadd(&keys::workers(site), worker)?;

    let [lease_key, capacity_key, index_key] = keys::worker_presence(site, worker);
    let lease = WorkerLease::new(worker, capacity, now, ttl);
    let raw = lease.encode().map_err(|e| StoreError::Corrupt {
        key: lease_key.clone(),
        reason: e.to_string(),
    })?;
    txn.set_ex(&lease_key, &raw, ttl)?;
    txn.set_ex(&capacity_key, &capacity.to_string(), ttl)?;
    txn.ensure_list(&index_key)?;
    txn.expire(&index_key, ttl)?;
    Ok(reclaimed)
}

/// A worker is live only while its lease record, capacity and claimed index
/// all exist and the lease has not passed `expires_at`. Any one missing is
/// enough to call it expired.
pub(crate) fn presence(
    txn: &dyn Txn,
    site: &str,
    worker: &str,
    now: DateTime<Utc>,
) -> Result<Presence, StoreError> {
    let [lease_key, capacity_key, index_key] = keys::worker_presence(site, worker);

    let Some(raw_lease) = txn.get(&lease_key)? else {
        return Ok(Presence::Expired);
    };
    let Some(raw_capacity) = txn.get(&capacity_key)? else {
        return Ok(Presence::Expired);
    };
    if !txn.exists(&index_key)? {
        return Ok(Presence::Expired);
    }

    let lease = match WorkerLease::decode(&raw_lease) {
        Ok(lease) => lease,
        Err(e) => {
            warn!(site, worker, error = %e, "undecodable worker lease, treating as expired");
            return Ok(Presence::Expired);
        }
    };
    if !lease.is_live(now) {
        return Ok(Presence::Expired);
    }

    match raw_capacity.parse::<u32>() {
        Ok(capacity) => Ok(Presence::Live { capacity }),
        Err(e) => {
            warn!(site, worker, error = %e, "unparsable worker capacity, treating as expired");
            Ok(Presence::Expired)
        }
    }
}

/// `worker` が `site` で保持している job を各 queue の pending 末尾へ戻し、
/// presence と登録を消す
pub(crate) fn reclaim(txn: &mut dyn Txn, site: &str, worker: &str) -> Result<usize, StoreError> {
    let mut moved = 0;
    for queue in txn.smembers(&keys::queues(site))? {
        let claims_key = keys::claims(site, &queue);
        let timestamps_key = keys::claim_timestamps(site, &queue);
        let pending_key = keys::pending(site, &queue);

        let held: Vec<String> = txn
            .hgetall(&claims_key)?
            .into_iter()
            .filter(|(_, owner)| owner == worker)
            .map(|(id, _)| id)
            .collect();
        for id in held {
            txn.hdel(&claims_key, &id)?;
            txn.hdel(&timestamps_key, &id)?;
            txn.rpush(&pending_key, &id)?;
            moved += 1;
        }
    }

    for key in keys::worker_presence(site, worker) {
        txn.del(&key)?;
    }
    txn.srem(&keys::workers(site), worker)?;
    Ok(moved)
}
