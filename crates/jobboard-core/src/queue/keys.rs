//! Store key schema.
//!
//! ```text
//! sites                                   set   site names
//! queues:{site}                           set   queue names
//! workers:{site}                          set   worker names (registration order)
//! queue:{site}:{queue}                    list  pending job ids, oldest first
//! queue:{site}:{queue}:claims             hash  job id -> worker
//! queue:{site}:{queue}:claims:timestamps  hash  job id -> claimed-at (RFC 3339)
//! worker:{site}:{worker}                  str   WorkerLease JSON, TTL
//! worker:{site}:{worker}:capacity         str   capacity, TTL
//! worker:{site}:{worker}:idx              list  claimed job ids, TTL
//! ```

pub const SITES: &str = "sites";

pub fn queues(site: &str) -> String {
    format!("queues:{site}")
}

pub fn workers(site: &str) -> String {
    format!("workers:{site}")
}

pub fn pending(site: &str, queue: &str) -> String {
    format!("queue:{site}:{queue}")
}

pub fn claims(site: &str, queue: &str) -> String {
    format!("queue:{site}:{queue}:claims")
}

pub fn claim_timestamps(site: &str, queue: &str) -> String {
    format!("queue:{site}:{queue}:claims:timestamps")
}

pub fn worker_lease(site: &str, worker: &str) -> String {
    format!("worker:{site}:{worker}")
}

pub fn worker_capacity(site: &str, worker: &str) -> String {
    format!("worker:{site}:{worker}:capacity")
}

pub fn worker_index(site: &str, worker: &str) -> String {
    format!("worker:{site}:{worker}:idx")
}

/// Every key holding a worker's presence. Losing any one expires the worker.
pub fn worker_presence(site: &str, worker: &str) -> [String; 3] {
    [
        worker_lease(site, worker),
        worker_capacity(site, worker),
        worker_index(site, worker),
    ]
}
