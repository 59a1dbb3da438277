//! KeyedStore port - 共有 keyed store の抽象化
//!
//! queue と reconciler の操作は、それぞれ 1 回の
//! [`KeyedStore::transaction`] 呼び出しで完結する。共有される可変状態は
//! store だけなので、並行性の保証はすべてここに集約される。
//!
//! # 設計原則
//! - closure は keyspace の一貫したビューを見る
//! - `Ok` なら全書き込みを一括 commit、`Err` なら全書き込みを破棄
//! - transaction 同士は直列化可能
//!
//! primitive は Redis 風のデータモデル（scalar, set, list, hash, key 単位の
//! TTL）に合わせてあり、ネットワーク越しの backend もそのまま実装できる。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::StoreError;

/// Operations available inside a transaction.
///
/// Sets and hashes keep insertion order. A set, list or hash emptied by a
/// removal disappears, except lists created with [`Txn::ensure_list`], which
/// stay (empty) until deleted or expired. Writing to an existing container
/// keeps its TTL; `set` clears it.
pub trait Txn {
    fn exists(&self, key: &str) -> Result<bool, StoreError>;
    fn del(&mut self, key: &str) -> Result<bool, StoreError>;
    /// Set a TTL on an existing key. Returns false if the key is absent.
    fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn set_ex(&mut self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Returns true if the member was newly added.
    fn sadd(&mut self, key: &str, member: &str) -> Result<bool, StoreError>;
    fn srem(&mut self, key: &str, member: &str) -> Result<bool, StoreError>;
    fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
    fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Append to the tail; returns the new length.
    fn rpush(&mut self, key: &str, value: &str) -> Result<usize, StoreError>;
    /// Pop up to `n` elements from the head, oldest first.
    fn lpop_n(&mut self, key: &str, n: usize) -> Result<Vec<String>, StoreError>;
    fn lrange_all(&self, key: &str) -> Result<Vec<String>, StoreError>;
    fn llen(&self, key: &str) -> Result<usize, StoreError>;
    /// Remove every occurrence of `value`; returns how many were removed.
    fn lrem(&mut self, key: &str, value: &str) -> Result<usize, StoreError>;
    /// Create an empty, persistent list if the key is absent.
    fn ensure_list(&mut self, key: &str) -> Result<(), StoreError>;

    /// Returns true if the field was newly added.
    fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<bool, StoreError>;
    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    fn hdel(&mut self, key: &str, field: &str) -> Result<bool, StoreError>;
    fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError>;
    fn hlen(&self, key: &str) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Run `f` atomically. See the module docs for the commit rules.
    ///
    /// Implementations perform no retries; a transport failure surfaces as
    /// `StoreError::Unavailable` with nothing applied.
    async fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnOnce(&mut dyn Txn) -> Result<T, StoreError> + Send;
}
