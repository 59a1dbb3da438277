//! InMemoryStore - プロセス内の KeyedStore
//!
//! # 実装詳細
//! - `HashMap<String, Entry>` を `tokio::sync::Mutex` で保護し、closure の
//!   実行中ずっとロックを保持する（transaction は直列化される）
//! - 書き込みは transaction ごとの overlay（`staged`）に溜め、closure が
//!   `Ok` を返したときだけ keyspace にマージする
//! - TTL は注入された `Clock` で判定する。期限切れの entry は読み取りから
//!   見えず、次に commit する transaction で削除される

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::StoreError;
use crate::domain::lease::deadline;
use crate::ports::{Clock, KeyedStore, SystemClock, Txn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Scalar(String),
    Set(Vec<String>),
    List(VecDeque<String>),
    Hash(Vec<(String, String)>),
}

impl Value {
    fn is_empty_container(&self) -> bool {
        match self {
            Value::Scalar(_) => false,
            Value::Set(members) => members.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Hash(fields) => fields.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
    /// Set by `ensure_list`: the key survives becoming empty.
    keep_empty: bool,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
            keep_empty: false,
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

type Keyspace = HashMap<String, Entry>;

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

/// Overlay transaction over a locked keyspace.
struct InMemoryTxn<'a> {
    base: &'a Keyspace,
    staged: HashMap<String, Option<Entry>>,
    now: DateTime<Utc>,
}

impl<'a> InMemoryTxn<'a> {
    fn new(base: &'a Keyspace, now: DateTime<Utc>) -> Self {
        Self {
            base,
            staged: HashMap::new(),
            now,
        }
    }

    fn lookup(&self, key: &str) -> Option<&Entry> {
        match self.staged.get(key) {
            Some(staged) => staged.as_ref(),
            None => self.base.get(key).filter(|e| e.is_live(self.now)),
        }
    }

    /// Staged copy of `key`, pulled from the base keyspace on first write.
    fn slot(&mut self, key: &str) -> &mut Option<Entry> {
        let base = self.base;
        let now = self.now;
        self.staged
            .entry(key.to_string())
            .or_insert_with(|| base.get(key).filter(|e| e.is_live(now)).cloned())
    }

    /// Apply `f` to the value at `key`.
    ///
    /// An absent key is created from `empty` when given, otherwise `f` is
    /// skipped and `Ok(None)` returned. `f` returns `None` on a type mismatch.
    fn mutate<R>(
        &mut self,
        key: &str,
        empty: Option<Value>,
        f: impl FnOnce(&mut Value) -> Option<R>,
    ) -> Result<Option<R>, StoreError> {
        let slot = self.slot(key);
        let created = slot.is_none();
        if created {
            match empty {
                Some(value) => *slot = Some(Entry::new(value)),
                None => return Ok(None),
            }
        }
        let Some(entry) = slot.as_mut() else {
            return Ok(None);
        };
        let Some(out) = f(&mut entry.value) else {
            if created {
                *slot = None;
            }
            return Err(wrong_type(key));
        };
        let drop_key = entry.value.is_empty_container() && !entry.keep_empty;
        if drop_key {
            *slot = None;
        }
        Ok(Some(out))
    }

    fn read_set(&self, key: &str) -> Result<Option<&Vec<String>>, StoreError> {
        match self.lookup(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Set(members)) => Ok(Some(members)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn read_list(&self, key: &str) -> Result<Option<&VecDeque<String>>, StoreError> {
        match self.lookup(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::List(items)) => Ok(Some(items)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn read_hash(&self, key: &str) -> Result<Option<&Vec<(String, String)>>, StoreError> {
        match self.lookup(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Hash(fields)) => Ok(Some(fields)),
            Some(_) => Err(wrong_type(key)),
        }
    }
}

impl Txn for InMemoryTxn<'_> {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lookup(key).is_some())
    }

    fn del(&mut self, key: &str) -> Result<bool, StoreError> {
        let slot = self.slot(key);
        let existed = slot.is_some();
        *slot = None;
        Ok(existed)
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.now;
        match self.slot(key).as_mut() {
            Some(entry) => {
                entry.expires_at = Some(deadline(now, ttl));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.lookup(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Scalar(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        *self.slot(key) = Some(Entry::new(Value::Scalar(value.to_string())));
        Ok(())
    }

    fn set_ex(&mut self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entry = Entry::new(Value::Scalar(value.to_string()));
        entry.expires_at = Some(deadline(self.now, ttl));
        *self.slot(key) = Some(entry);
        Ok(())
    }

    fn sadd(&mut self, key: &str, member: &str) -> Result<bool, StoreError> {
        let added = self.mutate(key, Some(Value::Set(Vec::new())), |value| match value {
            Value::Set(members) => {
                if members.iter().any(|m| m == member) {
                    Some(false)
                } else {
                    members.push(member.to_string());
                    Some(true)
                }
            }
            _ => None,
        })?;
        Ok(added.unwrap_or(false))
    }

    fn srem(&mut self, key: &str, member: &str) -> Result<bool, StoreError> {
        let removed = self.mutate(key, None, |value| match value {
            Value::Set(members) => {
                let before = members.len();
                members.retain(|m| m != member);
                Some(members.len() != before)
            }
            _ => None,
        })?;
        Ok(removed.unwrap_or(false))
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.read_set(key)?.cloned().unwrap_or_default())
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self
            .read_set(key)?
            .is_some_and(|members| members.iter().any(|m| m == member)))
    }

    fn rpush(&mut self, key: &str, value: &str) -> Result<usize, StoreError> {
        let len = self.mutate(key, Some(Value::List(VecDeque::new())), |v| match v {
            Value::List(items) => {
                items.push_back(value.to_string());
                Some(items.len())
            }
            _ => None,
        })?;
        Ok(len.unwrap_or(0))
    }

    fn lpop_n(&mut self, key: &str, n: usize) -> Result<Vec<String>, StoreError> {
        if n == 0 {
            // Still reject a wrong-typed key.
            self.read_list(key)?;
            return Ok(Vec::new());
        }
        let popped = self.mutate(key, None, |v| match v {
            Value::List(items) => {
                let take = n.min(items.len());
                Some(items.drain(..take).collect::<Vec<_>>())
            }
            _ => None,
        })?;
        Ok(popped.unwrap_or_default())
    }

    fn lrange_all(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read_list(key)?
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn llen(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.read_list(key)?.map_or(0, |items| items.len()))
    }

    fn lrem(&mut self, key: &str, value: &str) -> Result<usize, StoreError> {
        let removed = self.mutate(key, None, |v| match v {
            Value::List(items) => {
                let before = items.len();
                items.retain(|item| item != value);
                Some(before - items.len())
            }
            _ => None,
        })?;
        Ok(removed.unwrap_or(0))
    }

    fn ensure_list(&mut self, key: &str) -> Result<(), StoreError> {
        let slot = self.slot(key);
        match slot {
            None => {
                let mut entry = Entry::new(Value::List(VecDeque::new()));
                entry.keep_empty = true;
                *slot = Some(entry);
                Ok(())
            }
            Some(Entry {
                value: Value::List(_),
                keep_empty,
                ..
            }) => {
                *keep_empty = true;
                Ok(())
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let added = self.mutate(key, Some(Value::Hash(Vec::new())), |v| match v {
            Value::Hash(fields) => match fields.iter_mut().find(|(f, _)| f == field) {
                Some((_, existing)) => {
                    *existing = value.to_string();
                    Some(false)
                }
                None => {
                    fields.push((field.to_string(), value.to_string()));
                    Some(true)
                }
            },
            _ => None,
        })?;
        Ok(added.unwrap_or(false))
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_hash(key)?.and_then(|fields| {
            fields
                .iter()
                .find(|(f, _)| f == field)
                .map(|(_, value)| value.clone())
        }))
    }

    fn hdel(&mut self, key: &str, field: &str) -> Result<bool, StoreError> {
        let removed = self.mutate(key, None, |v| match v {
            Value::Hash(fields) => match fields.iter().position(|(f, _)| f == field) {
                Some(pos) => {
                    fields.remove(pos);
                    Some(true)
                }
                None => Some(false),
            },
            _ => None,
        })?;
        Ok(removed.unwrap_or(false))
    }

    fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self.read_hash(key)?.cloned().unwrap_or_default())
    }

    fn hlen(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.read_hash(key)?.map_or(0, |fields| fields.len()))
    }
}

fn commit(keyspace: &mut Keyspace, staged: HashMap<String, Option<Entry>>, now: DateTime<Utc>) {
    if staged.is_empty() {
        return;
    }
    for (key, entry) in staged {
        match entry {
            Some(entry) => {
                keyspace.insert(key, entry);
            }
            None => {
                keyspace.remove(&key);
            }
        }
    }
    keyspace.retain(|_, entry| entry.is_live(now));
}

/// In-process keyed store.
pub struct InMemoryStore<C = SystemClock> {
    keyspace: Mutex<Keyspace>,
    clock: C,
}

impl InMemoryStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for InMemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            keyspace: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Delete keys outright. Returns how many existed.
    ///
    /// Operators use this to evict a worker by hand; tests use it to
    /// simulate TTL lapse.
    pub async fn delete_keys<I, K>(&self, keys: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        self.transaction(move |txn| {
            let mut deleted = 0;
            for key in &keys {
                if txn.del(key)? {
                    deleted += 1;
                }
            }
            Ok(deleted)
        })
        .await
    }

    /// Live keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let keyspace = self.keyspace.lock().await;
        let now = self.clock.now();
        let mut keys: Vec<String> = keyspace
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl<C: Clock> KeyedStore for InMemoryStore<C> {
    async fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnOnce(&mut dyn Txn) -> Result<T, StoreError> + Send,
    {
        let mut keyspace = self.keyspace.lock().await;
        let now = self.clock.now();

        let mut txn = InMemoryTxn::new(&keyspace, now);
        // Err drops the overlay: nothing reaches the keyspace.
        let out = f(&mut txn)?;
        let staged = txn.staged;

        commit(&mut keyspace, staged, now);
        Ok(out)
    }
}
