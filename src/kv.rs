//! The ordered key-value service seam.
//!
//! Components never talk to a storage engine directly: they receive an
//! `Arc<dyn KeyValueStore>` and run every read-modify-write inside
//! [`KeyValueStore::transaction`], which is the only synchronization
//! primitive shared state gets. [`MemoryStore`] is the in-process
//! implementation used by the binary and the tests.

use crate::error::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;
use std::sync::Mutex;

/// Position of a member in an ordered set.
///
/// `millis` is the item timestamp; `seq` is drawn from a global counter and
/// breaks ties so two members never share a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Score {
    pub millis: i64,
    pub seq: u64,
}

impl Score {
    pub fn new(millis: i64, seq: u64) -> Self {
        Self { millis, seq }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.millis, self.seq)
    }
}

impl FromStr for Score {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (millis, seq) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::BadCursor(s.to_string()))?;
        let millis = millis.parse().map_err(|_| Error::BadCursor(s.to_string()))?;
        let seq = seq.parse().map_err(|_| Error::BadCursor(s.to_string()))?;
        Ok(Score { millis, seq })
    }
}

/// Primitive operations available inside a transaction.
pub trait Txn {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    /// Returns `true` when the key was absent and has been written.
    fn setnx(&mut self, key: &str, value: &str) -> Result<bool>;
    fn incr(&mut self, key: &str, by: i64) -> Result<i64>;
    fn del(&mut self, key: &str) -> Result<bool>;

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<()>;
    fn hsetnx(&mut self, key: &str, field: &str, value: &str) -> Result<bool>;
    fn hdel(&mut self, key: &str, field: &str) -> Result<bool>;

    fn sadd(&mut self, key: &str, members: &[String]) -> Result<usize>;
    fn srem(&mut self, key: &str, members: &[String]) -> Result<usize>;
    fn sismember(&self, key: &str, member: &str) -> Result<bool>;
    fn scard(&self, key: &str) -> Result<usize>;
    fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Returns `true` when the member is new to the set.
    fn zadd(&mut self, key: &str, member: &str, score: Score) -> Result<bool>;
    fn zrem(&mut self, key: &str, members: &[String]) -> Result<usize>;
    fn zscore(&self, key: &str, member: &str) -> Result<Option<Score>>;
    fn zcard(&self, key: &str) -> Result<usize>;
    /// Members with scores inside `(min, max)`, ascending, or descending when
    /// `rev` is set, truncated to `limit`.
    fn zrange_by_score(
        &self,
        key: &str,
        min: Bound<Score>,
        max: Bound<Score>,
        limit: Option<usize>,
        rev: bool,
    ) -> Result<Vec<(String, Score)>>;
}

pub trait KeyValueStore: Send + Sync {
    /// Runs `body` atomically. If it returns an error, none of its writes
    /// are kept.
    fn transaction(&self, body: &mut dyn FnMut(&mut dyn Txn) -> Result<()>) -> Result<()>;
}

pub trait StoreExt: KeyValueStore {
    /// [`KeyValueStore::transaction`] with a return value.
    fn atomic<T>(&self, body: impl FnOnce(&mut dyn Txn) -> Result<T>) -> Result<T> {
        let mut body = Some(body);
        let mut out = None;
        self.transaction(&mut |tx: &mut dyn Txn| {
            let body = body
                .take()
                .ok_or_else(|| Error::StoreUnavailable("transaction body ran twice".to_string()))?;
            out = Some(body(tx)?);
            Ok(())
        })?;
        out.ok_or_else(|| Error::StoreUnavailable("transaction produced no result".to_string()))
    }
}

impl<S: KeyValueStore + ?Sized> StoreExt for S {}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
    Sorted(SortedSet),
    Hash(HashMap<String, String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Set(_) => "set",
            Value::Sorted(_) => "zset",
            Value::Hash(_) => "hash",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SortedSet {
    scores: HashMap<String, Score>,
    order: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: Score) -> bool {
        let is_new = match self.scores.insert(member.to_string(), score) {
            Some(old) => {
                self.order.remove(&(old, member.to_string()));
                false
            }
            None => true,
        };
        self.order.insert((score, member.to_string()));
        is_new
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => self.order.remove(&(score, member.to_string())),
            None => false,
        }
    }

    fn range(
        &self,
        min: Bound<Score>,
        max: Bound<Score>,
        limit: Option<usize>,
        rev: bool,
    ) -> Vec<(String, Score)> {
        let above_min = move |s: &Score| match min {
            Bound::Unbounded => true,
            Bound::Included(m) => *s >= m,
            Bound::Excluded(m) => *s > m,
        };
        let below_max = move |s: &Score| match max {
            Bound::Unbounded => true,
            Bound::Included(m) => *s <= m,
            Bound::Excluded(m) => *s < m,
        };
        let limit = limit.unwrap_or(usize::MAX);
        let to_pair = |(s, m): &(Score, String)| (m.clone(), *s);

        if rev {
            self.order
                .iter()
                .rev()
                .skip_while(|(s, _)| !below_max(s))
                .take_while(|(s, _)| above_min(s))
                .take(limit)
                .map(to_pair)
                .collect()
        } else {
            let start = match min {
                Bound::Unbounded => Bound::Unbounded,
                Bound::Included(m) | Bound::Excluded(m) => Bound::Included((m, String::new())),
            };
            self.order
                .range((start, Bound::Unbounded))
                .skip_while(|(s, _)| !above_min(s))
                .take_while(|(s, _)| below_max(s))
                .take(limit)
                .map(to_pair)
                .collect()
        }
    }
}

/// In-process key-value store. All transactions are serialized on one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn transaction(&self, body: &mut dyn FnMut(&mut dyn Txn) -> Result<()>) -> Result<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| Error::StoreUnavailable("memory store lock poisoned".to_string()))?;
        let mut tx = MemoryTxn {
            data: &mut *data,
            undo: HashMap::new(),
        };
        let result = body(&mut tx);
        if result.is_err() {
            tx.rollback();
        }
        result
    }
}

struct MemoryTxn<'a> {
    data: &'a mut HashMap<String, Value>,
    // First-seen state of every key touched by this transaction.
    undo: HashMap<String, Option<Value>>,
}

impl MemoryTxn<'_> {
    fn rollback(&mut self) {
        for (key, old) in self.undo.drain() {
            match old {
                Some(value) => {
                    self.data.insert(key, value);
                }
                None => {
                    self.data.remove(&key);
                }
            }
        }
    }

    fn touch(&mut self, key: &str) {
        if !self.undo.contains_key(key) {
            self.undo.insert(key.to_string(), self.data.get(key).cloned());
        }
    }

    fn wrong_type(key: &str, found: &Value) -> Error {
        Error::StoreUnavailable(format!("WRONGTYPE {} holds a {}", key, found.kind()))
    }

    fn str_ref(&self, key: &str) -> Result<Option<&String>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(other) => Err(Self::wrong_type(key, other)),
        }
    }

    fn set_ref(&self, key: &str) -> Result<Option<&BTreeSet<String>>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::Set(s)) => Ok(Some(s)),
            Some(other) => Err(Self::wrong_type(key, other)),
        }
    }

    fn sorted_ref(&self, key: &str) -> Result<Option<&SortedSet>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::Sorted(z)) => Ok(Some(z)),
            Some(other) => Err(Self::wrong_type(key, other)),
        }
    }

    fn hash_ref(&self, key: &str) -> Result<Option<&HashMap<String, String>>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(Some(h)),
            Some(other) => Err(Self::wrong_type(key, other)),
        }
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut BTreeSet<String>> {
        self.touch(key);
        let value = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(BTreeSet::new()));
        match value {
            Value::Set(s) => Ok(s),
            other => Err(Self::wrong_type(key, other)),
        }
    }

    fn sorted_mut(&mut self, key: &str) -> Result<&mut SortedSet> {
        self.touch(key);
        let value = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Sorted(SortedSet::default()));
        match value {
            Value::Sorted(z) => Ok(z),
            other => Err(Self::wrong_type(key, other)),
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>> {
        self.touch(key);
        let value = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()));
        match value {
            Value::Hash(h) => Ok(h),
            other => Err(Self::wrong_type(key, other)),
        }
    }

    // Collections left empty by a removal disappear, as they do in Redis.
    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.data.get(key) {
            Some(Value::Set(s)) => s.is_empty(),
            Some(Value::Sorted(z)) => z.scores.is_empty(),
            Some(Value::Hash(h)) => h.is_empty(),
            _ => false,
        };
        if empty {
            self.data.remove(key);
        }
    }
}

impl Txn for MemoryTxn<'_> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.str_ref(key)?.cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.touch(key);
        self.data.insert(key.to_string(), Value::Str(value.to_string()));
        Ok(())
    }

    fn setnx(&mut self, key: &str, value: &str) -> Result<bool> {
        if self.data.contains_key(key) {
            return Ok(false);
        }
        self.set(key, value)?;
        Ok(true)
    }

    fn incr(&mut self, key: &str, by: i64) -> Result<i64> {
        let current = match self.str_ref(key)? {
            Some(s) => s.parse::<i64>().map_err(|_| {
                Error::StoreUnavailable(format!("value at {} is not an integer", key))
            })?,
            None => 0,
        };
        let next = current + by;
        self.set(key, &next.to_string())?;
        Ok(next)
    }

    fn del(&mut self, key: &str) -> Result<bool> {
        self.touch(key);
        Ok(self.data.remove(key).is_some())
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.hash_ref(key)?.and_then(|h| h.get(field).cloned()))
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hash_mut(key)?.insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hsetnx(&mut self, key: &str, field: &str, value: &str) -> Result<bool> {
        if self.hget(key, field)?.is_some() {
            return Ok(false);
        }
        self.hset(key, field, value)?;
        Ok(true)
    }

    fn hdel(&mut self, key: &str, field: &str) -> Result<bool> {
        if self.hash_ref(key)?.is_none() {
            return Ok(false);
        }
        let removed = self.hash_mut(key)?.remove(field).is_some();
        self.drop_if_empty(key);
        Ok(removed)
    }

    fn sadd(&mut self, key: &str, members: &[String]) -> Result<usize> {
        let set = self.set_mut(key)?;
        Ok(members.iter().filter(|m| set.insert(m.to_string())).count())
    }

    fn srem(&mut self, key: &str, members: &[String]) -> Result<usize> {
        if self.set_ref(key)?.is_none() {
            return Ok(0);
        }
        let set = self.set_mut(key)?;
        let removed = members.iter().filter(|m| set.remove(m.as_str())).count();
        self.drop_if_empty(key);
        Ok(removed)
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self.set_ref(key)?.map_or(false, |s| s.contains(member)))
    }

    fn scard(&self, key: &str) -> Result<usize> {
        Ok(self.set_ref(key)?.map_or(0, |s| s.len()))
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .set_ref(key)?
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn zadd(&mut self, key: &str, member: &str, score: Score) -> Result<bool> {
        Ok(self.sorted_mut(key)?.insert(member, score))
    }

    fn zrem(&mut self, key: &str, members: &[String]) -> Result<usize> {
        if self.sorted_ref(key)?.is_none() {
            return Ok(0);
        }
        let zset = self.sorted_mut(key)?;
        let removed = members.iter().filter(|m| zset.remove(m)).count();
        self.drop_if_empty(key);
        Ok(removed)
    }

    fn zscore(&self, key: &str, member: &str) -> Result<Option<Score>> {
        Ok(self.sorted_ref(key)?.and_then(|z| z.scores.get(member).copied()))
    }

    fn zcard(&self, key: &str) -> Result<usize> {
        Ok(self.sorted_ref(key)?.map_or(0, |z| z.scores.len()))
    }

    fn zrange_by_score(
        &self,
        key: &str,
        min: Bound<Score>,
        max: Bound<Score>,
        limit: Option<usize>,
        rev: bool,
    ) -> Result<Vec<(String, Score)>> {
        Ok(self
            .sorted_ref(key)?
            .map(|z| z.range(min, max, limit, rev))
            .unwrap_or_default())
    }
}
