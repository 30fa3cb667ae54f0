//! In-process store with Redis-compatible semantics for the subset of
//! commands the engine uses.
//!
//! Used for single-node deployments (`METRICS_STORE=memory`) and tests.
//! Expiry is lazy: a key past its deadline is dropped the next time it is
//! touched, and `purge_expired()` sweeps the rest.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

use super::{MetricsStore, RankOrder, StoreError, StoreOp};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    ZSet(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |t| now < t)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Protocol(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<DashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, slot| slot.live(now));
        before - self.data.len()
    }

    /// Remaining TTL of a key, `None` if absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let slot = self.data.get(key)?;
        if !slot.live(now) {
            return None;
        }
        slot.expires_at.map(|t| t.saturating_duration_since(now))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read a live slot, evicting it first if it has expired.
    fn read(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        if let Some(slot) = self.data.get(key) {
            if slot.live(now) {
                return Some(slot.value.clone());
            }
        } else {
            return None;
        }
        self.data.remove_if(key, |_, slot| !slot.live(now));
        None
    }

    /// Mutate a key under its shard lock, creating it with `init` if absent
    /// or expired.
    fn upsert<F>(&self, key: &str, init: fn() -> Value, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Value) -> Result<(), StoreError>,
    {
        let now = Instant::now();
        match self.data.entry(key.to_string()) {
            MapEntry::Occupied(mut occ) => {
                if !occ.get().live(now) {
                    occ.insert(Slot {
                        value: init(),
                        expires_at: None,
                    });
                }
                f(&mut occ.get_mut().value)
            }
            MapEntry::Vacant(vac) => {
                let mut value = init();
                f(&mut value)?;
                vac.insert(Slot {
                    value,
                    expires_at: None,
                });
                Ok(())
            }
        }
    }

    fn apply(&self, op: &StoreOp) -> Result<(), StoreError> {
        match op {
            StoreOp::Incr { key } => self.upsert(key, || Value::Str("0".into()), |v| match v {
                Value::Str(s) => {
                    let n: i64 = s
                        .parse()
                        .map_err(|_| StoreError::Protocol("value is not an integer".into()))?;
                    *s = (n + 1).to_string();
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            }),
            StoreOp::HIncrBy { key, field, delta } => {
                self.upsert(key, || Value::Hash(HashMap::new()), |v| match v {
                    Value::Hash(h) => {
                        let cur = h.entry(field.to_string()).or_insert_with(|| "0".into());
                        let n: i64 = cur
                            .parse()
                            .map_err(|_| StoreError::Protocol("hash value is not an integer".into()))?;
                        *cur = (n + delta).to_string();
                        Ok(())
                    }
                    _ => Err(wrong_type(key)),
                })
            }
            StoreOp::HIncrByFloat { key, field, delta } => {
                self.upsert(key, || Value::Hash(HashMap::new()), |v| match v {
                    Value::Hash(h) => {
                        let cur = h.entry(field.to_string()).or_insert_with(|| "0".into());
                        let n: f64 = cur
                            .parse()
                            .map_err(|_| StoreError::Protocol("hash value is not a float".into()))?;
                        *cur = (n + delta).to_string();
                        Ok(())
                    }
                    _ => Err(wrong_type(key)),
                })
            }
            StoreOp::ZAdd { key, member, score } => {
                self.upsert(key, || Value::ZSet(HashMap::new()), |v| match v {
                    Value::ZSet(z) => {
                        z.insert(member.clone(), *score);
                        Ok(())
                    }
                    _ => Err(wrong_type(key)),
                })
            }
            StoreOp::ZRemRangeByRank { key, start, stop } => {
                let now = Instant::now();
                let Some(mut slot) = self.data.get_mut(key.as_str()) else {
                    return Ok(());
                };
                if !slot.live(now) {
                    return Ok(());
                }
                let Value::ZSet(z) = &mut slot.value else {
                    return Err(wrong_type(key));
                };
                let ranked = sorted_members(z, RankOrder::Asc);
                let len = ranked.len() as isize;
                let norm = |i: isize| if i < 0 { len + i } else { i };
                let (lo, hi) = (norm(*start).max(0), norm(*stop).min(len - 1));
                if lo > hi || lo >= len {
                    return Ok(());
                }
                for (member, _) in &ranked[lo as usize..=hi as usize] {
                    z.remove(member);
                }
                Ok(())
            }
            StoreOp::Expire { key, ttl_secs } => {
                let now = Instant::now();
                if let Some(mut slot) = self.data.get_mut(key.as_str()) {
                    if slot.live(now) {
                        slot.expires_at = Some(now + Duration::from_secs(*ttl_secs));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Members ordered the way Redis orders them: by score, then by member bytes.
/// Descending order reverses both.
fn sorted_members(z: &HashMap<String, f64>, order: RankOrder) -> Vec<(String, f64)> {
    let mut v: Vec<(String, f64)> = z.iter().map(|(m, s)| (m.clone(), *s)).collect();
    v.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    if order == RankOrder::Desc {
        v.reverse();
    }
    v
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn execute(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        // Like a Redis pipeline: not transactional, every command runs and
        // the first failure is reported once the batch is done.
        let mut first_err = None;
        for op in &ops {
            if let Err(e) = self.apply(op) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.read(key) {
            None => Ok(None),
            Some(Value::Str(s)) => s
                .parse()
                .map(Some)
                .map_err(|_| StoreError::Protocol("value is not an integer".into())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        match self.read(key) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(h)) => Ok(h),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn zrange_by_rank(
        &self,
        key: &str,
        limit: usize,
        order: RankOrder,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        match self.read(key) {
            None => Ok(Vec::new()),
            Some(Value::ZSet(z)) => {
                let mut v = sorted_members(&z, order);
                v.truncate(limit);
                Ok(v)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        match self.read(key) {
            None => Ok(Vec::new()),
            Some(Value::ZSet(z)) => Ok(sorted_members(&z, RankOrder::Asc)
                .into_iter()
                .filter(|(_, s)| *s >= min && *s <= max)
                .collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.read(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.data.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
