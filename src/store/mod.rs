pub mod memory;
pub mod redis_store;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Failure talking to the backing key-value store.
///
/// Callers never distinguish the variants for control flow; they exist so the
/// log line says *why* a write was lost or a read came back empty.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store timeout during {op}")]
    Timeout { op: &'static str },

    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            StoreError::Timeout { op: "redis" }
        } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Protocol(e.to_string())
        }
    }
}

/// Sort direction for rank queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankOrder {
    /// Lowest score first (`ZRANGE`).
    Asc,
    /// Highest score first (`ZREVRANGE`).
    Desc,
}

/// One mutation inside a pipelined batch. Every variant is an atomic,
/// commutative store primitive or a fixed-value overwrite.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Incr { key: String },
    HIncrBy { key: String, field: &'static str, delta: i64 },
    HIncrByFloat { key: String, field: &'static str, delta: f64 },
    ZAdd { key: String, member: String, score: f64 },
    /// Remove members by rank, inclusive, negative indexes count from the top.
    ZRemRangeByRank { key: String, start: isize, stop: isize },
    Expire { key: String, ttl_secs: u64 },
}

impl StoreOp {
    pub fn key(&self) -> &str {
        match self {
            StoreOp::Incr { key }
            | StoreOp::HIncrBy { key, .. }
            | StoreOp::HIncrByFloat { key, .. }
            | StoreOp::ZAdd { key, .. }
            | StoreOp::ZRemRangeByRank { key, .. }
            | StoreOp::Expire { key, .. } => key,
        }
    }
}

/// Thin adapter over a key-value store offering atomic counters, hash-field
/// increments, sorted sets, per-key TTL and pipelined execution.
///
/// Implementations: [`RedisStore`] (production) and [`MemoryStore`]
/// (single-node / tests).
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Run `ops` as one pipelined round trip.
    async fn execute(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;

    /// Integer counter value, `None` when the key does not exist.
    async fn get_counter(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// All fields of a hash, empty when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Up to `limit` members with scores, in `order`.
    async fn zrange_by_rank(
        &self,
        key: &str,
        limit: usize,
        order: RankOrder,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    /// Members with `min <= score <= max`, ascending by score.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Liveness probe for `/readyz`.
    async fn ping(&self) -> Result<(), StoreError>;
}
