use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use tokio::time::timeout;

use super::{MetricsStore, RankOrder, StoreError, StoreOp};

/// How long startup waits for the first Redis connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis-backed store. Cheap to clone; all clones share one multiplexed
/// connection managed (and transparently reconnected) by `ConnectionManager`.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RedisStore {
    pub async fn connect(
        redis_url: &str,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Redis connection timed out after {:?}. Please ensure Redis is running at: {}",
                    CONNECT_TIMEOUT,
                    redis_url
                )
            })?
            .map_err(|e| anyhow::anyhow!("Failed to connect to Redis at {}: {}", redis_url, e))?;

        Ok(Self {
            conn,
            read_timeout,
            write_timeout,
        })
    }

    /// Apply a hard deadline to one Redis call so a degraded server cannot
    /// stall the caller.
    async fn bounded<T, F>(&self, op: &'static str, budget: Duration, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match timeout(budget, fut).await {
            Ok(res) => res.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout { op }),
        }
    }
}

fn build_pipeline(ops: &[StoreOp]) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    for op in ops {
        match op {
            StoreOp::Incr { key } => {
                pipe.cmd("INCR").arg(key).ignore();
            }
            StoreOp::HIncrBy { key, field, delta } => {
                pipe.cmd("HINCRBY").arg(key).arg(*field).arg(*delta).ignore();
            }
            StoreOp::HIncrByFloat { key, field, delta } => {
                pipe.cmd("HINCRBYFLOAT").arg(key).arg(*field).arg(*delta).ignore();
            }
            StoreOp::ZAdd { key, member, score } => {
                pipe.cmd("ZADD").arg(key).arg(*score).arg(member).ignore();
            }
            StoreOp::ZRemRangeByRank { key, start, stop } => {
                pipe.cmd("ZREMRANGEBYRANK").arg(key).arg(*start).arg(*stop).ignore();
            }
            StoreOp::Expire { key, ttl_secs } => {
                pipe.cmd("EXPIRE").arg(key).arg(*ttl_secs).ignore();
            }
        }
    }
    pipe
}

#[async_trait]
impl MetricsStore for RedisStore {
    async fn execute(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let pipe = build_pipeline(&ops);
        let mut conn = self.conn.clone();
        let started = Instant::now();
        let res = self
            .bounded("pipeline", self.write_timeout, pipe.query_async::<_, ()>(&mut conn))
            .await;
        tracing::trace!(
            commands = ops.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "redis pipeline executed"
        );
        res
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded("get_counter", self.read_timeout, conn.get::<_, Option<i64>>(key))
            .await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(
            "hash_get_all",
            self.read_timeout,
            conn.hgetall::<_, HashMap<String, String>>(key),
        )
        .await
    }

    async fn zrange_by_rank(
        &self,
        key: &str,
        limit: usize,
        order: RankOrder,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = (limit - 1) as isize;
        let mut conn = self.conn.clone();
        match order {
            RankOrder::Asc => {
                self.bounded(
                    "zrange",
                    self.read_timeout,
                    conn.zrange_withscores::<_, Vec<(String, f64)>>(key, 0, stop),
                )
                .await
            }
            RankOrder::Desc => {
                self.bounded(
                    "zrevrange",
                    self.read_timeout,
                    conn.zrevrange_withscores::<_, Vec<(String, f64)>>(key, 0, stop),
                )
                .await
            }
        }
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(
            "zrangebyscore",
            self.read_timeout,
            conn.zrangebyscore_withscores::<_, _, _, Vec<(String, f64)>>(key, min, max),
        )
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded("get", self.read_timeout, conn.get::<_, Option<String>>(key))
            .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(
            "set_ex",
            self.write_timeout,
            conn.set_ex::<_, _, ()>(key, value, ttl_secs),
        )
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .bounded(
                "ping",
                self.read_timeout,
                redis::cmd("PING").query_async(&mut conn),
            )
            .await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Protocol(format!("unexpected PING reply: {pong}")))
        }
    }
}
