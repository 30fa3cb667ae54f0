//! Health leaderboard: models ranked by success rate within a bucket.
//!
//! Equal scores are ordered by ascending model id, whatever the direction,
//! so the ranking is deterministic regardless of insertion order.

use std::cmp::Ordering;
use std::sync::Arc;

use futures::future::join_all;

use super::bucket::current_bucket;
use super::keys;
use super::retriever::Retriever;
use crate::models::analytics::{LeaderboardEntry, SortOrder};
use crate::store::{MetricsStore, RankOrder, StoreError};

/// Upper bound accepted for `limit`.
pub const MAX_LIMIT: usize = 100;

#[derive(Clone)]
pub struct Leaderboard {
    store: Arc<dyn MetricsStore>,
    retriever: Retriever,
}

impl Leaderboard {
    pub fn new(store: Arc<dyn MetricsStore>, retriever: Retriever) -> Self {
        Self { store, retriever }
    }

    /// Top (`Desc`) or bottom (`Asc`) `limit` models of the bucket.
    pub async fn get_health_leaderboard(
        &self,
        limit: usize,
        order: SortOrder,
        bucket: Option<&str>,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let bucket = bucket.map_or_else(current_bucket, str::to_string);
        let ranked = self.ranked(&bucket, limit.min(MAX_LIMIT), order).await?;

        // enrich with request counts and TTFT; a model whose counters already
        // expired still keeps its place with zero requests
        let snapshots = join_all(
            ranked
                .iter()
                .map(|(model, _)| self.retriever.get_model_metrics(model, Some(&bucket))),
        )
        .await;

        Ok(ranked
            .into_iter()
            .zip(snapshots)
            .map(|((model_id, score), snap)| {
                let snap = snap.unwrap_or_else(|e| {
                    tracing::warn!(op = "leaderboard_enrich", model = %model_id, error = %e, "snapshot read failed");
                    None
                });
                LeaderboardEntry {
                    requests: snap.as_ref().map_or(0, |s| s.requests),
                    avg_ttft_ms: snap.and_then(|s| s.avg_ttft_ms),
                    model_id,
                    health_score: score.clamp(0.0, 100.0),
                }
            })
            .collect())
    }

    /// Read the first `limit` entries, then every entry tied with the last
    /// one, and re-sort so ties fall in model-id order before truncating.
    async fn ranked(
        &self,
        bucket: &str,
        limit: usize,
        order: SortOrder,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = keys::health(bucket);
        let mut entries = self
            .store
            .zrange_by_rank(&key, limit, RankOrder::from(order))
            .await?;

        if entries.len() == limit {
            if let Some(&(_, boundary)) = entries.last() {
                let ties = self.store.zrange_by_score(&key, boundary, boundary).await?;
                for tie in ties {
                    if !entries.iter().any(|(m, _)| *m == tie.0) {
                        entries.push(tie);
                    }
                }
            }
        }

        sort_ranked(&mut entries, order);
        entries.truncate(limit);
        Ok(entries)
    }
}

pub(crate) fn sort_ranked(entries: &mut [(String, f64)], order: SortOrder) {
    entries.sort_by(|a, b| {
        let by_score = a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal);
        let by_score = match order {
            SortOrder::Asc => by_score,
            SortOrder::Desc => by_score.reverse(),
        };
        by_score.then_with(|| a.0.cmp(&b.0))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreOp};

    const BUCKET: &str = "2025-01-01-10";

    async fn board_with(scores: &[(&str, f64)]) -> Leaderboard {
        let store = MemoryStore::new();
        let ops = scores
            .iter()
            .map(|(m, s)| StoreOp::ZAdd {
                key: keys::health(BUCKET),
                member: m.to_string(),
                score: *s,
            })
            .collect();
        store.execute(ops).await.unwrap();
        let store: Arc<dyn MetricsStore> = Arc::new(store);
        Leaderboard::new(store.clone(), Retriever::new(store, 10))
    }

    fn ids(entries: &[LeaderboardEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.model_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_desc_with_tie_break() {
        let board = board_with(&[("b", 90.0), ("c", 80.0), ("a", 90.0)]).await;
        let top = board
            .get_health_leaderboard(3, SortOrder::Desc, Some(BUCKET))
            .await
            .unwrap();
        assert_eq!(ids(&top), vec!["a", "b", "c"]);
        assert_eq!(top[0].requests, 0);
        assert_eq!(top[0].avg_ttft_ms, None);
    }

    #[tokio::test]
    async fn test_asc_with_tie_break() {
        let board = board_with(&[("z", 50.0), ("y", 50.0), ("x", 99.0)]).await;
        let bottom = board
            .get_health_leaderboard(3, SortOrder::Asc, Some(BUCKET))
            .await
            .unwrap();
        assert_eq!(ids(&bottom), vec!["y", "z", "x"]);
    }

    #[tokio::test]
    async fn test_tie_at_limit_boundary_picks_lowest_id() {
        // Raw ZREVRANGE would return "b" before "a" for the tied 90s.
        let board = board_with(&[("b", 90.0), ("a", 90.0), ("top", 100.0)]).await;
        let top = board
            .get_health_leaderboard(2, SortOrder::Desc, Some(BUCKET))
            .await
            .unwrap();
        assert_eq!(ids(&top), vec!["top", "a"]);
    }

    #[tokio::test]
    async fn test_scores_are_monotonic() {
        let board = board_with(&[
            ("m1", 10.0),
            ("m2", 75.5),
            ("m3", 100.0),
            ("m4", 75.5),
            ("m5", 0.0),
        ])
        .await;
        let desc = board
            .get_health_leaderboard(10, SortOrder::Desc, Some(BUCKET))
            .await
            .unwrap();
        assert!(desc.windows(2).all(|w| w[0].health_score >= w[1].health_score));
        let asc = board
            .get_health_leaderboard(10, SortOrder::Asc, Some(BUCKET))
            .await
            .unwrap();
        assert!(asc.windows(2).all(|w| w[0].health_score <= w[1].health_score));
        assert_eq!(asc.len(), 5);
    }

    #[tokio::test]
    async fn test_empty_bucket_is_empty_list() {
        let board = board_with(&[]).await;
        let out = board
            .get_health_leaderboard(10, SortOrder::Desc, Some(BUCKET))
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
