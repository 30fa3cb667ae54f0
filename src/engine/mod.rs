//! Aggregation engine: key layout, write paths and the read-side views.

pub mod bucket;
pub mod dispatch;
pub mod keys;
pub mod leaderboard;
pub mod recorder;
pub mod retriever;
pub mod trends;
