use clap::{Parser, Subcommand};

use gateway_metrics::models::analytics::{SortOrder, TrendMetric};

/// metricsd: real-time metrics aggregation for the LLM gateway
#[derive(Parser)]
#[command(name = "metricsd", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to METRICS_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the snapshot of one model
    Model {
        id: String,
        /// Hourly bucket, YYYY-MM-DD-HH (UTC); defaults to the current hour
        #[arg(long)]
        bucket: Option<String>,
    },

    /// Print the health leaderboard
    Leaderboard {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = "desc", value_parser = parse_order)]
        order: SortOrder,
        #[arg(long)]
        bucket: Option<String>,
    },

    /// Print an hourly trend series for a model
    Trend {
        model: String,
        #[arg(long, default_value = "ttft", value_parser = parse_metric)]
        metric: TrendMetric,
        #[arg(long, default_value_t = 6)]
        hours: u32,
    },

    /// Print the current bucket key, or the last N oldest first
    Bucket {
        #[arg(long)]
        hours: Option<usize>,
    },
}

fn parse_order(s: &str) -> Result<SortOrder, String> {
    s.parse()
}

fn parse_metric(s: &str) -> Result<TrendMetric, String> {
    s.parse()
}
