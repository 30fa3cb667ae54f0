use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use gateway_metrics::config::{self, Config};
use gateway_metrics::engine::bucket::{last_n_buckets, parse_bucket};
use gateway_metrics::engine::leaderboard::MAX_LIMIT;
use gateway_metrics::{build_router, jobs, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Model { id, bucket }) => {
            let bucket = checked_bucket(bucket)?;
            let state = AppState::connect(cfg).await?;
            let snapshot = state
                .retriever
                .get_model_metrics(&id, bucket.as_deref())
                .await
                .context("reading model metrics")?;
            match snapshot {
                Some(s) => print_json(&s),
                None => anyhow::bail!("no data recorded for model '{}'", id),
            }
        }
        Some(cli::Commands::Leaderboard { limit, order, bucket }) => {
            if limit == 0 || limit > MAX_LIMIT {
                anyhow::bail!("--limit must be in 1..={}", MAX_LIMIT);
            }
            let bucket = checked_bucket(bucket)?;
            let state = AppState::connect(cfg).await?;
            let models = state
                .leaderboard
                .get_health_leaderboard(limit, order, bucket.as_deref())
                .await
                .context("reading leaderboard")?;
            print_json(&models)
        }
        Some(cli::Commands::Trend { model, metric, hours }) => {
            let state = AppState::connect(cfg).await?;
            let points = state.trends.get_trend(&model, metric, hours).await;
            print_json(&points)
        }
        Some(cli::Commands::Bucket { hours }) => {
            let buckets = last_n_buckets(hours.unwrap_or(1).max(1), Utc::now());
            print_json(&buckets)
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Console logs (JSON when `METRICS_LOG_JSON=1`) plus OTLP span export when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "gateway-metrics"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json_logs = matches!(
        std::env::var("METRICS_LOG_JSON").as_deref(),
        Ok("1") | Ok("true")
    );
    let fmt_layer = if json_logs {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "gateway_metrics=debug,metricsd=debug,tower_http=info".into()),
        ))
        .with(fmt_layer)
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!(store = ?cfg.store, "Initializing metrics engine...");
    let state = Arc::new(AppState::connect(cfg).await?);

    let app = build_router(state.clone());

    jobs::cache_sweep::spawn(state.clone());
    tracing::info!("Background cache sweep started (every 60s)");

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("metricsd listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(
        pending = state.config.queue_capacity.saturating_sub(state.dispatcher.capacity()),
        "shutting down; queued metric events are dropped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

fn checked_bucket(bucket: Option<String>) -> anyhow::Result<Option<String>> {
    match bucket {
        Some(b) if parse_bucket(&b).is_none() => {
            anyhow::bail!("invalid bucket '{}': expected YYYY-MM-DD-HH (UTC)", b)
        }
        other => Ok(other),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
