use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use creator_pipeline::api::progress_routes;
use creator_pipeline::config::PipelineConfig;
use creator_pipeline::engine::{ProgressionEngine, spawn_repair_ticker};
use creator_pipeline::store::open_store;

/// Install the tracing subscriber. The returned guard keeps the file writer
/// flushing and must live as long as the process.
fn init_tracing(config: &PipelineConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "creator-pipeline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();
    let _log_guard = init_tracing(&config);

    eprintln!("Creator Pipeline v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   API: http://0.0.0.0:{}/api", config.http_port);
    eprintln!("   Events: ws://0.0.0.0:{}/ws/progress", config.http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let db = open_store(&config)
        .await
        .with_context(|| format!("failed to open store at {}", config.db_path.display()))?;

    // ── Engine ───────────────────────────────────────────────────────────
    let engine = Arc::new(ProgressionEngine::from_config(Arc::clone(&db), &config));

    if config.repair_enabled {
        let _repair_handle = spawn_repair_ticker(Arc::clone(&engine), config.repair_interval);
        eprintln!(
            "   Repair: every {}s, {} concurrent",
            config.repair_interval.as_secs(),
            config.repair_concurrency
        );
    } else {
        eprintln!("   Repair: disabled");
    }

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = progress_routes(Arc::clone(&engine));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "Progress API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("server error")?;

    Ok(())
}
