use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use feedmill::config::Config;
use feedmill::pipeline::{BatchScope, CancelHandle, Orchestrator, RunSignal};
use feedmill::scheduler::spawn_scheduler;
use feedmill::server::{build_app, AppState, CronAuth};
use feedmill::storage::{Database, NewFeed, StoreError};

#[derive(Parser, Debug)]
#[command(name = "feedmill", version, about = "RSS/Atom ingestion service")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, env = "FEEDMILL_CONFIG", default_value = "feedmill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP triggers and run the interval scheduler
    Serve,
    /// Run the pipeline once and print the JSON result
    Run {
        /// Process only this feed
        #[arg(long, value_name = "ID", conflicts_with = "all")]
        feed: Option<i64>,
        /// Ignore fetch intervals and process every active feed
        #[arg(long)]
        all: bool,
    },
    /// List registered feeds
    Feeds,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?
        .with_env_overrides();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let db = match Database::open(&config.database_path).await {
        Ok(db) => Arc::new(db),
        Err(StoreError::InstanceLocked) => {
            anyhow::bail!(
                "Database {} is locked by another process. Close it and try again.",
                config.database_path
            );
        }
        Err(e) => return Err(e).context("Failed to open database"),
    };

    let configured: Vec<NewFeed> = config.feeds.iter().map(NewFeed::from).collect();
    db.sync_feeds(&configured)
        .await
        .context("Failed to sync configured feeds")?;

    match args.command {
        Command::Serve => serve(&config, db).await,
        Command::Run { feed, all } => run_once(&config, db, feed, all).await,
        Command::Feeds => list_feeds(&db).await,
    }
}

fn build_orchestrator(config: &Config, db: &Arc<Database>) -> Result<Arc<Orchestrator>> {
    let orchestrator = Orchestrator::new(db.clone(), db.clone(), &config.pipeline_settings())
        .context("Failed to build HTTP client")?;
    Ok(Arc::new(orchestrator))
}

async fn serve(config: &Config, db: Arc<Database>) -> Result<()> {
    let orchestrator = build_orchestrator(config, &db)?;
    let state = AppState::new(Arc::clone(&orchestrator), config.run_budget());
    let shutdown = Arc::clone(&state.shutdown);

    let scheduler = config.poll_interval().map(|period| {
        spawn_scheduler(
            Arc::clone(&orchestrator),
            period,
            config.run_budget(),
            Arc::clone(&shutdown),
        )
    });
    if scheduler.is_none() {
        tracing::info!("poll_interval_minutes is 0; built-in scheduler disabled");
    }

    let auth = CronAuth::new(config.cron_secret());
    if !auth.enabled() {
        tracing::warn!("No cron secret configured; /api/cron/fetch-feeds is unauthenticated");
    }
    let app = build_app(state, auth);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&shutdown)))
        .await
        .context("HTTP server failed")?;

    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
    Ok(())
}

async fn run_once(
    config: &Config,
    db: Arc<Database>,
    feed_id: Option<i64>,
    all: bool,
) -> Result<()> {
    let orchestrator = build_orchestrator(config, &db)?;
    let shutdown = Arc::new(CancelHandle::new());
    let signal = RunSignal::with_budget(config.run_budget()).cancellable_by(&shutdown);

    let ctrl_c = {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, stopping after the current step");
                shutdown.cancel();
            }
        })
    };

    let output = match feed_id {
        Some(id) => {
            let result = orchestrator
                .run_feed_by_id(id, &signal)
                .await
                .context("Feed run failed")?
                .with_context(|| format!("No feed with id {id}"))?;
            serde_json::to_string_pretty(&result)?
        }
        None => {
            let scope = if all { BatchScope::All } else { BatchScope::Due };
            let batch = orchestrator
                .run_batch(scope, &signal)
                .await
                .context("Batch run failed")?;
            serde_json::to_string_pretty(&batch)?
        }
    };
    ctrl_c.abort();

    println!("{output}");
    Ok(())
}

async fn list_feeds(db: &Database) -> Result<()> {
    let feeds = db.list_feeds().await.context("Failed to list feeds")?;
    if feeds.is_empty() {
        println!("No feeds registered.");
        return Ok(());
    }

    for feed in &feeds {
        let last = feed
            .last_fetched
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
        let state = match (feed.active, feed.auto_fetch) {
            (false, _) => "inactive",
            (true, false) => "manual",
            (true, true) => "auto",
        };
        println!(
            "{:>4}  {:<8}  {:<30}  {}  (last fetched: {})",
            feed.id,
            state,
            feed.name,
            feed.url.as_deref().unwrap_or("-"),
            last
        );
    }
    Ok(())
}

async fn shutdown_signal(shutdown: Arc<CancelHandle>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Received shutdown signal, stopping in-flight runs");
    shutdown.cancel();
}
