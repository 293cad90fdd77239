mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use pagesync_core::config::{LogSettings, Settings};
use pagesync_core::graph::{GraphClient, ReqwestTransport};
use pagesync_core::ingest::IngestEngine;
use pagesync_core::notify::{self, Notification, NotificationKind, Notifier};
use pagesync_core::store::{RecordStore, SqliteRecordStore};

const DB_MAX_CONNECTIONS: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    let settings = Settings::from_env();
    let log = settings
        .as_ref()
        .map(|s| s.log.clone())
        .unwrap_or_else(|_| LogSettings::default());
    pagesync_core::o11y::init(&log)?;
    let settings = settings?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(settings).await?,
        Commands::Migrate => {
            let store = open_store(&settings).await?;
            store
                .migrate(&SqliteRecordStore::default_tables())
                .await?;
            tracing::info!("store migrations applied");
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings.redacted())?);
        }
    }
    Ok(())
}

#[tracing::instrument(level = "info", skip_all)]
async fn run(settings: Settings) -> anyhow::Result<()> {
    let notifier = notify::from_settings(&settings.notify)?;

    let outcome = tokio::select! {
        outcome = ingest(&settings, notifier.clone()) => outcome,
        signal = shutdown_signal() => {
            let name = signal?;
            tracing::warn!(signal = name, "termination requested");
            notify::notify_best_effort(
                notifier.as_ref(),
                Notification::new(NotificationKind::Terminated, format!("pagesync stopped by {name}")),
            )
            .await;
            return Ok(());
        }
    };

    if let Err(err) = &outcome {
        notify::notify_best_effort(
            notifier.as_ref(),
            Notification::new(NotificationKind::RunFailed, format!("pagesync run failed: {err:#}")),
        )
        .await;
    }
    outcome
}

async fn ingest(settings: &Settings, notifier: Arc<dyn Notifier>) -> anyhow::Result<()> {
    if settings.access_tokens.is_empty() {
        tracing::warn!("no access tokens configured; nothing to ingest");
    }

    let store = open_store(settings).await?;
    store
        .migrate(&SqliteRecordStore::default_tables())
        .await?;

    let transport = ReqwestTransport::new(
        settings.graph.request_timeout,
        settings.graph.connections_limit,
    )?;
    let client = GraphClient::new(Arc::new(transport), &settings.graph)?;
    let engine = IngestEngine::new(client, Arc::new(store), notifier)
        .with_load(settings.load)
        .with_insights_for(settings.insights_for);

    let report = engine.run(&settings.access_tokens).await;
    for failure in &report.failures {
        tracing::warn!(branch = %failure.branch, error = %failure.error, "branch skipped");
    }
    tracing::info!(report = %serde_json::to_string(&report)?, "run report");
    Ok(())
}

async fn open_store(settings: &Settings) -> anyhow::Result<SqliteRecordStore> {
    Ok(SqliteRecordStore::connect(&settings.db_url, DB_MAX_CONNECTIONS).await?)
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
            _ = term.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
    }
}
