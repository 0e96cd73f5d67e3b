/// ILIAS Downloader - mirror ILIAS courses into a local directory
use anyhow::Context;
use ilias_client::IliasClient;
use ilias_downloader::{cli, exit, Cli, DownloaderConfig};
use ilias_sync::{ItemOutcome, SyncRunner};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_with_extra_options();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli::log_filter(cli.verbose).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(exit::for_error(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    // Load configuration
    let mut config = DownloaderConfig::load(cli.config.as_deref())?;
    config.apply_cli(&cli);
    config.validate()?;

    tracing::info!("Starting ILIAS Downloader");
    tracing::info!("Installation: {}", config.client.base_url);
    tracing::info!("Output: {}", config.sync.output.display());

    let client = IliasClient::new(config.client.clone(), config.credentials())?;
    client.login().await?;
    tracing::info!("Logged in");

    // Ctrl-C stops new work and discards partial downloads
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing up");
            on_signal.cancel();
        }
    });

    let runner = SyncRunner::new(Arc::new(client), config.sync_options(), cancel);
    let report = runner.run().await?;

    if let Some(path) = &config.sync.report {
        report
            .write_json(path)
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
    }

    for item in report.notable_items() {
        match item.outcome {
            ItemOutcome::Failed | ItemOutcome::Conflict => tracing::warn!("{}", item),
            _ => tracing::info!("{}", item),
        }
    }
    for folder in &report.failed_folders {
        tracing::warn!(
            "Folder not synced: {} ({})",
            folder.path,
            folder.detail.as_deref().unwrap_or_default()
        );
    }
    tracing::info!("{}", report.summary());

    Ok(exit::for_report(&report))
}
