use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use try_push::config::Config;
use try_push::credential::SshCredential;
use try_push::hg::{HgRepository, bootstrap};
use try_push::phabricator::ConduitClient;
use try_push::worker::{DiffSender, PatchPipeline, QueueEntry, Worker, diff_queue};

/// Revision the local clone is brought up to before the worker starts.
const BOOTSTRAP_REVISION: &str = "tip";

/// How long leftover blocking work, such as a pending stdin read, may hold
/// up exit once the worker has stopped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    let result = runtime.block_on(serve());
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn serve() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "try_push=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(?config, "Loaded configuration");

    let mut credential = SshCredential::new(&config.ssh_user, &config.ssh_key)
        .context("failed to write ssh key")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let result = run(&config, &credential, shutdown).await;

    credential.cleanup();
    if let Err(e) = &result {
        error!(error = %e, "try-push stopped with an error");
    }
    result
}

async fn run(config: &Config, credential: &SshCredential, shutdown: CancellationToken) -> Result<()> {
    info!(repo = %config.repo_url, "Checking out tip");
    let checkout = bootstrap(
        config.repo_url.clone(),
        config.repo_dir.clone(),
        BOOTSTRAP_REVISION.to_string(),
        config.batch_size,
    );
    tokio::select! {
        node = checkout => {
            let node = node.context("batch checkout failed")?;
            info!(node = %node.short(), "Local clone ready");
        }
        _ = shutdown.cancelled() => {
            info!("Shutdown requested during checkout");
            return Ok(());
        }
    }

    let repo = HgRepository::open(&config.repo_dir)
        .with_context(|| format!("failed to open {}", config.repo_dir.display()))?;
    let client = ConduitClient::new(&config.phabricator_url, config.phabricator_token.clone())
        .context("failed to create Phabricator client")?;
    let pipeline = PatchPipeline::new(repo, client, config.pipeline(), credential.ssh_command());

    let (tx, mut rx) = diff_queue();
    tokio::spawn(read_entries(tx, shutdown.clone()));

    let mut worker = Worker::new(pipeline);
    let stats = worker.run(&mut rx, shutdown).await;
    info!(
        processed = stats.processed,
        pushed = stats.pushed,
        failed = stats.failed,
        "Worker finished"
    );
    Ok(())
}

/// Feed newline-delimited JSON queue entries from stdin into the queue.
///
/// Dropping the sender at end of input lets the worker drain and exit.
async fn read_entries(tx: DiffSender, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match QueueEntry::from_json_line(&line) {
                Ok(entry) => {
                    info!(phid = %entry.diff.phid, build_target = %entry.target(), "Queued diff");
                    if tx.send(entry).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Skipping invalid queue entry"),
            },
            Ok(None) => {
                info!("End of queue input");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read queue input");
                break;
            }
        }
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    wait_for_signal().await;
    info!("Signal received, finishing current diff");
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
