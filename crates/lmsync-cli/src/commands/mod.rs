//! CLI subcommands and the wiring they share

pub mod completions;
pub mod config;
pub mod sync;
pub mod upload;
pub mod walk;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lmsync_canvas::{CanvasClient, CanvasLmsProvider};
use lmsync_core::config::{Config, TOKEN_ENV_VAR};
use lmsync_history::CsvHistoryLedger;
use lmsync_sync::{
    FileStatus, LocalFileSystemAdapter, LocalSynchronizer, RemoteSynchronizer, RetryPolicy,
    SyncError, SyncEvent, SyncSettings,
};

use crate::output::{HumanFormatter, OutputFormat, OutputFormatter};

/// Exit status for a pass stopped by SIGINT/SIGTERM
const INTERRUPTED_EXIT_CODE: u8 = 130;

/// Options every subcommand receives
pub struct CommandContext {
    pub format: OutputFormat,
    /// Configuration file named with `--config`, if any
    pub config_path: Option<PathBuf>,
    pub quiet: bool,
}

impl CommandContext {
    /// The configuration file in effect
    pub fn config_path(&self) -> PathBuf {
        self.config_path.clone().unwrap_or_else(Config::default_path)
    }

    /// Loads the configuration; an explicit `--config` file must exist
    pub fn load_config(&self) -> Result<Config> {
        match &self.config_path {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display())),
            None => Ok(Config::load_or_default(&Config::default_path())),
        }
    }
}

// ============================================================================
// Adapter wiring
// ============================================================================

/// Everything a pass needs, built from the configuration
pub struct Session {
    settings: SyncSettings,
    provider: Arc<CanvasLmsProvider>,
    filesystem: Arc<LocalFileSystemAdapter>,
    history: Arc<CsvHistoryLedger>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Session {
    /// Validates the configuration and opens the Canvas client and the ledger
    pub async fn open(config: &Config) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            anyhow::bail!("Invalid configuration: {}", messages.join("; "));
        }

        let settings = SyncSettings::from_config(config)?;
        let token = config.resolve_token().with_context(|| {
            format!("No Canvas access token. Set canvas.token or {TOKEN_ENV_VAR}")
        })?;
        let client = CanvasClient::new(&config.canvas.domain, token)
            .context("Failed to create Canvas client")?;

        let history_path = config.history_path();
        let history = CsvHistoryLedger::load(&history_path).await;
        info!(
            domain = %config.canvas.domain,
            history = %history_path.display(),
            records = history.len().await,
            "Session opened"
        );

        let cancel = CancellationToken::new();
        shutdown_signal(cancel.clone());

        Ok(Self {
            settings,
            provider: Arc::new(CanvasLmsProvider::new(client)),
            filesystem: Arc::new(LocalFileSystemAdapter::new()),
            history: Arc::new(history),
            retry: RetryPolicy::from_config(&config.canvas),
            cancel,
        })
    }

    pub fn root(&self) -> &Path {
        self.settings.root.as_path()
    }

    pub fn remote(&self) -> RemoteSynchronizer {
        RemoteSynchronizer::new(
            self.settings.clone(),
            self.provider.clone(),
            self.filesystem.clone(),
            self.history.clone(),
        )
        .with_retry(self.retry)
        .with_cancellation(self.cancel.child_token())
    }

    pub fn local(&self) -> LocalSynchronizer {
        LocalSynchronizer::new(
            self.settings.clone(),
            self.provider.clone(),
            self.filesystem.clone(),
            self.history.clone(),
        )
        .with_retry(self.retry)
        .with_cancellation(self.cancel.child_token())
    }
}

/// Cancels `token` on SIGINT or SIGTERM
fn shutdown_signal(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, stopping after the current transfer"),
            _ = terminate => info!("Received SIGTERM, stopping after the current transfer"),
        }

        token.cancel();
    });
}

// ============================================================================
// Progress and exit status
// ============================================================================

/// Prints pass events as they arrive, in human mode only
///
/// Returns the sender to hand to a synchronizer and the printing task;
/// the task ends once every sender is dropped.
pub fn progress_printer(
    ctx: &CommandContext,
) -> (Option<mpsc::UnboundedSender<SyncEvent>>, Option<JoinHandle<()>>) {
    if ctx.format.is_json() || ctx.quiet {
        return (None, None);
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<SyncEvent>();
    let handle = tokio::spawn(async move {
        let formatter = HumanFormatter;
        while let Some(event) = rx.recv().await {
            match event {
                SyncEvent::Entered(line) => formatter.line(&line.to_string()),
                SyncEvent::Finished(outcome) => {
                    let text = format!("{} {}", outcome.status, outcome.path);
                    match (outcome.status, outcome.message) {
                        (status, Some(message)) if status.is_failure() => {
                            formatter.error(&format!("{text}: {message}"))
                        }
                        (FileStatus::Locked, _) => formatter.warn(&text),
                        _ => formatter.info(&text),
                    }
                }
            }
        }
    });
    (Some(tx), Some(handle))
}

/// Waits for the progress task to drain
pub async fn finish_progress(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Progress printer stopped abnormally");
        }
    }
}

/// Exit status for a pass that completed, clean or not
pub fn exit_code(clean: bool) -> ExitCode {
    if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Exit status for a command error; interruption gets its own code
pub fn exit_code_for_error(err: &anyhow::Error) -> ExitCode {
    ExitCode::from(error_status(err))
}

fn error_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::Interrupted) => INTERRUPTED_EXIT_CODE,
        _ => 1,
    }
}
