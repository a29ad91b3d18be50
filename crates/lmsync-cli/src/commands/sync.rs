//! Sync command - Mirror Canvas into the sync directory
//!
//! Provides the `lmsync sync` CLI command which:
//! 1. Loads configuration and opens the Canvas client and the history ledger
//! 2. Runs a remote pass, printing each directory and file as it is processed
//! 3. Summarizes the per-file outcomes

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use tracing::info;

use lmsync_sync::{FileStatus, SyncReport};

use super::{exit_code, finish_progress, progress_printer, CommandContext, Session};
use crate::output::{format_duration, get_formatter, plural, OutputFormatter};

/// Download new and changed course content
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// List what would be synchronized without transferring anything
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<ExitCode> {
        if self.dry_run {
            return super::walk::run_walk(ctx, false).await;
        }

        let formatter = get_formatter(ctx.format.is_json());
        let config = ctx.load_config()?;
        let session = Session::open(&config).await?;

        info!(root = %session.root().display(), "Starting download pass");
        formatter.info(&format!("Synchronizing into {}", session.root().display()));

        let (events, printer) = progress_printer(ctx);
        let mut remote = session.remote();
        if let Some(tx) = events {
            remote = remote.with_events(tx);
        }
        let result = remote.sync().await;
        drop(remote);
        finish_progress(printer).await;

        let report = result?;
        print_report(&*formatter, ctx, &report, &DOWNLOAD_SUMMARY)?;
        Ok(exit_code(report.is_clean()))
    }
}

/// Which statuses a summary lists, with their labels
pub(crate) struct SummaryRows {
    pub done: &'static str,
    pub rows: &'static [(FileStatus, &'static str)],
}

pub(crate) const DOWNLOAD_SUMMARY: SummaryRows = SummaryRows {
    done: "Download pass",
    rows: &[
        (FileStatus::Synced, "Downloaded"),
        (FileStatus::UpToDate, "Up to date"),
        (FileStatus::Locked, "Locked"),
        (FileStatus::FailedDownload, "Failed"),
    ],
};

/// Prints the summary of a finished pass
pub(crate) fn print_report(
    formatter: &dyn OutputFormatter,
    ctx: &CommandContext,
    report: &SyncReport,
    summary: &SummaryRows,
) -> Result<()> {
    if ctx.format.is_json() {
        formatter.print_json(&serde_json::to_value(report)?);
        return Ok(());
    }

    let duration = format_duration(report.duration_ms);
    if report.transferred() == 0 && report.is_clean() {
        formatter.success(&format!("Already up to date ({duration})"));
    } else {
        formatter.success(&format!("{} completed in {duration}", summary.done));
    }

    for (status, label) in summary.rows {
        let count = report.count(*status);
        if count > 0 {
            formatter.info(&format!("{:<11} {}", format!("{label}:"), plural(count, "file")));
        }
    }

    if !report.issues.is_empty() {
        let count = report.issues.len();
        formatter.warn(&format!(
            "{count} {} could not be listed:",
            if count == 1 { "directory" } else { "directories" }
        ));
        for issue in &report.issues {
            formatter.info(&format!("  {}: {}", issue.path, issue.message));
        }
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        formatter.error(&format!("{} failed:", plural(failures.len(), "file")));
        for failure in failures {
            formatter.info(&format!(
                "  {}: {}",
                failure.path,
                failure.message.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    Ok(())
}
