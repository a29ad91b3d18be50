//! Upload command - Push new and modified local files to Canvas

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use tracing::info;

use lmsync_sync::FileStatus;

use super::sync::{print_report, SummaryRows};
use super::{exit_code, finish_progress, progress_printer, CommandContext, Session};
use crate::output::get_formatter;

const UPLOAD_SUMMARY: SummaryRows = SummaryRows {
    done: "Upload pass",
    rows: &[
        (FileStatus::Uploaded, "Uploaded"),
        (FileStatus::Updated, "Updated"),
        (FileStatus::Unchanged, "Unchanged"),
        (FileStatus::FailedUpload, "Failed"),
        (FileStatus::FailedUpdate, "Failed"),
    ],
};

/// Upload local files under the selected courses' modules
#[derive(Debug, Args)]
pub struct UploadCommand {
    /// List the local tree without uploading anything
    #[arg(long)]
    pub dry_run: bool,
}

impl UploadCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<ExitCode> {
        if self.dry_run {
            return super::walk::run_walk(ctx, true).await;
        }

        let formatter = get_formatter(ctx.format.is_json());
        let config = ctx.load_config()?;
        let session = Session::open(&config).await?;

        info!(root = %session.root().display(), "Starting upload pass");
        formatter.info(&format!("Uploading from {}", session.root().display()));

        let (events, printer) = progress_printer(ctx);
        let mut local = session.local();
        if let Some(tx) = events {
            local = local.with_events(tx);
        }
        let result = local.sync().await;
        drop(local);
        finish_progress(printer).await;

        let report = result?;
        print_report(&*formatter, ctx, &report, &UPLOAD_SUMMARY)?;
        Ok(exit_code(report.is_clean()))
    }
}
