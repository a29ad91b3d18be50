//! Walk and show commands - Preview the remote or local tree
//!
//! `walk` lists every entity a pass would visit and counts the files it
//! found. `show` prints the same tree without the count or any problems
//! encountered, one indented line per entity.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use tracing::info;

use lmsync_sync::{TreeLine, WalkReport};

use super::{exit_code, CommandContext, Session};
use crate::output::{get_formatter, plural};

/// List what a pass would visit
#[derive(Debug, Args)]
pub struct WalkCommand {
    /// Walk the sync directory instead of Canvas
    #[arg(long)]
    pub local: bool,
}

impl WalkCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<ExitCode> {
        run_walk(ctx, self.local).await
    }
}

/// Print the tree of the selected courses
#[derive(Debug, Args)]
pub struct ShowCommand {
    /// Show the sync directory instead of Canvas
    #[arg(long)]
    pub local: bool,
}

impl ShowCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<ExitCode> {
        let formatter = get_formatter(ctx.format.is_json());
        let (_, lines) = expand(ctx, self.local).await?;

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::to_value(&lines)?);
        } else {
            for line in &lines {
                formatter.line(&line.to_string());
            }
        }
        Ok(ExitCode::SUCCESS)
    }
}

/// Shared by `walk` and the `--dry-run` of `sync` and `upload`
pub(crate) async fn run_walk(ctx: &CommandContext, local: bool) -> Result<ExitCode> {
    let formatter = get_formatter(ctx.format.is_json());
    let (report, _) = expand(ctx, local).await?;

    if ctx.format.is_json() {
        formatter.print_json(&serde_json::to_value(&report)?);
        return Ok(exit_code(report.issues.is_empty()));
    }

    for line in &report.lines {
        formatter.line(&line.to_string());
    }
    formatter.success(&format!("Found {}", plural(report.file_count, "file")));
    for issue in &report.issues {
        formatter.warn(&format!("{}: {}", issue.path, issue.message));
    }
    Ok(exit_code(report.issues.is_empty()))
}

/// Runs a walk pass and renders the resulting tree
async fn expand(ctx: &CommandContext, local: bool) -> Result<(WalkReport, Vec<TreeLine>)> {
    let config = ctx.load_config()?;
    let session = Session::open(&config).await?;
    info!(local, root = %session.root().display(), "Walking course tree");

    if local {
        let mut walker = session.local();
        let report = walker.walk().await?;
        Ok((report, walker.show()))
    } else {
        let mut walker = session.remote();
        let report = walker.walk().await?;
        Ok((report, walker.show()))
    }
}
