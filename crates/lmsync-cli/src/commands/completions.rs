//! Shell completions generation command
//!
//! Usage: `lmsync completions bash > ~/.local/share/bash-completion/completions/lmsync`

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::Shell;

use super::CommandContext;

/// Arguments for the completions subcommand
#[derive(Debug, clap::Args)]
pub struct CompletionsCommand {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsCommand {
    /// Prints completions to stdout
    pub async fn execute(&self, _ctx: &CommandContext) -> Result<ExitCode> {
        let mut cmd = crate::Cli::command();
        clap_complete::generate(self.shell, &mut cmd, "lmsync", &mut io::stdout());
        Ok(ExitCode::SUCCESS)
    }
}
