//! Config command - View and manage lmsync configuration
//!
//! Provides the `lmsync config` CLI command which:
//! 1. Shows the current configuration (YAML or JSON)
//! 2. Sets individual configuration values via dot-notation keys
//! 3. Validates the configuration file and reports errors
//! 4. Prints where the configuration file lives

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use lmsync_core::config::Config;

use super::CommandContext;
use crate::output::get_formatter;

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "sync.root")
        key: String,
        /// New value
        value: String,
    },
    /// Validate configuration file
    Validate,
    /// Print the configuration file path
    Path,
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<ExitCode> {
        match self {
            ConfigCommand::Show => execute_show(ctx),
            ConfigCommand::Set { key, value } => execute_set(ctx, key, value),
            ConfigCommand::Validate => execute_validate(ctx),
            ConfigCommand::Path => {
                let formatter = get_formatter(ctx.format.is_json());
                let path = ctx.config_path();
                if ctx.format.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "config_path": path.display().to_string(),
                        "exists": path.exists(),
                    }));
                } else {
                    formatter.line(&path.display().to_string());
                }
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn execute_show(ctx: &CommandContext) -> Result<ExitCode> {
    let formatter = get_formatter(ctx.format.is_json());
    let config_path = ctx.config_path();
    let mut config = ctx.load_config()?;

    // Never echo the token
    if config.canvas.token.is_some() {
        config.canvas.token = Some("********".to_string());
    }

    info!(config_path = %config_path.display(), "Showing configuration");

    if ctx.format.is_json() {
        let json =
            serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
    } else {
        formatter.success(&format!("Configuration ({})", config_path.display()));
        formatter.info("");

        let yaml =
            serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
        for line in yaml.lines() {
            formatter.info(line);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn execute_set(ctx: &CommandContext, key: &str, value: &str) -> Result<ExitCode> {
    let formatter = get_formatter(ctx.format.is_json());
    let config_path = ctx.config_path();
    let mut config = Config::load_or_default(&config_path);

    info!(key = %key, "Setting configuration value");

    if let Err(e) = apply_config_value(&mut config, key, value) {
        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": false,
                "key": key,
                "error": e.to_string(),
            }));
        } else {
            formatter.error(&format!("Failed to set '{}': {:#}", key, e));
            formatter.info("");
            formatter.info("Supported keys:");
            for (key, help) in SUPPORTED_KEYS {
                formatter.info(&format!("  {key:<28} - {help}"));
            }
        }
        return Ok(ExitCode::FAILURE);
    }

    let errors: Vec<String> = config
        .validate()
        .iter()
        .filter(|e| e.field == key)
        .map(ToString::to_string)
        .collect();
    if !errors.is_empty() {
        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": false,
                "key": key,
                "errors": errors,
            }));
        } else {
            formatter.error(&format!("Invalid value for '{}': {}", key, errors.join("; ")));
        }
        return Ok(ExitCode::FAILURE);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
    }
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
    std::fs::write(&config_path, yaml).context("Failed to write configuration file")?;

    if ctx.format.is_json() {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "key": key,
            "config_path": config_path.display().to_string(),
        }));
    } else {
        formatter.success(&format!("Set {key}"));
        formatter.info(&format!("Saved to {}", config_path.display()));
    }
    Ok(ExitCode::SUCCESS)
}

fn execute_validate(ctx: &CommandContext) -> Result<ExitCode> {
    let formatter = get_formatter(ctx.format.is_json());
    let config_path = ctx.config_path();

    if !config_path.exists() {
        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({
                "valid": false,
                "config_path": config_path.display().to_string(),
                "errors": ["Configuration file not found"],
            }));
        } else {
            formatter.error(&format!(
                "Configuration file not found at {}",
                config_path.display()
            ));
            formatter.info("Run 'lmsync config set <key> <value>' to create one.");
        }
        return Ok(ExitCode::FAILURE);
    }

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            if ctx.format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "config_path": config_path.display().to_string(),
                    "errors": [format!("Failed to parse configuration: {e}")],
                }));
            } else {
                formatter.error(&format!("Failed to parse configuration: {e}"));
                formatter.info(&format!("File: {}", config_path.display()));
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    info!(config_path = %config_path.display(), "Validating configuration");
    let errors = config.validate();

    if ctx.format.is_json() {
        let error_strings: Vec<String> = errors.iter().map(ToString::to_string).collect();
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": config_path.display().to_string(),
            "errors": error_strings,
        }));
    } else if errors.is_empty() {
        formatter.success("Configuration is valid");
        formatter.info(&format!("File: {}", config_path.display()));
    } else {
        formatter.error(&format!(
            "Configuration has {} error{}:",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" }
        ));
        formatter.info(&format!("File: {}", config_path.display()));
        formatter.info("");
        for error in &errors {
            formatter.info(&format!("  {} - {}", error.field, error.message));
        }
    }

    Ok(if errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

const SUPPORTED_KEYS: &[(&str, &str)] = &[
    ("sync.root", "Sync root directory"),
    ("sync.history_file_name", "Ledger file name under the root"),
    ("sync.courses_to_sync", "Comma-separated course names"),
    ("sync.content.modules", "true|false"),
    ("sync.content.files", "true|false"),
    ("sync.content.assignments", "true|false"),
    ("canvas.domain", "Base URL of the Canvas instance"),
    ("canvas.token", "Access token (none to clear)"),
    ("canvas.max_retries", "Retries for transient failures"),
    ("canvas.retry_base_delay_ms", "First backoff delay"),
    ("logging.level", "trace|debug|info|warn|error"),
    ("logging.format", "text|json"),
];

/// Apply a dot-notation key/value pair to a Config struct
fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        // --- sync ---
        "sync.root" => {
            config.sync.root = PathBuf::from(value);
        }
        "sync.history_file_name" => {
            config.sync.history_file_name = value.to_string();
        }
        "sync.courses_to_sync" => {
            config.sync.courses_to_sync = value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        "sync.content.modules" => {
            config.sync.content.modules = parse_bool(value)?;
        }
        "sync.content.files" => {
            config.sync.content.files = parse_bool(value)?;
        }
        "sync.content.assignments" => {
            config.sync.content.assignments = parse_bool(value)?;
        }

        // --- canvas ---
        "canvas.domain" => {
            config.canvas.domain = value.to_string();
        }
        "canvas.token" => {
            config.canvas.token = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.to_string())
            };
        }
        "canvas.max_retries" => {
            config.canvas.max_retries = value
                .parse::<u32>()
                .context("Expected a positive integer")?;
        }
        "canvas.retry_base_delay_ms" => {
            config.canvas.retry_base_delay_ms = value
                .parse::<u64>()
                .context("Expected a positive integer")?;
        }

        // --- logging ---
        "logging.level" => {
            config.logging.level = value.to_string();
        }
        "logging.format" => {
            config.logging.format = value.to_string();
        }

        _ => {
            anyhow::bail!("Unknown configuration key: '{}'", key);
        }
    }

    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => anyhow::bail!("Expected true or false, got '{}'", value),
    }
}
