//! CLI command definitions and dispatch.

mod analyze;
mod batch;
mod migrate;
mod version;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use dhi_migrate_core::MigrateConfig;

/// dhi-migrate - migrate Dockerfiles to Docker Hardened Images.
#[derive(Parser)]
#[command(name = "dhi-migrate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Rewrite a Dockerfile onto a hardened image
    Migrate(migrate::MigrateArgs),
    /// Show the detected ecosystem, build steps, ports and stages
    Analyze(analyze::AnalyzeArgs),
    /// Migrate several Dockerfiles concurrently
    Batch(batch::BatchArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Return the default configuration file path (~/.dhi-migrate/config.yaml).
pub(crate) fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".dhi-migrate"))
        .unwrap_or_else(|| PathBuf::from(".dhi-migrate"))
        .join("config.yaml")
}

/// Load the configuration from `explicit`, else from the default path when
/// that file exists, else use the defaults.
pub(crate) fn load_config(explicit: Option<&Path>) -> Result<MigrateConfig, Box<dyn std::error::Error>> {
    if let Some(path) = explicit {
        return Ok(MigrateConfig::from_file(path)?);
    }
    let path = default_config_path();
    if path.is_file() {
        tracing::debug!(path = %path.display(), "Using default config file");
        return Ok(MigrateConfig::from_file(&path)?);
    }
    Ok(MigrateConfig::default())
}

/// Read a Dockerfile, naming the path on failure.
pub(crate) fn read_dockerfile(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))
}

/// Write rendered output, creating parent directories as needed.
pub(crate) fn write_output(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }
    std::fs::write(path, content).map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Migrate(args) => migrate::execute(args).await,
        Command::Analyze(args) => analyze::execute(args).await,
        Command::Batch(args) => batch::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
