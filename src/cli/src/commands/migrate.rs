//! `dhi-migrate migrate` command.

use std::path::PathBuf;

use clap::Args;
use dhi_migrate_core::{MigrateConfig, MigrateOptions};
use dhi_migrate_engine::Migration;

#[derive(Args)]
pub struct MigrateArgs {
    /// Dockerfile to migrate
    pub dockerfile: PathBuf,

    /// Target hardened image (e.g., myorg/dhi-node:18-dev)
    pub dhi_image: String,

    /// Output file
    #[arg(short, long, default_value = "dhi.dockerfile")]
    pub output: PathBuf,

    /// Replace the registry namespace of the target image
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Print every migration note
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the migrated Dockerfile instead of writing it
    #[arg(long)]
    pub dry_run: bool,

    /// Configuration file (default: ~/.dhi-migrate/config.yaml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Do not inject a non-root USER
    #[arg(long)]
    pub no_nonroot: bool,

    /// Print the migration log as JSON
    #[arg(long)]
    pub json: bool,
}

impl MigrateArgs {
    fn options(&self, mut config: MigrateConfig) -> MigrateOptions {
        if self.no_nonroot {
            config.inject_nonroot = false;
        }
        MigrateOptions {
            namespace: self.namespace.clone(),
            dry_run: self.dry_run,
            generated_at: None,
            config,
        }
    }
}

pub async fn execute(args: MigrateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(args.config.as_deref())?;
    let options = args.options(config);
    let migration = run(&args, &options)?;

    // a dry run owns stdout, so the log goes to stderr
    if let Some(log) = log_report(&args, &migration)? {
        if options.dry_run {
            eprintln!("{log}");
        } else {
            println!("{log}");
        }
    }

    if options.dry_run {
        print!("{}", migration.rendered);
        return Ok(());
    }

    if !args.json {
        println!("{}", summary(&args, &migration));
    }
    Ok(())
}

/// Read, migrate and (unless dry-run) write the output file.
fn run(args: &MigrateArgs, options: &MigrateOptions) -> Result<Migration, Box<dyn std::error::Error>> {
    let source = super::read_dockerfile(&args.dockerfile)?;
    let migration = dhi_migrate_engine::migrate(&source, &args.dhi_image, options)?;

    if !options.dry_run {
        super::write_output(&args.output, &migration.rendered)?;
        tracing::info!(
            input = %args.dockerfile.display(),
            output = %args.output.display(),
            "Wrote migrated Dockerfile"
        );
    }
    Ok(migration)
}

/// Migration log as requested by `--json` or `--verbose`.
fn log_report(args: &MigrateArgs, migration: &Migration) -> serde_json::Result<Option<String>> {
    if args.json {
        return serde_json::to_string_pretty(&migration.log).map(Some);
    }
    if !args.verbose {
        return Ok(None);
    }
    let mut report = String::from("Migration notes:");
    for entry in &migration.log {
        report.push_str(&format!("\n  {entry}"));
    }
    Ok(Some(report))
}

fn summary(args: &MigrateArgs, migration: &Migration) -> String {
    let stages = migration
        .rendered
        .lines()
        .filter(|l| l.starts_with("FROM "))
        .count();
    format!(
        "Migrated {} -> {}\n  ecosystem: {}\n  stages:    {}\n  changes:   {}",
        args.dockerfile.display(),
        args.output.display(),
        migration.profile.ecosystem,
        stages,
        migration.log.change_count()
    )
}
