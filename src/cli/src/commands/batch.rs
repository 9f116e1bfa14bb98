//! `dhi-migrate batch` command.
//!
//! Each Dockerfile is migrated on the blocking pool. Migrations share no
//! state; a failure is reported in the table and does not stop the rest.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use dhi_migrate_core::MigrateOptions;

use crate::output;

/// Suffix appended to each input file name.
const OUTPUT_SUFFIX: &str = ".dhi";

#[derive(Args)]
pub struct BatchArgs {
    /// Dockerfiles to migrate
    #[arg(required = true)]
    pub dockerfiles: Vec<PathBuf>,

    /// Target hardened image (e.g., myorg/dhi-node:18-dev)
    #[arg(short, long)]
    pub image: String,

    /// Directory for migrated files (default: next to each input)
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Replace the registry namespace of the target image
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Migrate without writing any file
    #[arg(long)]
    pub dry_run: bool,

    /// Configuration file (default: ~/.dhi-migrate/config.yaml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Result of one file in the batch.
#[derive(Debug)]
struct Outcome {
    input: PathBuf,
    output: PathBuf,
    result: Result<usize, String>,
}

pub async fn execute(args: BatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(args.config.as_deref())?;
    let options = MigrateOptions {
        namespace: args.namespace.clone(),
        dry_run: args.dry_run,
        generated_at: None,
        config,
    };

    let jobs = plan(&args.dockerfiles, args.out_dir.as_deref())?;
    let outcomes = run_all(jobs, &args.image, options).await;

    let mut table = output::new_table(&["DOCKERFILE", "STATUS", "CHANGES", "OUTPUT"]);
    let mut failed = 0;
    for outcome in &outcomes {
        let (status, changes) = match &outcome.result {
            Ok(changes) => ("ok".to_string(), changes.to_string()),
            Err(e) => {
                failed += 1;
                (format!("failed: {}", e), "-".to_string())
            }
        };
        let written = if args.dry_run || outcome.result.is_err() {
            "-".to_string()
        } else {
            outcome.output.display().to_string()
        };
        table.add_row(vec![
            outcome.input.display().to_string(),
            status,
            changes,
            written,
        ]);
    }
    println!("{table}");

    if failed > 0 {
        return Err(format!("{} of {} migrations failed", failed, outcomes.len()).into());
    }
    Ok(())
}

/// Output path for every input, rejecting two inputs that map to one file.
fn plan(inputs: &[PathBuf], out_dir: Option<&Path>) -> Result<Vec<(PathBuf, PathBuf)>, String> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let output = output_path(input, out_dir)?;
        if !seen.insert(output.clone()) {
            return Err(format!(
                "More than one input would be written to {}",
                output.display()
            ));
        }
        jobs.push((input.clone(), output));
    }
    Ok(jobs)
}

fn output_path(input: &Path, out_dir: Option<&Path>) -> Result<PathBuf, String> {
    let name = input
        .file_name()
        .ok_or_else(|| format!("Not a file: {}", input.display()))?;
    let mut file_name = name.to_os_string();
    file_name.push(OUTPUT_SUFFIX);
    let dir = match out_dir {
        Some(dir) => dir,
        None => input.parent().unwrap_or_else(|| Path::new("")),
    };
    Ok(dir.join(file_name))
}

/// Migrate every job concurrently, returning outcomes in input order.
async fn run_all(jobs: Vec<(PathBuf, PathBuf)>, image: &str, options: MigrateOptions) -> Vec<Outcome> {
    let options = Arc::new(options);
    let image: Arc<str> = Arc::from(image);

    let handles: Vec<_> = jobs
        .into_iter()
        .map(|(input, output)| {
            let options = Arc::clone(&options);
            let image = Arc::clone(&image);
            let task_input = input.clone();
            let task_output = output.clone();
            let handle = tokio::task::spawn_blocking(move || {
                migrate_one(&task_input, &task_output, &image, &options)
            });
            (input, output, handle)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (input, output, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(format!("migration task failed: {}", e)),
        };
        if let Err(ref e) = result {
            tracing::warn!(input = %input.display(), error = %e, "Migration failed");
        }
        outcomes.push(Outcome {
            input,
            output,
            result,
        });
    }
    outcomes
}

fn migrate_one(
    input: &Path,
    output: &Path,
    image: &str,
    options: &MigrateOptions,
) -> Result<usize, String> {
    let source = super::read_dockerfile(input)?;
    let migration =
        dhi_migrate_engine::migrate(&source, image, options).map_err(|e| e.to_string())?;
    if !options.dry_run {
        super::write_output(output, &migration.rendered)?;
    }
    Ok(migration.log.change_count())
}
