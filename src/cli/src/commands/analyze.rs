//! `dhi-migrate analyze` command.

use std::path::PathBuf;

use clap::Args;
use dhi_migrate_engine::{Dockerfile, InstructionKind, RuntimeProfile, Stage};
use serde::Serialize;

use crate::output;

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Dockerfile to analyze
    pub dockerfile: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Analysis printed by the command.
#[derive(Debug, Serialize)]
struct Report {
    #[serde(flatten)]
    profile: RuntimeProfile,
    stages: Vec<StageRow>,
}

#[derive(Debug, Serialize)]
struct StageRow {
    index: usize,
    name: String,
    image: String,
    /// Fully-qualified base image; None for `FROM <stage>` and scratch
    canonical: Option<String>,
    platform: Option<String>,
    instructions: usize,
    user: Option<String>,
}

impl StageRow {
    fn from_stage(stage: &Stage) -> Self {
        Self {
            index: stage.index,
            name: stage.name(),
            image: stage.image.to_string(),
            canonical: (stage.parent.is_none() && !stage.image.is_scratch())
                .then(|| stage.image.canonical()),
            platform: stage.platform.clone(),
            instructions: stage.instructions.len(),
            user: stage
                .of_kind(&InstructionKind::User)
                .last()
                .map(|u| u.args.text()),
        }
    }
}

fn report(file: &Dockerfile, profile: RuntimeProfile) -> Report {
    Report {
        profile,
        stages: file.stages.iter().map(StageRow::from_stage).collect(),
    }
}

pub async fn execute(args: AnalyzeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let source = super::read_dockerfile(&args.dockerfile)?;
    let (file, profile) = dhi_migrate_engine::analyze(&source)?;
    let report = report(&file, profile);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Ecosystem:        {}", report.profile.ecosystem);
    println!("Build step:       {}", output::yes_no(report.profile.has_build_step));
    println!(
        "Privileged ports: {}",
        output::format_ports(&report.profile.exposed_privileged_ports)
    );
    println!();

    let mut table = output::new_table(&["STAGE", "NAME", "IMAGE", "PLATFORM", "INSTRUCTIONS", "USER"]);
    for row in &report.stages {
        table.add_row(vec![
            row.index.to_string(),
            row.name.clone(),
            output::truncate(&row.image, 60),
            row.platform.clone().unwrap_or_else(|| "-".to_string()),
            row.instructions.to_string(),
            row.user.clone().unwrap_or_else(|| "root".to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}
