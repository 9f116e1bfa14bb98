//! Migration entry point.
//!
//! `migrate` runs the whole transformation: parse, classify, rewrite, render.
//! Nothing is written anywhere; the caller decides what to do with the text.

use std::collections::BTreeMap;

use chrono::Utc;
use dhi_migrate_core::config::MigrateOptions;
use dhi_migrate_core::error::Result;
use serde::Serialize;

use crate::classify::{classify, Ecosystem, RuntimeProfile};
use crate::dockerfile::{render, Dockerfile, InstructionKind};
use crate::log::MigrationLog;
use crate::rules::{PassContext, Pipeline, Targets};

/// Result of a successful migration.
#[derive(Debug, Clone, Serialize)]
pub struct Migration {
    /// The rewritten build file, header included
    pub rendered: String,
    pub log: MigrationLog,
    /// Classification of the input file
    pub profile: RuntimeProfile,
}

/// Migrate `source` onto the hardened image `target`.
///
/// Parse errors abort the migration and carry the offending line; no
/// partial output is produced.
pub fn migrate(source: &str, target: &str, options: &MigrateOptions) -> Result<Migration> {
    let config = &options.config;
    config.validate()?;

    let file = Dockerfile::parse(source)?;
    let targets = Targets::resolve(target, options.namespace.as_deref(), config)?;

    let mut log = MigrationLog::new();
    log_passthrough(&file, &mut log);

    let profile = classify(&file);
    log_profile(&profile, &mut log);

    let ctx = PassContext {
        profile: &profile,
        targets: &targets,
        config,
    };
    let file = Pipeline::standard().run(file, &ctx, &mut log)?;

    let generated_at = options.generated_at.unwrap_or_else(Utc::now);
    let rendered = render(&file, &log, generated_at);

    tracing::info!(
        build = %targets.build,
        runtime = %targets.runtime,
        stages = file.stages.len(),
        changes = log.change_count(),
        "Migration complete"
    );

    Ok(Migration {
        rendered,
        log,
        profile,
    })
}

/// Parse and classify without rewriting.
pub fn analyze(source: &str) -> Result<(Dockerfile, RuntimeProfile)> {
    let file = Dockerfile::parse(source)?;
    let profile = classify(&file);
    Ok((file, profile))
}

/// One note per unmodelled keyword that is carried through untouched.
fn log_passthrough(file: &Dockerfile, log: &mut MigrationLog) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let all = file
        .preamble
        .iter()
        .chain(file.stages.iter().flat_map(|s| s.instructions.iter()));
    for instruction in all {
        if let InstructionKind::Other(ref keyword) = instruction.kind {
            *counts.entry(keyword.as_str()).or_default() += 1;
        }
    }
    for (keyword, count) in counts {
        let noun = if count == 1 {
            "instruction"
        } else {
            "instructions"
        };
        log.push(
            "parse",
            format!("{} passed through unchanged ({} {})", keyword, count, noun),
        );
    }
}

fn log_profile(profile: &RuntimeProfile, log: &mut MigrationLog) {
    let ports = if profile.exposed_privileged_ports.is_empty() {
        "none".to_string()
    } else {
        profile
            .exposed_privileged_ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    log.push(
        "classify",
        format!(
            "Detected ecosystem {} (build step: {}, privileged ports: {})",
            profile.ecosystem,
            if profile.has_build_step { "yes" } else { "no" },
            ports
        ),
    );
    if profile.ecosystem == Ecosystem::Unknown {
        log.push("classify", "no ecosystem-specific optimization applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use dhi_migrate_core::config::MigrateConfig;
    use dhi_migrate_core::error::{MigrateError, ParseErrorKind};

    fn options() -> MigrateOptions {
        MigrateOptions::default()
            .with_timestamp(DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap())
    }

    #[test]
    fn test_passthrough_notes() {
        let migration = migrate(
            "ARG VERSION=18\nFROM node:${VERSION}\nLABEL a=b\nLABEL c=d\nHEALTHCHECK CMD curl -f localhost\nCMD [\"node\"]",
            "myorg/dhi-node:18",
            &options(),
        )
        .unwrap();
        let notes: Vec<&str> = migration.log.notes_for("parse").collect();
        assert_eq!(
            notes,
            vec![
                "ARG passed through unchanged (1 instruction)",
                "HEALTHCHECK passed through unchanged (1 instruction)",
                "LABEL passed through unchanged (2 instructions)"
            ]
        );
        assert!(migration.rendered.contains("\nARG VERSION=18\n"));
        assert!(migration.rendered.contains("\nHEALTHCHECK CMD curl -f localhost\n"));
    }

    #[test]
    fn test_unknown_ecosystem_logged() {
        let migration = migrate("FROM nginx:1.25\nEXPOSE 80", "myorg/dhi-nginx:1.25", &options())
            .unwrap();
        let notes: Vec<&str> = migration.log.notes_for("classify").collect();
        assert_eq!(
            notes,
            vec![
                "Detected ecosystem unknown (build step: no, privileged ports: 80)",
                "no ecosystem-specific optimization applied"
            ]
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let options = options().with_config(MigrateConfig {
            user: String::new(),
            ..MigrateConfig::default()
        });
        let err = migrate("FROM node:18", "myorg/dhi-node:18", &options).unwrap_err();
        assert!(matches!(err, MigrateError::ConfigError(_)));
    }

    #[test]
    fn test_invalid_target_rejected() {
        let err = migrate("FROM node:18", "not an image", &options()).unwrap_err();
        assert!(matches!(err, MigrateError::InvalidReference(_)));
    }

    #[test]
    fn test_parse_error_wins_over_target() {
        let err = migrate("RUN echo hi", "myorg/dhi-node:18", &options()).unwrap_err();
        assert!(matches!(
            err,
            MigrateError::Parse {
                reason: ParseErrorKind::MissingFrom,
                line: 1
            }
        ));
    }

    #[test]
    fn test_analyze() {
        let (file, profile) = analyze("FROM golang:1.22 AS build\nRUN go build .\nFROM scratch").unwrap();
        assert_eq!(file.stages.len(), 2);
        assert_eq!(profile.ecosystem, Ecosystem::Go);
        assert!(profile.has_build_step);
    }
}
