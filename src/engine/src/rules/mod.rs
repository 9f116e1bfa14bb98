//! Rewrite passes.
//!
//! Each [`Pass`] consumes the build-file model and returns a new one together
//! with its notes. A [`Pipeline`] runs passes in a fixed order and appends
//! their notes to the [`MigrationLog`]. Every pass is idempotent and reports
//! at least one note; skips are reported with the [`NO_CHANGE_PREFIX`].

pub mod base_image;
pub mod exec_form;
pub mod multi_stage;
pub mod non_root;
pub mod ownership;
pub mod ports;
pub mod relocate;

pub use base_image::BaseImage;
pub use exec_form::ExecForm;
pub use multi_stage::MultiStage;
pub use non_root::NonRoot;
pub use ownership::Ownership;
pub use ports::Ports;
pub use relocate::Relocate;

use dhi_migrate_core::config::MigrateConfig;
use dhi_migrate_core::error::{MigrateError, Result};

use crate::classify::{Ecosystem, RuntimeProfile};
use crate::dockerfile::Dockerfile;
use crate::log::MigrationLog;
use crate::reference::ImageReference;

/// Prefix of notes that record a skipped pass.
pub const NO_CHANGE_PREFIX: &str = "no change: ";

/// Name prefix shared by hardened images.
const HARDENED_NAME_PREFIX: &str = "dhi-";

/// A single rewrite over the build-file model.
pub trait Pass: Send + Sync {
    /// Name used in log entries (e.g., "base-image").
    fn name(&self) -> &'static str;

    /// Rewrite `file`, returning the new model and the notes describing
    /// what changed.
    fn apply(&self, file: Dockerfile, ctx: &PassContext<'_>) -> Result<PassOutput>;
}

/// Result of one pass.
#[derive(Debug)]
pub struct PassOutput {
    pub file: Dockerfile,
    pub notes: Vec<String>,
}

impl PassOutput {
    pub fn changed(file: Dockerfile, notes: Vec<String>) -> Self {
        Self { file, notes }
    }

    /// The model is returned untouched with a single `no change:` note.
    pub fn unchanged(file: Dockerfile, reason: impl std::fmt::Display) -> Self {
        Self {
            file,
            notes: vec![format!("{}{}", NO_CHANGE_PREFIX, reason)],
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.notes.iter().all(|n| n.starts_with(NO_CHANGE_PREFIX))
    }
}

/// Read-only inputs shared by every pass.
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    pub profile: &'a RuntimeProfile,
    pub targets: &'a Targets,
    pub config: &'a MigrateConfig,
}

/// Hardened images derived from the migration target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    /// Dev-tooled variant for build stages
    pub build: ImageReference,
    /// Minimal variant for the final stage
    pub runtime: ImageReference,
    /// Runtime for statically compiled Go binaries
    pub static_runtime: Option<ImageReference>,
}

impl Targets {
    /// Derive build and runtime images from the target reference.
    ///
    /// The build image is the target when its tag already ends in `-dev`,
    /// otherwise the target with `-dev` appended to its tag. The runtime
    /// image strips the suffix.
    pub fn resolve(target: &str, namespace: Option<&str>, config: &MigrateConfig) -> Result<Self> {
        let mut reference = ImageReference::parse(target)?;
        if let Some(namespace) = namespace {
            reference = reference.with_namespace(namespace);
        }
        if !reference.name().starts_with(HARDENED_NAME_PREFIX) {
            tracing::warn!(
                image = %reference,
                "Target image name does not start with '{}'; is it a hardened image?",
                HARDENED_NAME_PREFIX
            );
        }

        let static_runtime = config
            .static_runtime_image
            .as_deref()
            .map(|image| {
                ImageReference::parse(image).map_err(|e| {
                    MigrateError::ConfigError(format!("static_runtime_image: {}", e))
                })
            })
            .transpose()?;

        Ok(Self {
            build: reference.to_dev(),
            runtime: reference.to_runtime(),
            static_runtime,
        })
    }

    /// Runtime image for the final stage: the static image for a compiled Go
    /// build when one is configured, else the runtime variant.
    pub fn runtime_for(&self, profile: &RuntimeProfile) -> &ImageReference {
        match (&self.static_runtime, profile.ecosystem) {
            (Some(image), Ecosystem::Go) if profile.has_build_step => image,
            _ => &self.runtime,
        }
    }
}

/// Ordered chain of passes.
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Append a pass to the chain.
    #[allow(clippy::should_implement_trait)]
    pub fn add<P: Pass + 'static>(mut self, pass: P) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// The migration order: base-image, multi-stage, non-root, ownership,
    /// ports, exec-form, relocate.
    pub fn standard() -> Self {
        Self::new()
            .add(BaseImage)
            .add(MultiStage)
            .add(NonRoot)
            .add(Ownership)
            .add(Ports)
            .add(ExecForm)
            .add(Relocate)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every pass in order, appending notes to `log`.
    pub fn run(
        &self,
        mut file: Dockerfile,
        ctx: &PassContext<'_>,
        log: &mut MigrationLog,
    ) -> Result<Dockerfile> {
        for pass in &self.passes {
            file.check_structure()?;

            let output = pass.apply(file, ctx)?;
            tracing::debug!(
                pass = pass.name(),
                notes = output.notes.len(),
                changed = !output.is_unchanged(),
                "Applied pass"
            );

            if output.notes.is_empty() {
                log.push(pass.name(), format!("{}nothing to do", NO_CHANGE_PREFIX));
            } else {
                log.extend(pass.name(), output.notes);
            }
            file = output.file;
        }
        Ok(file)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

/// Index of the final stage, or `InvalidModel` when the file has none.
pub(crate) fn final_index(file: &Dockerfile) -> Result<usize> {
    file.stages
        .len()
        .checked_sub(1)
        .ok_or_else(|| MigrateError::InvalidModel("build file has no stages".to_string()))
}


#[cfg(test)]
mod tests {
    use super::test_support::Fixture;
    use super::*;

    struct Identity;

    impl Pass for Identity {
        fn name(&self) -> &'static str {
            "identity"
        }

        fn apply(&self, file: Dockerfile, _ctx: &PassContext<'_>) -> Result<PassOutput> {
            Ok(PassOutput::changed(file, Vec::new()))
        }
    }

    #[test]
    fn test_targets_resolve() {
        let config = MigrateConfig::default();
        let targets = Targets::resolve("myorg/dhi-node:18-dev", None, &config).unwrap();
        assert_eq!(targets.build.to_string(), "myorg/dhi-node:18-dev");
        assert_eq!(targets.runtime.to_string(), "myorg/dhi-node:18");

        let targets = Targets::resolve("myorg/dhi-python:3.12", None, &config).unwrap();
        assert_eq!(targets.build.to_string(), "myorg/dhi-python:3.12-dev");
        assert_eq!(targets.runtime.to_string(), "myorg/dhi-python:3.12");
    }

    #[test]
    fn test_targets_resolve_untagged() {
        let targets =
            Targets::resolve("myorg/dhi-node", None, &MigrateConfig::default()).unwrap();
        assert_eq!(targets.build.to_string(), "myorg/dhi-node:latest-dev");
        assert_eq!(targets.runtime.to_string(), "myorg/dhi-node");
    }

    #[test]
    fn test_targets_resolve_namespace_override() {
        let targets =
            Targets::resolve("myorg/dhi-node:18", Some("acme"), &MigrateConfig::default())
                .unwrap();
        assert_eq!(targets.build.to_string(), "acme/dhi-node:18-dev");
        assert_eq!(targets.runtime.to_string(), "acme/dhi-node:18");
    }

    #[test]
    fn test_targets_bad_static_image() {
        let config = MigrateConfig {
            static_runtime_image: Some("bad image".to_string()),
            ..MigrateConfig::default()
        };
        let err = Targets::resolve("myorg/dhi-go:1.22", None, &config).unwrap_err();
        assert!(matches!(err, MigrateError::ConfigError(_)));
    }

    #[test]
    fn test_runtime_for_go_build() {
        let fixture = Fixture::new("FROM golang:1.22\nRUN go build -o /app/server .");
        assert_eq!(
            fixture.targets.runtime_for(&fixture.profile).to_string(),
            "docker/dhi-static:20241121"
        );

        let fixture = Fixture::new("FROM node:18\nRUN npm ci");
        assert_eq!(
            fixture.targets.runtime_for(&fixture.profile).to_string(),
            "myorg/dhi-node:18"
        );
    }

    #[test]
    fn test_runtime_for_go_without_static_image() {
        let config = MigrateConfig {
            static_runtime_image: None,
            ..MigrateConfig::default()
        };
        let fixture = Fixture::with_config("FROM golang:1.22\nRUN go build .", config);
        assert_eq!(
            fixture.targets.runtime_for(&fixture.profile).to_string(),
            "myorg/dhi-node:18"
        );
    }

    #[test]
    fn test_standard_order() {
        assert_eq!(
            Pipeline::standard().names(),
            vec![
                "base-image",
                "multi-stage",
                "non-root",
                "ownership",
                "ports",
                "exec-form",
                "relocate"
            ]
        );
    }

    #[test]
    fn test_pipeline_fills_empty_notes() {
        let fixture = Fixture::new("FROM node:18");
        let mut log = MigrationLog::new();
        let file = Pipeline::new()
            .add(Identity)
            .run(fixture.file.clone(), &fixture.ctx(), &mut log)
            .unwrap();
        assert_eq!(file, fixture.file);
        assert_eq!(
            log.notes_for("identity").collect::<Vec<_>>(),
            vec!["no change: nothing to do"]
        );
    }

    #[test]
    fn test_pipeline_rejects_empty_model() {
        let fixture = Fixture::new("FROM node:18");
        let mut log = MigrationLog::new();
        let err = Pipeline::standard()
            .run(Dockerfile::default(), &fixture.ctx(), &mut log)
            .unwrap_err();
        assert!(matches!(err, MigrateError::InvalidModel(_)));
        assert!(log.is_empty());
    }

    #[test]
    fn test_every_pass_logs() {
        let fixture = Fixture::new("FROM node:18\nCMD [\"node\",\"app.js\"]");
        let mut log = MigrationLog::new();
        let pipeline = Pipeline::standard();
        pipeline
            .run(fixture.file.clone(), &fixture.ctx(), &mut log)
            .unwrap();
        for name in pipeline.names() {
            assert!(log.notes_for(name).count() >= 1, "{name} logged nothing");
        }
    }

    #[test]
    fn test_unchanged_output() {
        let out = PassOutput::unchanged(Dockerfile::default(), "single-stage file");
        assert!(out.is_unchanged());
        assert_eq!(out.notes, vec!["no change: single-stage file"]);
    }
}
