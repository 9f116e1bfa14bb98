//! Base image substitution.

use dhi_migrate_core::error::Result;

use super::{final_index, Pass, PassContext, PassOutput};
use crate::dockerfile::Dockerfile;

/// Replaces every stage's base image with its hardened counterpart.
///
/// A single-stage file gets the `-dev` build image when it has a build step
/// and the runtime image otherwise. In a multi-stage file every stage but the
/// last gets the build image and the last one the runtime image. Stages built
/// on an earlier stage and `scratch` stages keep their base.
pub struct BaseImage;

impl Pass for BaseImage {
    fn name(&self) -> &'static str {
        "base-image"
    }

    fn apply(&self, mut file: Dockerfile, ctx: &PassContext<'_>) -> Result<PassOutput> {
        let last = final_index(&file)?;
        let single = last == 0;
        let runtime = ctx.targets.runtime_for(ctx.profile);

        let mut notes = Vec::new();
        for stage in &mut file.stages {
            if stage.parent.is_some() || stage.image.is_scratch() {
                tracing::debug!(stage = %stage.name(), image = %stage.image, "Keeping base image");
                continue;
            }

            let replacement = if single {
                if ctx.profile.has_build_step {
                    &ctx.targets.build
                } else {
                    runtime
                }
            } else if stage.index == last {
                runtime
            } else {
                &ctx.targets.build
            };

            if stage.image == *replacement {
                continue;
            }
            notes.push(format!(
                "Replaced base image: {} -> {} (stage {})",
                stage.image,
                replacement,
                stage.name()
            ));
            stage.image = replacement.clone();
        }

        if notes.is_empty() {
            return Ok(PassOutput::unchanged(file, "base images already hardened"));
        }
        Ok(PassOutput::changed(file, notes))
    }
}
