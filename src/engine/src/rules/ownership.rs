//! File ownership for the final stage.

use dhi_migrate_core::error::Result;

use super::{final_index, Pass, PassContext, PassOutput};
use crate::dockerfile::{Dockerfile, InstructionKind};

/// Adds `--chown=<user>:<group>` to every final-stage COPY that lacks one.
pub struct Ownership;

impl Pass for Ownership {
    fn name(&self) -> &'static str {
        "ownership"
    }

    fn apply(&self, mut file: Dockerfile, ctx: &PassContext<'_>) -> Result<PassOutput> {
        let last = final_index(&file)?;
        let chown = ctx.config.chown();

        let mut copies = 0;
        let mut notes = Vec::new();
        for instruction in &mut file.stages[last].instructions {
            if instruction.kind != InstructionKind::Copy {
                continue;
            }
            copies += 1;
            if instruction.flag("chown").is_some() {
                continue;
            }
            let before = instruction.to_string();
            instruction.set_flag("chown", &chown);
            notes.push(format!("Set ownership {} on: {}", chown, before));
        }

        if copies == 0 {
            return Ok(PassOutput::unchanged(file, "no COPY instructions in final stage"));
        }
        if notes.is_empty() {
            return Ok(PassOutput::unchanged(
                file,
                "every final-stage COPY already sets --chown",
            ));
        }
        Ok(PassOutput::changed(file, notes))
    }
}
