//! Build step relocation out of the final stage.

use dhi_migrate_core::error::Result;

use super::{final_index, Pass, PassContext, PassOutput};
use crate::classify::is_build_instruction;
use crate::dockerfile::{Dockerfile, InstructionKind};

/// Moves build RUNs from the final stage to the end of the build stage,
/// keeping their relative order.
///
/// The build stage is the first stage the final stage copies from, or the
/// stage right before the final one.
pub struct Relocate;

impl Pass for Relocate {
    fn name(&self) -> &'static str {
        "relocate"
    }

    fn apply(&self, mut file: Dockerfile, ctx: &PassContext<'_>) -> Result<PassOutput> {
        let last = final_index(&file)?;
        if last == 0 {
            return Ok(PassOutput::unchanged(file, "single-stage file"));
        }

        let target = build_stage_for(&file, last);
        let ecosystem = ctx.profile.ecosystem;

        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut file.stages[last].instructions)
            .into_iter()
            .partition(|i| is_build_instruction(ecosystem, i));
        file.stages[last].instructions = kept;

        if moved.is_empty() {
            return Ok(PassOutput::unchanged(file, "no build steps in final stage"));
        }

        let target_name = file.stages[target].name();
        let notes = moved
            .iter()
            .map(|i| format!("Moved build step to stage '{}': {}", target_name, i))
            .collect();
        file.stages[target].instructions.extend(moved);
        Ok(PassOutput::changed(file, notes))
    }
}

/// Stage that receives relocated build steps.
fn build_stage_for(file: &Dockerfile, last: usize) -> usize {
    file.stages[last]
        .of_kind(&InstructionKind::Copy)
        .filter_map(|copy| {
            let from = copy.flag("from")?;
            file.resolve_stage_reference(last, from, copy.line)
                .ok()
                .flatten()
        })
        .next()
        .unwrap_or(last - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::Fixture;

    fn lines(file: &Dockerfile, stage: usize) -> Vec<String> {
        file.stages[stage]
            .instructions
            .iter()
            .map(|i| i.to_string())
            .collect()
    }

    #[test]
    fn test_moves_to_copy_source() {
        let fixture = Fixture::new(
            "FROM node:18 AS build\nRUN npm ci\nFROM node:18 AS test\nRUN echo ok\nFROM node:18\nCOPY --from=build /app /app\nRUN npm install --omit=dev\nRUN apk add --no-cache curl\nCMD [\"node\",\"a.js\"]",
        );
        let out = fixture.apply(&Relocate);
        assert_eq!(
            lines(&out.file, 0),
            vec![
                "RUN npm ci",
                "RUN npm install --omit=dev",
                "RUN apk add --no-cache curl"
            ]
        );
        assert_eq!(lines(&out.file, 1), vec!["RUN echo ok"]);
        assert_eq!(
            lines(&out.file, 2),
            vec!["COPY --from=build /app /app", "CMD [\"node\",\"a.js\"]"]
        );
        assert_eq!(
            out.notes[0],
            "Moved build step to stage 'build': RUN npm install --omit=dev"
        );
    }

    #[test]
    fn test_falls_back_to_previous_stage() {
        let fixture = Fixture::new(
            "FROM node:18 AS a\nRUN echo a\nFROM node:18 AS b\nRUN echo b\nFROM node:18\nCOPY --from=nginx:1.25 /etc/nginx /etc/nginx\nRUN npm ci",
        );
        let out = fixture.apply(&Relocate);
        assert_eq!(lines(&out.file, 1), vec!["RUN echo b", "RUN npm ci"]);
    }

    #[test]
    fn test_no_change_reasons() {
        let fixture = Fixture::new("FROM node:18\nRUN npm ci");
        assert_eq!(
            fixture.apply(&Relocate).notes,
            vec!["no change: single-stage file"]
        );

        let fixture = Fixture::new("FROM node:18 AS build\nRUN npm ci\nFROM node:18\nRUN mkdir /data");
        let out = fixture.apply(&Relocate);
        assert_eq!(out.file, fixture.file);
        assert_eq!(out.notes, vec!["no change: no build steps in final stage"]);
    }

    #[test]
    fn test_idempotent() {
        let fixture = Fixture::new("FROM node:18 AS build\nFROM node:18\nRUN npm ci\nCMD [\"node\"]");
        let once = fixture.apply(&Relocate);
        let again = Relocate.apply(once.file.clone(), &fixture.ctx()).unwrap();
        assert_eq!(again.file, once.file);
        assert!(again.is_unchanged());
    }
}
