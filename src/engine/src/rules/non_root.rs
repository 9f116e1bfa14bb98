//! Non-root user injection.

use dhi_migrate_core::error::Result;

use super::{final_index, Pass, PassContext, PassOutput};
use crate::dockerfile::{Dockerfile, Instruction, InstructionKind};

/// Makes the final stage run as the configured non-root user.
///
/// When the last USER of the final stage is missing or names root, a
/// `USER <user>` is inserted before the first CMD/ENTRYPOINT that follows it,
/// or appended when there is none.
pub struct NonRoot;

impl Pass for NonRoot {
    fn name(&self) -> &'static str {
        "non-root"
    }

    fn apply(&self, mut file: Dockerfile, ctx: &PassContext<'_>) -> Result<PassOutput> {
        if !ctx.config.inject_nonroot {
            return Ok(PassOutput::unchanged(file, "non-root injection disabled"));
        }

        let last = final_index(&file)?;
        let stage = &mut file.stages[last];
        let last_user = stage
            .instructions
            .iter()
            .rposition(|i| i.kind == InstructionKind::User);

        if let Some(position) = last_user {
            let user = &stage.instructions[position];
            if !user.names_root_user() {
                let reason = format!("final stage already runs as '{}'", user.args.text());
                return Ok(PassOutput::unchanged(file, reason));
            }
        }

        let search_from = last_user.map_or(0, |p| p + 1);
        let insert_at = stage.instructions[search_from..]
            .iter()
            .position(|i| i.kind.is_process_start())
            .map(|p| p + search_from);

        let user = ctx.config.user.as_str();
        let note = match insert_at {
            Some(at) => {
                let before = stage.instructions[at].kind.keyword().to_string();
                stage
                    .instructions
                    .insert(at, Instruction::shell(InstructionKind::User, user, 0));
                format!("Injected USER {} before {}", user, before)
            }
            None => {
                stage
                    .instructions
                    .push(Instruction::shell(InstructionKind::User, user, 0));
                format!("Injected USER {} at end of final stage", user)
            }
        };
        let note = if last_user.is_some() {
            format!("{} (previous USER was root)", note)
        } else {
            note
        };

        Ok(PassOutput::changed(file, vec![note]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::Fixture;
    use dhi_migrate_core::config::MigrateConfig;

    fn final_lines(file: &Dockerfile) -> Vec<String> {
        file.stages
            .last()
            .unwrap()
            .instructions
            .iter()
            .map(|i| i.to_string())
            .collect()
    }

    #[test]
    fn test_injects_before_cmd() {
        let fixture = Fixture::new("FROM node:18\nCOPY . /app\nCMD [\"node\",\"a.js\"]");
        let out = fixture.apply(&NonRoot);
        assert_eq!(
            final_lines(&out.file),
            vec!["COPY . /app", "USER nonroot", "CMD [\"node\",\"a.js\"]"]
        );
        assert_eq!(out.notes, vec!["Injected USER nonroot before CMD"]);
    }

    #[test]
    fn test_appends_without_process_start() {
        let fixture = Fixture::new("FROM node:18\nCOPY . /app");
        let out = fixture.apply(&NonRoot);
        assert_eq!(final_lines(&out.file), vec!["COPY . /app", "USER nonroot"]);
    }

    #[test]
    fn test_root_user_is_overridden_after_it() {
        let fixture = Fixture::new(
            "FROM node:18\nENTRYPOINT [\"tini\"]\nUSER root\nRUN chown -R node /app\nCMD [\"node\",\"a.js\"]",
        );
        let out = fixture.apply(&NonRoot);
        assert_eq!(
            final_lines(&out.file),
            vec![
                "ENTRYPOINT [\"tini\"]",
                "USER root",
                "RUN chown -R node /app",
                "USER nonroot",
                "CMD [\"node\",\"a.js\"]"
            ]
        );
        assert!(out.notes[0].ends_with("(previous USER was root)"));
    }

    #[test]
    fn test_only_final_stage() {
        let fixture =
            Fixture::new("FROM node:18 AS build\nUSER root\nRUN npm ci\nFROM node:18\nCMD [\"node\"]");
        let out = fixture.apply(&NonRoot);
        assert_eq!(out.file.stages[0], fixture.file.stages[0]);
        assert_eq!(final_lines(&out.file), vec!["USER nonroot", "CMD [\"node\"]"]);
    }

    #[test]
    fn test_existing_non_root_user() {
        let fixture = Fixture::new("FROM node:18\nUSER node\nCMD [\"node\"]");
        let out = fixture.apply(&NonRoot);
        assert_eq!(out.file, fixture.file);
        assert_eq!(out.notes, vec!["no change: final stage already runs as 'node'"]);
    }

    #[test]
    fn test_idempotent() {
        let fixture = Fixture::new("FROM node:18\nUSER 0:0\nCMD node a.js");
        let once = fixture.apply(&NonRoot);
        let again = NonRoot.apply(once.file.clone(), &fixture.ctx()).unwrap();
        assert_eq!(again.file, once.file);
        assert!(again.is_unchanged());
    }

    #[test]
    fn test_disabled_and_custom_user() {
        let config = MigrateConfig {
            inject_nonroot: false,
            ..MigrateConfig::default()
        };
        let fixture = Fixture::with_config("FROM node:18\nCMD [\"node\"]", config);
        let out = fixture.apply(&NonRoot);
        assert_eq!(out.notes, vec!["no change: non-root injection disabled"]);

        let config = MigrateConfig {
            user: "65532".to_string(),
            ..MigrateConfig::default()
        };
        let fixture = Fixture::with_config("FROM node:18\nCMD [\"node\"]", config);
        let out = fixture.apply(&NonRoot);
        assert_eq!(final_lines(&out.file), vec!["USER 65532", "CMD [\"node\"]"]);
    }
}
