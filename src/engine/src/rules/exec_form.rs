//! Shell-form to exec-form conversion for process-start instructions.

use dhi_migrate_core::error::Result;

use super::{Pass, PassContext, PassOutput};
use crate::dockerfile::{Arguments, Dockerfile};

/// Characters whose meaning is lost once the command no longer runs
/// through a shell.
const SHELL_METACHARACTERS: &[char] = &[
    '|', '&', ';', '<', '>', '$', '`', '"', '\'', '*', '?', '(', ')', '{', '}', '\\', '~',
];

/// Converts every shell-form CMD and ENTRYPOINT to exec form so the process
/// runs as PID 1 and receives signals directly.
///
/// The command is split on whitespace. Quoting, pipes and variable expansion
/// do not survive the split; such commands are converted anyway and the note
/// says so.
pub struct ExecForm;

impl Pass for ExecForm {
    fn name(&self) -> &'static str {
        "exec-form"
    }

    fn apply(&self, mut file: Dockerfile, _ctx: &PassContext<'_>) -> Result<PassOutput> {
        let mut notes = Vec::new();

        for stage in &mut file.stages {
            for instruction in &mut stage.instructions {
                if !instruction.kind.is_process_start() {
                    continue;
                }
                let Arguments::Shell(ref command) = instruction.args else {
                    continue;
                };
                let tokens: Vec<String> = command.split_whitespace().map(str::to_string).collect();
                if tokens.is_empty() {
                    continue;
                }
                let lossy = command.contains(SHELL_METACHARACTERS);

                let before = instruction.to_string();
                instruction.args = Arguments::Exec(tokens);
                let mut note = format!("Converted to exec form: {} -> {}", before, instruction);
                if lossy {
                    tracing::warn!(
                        line = instruction.line,
                        command = before.as_str(),
                        "Shell syntax in command will not be interpreted in exec form"
                    );
                    note.push_str(" (shell syntax is not interpreted in exec form; review)");
                }
                notes.push(note);
            }
        }

        if notes.is_empty() {
            return Ok(PassOutput::unchanged(
                file,
                "all CMD/ENTRYPOINT instructions already use exec form",
            ));
        }
        Ok(PassOutput::changed(file, notes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dockerfile::Form;
    use crate::rules::test_support::Fixture;

    #[test]
    fn test_converts_cmd() {
        let fixture = Fixture::new("FROM node:18\nCMD node server.js");
        let out = fixture.apply(&ExecForm);
        assert_eq!(
            out.file.stages[0].instructions[0].to_string(),
            r#"CMD ["node","server.js"]"#
        );
        assert_eq!(
            out.notes,
            vec![r#"Converted to exec form: CMD node server.js -> CMD ["node","server.js"]"#]
        );
    }

    #[test]
    fn test_converts_entrypoint_in_every_stage() {
        let fixture = Fixture::new(
            "FROM node:18 AS build\nCMD npm test\nFROM node:18\nENTRYPOINT   docker-entrypoint.sh  node",
        );
        let out = fixture.apply(&ExecForm);
        for (_, instruction) in out.file.instructions() {
            assert_eq!(instruction.form(), Form::Exec);
        }
        assert_eq!(
            out.file.stages[1].instructions[0].args,
            Arguments::Exec(vec!["docker-entrypoint.sh".to_string(), "node".to_string()])
        );
        assert_eq!(out.notes.len(), 2);
    }

    #[test]
    fn test_lossy_split_is_flagged() {
        let fixture = Fixture::new("FROM node:18\nCMD node server.js --flag=\"a b\" | tee log");
        let out = fixture.apply(&ExecForm);
        assert_eq!(
            out.file.stages[0].instructions[0].args,
            Arguments::Exec(
                ["node", "server.js", "--flag=\"a", "b\"", "|", "tee", "log"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            )
        );
        assert!(out.notes[0].ends_with("(shell syntax is not interpreted in exec form; review)"));
    }

    #[test]
    fn test_leaves_run_alone() {
        let fixture = Fixture::new("FROM node:18\nRUN npm ci && npm run build\nCMD [\"node\"]");
        let out = fixture.apply(&ExecForm);
        assert_eq!(out.file, fixture.file);
        assert_eq!(
            out.notes,
            vec!["no change: all CMD/ENTRYPOINT instructions already use exec form"]
        );
    }

    #[test]
    fn test_idempotent() {
        let fixture = Fixture::new("FROM node:18\nCMD node a.js");
        let once = fixture.apply(&ExecForm);
        let again = ExecForm.apply(once.file.clone(), &fixture.ctx()).unwrap();
        assert_eq!(again.file, once.file);
        assert!(again.is_unchanged());
    }
}
