//! Build/runtime stage synthesis.

use dhi_migrate_core::error::Result;

use super::{Pass, PassContext, PassOutput};
use crate::classify::is_build_instruction;
use crate::dockerfile::{Dockerfile, Instruction, InstructionKind, Stage};

/// Splits a single-stage file with a build step into a build stage and a
/// minimal runtime stage.
///
/// The build stage keeps every instruction except EXPOSE, CMD, ENTRYPOINT and
/// the WORKDIR/USER/ENV declared after the last build RUN. Those move to the
/// runtime stage, which first receives the effective WORKDIR, the ENVs
/// declared up to the last build RUN and a COPY of the application directory.
/// A moved WORKDIR that later build instructions depend on is also kept in
/// the build stage, and the copied directory is the build stage's final
/// WORKDIR.
pub struct MultiStage;

impl Pass for MultiStage {
    fn name(&self) -> &'static str {
        "multi-stage"
    }

    fn apply(&self, mut file: Dockerfile, ctx: &PassContext<'_>) -> Result<PassOutput> {
        if file.is_multi_stage() {
            return Ok(PassOutput::unchanged(file, "file is already multi-stage"));
        }
        if !ctx.profile.has_build_step {
            return Ok(PassOutput::unchanged(file, "no build step detected"));
        }
        let ecosystem = ctx.profile.ecosystem;
        if !ecosystem.is_known() {
            return Ok(PassOutput::unchanged(
                file,
                "unknown ecosystem, single-stage layout kept",
            ));
        }

        let Some(stage) = file.stages.pop() else {
            return Ok(PassOutput::unchanged(file, "no stages"));
        };
        let Some(last_build) = stage
            .instructions
            .iter()
            .rposition(|i| is_build_instruction(ecosystem, i))
        else {
            file.stages.push(stage);
            return Ok(PassOutput::unchanged(file, "no build step detected"));
        };

        let config = ctx.config;
        let build_alias = stage
            .alias
            .clone()
            .unwrap_or_else(|| config.build_stage_alias.clone());
        let runtime_alias = if build_alias.eq_ignore_ascii_case(&config.runtime_stage_alias) {
            format!("{}-final", config.runtime_stage_alias)
        } else {
            config.runtime_stage_alias.clone()
        };

        let workdir = effective_workdir(&stage.instructions[..=last_build]);
        let copied_env: Vec<Instruction> = stage.instructions[..=last_build]
            .iter()
            .filter(|i| i.kind == InstructionKind::Env)
            .cloned()
            .collect();
        let env_count = copied_env.len();
        let last_kept = stage
            .instructions
            .iter()
            .enumerate()
            .rposition(|(position, i)| !moves_to_runtime(&i.kind, position > last_build));

        let mut build = Stage::new(0, stage.image.clone());
        build.alias = Some(build_alias.clone());
        build.platform = stage.platform.clone();
        build.line = stage.line;

        let mut moved = Vec::new();
        for (position, instruction) in stage.instructions.into_iter().enumerate() {
            if !moves_to_runtime(&instruction.kind, position > last_build) {
                build.instructions.push(instruction);
                continue;
            }
            // later build instructions still run in this directory
            if instruction.kind == InstructionKind::Workdir
                && last_kept.is_some_and(|kept| position < kept)
            {
                build.instructions.push(instruction.clone());
            }
            moved.push(instruction);
        }

        let app_path =
            effective_workdir(&build.instructions).unwrap_or_else(|| config.app_path.clone());

        let mut runtime = Stage::new(1, ctx.targets.runtime_for(ctx.profile).clone());
        runtime.alias = Some(runtime_alias.clone());
        runtime.platform = stage.platform.clone();
        if let Some(ref dir) = workdir {
            runtime
                .instructions
                .push(Instruction::shell(InstructionKind::Workdir, dir.as_str(), 0));
        }
        runtime.instructions.extend(copied_env);
        runtime.instructions.push(Instruction::shell(
            InstructionKind::Copy,
            format!(
                "--from={} --chown={} {} {}",
                build_alias,
                config.chown(),
                app_path,
                app_path
            ),
            0,
        ));
        let moved_count = moved.len();
        runtime.instructions.extend(moved);

        let mut notes = vec![format!(
            "Split into build stage '{}' ({} instructions) and runtime stage '{}' ({} instructions)",
            build_alias,
            build.instructions.len(),
            runtime_alias,
            runtime.instructions.len()
        )];
        notes.push(format!(
            "Runtime stage {} copies {} from '{}' and receives {} moved instructions",
            runtime.image, app_path, build_alias, moved_count
        ));
        if env_count > 0 {
            notes.push(format!(
                "Copied {} ENV declarations into runtime stage",
                env_count
            ));
        }

        file.stages = vec![build, runtime];
        Ok(PassOutput::changed(file, notes))
    }
}

/// Instructions that belong to the runtime stage.
fn moves_to_runtime(kind: &InstructionKind, after_last_build: bool) -> bool {
    match kind {
        InstructionKind::Expose | InstructionKind::Cmd | InstructionKind::Entrypoint => true,
        InstructionKind::Workdir | InstructionKind::User | InstructionKind::Env => {
            after_last_build
        }
        _ => false,
    }
}

/// Absolute WORKDIR in effect after `instructions`.
///
/// Relative directories resolve against the previous one. A directory that
/// uses variable expansion cannot be resolved and yields None.
fn effective_workdir(instructions: &[Instruction]) -> Option<String> {
    let mut current: Option<String> = None;
    for instruction in instructions {
        if instruction.kind != InstructionKind::Workdir {
            continue;
        }
        let dir = instruction.args.text();
        let dir = dir.trim().trim_matches('"');
        if dir.contains('$') {
            current = None;
        } else if dir.starts_with('/') {
            current = Some(dir.to_string());
        } else {
            let base = current.as_deref().unwrap_or("");
            current = Some(format!("{}/{}", base.trim_end_matches('/'), dir));
        }
    }
    current
        .map(|dir| {
            let trimmed = dir.trim_end_matches('/');
            if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            }
        })
        .filter(|dir| dir != "/")
}
