//! In-memory model of a build file.
//!
//! A [`Dockerfile`] is an optional preamble (global `ARG`s before the first
//! `FROM`) followed by stages. Each [`Stage`] starts at a `FROM` and owns the
//! instructions up to the next one.

use std::fmt;

use dhi_migrate_core::error::{MigrateError, Result};

use crate::reference::ImageReference;

/// Instruction keyword.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    From,
    Run,
    Copy,
    Workdir,
    User,
    Cmd,
    Entrypoint,
    Expose,
    Env,
    Volume,
    /// Any keyword the engine does not model; kept verbatim
    Other(String),
}

impl InstructionKind {
    /// Map a keyword (any case) to its kind.
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.to_ascii_uppercase().as_str() {
            "FROM" => Self::From,
            "RUN" => Self::Run,
            "COPY" => Self::Copy,
            "WORKDIR" => Self::Workdir,
            "USER" => Self::User,
            "CMD" => Self::Cmd,
            "ENTRYPOINT" => Self::Entrypoint,
            "EXPOSE" => Self::Expose,
            "ENV" => Self::Env,
            "VOLUME" => Self::Volume,
            other => Self::Other(other.to_string()),
        }
    }

    /// Upper-case keyword as rendered.
    pub fn keyword(&self) -> &str {
        match self {
            Self::From => "FROM",
            Self::Run => "RUN",
            Self::Copy => "COPY",
            Self::Workdir => "WORKDIR",
            Self::User => "USER",
            Self::Cmd => "CMD",
            Self::Entrypoint => "ENTRYPOINT",
            Self::Expose => "EXPOSE",
            Self::Env => "ENV",
            Self::Volume => "VOLUME",
            Self::Other(keyword) => keyword,
        }
    }

    /// RUN, CMD and ENTRYPOINT accept a JSON array (exec form).
    pub fn supports_exec_form(&self) -> bool {
        matches!(self, Self::Run | Self::Cmd | Self::Entrypoint)
    }

    /// CMD and ENTRYPOINT start the container process.
    pub fn is_process_start(&self) -> bool {
        matches!(self, Self::Cmd | Self::Entrypoint)
    }

    /// Instructions that need an argument to be meaningful.
    pub(crate) fn requires_argument(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Shell form vs exec form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    Shell,
    Exec,
}

/// Instruction arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arguments {
    /// Opaque remainder of the line (shell form for RUN/CMD/ENTRYPOINT)
    Shell(String),
    /// `["exec", "form"]` tokens
    Exec(Vec<String>),
}

impl Arguments {
    pub fn form(&self) -> Form {
        match self {
            Arguments::Shell(_) => Form::Shell,
            Arguments::Exec(_) => Form::Exec,
        }
    }

    /// Arguments as one command string (exec tokens joined by spaces).
    pub fn text(&self) -> String {
        match self {
            Arguments::Shell(s) => s.clone(),
            Arguments::Exec(tokens) => tokens.join(" "),
        }
    }
}

/// A single build-file instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub args: Arguments,
    /// Source line of the instruction's first physical line; 0 when synthesized
    pub line: usize,
}

impl Instruction {
    pub fn new(kind: InstructionKind, args: Arguments, line: usize) -> Self {
        Self { kind, args, line }
    }

    /// Shell-form (or plain argument) instruction.
    pub fn shell(kind: InstructionKind, text: impl Into<String>, line: usize) -> Self {
        Self::new(kind, Arguments::Shell(text.into()), line)
    }

    pub fn form(&self) -> Form {
        self.args.form()
    }

    /// Whitespace-separated words of a shell-form argument, or the exec tokens.
    pub fn words(&self) -> Vec<&str> {
        match &self.args {
            Arguments::Shell(s) => s.split_whitespace().collect(),
            Arguments::Exec(tokens) => tokens.iter().map(String::as_str).collect(),
        }
    }

    /// Value of a leading `--name=value` flag (COPY `--from`, `--chown`, ...).
    pub fn flag(&self, name: &str) -> Option<&str> {
        let Arguments::Shell(text) = &self.args else {
            return None;
        };
        text.split_whitespace()
            .take_while(|w| w.starts_with("--"))
            .find_map(|w| {
                w.strip_prefix("--")
                    .and_then(|rest| rest.strip_prefix(name))
                    .and_then(|rest| rest.strip_prefix('='))
            })
    }

    /// Add `--name=value` after any existing leading flags.
    pub fn set_flag(&mut self, name: &str, value: &str) {
        let Arguments::Shell(text) = &self.args else {
            return;
        };
        let words: Vec<&str> = text.split_whitespace().collect();
        let flag_count = words.iter().take_while(|w| w.starts_with("--")).count();
        let flag = format!("--{}={}", name, value);

        let mut rebuilt: Vec<&str> = Vec::with_capacity(words.len() + 1);
        rebuilt.extend_from_slice(&words[..flag_count]);
        rebuilt.push(&flag);
        rebuilt.extend_from_slice(&words[flag_count..]);
        self.args = Arguments::Shell(rebuilt.join(" "));
    }

    /// For USER: whether the named identity is root (`root`, `0`, with any group).
    pub fn names_root_user(&self) -> bool {
        if self.kind != InstructionKind::User {
            return false;
        }
        let value = self.args.text();
        let user = value.split(':').next().unwrap_or("").trim();
        user == "root" || user == "0"
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.args {
            Arguments::Shell(text) if text.is_empty() => f.write_str(self.kind.keyword()),
            Arguments::Shell(text) => write!(f, "{} {}", self.kind, text),
            Arguments::Exec(tokens) => {
                let json = serde_json::to_string(tokens).map_err(|_| fmt::Error)?;
                write!(f, "{} {}", self.kind, json)
            }
        }
    }
}

/// A build stage: a `FROM` line and the instructions that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Position in the file, starting at 0
    pub index: usize,
    /// `AS <alias>` name
    pub alias: Option<String>,
    /// `--platform=` value on the FROM line
    pub platform: Option<String>,
    /// Base image
    pub image: ImageReference,
    /// Index of the earlier stage this one builds on (`FROM <alias>`)
    pub parent: Option<usize>,
    /// Line of the FROM instruction; 0 when synthesized
    pub line: usize,
    pub instructions: Vec<Instruction>,
}

impl Stage {
    pub fn new(index: usize, image: ImageReference) -> Self {
        Self {
            index,
            alias: None,
            platform: None,
            image,
            parent: None,
            line: 0,
            instructions: Vec::new(),
        }
    }

    /// Alias if set, else the numeric index used by `--from=`.
    pub fn name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| self.index.to_string())
    }

    /// Whether `reference` (alias or index) names this stage.
    pub fn is_named(&self, reference: &str) -> bool {
        match reference.parse::<usize>() {
            Ok(index) => index == self.index,
            Err(_) => self
                .alias
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(reference)),
        }
    }

    /// The rendered FROM line.
    pub fn from_line(&self) -> String {
        let mut line = String::from("FROM ");
        if let Some(ref platform) = self.platform {
            line.push_str("--platform=");
            line.push_str(platform);
            line.push(' ');
        }
        line.push_str(&self.image.to_string());
        if let Some(ref alias) = self.alias {
            line.push_str(" AS ");
            line.push_str(alias);
        }
        line
    }

    /// Instructions of the given kind.
    pub fn of_kind<'a>(
        &'a self,
        kind: &'a InstructionKind,
    ) -> impl Iterator<Item = &'a Instruction> + 'a {
        self.instructions.iter().filter(move |i| &i.kind == kind)
    }
}

/// A parsed build file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dockerfile {
    /// Parser directives (`# syntax=...`, `# escape=...`) as (name, value)
    pub directives: Vec<(String, String)>,
    /// Instructions before the first FROM (global ARGs)
    pub preamble: Vec<Instruction>,
    pub stages: Vec<Stage>,
}

impl Dockerfile {
    pub fn is_multi_stage(&self) -> bool {
        self.stages.len() > 1
    }

    pub fn final_stage(&self) -> Option<&Stage> {
        self.stages.last()
    }

    pub fn final_stage_mut(&mut self) -> Option<&mut Stage> {
        self.stages.last_mut()
    }

    /// All instructions with the index of the stage holding them.
    pub fn instructions(&self) -> impl Iterator<Item = (usize, &Instruction)> {
        self.stages
            .iter()
            .flat_map(|s| s.instructions.iter().map(move |i| (s.index, i)))
    }

    /// Resolve a `--from=` value against the stages before `current`.
    ///
    /// Returns `Ok(None)` for an external image reference.
    pub fn resolve_stage_reference(
        &self,
        current: usize,
        reference: &str,
        line: usize,
    ) -> Result<Option<usize>> {
        let prior = &self.stages[..current.min(self.stages.len())];
        resolve_stage_reference(prior, current, reference, line)
    }

    /// Check the structural invariants the rewrite passes rely on.
    pub fn check_structure(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(MigrateError::InvalidModel(
                "build file has no stages".to_string(),
            ));
        }
        for (position, stage) in self.stages.iter().enumerate() {
            if stage.index != position {
                return Err(MigrateError::InvalidModel(format!(
                    "stage at position {} carries index {}",
                    position, stage.index
                )));
            }
            if let Some(parent) = stage.parent {
                if parent >= position {
                    return Err(MigrateError::InvalidModel(format!(
                        "stage {} builds on stage {} which does not precede it",
                        position, parent
                    )));
                }
            }
            for copy in stage.of_kind(&InstructionKind::Copy) {
                if let Some(from) = copy.flag("from") {
                    self.resolve_stage_reference(position, from, copy.line)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Dockerfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::render::render_body(self))
    }
}

/// Values of `--from=` that name an image rather than a stage.
fn is_external_image(reference: &str) -> bool {
    reference.contains(':') || reference.contains('/') || reference.contains('@')
}

/// Resolve `reference` among `prior` stages (those before `current`).
pub(crate) fn resolve_stage_reference(
    prior: &[Stage],
    current: usize,
    reference: &str,
    line: usize,
) -> Result<Option<usize>> {
    let invalid = || MigrateError::InvalidCopyFrom {
        reference: reference.to_string(),
        line,
    };

    if reference.is_empty() {
        return Err(invalid());
    }
    if let Ok(index) = reference.parse::<usize>() {
        return if index < current && index < prior.len() {
            Ok(Some(index))
        } else {
            Err(invalid())
        };
    }
    if let Some(stage) = prior.iter().find(|s| s.is_named(reference)) {
        return Ok(Some(stage.index));
    }
    if is_external_image(reference) {
        return Ok(None);
    }
    Err(invalid())
}
