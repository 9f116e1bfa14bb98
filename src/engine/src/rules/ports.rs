//! Privileged port remapping.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::LazyLock;

use dhi_migrate_core::error::Result;
use regex::Regex;

use super::{Pass, PassContext, PassOutput};
use crate::classify::{bind_port_span, expose_port, is_privileged};
use crate::dockerfile::{Arguments, Dockerfile, InstructionKind};

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").unwrap());

/// Moves every privileged port `p` to `p + offset` so a non-root process can
/// bind it. EXPOSE entries keep their `/proto` suffix. In CMD and ENTRYPOINT,
/// bind targets are rewritten in place, as is any word that is exactly an
/// already remapped port. All stages are covered.
pub struct Ports;

impl Pass for Ports {
    fn name(&self) -> &'static str {
        "ports"
    }

    fn apply(&self, mut file: Dockerfile, ctx: &PassContext<'_>) -> Result<PassOutput> {
        let mut remapper = Remapper::new(ctx.config.port_offset);

        // EXPOSE first, so literal ports in any stage's command are known.
        for instruction in file.stages.iter_mut().flat_map(|s| s.instructions.iter_mut()) {
            if instruction.kind == InstructionKind::Expose {
                if let Some(args) = remapper.expose(&instruction.args) {
                    instruction.args = args;
                }
            }
        }
        for instruction in file.stages.iter_mut().flat_map(|s| s.instructions.iter_mut()) {
            if matches!(instruction.kind, InstructionKind::Cmd | InstructionKind::Entrypoint) {
                if let Some(args) = remapper.process_start(&instruction.args) {
                    instruction.args = args;
                }
            }
        }

        if remapper.remapped.is_empty() {
            return Ok(PassOutput::unchanged(file, "no privileged ports exposed"));
        }
        let notes = remapper
            .remapped
            .iter()
            .map(|(old, new)| format!("Remapped privileged port {} -> {}", old, new))
            .collect();
        Ok(PassOutput::changed(file, notes))
    }
}

struct Remapper {
    offset: u16,
    remapped: BTreeSet<(u16, u16)>,
}

impl Remapper {
    fn new(offset: u16) -> Self {
        Self {
            offset,
            remapped: BTreeSet::new(),
        }
    }

    fn map(&mut self, port: u16) -> Option<u16> {
        if !is_privileged(port) {
            return None;
        }
        let mapped = port.checked_add(self.offset)?;
        self.remapped.insert((port, mapped));
        Some(mapped)
    }

    /// Replacement for a word that is exactly a remapped port, optionally
    /// quoted.
    fn literal(&self, word: &str) -> Option<(Range<usize>, u16)> {
        let inner = word.trim_matches(|c| c == '"' || c == '\'');
        let port: u16 = inner.parse().ok()?;
        let (_, mapped) = self.remapped.iter().find(|(old, _)| *old == port)?;
        let start = word.find(inner)?;
        Some((start..start + inner.len(), *mapped))
    }

    fn expose(&mut self, args: &Arguments) -> Option<Arguments> {
        let Arguments::Shell(text) = args else {
            return None;
        };
        let mut changed = false;
        let words: Vec<String> = text
            .split_whitespace()
            .map(|word| {
                let mapped = expose_port(word).and_then(|port| self.map(port));
                match mapped {
                    Some(port) => {
                        changed = true;
                        let proto = word.find('/').map(|p| &word[p..]).unwrap_or("");
                        format!("{}{}", port, proto)
                    }
                    None => word.to_string(),
                }
            })
            .collect();
        changed.then(|| Arguments::Shell(words.join(" ")))
    }

    fn process_start(&mut self, args: &Arguments) -> Option<Arguments> {
        let mut prev = None;
        match args {
            Arguments::Shell(text) => self.rewrite_binds(text, &mut prev).map(Arguments::Shell),
            Arguments::Exec(tokens) => {
                let mut changed = false;
                let rewritten = tokens
                    .iter()
                    .map(|token| match self.rewrite_binds(token, &mut prev) {
                        Some(new) => {
                            changed = true;
                            new
                        }
                        None => token.clone(),
                    })
                    .collect();
                changed.then_some(Arguments::Exec(rewritten))
            }
        }
    }

    /// Rewrite bind-target and literal ports inside `text`, keeping all other
    /// bytes.
    /// `prev` carries the preceding word across exec tokens.
    fn rewrite_binds(&mut self, text: &str, prev: &mut Option<String>) -> Option<String> {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for m in WORD_RE.find_iter(text) {
            let word = m.as_str();
            let replacement = bind_port_span(prev.as_deref(), word)
                .and_then(|(span, port)| self.map(port).map(|mapped| (span, mapped)))
                .or_else(|| self.literal(word));
            if let Some((span, mapped)) = replacement {
                out.push_str(&text[cursor..m.start() + span.start]);
                out.push_str(&mapped.to_string());
                cursor = m.start() + span.end;
            }
            *prev = Some(word.to_string());
        }
        if cursor == 0 {
            return None;
        }
        out.push_str(&text[cursor..]);
        Some(out)
    }
}
