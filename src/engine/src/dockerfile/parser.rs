//! Dockerfile parser.
//!
//! Parses a Dockerfile into stages of instructions. Supports parser
//! directives, line continuations, comments, and both shell and JSON (exec)
//! forms for RUN/CMD/ENTRYPOINT.

use std::sync::LazyLock;

use regex::Regex;

use dhi_migrate_core::error::{MigrateError, ParseErrorKind, Result};

use super::instruction::{
    resolve_stage_reference, Arguments, Dockerfile, Instruction, InstructionKind, Stage,
};
use crate::reference::ImageReference;

/// Default escape (line continuation) character.
const DEFAULT_ESCAPE: char = '\\';

static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#\s*(syntax|escape|check)\s*=\s*(\S+)\s*$").unwrap()
});

/// One logical line after continuation joining.
#[derive(Debug, PartialEq)]
struct LogicalLine {
    /// Line number of the first physical line
    line: usize,
    text: String,
}

impl Dockerfile {
    /// Parse a Dockerfile from its text content.
    pub fn parse(content: &str) -> Result<Self> {
        parse(content)
    }
}

/// Parse build-file text into a [`Dockerfile`].
pub fn parse(content: &str) -> Result<Dockerfile> {
    let (directives, body_start) = parse_directives(content);
    let escape = directives
        .iter()
        .find(|(name, _)| name == "escape")
        .and_then(|(_, value)| value.chars().next())
        .unwrap_or(DEFAULT_ESCAPE);

    let logical_lines = join_continuation_lines(content, body_start, escape)?;

    let mut file = Dockerfile {
        directives,
        ..Default::default()
    };

    for logical in &logical_lines {
        let instruction = parse_instruction(&logical.text, logical.line)?;

        if instruction.kind == InstructionKind::From {
            let stage = parse_from(&instruction, file.stages.as_slice())?;
            file.stages.push(stage);
            continue;
        }

        let Some(current) = file.stages.len().checked_sub(1) else {
            // Only ARG may precede the first FROM
            if matches!(&instruction.kind, InstructionKind::Other(k) if k == "ARG") {
                file.preamble.push(instruction);
                continue;
            }
            return Err(MigrateError::parse(
                ParseErrorKind::MissingFrom,
                logical.line,
            ));
        };

        if instruction.kind == InstructionKind::Copy {
            if let Some(from) = instruction.flag("from") {
                resolve_stage_reference(&file.stages[..current], current, from, logical.line)?;
            }
        }

        file.stages[current].instructions.push(instruction);
    }

    if file.stages.is_empty() {
        return Err(MigrateError::parse(
            if file.preamble.is_empty() {
                ParseErrorKind::EmptyFile
            } else {
                ParseErrorKind::MissingFrom
            },
            logical_lines.last().map(|l| l.line).unwrap_or(1),
        ));
    }

    tracing::debug!(
        stages = file.stages.len(),
        instructions = file.instructions().count(),
        "Parsed build file"
    );

    Ok(file)
}

/// Read parser directives from the top of the file.
///
/// Returns the directives and the index of the first line after them.
fn parse_directives(content: &str) -> (Vec<(String, String)>, usize) {
    let mut directives = Vec::new();
    let mut consumed = 0;
    for line in content.lines() {
        match DIRECTIVE_RE.captures(line.trim()) {
            Some(caps) => {
                directives.push((caps[1].to_ascii_lowercase(), caps[2].to_string()));
                consumed += 1;
            }
            None => break,
        }
    }
    (directives, consumed)
}

/// Whether `line` ends in an unescaped continuation marker.
fn ends_with_continuation(line: &str, escape: char) -> bool {
    let trailing = line.chars().rev().take_while(|&c| c == escape).count();
    trailing % 2 == 1
}

/// Join lines ending with the escape character into single logical lines.
///
/// Blank and comment lines are dropped, including those inside a
/// continuation. A continuation with nothing after it is an error.
fn join_continuation_lines(
    content: &str,
    skip: usize,
    escape: char,
) -> Result<Vec<LogicalLine>> {
    let mut logical_lines = Vec::new();
    let mut current: Option<LogicalLine> = None;
    let mut last_continued = 0;

    for (idx, raw) in content.lines().enumerate().skip(skip) {
        let line_num = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let body = raw.trim_end();
        if ends_with_continuation(body, escape) {
            let part = body[..body.len() - escape.len_utf8()].trim();
            let entry = current.get_or_insert_with(|| LogicalLine {
                line: line_num,
                text: String::new(),
            });
            if !part.is_empty() {
                if !entry.text.is_empty() {
                    entry.text.push(' ');
                }
                entry.text.push_str(part);
            }
            last_continued = line_num;
            continue;
        }

        match current.take() {
            Some(mut entry) => {
                if !entry.text.is_empty() {
                    entry.text.push(' ');
                }
                entry.text.push_str(trimmed);
                logical_lines.push(entry);
            }
            None => logical_lines.push(LogicalLine {
                line: line_num,
                text: trimmed.to_string(),
            }),
        }
    }

    if current.is_some() {
        return Err(MigrateError::parse(
            ParseErrorKind::UnexpectedEof,
            last_continued,
        ));
    }

    Ok(logical_lines)
}

/// Parse a single logical line into an Instruction.
fn parse_instruction(line: &str, line_num: usize) -> Result<Instruction> {
    let (keyword, rest) = split_first_word(line);
    let kind = InstructionKind::from_keyword(keyword);

    if rest.is_empty() && kind.requires_argument() {
        return Err(MigrateError::parse(
            ParseErrorKind::MissingArgument(kind.keyword().to_string()),
            line_num,
        ));
    }

    if let InstructionKind::Other(ref keyword) = kind {
        tracing::debug!(
            line = line_num,
            instruction = keyword.as_str(),
            "Instruction not modelled, passing through"
        );
    }

    let args = if kind.supports_exec_form() && rest.starts_with('[') {
        parse_exec_form(rest, line_num)
    } else {
        Arguments::Shell(rest.to_string())
    };

    Ok(Instruction::new(kind, args, line_num))
}

/// Split a string into the first word and the rest.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// Parse a JSON array like `["a", "b"]`; anything else stays shell form.
fn parse_exec_form(s: &str, line_num: usize) -> Arguments {
    match serde_json::from_str::<Vec<String>>(s) {
        Ok(tokens) => Arguments::Exec(tokens),
        Err(e) => {
            tracing::debug!(
                line = line_num,
                error = %e,
                "Not a JSON string array, treating as shell form"
            );
            Arguments::Shell(s.to_string())
        }
    }
}

/// Build a stage from `FROM [--platform=<p>] <image> [AS <alias>]`.
fn parse_from(instruction: &Instruction, prior: &[Stage]) -> Result<Stage> {
    let line_num = instruction.line;
    let text = instruction.args.text();
    let mut words = text.split_whitespace().peekable();

    let mut platform = None;
    while let Some(flag) = words.next_if(|w| w.starts_with("--")) {
        match flag.strip_prefix("--platform=") {
            Some(value) => platform = Some(value.to_string()),
            None => tracing::warn!(line = line_num, flag, "Unknown FROM flag, dropping"),
        }
    }

    let image_text = words.next().ok_or_else(|| {
        MigrateError::parse(ParseErrorKind::MissingArgument("FROM".to_string()), line_num)
    })?;

    let alias = match words.next() {
        Some(keyword) if keyword.eq_ignore_ascii_case("AS") => {
            let alias = words.next().ok_or_else(|| {
                MigrateError::parse(
                    ParseErrorKind::MissingArgument("FROM ... AS".to_string()),
                    line_num,
                )
            })?;
            Some(alias.to_string())
        }
        Some(other) => {
            tracing::warn!(line = line_num, token = other, "Unexpected token after FROM image");
            None
        }
        None => None,
    };

    let image = ImageReference::parse(image_text).map_err(|e| {
        MigrateError::parse(ParseErrorKind::InvalidImage(e.to_string()), line_num)
    })?;

    let parent = prior.iter().find(|s| {
        s.alias
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(image_text))
    });

    let mut stage = Stage::new(prior.len(), image);
    stage.alias = alias;
    stage.platform = platform;
    stage.parent = parent.map(|s| s.index);
    stage.line = line_num;
    Ok(stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dockerfile::Form;

    // --- join_continuation_lines ---

    #[test]
    fn test_join_continuation_simple() {
        let input = "RUN apt-get update && \\\n    apt-get install -y curl";
        let lines = join_continuation_lines(input, 0, '\\').unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line, 1);
        assert_eq!(lines[0].text, "RUN apt-get update && apt-get install -y curl");
    }

    #[test]
    fn test_join_continuation_no_continuation() {
        let input = "FROM alpine:3.19\nRUN echo hello";
        let lines = join_continuation_lines(input, 0, '\\').unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].line, 2);
    }

    #[test]
    fn test_join_continuation_skips_inner_comments() {
        let input = "RUN a \\\n# note\n\n    b \\\n    c";
        let lines = join_continuation_lines(input, 0, '\\').unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "RUN a b c");
    }

    #[test]
    fn test_join_continuation_escaped_backslash() {
        let input = "RUN echo C:\\\\\nCMD x";
        let lines = join_continuation_lines(input, 0, '\\').unwrap();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_join_continuation_dangling() {
        let input = "FROM alpine\nRUN echo a \\\n   b \\\n";
        let err = join_continuation_lines(input, 0, '\\').unwrap_err();
        match err {
            MigrateError::Parse { reason, line } => {
                assert_eq!(reason, ParseErrorKind::UnexpectedEof);
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_join_continuation_custom_escape() {
        let input = "RUN dir `\n    /s";
        let lines = join_continuation_lines(input, 0, '`').unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "RUN dir /s");
    }

    // --- parse_instruction ---

    #[test]
    fn test_parse_run_shell() {
        let i = parse_instruction("RUN npm install", 1).unwrap();
        assert_eq!(i.kind, InstructionKind::Run);
        assert_eq!(i.args, Arguments::Shell("npm install".to_string()));
    }

    #[test]
    fn test_parse_cmd_exec() {
        let i = parse_instruction(r#"cmd ["node", "server.js"]"#, 4).unwrap();
        assert_eq!(i.kind, InstructionKind::Cmd);
        assert_eq!(i.form(), Form::Exec);
        assert_eq!(i.words(), vec!["node", "server.js"]);
        assert_eq!(i.line, 4);
    }

    #[test]
    fn test_parse_entrypoint_invalid_json_is_shell() {
        let i = parse_instruction("ENTRYPOINT [not json", 1).unwrap();
        assert_eq!(i.form(), Form::Shell);
        assert_eq!(i.args.text(), "[not json");
    }

    #[test]
    fn test_parse_expose_bracket_is_not_exec() {
        let i = parse_instruction("VOLUME [\"/data\"]", 1).unwrap();
        assert_eq!(i.form(), Form::Shell);
    }

    #[test]
    fn test_parse_missing_argument() {
        let err = parse_instruction("WORKDIR", 9).unwrap_err();
        assert!(matches!(
            err,
            MigrateError::Parse {
                reason: ParseErrorKind::MissingArgument(_),
                line: 9
            }
        ));
    }

    #[test]
    fn test_parse_other_passthrough() {
        let i = parse_instruction("healthcheck CMD curl -f http://localhost/", 1).unwrap();
        assert_eq!(i.kind, InstructionKind::Other("HEALTHCHECK".to_string()));
        assert_eq!(i.to_string(), "HEALTHCHECK CMD curl -f http://localhost/");
    }

    // --- FROM ---

    #[test]
    fn test_parse_from_with_alias_and_platform() {
        let df = Dockerfile::parse("FROM --platform=linux/arm64 golang:1.22 as Builder").unwrap();
        let stage = &df.stages[0];
        assert_eq!(stage.image.to_string(), "golang:1.22");
        assert_eq!(stage.alias.as_deref(), Some("Builder"));
        assert_eq!(stage.platform.as_deref(), Some("linux/arm64"));
        assert_eq!(stage.line, 1);
    }

    #[test]
    fn test_parse_from_missing_alias() {
        assert!(Dockerfile::parse("FROM node:18 AS").is_err());
    }

    #[test]
    fn test_parse_from_earlier_stage() {
        let df = Dockerfile::parse("FROM node:18 AS base\nRUN npm ci\nFROM base AS test\nRUN npm test")
            .unwrap();
        assert_eq!(df.stages.len(), 2);
        assert_eq!(df.stages[1].parent, Some(0));
        assert_eq!(df.stages[0].parent, None);
    }

    // --- Full Dockerfile parsing ---

    #[test]
    fn test_parse_single_stage() {
        let content = "FROM node:18\nCOPY . /app\nWORKDIR /app\nRUN npm install\nCMD node server.js";
        let df = Dockerfile::parse(content).unwrap();
        assert_eq!(df.stages.len(), 1);
        assert_eq!(df.stages[0].instructions.len(), 4);
        assert_eq!(df.stages[0].instructions[3].line, 5);
        assert_eq!(df.stages[0].instructions[3].form(), Form::Shell);
    }

    #[test]
    fn test_parse_complex_dockerfile() {
        let content = r#"
# syntax=docker/dockerfile:1
ARG PY_VERSION=3.12
FROM python:${PY_VERSION}-slim AS build

WORKDIR /app

ENV PYTHONDONTWRITEBYTECODE=1 \
    PYTHONUNBUFFERED=1

COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt

FROM python:${PY_VERSION}-slim
COPY --from=build /app /app
EXPOSE 80
USER nobody
ENTRYPOINT ["python"]
CMD ["app.py"]
"#;
        let df = Dockerfile::parse(content).unwrap();
        // The leading blank line stops directive parsing
        assert!(df.directives.is_empty());
        assert_eq!(df.preamble.len(), 1);
        assert_eq!(df.stages.len(), 2);
        assert_eq!(df.stages[0].instructions.len(), 4);
        assert_eq!(df.stages[1].instructions.len(), 5);
        assert_eq!(
            df.stages[0].instructions[1].args.text(),
            "PYTHONDONTWRITEBYTECODE=1 PYTHONUNBUFFERED=1"
        );
    }

    #[test]
    fn test_parse_directives() {
        let content = "# syntax=docker/dockerfile:1\n# escape=`\nFROM mcr.microsoft.com/windows/servercore\nRUN dir `\n  c:\\";
        let df = Dockerfile::parse(content).unwrap();
        assert_eq!(
            df.directives,
            vec![
                ("syntax".to_string(), "docker/dockerfile:1".to_string()),
                ("escape".to_string(), "`".to_string()),
            ]
        );
        assert_eq!(df.stages[0].instructions[0].args.text(), "dir c:\\");
    }

    #[test]
    fn test_parse_empty_dockerfile() {
        let err = Dockerfile::parse("# just a comment\n\n").unwrap_err();
        assert!(matches!(
            err,
            MigrateError::Parse {
                reason: ParseErrorKind::EmptyFile,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_no_from() {
        let err = Dockerfile::parse("RUN echo hello").unwrap_err();
        assert!(matches!(
            err,
            MigrateError::Parse {
                reason: ParseErrorKind::MissingFrom,
                line: 1
            }
        ));
    }

    #[test]
    fn test_parse_only_args() {
        let err = Dockerfile::parse("ARG A=1\nARG B=2").unwrap_err();
        assert!(matches!(
            err,
            MigrateError::Parse {
                reason: ParseErrorKind::MissingFrom,
                line: 2
            }
        ));
    }

    #[test]
    fn test_parse_copy_from_undeclared_alias() {
        let content = "FROM node:18 AS build\nRUN npm ci\nFROM node:18\nCOPY --from=builder /app /app";
        let err = Dockerfile::parse(content).unwrap_err();
        match err {
            MigrateError::InvalidCopyFrom { reference, line } => {
                assert_eq!(reference, "builder");
                assert_eq!(line, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_copy_from_forward_reference() {
        let content = "FROM node:18\nCOPY --from=1 /app /app\nFROM node:18\n";
        assert!(matches!(
            Dockerfile::parse(content),
            Err(MigrateError::InvalidCopyFrom { .. })
        ));

        let content = "FROM node:18 AS a\nCOPY --from=a /x /y";
        assert!(matches!(
            Dockerfile::parse(content),
            Err(MigrateError::InvalidCopyFrom { .. })
        ));
    }

    #[test]
    fn test_parse_copy_from_index_and_image() {
        let content = "FROM golang:1.22\nRUN go build -o /out/app .\nFROM alpine\nCOPY --from=0 /out/app /app\nCOPY --from=nginx:1.25 /etc/nginx/nginx.conf /etc/nginx/";
        let df = Dockerfile::parse(content).unwrap();
        assert_eq!(df.stages[1].instructions.len(), 2);
    }

    #[test]
    fn test_parse_dangling_continuation_reports_line() {
        let content = "FROM node:18\nRUN npm install \\";
        let err = Dockerfile::parse(content).unwrap_err();
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_parse_invalid_image() {
        let err = Dockerfile::parse("FROM node@nodigest").unwrap_err();
        assert!(matches!(
            err,
            MigrateError::Parse {
                reason: ParseErrorKind::InvalidImage(_),
                line: 1
            }
        ));
    }
}
