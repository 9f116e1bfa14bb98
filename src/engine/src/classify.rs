//! Runtime classification.
//!
//! Infers the application ecosystem from the first stage's base image and
//! detects build tooling and privileged bind ports. This is inference, not
//! certainty: an unrecognized image yields [`Ecosystem::Unknown`] and the
//! rewrite passes fall back to conservative behavior.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::dockerfile::{Arguments, Dockerfile, Instruction, InstructionKind};
use crate::reference::ImageReference;

/// Ports below this need elevated privileges to bind.
pub const PRIVILEGED_PORT_LIMIT: u16 = 1024;

/// Application ecosystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Node,
    Python,
    Go,
    Jvm,
    Unknown,
}

impl Ecosystem {
    pub fn is_known(self) -> bool {
        self != Ecosystem::Unknown
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Ecosystem::Node => "node",
            Ecosystem::Python => "python",
            Ecosystem::Go => "go",
            Ecosystem::Jvm => "jvm",
            Ecosystem::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Facts inferred from a build file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeProfile {
    pub ecosystem: Ecosystem,
    /// Some RUN installs dependencies or compiles code
    pub has_build_step: bool,
    /// Sorted, de-duplicated ports below 1024
    pub exposed_privileged_ports: Vec<u16>,
}

/// Image name fragments, evaluated in order; first match wins.
const ECOSYSTEM_RULES: &[(&str, Ecosystem)] = &[
    ("node", Ecosystem::Node),
    ("python", Ecosystem::Python),
    ("pypy", Ecosystem::Python),
    ("golang", Ecosystem::Go),
    ("openjdk", Ecosystem::Jvm),
    ("eclipse-temurin", Ecosystem::Jvm),
    ("amazoncorretto", Ecosystem::Jvm),
    ("maven", Ecosystem::Jvm),
    ("gradle", Ecosystem::Jvm),
];

/// Flags whose value (next word or `=value`) is a listen port or address.
const PORT_FLAGS: &[&str] = &["--port", "-p", "--listen", "--bind", "-b", "--http-port"];

// A command boundary: start of text, whitespace, or a shell separator.
static OS_PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[\s;&|(])(?:apt-get|apt|yum|dnf|microdnf|apk|zypper)\s+(?:-\S+\s+)*(?:install|update|upgrade|add)\b",
    )
    .unwrap()
});

static NODE_BUILD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s;&|(])(?:npm|yarn|pnpm)\s+(?:-\S+\s+)*(?:install|ci|add|i|build|run\s+build)\b")
        .unwrap()
});

static PYTHON_BUILD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[\s;&|(])(?:pip3?|pipenv|poetry|python3?\s+-m\s+pip)\s+(?:-\S+\s+)*install\b",
    )
    .unwrap()
});

static GO_BUILD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s;&|(])go\s+(?:build|install|mod\s+download)\b").unwrap()
});

static JVM_BUILD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s;&|(/])(?:mvn|mvnw|gradle|gradlew|javac)(?:\s|$)").unwrap()
});

static COMPILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s;&|(])(?:make|gcc|g\+\+|cargo\s+build)(?:\s|$)").unwrap()
});

// `host:port`, `:port` or `[v6]:port`
static BIND_ADDR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9.\-]+|\[[0-9A-Fa-f:]+\])?:(\d{1,5})$").unwrap()
});

/// Classify a parsed build file.
pub fn classify(file: &Dockerfile) -> RuntimeProfile {
    let ecosystem = file
        .stages
        .first()
        .map(|s| classify_image(&s.image))
        .unwrap_or(Ecosystem::Unknown);

    let has_build_step = file
        .instructions()
        .any(|(_, i)| is_build_instruction(ecosystem, i));

    let exposed_privileged_ports = privileged_ports(file);

    tracing::debug!(
        %ecosystem,
        has_build_step,
        ports = ?exposed_privileged_ports,
        "Classified build file"
    );

    RuntimeProfile {
        ecosystem,
        has_build_step,
        exposed_privileged_ports,
    }
}

/// Ecosystem implied by an image name.
pub fn classify_image(image: &ImageReference) -> Ecosystem {
    let name = image.name().to_ascii_lowercase();
    ECOSYSTEM_RULES
        .iter()
        .find(|(fragment, _)| name.contains(fragment))
        .map(|(_, ecosystem)| *ecosystem)
        .unwrap_or(Ecosystem::Unknown)
}

/// Whether a RUN instruction installs dependencies or builds code.
pub fn is_build_instruction(ecosystem: Ecosystem, instruction: &Instruction) -> bool {
    instruction.kind == InstructionKind::Run
        && is_build_command(ecosystem, &instruction.args.text())
}

/// Whether a command line matches a package-manager or build invocation.
///
/// OS package managers and generic compilers count for every ecosystem. A
/// known ecosystem adds only its own tooling; an unknown one accepts all.
pub fn is_build_command(ecosystem: Ecosystem, command: &str) -> bool {
    if OS_PACKAGE_RE.is_match(command) || COMPILE_RE.is_match(command) {
        return true;
    }
    match ecosystem {
        Ecosystem::Node => NODE_BUILD_RE.is_match(command),
        Ecosystem::Python => PYTHON_BUILD_RE.is_match(command),
        Ecosystem::Go => GO_BUILD_RE.is_match(command),
        Ecosystem::Jvm => JVM_BUILD_RE.is_match(command),
        Ecosystem::Unknown => [
            &*NODE_BUILD_RE,
            &*PYTHON_BUILD_RE,
            &*GO_BUILD_RE,
            &*JVM_BUILD_RE,
        ]
        .iter()
        .any(|re| re.is_match(command)),
    }
}

/// Ports below 1024 named by EXPOSE or by CMD/ENTRYPOINT bind targets.
pub fn privileged_ports(file: &Dockerfile) -> Vec<u16> {
    let mut ports = BTreeSet::new();
    for (_, instruction) in file.instructions() {
        match instruction.kind {
            InstructionKind::Expose => {
                ports.extend(instruction.words().into_iter().filter_map(expose_port));
            }
            InstructionKind::Cmd | InstructionKind::Entrypoint => {
                ports.extend(bind_ports(&instruction.args));
            }
            _ => {}
        }
    }
    ports.retain(|&p| is_privileged(p));
    ports.into_iter().collect()
}

pub fn is_privileged(port: u16) -> bool {
    port > 0 && port < PRIVILEGED_PORT_LIMIT
}

/// Port of an EXPOSE word (`80`, `80/tcp`); ranges and variables yield None.
pub fn expose_port(word: &str) -> Option<u16> {
    let number = word.split('/').next().unwrap_or(word);
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    number.parse().ok()
}

/// Ports of every bind target in a process-start argument list.
pub fn bind_ports(args: &Arguments) -> Vec<u16> {
    let mut ports = Vec::new();
    let mut prev: Option<&str> = None;
    for word in argument_words(args) {
        if let Some((_, port)) = bind_port_span(prev, word) {
            ports.push(port);
        }
        prev = Some(word);
    }
    ports
}

/// Words of an argument list; exec tokens are further split on whitespace
/// so `["sh", "-c", "serve --port 80"]` is scanned too.
pub(crate) fn argument_words(args: &Arguments) -> Vec<&str> {
    match args {
        Arguments::Shell(s) => s.split_whitespace().collect(),
        Arguments::Exec(tokens) => tokens.iter().flat_map(|t| t.split_whitespace()).collect(),
    }
}

/// Locate the port digits of a bind target inside `word`.
///
/// Recognizes `--port 80` (port in the word after a port flag),
/// `--port=80`, `--bind=0.0.0.0:80`, `0.0.0.0:80` and `:80`. Surrounding
/// quotes are ignored. Returns the byte range of the digits and the port.
pub(crate) fn bind_port_span(prev: Option<&str>, word: &str) -> Option<(Range<usize>, u16)> {
    let is_quote = |c: char| c == '"' || c == '\'';
    let offset = word.len() - word.trim_start_matches(is_quote).len();
    let inner = word.trim_matches(is_quote);

    for flag in PORT_FLAGS {
        if let Some(value) = inner
            .strip_prefix(flag)
            .and_then(|rest| rest.strip_prefix('='))
        {
            return port_value_span(value, offset + flag.len() + 1);
        }
    }

    let after_flag = prev
        .map(|p| p.trim_matches(is_quote))
        .is_some_and(|p| PORT_FLAGS.contains(&p));
    if after_flag {
        return port_value_span(inner, offset);
    }

    address_port_span(inner, offset)
}

/// A bare port number or an address with a port.
fn port_value_span(value: &str, offset: usize) -> Option<(Range<usize>, u16)> {
    if !value.is_empty() && value.len() <= 5 && value.chars().all(|c| c.is_ascii_digit()) {
        let port = value.parse().ok()?;
        return Some((offset..offset + value.len(), port));
    }
    address_port_span(value, offset)
}

fn address_port_span(value: &str, offset: usize) -> Option<(Range<usize>, u16)> {
    let caps = BIND_ADDR_RE.captures(value)?;
    let digits = caps.get(1)?;
    let port = digits.as_str().parse().ok()?;
    Some((offset + digits.start()..offset + digits.end(), port))
}
