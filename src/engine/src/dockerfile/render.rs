//! Serialize a [`Dockerfile`] back into build-file text.

use chrono::{DateTime, Utc};

use super::instruction::Dockerfile;
use crate::log::MigrationLog;

/// Render the file with the generated migration header.
///
/// Parser directives stay on the first lines, where Docker looks for them;
/// the header follows.
pub fn render(file: &Dockerfile, log: &MigrationLog, generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    render_directives(file, &mut out);
    out.push_str(&render_header(log, generated_at));
    out.push('\n');
    out.push_str(&render_body(file));
    out
}

/// Header comment block: title, timestamp and every log note in order.
pub fn render_header(log: &MigrationLog, generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("# Dockerfile migrated to Docker Hardened Images (DHI)\n");
    out.push_str(&format!(
        "# Generated by dhi-migrate {} on {}\n",
        dhi_migrate_core::VERSION,
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str("#\n");
    out.push_str("# Migration notes:\n");
    for entry in log {
        out.push_str("# - ");
        out.push_str(&entry.to_string());
        out.push('\n');
    }
    out
}

/// Instructions only: preamble, then each stage separated by a blank line.
pub fn render_body(file: &Dockerfile) -> String {
    let mut out = String::new();

    for instruction in &file.preamble {
        out.push_str(&instruction.to_string());
        out.push('\n');
    }
    if !file.preamble.is_empty() {
        out.push('\n');
    }

    for (i, stage) in file.stages.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&stage.from_line());
        out.push('\n');
        for instruction in &stage.instructions {
            out.push_str(&instruction.to_string());
            out.push('\n');
        }
    }
    out
}

fn render_directives(file: &Dockerfile, out: &mut String) {
    for (name, value) in &file.directives {
        out.push_str(&format!("# {}={}\n", name, value));
    }
}
