//! Migration log: the ordered audit trail of one migration run.

use serde::Serialize;

/// A single note emitted by a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Name of the pass (or phase) that emitted the note
    pub pass: String,
    /// Human-readable summary
    pub note: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.pass, self.note)
    }
}

/// Append-only sequence of notes in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MigrationLog {
    entries: Vec<LogEntry>,
}

impl MigrationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pass: &str, note: impl Into<String>) {
        let note = note.into();
        tracing::debug!(pass, note = note.as_str(), "Migration note");
        self.entries.push(LogEntry {
            pass: pass.to_string(),
            note,
        });
    }

    /// Append every note of one pass, in order.
    pub fn extend<I>(&mut self, pass: &str, notes: I)
    where
        I: IntoIterator<Item = String>,
    {
        for note in notes {
            self.push(pass, note);
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Notes emitted by `pass`.
    pub fn notes_for<'a>(&'a self, pass: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.pass == pass)
            .map(|e| e.note.as_str())
    }

    /// Number of entries that record an actual change (not a `no change:` skip).
    pub fn change_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.note.starts_with(crate::rules::NO_CHANGE_PREFIX))
            .count()
    }
}

impl<'a> IntoIterator for &'a MigrationLog {
    type Item = &'a LogEntry;
    type IntoIter = std::slice::Iter<'a, LogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
