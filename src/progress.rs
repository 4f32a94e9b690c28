//! Indexing progress reporting.
//!
//! Reports observable progress during `relindex index` so operators see
//! where the cursor is and how much is left. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an indexing run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexProgressEvent {
    /// Cursor and limit resolved, chunk loop about to start.
    Preparing { bundle: String, cursor: i64, total: u64 },
    /// A chunk was submitted: `n` of `total` documents are indexed.
    Indexing {
        bundle: String,
        n: u64,
        total: u64,
        cursor: i64,
    },
}

/// Reports indexing progress. Implementations write to stderr (human or JSON).
pub trait IndexProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the chunk loop.
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index report  1,000 / 5,000 documents  cursor 4021".
///
/// The cursor stays unformatted so it can be pasted into `--offset`.
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = human_line(&event);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

fn human_line(event: &IndexProgressEvent) -> String {
    match event {
        IndexProgressEvent::Preparing {
            bundle,
            cursor,
            total,
        } => format!(
            "index {}  preparing  {} documents from cursor {}\n",
            bundle,
            format_number(*total),
            cursor
        ),
        IndexProgressEvent::Indexing {
            bundle,
            n,
            total,
            cursor,
        } => format!(
            "index {}  {} / {} documents  cursor {}\n",
            bundle,
            format_number(*n),
            format_number(*total),
            cursor
        ),
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Preparing {
                bundle,
                cursor,
                total,
            } => serde_json::json!({
                "event": "progress",
                "bundle": bundle,
                "phase": "preparing",
                "cursor": cursor,
                "total": total
            }),
            IndexProgressEvent::Indexing {
                bundle,
                n,
                total,
                cursor,
            } => serde_json::json!({
                "event": "progress",
                "bundle": bundle,
                "phase": "indexing",
                "n": n,
                "total": total,
                "cursor": cursor
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn human_line_keeps_cursor_raw() {
        let line = human_line(&IndexProgressEvent::Indexing {
            bundle: "report".to_string(),
            n: 1000,
            total: 5000,
            cursor: 4021,
        });
        assert_eq!(line, "index report  1,000 / 5,000 documents  cursor 4021\n");
    }
}
