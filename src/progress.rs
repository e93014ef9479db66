//! Stage progress reporting.
//!
//! Long scans and bulk migrations report where they are so operators can
//! tell a slow run from a stuck one. Progress is emitted on **stderr** so
//! stdout stays reserved for the per-stage summary.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A page of `collection` was read; `scanned` is the running total.
    Scanning { collection: String, scanned: u64 },
    /// A bulk chunk into `collection` completed.
    Writing {
        collection: String,
        written: u64,
        failed: u64,
    },
    /// A blocking server-side operation was submitted.
    Waiting { stage: String, collection: String },
}

/// Reports stage progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "reindex it_asset  scanned  12,000 documents".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Scanning {
                collection,
                scanned,
            } => format!("scan {}  {} documents\n", collection, format_number(*scanned)),
            ProgressEvent::Writing {
                collection,
                written,
                failed,
            } => format!(
                "write {}  {} written, {} failed\n",
                collection,
                format_number(*written),
                format_number(*failed)
            ),
            ProgressEvent::Waiting { stage, collection } => {
                format!("{} {}  waiting for the store...\n", stage, collection)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Scanning {
                collection,
                scanned,
            } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "collection": collection,
                "scanned": scanned
            }),
            ProgressEvent::Writing {
                collection,
                written,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "phase": "writing",
                "collection": collection,
                "written": written,
                "failed": failed
            }),
            ProgressEvent::Waiting { stage, collection } => serde_json::json!({
                "event": "progress",
                "phase": "waiting",
                "stage": stage,
                "collection": collection
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

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
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

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
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
    fn parse_modes() {
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("loud"), None);
    }
}
