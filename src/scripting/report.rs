//! Error surface and call history
//!
//! Raw guest diagnostics are scanned for the chunk line marker and mapped
//! back to the executed source. Nothing here can fail: a diagnostic without
//! a usable line still produces a report, just without line information.

use std::collections::VecDeque;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use strum_macros::Display;
use thiserror::Error;
use tracing::{error, info, warn};

/// Name every executed block is loaded under
pub const CHUNK_NAME: &str = "chunk";

/// Default number of call records retained
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

static LINE_MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?:\[string "chunk"\]|\bchunk):\s*(\d+):"#).ok()
});

/// First line number reported against the executed chunk, if any
pub fn extract_line_number(message: &str) -> Option<i64> {
    let marker = LINE_MARKER.as_ref()?;
    marker
        .captures(message)
        .and_then(|captures| captures.get(1))
        .and_then(|number| number.as_str().parse().ok())
}

/// One host-operation invocation made by guest code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Base name of the operation
    pub operation: String,
    /// Comma-separated argument types, or "No arguments"
    pub argument_types: String,
}

impl CallRecord {
    pub fn new(operation: impl Into<String>, argument_types: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            argument_types: argument_types.into(),
        }
    }
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.argument_types)
    }
}

/// Bounded FIFO of recent call records, oldest evicted first
#[derive(Debug, Clone)]
pub struct CallHistory {
    records: VecDeque<CallRecord>,
    capacity: usize,
}

impl CallHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: CallRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records oldest first (most recent last)
    pub fn snapshot(&self) -> Vec<CallRecord> {
        self.records.iter().cloned().collect()
    }

    /// Emit the history to the log, most recent last
    pub fn log(&self, as_error: bool) {
        if self.records.is_empty() {
            if as_error {
                error!(target: "scripting", "Method call history is empty");
            } else {
                info!(target: "scripting", "Method call history is empty");
            }
            return;
        }

        for (i, record) in self.records.iter().enumerate() {
            if as_error {
                error!(target: "scripting", "  [{}] {}", i + 1, record);
            } else {
                info!(target: "scripting", "  [{}] {}", i + 1, record);
            }
        }
    }
}

impl Default for CallHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Distinguishes "an exposed operation failed" from "the script is broken"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorOrigin {
    /// Syntax or runtime fault raised by the guest engine; aborts the run
    #[strum(serialize = "guest")]
    Guest,
    /// Failure inside a published operation; the run continues
    #[strum(serialize = "host operation")]
    HostOperation,
}

/// What callers see on the error surface
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{origin} error at line {line_number}: {message}")]
pub struct ExecutionError {
    pub origin: ErrorOrigin,
    /// 1-based line in the executed source, -1 when unknown
    pub line_number: i32,
    /// Source text of that line, empty when unknown
    pub line_text: String,
    pub message: String,
    /// Whether the editor surface should currently display this error
    pub is_displaying: bool,
    /// Call records leading up to the failure, most recent last
    pub history: Vec<CallRecord>,
}

impl ExecutionError {
    pub fn has_line(&self) -> bool {
        self.line_number >= 1
    }
}

pub struct ErrorReporter;

impl ErrorReporter {
    /// Build an error report and log it together with the call history
    pub fn capture(
        origin: ErrorOrigin,
        message: impl Into<String>,
        line: Option<i64>,
        source: &str,
        history: &CallHistory,
    ) -> ExecutionError {
        let message = message.into();
        let line = line.or_else(|| extract_line_number(&message));
        let (line_number, line_text) = resolve_line(line, source);

        if line_number >= 1 {
            error!(
                target: "scripting",
                "{} error at line {}: {}",
                origin,
                line_number,
                line_text
            );
        }
        error!(target: "scripting", "{}", message);
        history.log(true);

        ExecutionError {
            origin,
            line_number,
            line_text,
            message,
            is_displaying: true,
            history: history.snapshot(),
        }
    }
}

fn resolve_line(line: Option<i64>, source: &str) -> (i32, String) {
    let Some(line) = line else {
        return (-1, String::new());
    };

    let text = usize::try_from(line)
        .ok()
        .filter(|n| *n >= 1)
        .and_then(|n| source.lines().nth(n - 1));

    match (text, i32::try_from(line)) {
        (Some(text), Ok(number)) => (number, text.to_string()),
        _ => {
            warn!(
                target: "scripting",
                "Line number {} is out of range for the executed source",
                line
            );
            (-1, String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_line_number() {
        assert_eq!(
            extract_line_number(r#"[string "chunk"]:3: attempt to call a nil value"#),
            Some(3)
        );
        assert_eq!(
            extract_line_number(r#"runtime error: [string "chunk"]: 12: boom"#),
            Some(12)
        );
        assert_eq!(extract_line_number("chunk:7: syntax error near 'end'"), Some(7));
        assert_eq!(extract_line_number("something else entirely"), None);
        assert_eq!(extract_line_number(r#"[string "other"]:4: nope"#), None);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = CallHistory::new(3);
        for i in 0..5 {
            history.push(CallRecord::new(format!("Op{}", i), "No arguments"));
        }
        let names: Vec<_> = history
            .snapshot()
            .into_iter()
            .map(|r| r.operation)
            .collect();
        assert_eq!(names, vec!["Op2", "Op3", "Op4"]);
    }

    #[test]
    fn test_zero_capacity_history_stays_empty() {
        let mut history = CallHistory::new(0);
        history.push(CallRecord::new("Op", "Int64"));
        assert!(history.is_empty());
    }

    #[test]
    fn test_capture_maps_line() {
        let source = "local a = 1\nlocal b = 2\nDoesNotExist()";
        let report = ErrorReporter::capture(
            ErrorOrigin::Guest,
            r#"[string "chunk"]:3: attempt to call a nil value (global 'DoesNotExist')"#,
            None,
            source,
            &CallHistory::default(),
        );
        assert_eq!(report.line_number, 3);
        assert_eq!(report.line_text, "DoesNotExist()");
        assert!(report.is_displaying);
    }

    #[test]
    fn test_capture_out_of_range_line_degrades() {
        let report = ErrorReporter::capture(
            ErrorOrigin::Guest,
            r#"[string "chunk"]:40: boom"#,
            None,
            "one line",
            &CallHistory::default(),
        );
        assert_eq!(report.line_number, -1);
        assert!(report.line_text.is_empty());
        assert!(report.message.contains("boom"));
    }

    #[test]
    fn test_capture_explicit_line_wins() {
        let mut history = CallHistory::default();
        history.push(CallRecord::new("Explode", "No arguments"));
        let report = ErrorReporter::capture(
            ErrorOrigin::HostOperation,
            "Explode failed: kaboom",
            Some(2),
            "print(1)\nExplode()\n",
            &history,
        );
        assert_eq!(report.line_number, 2);
        assert_eq!(report.line_text, "Explode()");
        assert_eq!(report.history.len(), 1);
        assert_eq!(report.origin.to_string(), "host operation");
    }
}
