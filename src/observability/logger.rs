//! JSON-lines event log
//!
//! Each event is one line: `event` and `level` first, then the caller's
//! fields sorted by key. WARN and ERROR go to stderr, INFO to stdout.
//!
//! `AEROTABLE_LOG` (`info`, `warn`, `error`, `off`) sets the quietest level
//! written, read once per process. Default is `warn`: repairs are always
//! reported, open/close chatter only on request.

use std::fmt;
use std::io::{self, Write};
use std::sync::OnceLock;

/// Event level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    /// Repairs and other recoverable surprises
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold from an `AEROTABLE_LOG` value; `None` silences everything.
fn parse_threshold(value: &str) -> Option<Option<Level>> {
    match value.trim().to_ascii_lowercase().as_str() {
        "info" | "debug" | "trace" => Some(Some(Level::Info)),
        "warn" | "warning" => Some(Some(Level::Warn)),
        "error" => Some(Some(Level::Error)),
        "off" | "none" => Some(None),
        _ => None,
    }
}

static THRESHOLD: OnceLock<Option<Level>> = OnceLock::new();

fn threshold() -> Option<Level> {
    *THRESHOLD.get_or_init(|| {
        std::env::var("AEROTABLE_LOG")
            .ok()
            .and_then(|v| parse_threshold(&v))
            .unwrap_or(Some(Level::Warn))
    })
}

/// One event as a JSON line, newline included.
fn render(level: Level, event: &str, fields: &[(&str, &str)]) -> String {
    let mut sorted: Vec<&(&str, &str)> = fields.iter().collect();
    sorted.sort_by_key(|(key, _)| *key);

    let mut line = String::with_capacity(64 + fields.len() * 32);
    line.push_str("{\"event\":");
    push_json(&mut line, event);
    line.push_str(",\"level\":\"");
    line.push_str(level.as_str());
    line.push('"');
    for (key, value) in sorted {
        line.push(',');
        push_json(&mut line, key);
        line.push(':');
        push_json(&mut line, value);
    }
    line.push_str("}\n");
    line
}

fn push_json(line: &mut String, s: &str) {
    match serde_json::to_string(s) {
        Ok(quoted) => line.push_str(&quoted),
        Err(_) => line.push_str("\"\""),
    }
}

/// Event sink for the engine
pub struct Logger;

impl Logger {
    pub fn log(level: Level, event: &str, fields: &[(&str, &str)]) {
        if threshold().map_or(true, |min| level < min) {
            return;
        }
        let line = render(level, event, fields);
        // a failed log write is dropped
        let _ = if level >= Level::Warn {
            io::stderr().lock().write_all(line.as_bytes())
        } else {
            io::stdout().lock().write_all(line.as_bytes())
        };
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Level::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Level::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Level::Error, event, fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_names() {
        assert_eq!(parse_threshold("INFO"), Some(Some(Level::Info)));
        assert_eq!(parse_threshold(" warning "), Some(Some(Level::Warn)));
        assert_eq!(parse_threshold("off"), Some(None));
        assert_eq!(parse_threshold("loud"), None);
        assert!(Level::Info < Level::Warn && Level::Warn < Level::Error);
    }

    #[test]
    fn test_event_and_level_lead_the_line() {
        let line = render(Level::Warn, "TABLE_STRING_REPAIRED", &[("offset", "42"), ("column", "name")]);
        assert!(line.starts_with("{\"event\":\"TABLE_STRING_REPAIRED\",\"level\":\"WARN\","));
        assert!(line.find("column").unwrap() < line.find("offset").unwrap());

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["offset"], "42");
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let a = render(Level::Info, "E", &[("zebra", "1"), ("apple", "2")]);
        let b = render(Level::Info, "E", &[("apple", "2"), ("zebra", "1")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_paths_with_quotes_and_newlines_stay_on_one_line() {
        let line = render(Level::Error, "E", &[("path", "C:\\data \"x\"\n\u{1}")]);
        assert_eq!(line.matches('\n').count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["path"], "C:\\data \"x\"\n\u{1}");
    }
}
