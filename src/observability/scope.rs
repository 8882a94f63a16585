//! Begin/end events around table-wide passes
//!
//! A scope logs `<NAME>_BEGIN` when opened and exactly one of
//! `<NAME>_COMPLETE` (INFO, with `elapsed_ms`), `<NAME>_FAILED` (ERROR, with
//! `reason`) or, if dropped unfinished, `<NAME>_INCOMPLETE` (WARN).

use std::time::Instant;

use super::logger::Logger;

/// One rebuild, defragment or integrity check in progress
pub struct ObservationScope<'a> {
    name: &'a str,
    fields: Vec<(&'a str, String)>,
    started: Instant,
    finished: bool,
}

impl<'a> ObservationScope<'a> {
    pub fn begin(name: &'a str, fields: &[(&'a str, &str)]) -> Self {
        Logger::info(&format!("{}_BEGIN", name), fields);
        Self {
            name,
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            started: Instant::now(),
            finished: false,
        }
    }

    fn finish<'f>(&'f mut self, suffix: &str, extra: &[(&'f str, &str)]) -> (String, Vec<(&'f str, String)>) {
        self.finished = true;
        let mut fields: Vec<(&str, String)> = self.fields.iter().map(|(k, v)| (*k, v.clone())).collect();
        fields.extend(extra.iter().map(|(k, v)| (*k, v.to_string())));
        (format!("{}_{}", self.name, suffix), fields)
    }

    /// Ends the scope successfully with result fields
    pub fn complete(mut self, results: &[(&str, &str)]) {
        let elapsed = self.started.elapsed().as_millis().to_string();
        let (event, mut fields) = self.finish("COMPLETE", results);
        fields.push(("elapsed_ms", elapsed));
        Logger::info(&event, &borrowed(&fields));
    }

    pub fn fail(mut self, reason: &str) {
        let (event, fields) = self.finish("FAILED", &[("reason", reason)]);
        Logger::error(&event, &borrowed(&fields));
    }
}

fn borrowed<'f>(fields: &'f [(&'f str, String)]) -> Vec<(&'f str, &'f str)> {
    fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            Logger::warn(&format!("{}_INCOMPLETE", self.name), &borrowed(&self.fields));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finishing_marks_scope() {
        let mut scope = ObservationScope::begin("TABLE_CHECK", &[("table", "t.dat")]);
        {
            let (event, fields) = scope.finish("COMPLETE", &[("records", "3")]);
            assert_eq!(event, "TABLE_CHECK_COMPLETE");
            assert_eq!(fields, vec![("table", "t.dat".to_string()), ("records", "3".to_string())]);
        }
        assert!(scope.finished);
    }

    #[test]
    fn test_unfinished_scope_is_not_marked() {
        let scope = ObservationScope::begin("TABLE_REBUILD", &[]);
        assert!(!scope.finished);
        drop(scope);
        ObservationScope::begin("TABLE_REBUILD", &[]).fail("disk full");
    }
}
