//! Index reconstruction from the record file
//!
//! Walks the whole file in fix mode, so a rebuild doubles as the repair
//! pass: every index is cleared and refilled from the normal records that
//! survive, the record count is recomputed and the identity counter is
//! moved past the largest identity value found.

use serde::Serialize;

use crate::observability::ObservationScope;
use crate::storage::RecordMarker;

use super::engine::TableEngine;
use super::errors::TableResult;
use super::scan::ScanStep;

/// What a rebuild found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    /// Normal records now indexed
    pub records: u64,
    pub deleted: u64,
    /// Records quarantined with the corrupted marker
    pub corrupted: u64,
    /// Repairs applied during the walk
    pub repairs: u64,
    /// Offset the file was cut at, if the tail was unreadable
    pub truncated_at: Option<u64>,
    pub next_id: i32,
}

/// Rebuilds every index of one table
pub struct TableRebuilder<'a> {
    engine: &'a mut TableEngine,
    reset_identity: bool,
}

impl<'a> TableRebuilder<'a> {
    /// With `reset_identity` the counter becomes exactly one past the
    /// largest identity found; otherwise it never moves backwards.
    pub fn new(engine: &'a mut TableEngine, reset_identity: bool) -> Self {
        Self { engine, reset_identity }
    }

    pub fn run(self) -> TableResult<RebuildReport> {
        let table = self.engine.path().display().to_string();
        let scope = ObservationScope::begin("TABLE_REBUILD", &[("table", &table)]);

        match self.rebuild() {
            Ok(report) => {
                scope.complete(&[
                    ("records", &report.records.to_string()),
                    ("deleted", &report.deleted.to_string()),
                    ("corrupted", &report.corrupted.to_string()),
                    ("repairs", &report.repairs.to_string()),
                ]);
                Ok(report)
            }
            Err(e) => {
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    fn rebuild(self) -> TableResult<RebuildReport> {
        let TableRebuilder { engine, reset_identity } = self;
        engine.mark_dirty()?;

        let bulk = engine
            .index_open_options()
            .for_rebuild(engine.options.rebuild_cache_multiplier);
        engine.open_indexes_with(&bulk)?;
        engine.clear_indexes()?;

        let repairs_before = engine.metrics.snapshot().repairs;
        let identity = engine.schema.identity();
        let all_changed = vec![true; engine.schema.len()];
        let mut report = RebuildReport::default();
        let mut max_id: Option<i32> = None;
        let mut offset = 0;

        loop {
            match engine.next_record(offset, true)? {
                ScanStep::Loaded { marker, values, end } => {
                    match marker {
                        RecordMarker::Normal => {
                            engine.add_values_to_index(offset, &values, &all_changed)?;
                            report.records += 1;
                            if let Some(id) = identity.and_then(|o| values[o].as_int()) {
                                max_id = Some(max_id.map_or(id, |m| m.max(id)));
                            }
                        }
                        RecordMarker::Deleted => report.deleted += 1,
                        RecordMarker::Corrupted => report.corrupted += 1,
                    }
                    offset = end;
                }
                ScanStep::Truncated => {
                    report.truncated_at = Some(offset);
                    break;
                }
                ScanStep::EndOfFile | ScanStep::Restart => break,
            }
        }

        engine.count = report.records;
        let floor = max_id.map_or(1, |m| m.saturating_add(1));
        engine.next_id = if reset_identity {
            floor
        } else {
            engine.next_id.max(floor)
        };

        engine.file.flush()?;
        let normal = engine.index_open_options();
        engine.open_indexes_with(&normal)?;
        engine.flush_indexes()?;
        engine.save_meta()?;

        report.repairs = engine.metrics.snapshot().repairs - repairs_before;
        report.next_id = engine.next_id;
        Ok(report)
    }
}
