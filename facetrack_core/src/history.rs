//! History buffer - bounded, age-limited store of detection records.
//!
//! Every appended record is rendered to an audit row and durably appended
//! to an external log. The capacity bound holds unconditionally: an append
//! that would exceed it evicts the oldest entries on the spot, with no log
//! I/O. Age eviction is time-triggered (not per-append, to bound rewrite
//! cost); a prune rewrites the external log wholesale whenever the buffer
//! has diverged from it, by age expiry or by append-time eviction, so the
//! log re-converges to the buffer contents at every prune.
//!
//! The buffer is the single writer of the audit log. Concurrent readers
//! (diagnostics tools) must tolerate the rewrite race; the log is an audit
//! side effect, never used to recover in-memory state.

use crate::record::{DetectionRecord, Identity};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Sentinel literal for absent values in audit rows.
const NULL_SENTINEL: &str = "null";
/// Sentinel for detected-but-not-in-gallery faces, distinct from absent.
const NOT_IN_GALLERY: &str = "nd";

/// Configuration for the history buffer.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Maximum entry count (default: 256)
    pub capacity: usize,

    /// Maximum entry age (default: 30s)
    pub max_age: Duration,

    /// Prune cadence - how often the loop asks for a prune (default: 5s)
    pub prune_interval: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_age: Duration::from_secs(30),
            prune_interval: Duration::from_secs(5),
        }
    }
}

/// One rendered audit row. Column order is the external contract.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuditRow {
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Rec_BufferSet")]
    pub buffer_set: String,
    #[serde(rename = "Detection_ID")]
    pub detection_id: String,
    #[serde(rename = "Gallery_ID")]
    pub gallery_id: String,
    #[serde(rename = "Label")]
    pub label: String,
    #[serde(rename = "Center_X")]
    pub center_x: String,
    #[serde(rename = "Center_Y")]
    pub center_y: String,
}

impl AuditRow {
    /// Renders a record. Absent values become `null`; an unrecognized but
    /// detected face renders its gallery id and label as `nd`, never empty.
    pub fn render(record: &DetectionRecord, wall: SystemTime) -> Self {
        let epoch = wall
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();

        let gallery_id = match record.identity {
            Some(Identity::Gallery(id)) => id.to_string(),
            Some(Identity::Unidentified) => NOT_IN_GALLERY.to_string(),
            None => NULL_SENTINEL.to_string(),
        };

        let label = match (&record.label, record.identity) {
            (Some(label), _) => label.clone(),
            (None, Some(_)) => NOT_IN_GALLERY.to_string(),
            (None, None) => NULL_SENTINEL.to_string(),
        };

        let (center_x, center_y) = match record.position {
            Some(p) => (format!("{:.0}", p.x), format!("{:.0}", p.y)),
            None => (NULL_SENTINEL.to_string(), NULL_SENTINEL.to_string()),
        };

        Self {
            timestamp: format!("{epoch:.3}"),
            buffer_set: record.sequence_offset.to_string(),
            detection_id: record.detection_id.to_string(),
            gallery_id,
            label,
            center_x,
            center_y,
        }
    }
}

/// Destination for audit rows.
pub trait AuditSink: Send {
    /// Appends one row.
    fn append(&mut self, row: &AuditRow) -> Result<(), HistoryError>;

    /// Replaces the entire log with exactly these rows.
    fn rewrite(&mut self, rows: &[AuditRow]) -> Result<(), HistoryError>;
}

/// CSV-file audit sink (the production log).
pub struct CsvAuditLog {
    path: PathBuf,
}

/// Column order is the external contract; a log file always starts with
/// this header row, even when no entries survive a rewrite.
const COLUMNS: [&str; 7] = [
    "Timestamp",
    "Rec_BufferSet",
    "Detection_ID",
    "Gallery_ID",
    "Label",
    "Center_X",
    "Center_Y",
];

impl CsvAuditLog {
    /// Opens (creating or truncating) the log at `path` and writes the header.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let log = Self { path: path.into() };
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&log.path)?;
        writer.write_record(COLUMNS)?;
        writer.flush()?;
        Ok(log)
    }
}

impl AuditSink for CsvAuditLog {
    fn append(&mut self, row: &AuditRow) -> Result<(), HistoryError> {
        let file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        // Recover the header if the file was removed out from under us
        let headerless = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if headerless {
            writer.write_record(COLUMNS)?;
        }
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }

    fn rewrite(&mut self, rows: &[AuditRow]) -> Result<(), HistoryError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&self.path)?;
        writer.write_record(COLUMNS)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// In-memory sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    pub rows: Vec<AuditRow>,
    pub rewrites: usize,
}

impl AuditSink for MemoryAuditSink {
    fn append(&mut self, row: &AuditRow) -> Result<(), HistoryError> {
        self.rows.push(row.clone());
        Ok(())
    }

    fn rewrite(&mut self, rows: &[AuditRow]) -> Result<(), HistoryError> {
        self.rows = rows.to_vec();
        self.rewrites += 1;
        Ok(())
    }
}

/// One stored entry: arrival time plus the record and its rendered row.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub arrived_at: Duration,
    pub record: DetectionRecord,
    pub row: AuditRow,
}

/// Errors raised by history/audit operations.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Audit log I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit log serialization: {0}")]
    Csv(#[from] csv::Error),
}

/// Bounded, age-limited, insertion-ordered store of detection records.
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
    config: HistoryConfig,
    sink: Box<dyn AuditSink>,
    last_prune: Duration,
    /// Append-time evictions not yet reflected in the external log
    dropped_since_rewrite: usize,
}

impl HistoryBuffer {
    pub fn new(config: HistoryConfig, sink: Box<dyn AuditSink>) -> Self {
        Self {
            entries: VecDeque::new(),
            config,
            sink,
            last_prune: Duration::ZERO,
            dropped_since_rewrite: 0,
        }
    }

    /// Appends a record, rendering and durably logging its audit row.
    ///
    /// Enforces the capacity bound on the spot: the oldest entries are
    /// evicted (without log I/O) so the buffer never exceeds capacity,
    /// regardless of the prune cadence. The log catches up at the next
    /// prune.
    pub fn append(
        &mut self,
        now: Duration,
        wall: SystemTime,
        record: DetectionRecord,
    ) -> Result<(), HistoryError> {
        let row = AuditRow::render(&record, wall);
        self.sink.append(&row)?;
        self.entries.push_back(HistoryEntry {
            arrived_at: now,
            record,
            row,
        });
        while self.entries.len() > self.config.capacity {
            self.entries.pop_front();
            self.dropped_since_rewrite += 1;
        }
        Ok(())
    }

    /// Prunes if the cadence interval has elapsed since the last prune.
    ///
    /// Returns the number of entries removed (0 when off-cadence).
    pub fn maybe_prune(&mut self, now: Duration) -> Result<usize, HistoryError> {
        if now.saturating_sub(self.last_prune) < self.config.prune_interval {
            return Ok(0);
        }
        self.prune(now)
    }

    /// Evicts entries older than `max_age`, oldest first, then rewrites
    /// the audit log wholesale if the buffer has diverged from it (by age
    /// expiry here, or by append-time capacity eviction since the last
    /// rewrite).
    pub fn prune(&mut self, now: Duration) -> Result<usize, HistoryError> {
        self.last_prune = now;
        let mut removed = 0;

        while let Some(front) = self.entries.front() {
            if now.saturating_sub(front.arrived_at) <= self.config.max_age {
                break;
            }
            self.entries.pop_front();
            removed += 1;
        }

        if removed > 0 || self.dropped_since_rewrite > 0 {
            let rows: Vec<AuditRow> = self.entries.iter().map(|e| e.row.clone()).collect();
            self.sink.rewrite(&rows)?;
            self.dropped_since_rewrite = 0;
            debug!(removed, remaining = self.entries.len(), "history pruned");
        }
        Ok(removed)
    }

    /// Most recently appended entry for the given identity, if any.
    pub fn latest_matching(&self, identity: Identity) -> Option<&HistoryEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.record.matches_identity(identity))
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
