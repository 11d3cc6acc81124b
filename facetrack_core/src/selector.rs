//! Target selector - picks the record that drives the next control update.
//!
//! Consumption is idempotent: a record is eligible only while its
//! `sequence_offset` strictly exceeds the last consumed offset, so each
//! physical observation drives at most one actuator command even when the
//! feed replays or duplicates records.

use crate::conflict::ConflictResolver;
use crate::history::HistoryBuffer;
use crate::record::{DetectionRecord, Identity};

/// Selects the freshest unconsumed record for the configured identity.
#[derive(Debug, Default)]
pub struct TargetSelector {
    last_offset: Option<u64>,
}

impl TargetSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the freshest record for `identity` that
    /// - has a `sequence_offset` strictly greater than the last consumed,
    /// - matches the resolver's trusted detection id (when an override is
    ///   active), and
    /// - carries a position.
    ///
    /// The returned record's offset is marked consumed. Records for the
    /// identity that fail the trusted-id check are skipped here but remain
    /// in the history for audit.
    pub fn select(
        &mut self,
        history: &HistoryBuffer,
        resolver: &ConflictResolver,
        identity: Identity,
    ) -> Option<DetectionRecord> {
        let trusted = resolver.trusted_id(identity);

        let chosen = history
            .iter()
            .rev()
            .map(|entry| &entry.record)
            .filter(|r| r.matches_identity(identity))
            .find(|r| {
                let unconsumed = self.last_offset.map_or(true, |last| r.sequence_offset > last);
                let trusted_ok = trusted.map_or(true, |id| r.detection_id == id);
                unconsumed && trusted_ok && r.position.is_some()
            })?;

        self.last_offset = Some(chosen.sequence_offset);
        Some(chosen.clone())
    }

    /// The last consumed offset, if any.
    pub fn last_offset(&self) -> Option<u64> {
        self.last_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictConfig;
    use crate::history::{HistoryConfig, MemoryAuditSink};
    use nalgebra::Point2;
    use std::time::{Duration, SystemTime};

    const TARGET: Identity = Identity::Gallery(1);

    fn record(offset: u64, detection_id: u32) -> DetectionRecord {
        DetectionRecord {
            observed_at: Duration::from_millis(offset * 10),
            sequence_offset: offset,
            detection_id,
            identity: Some(TARGET),
            label: None,
            position: Some(Point2::new(500.0, 50.0)),
        }
    }

    fn history_with(records: Vec<DetectionRecord>) -> HistoryBuffer {
        let mut buf = HistoryBuffer::new(HistoryConfig::default(), Box::new(MemoryAuditSink::default()));
        for r in records {
            buf.append(r.observed_at, SystemTime::now(), r).unwrap();
        }
        buf
    }

    fn resolver() -> ConflictResolver {
        ConflictResolver::new(ConflictConfig::default(), Point2::new(320.0, 180.0))
    }

    #[test]
    fn test_never_emits_same_offset_twice() {
        let history = history_with(vec![record(1, 7), record(2, 7), record(3, 7)]);
        let mut sel = TargetSelector::new();
        let r = resolver();

        assert_eq!(sel.select(&history, &r, TARGET).unwrap().sequence_offset, 3);
        // Replaying the identical buffer yields nothing new
        assert!(sel.select(&history, &r, TARGET).is_none());
        assert_eq!(sel.last_offset(), Some(3));
    }

    #[test]
    fn test_stale_offset_discarded() {
        let history = history_with(vec![record(5, 7)]);
        let mut sel = TargetSelector::new();
        let r = resolver();
        sel.select(&history, &r, TARGET).unwrap();

        // A late record with a regressed offset never re-applies
        let history = history_with(vec![record(5, 7), record(4, 7)]);
        assert!(sel.select(&history, &r, TARGET).is_none());
    }

    #[test]
    fn test_untrusted_instance_skipped() {
        let mut r = resolver();
        // Build a conflict: instance 9 centered, instance 4 peripheral
        for (t, rec) in [
            (0u64, record(1, 9)),
            (100, record(2, 4)),
            (200, record(3, 9)),
        ] {
            let mut rec = rec;
            rec.position = Some(if rec.detection_id == 9 {
                Point2::new(320.0, 180.0)
            } else {
                Point2::new(630.0, 10.0)
            });
            r.observe(Duration::from_millis(t), &rec);
        }
        assert_eq!(r.trusted_id(TARGET), Some(9));

        // Newest record is the untrusted instance: selector falls back to
        // the freshest trusted one
        let history = history_with(vec![record(1, 9), record(2, 4), record(3, 9), record(4, 4)]);
        let mut sel = TargetSelector::new();
        let chosen = sel.select(&history, &r, TARGET).unwrap();
        assert_eq!(chosen.detection_id, 9);
        assert_eq!(chosen.sequence_offset, 3);
    }

    #[test]
    fn test_positionless_record_never_selected() {
        let mut rec = record(1, 7);
        rec.position = None;
        let history = history_with(vec![rec]);
        let mut sel = TargetSelector::new();
        assert!(sel.select(&history, &resolver(), TARGET).is_none());
    }

    #[test]
    fn test_other_identity_ignored() {
        let mut rec = record(1, 7);
        rec.identity = Some(Identity::Gallery(2));
        let history = history_with(vec![rec]);
        let mut sel = TargetSelector::new();
        assert!(sel.select(&history, &resolver(), TARGET).is_none());
    }
}
