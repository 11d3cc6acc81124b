//! Conflict resolver - disambiguates competing detection instances.
//!
//! When one recognized identity is reported by more than one physical
//! detection within a short window (a photo and a real face, or two people
//! misclassified as the same identity), naively tracking the latest record
//! makes the actuator oscillate between the two. The resolver watches a
//! sliding window of samples per identity and, while a conflict is live,
//! nominates the single detection instance the selector should trust: the
//! one whose recent mean position sits closest to the frame center, i.e.
//! the instance most likely to be the primary, centered subject.
//!
//! Ties in distance are broken deterministically toward the lowest
//! detection id.

use crate::record::{DetectionRecord, Identity};
use nalgebra::Point2;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// Configuration for conflict resolution.
#[derive(Debug, Clone)]
pub struct ConflictConfig {
    /// Sliding window duration (default: 1.0s)
    pub window: Duration,

    /// Minimum samples in the window before an override is issued
    /// (default: 3)
    pub min_samples: usize,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            min_samples: 3,
        }
    }
}

/// One windowed observation.
#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Duration,
    detection_id: u32,
    position: Point2<f32>,
}

/// Per-identity sliding window and active override.
#[derive(Debug, Default)]
struct IdentityWindow {
    samples: VecDeque<Sample>,
    trusted: Option<u32>,
}

/// Resolves which detection instance to trust per identity.
///
/// Windows are created lazily on first sighting of an identity and kept
/// for the lifetime of the run; the set of distinct identities is bounded
/// by the recognition gallery in practice.
pub struct ConflictResolver {
    config: ConflictConfig,
    frame_center: Point2<f32>,
    windows: HashMap<Identity, IdentityWindow>,
}

impl ConflictResolver {
    pub fn new(config: ConflictConfig, frame_center: Point2<f32>) -> Self {
        Self {
            config,
            frame_center,
            windows: HashMap::new(),
        }
    }

    /// Feeds one record into its identity's window and re-evaluates the
    /// override. Records without an identity or position carry no signal
    /// and are ignored.
    pub fn observe(&mut self, now: Duration, record: &DetectionRecord) {
        let (Some(identity), Some(position)) = (record.identity, record.position) else {
            return;
        };

        let window = self.windows.entry(identity).or_default();
        window.samples.push_back(Sample {
            at: now,
            detection_id: record.detection_id,
            position,
        });

        // Evict before every evaluation
        let horizon = self.config.window;
        while let Some(front) = window.samples.front() {
            if now.saturating_sub(front.at) > horizon {
                window.samples.pop_front();
            } else {
                break;
            }
        }

        let mut clusters: HashMap<u32, (Point2<f32>, usize)> = HashMap::new();
        for s in &window.samples {
            let entry = clusters.entry(s.detection_id).or_insert((Point2::origin(), 0));
            entry.0.coords += s.position.coords;
            entry.1 += 1;
        }

        if clusters.len() == 1 {
            // Conflict resolved - fall back to pass-through
            if window.trusted.take().is_some() {
                debug!(%identity, "conflict cleared");
            }
            return;
        }

        if window.samples.len() < self.config.min_samples {
            // Not enough evidence to override yet
            return;
        }

        // Trust the cluster whose mean is closest to frame center;
        // on an exact tie, the lowest detection id wins.
        let center = self.frame_center;
        let winner = clusters
            .iter()
            .map(|(&id, &(sum, count))| {
                let mean = Point2::from(sum.coords / count as f32);
                ((mean - center).norm(), id)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(_, id)| id);

        if window.trusted != winner {
            debug!(%identity, trusted = ?winner, "conflict override updated");
            window.trusted = winner;
        }
    }

    /// The currently trusted detection id for `identity`, or `None` when
    /// no override is active (every record passes through).
    pub fn trusted_id(&self, identity: Identity) -> Option<u32> {
        self.windows.get(&identity).and_then(|w| w.trusted)
    }
}
