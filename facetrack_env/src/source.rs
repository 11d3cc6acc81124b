//! Detection feed abstraction and the file-polling implementation.
//!
//! The upstream perception pipeline appends JSON frames to a feed file as
//! it runs. The file is not a well-formed document at any given instant:
//! it may end with a trailing comma, or be a bare comma-separated sequence
//! without array brackets. [`FilePollSource`] normalizes whatever is on
//! disk into a JSON array before parsing, discards frames it has already
//! delivered, and hands the rest to the caller.
//!
//! Any transport (file polling, pub/sub) reduces to the same contract:
//! a sequence of [`RawFrame`]s, possibly late, duplicated, or out of order.

use crate::error::EnvError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Upper bound on remembered duplicate-suppression keys.
///
/// The feed writer recycles its output file, so an unbounded "already
/// seen" set would grow for the lifetime of the process.
const SEEN_WINDOW_CAPACITY: usize = 4096;

// ============================================================================
// WIRE FORMAT
// ============================================================================

/// Normalized bounding box of a detected region, coordinates in [0,1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawBBox {
    pub xmin: f32,
    pub ymin: f32,
    pub width: f32,
    pub height: f32,
}

/// Mode-tagged identifier carried by a sub-object.
///
/// `mode == 0` is an ephemeral per-frame detection id; `mode == 1` is a
/// stable recognition-gallery id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawTag {
    pub mode: u8,
    pub unique_id: u32,
}

/// One sub-object attached to a frame: an id tag and/or a recognition label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObject {
    #[serde(default)]
    pub unique_id: Option<RawTag>,
    #[serde(default)]
    pub label: Option<String>,
}

/// One detection frame as emitted by the perception pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    /// Source timestamp in milliseconds
    pub timestamp_ms: u64,

    /// Frame/buffer ordinal. Monotonically intended, but the source may
    /// repeat or regress it; treated as advisory downstream.
    pub buffer_offset: u64,

    /// Emitting stream, used only for duplicate suppression
    #[serde(default)]
    pub stream_id: u32,

    /// Detected region, absent when the frame carries no spatial data
    #[serde(default)]
    pub bbox: Option<RawBBox>,

    /// Id tags and recognition labels
    #[serde(default)]
    pub objects: Vec<RawObject>,
}

impl RawFrame {
    /// The mode-0 (ephemeral detection) id, if any sub-object carries one.
    pub fn detection_id(&self) -> Option<u32> {
        self.tag_with_mode(0)
    }

    /// The mode-1 (gallery identity) id, if any sub-object carries one.
    pub fn gallery_id(&self) -> Option<u32> {
        self.tag_with_mode(1)
    }

    /// The recognition label, if any sub-object carries one.
    pub fn label(&self) -> Option<&str> {
        self.objects.iter().find_map(|o| o.label.as_deref())
    }

    fn tag_with_mode(&self, mode: u8) -> Option<u32> {
        self.objects
            .iter()
            .filter_map(|o| o.unique_id)
            .find(|t| t.mode == mode)
            .map(|t| t.unique_id)
    }
}

// ============================================================================
// SOURCE TRAIT
// ============================================================================

/// A source of detection frames.
///
/// `poll` returns every frame that has appeared since the previous call,
/// already de-duplicated. It must be bounded: an empty feed returns an
/// empty vector rather than blocking indefinitely.
#[async_trait]
pub trait DetectionSource: Send + 'static {
    async fn poll(&mut self) -> Result<Vec<RawFrame>, EnvError>;
}

// ============================================================================
// FILE POLLING SOURCE
// ============================================================================

/// Reads the feed file written by the perception pipeline.
pub struct FilePollSource {
    path: PathBuf,
    seen: SeenWindow,
}

impl FilePollSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seen: SeenWindow::new(SEEN_WINDOW_CAPACITY),
        }
    }
}

#[async_trait]
impl DetectionSource for FilePollSource {
    async fn poll(&mut self) -> Result<Vec<RawFrame>, EnvError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Feed writer has not started yet - "no data yet"
                debug!(path = %self.path.display(), "feed file missing, retrying next poll");
                return Ok(Vec::new());
            }
            Err(e) => return Err(EnvError::feed(format!("read {}: {e}", self.path.display()))),
        };

        let frames = match parse_fragment(&content) {
            Ok(frames) => frames,
            Err(e) => {
                // Partial write in progress; the next poll will see a full frame
                warn!(path = %self.path.display(), error = %e, "malformed feed payload, skipping");
                return Ok(Vec::new());
            }
        };

        let fresh: Vec<RawFrame> = frames
            .into_iter()
            .filter(|f| self.seen.insert((f.timestamp_ms, f.stream_id, f.buffer_offset)))
            .collect();

        Ok(fresh)
    }
}

/// Parses a feed fragment, tolerating the writer's framing quirks.
pub fn parse_fragment(content: &str) -> Result<Vec<RawFrame>, EnvError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let normalized = if let Some(stripped) = trimmed.strip_suffix(',') {
        format!("[{stripped}]")
    } else if !(trimmed.starts_with('[') && trimmed.ends_with(']')) {
        format!("[{trimmed}]")
    } else {
        trimmed.to_string()
    };

    serde_json::from_str(&normalized).map_err(|e| EnvError::feed(format!("parse feed: {e}")))
}

/// Bounded insertion-ordered set for duplicate suppression.
struct SeenWindow {
    keys: HashSet<(u64, u32, u64)>,
    order: VecDeque<(u64, u32, u64)>,
    capacity: usize,
}

impl SeenWindow {
    fn new(capacity: usize) -> Self {
        Self {
            keys: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns true if the key was not seen before.
    fn insert(&mut self, key: (u64, u32, u64)) -> bool {
        if !self.keys.insert(key) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.keys.remove(&old);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn frame_json(offset: u64) -> String {
        format!(
            r#"{{"timestamp_ms": {ts}, "buffer_offset": {offset}, "bbox": {{"xmin": 0.4, "ymin": 0.2, "width": 0.2, "height": 0.3}}, "objects": [{{"unique_id": {{"mode": 0, "unique_id": 7}}}}, {{"unique_id": {{"mode": 1, "unique_id": 1}}, "label": "alice"}}]}}"#,
            ts = 1000 + offset,
            offset = offset
        )
    }

    #[test]
    fn test_parse_trailing_comma_fragment() {
        let content = format!("{},{},", frame_json(1), frame_json(2));
        let frames = parse_fragment(&content).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].buffer_offset, 2);
    }

    #[test]
    fn test_parse_bare_object() {
        let frames = parse_fragment(&frame_json(5)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].detection_id(), Some(7));
        assert_eq!(frames[0].gallery_id(), Some(1));
        assert_eq!(frames[0].label(), Some("alice"));
    }

    #[test]
    fn test_parse_empty_and_garbage() {
        assert!(parse_fragment("").unwrap().is_empty());
        assert!(parse_fragment("   \n").unwrap().is_empty());
        assert!(parse_fragment("{not json").is_err());
    }

    #[test]
    fn test_seen_window_bounded() {
        let mut seen = SeenWindow::new(2);
        assert!(seen.insert((1, 0, 1)));
        assert!(!seen.insert((1, 0, 1)));
        assert!(seen.insert((2, 0, 2)));
        assert!(seen.insert((3, 0, 3)));
        // First key evicted by capacity; re-inserting it succeeds again
        assert!(seen.insert((1, 0, 1)));
        assert!(seen.keys.len() <= 3);
    }

    #[tokio::test]
    async fn test_file_poll_missing_file_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = FilePollSource::new(dir.path().join("feed.json"));
        let frames = src.poll().await.unwrap();
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn test_file_poll_delivers_each_frame_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");

        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{},", frame_json(1)).unwrap();
        f.flush().unwrap();

        let mut src = FilePollSource::new(&path);
        assert_eq!(src.poll().await.unwrap().len(), 1);
        // Unchanged file: everything already delivered
        assert!(src.poll().await.unwrap().is_empty());

        // Writer appends a frame
        write!(f, "{},", frame_json(2)).unwrap();
        f.flush().unwrap();
        let fresh = src.poll().await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].buffer_offset, 2);
    }
}
