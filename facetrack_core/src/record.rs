//! Detection records - the normalized unit of perception output.
//!
//! A [`DetectionRecord`] is what the rest of the pipeline operates on:
//! every feed transport and wire quirk has been flattened away by the time
//! one is constructed. The only invariant callers must respect is that a
//! record without a position never reaches the control law; the target
//! selector enforces this.

use facetrack_env::RawFrame;
use nalgebra::Point2;
use std::time::Duration;

/// Stable recognition identity of a tracked subject.
///
/// `Gallery(n)` persists across frames; `Unidentified` is the sentinel for
/// a face that was detected but matched nothing in the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    Gallery(u32),
    Unidentified,
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::Gallery(id) => write!(f, "{id}"),
            Identity::Unidentified => write!(f, "nd"),
        }
    }
}

/// Fixed dimensions of the camera frame, used to convert normalized
/// bounding boxes to pixel centers.
#[derive(Debug, Clone, Copy)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    /// Pixel-space center of the frame.
    pub fn center(&self) -> Point2<f32> {
        Point2::new(self.width as f32 / 2.0, self.height as f32 / 2.0)
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
        }
    }
}

/// One normalized detection event.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    /// Monotonic ingestion time (ordering authority)
    pub observed_at: Duration,

    /// Frame ordinal from the source. Advisory: may repeat, regress, or
    /// arrive out of order.
    pub sequence_offset: u64,

    /// Ephemeral id of one physical detection instance. Unique only
    /// within its emission window; equal ids across two records imply the
    /// same physical object only when the records are temporally adjacent.
    pub detection_id: u32,

    /// Recognition identity, absent when the frame carried no identity tag
    pub identity: Option<Identity>,

    /// Human-readable name associated with the identity
    pub label: Option<String>,

    /// Pixel-space center of the detected region
    pub position: Option<Point2<f32>>,
}

impl DetectionRecord {
    /// Builds a record from a wire frame, or `None` when the frame carries
    /// no detection instance at all (nothing downstream could use it).
    pub fn from_frame(frame: &RawFrame, geometry: FrameGeometry, observed_at: Duration) -> Option<Self> {
        let detection_id = frame.detection_id()?;

        // A detected face without a gallery tag is unidentified, not absent
        let identity = Some(
            frame
                .gallery_id()
                .map(Identity::Gallery)
                .unwrap_or(Identity::Unidentified),
        );

        let position = frame.bbox.map(|bbox| {
            Point2::new(
                (bbox.xmin + bbox.width / 2.0) * geometry.width as f32,
                (bbox.ymin + bbox.height / 2.0) * geometry.height as f32,
            )
        });

        Some(Self {
            observed_at,
            sequence_offset: frame.buffer_offset,
            detection_id,
            identity,
            label: frame.label().map(str::to_string),
            position,
        })
    }

    /// Whether this record belongs to the given identity.
    pub fn matches_identity(&self, identity: Identity) -> bool {
        self.identity == Some(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use facetrack_env::{RawBBox, RawObject, RawTag};

    fn sample_frame() -> RawFrame {
        RawFrame {
            timestamp_ms: 1000,
            buffer_offset: 42,
            stream_id: 0,
            bbox: Some(RawBBox {
                xmin: 0.25,
                ymin: 0.5,
                width: 0.5,
                height: 0.25,
            }),
            objects: vec![
                RawObject {
                    unique_id: Some(RawTag {
                        mode: 0,
                        unique_id: 17,
                    }),
                    label: None,
                },
                RawObject {
                    unique_id: Some(RawTag {
                        mode: 1,
                        unique_id: 1,
                    }),
                    label: Some("alice".into()),
                },
            ],
        }
    }

    #[test]
    fn test_from_frame_pixel_center() {
        let record =
            DetectionRecord::from_frame(&sample_frame(), FrameGeometry::default(), Duration::ZERO)
                .unwrap();

        let pos = record.position.unwrap();
        // xmin 0.25 + width/2 0.25 = 0.5 of 640; ymin 0.5 + 0.125 = 0.625 of 360
        assert_relative_eq!(pos.x, 320.0);
        assert_relative_eq!(pos.y, 225.0);
        assert_eq!(record.sequence_offset, 42);
        assert_eq!(record.detection_id, 17);
        assert_eq!(record.identity, Some(Identity::Gallery(1)));
        assert_eq!(record.label.as_deref(), Some("alice"));
    }

    #[test]
    fn test_from_frame_without_detection_id() {
        let mut frame = sample_frame();
        frame.objects.clear();
        assert!(DetectionRecord::from_frame(&frame, FrameGeometry::default(), Duration::ZERO).is_none());
    }

    #[test]
    fn test_unrecognized_face_is_unidentified() {
        let mut frame = sample_frame();
        frame.objects.truncate(1); // keep only the mode-0 tag
        let record =
            DetectionRecord::from_frame(&frame, FrameGeometry::default(), Duration::ZERO).unwrap();
        assert_eq!(record.identity, Some(Identity::Unidentified));
        assert_eq!(record.identity.unwrap().to_string(), "nd");
    }
}
