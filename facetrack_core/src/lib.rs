//! Facetrack Core - Real-Time Face-Tracking Control Loop
//!
//! This library keeps a recognized face centered in frame by driving a
//! pan/tilt gimbal with a linked arm joint. It solves three problems the
//! naive "chase the latest detection" loop gets wrong:
//! 1. **Replay Problem**: out-of-order/duplicate feed delivery via
//!    strictly-increasing offset consumption
//! 2. **Ghost Problem**: two physical detections sharing one recognized
//!    identity via windowed conflict resolution
//! 3. **Travel Problem**: partial vertical authority via saturation
//!    fallback onto the linked arm joint

pub mod actuator;
pub mod conflict;
pub mod control;
pub mod history;
pub mod record;
pub mod runtime;
pub mod selector;

// Re-export key types for convenience
pub use actuator::{ActuatorConfig, ActuatorStateMachine, RestPose, TrackerState};
pub use conflict::{ConflictConfig, ConflictResolver};
pub use control::{compute_deltas, AxisDeltas, ControlConfig};
pub use history::{AuditRow, AuditSink, CsvAuditLog, HistoryBuffer, HistoryConfig, HistoryError, MemoryAuditSink};
pub use record::{DetectionRecord, FrameGeometry, Identity};
pub use runtime::{run_ingest, LoopConfig, SharedPipeline, TrackerLoop, TrackingPipeline};
pub use selector::TargetSelector;
