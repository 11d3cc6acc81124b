//! Control law - pure mapping from target position to axis deltas.
//!
//! Proportional control with a per-axis dead-zone and a fixed per-tick
//! rate limit. The dead-zone suppresses jitter from detection noise; the
//! rate limit bounds angular velocity regardless of error magnitude, so a
//! target appearing at the frame edge cannot slew the gimbal violently.

use nalgebra::{Point2, Vector2};

/// Control law parameters.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Pixel-space frame center the error is measured against
    pub frame_center: Point2<f32>,

    /// Per-axis dead-zone in pixels: error magnitudes at or below this
    /// produce no motion
    pub deadzone: Vector2<f32>,

    /// Proportional gain, degrees per pixel of error
    pub kp: f32,

    /// Per-tick rate limit in degrees, applied after the gain
    pub max_step: f32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            frame_center: Point2::new(320.0, 180.0),
            deadzone: Vector2::new(60.0, 40.0),
            kp: 0.02,
            max_step: 0.3,
        }
    }
}

/// Commanded per-tick deltas for the two primary axes, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisDeltas {
    pub pan: f32,
    pub tilt: f32,
}

impl AxisDeltas {
    pub const ZERO: Self = Self { pan: 0.0, tilt: 0.0 };
}

/// Computes the per-tick axis deltas for a target position.
pub fn compute_deltas(config: &ControlConfig, target: Point2<f32>) -> AxisDeltas {
    let error = config.frame_center - target;
    AxisDeltas {
        pan: axis_delta(error.x, config.deadzone.x, config.kp, config.max_step),
        tilt: axis_delta(error.y, config.deadzone.y, config.kp, config.max_step),
    }
}

fn axis_delta(error: f32, deadzone: f32, kp: f32, max_step: f32) -> f32 {
    if error.abs() <= deadzone {
        return 0.0;
    }
    (kp * error).clamp(-max_step, max_step)
}
