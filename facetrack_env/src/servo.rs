//! Servo bus abstraction for the pan/tilt/arm gimbal.

use crate::error::EnvError;
use tracing::debug;

/// Named joints of the gimbal.
///
/// `ArmLeft` and `ArmRight` form a kinematically linked pair: the linkage
/// expects that commanding one side to angle θ is accompanied by 180−θ on
/// its partner in the same command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Joint {
    /// Primary horizontal axis
    Pan,
    /// Primary (partial) vertical axis
    Tilt,
    /// Linked arm joint, left channel
    ArmLeft,
    /// Linked arm joint, right channel (mirrored)
    ArmRight,
}

impl std::fmt::Display for Joint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Joint::Pan => "pan",
            Joint::Tilt => "tilt",
            Joint::ArmLeft => "arm_left",
            Joint::ArmRight => "arm_right",
        };
        write!(f, "{name}")
    }
}

/// Abstraction over the physical servo driver.
///
/// Implementations accept one angle command per named joint, in degrees,
/// and must clamp to [0,180]. Writes are expected to be fast and
/// non-blocking; a failed write is reported as an error but is never fatal
/// to the caller's loop.
pub trait ServoBus: Send + 'static {
    /// Commands `joint` to `angle` degrees.
    fn write(&mut self, joint: Joint, angle: f32) -> Result<(), EnvError>;
}

/// Stand-in bus that logs every command instead of driving hardware.
///
/// The real PWM driver is a deployment concern; this implementation keeps
/// the full pipeline runnable on a development machine.
#[derive(Debug, Default)]
pub struct LoggingServoBus;

impl ServoBus for LoggingServoBus {
    fn write(&mut self, joint: Joint, angle: f32) -> Result<(), EnvError> {
        let angle = angle.clamp(0.0, 180.0);
        debug!(%joint, angle, "servo write");
        Ok(())
    }
}
