//! Actuator state machine - owns joint angles and all servo writes.
//!
//! The tracking loop never touches angles directly; it requests deltas and
//! this module applies them with saturation handling. The tilt joint has
//! partial vertical authority: when a tick's tilt delta would push it past
//! a limit, the joint holds and the motion is redirected to the linked arm
//! joint, which provides extended travel in the same direction. The arm
//! saturates at its own limits with no further fallback tier.
//!
//! The arm is a kinematically linked servo pair: commanding θ writes θ to
//! the left channel and 180−θ to the right channel in the same command.

use crate::control::AxisDeltas;
use facetrack_env::{Joint, ServoBus};
use std::collections::HashMap;
use tracing::{debug, info, warn};

const ANGLE_MIN: f32 = 0.0;
const ANGLE_MAX: f32 = 180.0;

/// Lifecycle states of the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// No valid target seen yet
    Idle,
    /// Following a target with the primary axes
    Tracking,
    /// Tilt pinned at a limit; overflow travel routed to the arm
    SaturatedVertical,
    /// Terminal: interpolating toward the rest pose before exit
    ReturningToNeutral,
}

/// Rest pose the gimbal parks in on startup and shutdown.
#[derive(Debug, Clone, Copy)]
pub struct RestPose {
    pub pan: f32,
    pub tilt: f32,
    pub arm: f32,
}

impl Default for RestPose {
    fn default() -> Self {
        Self {
            pan: 95.0,
            tilt: 120.0,
            arm: 90.0,
        }
    }
}

/// Configuration for the actuator state machine.
#[derive(Debug, Clone)]
pub struct ActuatorConfig {
    pub rest: RestPose,

    /// Fixed arm step taken when tilt motion is blocked (degrees)
    pub arm_step: f32,

    /// Angle changes smaller than this skip the hardware write.
    /// Efficiency only; never affects state transitions.
    pub inert_band: f32,

    /// Number of interpolation steps for the neutral return
    pub neutral_steps: u32,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            rest: RestPose::default(),
            arm_step: 1.0,
            inert_band: 0.05,
            neutral_steps: 25,
        }
    }
}

/// Owns the joint angles and arbitrates saturation fallback.
pub struct ActuatorStateMachine<B: ServoBus> {
    state: TrackerState,
    pan: f32,
    tilt: f32,
    arm: f32,
    config: ActuatorConfig,
    bus: B,
    last_written: HashMap<Joint, f32>,
    neutral_increment: (f32, f32, f32),
    neutral_remaining: u32,
}

impl<B: ServoBus> ActuatorStateMachine<B> {
    /// Creates the state machine parked at the rest pose and commands the
    /// servos there.
    pub fn new(config: ActuatorConfig, bus: B) -> Self {
        let rest = config.rest;
        let mut machine = Self {
            state: TrackerState::Idle,
            pan: rest.pan,
            tilt: rest.tilt,
            arm: rest.arm,
            config,
            bus,
            last_written: HashMap::new(),
            neutral_increment: (0.0, 0.0, 0.0),
            neutral_remaining: 0,
        };
        machine.command(Joint::Pan, rest.pan);
        machine.command(Joint::Tilt, rest.tilt);
        machine.command_arm(rest.arm);
        machine
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Current (pan, tilt, arm) angles in degrees.
    pub fn angles(&self) -> (f32, f32, f32) {
        (self.pan, self.tilt, self.arm)
    }

    /// Applies one tick's deltas for a valid target.
    pub fn apply(&mut self, deltas: AxisDeltas) {
        match self.state {
            TrackerState::ReturningToNeutral => return, // terminal
            TrackerState::Idle => {
                info!("first valid target, tracking");
                self.state = TrackerState::Tracking;
            }
            _ => {}
        }

        if deltas.pan != 0.0 {
            let new_pan = (self.pan + deltas.pan).clamp(ANGLE_MIN, ANGLE_MAX);
            if new_pan != self.pan {
                self.pan = new_pan;
                self.command(Joint::Pan, new_pan);
            }
        }

        if deltas.tilt != 0.0 {
            let candidate = self.tilt + deltas.tilt;
            if (ANGLE_MIN..=ANGLE_MAX).contains(&candidate) {
                self.tilt = candidate;
                self.command(Joint::Tilt, candidate);
                if self.state == TrackerState::SaturatedVertical {
                    debug!(tilt = self.tilt, "tilt back in range");
                    self.state = TrackerState::Tracking;
                }
            } else {
                // Blocked: tilt holds, overflow goes to the arm
                if self.state != TrackerState::SaturatedVertical {
                    debug!(tilt = self.tilt, "tilt saturated, redirecting to arm");
                    self.state = TrackerState::SaturatedVertical;
                }
                let arm_new =
                    (self.arm + self.config.arm_step * deltas.tilt.signum()).clamp(ANGLE_MIN, ANGLE_MAX);
                if arm_new != self.arm {
                    self.arm = arm_new;
                    self.command_arm(arm_new);
                }
            }
        }
    }

    /// Enters the terminal neutral-return state and precomputes the linear
    /// interpolation toward the rest pose.
    pub fn begin_neutral_return(&mut self) {
        let steps = self.config.neutral_steps.max(1);
        let rest = self.config.rest;
        self.neutral_increment = (
            (rest.pan - self.pan) / steps as f32,
            (rest.tilt - self.tilt) / steps as f32,
            (rest.arm - self.arm) / steps as f32,
        );
        self.neutral_remaining = steps;
        self.state = TrackerState::ReturningToNeutral;
        info!(steps, "returning to neutral");
    }

    /// Advances one interpolation step toward the rest pose.
    ///
    /// Returns `true` while more steps remain. The final step lands
    /// exactly on the rest pose.
    pub fn neutral_step(&mut self) -> bool {
        if self.state != TrackerState::ReturningToNeutral || self.neutral_remaining == 0 {
            return false;
        }
        self.neutral_remaining -= 1;

        if self.neutral_remaining == 0 {
            let rest = self.config.rest;
            self.pan = rest.pan;
            self.tilt = rest.tilt;
            self.arm = rest.arm;
        } else {
            self.pan += self.neutral_increment.0;
            self.tilt += self.neutral_increment.1;
            self.arm += self.neutral_increment.2;
        }

        self.command(Joint::Pan, self.pan);
        self.command(Joint::Tilt, self.tilt);
        self.command_arm(self.arm);
        self.neutral_remaining > 0
    }

    /// Writes one joint, skipping writes inside the inert band. A failed
    /// write is logged and retried implicitly on the next change.
    fn command(&mut self, joint: Joint, angle: f32) {
        let angle = angle.clamp(ANGLE_MIN, ANGLE_MAX);
        if let Some(&prev) = self.last_written.get(&joint) {
            if (angle - prev).abs() < self.config.inert_band {
                return;
            }
        }
        match self.bus.write(joint, angle) {
            Ok(()) => {
                self.last_written.insert(joint, angle);
            }
            Err(e) => warn!(%joint, angle, error = %e, "servo write failed"),
        }
    }

    /// Commands the linked arm pair: θ on the left, 180−θ on the right.
    fn command_arm(&mut self, angle: f32) {
        self.command(Joint::ArmLeft, angle);
        self.command(Joint::ArmRight, ANGLE_MAX - angle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetrack_env::EnvError;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct RecordingBus {
        writes: Arc<Mutex<Vec<(Joint, f32)>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl ServoBus for RecordingBus {
        fn write(&mut self, joint: Joint, angle: f32) -> Result<(), EnvError> {
            if *self.fail.lock() {
                return Err(EnvError::servo(joint, "bus offline"));
            }
            self.writes.lock().push((joint, angle));
            Ok(())
        }
    }

    fn machine(config: ActuatorConfig) -> (ActuatorStateMachine<RecordingBus>, RecordingBus) {
        let bus = RecordingBus::default();
        let m = ActuatorStateMachine::new(config, bus.clone());
        bus.writes.lock().clear(); // drop the startup pose writes
        (m, bus)
    }

    #[test]
    fn test_idle_to_tracking_on_first_target() {
        let (mut m, _bus) = machine(ActuatorConfig::default());
        assert_eq!(m.state(), TrackerState::Idle);
        m.apply(AxisDeltas::ZERO);
        assert_eq!(m.state(), TrackerState::Tracking);
    }

    #[test]
    fn test_saturation_fallback_moves_arm_and_pins_tilt() {
        let config = ActuatorConfig {
            rest: RestPose {
                pan: 90.0,
                tilt: 2.0,
                arm: 90.0,
            },
            arm_step: 1.0,
            ..Default::default()
        };
        let (mut m, bus) = machine(config);

        // Two downward ticks drive tilt exactly to its lower limit
        m.apply(AxisDeltas { pan: 0.0, tilt: -1.0 });
        m.apply(AxisDeltas { pan: 0.0, tilt: -1.0 });
        assert_eq!(m.angles().1, 0.0);
        assert_eq!(m.state(), TrackerState::Tracking);

        // Further downward ticks leave tilt pinned and walk the arm
        m.apply(AxisDeltas { pan: 0.0, tilt: -1.0 });
        m.apply(AxisDeltas { pan: 0.0, tilt: -1.0 });
        let (_, tilt, arm) = m.angles();
        assert_eq!(tilt, 0.0);
        assert_eq!(arm, 88.0);
        assert_eq!(m.state(), TrackerState::SaturatedVertical);

        // The arm pair is mirrored in the same command
        let writes = bus.writes.lock();
        assert!(writes.contains(&(Joint::ArmLeft, 89.0)));
        assert!(writes.contains(&(Joint::ArmRight, 91.0)));
    }

    #[test]
    fn test_saturated_recovers_when_delta_moves_back_in_range() {
        let config = ActuatorConfig {
            rest: RestPose {
                pan: 90.0,
                tilt: 1.0,
                arm: 90.0,
            },
            ..Default::default()
        };
        let (mut m, _bus) = machine(config);

        m.apply(AxisDeltas { pan: 0.0, tilt: -1.0 });
        m.apply(AxisDeltas { pan: 0.0, tilt: -1.0 });
        assert_eq!(m.state(), TrackerState::SaturatedVertical);

        m.apply(AxisDeltas { pan: 0.0, tilt: 0.5 });
        assert_eq!(m.state(), TrackerState::Tracking);
        assert_eq!(m.angles().1, 0.5);
    }

    #[test]
    fn test_arm_saturates_without_further_fallback() {
        let config = ActuatorConfig {
            rest: RestPose {
                pan: 90.0,
                tilt: 0.0,
                arm: 1.0,
            },
            arm_step: 1.0,
            ..Default::default()
        };
        let (mut m, _bus) = machine(config);

        for _ in 0..5 {
            m.apply(AxisDeltas { pan: 0.0, tilt: -1.0 });
        }
        let (pan, tilt, arm) = m.angles();
        assert_eq!(arm, 0.0);
        assert_eq!(tilt, 0.0);
        assert_eq!(pan, 90.0); // nothing redirected to pan
    }

    #[test]
    fn test_neutral_return_interpolates_to_rest() {
        let config = ActuatorConfig {
            rest: RestPose {
                pan: 95.0,
                tilt: 120.0,
                arm: 90.0,
            },
            neutral_steps: 4,
            ..Default::default()
        };
        let (mut m, _bus) = machine(config);
        m.apply(AxisDeltas { pan: 2.0, tilt: -4.0 });

        m.begin_neutral_return();
        assert_eq!(m.state(), TrackerState::ReturningToNeutral);

        let mut steps = 0;
        while m.neutral_step() {
            steps += 1;
        }
        assert_eq!(steps + 1, 4);
        assert_eq!(m.angles(), (95.0, 120.0, 90.0));

        // Terminal: further deltas are ignored
        m.apply(AxisDeltas { pan: 5.0, tilt: 5.0 });
        assert_eq!(m.angles(), (95.0, 120.0, 90.0));
        assert_eq!(m.state(), TrackerState::ReturningToNeutral);
    }

    #[test]
    fn test_inert_band_skips_write_but_not_transitions() {
        let config = ActuatorConfig {
            inert_band: 1.0,
            ..Default::default()
        };
        let (mut m, bus) = machine(config);

        m.apply(AxisDeltas { pan: 0.3, tilt: 0.0 });
        // Angle state advanced, hardware write suppressed
        assert_eq!(m.state(), TrackerState::Tracking);
        assert!((m.angles().0 - 95.3).abs() < 1e-4);
        assert!(bus.writes.lock().is_empty());

        // Accumulated motion beyond the band reaches the bus
        for _ in 0..4 {
            m.apply(AxisDeltas { pan: 0.3, tilt: 0.0 });
        }
        assert!(!bus.writes.lock().is_empty());
    }

    #[test]
    fn test_failed_write_does_not_panic_or_stall() {
        let (mut m, bus) = machine(ActuatorConfig::default());
        *bus.fail.lock() = true;
        m.apply(AxisDeltas { pan: 2.0, tilt: 2.0 });
        assert_eq!(m.state(), TrackerState::Tracking);

        *bus.fail.lock() = false;
        m.apply(AxisDeltas { pan: 2.0, tilt: 2.0 });
        assert!(!bus.writes.lock().is_empty());
    }
}
