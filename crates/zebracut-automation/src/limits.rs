//! Validated motion.
//!
//! Every move the core issues is checked against the axis' safe travel
//! and speed range before the command leaves the process, then followed
//! by a settle wait. Positions are re-read from the device around every
//! move; nothing here caches them.

use serde::{Deserialize, Serialize};

use crate::devices::{AxisId, DeviceError, MotionAxis};
use crate::pacer::{Pacer, settle_time};

/// Safe travel and speed range of one axis, in the axis' own units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    /// Lowest reachable position.
    pub min_position: f64,
    /// Highest reachable position.
    pub max_position: f64,
    /// Lowest accepted speed.
    pub min_speed: f64,
    /// Highest accepted speed.
    pub max_speed: f64,
}

impl AxisLimits {
    /// Check that `target` is reachable at `speed`.
    ///
    /// # Errors
    ///
    /// Returns [`MotionError::AxisUnreachable`] or
    /// [`MotionError::InvalidSpeed`]; nothing is sent to the device.
    pub fn check(&self, axis: AxisId, target: f64, speed: f64) -> Result<(), MotionError> {
        if !(self.min_position..=self.max_position).contains(&target) {
            return Err(MotionError::AxisUnreachable {
                axis,
                target,
                min: self.min_position,
                max: self.max_position,
            });
        }
        if !(self.min_speed..=self.max_speed).contains(&speed) {
            return Err(MotionError::InvalidSpeed {
                axis,
                speed,
                min: self.min_speed,
                max: self.max_speed,
            });
        }
        Ok(())
    }
}

/// A move could not be carried out.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MotionError {
    /// The target lies outside the axis' safe travel.
    #[error("{axis} target {target} is out of reach [{min}, {max}]")]
    AxisUnreachable {
        /// Axis that was asked to move.
        axis: AxisId,
        /// Requested absolute position.
        target: f64,
        /// Lower travel limit.
        min: f64,
        /// Upper travel limit.
        max: f64,
    },

    /// The requested speed is outside the axis' accepted range.
    #[error("{axis} speed {speed} is invalid [{min}, {max}]")]
    InvalidSpeed {
        /// Axis that was asked to move.
        axis: AxisId,
        /// Requested speed.
        speed: f64,
        /// Lower speed limit.
        min: f64,
        /// Upper speed limit.
        max: f64,
    },

    /// The device failed while executing the move.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Speed and settle margin used for a batch of moves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveProfile {
    /// Commanded speed.
    pub speed: f64,
    /// Settle wait is `distance / speed * settle_multiplier`.
    pub settle_multiplier: f64,
}

/// One axis together with its identity and limits.
pub struct GuardedAxis<'a> {
    /// Which axis this is, for errors and events.
    pub id: AxisId,
    /// The device.
    pub axis: &'a mut dyn MotionAxis,
    /// Its safe range.
    pub limits: AxisLimits,
}

impl GuardedAxis<'_> {
    /// Validate and issue a relative move, then wait for it to settle.
    ///
    /// Returns the position read back after the move.
    ///
    /// # Errors
    ///
    /// Returns a [`MotionError`] if validation rejects the move (no
    /// command is sent) or the device fails.
    pub fn move_by(
        &mut self,
        delta: f64,
        profile: MoveProfile,
        pacer: &dyn Pacer,
    ) -> Result<f64, MotionError> {
        let current = self.axis.position()?;
        self.limits.check(self.id, current + delta, profile.speed)?;
        self.axis.move_relative(delta, profile.speed)?;
        pacer.wait(settle_time(delta, profile.speed, profile.settle_multiplier));
        Ok(self.axis.position()?)
    }

    /// Validate and issue an absolute move, then wait for it to settle.
    ///
    /// The settle wait is based on the distance from the position read
    /// just before the move. Returns the position read back afterwards.
    ///
    /// # Errors
    ///
    /// Returns a [`MotionError`] if validation rejects the move (no
    /// command is sent) or the device fails.
    pub fn move_to(
        &mut self,
        target: f64,
        profile: MoveProfile,
        pacer: &dyn Pacer,
    ) -> Result<f64, MotionError> {
        self.limits.check(self.id, target, profile.speed)?;
        let current = self.axis.position()?;
        self.axis.move_absolute(target, profile.speed)?;
        pacer.wait(settle_time(
            target - current,
            profile.speed,
            profile.settle_multiplier,
        ));
        Ok(self.axis.position()?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sim::{Command, CommandLog, RecordingPacer, SimAxis};

    const LIMITS: AxisLimits = AxisLimits {
        min_position: 0.1,
        max_position: 99.9,
        min_speed: 0.0,
        max_speed: 20.0,
    };

    const PROFILE: MoveProfile = MoveProfile {
        speed: 0.8,
        settle_multiplier: 0.2,
    };

    #[test]
    fn check_accepts_bounds_inclusive() {
        assert!(LIMITS.check(AxisId::L1, 0.1, 0.0).is_ok());
        assert!(LIMITS.check(AxisId::L1, 99.9, 20.0).is_ok());
    }

    #[test]
    fn check_rejects_unreachable_target() {
        let err = LIMITS.check(AxisId::L2, 100.0, 1.0).unwrap_err();
        assert_eq!(
            err,
            MotionError::AxisUnreachable {
                axis: AxisId::L2,
                target: 100.0,
                min: 0.1,
                max: 99.9
            }
        );
    }

    #[test]
    fn check_rejects_speed() {
        let err = LIMITS.check(AxisId::L1, 50.0, 25.0).unwrap_err();
        assert!(
            matches!(err, MotionError::InvalidSpeed { speed, .. } if (speed - 25.0).abs() < 1e-12)
        );
    }

    #[test]
    fn relative_move_settles_and_reads_back() {
        let log = CommandLog::new();
        let mut axis = SimAxis::new(AxisId::L1, 10.0, log.clone());
        let pacer = RecordingPacer::default();
        let mut guarded = GuardedAxis {
            id: AxisId::L1,
            axis: &mut axis,
            limits: LIMITS,
        };
        let after = guarded.move_by(2.0, PROFILE, &pacer).unwrap();
        assert!((after - 12.0).abs() < 1e-12);
        assert_eq!(
            log.commands(),
            vec![Command::MoveRelative {
                axis: AxisId::L1,
                delta: 2.0,
                speed: 0.8
            }]
        );
        let waits = pacer.waits();
        assert_eq!(waits.len(), 1);
        assert!((waits[0].as_secs_f64() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rejected_move_sends_nothing() {
        let log = CommandLog::new();
        let mut axis = SimAxis::new(AxisId::L1, 99.0, log.clone());
        let pacer = RecordingPacer::default();
        let mut guarded = GuardedAxis {
            id: AxisId::L1,
            axis: &mut axis,
            limits: LIMITS,
        };
        let err = guarded.move_by(2.0, PROFILE, &pacer).unwrap_err();
        assert!(matches!(err, MotionError::AxisUnreachable { .. }));
        assert!(log.commands().is_empty());
        assert!(pacer.waits().is_empty());
    }

    #[test]
    fn absolute_move_settles_by_distance() {
        let log = CommandLog::new();
        let mut axis = SimAxis::new(AxisId::L2, 20.0, log);
        let pacer = RecordingPacer::default();
        let mut guarded = GuardedAxis {
            id: AxisId::L2,
            axis: &mut axis,
            limits: LIMITS,
        };
        let after = guarded.move_to(16.0, PROFILE, &pacer).unwrap();
        assert!((after - 16.0).abs() < 1e-12);
        assert!((pacer.waits()[0].as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn device_failure_is_propagated() {
        let log = CommandLog::new();
        let mut axis = SimAxis::new(AxisId::X, 10.0, log);
        axis.fail_with(DeviceError::Disconnected);
        let pacer = RecordingPacer::default();
        let mut guarded = GuardedAxis {
            id: AxisId::X,
            axis: &mut axis,
            limits: LIMITS,
        };
        let err = guarded.move_by(1.0, PROFILE, &pacer).unwrap_err();
        assert_eq!(err, MotionError::Device(DeviceError::Disconnected));
    }
}
