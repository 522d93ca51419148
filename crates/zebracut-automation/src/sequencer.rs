//! The cutting sequence for one specimen.
//!
//! With the scissor tip on the target, the recipe walks the stage through
//! a few small vertical and lateral steps and snips once per step. The
//! stage is then returned to where it was before positioning so the
//! scissor does not jump when the next specimen is approached.
//!
//! The stop flag is checked before every command. Once it is set no
//! further command is sent, restoring moves included.

use serde::{Deserialize, Serialize};

use crate::config::AutomationConfig;
use crate::devices::{AxisId, CuttingActuator, DeviceError, MotionAxis};
use crate::limits::{AxisLimits, GuardedAxis, MotionError, MoveProfile};
use crate::run_state::StepContext;

/// One recipe step, in fine-stage units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecipeStep {
    /// Vertical move.
    pub dz: f64,
    /// Lateral move.
    pub dy: f64,
}

/// Ordered cutting steps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Recipe {
    /// Steps in execution order.
    pub steps: Vec<RecipeStep>,
    /// Snip once more after restoring to drop debris off the blades.
    pub release_debris: bool,
}

/// Fine-stage positions recorded before the specimen was positioned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialPositions {
    /// x before positioning.
    pub x: f64,
    /// y before positioning.
    pub y: f64,
    /// z before positioning.
    pub z: f64,
}

/// How a cutting sequence ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceOutcome {
    /// Every step ran and the stage was restored.
    Completed,
    /// A stop was requested; the stage was left where it was.
    Aborted,
    /// A move failed validation. Remaining steps were skipped and the
    /// stage was restored as far as possible.
    Rejected(MotionError),
}

/// The devices a cutting sequence drives.
pub struct CutAxes<'a> {
    /// Fine stage x.
    pub x: &'a mut dyn MotionAxis,
    /// Fine stage y.
    pub y: &'a mut dyn MotionAxis,
    /// Fine stage z.
    pub z: &'a mut dyn MotionAxis,
    /// Scissor.
    pub actuator: &'a mut dyn CuttingActuator,
}

enum Halt {
    Aborted,
    Motion(MotionError),
}

impl From<MotionError> for Halt {
    fn from(e: MotionError) -> Self {
        Self::Motion(e)
    }
}

impl From<DeviceError> for Halt {
    fn from(e: DeviceError) -> Self {
        Self::Motion(MotionError::Device(e))
    }
}

fn checkpoint(cx: StepContext<'_>) -> Result<(), Halt> {
    if cx.abort.is_aborted() {
        tracing::info!("stop observed in cutting sequence");
        return Err(Halt::Aborted);
    }
    Ok(())
}

/// Executes a [`Recipe`].
#[derive(Debug, Clone, PartialEq)]
pub struct CuttingSequencer {
    /// Steps to run.
    pub recipe: Recipe,
    /// Speed and settle margin for every stage move.
    pub profile: MoveProfile,
    /// Safe range of x, y and z.
    pub limits: AxisLimits,
    /// Actuator steps per close or open.
    pub increments: i64,
}

impl CuttingSequencer {
    /// Build from a run configuration.
    #[must_use]
    pub fn from_config(config: &AutomationConfig) -> Self {
        Self {
            recipe: config.recipe(),
            profile: config.stage.profile(),
            limits: config.stage.limits,
            increments: config.actuator.increments(),
        }
    }

    /// Run the recipe, restore the stage to `initial`, then optionally
    /// release debris.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if a device fails. Validation failures
    /// and stop requests are reported through [`SequenceOutcome`].
    pub fn run(
        &self,
        axes: &mut CutAxes<'_>,
        initial: InitialPositions,
        cx: StepContext<'_>,
    ) -> Result<SequenceOutcome, DeviceError> {
        let mut rejected = None;
        match self.cut(axes, cx) {
            Ok(()) => {}
            Err(Halt::Aborted) => return Ok(SequenceOutcome::Aborted),
            Err(Halt::Motion(MotionError::Device(e))) => return Err(e),
            Err(Halt::Motion(e)) => {
                cx.events.error(format!("cutting step rejected: {e}"));
                rejected = Some(e);
            }
        }

        match self.restore(axes, initial, cx) {
            Ok(()) => {}
            Err(Halt::Aborted) => return Ok(SequenceOutcome::Aborted),
            Err(Halt::Motion(MotionError::Device(e))) => return Err(e),
            Err(Halt::Motion(e)) => {
                cx.events.error(format!("restoring move rejected: {e}"));
                return Ok(SequenceOutcome::Rejected(rejected.unwrap_or(e)));
            }
        }

        if let Some(e) = rejected {
            return Ok(SequenceOutcome::Rejected(e));
        }

        if self.recipe.release_debris {
            match self.snip(axes.actuator, cx) {
                Ok(()) => {}
                Err(Halt::Aborted) => return Ok(SequenceOutcome::Aborted),
                Err(Halt::Motion(MotionError::Device(e))) => return Err(e),
                Err(Halt::Motion(e)) => return Ok(SequenceOutcome::Rejected(e)),
            }
        }
        Ok(SequenceOutcome::Completed)
    }

    fn cut(&self, axes: &mut CutAxes<'_>, cx: StepContext<'_>) -> Result<(), Halt> {
        for (i, step) in self.recipe.steps.iter().enumerate() {
            tracing::debug!(step = i, dz = step.dz, dy = step.dy, "recipe step");
            checkpoint(cx)?;
            self.relative(AxisId::Z, axes.z, step.dz, cx)?;
            checkpoint(cx)?;
            self.relative(AxisId::Y, axes.y, step.dy, cx)?;
            self.snip(axes.actuator, cx)?;
        }
        Ok(())
    }

    fn restore(
        &self,
        axes: &mut CutAxes<'_>,
        initial: InitialPositions,
        cx: StepContext<'_>,
    ) -> Result<(), Halt> {
        checkpoint(cx)?;
        self.absolute(AxisId::Z, axes.z, initial.z, cx)?;
        checkpoint(cx)?;
        self.absolute(AxisId::X, axes.x, initial.x, cx)?;
        checkpoint(cx)?;
        self.absolute(AxisId::Y, axes.y, initial.y, cx)?;
        Ok(())
    }

    /// Close then open, each behind a stop check.
    #[allow(clippy::cast_precision_loss)]
    fn snip(&self, actuator: &mut dyn CuttingActuator, cx: StepContext<'_>) -> Result<(), Halt> {
        for steps in [-self.increments, self.increments] {
            checkpoint(cx)?;
            actuator.move_steps(steps)?;
            cx.events.position(AxisId::Actuator, actuator.position()? as f64);
        }
        Ok(())
    }

    fn relative(
        &self,
        id: AxisId,
        axis: &mut dyn MotionAxis,
        delta: f64,
        cx: StepContext<'_>,
    ) -> Result<(), Halt> {
        let mut guarded = GuardedAxis {
            id,
            axis,
            limits: self.limits,
        };
        let position = guarded.move_by(delta, self.profile, cx.pacer)?;
        cx.events.position(id, position);
        Ok(())
    }

    fn absolute(
        &self,
        id: AxisId,
        axis: &mut dyn MotionAxis,
        target: f64,
        cx: StepContext<'_>,
    ) -> Result<(), Halt> {
        let mut guarded = GuardedAxis {
            id,
            axis,
            limits: self.limits,
        };
        let position = guarded.move_to(target, self.profile, cx.pacer)?;
        cx.events.position(id, position);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::events::EventSender;
    use crate::pacer::Pacer;
    use crate::run_state::AbortHandle;
    use crate::sim::{Command, CommandLog, RecordingPacer, SimActuator, SimAxis};

    struct Rig {
        log: CommandLog,
        x: SimAxis,
        y: SimAxis,
        z: SimAxis,
        actuator: SimActuator,
        pacer: RecordingPacer,
        events: EventSender,
        abort: AbortHandle,
    }

    impl Rig {
        fn new() -> Self {
            let log = CommandLog::new();
            Self {
                x: SimAxis::new(AxisId::X, 20_000_000.0, log.clone()),
                y: SimAxis::new(AxisId::Y, 20_000_000.0, log.clone()),
                z: SimAxis::new(AxisId::Z, 8_100_000.0, log.clone()),
                actuator: SimActuator::new(log.clone()),
                log,
                pacer: RecordingPacer::default(),
                events: EventSender::disabled(),
                abort: AbortHandle::new(),
            }
        }

        fn run(&mut self, sequencer: &CuttingSequencer) -> SequenceOutcome {
            let initial = InitialPositions {
                x: 19_000_000.0,
                y: 21_000_000.0,
                z: 8_100_000.0,
            };
            let cx = StepContext {
                pacer: &self.pacer as &dyn Pacer,
                events: &self.events,
                abort: &self.abort,
            };
            let mut axes = CutAxes {
                x: &mut self.x,
                y: &mut self.y,
                z: &mut self.z,
                actuator: &mut self.actuator,
            };
            sequencer.run(&mut axes, initial, cx).unwrap()
        }
    }

    fn sequencer() -> CuttingSequencer {
        CuttingSequencer::from_config(&AutomationConfig::default())
    }

    #[test]
    fn default_recipe_command_order() {
        let mut rig = Rig::new();
        assert_eq!(rig.run(&sequencer()), SequenceOutcome::Completed);

        let speed = 800_000.0;
        assert_eq!(
            rig.log.commands(),
            vec![
                Command::MoveRelative {
                    axis: AxisId::Z,
                    delta: 420_000.0,
                    speed
                },
                Command::MoveRelative {
                    axis: AxisId::Y,
                    delta: 0.0,
                    speed
                },
                Command::Actuate { steps: -300 },
                Command::Actuate { steps: 300 },
                Command::MoveRelative {
                    axis: AxisId::Z,
                    delta: 50_000.0,
                    speed
                },
                Command::MoveRelative {
                    axis: AxisId::Y,
                    delta: 120_000.0,
                    speed
                },
                Command::Actuate { steps: -300 },
                Command::Actuate { steps: 300 },
                Command::MoveAbsolute {
                    axis: AxisId::Z,
                    position: 8_100_000.0,
                    speed
                },
                Command::MoveAbsolute {
                    axis: AxisId::X,
                    position: 19_000_000.0,
                    speed
                },
                Command::MoveAbsolute {
                    axis: AxisId::Y,
                    position: 21_000_000.0,
                    speed
                },
            ]
        );
    }

    #[test]
    fn settle_waits_follow_distance() {
        let mut rig = Rig::new();
        rig.run(&sequencer());
        let waits: Vec<f64> = rig.pacer.waits().iter().map(|d| d.as_secs_f64()).collect();
        // z 420 um, y 0, z 50 um, y 120 um, then restores z, x, y.
        let expected = [0.7875, 0.0, 0.09375, 0.225, 0.88125, 1.875, 1.65];
        assert_eq!(waits.len(), expected.len());
        for (got, want) in waits.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{got} != {want}");
        }
    }

    #[test]
    fn release_debris_snips_after_restore() {
        let mut rig = Rig::new();
        let mut seq = sequencer();
        seq.recipe.release_debris = true;
        assert_eq!(rig.run(&seq), SequenceOutcome::Completed);
        let commands = rig.log.commands();
        assert_eq!(
            commands[commands.len() - 2..],
            [Command::Actuate { steps: -300 }, Command::Actuate { steps: 300 }]
        );
    }

    #[test]
    fn abort_before_start_sends_nothing() {
        let mut rig = Rig::new();
        rig.abort.abort();
        assert_eq!(rig.run(&sequencer()), SequenceOutcome::Aborted);
        assert!(rig.log.commands().is_empty());
    }

    #[test]
    fn abort_mid_recipe_skips_restore() {
        let mut rig = Rig::new();
        // Abort while the first z move is in flight.
        rig.log.abort_after(1, rig.abort.clone());
        assert_eq!(rig.run(&sequencer()), SequenceOutcome::Aborted);
        assert_eq!(rig.log.commands().len(), 1);
    }

    #[test]
    fn rejected_step_still_restores() {
        let mut rig = Rig::new();
        let mut seq = sequencer();
        seq.recipe.steps[1].dz = 50_000_000.0;
        let outcome = rig.run(&seq);
        assert!(matches!(
            outcome,
            SequenceOutcome::Rejected(MotionError::AxisUnreachable {
                axis: AxisId::Z,
                ..
            })
        ));
        let commands = rig.log.commands();
        // First step (4 commands) plus the three restores.
        assert_eq!(commands.len(), 7);
        assert!(matches!(
            commands[4],
            Command::MoveAbsolute {
                axis: AxisId::Z,
                ..
            }
        ));
    }

    #[test]
    fn device_failure_is_an_error() {
        let mut rig = Rig::new();
        rig.y.fail_with(DeviceError::Timeout);
        let initial = InitialPositions {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        };
        let cx = StepContext {
            pacer: &rig.pacer,
            events: &rig.events,
            abort: &rig.abort,
        };
        let mut axes = CutAxes {
            x: &mut rig.x,
            y: &mut rig.y,
            z: &mut rig.z,
            actuator: &mut rig.actuator,
        };
        assert_eq!(
            sequencer().run(&mut axes, initial, cx),
            Err(DeviceError::Timeout)
        );
    }
}
