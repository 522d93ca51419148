//! Run configuration for the dissection automation.
//!
//! Defaults reproduce the calibrated instrument: a 6 x 6 embryo array on
//! a 2 mm pitch, a fine stage in nanometres and a grid stage in
//! millimetres. Every struct uses `#[serde(default)]` so a partial JSON
//! document only overrides what it names.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zebracut_vision::TunableParameters;

use crate::limits::{AxisLimits, MoveProfile};
use crate::sequencer::{Recipe, RecipeStep};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// The coarse stage that carries the embryo array from cell to cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Specimens per row (along L1).
    pub n1: usize,
    /// Rows (along L2).
    pub n2: usize,
    /// Pitch along L1, mm.
    pub step_l1: f64,
    /// Pitch along L2, mm.
    pub step_l2: f64,
    /// Travel speed, mm/s.
    pub speed: f64,
    /// Settle wait multiplier.
    pub settle_multiplier: f64,
    /// Pause with the camera stopped at the end of every row.
    #[serde(with = "duration_serde")]
    pub development_wait: Duration,
    /// Safe range for both grid axes.
    pub limits: AxisLimits,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            n1: 6,
            n2: 6,
            step_l1: 2.0,
            step_l2: 2.0,
            speed: 0.8,
            settle_multiplier: 0.2,
            development_wait: Duration::ZERO,
            limits: AxisLimits {
                min_position: 0.1,
                max_position: 99.9,
                min_speed: 0.0,
                max_speed: 20.0,
            },
        }
    }
}

impl GridConfig {
    /// Speed and settle margin for grid moves.
    #[must_use]
    pub const fn profile(&self) -> MoveProfile {
        MoveProfile {
            speed: self.speed,
            settle_multiplier: self.settle_multiplier,
        }
    }
}

/// The fine x/y/z stage that positions the specimen under the scissor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Speed for positioning and cutting moves, nm/s.
    pub speed: f64,
    /// Settle wait multiplier.
    pub settle_multiplier: f64,
    /// Axis units per millimetre (nanometres).
    pub units_per_mm: f64,
    /// Safe range for x, y and z.
    pub limits: AxisLimits,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            speed: 800_000.0,
            settle_multiplier: 1.5,
            units_per_mm: 1_000_000.0,
            limits: AxisLimits {
                min_position: 100_000.0,
                max_position: 39_900_000.0,
                min_speed: 500_000.0,
                max_speed: 20_000_000.0,
            },
        }
    }
}

impl StageConfig {
    /// Speed and settle margin for fine-stage moves.
    #[must_use]
    pub const fn profile(&self) -> MoveProfile {
        MoveProfile {
            speed: self.speed,
            settle_multiplier: self.settle_multiplier,
        }
    }
}

/// The cutting recipe as the operator enters it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeConfig {
    /// Vertical step per cut, micrometres.
    pub delta_z_um: Vec<f64>,
    /// Lateral step per cut, micrometres.
    pub delta_y_um: Vec<f64>,
    /// Close and reopen the scissor once more after restoring.
    pub release_debris: bool,
}

impl Default for RecipeConfig {
    fn default() -> Self {
        Self {
            delta_z_um: vec![420.0, 50.0],
            delta_y_um: vec![0.0, 120.0],
            release_debris: false,
        }
    }
}

/// Scissor actuator stroke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Steps per unit stroke.
    pub steps: i64,
    /// Unit strokes per close (or open).
    pub repeats: i64,
    /// Smallest accepted `steps`.
    pub min_steps: i64,
    /// Largest accepted `steps`.
    pub max_steps: i64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            steps: 100,
            repeats: 3,
            min_steps: 10,
            max_steps: 1000,
        }
    }
}

impl ActuatorConfig {
    /// Total steps for one close (applied negative) or open.
    #[must_use]
    pub const fn increments(&self) -> i64 {
        self.steps * self.repeats
    }
}

/// Which frames are handed to the snapshot sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Save the frame each specimen was located in.
    pub located: bool,
    /// Save a frame after each specimen is finished.
    pub done: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            located: false,
            done: true,
        }
    }
}

/// Everything an automation run needs besides the locator parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Grid stage and traversal.
    pub grid: GridConfig,
    /// Fine stage.
    pub stage: StageConfig,
    /// Cutting recipe.
    pub recipe: RecipeConfig,
    /// Scissor actuator.
    pub actuator: ActuatorConfig,
    /// Snapshot selection.
    pub snapshots: SnapshotConfig,
}

/// A configuration that cannot be run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The grid has no cells.
    #[error("grid must have at least one cell, got {n1} x {n2}")]
    EmptyGrid {
        /// Specimens per row.
        n1: usize,
        /// Rows.
        n2: usize,
    },

    /// A speed is zero, negative or not finite.
    #[error("{name} speed must be positive, got {value}")]
    NonPositiveSpeed {
        /// Which speed.
        name: &'static str,
        /// Offending value.
        value: f64,
    },

    /// A numeric setting is not finite.
    #[error("{name} must be finite, got {value}")]
    NotFinite {
        /// Which setting.
        name: &'static str,
        /// Offending value.
        value: f64,
    },

    /// The recipe's z and y lists differ in length.
    #[error("recipe has {z} z steps but {y} y steps")]
    RecipeLengthMismatch {
        /// Number of z steps.
        z: usize,
        /// Number of y steps.
        y: usize,
    },

    /// The actuator stroke is outside the driver's accepted range.
    #[error("actuator steps {steps} outside [{min}, {max}]")]
    ActuatorSteps {
        /// Requested steps.
        steps: i64,
        /// Lower bound.
        min: i64,
        /// Upper bound.
        max: i64,
    },

    /// Stroke repeat count is zero or negative.
    #[error("actuator repeats must be positive, got {0}")]
    ActuatorRepeats(i64),
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositiveSpeed { name, value })
    }
}

fn finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { name, value })
    }
}

impl AutomationConfig {
    /// Check the configuration before a run starts.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.n1 == 0 || self.grid.n2 == 0 {
            return Err(ConfigError::EmptyGrid {
                n1: self.grid.n1,
                n2: self.grid.n2,
            });
        }
        positive("grid", self.grid.speed)?;
        positive("stage", self.stage.speed)?;
        finite("grid step_l1", self.grid.step_l1)?;
        finite("grid step_l2", self.grid.step_l2)?;
        finite("grid settle_multiplier", self.grid.settle_multiplier)?;
        finite("stage settle_multiplier", self.stage.settle_multiplier)?;
        finite("stage units_per_mm", self.stage.units_per_mm)?;

        let (z, y) = (self.recipe.delta_z_um.len(), self.recipe.delta_y_um.len());
        if z != y {
            return Err(ConfigError::RecipeLengthMismatch { z, y });
        }
        for &d in self.recipe.delta_z_um.iter().chain(&self.recipe.delta_y_um) {
            finite("recipe step", d)?;
        }

        let a = &self.actuator;
        if !(a.min_steps..=a.max_steps).contains(&a.steps) {
            return Err(ConfigError::ActuatorSteps {
                steps: a.steps,
                min: a.min_steps,
                max: a.max_steps,
            });
        }
        if a.repeats <= 0 {
            return Err(ConfigError::ActuatorRepeats(a.repeats));
        }
        Ok(())
    }

    /// Recipe converted from micrometres to fine-stage units.
    #[must_use]
    pub fn recipe(&self) -> Recipe {
        let per_um = self.stage.units_per_mm / 1000.0;
        Recipe {
            steps: self
                .recipe
                .delta_z_um
                .iter()
                .zip(&self.recipe.delta_y_um)
                .map(|(&dz, &dy)| RecipeStep {
                    dz: dz * per_um,
                    dy: dy * per_um,
                })
                .collect(),
            release_debris: self.recipe.release_debris,
        }
    }

    /// Fine-stage units per image pixel.
    #[must_use]
    pub fn pixel_scale(&self, params: &TunableParameters) -> f64 {
        params.mm_per_pixel * self.stage.units_per_mm
    }
}
