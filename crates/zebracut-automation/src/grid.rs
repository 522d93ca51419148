//! Serpentine traversal of the embryo array.
//!
//! The grid stage visits row 0 left to right, row 1 right to left, and
//! so on. Each row ends with a step along L2; when a development wait is
//! configured the camera is paused for its duration first.

use serde::{Deserialize, Serialize};

use crate::config::GridConfig;
use crate::devices::{AxisId, Camera, DeviceError, MotionAxis};
use crate::limits::{GuardedAxis, MotionError};
use crate::run_state::StepContext;

/// A cell of the embryo array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GridPosition {
    /// Column along L1.
    pub l1: usize,
    /// Row along L2.
    pub l2: usize,
}

impl GridPosition {
    /// Create a position.
    #[must_use]
    pub const fn new(l1: usize, l2: usize) -> Self {
        Self { l1, l2 }
    }
}

/// What happens after the specimen at a given cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Last cell of the traversal; nothing moves.
    Terminal,
    /// Last cell of a row: step along L2 to `next`.
    EndOfRow {
        /// Cell after the move.
        next: GridPosition,
    },
    /// Step along L1 within the row.
    Within {
        /// Cell after the move.
        next: GridPosition,
        /// `+1` on even rows, `-1` on odd rows.
        direction: i8,
    },
}

/// How a grid advance ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// The stage moved to this cell.
    Moved(GridPosition),
    /// There was nowhere left to go.
    Finished,
    /// A stop was requested before the move.
    Aborted,
    /// The move failed validation; the stage did not move.
    Rejected(MotionError),
}

/// The two grid axes.
pub struct GridAxes<'a> {
    /// Along rows.
    pub l1: &'a mut dyn MotionAxis,
    /// Between rows.
    pub l2: &'a mut dyn MotionAxis,
}

/// Serpentine walker over an `n1 x n2` array.
#[derive(Debug, Clone, PartialEq)]
pub struct GridWalker {
    config: GridConfig,
}

impl GridWalker {
    /// Walker for `config`'s grid.
    #[must_use]
    pub const fn new(config: GridConfig) -> Self {
        Self { config }
    }

    /// Number of cells.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.config.n1 * self.config.n2
    }

    /// Whether the grid has no cells.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    const fn at_row_end(&self, pos: GridPosition) -> bool {
        if pos.l2 % 2 == 0 {
            pos.l1 + 1 >= self.config.n1
        } else {
            pos.l1 == 0
        }
    }

    /// The transition out of `pos`.
    #[must_use]
    pub const fn next(&self, pos: GridPosition) -> Step {
        if self.at_row_end(pos) {
            if pos.l2 + 1 >= self.config.n2 {
                Step::Terminal
            } else {
                Step::EndOfRow {
                    next: GridPosition::new(pos.l1, pos.l2 + 1),
                }
            }
        } else if pos.l2 % 2 == 0 {
            Step::Within {
                next: GridPosition::new(pos.l1 + 1, pos.l2),
                direction: 1,
            }
        } else {
            Step::Within {
                next: GridPosition::new(pos.l1 - 1, pos.l2),
                direction: -1,
            }
        }
    }

    /// Stage displacement `(d_l1, d_l2)` for a step.
    #[must_use]
    pub fn displacement(&self, step: Step) -> (f64, f64) {
        match step {
            Step::Terminal => (0.0, 0.0),
            Step::EndOfRow { .. } => (0.0, self.config.step_l2),
            Step::Within { direction, .. } => (f64::from(direction) * self.config.step_l1, 0.0),
        }
    }

    /// Move the grid stage out of `pos`.
    ///
    /// At the end of a row with a development wait configured, capture is
    /// paused for the wait. Both axes are always commanded, one of them
    /// by zero.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the camera or an axis fails.
    pub fn advance(
        &self,
        pos: GridPosition,
        axes: &mut GridAxes<'_>,
        camera: &dyn Camera,
        cx: StepContext<'_>,
    ) -> Result<Advance, DeviceError> {
        let step = self.next(pos);
        let next = match step {
            Step::Terminal => return Ok(Advance::Finished),
            Step::EndOfRow { next } | Step::Within { next, .. } => next,
        };

        if matches!(step, Step::EndOfRow { .. }) && !self.config.development_wait.is_zero() {
            if cx.abort.is_aborted() {
                return Ok(Advance::Aborted);
            }
            tracing::info!(
                wait_s = self.config.development_wait.as_secs_f64(),
                "development wait"
            );
            camera.stop_capture()?;
            cx.pacer.wait(self.config.development_wait);
            camera.start_capture()?;
        }

        let (d1, d2) = self.displacement(step);
        let profile = self.config.profile();
        let moves = [
            (AxisId::L1, &mut *axes.l1, d1),
            (AxisId::L2, &mut *axes.l2, d2),
        ];
        for (id, axis, delta) in moves {
            if cx.abort.is_aborted() {
                return Ok(Advance::Aborted);
            }
            let mut guarded = GuardedAxis {
                id,
                axis,
                limits: self.config.limits,
            };
            match guarded.move_by(delta, profile, cx.pacer) {
                Ok(position) => cx.events.position(id, position),
                Err(MotionError::Device(e)) => return Err(e),
                Err(e) => return Ok(Advance::Rejected(e)),
            }
        }
        tracing::debug!(l1 = next.l1, l2 = next.l2, "grid advanced");
        Ok(Advance::Moved(next))
    }
}

/// Cells of an `n1 x n2` array in serpentine order.
pub fn cells(n1: usize, n2: usize) -> impl Iterator<Item = GridPosition> {
    (0..n2).flat_map(move |l2| {
        (0..n1).map(move |i| {
            let l1 = if l2 % 2 == 0 { i } else { n1 - 1 - i };
            GridPosition::new(l1, l2)
        })
    })
}
