//! Device collaborator contracts.
//!
//! The dissection core never talks to hardware directly. Stages, the
//! cutting actuator and the camera are reached through the traits below,
//! backed by vendor drivers in production and by [`crate::sim`] in tests
//! and dry runs.
//!
//! Every call blocks until the device reports completion. Drivers that
//! need to poll an "on target" status do so internally.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zebracut_vision::{Frame, GrayImage};

/// Identifies one motion axis of the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisId {
    /// Horizontal stage axis aligned with image columns.
    X,
    /// Horizontal stage axis aligned with image rows.
    Y,
    /// Vertical stage axis.
    Z,
    /// Grid axis stepping between specimens in a row.
    L1,
    /// Grid axis stepping between rows.
    L2,
    /// Cutting actuator, positioned in steps.
    Actuator,
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => f.write_str("x"),
            Self::Y => f.write_str("y"),
            Self::Z => f.write_str("z"),
            Self::L1 => f.write_str("l1"),
            Self::L2 => f.write_str("l2"),
            Self::Actuator => f.write_str("actuator"),
        }
    }
}

/// A device failed to carry out a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The device did not answer in time.
    #[error("device timed out")]
    Timeout,

    /// The connection to the device was lost.
    #[error("device disconnected")]
    Disconnected,

    /// The device refused the command.
    #[error("device rejected command: {0}")]
    Rejected(String),
}

/// A single linear axis.
///
/// Units are whatever the driver reports (nanometres for the fine stage,
/// millimetres for the grid stage); callers keep limits and speeds in the
/// same units.
pub trait MotionAxis: Send {
    /// Current absolute position.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the position cannot be read.
    fn position(&mut self) -> Result<f64, DeviceError>;

    /// Move by `delta` at `speed`, returning once the move completes.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the command fails.
    fn move_relative(&mut self, delta: f64, speed: f64) -> Result<(), DeviceError>;

    /// Move to `position` at `speed`, returning once the move completes.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the command fails.
    fn move_absolute(&mut self, position: f64, speed: f64) -> Result<(), DeviceError>;

    /// Halt any motion in progress.
    ///
    /// The automation never calls this: its moves block until done and a
    /// stop request only prevents the next command. It is here for
    /// operator tooling that halts an axis from outside a run.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the command fails.
    fn stop(&mut self) -> Result<(), DeviceError>;
}

/// The stepper that closes and opens the scissor.
pub trait CuttingActuator: Send {
    /// Move by `steps` (negative closes), returning once done.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the command fails.
    fn move_steps(&mut self, steps: i64) -> Result<(), DeviceError>;

    /// Current step count.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the position cannot be read.
    fn position(&mut self) -> Result<i64, DeviceError>;
}

/// A camera whose newest frame can be read without blocking.
pub trait Camera: Send + Sync {
    /// Newest captured frame, if any has arrived yet. May be stale.
    fn latest_frame(&self) -> Option<Frame>;

    /// Whether frames are currently being captured.
    fn is_active(&self) -> bool;

    /// Pause capture.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the camera cannot be paused.
    fn stop_capture(&self) -> Result<(), DeviceError>;

    /// Resume capture.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the camera cannot be resumed.
    fn start_capture(&self) -> Result<(), DeviceError>;
}

/// Raw frame input polled by [`crate::capture::CaptureWorker`].
pub trait FrameSource: Send {
    /// Wait up to `timeout` for the next frame.
    ///
    /// `Ok(None)` means no frame arrived in time, which is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the sensor fails.
    fn grab(&mut self, timeout: Duration) -> Result<Option<GrayImage>, DeviceError>;
}
