//! Simulated devices for tests and dry runs.
//!
//! Every simulated device appends the commands it receives to a shared
//! [`CommandLog`], so a test can assert on the exact order of commands
//! across axes, the actuator and the camera. Position reads are not
//! logged.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use zebracut_vision::{Frame, GrayImage, Located, Locator, LocatorError, TunableParameters};

use crate::capture::LatestFrame;
use crate::devices::{AxisId, Camera, CuttingActuator, DeviceError, FrameSource, MotionAxis};
use crate::pacer::Pacer;
use crate::run_state::AbortHandle;
use crate::snapshot::{SnapshotError, SnapshotSink};

/// A command received by a simulated device.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Relative axis move.
    MoveRelative {
        /// Axis.
        axis: AxisId,
        /// Requested displacement.
        delta: f64,
        /// Requested speed.
        speed: f64,
    },
    /// Absolute axis move.
    MoveAbsolute {
        /// Axis.
        axis: AxisId,
        /// Requested position.
        position: f64,
        /// Requested speed.
        speed: f64,
    },
    /// Axis halt.
    Stop {
        /// Axis.
        axis: AxisId,
    },
    /// Actuator move.
    Actuate {
        /// Requested steps, negative closes.
        steps: i64,
    },
    /// Camera paused.
    StopCapture,
    /// Camera resumed.
    StartCapture,
}

#[derive(Debug, Default)]
struct LogState {
    commands: Vec<Command>,
    abort_after: Option<(usize, AbortHandle)>,
}

/// Shared, ordered record of device commands.
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    state: Arc<Mutex<LogState>>,
}

impl CommandLog {
    /// An empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command.
    pub fn record(&self, command: Command) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.commands.push(command);
        if let Some((n, handle)) = &state.abort_after
            && state.commands.len() >= *n
        {
            handle.abort();
        }
    }

    /// Every command so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .commands
            .clone()
    }

    /// Set `handle` once `n` commands have been recorded, simulating an
    /// operator stop while the `n`th command is executing.
    pub fn abort_after(&self, n: usize, handle: AbortHandle) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_after = Some((n, handle));
    }

    /// Count commands matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .commands
            .iter()
            .filter(|c| predicate(c))
            .count()
    }
}

/// An ideal axis: every move lands exactly.
#[derive(Debug)]
pub struct SimAxis {
    id: AxisId,
    position: f64,
    log: CommandLog,
    failure: Option<DeviceError>,
}

impl SimAxis {
    /// Axis `id` starting at `position`.
    #[must_use]
    pub const fn new(id: AxisId, position: f64, log: CommandLog) -> Self {
        Self {
            id,
            position,
            log,
            failure: None,
        }
    }

    /// Make every later call fail with `error`.
    pub fn fail_with(&mut self, error: DeviceError) {
        self.failure = Some(error);
    }

    fn check(&self) -> Result<(), DeviceError> {
        self.failure.clone().map_or(Ok(()), Err)
    }
}

impl MotionAxis for SimAxis {
    fn position(&mut self) -> Result<f64, DeviceError> {
        self.check()?;
        Ok(self.position)
    }

    fn move_relative(&mut self, delta: f64, speed: f64) -> Result<(), DeviceError> {
        self.check()?;
        self.log.record(Command::MoveRelative {
            axis: self.id,
            delta,
            speed,
        });
        self.position += delta;
        Ok(())
    }

    fn move_absolute(&mut self, position: f64, speed: f64) -> Result<(), DeviceError> {
        self.check()?;
        self.log.record(Command::MoveAbsolute {
            axis: self.id,
            position,
            speed,
        });
        self.position = position;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.check()?;
        self.log.record(Command::Stop { axis: self.id });
        Ok(())
    }
}

/// A stepper that tracks its step count.
#[derive(Debug)]
pub struct SimActuator {
    position: i64,
    log: CommandLog,
}

impl SimActuator {
    /// Actuator at step 0.
    #[must_use]
    pub const fn new(log: CommandLog) -> Self {
        Self { position: 0, log }
    }
}

impl CuttingActuator for SimActuator {
    fn move_steps(&mut self, steps: i64) -> Result<(), DeviceError> {
        self.log.record(Command::Actuate { steps });
        self.position += steps;
        Ok(())
    }

    fn position(&mut self) -> Result<i64, DeviceError> {
        Ok(self.position)
    }
}

/// A camera showing whatever frame the test put in front of it.
#[derive(Debug)]
pub struct SimCamera {
    latest: LatestFrame,
    active: AtomicBool,
    log: CommandLog,
}

impl SimCamera {
    /// Active camera with no frame yet.
    #[must_use]
    pub fn new(log: CommandLog) -> Self {
        Self {
            latest: LatestFrame::new(),
            active: AtomicBool::new(true),
            log,
        }
    }

    /// Active camera already showing `image`.
    #[must_use]
    pub fn showing(image: GrayImage, log: CommandLog) -> Self {
        let camera = Self::new(log);
        camera.latest.publish(Frame::new(image, 0));
        camera
    }

    /// The slot frames are read from; publish to change the view.
    #[must_use]
    pub fn slot(&self) -> LatestFrame {
        self.latest.clone()
    }
}

impl Camera for SimCamera {
    fn latest_frame(&self) -> Option<Frame> {
        self.latest.get()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn stop_capture(&self) -> Result<(), DeviceError> {
        self.log.record(Command::StopCapture);
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn start_capture(&self) -> Result<(), DeviceError> {
        self.log.record(Command::StartCapture);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Frame source replaying a fixed list of images.
#[derive(Debug)]
pub struct SimFrameSource {
    frames: VecDeque<GrayImage>,
    repeat: Option<GrayImage>,
    disconnect_when_empty: bool,
}

impl SimFrameSource {
    /// Yield `frames` once each, then nothing.
    #[must_use]
    pub fn new(frames: Vec<GrayImage>) -> Self {
        Self {
            frames: frames.into(),
            repeat: None,
            disconnect_when_empty: false,
        }
    }

    /// Yield `image` forever.
    #[must_use]
    pub fn repeating(image: GrayImage) -> Self {
        Self {
            frames: VecDeque::new(),
            repeat: Some(image),
            disconnect_when_empty: false,
        }
    }

    /// Report [`DeviceError::Disconnected`] once the list runs out.
    #[must_use]
    pub const fn disconnect_when_empty(mut self) -> Self {
        self.disconnect_when_empty = true;
        self
    }
}

impl FrameSource for SimFrameSource {
    fn grab(&mut self, _timeout: Duration) -> Result<Option<GrayImage>, DeviceError> {
        if let Some(image) = self.frames.pop_front() {
            return Ok(Some(image));
        }
        if self.disconnect_when_empty {
            return Err(DeviceError::Disconnected);
        }
        Ok(self.repeat.clone())
    }
}

/// Records waits instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingPacer {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    /// Every wait requested so far.
    #[must_use]
    pub fn waits(&self) -> Vec<Duration> {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sum of all waits.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.waits().iter().sum()
    }
}

impl Pacer for RecordingPacer {
    fn wait(&self, duration: Duration) {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
    }
}

/// Locator returning a scripted result per call.
///
/// Once the script runs out the last result repeats.
#[derive(Debug)]
pub struct ScriptedLocator {
    script: Mutex<VecDeque<Result<Located, LocatorError>>>,
    last: Mutex<Option<Result<Located, LocatorError>>>,
}

impl ScriptedLocator {
    /// Locator answering with `script` in order.
    #[must_use]
    pub fn new(script: Vec<Result<Located, LocatorError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
        }
    }
}

impl Locator for ScriptedLocator {
    fn locate(&self, _frame: &Frame, _params: &TunableParameters) -> Result<Located, LocatorError> {
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(result) = next {
            *last = Some(result);
        }
        last.clone().unwrap_or(Err(LocatorError::NoForegroundArea))
    }
}

/// Snapshot sink that remembers labels and frame sequence numbers.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    saved: Arc<Mutex<Vec<(String, u64)>>>,
}

impl MemorySink {
    /// `(label, frame sequence)` in save order.
    #[must_use]
    pub fn saved(&self) -> Vec<(String, u64)> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotSink for MemorySink {
    fn save(&mut self, frame: &Frame, label: &str) -> Result<(), SnapshotError> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((label.to_owned(), frame.sequence()));
        Ok(())
    }
}
