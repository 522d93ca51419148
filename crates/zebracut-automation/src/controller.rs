//! The dissection state machine.
//!
//! Each specimen goes through `Locate -> Position -> Cut -> Advance`.
//! A specimen that cannot be located or positioned is skipped: the
//! annotations are cleared, an error event is emitted and the grid moves
//! on. A positioning move that was already made is undone first. The stop flag is checked at every state boundary and before every
//! device command inside a state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::Serialize;
use zebracut_vision::{
    EmbryoLocator, Keypoint, KeypointTag, Locator, LocatorError, ScissorLocator,
    TunableParameters, select_target,
};

use crate::config::{AutomationConfig, ConfigError};
use crate::devices::{AxisId, Camera, CuttingActuator, DeviceError, MotionAxis};
use crate::events::{AutomationEvent, EventSender};
use crate::grid::{Advance, GridAxes, GridWalker, Step};
use crate::limits::{GuardedAxis, MotionError};
use crate::mapper::map;
use crate::pacer::{Pacer, ThreadPacer};
use crate::run_state::{AbortHandle, AnnotationBoard, RunState, StepContext};
use crate::sequencer::{CutAxes, CuttingSequencer, InitialPositions, SequenceOutcome};
use crate::snapshot::{NullSink, SnapshotSink};

/// Every device an automation run drives.
pub struct Devices {
    /// Fine stage x.
    pub x: Box<dyn MotionAxis>,
    /// Fine stage y.
    pub y: Box<dyn MotionAxis>,
    /// Fine stage z.
    pub z: Box<dyn MotionAxis>,
    /// Grid stage, along rows.
    pub l1: Box<dyn MotionAxis>,
    /// Grid stage, between rows.
    pub l2: Box<dyn MotionAxis>,
    /// Scissor.
    pub actuator: Box<dyn CuttingActuator>,
    /// Live view.
    pub camera: Arc<dyn Camera>,
}

/// A run could not continue.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AutomationError {
    /// The configuration was rejected before any motion.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A device failed mid-run.
    #[error("device failure: {0}")]
    Device(#[from] DeviceError),

    /// The grid stage cannot reach the next specimen.
    #[error("grid stage cannot advance: {0}")]
    Grid(MotionError),

    /// The automation thread panicked.
    #[error("automation worker panicked")]
    WorkerPanicked,
}

/// Why a specimen was skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecimenFailure {
    /// The camera had not produced a frame.
    NoFrame,
    /// The embryo could not be located.
    Embryo(LocatorError),
    /// The scissor could not be located.
    Scissor(LocatorError),
    /// A positioning or cutting move was rejected.
    Motion(MotionError),
}

impl SpecimenFailure {
    /// Short name used to tally failures.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoFrame => "no_frame",
            Self::Embryo(e) | Self::Scissor(e) => e.kind(),
            Self::Motion(MotionError::AxisUnreachable { .. }) => "axis_unreachable",
            Self::Motion(MotionError::InvalidSpeed { .. }) => "invalid_speed",
            Self::Motion(MotionError::Device(_)) => "device",
        }
    }
}

impl fmt::Display for SpecimenFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFrame => f.write_str("no camera frame available"),
            Self::Embryo(e) => write!(f, "embryo: {e}"),
            Self::Scissor(e) => write!(f, "scissor: {e}"),
            Self::Motion(e) => write!(f, "motion: {e}"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every cell was visited.
    Completed,
    /// The operator stopped the run.
    Aborted,
}

/// Tally of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Cells in the grid.
    pub total: usize,
    /// Specimens visited, whether cut or skipped.
    pub processed: usize,
    /// Specimens whose recipe ran to completion.
    pub cut: usize,
    /// Skipped specimens by failure kind.
    pub failed: BTreeMap<&'static str, usize>,
}

impl RunSummary {
    const fn new(total: usize) -> Self {
        Self {
            outcome: RunOutcome::Completed,
            total,
            processed: 0,
            cut: 0,
            failed: BTreeMap::new(),
        }
    }

    /// Number of skipped specimens.
    #[must_use]
    pub fn failed_total(&self) -> usize {
        self.failed.values().sum()
    }
}

/// Where the state machine is within the current specimen.
#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Locate,
    Position { target: Keypoint, tool: Keypoint },
    Cut { initial: InitialPositions },
    Advance { done_snapshot: bool },
    Done,
    Aborted,
}

/// Drives the grid, the locators and the cutting sequence.
pub struct AutomationController {
    config: AutomationConfig,
    params: TunableParameters,
    devices: Devices,
    embryo: Box<dyn Locator + Send>,
    scissor: Box<dyn Locator + Send>,
    sequencer: CuttingSequencer,
    walker: GridWalker,
    pacer: Arc<dyn Pacer>,
    snapshots: Box<dyn SnapshotSink>,
    events: EventSender,
    state: RunState,
}

impl AutomationController {
    /// Controller with the production locators, real-time waits, no
    /// snapshots and no event receiver.
    ///
    /// # Errors
    ///
    /// Returns [`AutomationError::Config`] if `config` does not validate.
    pub fn new(
        config: AutomationConfig,
        params: TunableParameters,
        devices: Devices,
    ) -> Result<Self, AutomationError> {
        config.validate()?;
        Ok(Self {
            sequencer: CuttingSequencer::from_config(&config),
            walker: GridWalker::new(config.grid.clone()),
            config,
            params,
            devices,
            embryo: Box::new(EmbryoLocator::new()),
            scissor: Box::new(ScissorLocator),
            pacer: Arc::new(ThreadPacer),
            snapshots: Box::new(NullSink),
            events: EventSender::disabled(),
            state: RunState::default(),
        })
    }

    /// Replace both locators.
    #[must_use]
    pub fn with_locators(
        mut self,
        embryo: Box<dyn Locator + Send>,
        scissor: Box<dyn Locator + Send>,
    ) -> Self {
        self.embryo = embryo;
        self.scissor = scissor;
        self
    }

    /// Replace the pacer.
    #[must_use]
    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    /// Replace the snapshot sink.
    #[must_use]
    pub fn with_snapshots(mut self, sink: Box<dyn SnapshotSink>) -> Self {
        self.snapshots = sink;
        self
    }

    /// Publish progress on `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// Share the stop flag and live-view annotations with the caller.
    #[must_use]
    pub fn with_shared_state(mut self, abort: AbortHandle, annotations: AnnotationBoard) -> Self {
        self.state = RunState::new(abort, annotations);
        self
    }

    /// The stop flag for this run.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.state.abort.clone()
    }

    /// Run state, for inspection after [`run`](Self::run) returns.
    #[must_use]
    pub const fn state(&self) -> &RunState {
        &self.state
    }

    /// Visit every cell of the grid.
    ///
    /// # Errors
    ///
    /// Returns an [`AutomationError`] if a device fails or the grid stage
    /// cannot reach the next cell. Specimen failures and operator stops
    /// are not errors.
    pub fn run(&mut self) -> Result<RunSummary, AutomationError> {
        let mut summary = RunSummary::new(self.walker.len());
        tracing::info!(cells = summary.total, "automation started");

        let mut state = State::Locate;
        loop {
            if self.state.aborted() && !matches!(state, State::Done) {
                state = State::Aborted;
            }
            state = match state {
                State::Done => {
                    self.events.info("automation is done.");
                    self.events.emit(AutomationEvent::Finished);
                    return Ok(summary);
                }
                State::Aborted => {
                    self.clear_annotations();
                    self.events.info("automation is stopped.");
                    self.events.emit(AutomationEvent::Aborted);
                    summary.outcome = RunOutcome::Aborted;
                    return Ok(summary);
                }
                State::Locate => self.locate(&mut summary),
                State::Position { target, tool } => self.position(target, tool, &mut summary)?,
                State::Cut { initial } => self.cut(initial, &mut summary)?,
                State::Advance { done_snapshot } => self.advance(done_snapshot, &mut summary)?,
            };
        }
    }

    /// 1-based number of the current specimen, as shown to the operator.
    const fn specimen(&self) -> usize {
        self.state.counter + 1
    }

    fn clear_annotations(&self) {
        self.state.annotations.clear();
        self.events
            .emit(AutomationEvent::Annotations(self.state.annotations.snapshot()));
    }

    fn skip(&self, failure: &SpecimenFailure, summary: &mut RunSummary) -> State {
        self.clear_annotations();
        self.events
            .error(format!("embryo {} skipped: {failure}", self.specimen()));
        *summary.failed.entry(failure.kind()).or_default() += 1;
        State::Advance {
            done_snapshot: false,
        }
    }

    fn locate(&mut self, summary: &mut RunSummary) -> State {
        let n = self.specimen();
        self.clear_annotations();
        self.events.info(format!("annotating embryo {n}"));

        let Some(frame) = self.devices.camera.latest_frame() else {
            return self.skip(&SpecimenFailure::NoFrame, summary);
        };
        if self.config.snapshots.located
            && let Err(e) = self.snapshots.save(&frame, &n.to_string())
        {
            tracing::warn!("{e}");
        }

        let embryo = match self.embryo.locate(&frame, &self.params) {
            Ok(located) => located,
            Err(e) => return self.skip(&SpecimenFailure::Embryo(e), summary),
        };
        let target = match select_target(&embryo.keypoints, &self.params) {
            Ok(target) => target,
            Err(e) => return self.skip(&SpecimenFailure::Embryo(e), summary),
        };

        if self.state.aborted() {
            return State::Aborted;
        }
        let scissor = match self.scissor.locate(&frame, &self.params) {
            Ok(located) => located,
            Err(e) => return self.skip(&SpecimenFailure::Scissor(e), summary),
        };
        let Some(tool) = scissor
            .keypoints
            .iter()
            .rev()
            .find(|k| k.tag == KeypointTag::Tool)
            .copied()
        else {
            let e = LocatorError::TargetOutOfRange {
                index: 1,
                available: 0,
            };
            return self.skip(&SpecimenFailure::Scissor(e), summary);
        };

        let mut points = embryo.keypoints;
        points.extend(scissor.keypoints);
        let shown = self.state.annotations.replace(points);
        self.events.emit(AutomationEvent::Annotations(shown));
        self.events.emit(AutomationEvent::Keypoints { target, tool });
        tracing::debug!(
            target_x = target.x,
            target_y = target.y,
            tool_x = tool.x,
            tool_y = tool.y,
            "specimen located"
        );
        self.state.history.push((target, tool));
        State::Position { target, tool }
    }

    fn position(
        &mut self,
        target: Keypoint,
        tool: Keypoint,
        summary: &mut RunSummary,
    ) -> Result<State, AutomationError> {
        let initial = InitialPositions {
            x: self.devices.x.position()?,
            y: self.devices.y.position()?,
            z: self.devices.z.position()?,
        };
        let d = map(&target, &tool, self.config.pixel_scale(&self.params));
        let profile = self.config.stage.profile();
        let limits = self.config.stage.limits;

        let moves = [
            (AxisId::X, self.devices.x.as_mut(), d.dx),
            (AxisId::Y, self.devices.y.as_mut(), d.dy),
        ];
        let mut rejected = None;
        let mut moved_x = false;
        for (id, axis, delta) in moves {
            if self.state.abort.is_aborted() {
                return Ok(State::Aborted);
            }
            let mut guarded = GuardedAxis { id, axis, limits };
            match guarded.move_by(delta, profile, self.pacer.as_ref()) {
                Ok(position) => {
                    moved_x |= id == AxisId::X;
                    self.events.position(id, position);
                }
                Err(MotionError::Device(e)) => return Err(e.into()),
                Err(e) => {
                    rejected = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = rejected {
            // A rejected y move leaves x displaced; put it back.
            if moved_x {
                if self.state.abort.is_aborted() {
                    return Ok(State::Aborted);
                }
                let mut x = GuardedAxis {
                    id: AxisId::X,
                    axis: self.devices.x.as_mut(),
                    limits,
                };
                match x.move_to(initial.x, profile, self.pacer.as_ref()) {
                    Ok(position) => self.events.position(AxisId::X, position),
                    Err(MotionError::Device(e)) => return Err(e.into()),
                    Err(restore) => tracing::warn!("x not restored: {restore}"),
                }
            }
            return Ok(self.skip(&SpecimenFailure::Motion(e), summary));
        }

        self.events
            .info(format!("dissecting embryo {}", self.specimen()));
        Ok(State::Cut { initial })
    }

    fn cut(
        &mut self,
        initial: InitialPositions,
        summary: &mut RunSummary,
    ) -> Result<State, AutomationError> {
        let cx = StepContext {
            pacer: self.pacer.as_ref(),
            events: &self.events,
            abort: &self.state.abort,
        };
        let mut axes = CutAxes {
            x: self.devices.x.as_mut(),
            y: self.devices.y.as_mut(),
            z: self.devices.z.as_mut(),
            actuator: self.devices.actuator.as_mut(),
        };
        match self.sequencer.run(&mut axes, initial, cx)? {
            SequenceOutcome::Completed => {
                summary.cut += 1;
                Ok(State::Advance {
                    done_snapshot: true,
                })
            }
            SequenceOutcome::Aborted => Ok(State::Aborted),
            SequenceOutcome::Rejected(e) => {
                *summary
                    .failed
                    .entry(SpecimenFailure::Motion(e).kind())
                    .or_default() += 1;
                Ok(State::Advance {
                    done_snapshot: true,
                })
            }
        }
    }

    fn advance(
        &mut self,
        done_snapshot: bool,
        summary: &mut RunSummary,
    ) -> Result<State, AutomationError> {
        let label = format!("{}_done", self.specimen());
        if done_snapshot
            && self.config.snapshots.done
            && let Some(frame) = self.devices.camera.latest_frame()
            && let Err(e) = self.snapshots.save(&frame, &label)
        {
            tracing::warn!("{e}");
        }
        self.clear_annotations();
        summary.processed += 1;
        self.state.counter += 1;

        let here = self.state.position;
        if self.walker.next(here) != Step::Terminal {
            if self.state.aborted() {
                return Ok(State::Aborted);
            }
            self.events
                .info(format!("going to embryo {}", self.specimen()));
        }

        let cx = StepContext {
            pacer: self.pacer.as_ref(),
            events: &self.events,
            abort: &self.state.abort,
        };
        let mut axes = GridAxes {
            l1: self.devices.l1.as_mut(),
            l2: self.devices.l2.as_mut(),
        };
        match self
            .walker
            .advance(here, &mut axes, self.devices.camera.as_ref(), cx)?
        {
            Advance::Moved(next) => {
                self.state.position = next;
                Ok(State::Locate)
            }
            Advance::Finished => Ok(State::Done),
            Advance::Aborted => Ok(State::Aborted),
            Advance::Rejected(e) => {
                self.events.error(format!("grid stage cannot advance: {e}"));
                Err(AutomationError::Grid(e))
            }
        }
    }
}

/// A running automation worker.
#[derive(Debug)]
pub struct AutomationHandle {
    abort: AbortHandle,
    thread: JoinHandle<Result<RunSummary, AutomationError>>,
}

impl AutomationHandle {
    /// Ask the run to stop at the next boundary. Returns immediately.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Whether the worker has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run to end.
    ///
    /// # Errors
    ///
    /// Returns the run's [`AutomationError`], or
    /// [`AutomationError::WorkerPanicked`] if the thread panicked.
    pub fn join(self) -> Result<RunSummary, AutomationError> {
        self.thread
            .join()
            .map_err(|_| AutomationError::WorkerPanicked)?
    }
}

/// Run `controller` on a dedicated thread.
#[must_use]
pub fn spawn_automation(mut controller: AutomationController) -> AutomationHandle {
    let abort = controller.abort_handle();
    let thread = std::thread::spawn(move || {
        let result = controller.run();
        if let Err(e) = &result {
            tracing::error!("automation ended: {e}");
        }
        result
    });
    AutomationHandle { abort, thread }
}
