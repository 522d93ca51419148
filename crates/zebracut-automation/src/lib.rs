//! zebracut-automation: the dissection run around the vision pipeline.
//!
//! For every cell of the embryo array the [`AutomationController`]
//! locates the embryo and the scissor in the live frame, moves the fine
//! stage so the scissor tip sits on the target, runs the cutting recipe
//! and steps the grid stage to the next cell in serpentine order.
//!
//! Hardware is reached through the collaborator traits in [`devices`];
//! [`sim`] provides in-memory implementations for tests and dry runs.
//! Progress flows out through the one-way [`events`] channel.

pub mod capture;
pub mod config;
pub mod controller;
pub mod devices;
pub mod events;
pub mod grid;
pub mod limits;
pub mod mapper;
pub mod pacer;
pub mod run_state;
pub mod sequencer;
pub mod sim;
pub mod snapshot;

pub use capture::{CaptureSettings, CaptureWorker, LatestFrame};
pub use config::{
    ActuatorConfig, AutomationConfig, ConfigError, GridConfig, RecipeConfig, SnapshotConfig,
    StageConfig,
};
pub use controller::{
    AutomationController, AutomationError, AutomationHandle, Devices, RunOutcome, RunSummary,
    SpecimenFailure, spawn_automation,
};
pub use devices::{AxisId, Camera, CuttingActuator, DeviceError, FrameSource, MotionAxis};
pub use events::{AutomationEvent, EventSender};
pub use grid::{GridPosition, GridWalker, cells};
pub use limits::{AxisLimits, MotionError};
pub use mapper::{Displacement, map};
pub use pacer::{Pacer, ThreadPacer};
pub use run_state::{AbortHandle, AnnotationBoard, RunState};
pub use sequencer::{CuttingSequencer, InitialPositions, Recipe, RecipeStep, SequenceOutcome};
pub use snapshot::{NullSink, SnapshotError, SnapshotSink};
