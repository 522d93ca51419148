//! Integration tests: full automation runs over simulated devices.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use zebracut_automation::sim::{
    Command, CommandLog, MemorySink, RecordingPacer, ScriptedLocator, SimActuator, SimAxis,
    SimCamera,
};
use zebracut_automation::{
    AbortHandle, AnnotationBoard, AutomationConfig, AutomationController, AutomationError,
    AutomationEvent, AxisId, Devices, GridConfig, MotionError, RunOutcome, spawn_automation,
};
use zebracut_vision::{GrayImage, Keypoint, KeypointTag, Located, LocatorError, TunableParameters};

const TARGET: Keypoint = Keypoint::new(150, 200, KeypointTag::Target);
const TOOL: Keypoint = Keypoint::new(140, 190, KeypointTag::Tool);

fn located(keypoints: Vec<Keypoint>) -> Result<Located, LocatorError> {
    Ok(Located {
        keypoints,
        trace: Vec::new(),
    })
}

fn embryo_ok() -> Result<Located, LocatorError> {
    located(vec![
        Keypoint::new(150, 210, KeypointTag::Reference),
        Keypoint::new(150, 120, KeypointTag::Reference),
        TARGET,
    ])
}

fn scissor_ok() -> Result<Located, LocatorError> {
    located(vec![TOOL])
}

fn config(n1: usize, n2: usize) -> AutomationConfig {
    AutomationConfig {
        grid: GridConfig {
            n1,
            n2,
            ..GridConfig::default()
        },
        ..AutomationConfig::default()
    }
}

/// Compact, order-preserving description of a command.
fn describe(command: &Command) -> String {
    match command {
        Command::MoveRelative { axis, .. } => format!("rel {axis}"),
        Command::MoveAbsolute { axis, .. } => format!("abs {axis}"),
        Command::Stop { axis } => format!("stop {axis}"),
        Command::Actuate { steps } => format!("act {steps}"),
        Command::StopCapture => "camera stop".to_owned(),
        Command::StartCapture => "camera start".to_owned(),
    }
}

struct Rig {
    log: CommandLog,
    camera: Arc<SimCamera>,
    pacer: Arc<RecordingPacer>,
    abort: AbortHandle,
    annotations: AnnotationBoard,
    sink: MemorySink,
}

impl Rig {
    fn new() -> Self {
        let log = CommandLog::new();
        Self {
            camera: Arc::new(SimCamera::showing(GrayImage::new(64, 64), log.clone())),
            log,
            pacer: Arc::new(RecordingPacer::default()),
            abort: AbortHandle::new(),
            annotations: AnnotationBoard::new(),
            sink: MemorySink::default(),
        }
    }

    fn devices(&self) -> Devices {
        let log = &self.log;
        Devices {
            x: Box::new(SimAxis::new(AxisId::X, 20_000_000.0, log.clone())),
            y: Box::new(SimAxis::new(AxisId::Y, 20_000_000.0, log.clone())),
            z: Box::new(SimAxis::new(AxisId::Z, 8_100_000.0, log.clone())),
            l1: Box::new(SimAxis::new(AxisId::L1, 31.0, log.clone())),
            l2: Box::new(SimAxis::new(AxisId::L2, 7.0, log.clone())),
            actuator: Box::new(SimActuator::new(log.clone())),
            camera: self.camera.clone(),
        }
    }

    fn controller(
        &self,
        config: AutomationConfig,
        devices: Devices,
        embryo: Vec<Result<Located, LocatorError>>,
        scissor: Vec<Result<Located, LocatorError>>,
    ) -> (AutomationController, Receiver<AutomationEvent>) {
        let (events, rx) = zebracut_automation::events::channel();
        let controller = AutomationController::new(config, TunableParameters::default(), devices)
            .unwrap()
            .with_locators(
                Box::new(ScriptedLocator::new(embryo)),
                Box::new(ScriptedLocator::new(scissor)),
            )
            .with_pacer(self.pacer.clone())
            .with_snapshots(Box::new(self.sink.clone()))
            .with_events(events)
            .with_shared_state(self.abort.clone(), self.annotations.clone());
        (controller, rx)
    }

    fn happy(&self, config: AutomationConfig) -> (AutomationController, Receiver<AutomationEvent>) {
        self.controller(config, self.devices(), vec![embryo_ok()], vec![scissor_ok()])
    }

    fn commands(&self) -> Vec<String> {
        self.log.commands().iter().map(describe).collect()
    }
}

#[test]
fn serpentine_grid_cuts_every_specimen() {
    let rig = Rig::new();
    let (mut controller, rx) = rig.happy(config(3, 2));
    let summary = controller.run().unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.total, 6);
    assert_eq!(summary.processed, 6);
    assert_eq!(summary.cut, 6);
    assert_eq!(summary.failed_total(), 0);
    assert_eq!(controller.state().history, vec![(TARGET, TOOL); 6]);

    let grid: Vec<(AxisId, f64)> = rig
        .log
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            Command::MoveRelative { axis, delta, .. } if matches!(axis, AxisId::L1 | AxisId::L2) => {
                Some((axis, delta))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        grid,
        vec![
            (AxisId::L1, 2.0),
            (AxisId::L2, 0.0),
            (AxisId::L1, 2.0),
            (AxisId::L2, 0.0),
            (AxisId::L1, 0.0),
            (AxisId::L2, 2.0),
            (AxisId::L1, -2.0),
            (AxisId::L2, 0.0),
            (AxisId::L1, -2.0),
            (AxisId::L2, 0.0),
        ]
    );

    let messages: Vec<String> = rx
        .try_iter()
        .filter_map(|e| match e {
            AutomationEvent::Info(m) => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(messages.first().map(String::as_str), Some("annotating embryo 1"));
    assert!(messages.iter().any(|m| m == "dissecting embryo 6"));
    assert!(messages.iter().any(|m| m == "going to embryo 6"));
    assert!(!messages.iter().any(|m| m == "going to embryo 7"));
    assert_eq!(messages.last().map(String::as_str), Some("automation is done."));
}

#[test]
fn finished_event_closes_the_run() {
    let rig = Rig::new();
    let (mut controller, rx) = rig.happy(config(2, 1));
    controller.run().unwrap();
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.last(), Some(&AutomationEvent::Finished));
    assert!(rig.annotations.snapshot().is_empty());
}

#[test]
fn recipe_then_restore_in_order() {
    let rig = Rig::new();
    let (mut controller, _rx) = rig.happy(config(1, 1));
    controller.run().unwrap();

    assert_eq!(
        rig.commands(),
        [
            // positioning
            "rel x", "rel y",
            // recipe step 1
            "rel z", "rel y", "act -300", "act 300",
            // recipe step 2
            "rel z", "rel y", "act -300", "act 300",
            // restore
            "abs z", "abs x", "abs y",
        ]
    );

    let commands = rig.log.commands();
    let dx = match commands[0] {
        Command::MoveRelative {
            axis: AxisId::X,
            delta,
            ..
        } => delta,
        _ => f64::NAN,
    };
    // -(150 - 140) px at 1/690 mm/px, in nanometres.
    assert!((dx + 10.0 * 1_000_000.0 / 690.0).abs() < 1e-6, "dx = {dx}");
    assert_eq!(
        commands[10],
        Command::MoveAbsolute {
            axis: AxisId::Z,
            position: 8_100_000.0,
            speed: 800_000.0
        }
    );
}

#[test]
fn release_debris_adds_final_snip() {
    let rig = Rig::new();
    let mut config = config(1, 1);
    config.recipe.release_debris = true;
    let (mut controller, _rx) = rig.happy(config);
    controller.run().unwrap();
    let commands = rig.commands();
    assert_eq!(commands.len(), 15);
    assert_eq!(commands[13..], ["act -300", "act 300"]);
}

#[test]
fn failed_embryo_is_skipped_without_motion() {
    let rig = Rig::new();
    let (mut controller, rx) = rig.controller(
        config(2, 1),
        rig.devices(),
        vec![Err(LocatorError::NoCircleDetected), embryo_ok()],
        vec![scissor_ok()],
    );
    let summary = controller.run().unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.cut, 1);
    assert_eq!(summary.failed.get("no_circle_detected"), Some(&1));
    assert_eq!(controller.state().history.len(), 1);

    // The first specimen issues nothing before the grid step.
    let commands = rig.commands();
    assert_eq!(commands[..3], ["rel l1", "rel l2", "rel x"]);

    // Annotations are cleared right before the failure is reported.
    let events: Vec<_> = rx.try_iter().collect();
    let error_at = events
        .iter()
        .position(|e| matches!(e, AutomationEvent::Error(_)))
        .unwrap();
    assert!(matches!(
        &events[error_at - 1],
        AutomationEvent::Annotations(points) if points.is_empty()
    ));
    assert!(
        !events[..error_at]
            .iter()
            .any(|e| matches!(e, AutomationEvent::Keypoints { .. }))
    );
}

#[test]
fn failed_scissor_is_skipped() {
    let rig = Rig::new();
    let (mut controller, _rx) = rig.controller(
        config(1, 1),
        rig.devices(),
        vec![embryo_ok()],
        vec![Err(LocatorError::ParallelLines)],
    );
    let summary = controller.run().unwrap();
    assert_eq!(summary.failed.get("parallel_lines"), Some(&1));
    assert_eq!(summary.cut, 0);
    assert!(rig.commands().is_empty());
}

#[test]
fn missing_frame_is_a_specimen_failure() {
    let rig = Rig {
        camera: Arc::new(SimCamera::new(CommandLog::new())),
        ..Rig::new()
    };
    let (mut controller, _rx) = rig.happy(config(1, 1));
    let summary = controller.run().unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.failed.get("no_frame"), Some(&1));
    assert!(rig.commands().is_empty());
}

#[test]
fn abort_mid_recipe_leaves_stage_in_place() {
    let rig = Rig::new();
    let (mut controller, rx) = rig.happy(config(2, 1));
    // Stop arrives while the first recipe z move is executing.
    rig.log.abort_after(3, rig.abort.clone());
    let summary = controller.run().unwrap();

    assert_eq!(summary.outcome, RunOutcome::Aborted);
    assert_eq!(summary.cut, 0);
    assert_eq!(rig.commands(), ["rel x", "rel y", "rel z"]);
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.last(), Some(&AutomationEvent::Aborted));
}

#[test]
fn abort_before_start_sends_nothing() {
    let rig = Rig::new();
    let (mut controller, _rx) = rig.happy(config(3, 3));
    rig.abort.abort();
    let summary = controller.run().unwrap();
    assert_eq!(summary.outcome, RunOutcome::Aborted);
    assert_eq!(summary.processed, 0);
    assert!(rig.commands().is_empty());
}

#[test]
fn unreachable_target_skips_cut() {
    let rig = Rig::new();
    let far_tool = Keypoint::new(40_000, 190, KeypointTag::Tool);
    let (mut controller, _rx) = rig.controller(
        config(1, 1),
        rig.devices(),
        vec![embryo_ok()],
        vec![located(vec![far_tool])],
    );
    let summary = controller.run().unwrap();
    assert_eq!(summary.failed.get("axis_unreachable"), Some(&1));
    assert_eq!(summary.cut, 0);
    assert!(rig.commands().is_empty());
}

#[test]
fn rejected_y_move_returns_x_to_start() {
    let rig = Rig::new();
    let low_tool = Keypoint::new(140, 40_000, KeypointTag::Tool);
    let (mut controller, rx) = rig.controller(
        config(1, 1),
        rig.devices(),
        vec![embryo_ok()],
        vec![located(vec![low_tool])],
    );
    let summary = controller.run().unwrap();

    assert_eq!(summary.failed.get("axis_unreachable"), Some(&1));
    assert_eq!(summary.cut, 0);
    assert_eq!(rig.commands(), ["rel x", "abs x"]);
    assert_eq!(
        rig.log.commands()[1],
        Command::MoveAbsolute {
            axis: AxisId::X,
            position: 20_000_000.0,
            speed: 800_000.0
        }
    );
    let last_x = rx
        .try_iter()
        .filter_map(|e| match e {
            AutomationEvent::Position {
                axis: AxisId::X,
                position,
            } => Some(position),
            _ => None,
        })
        .last();
    assert_eq!(last_x, Some(20_000_000.0));
}

#[test]
fn development_wait_pauses_camera_between_rows() {
    let rig = Rig::new();
    let mut config = config(1, 2);
    config.grid.development_wait = Duration::from_secs(1800);
    let (mut controller, _rx) = rig.happy(config);
    controller.run().unwrap();

    let commands = rig.commands();
    let stop = commands.iter().position(|c| c == "camera stop").unwrap();
    assert_eq!(commands[stop..stop + 4], ["camera stop", "camera start", "rel l1", "rel l2"]);
    assert_eq!(commands.iter().filter(|c| *c == "camera stop").count(), 1);
    assert!(rig.pacer.waits().contains(&Duration::from_secs(1800)));
}

#[test]
fn snapshots_are_labelled_per_specimen() {
    let rig = Rig::new();
    let mut config = config(2, 1);
    config.snapshots.located = true;
    let (mut controller, _rx) = rig.happy(config);
    controller.run().unwrap();
    let labels: Vec<String> = rig.sink.saved().into_iter().map(|(l, _)| l).collect();
    assert_eq!(labels, ["1", "1_done", "2", "2_done"]);
}

#[test]
fn grid_out_of_travel_ends_run() {
    let rig = Rig::new();
    let mut devices = rig.devices();
    devices.l1 = Box::new(SimAxis::new(AxisId::L1, 99.0, rig.log.clone()));
    let (mut controller, _rx) = rig.controller(
        config(2, 1),
        devices,
        vec![embryo_ok()],
        vec![scissor_ok()],
    );
    let err = controller.run().unwrap_err();
    assert!(matches!(
        err,
        AutomationError::Grid(MotionError::AxisUnreachable {
            axis: AxisId::L1,
            ..
        })
    ));
}

#[test]
fn device_failure_ends_run() {
    let rig = Rig::new();
    let mut devices = rig.devices();
    let mut x = SimAxis::new(AxisId::X, 20_000_000.0, rig.log.clone());
    x.fail_with(zebracut_automation::DeviceError::Disconnected);
    devices.x = Box::new(x);
    let (mut controller, _rx) =
        rig.controller(config(1, 1), devices, vec![embryo_ok()], vec![scissor_ok()]);
    assert_eq!(
        controller.run(),
        Err(AutomationError::Device(
            zebracut_automation::DeviceError::Disconnected
        ))
    );
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let rig = Rig::new();
    let result =
        AutomationController::new(config(0, 4), TunableParameters::default(), rig.devices());
    assert!(matches!(result, Err(AutomationError::Config(_))));
}

#[test]
fn spawned_run_joins_with_summary() {
    let rig = Rig::new();
    let (controller, _rx) = rig.happy(config(2, 2));
    let handle = spawn_automation(controller);
    let summary = handle.join().unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.cut, 4);
}

#[test]
fn spawned_run_observes_abort() {
    let rig = Rig::new();
    let (controller, _rx) = rig.happy(config(6, 6));
    rig.abort.abort();
    let handle = spawn_automation(controller);
    handle.abort();
    let summary = handle.join().unwrap();
    assert_eq!(summary.outcome, RunOutcome::Aborted);
    assert!(rig.commands().is_empty());
}
