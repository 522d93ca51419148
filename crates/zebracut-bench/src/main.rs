//! zebracut-bench: CLI tool for locator tuning and automation dry runs.
//!
//! Two subcommands:
//!
//! - `locate` runs the embryo and scissor locators on a still image,
//!   printing keypoints, per-locator timing and the stage displacement
//!   that would bring the scissor onto the target. Intermediate rasters
//!   can be written out for inspection.
//! - `simulate` drives a complete automation run over simulated devices,
//!   printing the operator messages and the final tally.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin zebracut-bench -- locate [OPTIONS] <IMAGE_PATH>
//! cargo run --release --bin zebracut-bench -- simulate [OPTIONS]
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod png_sink;

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use image::Luma;
use serde::Serialize;
use zebracut_automation::sim::{
    CommandLog, RecordingPacer, ScriptedLocator, SimActuator, SimAxis, SimCamera,
};
use zebracut_automation::{
    AutomationConfig, AutomationController, AutomationEvent, AxisId, Devices, Pacer, RunSummary,
    ThreadPacer, map, spawn_automation,
};
use zebracut_vision::{
    EmbryoLocator, EmbryoStrategy, Frame, GrayImage, IntensitySegmenter, Keypoint, KeypointTag,
    Located, Locator, ScissorLocator, StageImage, TunableParameters, select_target,
};

use crate::png_sink::{PngDirectorySink, write_trace};

/// Fine stage start, mid-travel, in nanometres.
const FINE_START: f64 = 20_000_000.0;
/// Fine stage z start, in nanometres.
const Z_START: f64 = 8_100_000.0;
/// Grid stage start, in millimetres.
const GRID_START: (f64, f64) = (31.0, 7.0);

/// Locator tuning and automation dry runs for zebracut.
#[derive(Parser)]
#[command(name = "zebracut-bench", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run both locators on a still image.
    Locate(LocateArgs),
    /// Run the full automation against simulated devices.
    Simulate(SimulateArgs),
}

/// Locator parameters shared by both subcommands.
#[derive(Args)]
struct ParamArgs {
    /// Embryo localization strategy.
    #[arg(long, value_enum, default_value_t = Strategy::Classical)]
    strategy: Strategy,

    /// Gaussian blur sigma.
    #[arg(long, default_value_t = TunableParameters::DEFAULT_BLUR_SIGMA)]
    blur_sigma: f32,

    /// Canny low threshold.
    #[arg(long, default_value_t = TunableParameters::DEFAULT_CANNY_LOW)]
    canny_low: f32,

    /// Canny high threshold.
    #[arg(long, default_value_t = TunableParameters::DEFAULT_CANNY_HIGH)]
    canny_high: f32,

    /// Camera calibration in millimetres per pixel.
    #[arg(long, default_value_t = TunableParameters::DEFAULT_MM_PER_PIXEL)]
    mm_per_pixel: f64,

    /// Back the learned strategy with the intensity stand-in segmenter.
    #[arg(long)]
    intensity_segmenter: bool,

    /// Full parameter set as a JSON string.
    ///
    /// When provided, the individual parameter flags are ignored. Missing
    /// fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Embryo strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    /// Threshold, morphology, Hough circle and strip centroids.
    Classical,
    /// Segmentation network followed by body-axis sampling.
    Learned,
}

#[derive(Args)]
struct LocateArgs {
    /// Path to the input image (PNG, JPEG, BMP).
    image_path: PathBuf,

    #[command(flatten)]
    params: ParamArgs,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output reports as JSON instead of human-readable text.
    #[arg(long)]
    json: bool,

    /// Write every intermediate raster of the first run to this directory.
    #[arg(long)]
    trace_dir: Option<PathBuf>,
}

#[derive(Args)]
struct SimulateArgs {
    /// Frame shown by the simulated camera. Without it, scripted
    /// locators report fixed keypoints near the frame centre.
    #[arg(long)]
    image: Option<PathBuf>,

    #[command(flatten)]
    params: ParamArgs,

    /// Automation configuration as a JSON file.
    #[arg(long)]
    automation_config: Option<PathBuf>,

    /// Override the number of cells along a row.
    #[arg(long)]
    n1: Option<usize>,

    /// Override the number of rows.
    #[arg(long)]
    n2: Option<usize>,

    /// Sleep for real settle times instead of recording them.
    #[arg(long)]
    real_time: bool,

    /// Save snapshots as PNG files in this directory.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Output the final summary as JSON and suppress progress lines.
    #[arg(long)]
    json: bool,
}

/// Build [`TunableParameters`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn params_from_cli(args: &ParamArgs) -> anyhow::Result<TunableParameters> {
    if let Some(ref json) = args.config_json {
        return serde_json::from_str(json).context("parsing --config-json");
    }

    Ok(TunableParameters {
        embryo_strategy: match args.strategy {
            Strategy::Classical => EmbryoStrategy::Classical,
            Strategy::Learned => EmbryoStrategy::Learned,
        },
        blur_sigma: args.blur_sigma,
        canny_low: args.canny_low,
        canny_high: args.canny_high,
        mm_per_pixel: args.mm_per_pixel,
        ..TunableParameters::default()
    })
}

fn embryo_locator(args: &ParamArgs) -> EmbryoLocator {
    if args.intensity_segmenter {
        EmbryoLocator::with_segmenter(Arc::new(IntensitySegmenter::default()))
    } else {
        EmbryoLocator::new()
    }
}

fn load_gray(path: &std::path::Path) -> anyhow::Result<GrayImage> {
    Ok(image::open(path)
        .with_context(|| format!("reading {}", path.display()))?
        .into_luma8())
}

/// Outcome of one locator call.
#[derive(Serialize)]
struct LocatorReport {
    locator: &'static str,
    duration_ms: f64,
    keypoints: Vec<Keypoint>,
    error: Option<&'static str>,
    message: Option<String>,
    #[serde(skip)]
    trace: Vec<StageImage>,
}

impl LocatorReport {
    fn run(
        locator: &'static str,
        implementation: &dyn Locator,
        frame: &Frame,
        params: &TunableParameters,
    ) -> Self {
        let start = Instant::now();
        let result = implementation.locate(frame, params);
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(Located { keypoints, trace }) => Self {
                locator,
                duration_ms,
                keypoints,
                error: None,
                message: None,
                trace,
            },
            Err(e) => Self {
                locator,
                duration_ms,
                keypoints: Vec::new(),
                error: Some(e.kind()),
                message: Some(e.to_string()),
                trace: Vec::new(),
            },
        }
    }
}

/// Both locators on one frame, plus the resulting stage move.
#[derive(Serialize)]
struct LocateReport {
    run: usize,
    embryo: LocatorReport,
    scissor: LocatorReport,
    target: Option<Keypoint>,
    tool: Option<Keypoint>,
    /// Fine stage displacement in millimetres, `[dx, dy]`.
    displacement_mm: Option<[f64; 2]>,
}

impl LocateReport {
    fn new(
        run: usize,
        frame: &Frame,
        embryo: &dyn Locator,
        params: &TunableParameters,
    ) -> Self {
        let embryo = LocatorReport::run("embryo", embryo, frame, params);
        let scissor = LocatorReport::run("scissor", &ScissorLocator, frame, params);
        let target = embryo
            .error
            .is_none()
            .then(|| select_target(&embryo.keypoints, params).ok())
            .flatten();
        let tool = scissor
            .keypoints
            .iter()
            .rev()
            .find(|k| k.tag == KeypointTag::Tool)
            .copied();
        let displacement_mm = target.zip(tool).map(|(target, tool)| {
            let d = map(&target, &tool, params.mm_per_pixel);
            [d.dx, d.dy]
        });
        Self {
            run,
            embryo,
            scissor,
            target,
            tool,
            displacement_mm,
        }
    }

    fn report(&self) -> String {
        let mut out = String::new();
        for locator in [&self.embryo, &self.scissor] {
            let _ = writeln!(
                out,
                "{:<8} {:>10.3}ms  {}",
                locator.locator,
                locator.duration_ms,
                locator.message.as_deref().unwrap_or("ok"),
            );
            for kp in &locator.keypoints {
                let _ = writeln!(out, "           {:<9} ({}, {})", kp.tag, kp.x, kp.y);
            }
        }
        match self.displacement_mm {
            Some([dx, dy]) => {
                let _ = write!(out, "move     dx={dx:+.4}mm  dy={dy:+.4}mm");
            }
            None => out.push_str("move     none"),
        }
        out
    }
}

fn locate(args: &LocateArgs) -> anyhow::Result<()> {
    let mut params = params_from_cli(&args.params)?;
    if args.trace_dir.is_some() {
        params.keep_intermediates = true;
    }
    let image = load_gray(&args.image_path)?;

    eprintln!(
        "Image: {} ({}x{})",
        args.image_path.display(),
        image.width(),
        image.height(),
    );
    eprintln!("Params: {params:#?}");
    eprintln!("Runs: {}", args.runs);
    eprintln!();

    let frame = Frame::new(image, 0);
    let embryo = embryo_locator(&args.params);
    let mut reports = Vec::with_capacity(args.runs);

    for run in 0..args.runs {
        if args.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, args.runs);
        }

        let report = LocateReport::new(run, &frame, &embryo, &params);
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("{}", report.report());
        }

        // Intermediates of the first run only.
        if run == 0
            && let Some(ref dir) = args.trace_dir
        {
            let written = write_trace(dir, "embryo", &report.embryo.trace)?
                + write_trace(dir, "scissor", &report.scissor.trace)?;
            eprintln!("{written} stage images written to {}", dir.display());
        }

        reports.push(report);

        if args.runs > 1 {
            eprintln!();
        }
    }

    if args.runs > 1 {
        print_multi_run_summary(&reports);
    }
    Ok(())
}

/// Print per-locator timing statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(reports: &[LocateReport]) {
    println!();
    println!("Summary ({} runs)\n{}", reports.len(), "=".repeat(60));
    println!("{:<10} {:>12} {:>12} {:>12}", "Locator", "Min (ms)", "Mean (ms)", "Max (ms)");
    println!("{}", "-".repeat(50));

    let extractors: [(&str, fn(&LocateReport) -> f64); 2] = [
        ("embryo", |r| r.embryo.duration_ms),
        ("scissor", |r| r.scissor.duration_ms),
    ];
    for (name, extract) in extractors {
        let durations: Vec<f64> = reports.iter().map(extract).collect();
        if durations.is_empty() {
            continue;
        }
        let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
        let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
        let mean = durations.iter().sum::<f64>() / durations.len() as f64;
        println!("{name:<10} {min:>10.3}ms {mean:>10.3}ms {max:>10.3}ms");
    }
}

/// Tally of a simulated run.
#[derive(Serialize)]
struct SimulationReport {
    #[serde(flatten)]
    summary: RunSummary,
    /// Device commands issued.
    commands: usize,
    /// Settle and development time that a real run would have spent.
    simulated_wait_s: f64,
}

/// Locators that always report the same pair of keypoints near the
/// centre of a `width` by `height` frame.
fn scripted_locators(width: u32, height: u32) -> (ScriptedLocator, ScriptedLocator) {
    let cx = i32::try_from(width / 2).unwrap_or(i32::MAX);
    let cy = i32::try_from(height / 2).unwrap_or(i32::MAX);
    let embryo = Located {
        keypoints: vec![Keypoint::new(cx, cy, KeypointTag::Target)],
        ..Located::default()
    };
    let scissor = Located {
        keypoints: vec![Keypoint::new(cx - 12, cy + 8, KeypointTag::Tool)],
        ..Located::default()
    };
    (
        ScriptedLocator::new(vec![Ok(embryo)]),
        ScriptedLocator::new(vec![Ok(scissor)]),
    )
}

fn print_event(event: &AutomationEvent) {
    match event {
        AutomationEvent::Info(message) => println!("{message}"),
        AutomationEvent::Error(message) => println!("error: {message}"),
        AutomationEvent::Position { axis, position } => println!("  {axis:<8} {position:.3}"),
        AutomationEvent::Keypoints { target, tool } => println!(
            "  target ({}, {})  tool ({}, {})",
            target.x, target.y, tool.x, tool.y
        ),
        AutomationEvent::Annotations(_) | AutomationEvent::Finished | AutomationEvent::Aborted => {}
    }
}

fn simulate(args: &SimulateArgs) -> anyhow::Result<SimulationReport> {
    let params = params_from_cli(&args.params)?;
    let mut config = match args.automation_config {
        Some(ref path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<AutomationConfig>(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => AutomationConfig::default(),
    };
    if let Some(n1) = args.n1 {
        config.grid.n1 = n1;
    }
    if let Some(n2) = args.n2 {
        config.grid.n2 = n2;
    }

    let image = match args.image {
        Some(ref path) => load_gray(path)?,
        None => GrayImage::from_pixel(640, 480, Luma([200])),
    };
    let (width, height) = image.dimensions();

    let log = CommandLog::new();
    let devices = Devices {
        x: Box::new(SimAxis::new(AxisId::X, FINE_START, log.clone())),
        y: Box::new(SimAxis::new(AxisId::Y, FINE_START, log.clone())),
        z: Box::new(SimAxis::new(AxisId::Z, Z_START, log.clone())),
        l1: Box::new(SimAxis::new(AxisId::L1, GRID_START.0, log.clone())),
        l2: Box::new(SimAxis::new(AxisId::L2, GRID_START.1, log.clone())),
        actuator: Box::new(SimActuator::new(log.clone())),
        camera: Arc::new(SimCamera::showing(image, log.clone())),
    };

    let recorder = Arc::new(RecordingPacer::default());
    let pacer: Arc<dyn Pacer> = if args.real_time {
        Arc::new(ThreadPacer)
    } else {
        recorder.clone()
    };
    let (events, rx) = zebracut_automation::events::channel();

    let mut controller = AutomationController::new(config, params, devices)?
        .with_pacer(pacer)
        .with_events(events);
    controller = if args.image.is_some() {
        controller.with_locators(
            Box::new(embryo_locator(&args.params)),
            Box::new(ScissorLocator),
        )
    } else {
        let (embryo, scissor) = scripted_locators(width, height);
        controller.with_locators(Box::new(embryo), Box::new(scissor))
    };
    if let Some(ref dir) = args.snapshot_dir {
        controller = controller.with_snapshots(Box::new(PngDirectorySink::create(dir)?));
    }

    let handle = spawn_automation(controller);
    // Ends once the worker drops its sender.
    for event in rx.iter() {
        if !args.json {
            print_event(&event);
        }
    }
    let summary = handle.join()?;

    Ok(SimulationReport {
        summary,
        commands: log.commands().len(),
        simulated_wait_s: recorder.total().as_secs_f64(),
    })
}

fn print_simulation(report: &SimulationReport) {
    let summary = &report.summary;
    println!();
    println!("Outcome: {:?}", summary.outcome);
    println!("Visited: {}/{}", summary.processed, summary.total);
    println!("Cut:     {}", summary.cut);
    println!("Skipped: {}", summary.failed_total());
    for (kind, count) in &summary.failed {
        println!("  {kind:<28} {count}");
    }
    println!("Commands: {}", report.commands);
    println!("Simulated wait: {:.1}s", report.simulated_wait_s);
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer as _;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let default = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Locate(ref args) => locate(args),
        Command::Simulate(ref args) => simulate(args).and_then(|report| {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_simulation(&report);
            }
            Ok(())
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
