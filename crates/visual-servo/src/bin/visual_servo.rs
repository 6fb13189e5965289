use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::LevelFilter;
use nalgebra::Point2;
use serde::Serialize;

use visual_servo::calib::CalibrationMapper;
use visual_servo::core::{PixelRect, TraceLog};
use visual_servo::frame::load_hsv_frame;
use visual_servo::robot::sim::{SimBus, SimPwm, SimSession};
use visual_servo::robot::{
    monitor_channel, spawn_monitor, Behavior, ControlLoop, HardwareError, LoopConfig, LoopReport,
    Robot, RobotConfig,
};
use visual_servo::tracker::{ColorTracker, TrackerParams};

#[derive(Parser, Debug)]
#[command(name = "visual-servo")]
#[command(about = "Color tracking, ground-plane calibration and a simulated robot loop")]
struct Cli {
    /// Log level for stderr output.
    #[arg(long, global = true, default_value = "warn")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Track a colored target in an image and print a JSON report.
    Track {
        #[arg(long)]
        image: PathBuf,
        /// Tracker parameters as JSON.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Target color as h,s,v (OpenCV 8-bit scale).
        #[arg(long, value_parser = parse_triple)]
        target: Option<[f64; 3]>,
        /// Per-channel tolerance as h,s,v.
        #[arg(long, value_parser = parse_triple)]
        tolerance: Option<[f64; 3]>,
        /// Number of ground-contact points to report.
        #[arg(long, default_value_t = 0)]
        contacts: usize,
        /// Calibration JSON; adds ground-plane coordinates to the report.
        #[arg(long)]
        calibration: Option<PathBuf>,
    },
    /// Derive a calibration from four image points and store it.
    Calibrate {
        /// Image point as x,y; give exactly four, in corner order.
        #[arg(long = "point", value_parser = parse_point, required = true)]
        points: Vec<[f64; 2]>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Run the control loop against the simulated robot board.
    Simulate {
        #[arg(long, default_value_t = 10)]
        cycles: u64,
        /// Fail every n-th bus transaction with a lost connection.
        #[arg(long)]
        fail_every: Option<u64>,
        /// Sensor status byte reported by the simulated board.
        #[arg(long, default_value_t = 42)]
        status: u8,
        #[arg(long, default_value_t = 100)]
        sleep_ms: u64,
        /// Trace file for the loop.
        #[arg(long)]
        trace: Option<PathBuf>,
    },
}

fn parse_numbers<const N: usize>(s: &str) -> Result<[f64; N], String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("{v:?}: {e}")))
        .collect::<Result<_, _>>()?;
    values
        .try_into()
        .map_err(|v: Vec<f64>| format!("expected {N} comma-separated numbers, got {}", v.len()))
}

fn parse_triple(s: &str) -> Result<[f64; 3], String> {
    parse_numbers::<3>(s)
}

fn parse_point(s: &str) -> Result<[f64; 2], String> {
    parse_numbers::<2>(s)
}

#[derive(Debug, Serialize)]
struct TrackReport {
    image: String,
    width: usize,
    height: usize,
    contours: usize,
    centroid: Option<[i32; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    centroid_world: Option<[f64; 2]>,
    contacts: Vec<Option<[i32; 2]>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    contacts_world: Vec<Option<[f64; 2]>>,
    bounding_rects: Vec<PixelRect>,
    error: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_level)?;

    match cli.command {
        Commands::Track {
            image,
            config,
            target,
            tolerance,
            contacts,
            calibration,
        } => run_track(&image, config, target, tolerance, contacts, calibration),
        Commands::Calibrate { points, out } => run_calibrate(&points, &out),
        Commands::Simulate {
            cycles,
            fail_every,
            status,
            sleep_ms,
            trace,
        } => run_simulate(cycles, fail_every, status, sleep_ms, trace),
    }
}

#[cfg(not(feature = "tracing"))]
fn init_logging(level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    visual_servo::core::init_with_level(level)?;
    Ok(())
}

#[cfg(feature = "tracing")]
fn init_logging(_level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    visual_servo::core::init_tracing(false);
    Ok(())
}

fn run_track(
    image: &Path,
    config: Option<PathBuf>,
    target: Option<[f64; 3]>,
    tolerance: Option<[f64; 3]>,
    contacts: usize,
    calibration: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut params = match config {
        Some(path) => serde_json::from_str::<TrackerParams>(&std::fs::read_to_string(path)?)?,
        None => TrackerParams::default(),
    };
    if let Some(target) = target {
        params.color.set_target(target);
    }
    if let Some(tolerance) = tolerance {
        params.color.set_tolerance(tolerance);
    }
    let mut mapper = calibration
        .map(CalibrationMapper::load_json)
        .transpose()?;

    let frame = load_hsv_frame(image)?;
    let view = frame.view();
    let mut tracker = ColorTracker::new(params);

    let mut report = TrackReport {
        image: image.display().to_string(),
        width: frame.width,
        height: frame.height,
        contours: 0,
        centroid: None,
        centroid_world: None,
        contacts: Vec::new(),
        contacts_world: Vec::new(),
        bounding_rects: Vec::new(),
        error: None,
    };

    match tracker.center_of_mass(&view) {
        Ok(c) => {
            report.centroid = Some([c.x, c.y]);
            if let Some(mapper) = mapper.as_mut() {
                report.centroid_world = Some(to_world(mapper, c)?);
            }
        }
        Err(err) => report.error = Some(err.to_string()),
    }
    report.contours = tracker.contours().len();
    report.bounding_rects = tracker.bounding_rects().to_vec();

    if contacts > 0 {
        let points = tracker.ground_contacts(&view, contacts);
        report.bounding_rects = tracker.bounding_rects().to_vec();
        if let Some(mapper) = mapper.as_mut() {
            report.contacts_world = points
                .iter()
                .map(|p| p.map(|p| to_world(mapper, p)).transpose())
                .collect::<Result<_, _>>()?;
        }
        report.contacts = points.iter().map(|p| p.map(|p| [p.x, p.y])).collect();
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn to_world(
    mapper: &mut CalibrationMapper,
    p: Point2<i32>,
) -> Result<[f64; 2], visual_servo::calib::CalibrationError> {
    let w = mapper.image_to_world(Point2::new(p.x as f64, p.y as f64))?;
    Ok([w.x, w.y])
}

fn run_calibrate(points: &[[f64; 2]], out: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if points.len() != visual_servo::calib::NUM_POINTS {
        return Err(format!(
            "expected {} --point values, got {}",
            visual_servo::calib::NUM_POINTS,
            points.len()
        )
        .into());
    }
    let mut mapper = CalibrationMapper::new();
    for (i, [x, y]) in points.iter().enumerate() {
        mapper.add_image_point(i + 1, Point2::new(*x, *y))?;
    }
    let h = mapper.transform()?;
    mapper.write_json(out)?;

    for line in mapper.summary() {
        println!("{line}");
    }
    println!("H = {:?}", h.to_array());
    println!("wrote calibration to {}", out.display());
    Ok(())
}

/// Drives forward in short hops and turns every third cycle.
#[derive(Debug, Default)]
struct DemoBehavior {
    steps: u64,
}

impl Behavior for DemoBehavior {
    fn setup(&mut self, robot: &Robot) -> Result<(), HardwareError> {
        robot.grab(0).map_err(|err| {
            log::warn!("{err}");
            HardwareError::Interrupted
        })
    }

    fn step(&mut self, robot: &Robot) -> Result<(), HardwareError> {
        self.steps += 1;
        if self.steps % 3 == 0 {
            robot.rotate_by(30);
        } else {
            robot.move_by(10);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SimulateSummary {
    cycles: u64,
    interrupted_cycles: u64,
    failed_reads: u64,
    dropped_notifications: u64,
    transactions: usize,
}

fn run_simulate(
    cycles: u64,
    fail_every: Option<u64>,
    status: u8,
    sleep_ms: u64,
    trace: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let bus = SimBus::new();
    bus.set_status(status);
    if let Some(n) = fail_every {
        bus.fail_every(n);
    }
    let session = SimSession::new(bus, SimPwm::new()).with_cycles(cycles);

    let trace = Arc::new(match trace {
        Some(path) => TraceLog::to_file(path),
        None => TraceLog::disabled(),
    });
    let loop_config = LoopConfig {
        cycle_sleep_ms: sleep_ms,
        ..LoopConfig::default()
    };

    let (tx, rx) = monitor_channel(loop_config.monitor_capacity);
    let monitor = spawn_monitor(rx, |n| {
        println!("{{\"status\":{}}}", n.status);
    })?;

    let handle = ControlLoop::new(DemoBehavior::default(), RobotConfig::default(), loop_config, trace)
        .with_monitor(tx)
        .spawn(session)?;
    let (control, session) = handle
        .join()
        .map_err(|_| "control loop thread panicked")?;
    let report: LoopReport = control.report();
    drop(control);
    monitor.join().map_err(|_| "monitor thread panicked")?;

    let summary = SimulateSummary {
        cycles: report.cycles,
        interrupted_cycles: report.interrupted_cycles,
        failed_reads: report.failed_reads,
        dropped_notifications: report.dropped_notifications,
        transactions: session.bus().transactions().len(),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
