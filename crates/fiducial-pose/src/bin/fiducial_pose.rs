//! `fiducial-pose` command line.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use fiducial_pose::{load_recording, FrameReport, PipelineConfig, SolveReport};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "fiducial-pose")]
#[command(about = "Relative pose of a fiducial target from keypoint detections")]
#[command(version)]
struct Cli {
    /// Log filter: a level (off, error, warn, info, debug, trace), optionally
    /// followed by per-stage overrides, e.g. `info,telemetry=warn`.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Solve the pose for every frame of a detection recording.
    Solve {
        /// Pipeline configuration (JSON).
        #[arg(long)]
        config: PathBuf,

        /// Recorded keypoint detections (JSON list of frames).
        #[arg(long)]
        detections: PathBuf,

        /// Write the report here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write the reference configuration.
    WriteConfig {
        /// Output path.
        path: PathBuf,
    },
}

fn init_logging(spec: &str) -> CliResult<()> {
    let filter = fiducial_pose::LogFilter::parse(spec);
    #[cfg(feature = "tracing")]
    {
        fiducial_pose::init_tracing(false, Some(&filter.to_directives()));
        // no-op when the subscriber already bridged `log` records
        let _ = tracing_log::LogTracer::init();
    }
    #[cfg(not(feature = "tracing"))]
    fiducial_pose::init_with_filter(filter)?;
    Ok(())
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Solve {
            config,
            detections,
            out,
        } => run_solve(&config, &detections, out.as_deref()),
        Commands::WriteConfig { path } => {
            PipelineConfig::reference().write_json(&path)?;
            log::info!("reference config written to {}", path.display());
            Ok(())
        }
    }
}

fn run_solve(config_path: &Path, detections_path: &Path, out: Option<&Path>) -> CliResult<()> {
    let cfg = PipelineConfig::load_json(config_path)?;
    let estimator = cfg.build_estimator()?;
    let recording = load_recording(detections_path)?;
    log::info!(
        "solving {} frames from {}",
        recording.len(),
        detections_path.display()
    );

    let frames: Vec<FrameReport> = recording
        .iter()
        .map(|f| FrameReport::from_result(f.sequence, estimator.estimate(f.sequence, &f.detections)))
        .collect();

    let report = SolveReport {
        config_path: config_path.to_string_lossy().into_owned(),
        detections_path: detections_path.to_string_lossy().into_owned(),
        frames,
    };
    log::info!("{} of {} frames solved", report.solved(), report.frames.len());

    match out {
        Some(path) => {
            report.write_json(path)?;
            log::info!("report written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
