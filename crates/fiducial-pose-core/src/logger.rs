//! Stderr logger for the perception process.
//!
//! Records print as `[elapsed LEVEL component] message`. The component is the
//! pipeline stage a record comes from (`solver`, `telemetry`, `pipeline`,
//! `core`), so frame-path and telemetry chatter can be told apart and filtered
//! separately with a [`LogFilter`] such as `info,telemetry=warn`.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Crate prefix to component name, most specific first.
const COMPONENTS: [(&str, &str); 4] = [
    ("fiducial_pose_solver", "solver"),
    ("fiducial_pose_telemetry", "telemetry"),
    ("fiducial_pose_core", "core"),
    ("fiducial_pose", "pipeline"),
];

/// Pipeline stage a log target belongs to, or the target's last path segment
/// for anything outside the workspace.
pub fn component_of(target: &str) -> &str {
    let krate = target.split("::").next().unwrap_or(target);
    COMPONENTS
        .iter()
        .find(|(prefix, _)| *prefix == krate)
        .map(|&(_, name)| name)
        .unwrap_or_else(|| target.rsplit("::").next().unwrap_or(target))
}

/// Default level plus per-component overrides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    pub default: LevelFilter,
    pub components: Vec<(String, LevelFilter)>,
}

impl LogFilter {
    pub fn new(default: LevelFilter) -> Self {
        Self {
            default,
            components: Vec::new(),
        }
    }

    /// Parse `level[,component=level]*`, e.g. `debug,telemetry=warn`.
    ///
    /// Unknown level names fall back to `Info`.
    pub fn parse(spec: &str) -> Self {
        let mut filter = Self::new(LevelFilter::Info);
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('=') {
                Some((component, level)) => filter
                    .components
                    .push((component.trim().to_owned(), parse_level_filter(level))),
                None => filter.default = parse_level_filter(part),
            }
        }
        filter
    }

    /// Effective level for records from `target`.
    pub fn level_for(&self, target: &str) -> LevelFilter {
        let component = component_of(target);
        self.components
            .iter()
            .rev()
            .find(|(name, _)| name == component)
            .map_or(self.default, |&(_, level)| level)
    }

    /// Most verbose level any component may log at.
    pub fn max_level(&self) -> LevelFilter {
        self.components
            .iter()
            .map(|&(_, level)| level)
            .fold(self.default, Ord::max)
    }

    /// The same filter as `tracing` `EnvFilter` directives keyed by crate.
    pub fn to_directives(&self) -> String {
        let mut out = self.default.to_string().to_lowercase();
        for (component, level) in &self.components {
            let target = COMPONENTS
                .iter()
                .find(|(_, name)| name == component)
                .map_or(component.as_str(), |&(krate, _)| krate);
            out.push_str(&format!(",{target}={}", level.to_string().to_lowercase()));
        }
        out
    }
}

struct StderrLogger {
    filter: LogFilter,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.filter.level_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:9.3}s {:>5} {:<9}] {}",
            elapsed,
            record.level(),
            component_of(record.target()),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger. Later calls are no-ops.
pub fn init_with_filter(filter: LogFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let max = filter.max_level();
        let logger = LOGGER.get_or_init(|| StderrLogger {
            filter,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(max);
    }
    Ok(())
}

/// Install the stderr logger with one level for every component.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    init_with_filter(LogFilter::new(level))
}

/// Parse a level name (`off`, `error`, `warn`, `info`, `debug`, `trace`).
///
/// Unknown names fall back to `Info`.
pub fn parse_level_filter(name: &str) -> LevelFilter {
    name.trim().parse().unwrap_or(LevelFilter::Info)
}

/// Install a `tracing` subscriber.
///
/// `directives` are `EnvFilter` directives; `RUST_LOG` wins when set, and
/// `info` is used when neither is given.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, directives: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| directives.and_then(|d| EnvFilter::try_new(d).ok()))
        .unwrap_or_else(|| EnvFilter::new("info"));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}
