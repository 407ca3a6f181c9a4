//! Fetch progress reporting.
//!
//! Reports how many query units have finished during `tl run` so users can
//! follow a long multi-month fetch. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a run.
#[derive(Clone, Debug)]
pub enum FetchProgressEvent {
    /// All units were handed to the worker pool.
    Dispatched { total: u64 },
    /// One unit finished, successfully or degraded.
    UnitFinished {
        period: String,
        degraded: bool,
        n: u64,
        total: u64,
    },
}

/// Reports fetch progress. Implementations write to stderr (human or JSON).
pub trait FetchProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the orchestrator's collector.
    fn report(&self, event: FetchProgressEvent);
}

/// Render an event as one human-readable line, e.g.
/// `fetch  2012年03月  ok  3/12 (25%)`.
pub fn human_line(event: &FetchProgressEvent) -> String {
    match event {
        FetchProgressEvent::Dispatched { total } => format!("fetch  {} units queued", total),
        FetchProgressEvent::UnitFinished {
            period,
            degraded,
            n,
            total,
        } => {
            let label = if period.is_empty() { "open range" } else { period.as_str() };
            let status = if *degraded { "degraded" } else { "ok" };
            let percent = if *total == 0 { 100 } else { n * 100 / total };
            format!("fetch  {}  {}  {}/{} ({}%)", label, status, n, total, percent)
        }
    }
}

/// Render an event as one JSON object.
pub fn json_value(event: &FetchProgressEvent) -> serde_json::Value {
    match event {
        FetchProgressEvent::Dispatched { total } => serde_json::json!({
            "event": "progress",
            "phase": "dispatched",
            "total": total
        }),
        FetchProgressEvent::UnitFinished {
            period,
            degraded,
            n,
            total,
        } => serde_json::json!({
            "event": "progress",
            "phase": "fetched",
            "period": period,
            "degraded": degraded,
            "n": n,
            "total": total
        }),
    }
}

fn write_stderr(line: &str) {
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "{}", line);
    let _ = err.flush();
}

/// Human progress on stderr.
pub struct StderrProgress;

impl FetchProgressReporter for StderrProgress {
    fn report(&self, event: FetchProgressEvent) {
        write_stderr(&human_line(&event));
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl FetchProgressReporter for JsonProgress {
    fn report(&self, event: FetchProgressEvent) {
        write_stderr(&json_value(&event).to_string());
    }
}

pub struct NoProgress;

impl FetchProgressReporter for NoProgress {
    fn report(&self, _event: FetchProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn FetchProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
