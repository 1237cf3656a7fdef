//! Logging setup and run reports
//!
//! `init_tracing` installs a global subscriber from a [`LogConfig`].
//! `RunReport` is the JSON record a refinement run leaves behind.

use crate::config::{LogConfig, SimulationConfig};
use crate::cost::total_cost;
use crate::graph::SocialGraph;
use crate::overlay::{BuildStats, Overlay};
use crate::refinement::RefinementReport;
use crate::routing::mean_lookup_hops;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log appender error: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `config.level`. With a log directory the output goes
/// to daily-rotated files through a non-blocking writer, and the returned
/// guard must be held until exit to flush it. A subscriber that is already
/// installed is left in place.
pub fn init_tracing(config: &LogConfig) -> Result<Option<WorkerGuard>, TelemetryError> {
    let (writer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::Builder::new()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix("social-ring")
                .filename_suffix("log")
                .max_log_files(config.max_files.max(1))
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let _ = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(config.directory.is_none())
                    .with_writer(writer),
            )
            .try_init()
    };

    Ok(guard)
}

/// Global quality figures at one point of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_cost: f64,
    pub mean_lookup_hops: f64,
}

impl MetricsSnapshot {
    pub fn capture(graph: &SocialGraph, overlay: &Overlay, config: &SimulationConfig) -> Self {
        Self {
            total_cost: total_cost(graph, overlay, config.refinement.metric),
            mean_lookup_hops: mean_lookup_hops(graph, overlay),
        }
    }
}

/// Everything worth keeping from one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub config: SimulationConfig,
    pub nodes: usize,
    pub edges: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub overlay: BuildStats,
    pub initial: MetricsSnapshot,
    #[serde(rename = "final")]
    pub final_metrics: MetricsSnapshot,
    pub refinement: RefinementReport,
}

impl RunReport {
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), TelemetryError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TelemetryError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.config.refinement;
        writeln!(f, "\n=== Refinement Results ===")?;
        writeln!(f, "Nodes:            {}", self.nodes)?;
        writeln!(f, "Edges:            {}", self.edges)?;
        writeln!(f, "Peers:            {}", self.config.peers)?;
        writeln!(f, "Links per peer:   {}", self.config.links_per_peer())?;
        writeln!(f, "Scheme / metric:  {} / {}", r.scheme, r.metric)?;
        writeln!(f, "Rounds:           {}", self.refinement.rounds.len())?;
        writeln!(f, "Swaps:            {}", self.refinement.total_swaps())?;
        writeln!(f, "Candidate draws:  {}", self.refinement.total_draws())?;
        writeln!(f)?;
        writeln!(f, "                  initial      final")?;
        writeln!(
            f,
            "Total cost:       {:>10.3} {:>10.3}",
            self.initial.total_cost, self.final_metrics.total_cost
        )?;
        writeln!(
            f,
            "Mean lookup hops: {:>10.3} {:>10.3}",
            self.initial.mean_lookup_hops, self.final_metrics.mean_lookup_hops
        )?;
        write!(f, "Duration:         {} ms", self.duration_ms())
    }
}
