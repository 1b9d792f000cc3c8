//! Trial results and the result file.
//!
//! Each run appends to `log-<YYYY-MM-DD-HH-MM-SS>.txt`: a header block,
//! then one CSV line per trial:
//!
//! ```text
//! Protocol,ClientCount,Timestamp,ThroughputMBps,ConnectionsPerSec,PeakConcurrent,SuccessRate,TotalReqs,SuccessfulReqs,P1,P2,...,P100
//! ```

use crate::bench::percentile::{self, PERCENTILES};
use crate::bench::stats::TrialTotals;
use crate::config::BenchProtocol;
use chrono::Local;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Column header written into the result file.
pub const LINE_FORMAT: &str = "Protocol,ClientCount,Timestamp,ThroughputMBps,ConnectionsPerSec,PeakConcurrent,SuccessRate,TotalReqs,SuccessfulReqs,P1,P2,...,P100";

/// Outcome of one (protocol, client count) trial.
#[derive(Debug, Clone)]
pub struct ScalabilityResult {
    pub protocol: BenchProtocol,
    pub client_count: usize,
    pub timestamp: String,
    pub throughput_mbps: f64,
    /// P1..=P100, non-decreasing.
    pub percentiles: [f64; PERCENTILES],
    pub connections_per_second: f64,
    pub peak_concurrent: usize,
    pub success_rate: f64,
    pub total_requests: usize,
    pub successful_requests: usize,
}

impl ScalabilityResult {
    /// Build the result from a joined trial.
    ///
    /// Only completed round trips are recorded, so total and successful
    /// request counts are the same number, and the success rate is 100
    /// when any request completed and 0 otherwise.
    pub fn from_trial(
        protocol: BenchProtocol,
        client_count: usize,
        latencies: Vec<f64>,
        totals: TrialTotals,
        elapsed: Duration,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let per_sec = |v: f64| if secs > 0.0 { v / secs } else { 0.0 };

        let requests = latencies.len();
        Self {
            protocol,
            client_count,
            timestamp: timestamp(),
            throughput_mbps: per_sec(totals.total_bytes as f64 / (1024.0 * 1024.0)),
            percentiles: percentile::nearest_rank(latencies),
            connections_per_second: per_sec(totals.connections as f64),
            peak_concurrent: totals.peak_active,
            success_rate: if requests > 0 { 100.0 } else { 0.0 },
            total_requests: requests,
            successful_requests: requests,
        }
    }

    /// P50, P95, P99.
    pub fn p50(&self) -> f64 {
        self.percentiles[49]
    }

    pub fn p95(&self) -> f64 {
        self.percentiles[94]
    }

    pub fn p99(&self) -> f64 {
        self.percentiles[98]
    }

    /// One line of the result file, without the trailing newline.
    pub fn to_log_line(&self) -> String {
        let mut line = format!(
            "{},{},{},{:.6},{:.6},{:.6},{:.6},{},{}",
            self.protocol.label(),
            self.client_count,
            self.timestamp,
            self.throughput_mbps,
            self.connections_per_second,
            self.peak_concurrent as f64,
            self.success_rate,
            self.total_requests,
            self.successful_requests,
        );
        for p in &self.percentiles {
            let _ = write!(line, ",{p:.6}");
        }
        line
    }

    /// Console summary.
    pub fn summary(&self) -> String {
        format!(
            "Clients: {}, Throughput: {:.2} MB/s, P50: {:.3}ms, P95: {:.3}ms, P99: {:.3}ms",
            self.client_count,
            self.throughput_mbps,
            self.p50(),
            self.p95(),
            self.p99(),
        )
    }
}

/// Local wall-clock time with milliseconds.
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Appends results to the run's timestamped file.
///
/// If the file cannot be opened the logger stays disabled and the run
/// continues; results still reach the console.
pub struct ResultLogger {
    path: PathBuf,
    file: Option<BufWriter<File>>,
}

impl ResultLogger {
    /// Open `log-<timestamp>.txt` under `dir` for appending.
    pub fn create(dir: &Path) -> Self {
        let name = format!("log-{}.txt", Local::now().format("%Y-%m-%d-%H-%M-%S"));
        let path = dir.join(name);

        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                info!(path = %path.display(), "Logging results");
                Some(BufWriter::new(file))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open log file");
                None
            }
        };

        Self { path, file }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn write_header(&mut self) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        write!(
            file,
            "\n=== SCALABILITY TEST STARTED ===\nTimestamp: {}\nFormat: {}\n\n",
            timestamp(),
            LINE_FORMAT
        )?;
        file.flush()
    }

    pub fn log(&mut self, result: &ScalabilityResult) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        writeln!(file, "{}", result.to_log_line())?;
        file.flush()
    }
}
