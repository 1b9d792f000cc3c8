//! Background sampler for the peak concurrent connection count.

use crate::bench::stats::TrialStats;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::trace;

/// How often the active-connection count is sampled.
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// Sample `stats` every `interval` until the trial's stop signal is raised.
pub fn spawn(stats: Arc<TrialStats>, interval: Duration) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("connection-monitor".to_string())
        .spawn(move || {
            while !stats.should_stop() {
                let current = stats.sample_peak();
                trace!(active = current, peak = stats.peak(), "Connection sample");
                thread::sleep(interval);
            }
        })
}
