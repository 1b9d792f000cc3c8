//! Multi-threaded scalability tester.
//!
//! For each protocol and each client count, a trial spawns one thread per
//! simulated client, lets them run for the trial duration, then signals
//! stop, joins everything and turns the shared statistics into a
//! [`ScalabilityResult`]. Every trial gets fresh statistics; nothing
//! carries over between trials.

mod monitor;
mod percentile;
mod report;
mod stats;
mod worker;

pub use report::{ResultLogger, ScalabilityResult};
pub use stats::TrialStats;
pub use worker::WorkerSettings;

use crate::config::{BenchConfig, BenchProtocol};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Stack size for client threads.
const CLIENT_STACK_SIZE: usize = 256 * 1024;

/// Run every configured trial, logging results as they complete.
pub fn run(config: &BenchConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("Network Scalability Testing Framework");
    println!("=====================================");

    let mut logger = ResultLogger::create(&config.output_dir);
    if let Err(e) = logger.write_header() {
        warn!(error = %e, "Failed to write log header");
    }

    let (min, max) = match (config.client_counts.first(), config.client_counts.last()) {
        (Some(min), Some(max)) => (*min, *max),
        _ => return Ok(()),
    };
    println!("Starting scalability tests from {min} to {max} clients...");

    run_series(config, &mut logger, |protocol, count| {
        run_trial(config, protocol, count)
    });

    if logger.is_enabled() {
        println!(
            "Scalability tests completed. Results logged to {}",
            logger.path().display()
        );
    } else {
        println!("Scalability tests completed.");
    }
    Ok(())
}

/// Walk every protocol and client count, running `trial` for each.
///
/// A failed trial is logged and skipped; the series always reaches the
/// last size. Returns the number of trials that produced a result.
fn run_series<F>(config: &BenchConfig, logger: &mut ResultLogger, mut trial: F) -> usize
where
    F: FnMut(BenchProtocol, usize) -> io::Result<ScalabilityResult>,
{
    let mut completed = 0;

    for &protocol in &config.protocols {
        println!("\n=== {} Scalability Test ===", protocol.label());

        for &count in &config.client_counts {
            println!("Testing {} with {} clients...", protocol.label(), count);

            match trial(protocol, count) {
                Ok(result) => {
                    if let Err(e) = logger.log(&result) {
                        warn!(error = %e, "Failed to write result");
                    }
                    println!("{}", result.summary());
                    completed += 1;
                }
                Err(e) => {
                    warn!(
                        protocol = protocol.label(),
                        clients = count,
                        error = %e,
                        "Trial failed, moving to next size"
                    );
                }
            }

            thread::sleep(config.pause);
        }
    }

    completed
}

/// Run one trial of `count` clients speaking `protocol`.
///
/// Returns an error only when the connection monitor cannot be started;
/// a client thread that fails to spawn is logged and skipped.
pub fn run_trial(
    config: &BenchConfig,
    protocol: BenchProtocol,
    count: usize,
) -> io::Result<ScalabilityResult> {
    let settings = Arc::new(WorkerSettings::new(
        protocol,
        config.target(protocol),
        config.payload_size,
    ));
    run_trial_with(config, settings, count)
}

fn run_trial_with(
    config: &BenchConfig,
    settings: Arc<WorkerSettings>,
    count: usize,
) -> io::Result<ScalabilityResult> {
    let stats = Arc::new(TrialStats::with_capacity(count * 64));
    let start = Instant::now();

    let monitor = monitor::spawn(Arc::clone(&stats), monitor::MONITOR_INTERVAL)?;

    let stagger = stagger(config.ramp_up, count);
    let mut clients = Vec::with_capacity(count);
    for id in 0..count {
        let stats = Arc::clone(&stats);
        let settings = Arc::clone(&settings);
        let spawned = thread::Builder::new()
            .name(format!("client-{id}"))
            .stack_size(CLIENT_STACK_SIZE)
            .spawn(move || worker::run(id, &settings, &stats));

        match spawned {
            Ok(handle) => clients.push(handle),
            Err(e) => warn!(client = id, error = %e, "Failed to spawn client thread"),
        }
        if id + 1 < count {
            thread::sleep(stagger);
        }
    }

    thread::sleep(config.trial_duration);
    stats.stop();

    for client in clients {
        if client.join().is_err() {
            warn!("Client thread panicked");
        }
    }
    if monitor.join().is_err() {
        warn!("Connection monitor panicked");
    }

    let elapsed = start.elapsed();
    let totals = stats.totals();
    info!(
        protocol = settings.protocol.label(),
        clients = count,
        requests = stats.request_count(),
        peak = totals.peak_active,
        elapsed_ms = elapsed.as_millis() as u64,
        "Trial complete"
    );

    Ok(ScalabilityResult::from_trial(
        settings.protocol,
        count,
        stats.take_latencies(),
        totals,
        elapsed,
    ))
}

/// Delay between consecutive client starts: the ramp-up spread evenly,
/// at least 1 ms. No delay follows the last client.
fn stagger(ramp_up: Duration, count: usize) -> Duration {
    let per_client = ramp_up.as_millis() as u64 / count.max(1) as u64;
    Duration::from_millis(per_client.max(1))
}
