//! transport-bench: echo server and scalability tester
//!
//! Two modes in one binary:
//! - `server`: single-threaded, readiness-driven echo server listening on
//!   a TCP port, a UDP port and a pseudo-QUIC UDP port at once
//! - `bench`: spawns growing numbers of client threads against those
//!   ports and records throughput, connection rate, peak concurrency and
//!   latency percentiles per trial
//!
//! Configuration via CLI arguments or TOML file.

mod bench;
mod config;
mod protocols;
mod runtime;

use config::{Config, Mode};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.mode {
        Mode::Server => run_server(config),
        Mode::Bench => run_bench(config),
    }
}

fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = &config.server;
    info!(
        host = %server.host,
        stream_port = server.stream_port,
        datagram_port = server.datagram_port,
        quic_port = server.quic_port,
        buffer_size = server.buffer_size,
        max_events = server.max_events,
        "Starting echo server"
    );
    runtime::run(server)
}

fn run_bench(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let bench = &config.bench;
    info!(
        stream_target = %bench.stream_target,
        datagram_target = %bench.datagram_target,
        protocols = ?bench.protocols,
        client_counts = ?bench.client_counts,
        trial_secs = bench.trial_duration.as_secs(),
        "Starting scalability tests"
    );
    bench::run(bench)
}
