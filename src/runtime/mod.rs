//! Readiness-driven runtime for the echo server.
//!
//! A single mio event loop (epoll on Linux, kqueue on macOS) owns the
//! stream listener, the datagram socket, the pseudo-QUIC socket and every
//! accepted stream connection. Shared pieces:
//! - `EndpointRegistry`: slab of sockets keyed by poll token, tagged by kind
//! - `until_would_block`: the accept/receive drain loop
//! - `ServerCounters`: atomics readable from outside the loop

mod counters;
mod drain;
mod endpoint;
mod event_loop;
mod setup;

pub use drain::until_would_block;
pub use event_loop::Server;

use crate::config::ServerConfig;
use tracing::{debug, info, warn};

/// Bind the server and run it until SIGINT or SIGTERM.
///
/// The signal handler wakes the event loop, which closes every socket
/// before `run` returns.
pub fn run(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = Server::bind(config)?;
    let addrs = server.local_addrs();
    debug!(
        stream = %addrs.stream,
        datagram = %addrs.datagram,
        quic = %addrs.quic,
        "All sockets registered"
    );

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        if let Err(e) = shutdown.shutdown() {
            warn!(error = %e, "Failed to wake event loop for shutdown");
        }
    })?;

    let counters = server.counters();
    server.run()?;

    let totals = counters.snapshot();
    info!(
        accepted_streams = totals.accepted_streams,
        active_streams = totals.active_streams,
        datagram_packets = totals.datagram_packets,
        quic_packets = totals.quic_packets,
        quic_connections = totals.quic_connections,
        short_quic_datagrams = totals.short_quic_datagrams,
        dropped_echo_bytes = totals.dropped_echo_bytes,
        "Server stopped"
    );
    Ok(())
}
