//! Server-side counters.
//!
//! Owned by one `Server` and shared read-only through an `Arc`, so
//! observers can sample them without synchronizing with the event loop.
//! Only the event loop thread writes.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Log a line every this many accepted stream connections.
pub const STREAM_LOG_INTERVAL: u64 = 100;

/// Log a line every this many datagrams handled.
pub const PACKET_LOG_INTERVAL: u64 = 1000;

#[derive(Debug, Default)]
pub struct ServerCounters {
    active_streams: AtomicUsize,
    accepted_streams: AtomicU64,
    datagram_packets: AtomicU64,
    quic_packets: AtomicU64,
    quic_connections: AtomicU64,
    short_quic_datagrams: AtomicU64,
    dropped_echo_bytes: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub active_streams: usize,
    pub accepted_streams: u64,
    pub datagram_packets: u64,
    pub quic_packets: u64,
    pub quic_connections: u64,
    pub short_quic_datagrams: u64,
    pub dropped_echo_bytes: u64,
}

impl ServerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an accepted stream. Returns the total accepted so far.
    pub fn stream_opened(&self) -> u64 {
        self.active_streams.fetch_add(1, Ordering::Relaxed);
        self.accepted_streams.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn stream_closed(&self) {
        self.active_streams.fetch_sub(1, Ordering::Relaxed);
    }

    /// Add echoed datagrams. Returns true when the total crossed a
    /// multiple of [`PACKET_LOG_INTERVAL`].
    pub fn add_datagram_packets(&self, n: usize) -> bool {
        add_crossing(&self.datagram_packets, n as u64, PACKET_LOG_INTERVAL)
    }

    /// Same as [`add_datagram_packets`](Self::add_datagram_packets) for
    /// the pseudo-QUIC socket.
    pub fn add_quic_packets(&self, n: usize) -> bool {
        add_crossing(&self.quic_packets, n as u64, PACKET_LOG_INTERVAL)
    }

    pub fn add_quic_connections(&self, n: usize) {
        self.quic_connections.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_short_quic_datagrams(&self, n: usize) {
        self.short_quic_datagrams.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_dropped_echo_bytes(&self, n: usize) {
        self.dropped_echo_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            active_streams: self.active_streams.load(Ordering::Relaxed),
            accepted_streams: self.accepted_streams.load(Ordering::Relaxed),
            datagram_packets: self.datagram_packets.load(Ordering::Relaxed),
            quic_packets: self.quic_packets.load(Ordering::Relaxed),
            quic_connections: self.quic_connections.load(Ordering::Relaxed),
            short_quic_datagrams: self.short_quic_datagrams.load(Ordering::Relaxed),
            dropped_echo_bytes: self.dropped_echo_bytes.load(Ordering::Relaxed),
        }
    }
}

fn add_crossing(counter: &AtomicU64, n: u64, interval: u64) -> bool {
    if n == 0 {
        return false;
    }
    let before = counter.fetch_add(n, Ordering::Relaxed);
    before / interval != (before + n) / interval
}
