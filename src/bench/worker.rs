//! Simulated clients.
//!
//! Each worker runs on its own thread: random startup jitter, open one
//! socket for its whole lifetime, then send-wait-receive-sleep until the
//! trial's stop signal is raised. Failures end the worker quietly; it is
//! not restarted and its early exit is not recorded separately.
//!
//! Stream workers block in `read` with no timeout. If the server stops
//! answering, a worker can outlive the nominal trial duration and the
//! trial's join waits for it.

use crate::bench::stats::TrialStats;
use crate::config::BenchProtocol;
use crate::protocols::quic;
use rand::Rng;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::ops::RangeInclusive;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Startup jitter range, in milliseconds.
pub const STARTUP_JITTER_MS: RangeInclusive<u64> = 0..=500;

/// Pause between stream requests, in milliseconds.
pub const STREAM_INTERVAL_MS: RangeInclusive<u64> = 20..=150;

/// Pause between datagram requests, in milliseconds.
pub const DATAGRAM_INTERVAL_MS: RangeInclusive<u64> = 10..=100;

/// Datagram receive timeout; a timed-out request counts as missed.
pub const DATAGRAM_RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Byte every request payload is filled with.
pub const PAYLOAD_BYTE: u8 = b'A';

/// Per-worker behavior for one protocol.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub protocol: BenchProtocol,
    pub target: SocketAddr,
    pub payload_size: usize,
    pub startup_jitter_ms: RangeInclusive<u64>,
    pub interval_ms: RangeInclusive<u64>,
    pub recv_timeout: Duration,
}

impl WorkerSettings {
    /// Defaults for `protocol` against `target`.
    pub fn new(protocol: BenchProtocol, target: SocketAddr, payload_size: usize) -> Self {
        let interval_ms = match protocol {
            BenchProtocol::Tcp => STREAM_INTERVAL_MS,
            BenchProtocol::Udp | BenchProtocol::Quic => DATAGRAM_INTERVAL_MS,
        };
        Self {
            protocol,
            target,
            payload_size,
            startup_jitter_ms: STARTUP_JITTER_MS,
            interval_ms,
            recv_timeout: DATAGRAM_RECV_TIMEOUT,
        }
    }
}

/// Run one simulated client to completion.
pub fn run(id: usize, settings: &WorkerSettings, stats: &TrialStats) {
    let mut rng = rand::thread_rng();
    thread::sleep(Duration::from_millis(
        rng.gen_range(settings.startup_jitter_ms.clone()),
    ));

    match settings.protocol {
        BenchProtocol::Tcp => stream_client(id, settings, stats, &mut rng),
        BenchProtocol::Udp => datagram_client(id, settings, stats, &mut rng, Framing::Raw),
        BenchProtocol::Quic => {
            datagram_client(id, settings, stats, &mut rng, Framing::ConnectionId(id as u32))
        }
    }
}

fn stream_client(id: usize, settings: &WorkerSettings, stats: &TrialStats, rng: &mut impl Rng) {
    let mut stream = match TcpStream::connect(settings.target) {
        Ok(stream) => stream,
        Err(e) => {
            debug!(client = id, error = %e, "Connect failed");
            return;
        }
    };
    let _active = stats.connection_opened();

    let payload = vec![PAYLOAD_BYTE; settings.payload_size];
    let mut buf = vec![0u8; settings.payload_size];

    while !stats.should_stop() {
        let start = Instant::now();

        // One send and one receive per request, as a raw socket client would.
        let sent = match stream.write(&payload) {
            Ok(n) if n > 0 => n,
            Ok(_) => break,
            Err(e) => {
                debug!(client = id, error = %e, "Send failed");
                break;
            }
        };
        let received = match stream.read(&mut buf) {
            Ok(n) if n > 0 => n,
            Ok(_) => break,
            Err(e) => {
                debug!(client = id, error = %e, "Receive failed");
                break;
            }
        };

        stats.record(elapsed_ms(start), (sent + received) as u64);
        pause(settings, rng);
    }
}

/// Request framing for datagram clients.
#[derive(Debug, Clone, Copy)]
enum Framing {
    /// Payload sent as-is; any reply counts.
    Raw,
    /// Payload prefixed with a connection id; only replies echoing the id
    /// count.
    ConnectionId(u32),
}

fn datagram_client(
    id: usize,
    settings: &WorkerSettings,
    stats: &TrialStats,
    rng: &mut impl Rng,
    framing: Framing,
) {
    let local: SocketAddr = match settings.target {
        SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
        SocketAddr::V6(_) => ([0u16; 8], 0).into(),
    };
    let socket = match UdpSocket::bind(local) {
        Ok(socket) => socket,
        Err(e) => {
            debug!(client = id, error = %e, "Bind failed");
            return;
        }
    };
    if let Err(e) = socket.set_read_timeout(Some(settings.recv_timeout)) {
        debug!(client = id, error = %e, "Failed to set receive timeout");
        return;
    }
    let _active = stats.connection_opened();

    let payload = vec![PAYLOAD_BYTE; settings.payload_size];
    let request = match framing {
        Framing::Raw => payload,
        Framing::ConnectionId(conn_id) => quic::encode_request(conn_id, &payload),
    };
    let mut buf = vec![0u8; request.len() + quic::HEADER_LEN];

    while !stats.should_stop() {
        let start = Instant::now();

        if let Ok(sent) = socket.send_to(&request, settings.target) {
            match socket.recv_from(&mut buf) {
                Ok((received, _)) if received > 0 && framing.accepts(&buf[..received]) => {
                    stats.record(elapsed_ms(start), (sent + received) as u64);
                }
                // Timeouts and foreign replies are missed responses.
                _ => {}
            }
        }

        pause(settings, rng);
    }
}

impl Framing {
    fn accepts(self, reply: &[u8]) -> bool {
        match self {
            Framing::Raw => true,
            Framing::ConnectionId(conn_id) => {
                reply.len() >= quic::HEADER_LEN && reply[..4] == conn_id.to_be_bytes()
            }
        }
    }
}

fn pause(settings: &WorkerSettings, rng: &mut impl Rng) {
    let ms = rng.gen_range(settings.interval_ms.clone());
    thread::sleep(Duration::from_millis(ms));
}

/// Round-trip time in milliseconds at microsecond resolution.
fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_micros() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::Arc;

    fn quick(protocol: BenchProtocol, target: SocketAddr) -> WorkerSettings {
        WorkerSettings {
            startup_jitter_ms: 0..=0,
            interval_ms: 1..=2,
            recv_timeout: Duration::from_millis(200),
            ..WorkerSettings::new(protocol, target, 64)
        }
    }

    #[test]
    fn test_default_settings() {
        let target: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let tcp = WorkerSettings::new(BenchProtocol::Tcp, target, 1024);
        assert_eq!(tcp.interval_ms, 20..=150);
        assert_eq!(tcp.startup_jitter_ms, 0..=500);

        let udp = WorkerSettings::new(BenchProtocol::Udp, target, 1024);
        assert_eq!(udp.interval_ms, 10..=100);
        assert_eq!(udp.recv_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_framing_accepts() {
        assert!(Framing::Raw.accepts(b"anything"));

        let framing = Framing::ConnectionId(7);
        assert!(framing.accepts(b"\x00\x00\x00\x07QUIC Echo: hi"));
        assert!(!framing.accepts(b"\x00\x00\x00\x08QUIC Echo: hi"));
        assert!(!framing.accepts(b"\x00\x00\x00\x07"));
    }

    /// Echo listener serving `connections` clients, one thread each.
    fn stream_echo(connections: usize) -> (SocketAddr, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let echoes: Vec<_> = (0..connections)
                .map(|_| {
                    let (mut conn, _) = listener.accept().unwrap();
                    thread::spawn(move || {
                        let mut buf = [0u8; 256];
                        loop {
                            match conn.read(&mut buf) {
                                Ok(0) | Err(_) => break,
                                Ok(n) => {
                                    if conn.write_all(&buf[..n]).is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    })
                })
                .collect();
            for echo in echoes {
                echo.join().unwrap();
            }
        });
        (target, server)
    }

    #[test]
    fn test_stream_client_against_echo() {
        let (target, server) = stream_echo(1);

        let stats = Arc::new(TrialStats::default());
        let settings = quick(BenchProtocol::Tcp, target);
        let worker = {
            let stats = Arc::clone(&stats);
            thread::spawn(move || run(0, &settings, &stats))
        };

        thread::sleep(Duration::from_millis(100));
        stats.stop();
        worker.join().unwrap();
        server.join().unwrap();

        let totals = stats.totals();
        assert_eq!(totals.connections, 1);
        assert_eq!(stats.active(), 0);
        assert!(stats.request_count() > 0);
        assert!(stats.take_latencies().iter().all(|&ms| ms >= 0.0));
    }

    #[test]
    fn test_no_new_requests_after_stop() {
        const WORKERS: usize = 4;
        let (stream_target, server) = stream_echo(WORKERS);
        let datagram_peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let datagram_target = datagram_peer.local_addr().unwrap();
        let datagram_echo = thread::spawn(move || {
            datagram_peer
                .set_read_timeout(Some(Duration::from_millis(300)))
                .unwrap();
            let mut buf = [0u8; 256];
            while let Ok((n, from)) = datagram_peer.recv_from(&mut buf) {
                let _ = datagram_peer.send_to(&buf[..n], from);
            }
        });

        let stats = Arc::new(TrialStats::default());
        let workers: Vec<_> = (0..WORKERS * 2)
            .map(|id| {
                let settings = if id < WORKERS {
                    quick(BenchProtocol::Tcp, stream_target)
                } else {
                    quick(BenchProtocol::Udp, datagram_target)
                };
                let stats = Arc::clone(&stats);
                thread::spawn(move || run(id, &settings, &stats))
            })
            .collect();

        thread::sleep(Duration::from_millis(150));
        stats.stop();
        let at_stop = stats.request_count();
        for worker in workers {
            worker.join().unwrap();
        }
        let after_join = stats.request_count();

        assert!(at_stop > 0);
        // At most the request each worker had in flight completes.
        assert!(
            after_join - at_stop <= WORKERS * 2,
            "{at_stop} at stop, {after_join} after join"
        );

        server.join().unwrap();
        datagram_echo.join().unwrap();
    }

    #[test]
    fn test_stream_client_connect_failure() {
        // Bind then drop to get a port nothing listens on.
        let target = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let stats = TrialStats::default();

        run(0, &quick(BenchProtocol::Tcp, target), &stats);
        assert_eq!(stats.totals().connections, 0);
        assert_eq!(stats.request_count(), 0);
    }

    #[test]
    fn test_datagram_client_times_out_quietly() {
        // A bound socket that never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = silent.local_addr().unwrap();
        let stats = Arc::new(TrialStats::default());
        let settings = quick(BenchProtocol::Udp, target);

        let worker = {
            let stats = Arc::clone(&stats);
            thread::spawn(move || run(0, &settings, &stats))
        };
        thread::sleep(Duration::from_millis(50));
        stats.stop();
        worker.join().unwrap();

        assert_eq!(stats.totals().connections, 1);
        assert_eq!(stats.request_count(), 0);
        assert_eq!(stats.active(), 0);
    }
}
