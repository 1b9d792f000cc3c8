//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! One thread owns every socket. mio registrations are edge-triggered,
//! so each handler drains its socket until `WouldBlock` before returning.

use crate::config::ServerConfig;
use crate::protocols::echo::{echo_datagrams, echo_stream, StreamStatus};
use crate::protocols::quic::{self, ConnectionTable};
use crate::runtime::counters::{ServerCounters, STREAM_LOG_INTERVAL};
use crate::runtime::endpoint::{Endpoint, EndpointKind, EndpointRegistry};
use crate::runtime::setup::{self, SetupError};
use crate::runtime::until_would_block;
use bytes::BytesMut;
use mio::event::Event;
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Addresses the server actually bound (port 0 resolved).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAddrs {
    pub stream: SocketAddr,
    pub datagram: SocketAddr,
    pub quic: SocketAddr,
}

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the event loop to clean up and return from `run`.
    pub fn shutdown(&self) -> io::Result<()> {
        self.waker.wake()
    }
}

/// Single-threaded echo server for the three protocols.
pub struct Server {
    poll: Poll,
    endpoints: EndpointRegistry,
    table: ConnectionTable,
    counters: Arc<ServerCounters>,
    waker: Arc<Waker>,
    local: LocalAddrs,
    /// Read buffer shared by every handler; one handler runs at a time.
    buf: Vec<u8>,
    /// Pseudo-QUIC response scratch.
    out: BytesMut,
    max_events: usize,
    closed: bool,
}

impl Server {
    /// Bind all three sockets and register them for readability.
    ///
    /// Any failure here is fatal for the process.
    pub fn bind(config: &ServerConfig) -> Result<Self, SetupError> {
        setup::ignore_sigpipe()?;

        let poll = Poll::new().map_err(SetupError::Poll)?;
        let mut endpoints = EndpointRegistry::with_capacity(1024);

        let stream_addr = config.stream_addr();
        let listener = setup::stream_listener(stream_addr, config.backlog)
            .map_err(|source| bind_error("stream", stream_addr, source))?;
        let listener = TcpListener::from_std(listener);
        let stream = listener
            .local_addr()
            .map_err(|source| bind_error("stream", stream_addr, source))?;
        register(&poll, &mut endpoints, Endpoint::StreamListener(listener), "stream")?;
        info!(addr = %stream, "TCP server listening");

        let datagram_addr = config.datagram_addr();
        let datagram = bind_datagram(datagram_addr, config.socket_buffer_size, "datagram")?;
        let datagram_local = datagram
            .local_addr()
            .map_err(|source| bind_error("datagram", datagram_addr, source))?;
        register(&poll, &mut endpoints, Endpoint::Datagram(datagram), "datagram")?;
        info!(addr = %datagram_local, "UDP server listening");

        let quic_addr = config.quic_addr();
        let quic_socket = bind_datagram(quic_addr, config.socket_buffer_size, "pseudo-QUIC")?;
        let quic_local = quic_socket
            .local_addr()
            .map_err(|source| bind_error("pseudo-QUIC", quic_addr, source))?;
        register(&poll, &mut endpoints, Endpoint::QuicDatagram(quic_socket), "pseudo-QUIC")?;
        info!(addr = %quic_local, "Pseudo-QUIC server listening");

        let waker_token = endpoints.reserve_shutdown();
        let waker = Waker::new(poll.registry(), waker_token).map_err(SetupError::Poll)?;

        Ok(Self {
            poll,
            endpoints,
            table: ConnectionTable::new(),
            counters: Arc::new(ServerCounters::new()),
            waker: Arc::new(waker),
            local: LocalAddrs {
                stream,
                datagram: datagram_local,
                quic: quic_local,
            },
            buf: vec![0u8; config.buffer_size],
            out: BytesMut::with_capacity(config.buffer_size),
            max_events: config.max_events,
            closed: false,
        })
    }

    pub fn local_addrs(&self) -> LocalAddrs {
        self.local
    }

    pub fn counters(&self) -> Arc<ServerCounters> {
        Arc::clone(&self.counters)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            waker: Arc::clone(&self.waker),
        }
    }

    /// Number of pseudo-QUIC connection records held.
    pub fn quic_connections(&self) -> usize {
        self.table.len()
    }

    /// Wait for readiness and dispatch until shut down.
    ///
    /// Blocks without a timeout. A wait interrupted by a signal is
    /// retried; any other poll failure cleans up and is returned.
    pub fn run(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }

        let mut events = Events::with_capacity(self.max_events);
        info!("Server started. Press Ctrl+C to stop.");

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Poll failed");
                self.cleanup();
                return Err(e);
            }

            for event in events.iter() {
                let token = event.token();
                let Some(kind) = self.endpoints.kind(token) else {
                    // Closed earlier in this batch.
                    continue;
                };

                match kind {
                    EndpointKind::StreamListener => self.accept_connections(token),
                    EndpointKind::Datagram => self.drain_datagrams(token),
                    EndpointKind::QuicDatagram => self.drain_quic(token),
                    EndpointKind::Client => self.handle_client(token, event),
                    EndpointKind::Shutdown => {
                        info!("Shutdown requested");
                        self.cleanup();
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Close every socket. Safe to call more than once.
    ///
    /// The poll instance itself is released when the server is dropped.
    pub fn cleanup(&mut self) {
        if self.closed {
            return;
        }
        let clients = self.endpoints.clients();
        let closed = self.endpoints.close_all(self.poll.registry());
        self.closed = true;
        info!(
            sockets = closed,
            clients,
            quic_connections = self.quic_connections(),
            "Server sockets closed"
        );
    }

    fn accept_connections(&mut self, token: Token) {
        let mut accepted = Vec::new();
        let result = match self.endpoints.get(token) {
            Some(Endpoint::StreamListener(listener)) => until_would_block(|| {
                accepted.push(listener.accept()?);
                Ok(ControlFlow::Continue(()))
            }),
            _ => return,
        };

        for (stream, peer) in accepted {
            self.register_client(stream, peer);
        }

        if let Err(e) = result {
            if setup::is_descriptor_exhaustion(&e) {
                warn!(error = %e, "Too many open files, rejecting connection");
            } else {
                error!(error = %e, "Accept error");
            }
        }
    }

    fn register_client(&mut self, stream: TcpStream, peer: SocketAddr) {
        // mio registrations are edge-triggered and include peer-hangup
        // detection (EPOLLRDHUP on Linux).
        match self.endpoints.register(
            self.poll.registry(),
            Endpoint::Client(stream),
            Interest::READABLE,
        ) {
            Ok(token) => {
                let total = self.counters.stream_opened();
                debug!(conn_id = token.0, peer = %peer, "Accepted connection");
                if total % STREAM_LOG_INTERVAL == 0 {
                    let active = self.counters.snapshot().active_streams;
                    info!(total, active, "TCP connections");
                }
            }
            Err((_, e)) => {
                warn!(peer = %peer, error = %e, "Failed to register client");
            }
        }
    }

    fn handle_client(&mut self, token: Token, event: &Event) {
        if event.is_error() || (event.is_read_closed() && event.is_write_closed()) {
            self.close_client(token, "hangup");
            return;
        }

        let Some(Endpoint::Client(stream)) = self.endpoints.get_mut(token) else {
            return;
        };

        match echo_stream(stream, &mut self.buf) {
            Ok(report) => {
                if report.dropped > 0 {
                    debug!(
                        conn_id = token.0,
                        dropped = report.dropped,
                        "Echo write would block, remainder dropped"
                    );
                    self.counters.add_dropped_echo_bytes(report.dropped);
                }
                if report.status == StreamStatus::PeerClosed {
                    self.close_client(token, "peer closed");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.close_client(token, "broken pipe");
            }
            Err(e) => {
                warn!(conn_id = token.0, error = %e, "Connection error");
                self.close_client(token, "error");
            }
        }
    }

    fn close_client(&mut self, token: Token, reason: &'static str) {
        if let Some(stream) = self.endpoints.remove_client(self.poll.registry(), token) {
            drop(stream);
            self.counters.stream_closed();
            debug!(conn_id = token.0, reason, "Connection closed");
        }
    }

    fn drain_datagrams(&mut self, token: Token) {
        let Some(Endpoint::Datagram(socket)) = self.endpoints.get(token) else {
            return;
        };

        match echo_datagrams(socket, &mut self.buf) {
            Ok(echoed) => {
                if self.counters.add_datagram_packets(echoed) {
                    let total = self.counters.snapshot().datagram_packets;
                    info!(total, "UDP packets processed");
                }
            }
            Err(e) => warn!(error = %e, "UDP recvfrom failed"),
        }
    }

    fn drain_quic(&mut self, token: Token) {
        let Some(Endpoint::QuicDatagram(socket)) = self.endpoints.get(token) else {
            return;
        };

        let capacity = self.buf.len();
        let result =
            quic::respond_datagrams(socket, &mut self.table, &mut self.buf, &mut self.out, capacity);
        match result {
            Ok(drain) => {
                self.counters.add_quic_connections(drain.created);
                self.counters.add_short_quic_datagrams(drain.too_short);
                if self.counters.add_quic_packets(drain.responded) {
                    let total = self.counters.snapshot().quic_packets;
                    info!(total, connections = self.table.len(), "Pseudo-QUIC packets processed");
                }
            }
            Err(e) => warn!(error = %e, "Pseudo-QUIC recvfrom failed"),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn bind_error(role: &'static str, addr: SocketAddr, source: io::Error) -> SetupError {
    SetupError::Bind { role, addr, source }
}

fn bind_datagram(
    addr: SocketAddr,
    buffer_size: usize,
    role: &'static str,
) -> Result<UdpSocket, SetupError> {
    let socket =
        setup::datagram_socket(addr, buffer_size).map_err(|source| bind_error(role, addr, source))?;
    Ok(UdpSocket::from_std(socket))
}

fn register(
    poll: &Poll,
    endpoints: &mut EndpointRegistry,
    endpoint: Endpoint,
    role: &'static str,
) -> Result<Token, SetupError> {
    endpoints
        .register(poll.registry(), endpoint, Interest::READABLE)
        .map_err(|(_, source)| SetupError::Register { role, source })
}
