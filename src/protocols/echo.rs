//! Raw byte echo for the stream and datagram sockets.
//!
//! No framing and no length prefix: whatever arrives is written back.
//!
//! ## Partial writes
//!
//! A stream echo that hits `WouldBlock` mid-write drops the unwritten
//! remainder instead of queueing it for a later writable event. The
//! dropped byte count is reported so the runtime can account for it.

use crate::runtime::until_would_block;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::ops::ControlFlow;

/// Connection status after draining a readable stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Socket drained to `WouldBlock`; wait for the next edge.
    Open,
    /// Peer closed its side (zero-length read).
    PeerClosed,
}

/// Result of one readable-event echo pass over a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReport {
    pub status: StreamStatus,
    /// Bytes written back to the peer.
    pub echoed: usize,
    /// Bytes read but not written because the socket would block.
    pub dropped: usize,
}

/// Echo everything currently readable on `stream` back to it.
///
/// Reads until `WouldBlock` or EOF, since readiness is edge-triggered and
/// undrained data would never be signalled again. Errors other than
/// `WouldBlock`/`Interrupted` are returned and the caller closes the
/// connection (`BrokenPipe` included).
pub fn echo_stream<S: Read + Write>(stream: &mut S, buf: &mut [u8]) -> io::Result<EchoReport> {
    let mut report = EchoReport {
        status: StreamStatus::Open,
        echoed: 0,
        dropped: 0,
    };

    loop {
        let n = match stream.read(buf) {
            Ok(0) => {
                report.status = StreamStatus::PeerClosed;
                return Ok(report);
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(report),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        let mut written = 0;
        while written < n {
            match stream.write(&buf[written..n]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(w) => written += w,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        report.echoed += written;
        report.dropped += n - written;
    }
}

/// Datagram transport used by the echo paths.
///
/// Implemented for `mio::net::UdpSocket`; tests plug in a scripted socket.
pub trait DatagramSocket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
}

impl DatagramSocket for mio::net::UdpSocket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        mio::net::UdpSocket::recv_from(self, buf)
    }

    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        mio::net::UdpSocket::send_to(self, buf, target)
    }
}

/// Send a reply datagram, absorbing per-packet send failures.
///
/// Returns whether the reply was handed to the kernel. A failed send is
/// logged and otherwise ignored so the receive drain keeps going.
pub fn send_reply<S: DatagramSocket>(socket: &S, reply: &[u8], peer: SocketAddr) -> bool {
    match socket.send_to(reply, peer) {
        Ok(_) => true,
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
            tracing::debug!(peer = %peer, "Send buffer full, reply dropped");
            false
        }
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "Datagram send failed");
            false
        }
    }
}

/// Drain `socket`, echoing every datagram verbatim to its sender.
///
/// Stateless: no per-peer tracking. Returns the number of datagrams
/// echoed before the socket reported `WouldBlock`.
pub fn echo_datagrams<S: DatagramSocket>(socket: &S, buf: &mut [u8]) -> io::Result<usize> {
    let mut echoed = 0;
    until_would_block(|| {
        let (n, peer) = socket.recv_from(buf)?;
        if send_reply(socket, &buf[..n], peer) {
            echoed += 1;
        }
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(echoed)
}
