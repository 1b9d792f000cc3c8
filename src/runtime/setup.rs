//! Socket construction and startup errors.
//!
//! Every socket is built with socket2 so options can be applied before
//! bind, then handed to mio. All sockets are non-blocking.

use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Fatal startup failure. The process exits nonzero when this surfaces.
#[derive(Debug)]
pub enum SetupError {
    /// Ignoring SIGPIPE failed.
    Signal(io::Error),
    /// Creating the readiness handle or its waker failed.
    Poll(io::Error),
    /// Creating, configuring, binding or listening on a socket failed.
    Bind {
        role: &'static str,
        addr: SocketAddr,
        source: io::Error,
    },
    /// Registering a socket with the readiness handle failed.
    Register {
        role: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Signal(e) => write!(f, "Failed to ignore SIGPIPE: {e}"),
            SetupError::Poll(e) => write!(f, "Failed to create poll instance: {e}"),
            SetupError::Bind { role, addr, source } => {
                write!(f, "Failed to set up {role} socket on {addr}: {source}")
            }
            SetupError::Register { role, source } => {
                write!(f, "Failed to register {role} socket: {source}")
            }
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Signal(e) | SetupError::Poll(e) => Some(e),
            SetupError::Bind { source, .. } | SetupError::Register { source, .. } => Some(source),
        }
    }
}

/// Ignore SIGPIPE process-wide so writes to a closed peer return EPIPE.
pub fn ignore_sigpipe() -> Result<(), SetupError> {
    // SAFETY: installing SIG_IGN has no handler code to race with.
    let previous = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
    if previous == libc::SIG_ERR {
        return Err(SetupError::Signal(io::Error::last_os_error()));
    }
    Ok(())
}

/// Create a non-blocking, address-reusing TCP listener.
pub fn stream_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Create a non-blocking, address-reusing UDP socket with enlarged
/// kernel send/receive buffers.
pub fn datagram_socket(addr: SocketAddr, buffer_size: usize) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.set_recv_buffer_size(buffer_size)?;
    socket.set_send_buffer_size(buffer_size)?;
    socket.bind(&addr.into())?;

    Ok(socket.into())
}

/// Whether an accept error means the process or system ran out of
/// file descriptors.
pub fn is_descriptor_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}
