//! Pseudo-QUIC datagram protocol.
//!
//! A toy framing loosely modeled on QUIC: each datagram carries a 4-byte
//! big-endian connection id, and the server keeps one record per id.
//! There is no handshake, encryption, stream multiplexing or loss
//! recovery; the server answers every request with the id, a fixed
//! marker, and the request payload.

pub mod frame;
pub mod table;

pub use frame::{encode_request, HEADER_LEN};
pub use table::ConnectionTable;

use crate::protocols::echo::{send_reply, DatagramSocket};
use crate::runtime::until_would_block;
use bytes::BytesMut;
use std::io;
use std::ops::ControlFlow;
use std::time::Instant;
use tracing::debug;

/// Per-drain packet accounting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QuicDrain {
    /// Responses handed to the kernel.
    pub responded: usize,
    /// Connection records created during this drain.
    pub created: usize,
    /// Datagrams dropped for being shorter than an id.
    pub too_short: usize,
}

/// Drain `socket`, answering every framed request.
///
/// `buf` receives datagrams; `out` is the response scratch buffer and
/// `capacity` bounds each response.
pub fn respond_datagrams<S: DatagramSocket>(
    socket: &S,
    table: &mut ConnectionTable,
    buf: &mut [u8],
    out: &mut BytesMut,
    capacity: usize,
) -> io::Result<QuicDrain> {
    let mut drain = QuicDrain::default();

    until_would_block(|| {
        let (n, peer) = socket.recv_from(buf)?;

        let Some((id, payload)) = frame::parse_request(&buf[..n]) else {
            debug!(peer = %peer, len = n, "Dropping datagram shorter than connection id");
            drain.too_short += 1;
            return Ok(ControlFlow::Continue(()));
        };

        if table.touch(id, peer, Instant::now()) {
            if let Some(conn) = table.get(id) {
                debug!(
                    id,
                    peer = %conn.peer,
                    established = conn.established,
                    "New pseudo-QUIC connection"
                );
            }
            drain.created += 1;
        }

        frame::encode_response(id, payload, capacity, out);
        if send_reply(socket, &out[..], peer) {
            drain.responded += 1;
        }
        Ok(ControlFlow::Continue(()))
    })?;

    Ok(drain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::echo::testing::ScriptedSocket;
    use std::net::SocketAddr;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_respond_with_marker() {
        let socket = ScriptedSocket::new(vec![(vec![0, 0, 0, 7, b'h', b'i'], peer(4000))]);
        let mut table = ConnectionTable::new();
        let mut buf = [0u8; 1024];
        let mut out = BytesMut::new();

        let drain = respond_datagrams(&socket, &mut table, &mut buf, &mut out, 1024).unwrap();
        assert_eq!(
            drain,
            QuicDrain {
                responded: 1,
                created: 1,
                too_short: 0
            }
        );

        let sent = socket.sent.borrow();
        assert_eq!(sent[0].0, b"\x00\x00\x00\x07QUIC Echo: hi");
        assert_eq!(sent[0].1, peer(4000));
    }

    #[test]
    fn test_short_datagrams_dropped() {
        let socket = ScriptedSocket::new(vec![
            (vec![1, 2], peer(4000)),
            (vec![0, 0, 0, 1], peer(4000)),
        ]);
        let mut table = ConnectionTable::new();
        let mut buf = [0u8; 1024];
        let mut out = BytesMut::new();

        let drain = respond_datagrams(&socket, &mut table, &mut buf, &mut out, 1024).unwrap();
        assert_eq!(drain.too_short, 1);
        assert_eq!(drain.responded, 1);
        assert_eq!(socket.sent.borrow().len(), 1);
        assert_eq!(socket.sent.borrow()[0].0, b"\x00\x00\x00\x01QUIC Echo: ");
    }

    #[test]
    fn test_repeat_id_creates_once() {
        let socket = ScriptedSocket::new(vec![
            (vec![0, 0, 0, 3, b'a'], peer(4000)),
            (vec![0, 0, 0, 3, b'b'], peer(4000)),
            (vec![0, 0, 0, 4, b'c'], peer(4001)),
        ]);
        let mut table = ConnectionTable::new();
        let mut buf = [0u8; 1024];
        let mut out = BytesMut::new();

        let drain = respond_datagrams(&socket, &mut table, &mut buf, &mut out, 1024).unwrap();
        assert_eq!(drain.created, 2);
        assert_eq!(drain.responded, 3);
        assert_eq!(table.len(), 2);

        let conn = table.get(4).unwrap();
        assert_eq!(conn.peer, peer(4001));
        assert!(!conn.established);
    }

    #[test]
    fn test_response_truncated_to_capacity() {
        let mut request = vec![0, 0, 0, 1];
        request.extend_from_slice(&[b'z'; 1020]);
        let socket = ScriptedSocket::new(vec![(request, peer(4000))]);
        let mut table = ConnectionTable::new();
        let mut buf = [0u8; 1024];
        let mut out = BytesMut::new();

        respond_datagrams(&socket, &mut table, &mut buf, &mut out, 1024).unwrap();
        let sent = socket.sent.borrow();
        assert_eq!(sent[0].0.len(), 1024);
        assert!(sent[0].0[HEADER_LEN..].iter().all(|&b| b == b'z'));
    }
}
