//! Pseudo-QUIC datagram framing.
//!
//! ```text
//! Request:  <id: u32 BE><payload>
//! Response: <id: u32 BE>"QUIC Echo: "<payload, truncated to capacity>
//! ```

use bytes::{BufMut, BytesMut};

/// Length of the connection id prefix.
pub const ID_LEN: usize = 4;

/// Fixed ASCII marker inserted after the id in every response.
pub const MARKER: &[u8] = b"QUIC Echo: ";

/// Bytes every response carries before the echoed payload.
pub const HEADER_LEN: usize = ID_LEN + MARKER.len();

/// Split a request into its connection id and payload.
///
/// Returns `None` for datagrams too short to carry an id.
pub fn parse_request(datagram: &[u8]) -> Option<(u32, &[u8])> {
    if datagram.len() < ID_LEN {
        return None;
    }
    let (id, payload) = datagram.split_at(ID_LEN);
    let id = u32::from_be_bytes([id[0], id[1], id[2], id[3]]);
    Some((id, payload))
}

/// Encode a response into `out`, which is cleared first.
///
/// The response never exceeds `capacity` bytes; payload bytes that do not
/// fit are cut off. `capacity` must be at least [`HEADER_LEN`].
pub fn encode_response(id: u32, payload: &[u8], capacity: usize, out: &mut BytesMut) {
    debug_assert!(capacity >= HEADER_LEN);
    let room = capacity.saturating_sub(HEADER_LEN);
    let payload = &payload[..payload.len().min(room)];

    out.clear();
    out.reserve(HEADER_LEN + payload.len());
    out.put_u32(id);
    out.put_slice(MARKER);
    out.put_slice(payload);
}

/// Build a request datagram. Used by the load generator.
pub fn encode_request(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut request = Vec::with_capacity(ID_LEN + payload.len());
    request.extend_from_slice(&id.to_be_bytes());
    request.extend_from_slice(payload);
    request
}
