//! Connection table for the pseudo-QUIC path.
//!
//! Records are created on first sight of an id and only refreshed after
//! that. There is no eviction: the table grows for the lifetime of the
//! server, one record per distinct id ever seen.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// Metadata kept per connection id.
#[derive(Debug, Clone)]
pub struct QuicConnection {
    /// Address the id was first seen from.
    pub peer: SocketAddr,
    /// Time of the most recent datagram carrying this id.
    pub last_activity: Instant,
    /// Always false; there is no handshake.
    pub established: bool,
}

/// Map from connection id to its record.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<u32, QuicConnection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity for `id`, creating the record if it is new.
    ///
    /// Returns `true` when a record was created.
    pub fn touch(&mut self, id: u32, peer: SocketAddr, now: Instant) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) => {
                conn.last_activity = now;
                false
            }
            None => {
                self.connections.insert(
                    id,
                    QuicConnection {
                        peer,
                        last_activity: now,
                        established: false,
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, id: u32) -> Option<&QuicConnection> {
        self.connections.get(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_touch_creates_then_refreshes() {
        let mut table = ConnectionTable::new();
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(10);

        assert!(table.touch(9, peer, t0));
        assert!(!table.touch(9, peer, t1));
        assert_eq!(table.len(), 1);

        let conn = table.get(9).unwrap();
        assert_eq!(conn.peer, peer);
        assert_eq!(conn.last_activity, t1);
        assert!(!conn.established);
    }

    #[test]
    fn test_first_peer_is_kept() {
        let mut table = ConnectionTable::new();
        let first: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let second: SocketAddr = "127.0.0.1:6000".parse().unwrap();
        let now = Instant::now();

        table.touch(1, first, now);
        table.touch(1, second, now);
        assert_eq!(table.get(1).unwrap().peer, first);
    }

    #[test]
    fn test_distinct_ids_grow_table() {
        let mut table = ConnectionTable::new();
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let now = Instant::now();

        for id in 0..100 {
            table.touch(id, peer, now);
        }
        assert_eq!(table.len(), 100);
        assert!(table.get(100).is_none());
    }
}
