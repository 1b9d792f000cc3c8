//! Registered endpoints and their poll tokens.
//!
//! Every socket the event loop watches lives in one slab; the slab key is
//! its `mio::Token`. Each entry carries its kind, fixed when it is
//! registered, so dispatch never has to infer a socket's role from its
//! descriptor.

use mio::event::Source;
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};
use slab::Slab;
use std::io;

/// A socket (or the shutdown waker) owned by the event loop.
#[derive(Debug)]
pub enum Endpoint {
    /// Listening stream socket.
    StreamListener(TcpListener),
    /// Plain datagram echo socket.
    Datagram(UdpSocket),
    /// Pseudo-QUIC datagram socket.
    QuicDatagram(UdpSocket),
    /// Accepted stream connection.
    Client(TcpStream),
    /// Placeholder whose token belongs to the shutdown `Waker`.
    Shutdown,
}

/// Dispatch tag for an [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    StreamListener,
    Datagram,
    QuicDatagram,
    Client,
    Shutdown,
}

impl Endpoint {
    pub fn kind(&self) -> EndpointKind {
        match self {
            Endpoint::StreamListener(_) => EndpointKind::StreamListener,
            Endpoint::Datagram(_) => EndpointKind::Datagram,
            Endpoint::QuicDatagram(_) => EndpointKind::QuicDatagram,
            Endpoint::Client(_) => EndpointKind::Client,
            Endpoint::Shutdown => EndpointKind::Shutdown,
        }
    }

    fn source_mut(&mut self) -> Option<&mut dyn Source> {
        match self {
            Endpoint::StreamListener(s) => Some(s as &mut dyn Source),
            Endpoint::Datagram(s) | Endpoint::QuicDatagram(s) => Some(s as &mut dyn Source),
            Endpoint::Client(s) => Some(s as &mut dyn Source),
            Endpoint::Shutdown => None,
        }
    }
}

/// Slab of endpoints keyed by poll token.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct EndpointRegistry {
    endpoints: Slab<Endpoint>,
}

impl EndpointRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            endpoints: Slab::with_capacity(capacity),
        }
    }

    /// Register `endpoint` with the poll registry under a fresh token.
    ///
    /// On failure the endpoint is returned along with the error so the
    /// caller decides whether to drop it.
    pub fn register(
        &mut self,
        registry: &Registry,
        mut endpoint: Endpoint,
        interest: Interest,
    ) -> Result<Token, (Endpoint, io::Error)> {
        let entry = self.endpoints.vacant_entry();
        let token = Token(entry.key());
        if let Some(source) = endpoint.source_mut() {
            if let Err(e) = registry.register(source, token, interest) {
                return Err((endpoint, e));
            }
        }
        entry.insert(endpoint);
        Ok(token)
    }

    /// Reserve a token for the shutdown waker.
    pub fn reserve_shutdown(&mut self) -> Token {
        Token(self.endpoints.insert(Endpoint::Shutdown))
    }

    pub fn kind(&self, token: Token) -> Option<EndpointKind> {
        self.endpoints.get(token.0).map(Endpoint::kind)
    }

    pub fn get(&self, token: Token) -> Option<&Endpoint> {
        self.endpoints.get(token.0)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(token.0)
    }

    /// Remove and deregister a client stream. Other kinds are left alone.
    pub fn remove_client(&mut self, registry: &Registry, token: Token) -> Option<TcpStream> {
        match self.endpoints.get(token.0) {
            Some(Endpoint::Client(_)) => {}
            _ => return None,
        }
        match self.endpoints.remove(token.0) {
            Endpoint::Client(mut stream) => {
                let _ = registry.deregister(&mut stream);
                Some(stream)
            }
            _ => None,
        }
    }

    /// Deregister and drop every endpoint. Returns how many were closed.
    pub fn close_all(&mut self, registry: &Registry) -> usize {
        let mut closed = 0;
        for mut endpoint in self.endpoints.drain() {
            if let Some(source) = endpoint.source_mut() {
                let _ = registry.deregister(source);
                closed += 1;
            }
        }
        closed
    }

    /// Number of accepted client streams currently held.
    pub fn clients(&self) -> usize {
        self.endpoints
            .iter()
            .filter(|(_, e)| e.kind() == EndpointKind::Client)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Poll;

    fn udp() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap()
    }

    #[test]
    fn test_register_assigns_tagged_tokens() {
        let poll = Poll::new().unwrap();
        let mut registry = EndpointRegistry::with_capacity(4);

        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let t1 = registry
            .register(poll.registry(), Endpoint::StreamListener(listener), Interest::READABLE)
            .unwrap();
        let t2 = registry
            .register(poll.registry(), Endpoint::Datagram(udp()), Interest::READABLE)
            .unwrap();
        let t3 = registry
            .register(poll.registry(), Endpoint::QuicDatagram(udp()), Interest::READABLE)
            .unwrap();
        let t4 = registry.reserve_shutdown();

        assert_eq!(registry.kind(t1), Some(EndpointKind::StreamListener));
        assert_eq!(registry.kind(t2), Some(EndpointKind::Datagram));
        assert_eq!(registry.kind(t3), Some(EndpointKind::QuicDatagram));
        assert_eq!(registry.kind(t4), Some(EndpointKind::Shutdown));
        assert_eq!(registry.kind(Token(99)), None);
        assert_eq!(registry.clients(), 0);
    }

    #[test]
    fn test_remove_client_ignores_other_kinds() {
        let poll = Poll::new().unwrap();
        let mut registry = EndpointRegistry::with_capacity(2);
        let token = registry
            .register(poll.registry(), Endpoint::Datagram(udp()), Interest::READABLE)
            .unwrap();

        assert!(registry.remove_client(poll.registry(), token).is_none());
        assert_eq!(registry.kind(token), Some(EndpointKind::Datagram));
    }

    #[test]
    fn test_close_all_is_idempotent() {
        let poll = Poll::new().unwrap();
        let mut registry = EndpointRegistry::with_capacity(2);
        let datagram = registry
            .register(poll.registry(), Endpoint::Datagram(udp()), Interest::READABLE)
            .unwrap();
        let shutdown = registry.reserve_shutdown();

        assert_eq!(registry.close_all(poll.registry()), 1);
        assert_eq!(registry.kind(datagram), None);
        assert_eq!(registry.kind(shutdown), None);
        assert_eq!(registry.close_all(poll.registry()), 0);
    }
}
