//! Protocol implementations.
//!
//! Each protocol exposes the per-socket echo semantics used by the
//! runtime event loop; socket ownership stays with the runtime.
//!
//! - `echo`: raw stream and datagram echo, no framing
//! - `quic`: 4-byte connection id framing with a per-id connection table

pub mod echo;
pub mod quic;
