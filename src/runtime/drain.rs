//! Drain-until-would-block helper for readiness-driven I/O.
//!
//! Edge-triggered readiness fires once per state change, so accept and
//! receive handlers must repeat their operation until the kernel reports
//! `WouldBlock`. This module holds that loop in one place.

use std::io;
use std::ops::ControlFlow;

/// Repeat `op` until it reports `WouldBlock` or asks to stop.
///
/// `Interrupted` is retried. Any other error ends the drain and is
/// returned to the caller. Returns the number of completed iterations.
pub fn until_would_block<F>(mut op: F) -> io::Result<usize>
where
    F: FnMut() -> io::Result<ControlFlow<()>>,
{
    let mut completed = 0;
    loop {
        match op() {
            Ok(ControlFlow::Continue(())) => completed += 1,
            Ok(ControlFlow::Break(())) => return Ok(completed + 1),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(completed),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
