//! Byte transport abstraction
//!
//! The controller is reached over a flow-controlled serial link. Everything
//! the driver needs from that link is captured by the [`HciBus`] trait so the
//! framer and session logic can run against any byte transport (hardware
//! UART, pseudo-terminal, scripted mock in tests).

use std::time::Duration;

use super::TransportError;

/// Outcome of a bounded receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusRead {
    /// At least one byte arrived; the count of bytes written into the
    /// caller's buffer.
    Data(usize),
    /// The timeout elapsed before any byte arrived. Not an error: the framer
    /// treats this as "no data yet" and either retries or goes back to idle.
    Empty,
}

/// Abstraction over the byte transport carrying the HCI stream.
pub trait HciBus: Send {
    /// Transmit bytes to the controller, gating on link readiness.
    fn transmit(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read available bytes into `buf`, waiting at most `timeout` for the
    /// first byte. May return fewer bytes than `buf` holds; callers needing
    /// an exact count accumulate across calls. `None` means the
    /// implementation's default slice duration, which is bounded, so callers polling
    /// a shutdown flag between calls are never stuck indefinitely.
    fn receive(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<BusRead, TransportError>;

    /// Whether the peer can currently accept data (hardware flow control).
    fn is_ready(&mut self) -> bool;

    /// Reconfigure the link to a new baud rate.
    ///
    /// No receive may be in flight on any clone of this bus while the rate
    /// changes; concurrent framing during reconfiguration desynchronizes
    /// byte boundaries.
    fn reconfigure_baud(&mut self, baud: u32) -> Result<(), TransportError>;

    /// Clone the bus into an independent handle sharing the same link.
    ///
    /// The reader thread receives on its own handle while the caller's
    /// context transmits on the original.
    fn try_clone(&self) -> Result<Box<dyn HciBus>, TransportError>;
}
