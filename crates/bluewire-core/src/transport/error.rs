//! Transport errors

use thiserror::Error;

/// Errors that can occur in the HCI transport driver
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Transport not open")]
    NotOpen,

    #[error("Transport already open")]
    AlreadyOpen,

    #[error("Bus not ready")]
    NotReady,

    #[error("Timed out waiting for bus readiness")]
    ReadyTimeout,

    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaud(u32),

    #[error("Unsupported packet discriminator: {0:#04x}")]
    UnsupportedDiscriminator(u8),

    #[error("Declared payload length {declared} exceeds buffer capacity {max}")]
    OversizedPayload { declared: usize, max: usize },

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TransportError {
    /// True for errors raised while delimiting a packet (bad discriminator,
    /// oversized payload). The reader loop absorbs these and resynchronizes
    /// at the next discriminator byte.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            TransportError::UnsupportedDiscriminator(_) | TransportError::OversizedPayload { .. }
        )
    }
}
