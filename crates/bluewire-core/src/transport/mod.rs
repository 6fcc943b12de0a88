//! HCI UART Transport
//!
//! Moves the HCI (H4) byte stream between an upper protocol stack and a
//! Bluetooth controller behind a flow-controlled serial link. A dedicated
//! reader thread frames incoming bytes into typed packets and stages them in
//! a FIFO queue; the consumer drains the queue through a never-blocking
//! byte-oriented `read`.

pub mod baud;
mod bus;
mod error;
mod framer;
mod packet;
mod pool;
mod queue;
pub mod serial;
mod session;

pub use bus::{BusRead, HciBus};
pub use error::TransportError;
pub use packet::{HciPacket, PacketKind};
pub use pool::{PacketPool, PoolPermit};
pub use queue::{EventCallback, PacketQueue, TransportEvent};
pub use serial::{list_ports, PortInfo, SerialBus};
pub use session::{
    HciTransport, IoctlReply, IoctlRequest, SessionState, TransportConfig, TransportCounters,
};

use std::time::Duration;

/// Default baud rate for the HCI UART
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Backing-buffer capacity for a single packet, envelope included
pub const MAX_PACKET_SIZE: usize = 1024;

/// Largest ACL content length the framer accepts (envelope overhead is the
/// discriminator plus the 4-byte sub-header)
pub const MAX_ACL_PAYLOAD: usize = MAX_PACKET_SIZE - 5;

/// How long `open` waits for the bus readiness signal by default
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 2000;

/// Default poll interval for the discriminator-byte wait
pub const DEFAULT_DISCRIMINATOR_POLL_MS: u64 = 100;

/// Default cap on packets alive at once
pub const DEFAULT_POOL_CAPACITY: usize = 8;

/// Receive-slice duration for packet-body reads; bounds how long the reader
/// can go without observing a stop request mid-packet
pub(crate) const BODY_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Poll cadence while waiting on the readiness signal
pub(crate) const READY_POLL: Duration = Duration::from_millis(10);

/// How long a transmit waits for the readiness signal before failing
pub(crate) const TRANSMIT_READY_TIMEOUT: Duration = Duration::from_secs(1);

/// Sleep before retrying when packet storage is exhausted
pub(crate) const POOL_BACKOFF: Duration = Duration::from_secs(2);
