//! # BlueWire Core Library
//!
//! HCI UART transport driver for Bluetooth controllers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Packet framing for the H4 wire format (event, ACL data, loopback)
//! - A dedicated reader thread decoupled from the consumer by a FIFO queue
//! - A never-blocking byte-oriented read API with partial-packet draining
//! - Transport lifecycle management (open, close, baud reconfiguration)
//! - A serialport-backed bus with RTS/CTS flow control and CTS readiness
//!
//! ## Example
//!
//! ```rust,ignore
//! use bluewire_core::transport::{HciTransport, TransportConfig, TransportEvent};
//!
//! let config = TransportConfig {
//!     port_name: "/dev/ttyUSB0".to_string(),
//!     ..Default::default()
//! };
//! let mut transport = HciTransport::new(config);
//! transport.open(|TransportEvent::DataReady| {
//!     // signal the host stack to come drain packets
//! })?;
//!
//! // HCI Reset
//! transport.write(&[0x01, 0x03, 0x0C, 0x00])?;
//!
//! // ... once the callback fires:
//! let mut buf = [0u8; 64];
//! let n = transport.read(&mut buf);
//! println!("event bytes: {:02x?}", &buf[..n]);
//! ```

pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::transport::{
        HciBus, HciPacket, HciTransport, IoctlReply, IoctlRequest, PacketKind, SessionState,
        TransportConfig, TransportError, TransportEvent,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
