//! Transport session management
//!
//! Owns the lifecycle of the HCI link: bus bring-up, the reader thread that
//! frames incoming bytes, the staging queue, and the consumer-facing
//! open/read/write/ioctl/close surface.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::bus::HciBus;
use super::framer::{self, FramerEvent};
use super::queue::{EventCallback, PacketQueue, TransportEvent};
use super::serial::SerialBus;
use super::{
    baud, HciPacket, PacketPool, TransportError, DEFAULT_BAUD_RATE, DEFAULT_DISCRIMINATOR_POLL_MS,
    DEFAULT_POOL_CAPACITY, DEFAULT_READY_TIMEOUT_MS, POOL_BACKOFF, READY_POLL,
};

/// Transport session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No bus held, no reader running
    Uninitialized,
    /// Bus bring-up in progress
    Initializing,
    /// Reader running, read/write/ioctl available
    Ready,
    /// Close in progress
    ShuttingDown,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Serial port name
    pub port_name: String,
    /// Initial baud rate
    pub baud_rate: u32,
    /// How long `open` waits for the bus readiness signal before giving up
    pub ready_timeout_ms: u64,
    /// Poll interval for the discriminator-byte wait; also the shutdown
    /// latency granularity of the reader thread
    pub discriminator_poll_ms: u64,
    /// Maximum packets alive at once (queued plus in flight)
    pub pool_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            discriminator_poll_ms: DEFAULT_DISCRIMINATOR_POLL_MS,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

/// Operations accepted by [`HciTransport::ioctl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlRequest {
    /// Flush buffered data. Accepted and currently a no-op.
    Flush,
    /// Report the current baud rate
    BaudRead,
    /// Switch the link to a new baud rate
    BaudWrite(u32),
}

/// Replies from [`HciTransport::ioctl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlReply {
    /// Operation completed with nothing to report
    Done,
    /// Current baud rate
    Baud(u32),
}

/// Snapshot of cumulative transfer metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportCounters {
    /// Bytes handed to the bus for transmission
    pub tx_bytes: u64,
    /// Transmit calls that reached the bus
    pub tx_packets: u64,
    /// Bytes of reassembled packets (envelope included)
    pub rx_bytes: u64,
    /// Packets reassembled and queued
    pub rx_packets: u64,
}

#[derive(Default)]
struct SharedCounters {
    tx_bytes: AtomicU64,
    tx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    rx_packets: AtomicU64,
}

struct ReaderHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// HCI UART transport session
///
/// Single producer (the internal reader thread), single consumer (the
/// caller). `read` never blocks; completed packets surface through the
/// data-ready callback registered at `open`.
pub struct HciTransport {
    config: TransportConfig,
    state: SessionState,
    bus: Option<Box<dyn HciBus>>,
    queue: Arc<PacketQueue>,
    pool: Arc<PacketPool>,
    in_flight: Option<HciPacket>,
    reader: Option<ReaderHandle>,
    counters: Arc<SharedCounters>,
    baud_rate: u32,
}

impl HciTransport {
    /// Create a session (not yet open) that will drive the serial port named
    /// in `config`.
    pub fn new(config: TransportConfig) -> Self {
        let pool = Arc::new(PacketPool::new(config.pool_capacity));
        let baud_rate = config.baud_rate;
        Self {
            config,
            state: SessionState::Uninitialized,
            bus: None,
            queue: Arc::new(PacketQueue::new()),
            pool,
            in_flight: None,
            reader: None,
            counters: Arc::new(SharedCounters::default()),
            baud_rate,
        }
    }

    /// Create a session over a caller-supplied bus instead of a serial port.
    pub fn with_bus(config: TransportConfig, bus: Box<dyn HciBus>) -> Self {
        let mut session = Self::new(config);
        session.bus = Some(bus);
        session
    }

    /// List serial ports a controller might sit behind.
    pub fn list_ports() -> Vec<super::PortInfo> {
        super::serial::list_ports()
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of complete packets waiting in the queue (the in-flight
    /// packet, if any, is not counted).
    pub fn pending_packets(&self) -> usize {
        self.queue.len()
    }

    /// Cumulative tx/rx metrics
    pub fn counters(&self) -> TransportCounters {
        TransportCounters {
            tx_bytes: self.counters.tx_bytes.load(Ordering::Relaxed),
            tx_packets: self.counters.tx_packets.load(Ordering::Relaxed),
            rx_bytes: self.counters.rx_bytes.load(Ordering::Relaxed),
            rx_packets: self.counters.rx_packets.load(Ordering::Relaxed),
        }
    }

    /// The baud rate the link currently runs at
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Open the transport: bring up the bus, wait for readiness, start the
    /// reader thread.
    ///
    /// `callback` fires from the reader thread whenever the packet queue goes
    /// from empty to nonempty; it must not block and must not call back into
    /// this session. On error the session rolls back to `Uninitialized` and
    /// the reader thread is never started.
    pub fn open<F>(&mut self, callback: F) -> Result<(), TransportError>
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        if self.state != SessionState::Uninitialized {
            return Err(TransportError::AlreadyOpen);
        }
        self.state = SessionState::Initializing;

        match self.bring_up(Arc::new(callback)) {
            Ok(()) => {
                self.state = SessionState::Ready;
                debug!(port = %self.config.port_name, "transport open");
                Ok(())
            }
            Err(e) => {
                self.queue.clear_callback();
                self.bus = None;
                self.state = SessionState::Uninitialized;
                Err(e)
            }
        }
    }

    fn bring_up(&mut self, callback: EventCallback) -> Result<(), TransportError> {
        if self.bus.is_none() {
            self.bus = Some(Box::new(SerialBus::open(&self.config)?));
        }
        self.wait_until_ready()?;
        self.queue.set_callback(callback);
        self.start_reader()
    }

    /// Poll the readiness signal until it asserts or the configured timeout
    /// expires.
    fn wait_until_ready(&mut self) -> Result<(), TransportError> {
        let bus = self.bus.as_mut().ok_or(TransportError::NotOpen)?;
        let deadline = Instant::now() + Duration::from_millis(self.config.ready_timeout_ms);
        while !bus.is_ready() {
            if Instant::now() >= deadline {
                return Err(TransportError::ReadyTimeout);
            }
            thread::sleep(READY_POLL);
        }
        Ok(())
    }

    fn start_reader(&mut self) -> Result<(), TransportError> {
        let bus = self.bus.as_ref().ok_or(TransportError::NotOpen)?.try_clone()?;
        let stop = Arc::new(AtomicBool::new(false));
        let queue = Arc::clone(&self.queue);
        let pool = Arc::clone(&self.pool);
        let counters = Arc::clone(&self.counters);
        let poll = Duration::from_millis(self.config.discriminator_poll_ms);

        let thread_stop = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("bluewire-reader".to_string())
            .spawn(move || reader_loop(bus, queue, pool, counters, thread_stop, poll))
            .map_err(TransportError::IoError)?;

        self.reader = Some(ReaderHandle { stop, join });
        Ok(())
    }

    fn stop_reader(&mut self) {
        if let Some(handle) = self.reader.take() {
            handle.stop.store(true, Ordering::Relaxed);
            if handle.join.join().is_err() {
                error!("reader thread panicked during shutdown");
            }
        }
    }

    /// Transmit raw bytes to the controller.
    ///
    /// Fails fast with a lifecycle error unless the session is `Ready`;
    /// nothing reaches the bus in that case.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if self.state != SessionState::Ready {
            return Err(TransportError::NotOpen);
        }
        let bus = self.bus.as_mut().ok_or(TransportError::NotOpen)?;
        bus.transmit(data)?;
        self.counters
            .tx_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.counters.tx_packets.fetch_add(1, Ordering::Relaxed);
        Ok(data.len())
    }

    /// Drain reassembled packet bytes into `buf`. Never blocks; returns the
    /// number of bytes copied, 0 when nothing is available (including before
    /// `open` and after `close`, when the queue is necessarily empty).
    ///
    /// A packet larger than `buf` is consumed across successive calls; its
    /// bytes are always delivered contiguously and in order, and queued
    /// packets drain strictly FIFO.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut total = 0;
        while total < buf.len() {
            if self.in_flight.is_none() {
                match self.queue.pop() {
                    Some(packet) => self.in_flight = Some(packet),
                    None => break,
                }
            }
            if let Some(packet) = self.in_flight.as_mut() {
                total += packet.copy_into(&mut buf[total..]);
                if packet.is_exhausted() {
                    self.in_flight = None;
                }
            }
        }
        total
    }

    /// Perform a control operation on the open transport.
    ///
    /// `BaudWrite` stops the reader thread, reconfigures the bus, and starts
    /// the reader again; framing across a live rate change would
    /// desynchronize byte boundaries. Queued packets survive the restart.
    pub fn ioctl(&mut self, request: IoctlRequest) -> Result<IoctlReply, TransportError> {
        if self.state != SessionState::Ready {
            return Err(TransportError::NotOpen);
        }
        match request {
            IoctlRequest::Flush => Ok(IoctlReply::Done),
            IoctlRequest::BaudRead => Ok(IoctlReply::Baud(self.baud_rate)),
            IoctlRequest::BaudWrite(rate) => {
                baud::validate(rate)?;
                self.stop_reader();
                let result = self
                    .bus
                    .as_mut()
                    .ok_or(TransportError::NotOpen)
                    .and_then(|bus| bus.reconfigure_baud(rate));
                // Restart the reader even if reconfiguration failed; the
                // link is still running at the old rate in that case.
                self.start_reader()?;
                result?;
                self.baud_rate = rate;
                debug!(baud = rate, "baud rate changed");
                Ok(IoctlReply::Done)
            }
        }
    }

    /// Close the transport: stop the reader, discard all staged packets,
    /// release the bus.
    pub fn close(&mut self) -> Result<(), TransportError> {
        if self.state != SessionState::Ready {
            return Err(TransportError::NotOpen);
        }
        self.state = SessionState::ShuttingDown;
        self.stop_reader();
        self.queue.drain();
        self.in_flight = None;
        self.queue.clear_callback();
        self.bus = None;
        self.state = SessionState::Uninitialized;
        debug!("transport closed");
        Ok(())
    }
}

impl Drop for HciTransport {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Body of the reader thread: acquire storage, frame one packet, hand it to
/// the queue, repeat until told to stop. Framing and bus errors are absorbed
/// here; the loop resynchronizes at the next discriminator byte and never
/// surfaces them to the consumer.
fn reader_loop(
    mut bus: Box<dyn HciBus>,
    queue: Arc<PacketQueue>,
    pool: Arc<PacketPool>,
    counters: Arc<SharedCounters>,
    stop: Arc<AtomicBool>,
    poll: Duration,
) {
    debug!("reader thread started");
    while !stop.load(Ordering::Relaxed) {
        let Some(permit) = pool.try_acquire() else {
            // Packet storage exhausted. No stream bytes have been consumed
            // yet, so nothing is lost; wait for the consumer to drain.
            backoff(&stop, POOL_BACKOFF, poll);
            continue;
        };

        match framer::receive_packet(bus.as_mut(), permit, &stop, poll) {
            Ok(FramerEvent::Packet(packet)) => {
                counters
                    .rx_bytes
                    .fetch_add(packet.remaining() as u64, Ordering::Relaxed);
                counters.rx_packets.fetch_add(1, Ordering::Relaxed);
                queue.push(packet);
            }
            Ok(FramerEvent::Idle) => {}
            Err(e) if e.is_framing() => {
                warn!(error = %e, "abandoned packet, resynchronizing at next discriminator");
            }
            Err(e) => {
                warn!(error = %e, "bus error while framing");
                // Brief pause so a vanished device does not spin the loop.
                backoff(&stop, poll, poll);
            }
        }
    }
    debug!("reader thread exiting");
}

/// Sleep for `total`, in `slice`-sized steps so a stop request is noticed
/// promptly.
fn backoff(stop: &AtomicBool, total: Duration, slice: Duration) {
    let deadline = Instant::now() + total;
    loop {
        let now = Instant::now();
        if now >= deadline || stop.load(Ordering::Relaxed) {
            break;
        }
        thread::sleep(slice.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.pool_capacity, DEFAULT_POOL_CAPACITY);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = TransportConfig::default();
        let json = serde_json::to_string(&config).expect("config serializes");
        let back: TransportConfig = serde_json::from_str(&json).expect("config deserializes");
        assert_eq!(back.baud_rate, config.baud_rate);
        assert_eq!(back.pool_capacity, config.pool_capacity);
        assert_eq!(
            serde_json::to_string(&SessionState::Ready).expect("state serializes"),
            "\"Ready\""
        );
    }

    #[test]
    fn test_write_before_open_is_lifecycle_error() {
        let mut transport = HciTransport::new(TransportConfig::default());
        assert_eq!(transport.state(), SessionState::Uninitialized);
        match transport.write(&[0x01, 0x03, 0x0C, 0x00]) {
            Err(TransportError::NotOpen) => {}
            other => panic!("expected lifecycle error, got {:?}", other),
        }
        assert_eq!(transport.counters().tx_bytes, 0);
    }

    #[test]
    fn test_read_before_open_returns_zero() {
        let mut transport = HciTransport::new(TransportConfig::default());
        let mut buf = [0u8; 16];
        assert_eq!(transport.read(&mut buf), 0);
        assert_eq!(transport.read(&mut buf), 0);
    }

    #[test]
    fn test_ioctl_before_open_is_lifecycle_error() {
        let mut transport = HciTransport::new(TransportConfig::default());
        match transport.ioctl(IoctlRequest::BaudRead) {
            Err(TransportError::NotOpen) => {}
            other => panic!("expected lifecycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_close_before_open_is_lifecycle_error() {
        let mut transport = HciTransport::new(TransportConfig::default());
        assert!(matches!(
            transport.close(),
            Err(TransportError::NotOpen)
        ));
    }
}
