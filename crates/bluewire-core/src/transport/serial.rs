//! Serial port handling
//!
//! Provides the serialport-backed [`HciBus`] implementation plus port
//! enumeration and configuration helpers. HCI UARTs run 8N1 with RTS/CTS
//! hardware flow control; the controller's CTS line doubles as the readiness
//! signal gating transmission.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::{Duration, Instant};

use tracing::debug;

use super::bus::{BusRead, HciBus};
use super::{
    TransportConfig, TransportError, BODY_READ_TIMEOUT, READY_POLL, TRANSMIT_READY_TIMEOUT,
};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
                usb_info.serial_number,
            ),
            _ => (None, None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
            serial_number,
        }
    }
}

/// Helper used to sort port names so that:
///  - ttyACM* ports come first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List serial ports a controller might sit behind, with /dev fallbacks and
/// deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    // Collect from serialport API
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
    {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: Add /dev/ttyACM* and /dev/ttyUSB* entries if present but not found by API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
                        name: full,
                        vid: None,
                        pid: None,
                        manufacturer: None,
                        product: None,
                        serial_number: None,
                    });
                }
            }
        }
    }

    // Collect and sort deterministically
    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

fn map_serial_error(name: &str, e: serialport::Error) -> TransportError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => TransportError::PortNotFound(name.to_string()),
        _ => TransportError::Bus(e.to_string()),
    }
}

/// Open and configure a port for HCI traffic: 8N1, RTS/CTS hardware flow
/// control, short read timeout so receive slices stay bounded.
fn open_port(name: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, TransportError> {
    let mut port = serialport::new(name, baud_rate)
        .timeout(BODY_READ_TIMEOUT)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::Hardware)
        .open()
        .map_err(|e| map_serial_error(name, e))?;

    // Drop whatever accumulated in the OS buffers before we opened; stale
    // bytes ahead of the first discriminator would desynchronize the framer.
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| TransportError::Bus(e.to_string()))?;

    Ok(port)
}

/// Serialport-backed byte transport for the HCI stream.
pub struct SerialBus {
    port: Box<dyn SerialPort>,
}

impl SerialBus {
    /// Open the port named by `config` and wrap it as an [`HciBus`].
    pub fn open(config: &TransportConfig) -> Result<Self, TransportError> {
        debug!(
            port = %config.port_name,
            baud = config.baud_rate,
            "opening HCI serial bus"
        );
        let port = open_port(&config.port_name, config.baud_rate)?;
        Ok(Self { port })
    }
}

impl HciBus for SerialBus {
    fn transmit(&mut self, data: &[u8]) -> Result<(), TransportError> {
        // Gate on the controller's flow-control line before every transmit.
        let deadline = Instant::now() + TRANSMIT_READY_TIMEOUT;
        while !self.is_ready() {
            if Instant::now() >= deadline {
                return Err(TransportError::NotReady);
            }
            std::thread::sleep(READY_POLL);
        }

        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<BusRead, TransportError> {
        let slice = timeout.unwrap_or(BODY_READ_TIMEOUT);
        self.port
            .set_timeout(slice)
            .map_err(|e| TransportError::Bus(e.to_string()))?;

        match self.port.read(buf) {
            Ok(0) => Ok(BusRead::Empty),
            Ok(n) => Ok(BusRead::Data(n)),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(BusRead::Empty)
            }
            Err(e) => Err(TransportError::IoError(e)),
        }
    }

    fn is_ready(&mut self) -> bool {
        // CTS asserted means the controller can take data.
        self.port.read_clear_to_send().unwrap_or(false)
    }

    fn reconfigure_baud(&mut self, baud: u32) -> Result<(), TransportError> {
        self.port
            .set_baud_rate(baud)
            .map_err(|e| TransportError::Bus(e.to_string()))?;
        debug!(baud, "serial bus reconfigured");
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn HciBus>, TransportError> {
        let port = self
            .port
            .try_clone()
            .map_err(|e| TransportError::Bus(e.to_string()))?;
        Ok(Box::new(SerialBus { port }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "/dev/ttyUSB0",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyACM10",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo {
                name: n.to_string(),
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial_number: None,
            })
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_missing_port_error() {
        let config = TransportConfig {
            port_name: "/dev/bluewire-definitely-missing".to_string(),
            ..Default::default()
        };
        match SerialBus::open(&config) {
            Err(TransportError::PortNotFound(_)) | Err(TransportError::Bus(_)) => {}
            Ok(_) => panic!("opening a nonexistent port should fail"),
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
}
