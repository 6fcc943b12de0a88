//! HCI Controller Probe Tool
//!
//! A standalone tool to bring up the transport against a real controller,
//! send an HCI Reset, and dump whatever events come back.
//!
//! Usage:
//!   cargo run --example hci_reset -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: first enumerated, else /dev/ttyUSB0)
//!   --baud RATE       Baud rate (default: 115200)
//!   --wait MS         How long to wait for the reset response (default: 2000)
//!   --list            List candidate serial ports and exit

use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use bluewire_core::transport::{HciTransport, TransportConfig};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bluewire_core=debug".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port_name: Option<String> = None;
    let mut baud_rate = 115_200u32;
    let mut wait_ms = 2000u64;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    port_name = Some(args[i].clone());
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    baud_rate = args[i].parse().unwrap_or(115_200);
                }
            }
            "--wait" | "-w" => {
                i += 1;
                if i < args.len() {
                    wait_ms = args[i].parse().unwrap_or(2000);
                }
            }
            "--list" | "-l" => {
                for port in HciTransport::list_ports() {
                    println!("{}  {:?}", port.name, port.product);
                }
                return Ok(());
            }
            other => {
                port_name = Some(other.to_string());
            }
        }
        i += 1;
    }

    let port_name = port_name
        .or_else(|| HciTransport::list_ports().first().map(|p| p.name.clone()))
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    println!("Opening {} at {} baud", port_name, baud_rate);

    let config = TransportConfig {
        port_name,
        baud_rate,
        ..Default::default()
    };
    let mut transport = HciTransport::new(config);

    let (ready_tx, ready_rx) = mpsc::channel::<()>();
    transport
        .open(move |_| {
            let _ = ready_tx.send(());
        })
        .context("failed to open transport")?;

    // HCI Reset: ogf 0x03, ocf 0x003, no parameters.
    let reset = [0x01u8, 0x03, 0x0C, 0x00];
    transport.write(&reset).context("failed to send HCI Reset")?;
    println!("Sent HCI Reset, waiting {}ms for events...", wait_ms);

    let mut buf = [0u8; 512];
    let deadline = std::time::Instant::now() + Duration::from_millis(wait_ms);
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        if ready_rx.recv_timeout(remaining).is_err() {
            break;
        }
        loop {
            let n = transport.read(&mut buf);
            if n == 0 {
                break;
            }
            println!("<< {:02x?}", &buf[..n]);
        }
    }

    let counters = transport.counters();
    println!(
        "Done: {} bytes out, {} bytes in across {} packets",
        counters.tx_bytes, counters.rx_bytes, counters.rx_packets
    );

    transport.close().context("failed to close transport")?;
    Ok(())
}
