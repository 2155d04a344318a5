//! Serial port discovery and setup
//!
//! Thin layer over `serialport`; framing and timing live in the transport.

use serialport::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialPortType,
    StopBits,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{BaudRate, ProtocolError};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key putting USB-serial adapters first:
///  - ttyACM* ports (numeric suffix order)
///  - ttyUSB* and tty.wchusbserial*/tty.usbserial* ports
///  - everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let numeric = |rest: &str| rest.parse::<usize>().unwrap_or(usize::MAX);

    if let Some(rest) = basename.strip_prefix("ttyACM") {
        return (0, numeric(rest), basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        return (1, numeric(rest), basename.to_string());
    }
    if basename.contains("usbserial") {
        return (1, usize::MAX, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial ports in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut found: BTreeMap<String, PortInfo> = BTreeMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let port = PortInfo::from(info);
                found.entry(port.name.clone()).or_insert(port);
            }
        }
        Err(e) => warn!("serial port enumeration failed: {}", e),
    }

    // Linux: udev-less containers often miss adapters the kernel exposes
    #[cfg(target_os = "linux")]
    if let Ok(entries) = std::fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    found
                        .entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = found.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Open a serial port at the given rate, framed 8N1 without flow control
pub fn open_port(
    name: &str,
    baud: BaudRate,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    debug!(port = name, baud = baud.as_u32(), "opening serial port");
    serialport::new(name, baud.as_u32())
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(|e| ProtocolError::SerialError(format!("{}: {}", name, e)))
}

/// Assert the modem control lines after opening.
///
/// Some USB bridges power the module from DTR/RTS, others leave them
/// unconnected, so a refusal is logged and ignored.
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    let lines = [
        ("DTR", port.write_data_terminal_ready(true)),
        ("RTS", port.write_request_to_send(true)),
    ];
    for (line, result) in lines {
        if let Err(e) = result {
            debug!("could not raise {}: {}", line, e);
        }
    }
    Ok(())
}

/// Drop anything either side queued before the session started
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(ClearBuffer::All)
        .map_err(|e| ProtocolError::SerialError(format!("clearing buffers: {}", e)))
}
