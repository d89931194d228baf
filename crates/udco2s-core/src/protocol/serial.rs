//! Serial port handling
//!
//! Opens and configures the sensor's USB CDC serial device.

use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialPortType, StopBits};
use std::time::Duration;
use tracing::debug;

use super::{DriverError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    /// Whether the name is one a CDC-ACM device such as the sensor gets
    pub fn is_cdc_acm(&self) -> bool {
        self.name.contains("ttyACM") || self.name.contains("usbmodem")
    }

    fn rank(&self) -> u8 {
        match (self.is_cdc_acm(), self.vid.is_some()) {
            (true, _) => 0,
            (false, true) => 1,
            (false, false) => 2,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => (Some(usb.vid), Some(usb.pid), usb.product),
            _ => (None, None, None),
        };
        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Order candidates: CDC-ACM devices, then other USB ports, then the rest
pub fn sort_ports(ports: &mut [PortInfo]) {
    ports.sort_by(|a, b| a.rank().cmp(&b.rank()).then_with(|| a.name.cmp(&b.name)));
}

/// List serial ports the sensor may be attached to, most likely first
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = match serialport::available_ports() {
        Ok(found) => found.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            debug!(error = %e, "serial port enumeration failed");
            Vec::new()
        }
    };
    sort_ports(&mut ports);
    ports
}

/// Open a serial port for the sensor
///
/// `read_timeout` bounds every blocking read; `None` uses
/// [`DEFAULT_READ_TIMEOUT_MS`].
pub fn open_port(
    name: &str,
    baud_rate: Option<u32>,
    read_timeout: Option<Duration>,
) -> Result<Box<dyn SerialPort>, DriverError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
    let timeout = read_timeout.unwrap_or(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS));

    serialport::new(name, baud)
        .timeout(timeout)
        .open()
        .map_err(|source| DriverError::TransportOpen {
            path: name.to_string(),
            source,
        })
}

/// Configure a serial port as 8N1 without flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), DriverError> {
    port.set_data_bits(DataBits::Eight)?;
    port.set_parity(Parity::None)?;
    port.set_stop_bits(StopBits::One)?;
    port.set_flow_control(FlowControl::None)?;

    // CDC firmware only transmits while DTR is asserted
    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!("failed to set DTR high: {} (continuing)", e);
    }

    Ok(())
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), DriverError> {
    port.clear(serialport::ClearBuffer::All)?;
    Ok(())
}
