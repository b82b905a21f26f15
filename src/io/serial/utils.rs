// src/io/serial/utils.rs
//
// Shared utilities for serial port sessions.
// Conversion to the serialport crate's types, timing guidance, port enumeration.

use serde::Serialize;
use serialport::{DataBits, Parity as SpParity, StopBits as SpStopBits};
use std::time::Duration;

use super::config::{ByteSize, Parity, StopBits};

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert our Parity enum to serialport crate's Parity type.
/// Mark and Space have no serialport equivalent and open without parity.
pub fn to_serialport_parity(p: &Parity) -> SpParity {
    match p {
        Parity::None | Parity::Mark | Parity::Space => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Convert data bits count to serialport crate's DataBits type
pub fn to_serialport_data_bits(bits: ByteSize) -> DataBits {
    match bits {
        ByteSize::Five => DataBits::Five,
        ByteSize::Six => DataBits::Six,
        ByteSize::Seven => DataBits::Seven,
        ByteSize::Eight => DataBits::Eight,
    }
}

/// Convert stop bits to serialport crate's StopBits type.
/// 1.5 is not supported by serialport and opens as two stop bits.
pub fn to_serialport_stop_bits(bits: StopBits) -> SpStopBits {
    match bits {
        StopBits::One => SpStopBits::One,
        StopBits::OnePointFive | StopBits::Two => SpStopBits::Two,
    }
}

/// Settings that can't be applied exactly, for a warning at open time
pub fn approximated_settings(parity: Parity, stop_bits: StopBits) -> Vec<&'static str> {
    let mut notes = Vec::new();
    if matches!(parity, Parity::Mark | Parity::Space) {
        notes.push("mark/space parity opened as no parity");
    }
    if stop_bits == StopBits::OnePointFive {
        notes.push("1.5 stop bits opened as 2");
    }
    notes
}

// ============================================================================
// Timing
// ============================================================================

/// Default quiet period between packets
pub const DEFAULT_PACKET_TIMEOUT: Duration = Duration::from_millis(50);

/// Suggested packet timeout for a baud rate.
/// Slow links need longer quiet periods because a single character takes
/// longer on the wire and drivers deliver in smaller bursts.
pub fn recommended_packet_timeout(baud_rate: u32) -> Duration {
    let ms = match baud_rate {
        0..=9_600 => 75,
        9_601..=19_200 => 40,
        19_201..=38_400 => 25,
        38_401..=57_600 => 18,
        57_601..=115_200 => 12,
        115_201..=900_000 => 10,
        _ => 8,
    };
    Duration::from_millis(ms)
}

/// Time on the wire for one character at the given line settings
pub fn character_time(baud_rate: u32, byte_size: ByteSize, parity: Parity, stop_bits: StopBits) -> Duration {
    if baud_rate == 0 {
        return Duration::ZERO;
    }
    let parity_bits = if parity == Parity::None { 0.0 } else { 1.0 };
    let bits = 1.0 + f64::from(u8::from(byte_size)) + parity_bits + f64::from(f32::from(stop_bits));
    Duration::from_secs_f64(bits / f64::from(baud_rate))
}

// ============================================================================
// Port Enumeration
// ============================================================================

/// USB identity of a port, when the OS reports one
#[derive(Clone, Debug, Serialize)]
pub struct UsbIdentity {
    pub vid: u16,
    pub pid: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

/// A serial device present on this host
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    /// "USB", "PCI", "Bluetooth" or "Unknown"
    pub port_type: &'static str,
    pub usb: Option<UsbIdentity>,
}

impl SerialPortInfo {
    /// Product name, else manufacturer, else the port type
    pub fn description(&self) -> &str {
        self.usb
            .as_ref()
            .and_then(|usb| usb.product.as_deref().or(usb.manufacturer.as_deref()))
            .unwrap_or(self.port_type)
    }
}

impl From<serialport::SerialPortInfo> for SerialPortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let (port_type, usb) = match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => (
                "USB",
                Some(UsbIdentity {
                    vid: usb.vid,
                    pid: usb.pid,
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                    serial_number: usb.serial_number,
                }),
            ),
            serialport::SerialPortType::PciPort => ("PCI", None),
            serialport::SerialPortType::BluetoothPort => ("Bluetooth", None),
            serialport::SerialPortType::Unknown => ("Unknown", None),
        };
        SerialPortInfo {
            port_name: info.port_name,
            port_type,
            usb,
        }
    }
}

/// macOS lists every device twice; the tty.* node blocks on open waiting
/// for carrier detect, so only cu.* is offered
fn is_listed(port_name: &str) -> bool {
    !(cfg!(target_os = "macos") && port_name.starts_with("/dev/tty."))
}

/// Serial devices available to tap, sorted by name
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, serialport::Error> {
    let mut ports: Vec<SerialPortInfo> = serialport::available_ports()?
        .into_iter()
        .filter(|p| is_listed(&p.port_name))
        .map(SerialPortInfo::from)
        .collect();
    ports.sort_by(|a, b| a.port_name.cmp(&b.port_name));
    Ok(ports)
}

// ============================================================================
// Tests
// ============================================================================
