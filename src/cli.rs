// src/cli.rs
//
// Command-line arguments and their merge onto the settings file.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::classifier::DetectionMode;
use crate::io::serial::{ByteSize, Parity, ProtocolType, StopBits};
use crate::io::TapError;
use crate::render::{DisplayMode, LogFormat};
use crate::settings::{PortEntry, TapSettings};

/// Passive, read-only serial port tap. Reassembles packets from the byte
/// stream and labels them TX/RX.
#[derive(Parser, Debug)]
#[command(name = "serialtap")]
#[command(version, about, long_about = None)]
#[command(after_help = "\
Port descriptor:
  /dev/ttyACM1                      port, label = ttyACM1, default baud
  /dev/ttyACM1:PLC                  port with label
  /dev/ttyACM1:PLC:9600             port with label and baud rate
  /dev/ttyUSB0:Bus:19200:rs485      ... and protocol (rs232, rs422, rs485)

Log file variables:
  {date} 20250225   {time} 103045   {datetime} 20250225_103045   {timestamp} unix seconds

Log line:
  TX : 2025-02-25 10:30:45.123 48 65 6C 6C 6F")]
pub struct Cli {
    /// Port to tap (repeatable): device[:label[:baud[:protocol]]]
    #[arg(short = 'p', long = "port", value_name = "DESCRIPTOR", action = ArgAction::Append)]
    pub ports: Vec<String>,

    /// Default baud rate for ports without one
    #[arg(short = 'b', long)]
    pub baudrate: Option<u32>,

    /// Data bits (5-8)
    #[arg(long, value_parser = parse_byte_size)]
    pub bytesize: Option<ByteSize>,

    /// Parity: N, E, O, M or S
    #[arg(long, value_parser = parse_parity)]
    pub parity: Option<Parity>,

    /// Stop bits: 1, 1.5 or 2
    #[arg(long, value_parser = parse_stop_bits)]
    pub stopbits: Option<StopBits>,

    /// Default protocol type: rs232, rs422 or rs485
    #[arg(long, value_parser = parse_protocol)]
    pub protocol: Option<ProtocolType>,

    /// Console display: hex, ascii, both or none
    #[arg(short = 'd', long)]
    pub display: Option<DisplayMode>,

    /// Packet log file (supports {date}, {time}, {datetime}, {timestamp})
    #[arg(short = 'l', long = "log", value_name = "PATH")]
    pub log_file: Option<String>,

    /// Packet log format: hex, ascii or json
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Quiet period in milliseconds that ends a packet
    #[arg(long, value_name = "MS")]
    pub packet_timeout: Option<u64>,

    /// Direction detection: none, alternating, pattern, size, rs485, auto
    #[arg(short = 'm', long = "mode")]
    pub detection: Option<DetectionMode>,

    /// Disable TX/RX detection (every packet is RX)
    #[arg(long, default_value_t = false, conflicts_with = "detection")]
    pub no_direction: bool,

    /// List available serial ports and exit
    #[arg(long, default_value_t = false)]
    pub list: bool,

    /// Settings file (default: <config dir>/serialtap/config.toml)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// More diagnostics on stderr (-v debug, -vv trace)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Overlay command-line values on loaded settings. Ports given on the
    /// command line replace the file's port list.
    pub fn apply(&self, settings: &mut TapSettings) -> Result<(), TapError> {
        if let Some(baud) = self.baudrate {
            settings.baud_rate = baud;
        }
        if let Some(size) = self.bytesize {
            settings.byte_size = size;
        }
        if let Some(parity) = self.parity {
            settings.parity = parity;
        }
        if let Some(stop_bits) = self.stopbits {
            settings.stop_bits = stop_bits;
        }
        if let Some(protocol) = self.protocol {
            settings.protocol = protocol;
        }
        if let Some(display) = self.display {
            settings.display = display;
        }
        if let Some(log_file) = &self.log_file {
            settings.log_file = Some(log_file.clone());
        }
        if let Some(format) = self.log_format {
            settings.log_format = format;
        }
        if let Some(timeout) = self.packet_timeout {
            settings.packet_timeout_ms = timeout;
        }
        if let Some(mode) = self.detection {
            settings.detection = mode;
        }
        if self.no_direction {
            settings.detection = DetectionMode::None;
        }
        if !self.ports.is_empty() {
            settings.ports = self
                .ports
                .iter()
                .map(|d| parse_port_descriptor(d))
                .collect::<Result<_, _>>()?;
        }
        Ok(())
    }
}

/// `device[:label[:baud[:protocol]]]`. Empty label means the device basename.
pub fn parse_port_descriptor(descriptor: &str) -> Result<PortEntry, TapError> {
    let mut parts = descriptor.split(':').map(str::trim);
    let device = parts.next().unwrap_or_default();
    if device.is_empty() {
        return Err(TapError::InvalidConfig(format!(
            "port descriptor '{}' has no device path",
            descriptor
        )));
    }

    let mut entry = PortEntry::new(device);
    if let Some(label) = parts.next().filter(|l| !l.is_empty()) {
        entry.label = Some(label.to_string());
    }
    if let Some(baud) = parts.next().filter(|b| !b.is_empty()) {
        let baud = baud.parse::<u32>().ok().filter(|b| *b > 0).ok_or_else(|| {
            TapError::InvalidConfig(format!(
                "invalid baud rate '{}' for port {}",
                baud, device
            ))
        })?;
        entry.baud_rate = Some(baud);
    }
    if let Some(protocol) = parts.next().filter(|p| !p.is_empty()) {
        entry.protocol = Some(ProtocolType::parse(protocol).ok_or_else(|| {
            TapError::InvalidConfig(format!(
                "invalid protocol '{}' for port {} (expected rs232, rs422 or rs485)",
                protocol, device
            ))
        })?);
    }
    if parts.next().is_some() {
        return Err(TapError::InvalidConfig(format!(
            "port descriptor '{}' has too many fields",
            descriptor
        )));
    }
    Ok(entry)
}

fn parse_byte_size(s: &str) -> Result<ByteSize, String> {
    let bits: u8 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    ByteSize::try_from(bits)
}

fn parse_parity(s: &str) -> Result<Parity, String> {
    Parity::parse(s).ok_or_else(|| format!("unknown parity '{}' (expected N, E, O, M or S)", s))
}

fn parse_stop_bits(s: &str) -> Result<StopBits, String> {
    let bits: f32 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    StopBits::try_from(bits)
}

fn parse_protocol(s: &str) -> Result<ProtocolType, String> {
    ProtocolType::parse(s)
        .ok_or_else(|| format!("unknown protocol '{}' (expected rs232, rs422 or rs485)", s))
}
