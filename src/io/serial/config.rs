// src/io/serial/config.rs
//
// Line settings for a tapped port. Immutable once a session starts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::io::TapError;

// ============================================================================
// Line Parameters
// ============================================================================

/// Data bits per character
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ByteSize {
    Five,
    Six,
    Seven,
    Eight,
}

impl Default for ByteSize {
    fn default() -> Self {
        ByteSize::Eight
    }
}

impl TryFrom<u8> for ByteSize {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            5 => Ok(ByteSize::Five),
            6 => Ok(ByteSize::Six),
            7 => Ok(ByteSize::Seven),
            8 => Ok(ByteSize::Eight),
            other => Err(format!("byte size must be 5, 6, 7 or 8 (got {})", other)),
        }
    }
}

impl From<ByteSize> for u8 {
    fn from(size: ByteSize) -> u8 {
        match size {
            ByteSize::Five => 5,
            ByteSize::Six => 6,
            ByteSize::Seven => 7,
            ByteSize::Eight => 8,
        }
    }
}

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl Default for Parity {
    fn default() -> Self {
        Parity::None
    }
}

impl Parity {
    /// Single-letter code used in `8N1` style summaries
    pub fn letter(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }

    /// Parse either the letter code (`N`, `E`, ...) or the full name
    pub fn parse(s: &str) -> Option<Parity> {
        match s.to_ascii_lowercase().as_str() {
            "n" | "none" => Some(Parity::None),
            "e" | "even" => Some(Parity::Even),
            "o" | "odd" => Some(Parity::Odd),
            "m" | "mark" => Some(Parity::Mark),
            "s" | "space" => Some(Parity::Space),
            _ => None,
        }
    }
}

/// Stop bits per character
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl Default for StopBits {
    fn default() -> Self {
        StopBits::One
    }
}

impl TryFrom<f32> for StopBits {
    type Error = String;

    fn try_from(bits: f32) -> Result<Self, Self::Error> {
        if bits == 1.0 {
            Ok(StopBits::One)
        } else if bits == 1.5 {
            Ok(StopBits::OnePointFive)
        } else if bits == 2.0 {
            Ok(StopBits::Two)
        } else {
            Err(format!("stop bits must be 1, 1.5 or 2 (got {})", bits))
        }
    }
}

impl From<StopBits> for f32 {
    fn from(bits: StopBits) -> f32 {
        match bits {
            StopBits::One => 1.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopBits::One => f.write_str("1"),
            StopBits::OnePointFive => f.write_str("1.5"),
            StopBits::Two => f.write_str("2"),
        }
    }
}

/// Electrical standard of the tapped link
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    Rs232,
    Rs422,
    Rs485,
}

impl Default for ProtocolType {
    fn default() -> Self {
        ProtocolType::Rs232
    }
}

impl ProtocolType {
    pub fn parse(s: &str) -> Option<ProtocolType> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "rs232" => Some(ProtocolType::Rs232),
            "rs422" => Some(ProtocolType::Rs422),
            "rs485" => Some(ProtocolType::Rs485),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolType::Rs232 => f.write_str("RS-232"),
            ProtocolType::Rs422 => f.write_str("RS-422"),
            ProtocolType::Rs485 => f.write_str("RS-485"),
        }
    }
}

// ============================================================================
// Port Configuration
// ============================================================================

/// Configuration for one tapped port. `device_path` is the unique key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    pub device_path: String,
    /// Display name; defaults to the basename of the device path
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub byte_size: ByteSize,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub protocol: ProtocolType,
}

fn default_baud_rate() -> u32 {
    9600
}

impl PortConfig {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            label: None,
            baud_rate: default_baud_rate(),
            byte_size: ByteSize::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            protocol: ProtocolType::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolType) -> Self {
        self.protocol = protocol;
        self
    }

    /// Label if set, else the basename of the device path
    pub fn display_label(&self) -> String {
        match &self.label {
            Some(label) if !label.is_empty() => label.clone(),
            _ => Path::new(&self.device_path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.device_path.clone()),
        }
    }

    /// `9600 8N1` style summary
    pub fn line_summary(&self) -> String {
        format!(
            "{} {}{}{}",
            self.baud_rate,
            u8::from(self.byte_size),
            self.parity.letter(),
            self.stop_bits
        )
    }

    pub fn validate(&self) -> Result<(), TapError> {
        if self.device_path.trim().is_empty() {
            return Err(TapError::InvalidConfig("device path is empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(TapError::InvalidConfig(format!(
                "{}: baud rate must be greater than zero",
                self.device_path
            )));
        }
        Ok(())
    }
}

/// Validate a whole port list: each port individually, plus unique device paths
pub fn validate_ports(ports: &[PortConfig]) -> Result<(), TapError> {
    if ports.is_empty() {
        return Err(TapError::InvalidConfig(
            "at least one port must be configured".to_string(),
        ));
    }
    let mut seen = std::collections::HashSet::new();
    for port in ports {
        port.validate()?;
        if !seen.insert(port.device_path.as_str()) {
            return Err(TapError::InvalidConfig(format!(
                "device {} is configured more than once",
                port.device_path
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_defaults_to_basename() {
        let port = PortConfig::new("/dev/ttyACM1");
        assert_eq!(port.display_label(), "ttyACM1");

        let port = PortConfig::new("/dev/ttyACM1").with_label("Device A");
        assert_eq!(port.display_label(), "Device A");

        let port = PortConfig::new("COM3");
        assert_eq!(port.display_label(), "COM3");
    }

    #[test]
    fn test_byte_size_bounds() {
        assert_eq!(ByteSize::try_from(5), Ok(ByteSize::Five));
        assert_eq!(ByteSize::try_from(8), Ok(ByteSize::Eight));
        assert!(ByteSize::try_from(9).is_err());
        assert!(ByteSize::try_from(4).is_err());
    }

    #[test]
    fn test_stop_bits_from_float() {
        assert_eq!(StopBits::try_from(1.5), Ok(StopBits::OnePointFive));
        assert!(StopBits::try_from(3.0).is_err());
    }

    #[test]
    fn test_parity_parse() {
        assert_eq!(Parity::parse("N"), Some(Parity::None));
        assert_eq!(Parity::parse("mark"), Some(Parity::Mark));
        assert_eq!(Parity::parse("x"), None);
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!(ProtocolType::parse("RS485"), Some(ProtocolType::Rs485));
        assert_eq!(ProtocolType::parse("rs-422"), Some(ProtocolType::Rs422));
        assert_eq!(ProtocolType::parse("can"), None);
    }

    #[test]
    fn test_line_summary() {
        let port = PortConfig::new("/dev/ttyS0").with_baud_rate(115200);
        assert_eq!(port.line_summary(), "115200 8N1");
    }

    #[test]
    fn test_validate_ports_rejects_duplicates() {
        let ports = vec![PortConfig::new("/dev/ttyS0"), PortConfig::new("/dev/ttyS0")];
        let err = validate_ports(&ports).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_validate_ports_rejects_empty_list() {
        assert!(validate_ports(&[]).is_err());
    }

    #[test]
    fn test_port_config_from_toml_defaults() {
        let port: PortConfig = toml::from_str(
            r#"
            device_path = "/dev/ttyUSB0"
            protocol = "rs485"
            stop_bits = 1.5
            byte_size = 7
            "#,
        )
        .unwrap();
        assert_eq!(port.baud_rate, 9600);
        assert_eq!(port.protocol, ProtocolType::Rs485);
        assert_eq!(port.stop_bits, StopBits::OnePointFive);
        assert_eq!(port.byte_size, ByteSize::Seven);
        assert_eq!(port.parity, Parity::None);
    }
}
