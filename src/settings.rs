// src/settings.rs
//
// Session settings: TOML file, then command-line overrides (see cli.rs).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CaptureOptions;
use crate::classifier::{DetectionMode, PatternSeed};
use crate::io::serial::utils::{character_time, recommended_packet_timeout};
use crate::io::serial::{validate_ports, ByteSize, Parity, PortConfig, ProtocolType, StopBits};
use crate::io::TapError;
use crate::render::{DisplayMode, LogFormat};

/// A port as written in the settings file. Unset line parameters fall back
/// to the session-wide defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortEntry {
    pub device_path: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub baud_rate: Option<u32>,
    #[serde(default)]
    pub byte_size: Option<ByteSize>,
    #[serde(default)]
    pub parity: Option<Parity>,
    #[serde(default)]
    pub stop_bits: Option<StopBits>,
    #[serde(default)]
    pub protocol: Option<ProtocolType>,
}

impl PortEntry {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            label: None,
            baud_rate: None,
            byte_size: None,
            parity: None,
            stop_bits: None,
            protocol: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapSettings {
    #[serde(default = "default_packet_timeout_ms")]
    pub packet_timeout_ms: u64,
    #[serde(default)]
    pub detection: DetectionMode,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64, // serial read timeout
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
    #[serde(default)]
    pub display: DisplayMode,
    #[serde(default)]
    pub log_file: Option<String>, // may contain {date}, {time}, {datetime}, {timestamp}
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub ports: Vec<PortEntry>,
    #[serde(default)]
    pub pattern_seeds: Vec<PatternSeed>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_packet_timeout_ms() -> u64 {
    50
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_channel_capacity() -> usize {
    1024
}

impl Default for TapSettings {
    fn default() -> Self {
        Self {
            packet_timeout_ms: default_packet_timeout_ms(),
            detection: DetectionMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            baud_rate: default_baud_rate(),
            byte_size: ByteSize::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            protocol: ProtocolType::default(),
            display: DisplayMode::default(),
            log_file: None,
            log_format: LogFormat::default(),
            ports: Vec::new(),
            pattern_seeds: Vec::new(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// `<config dir>/serialtap/config.toml`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("serialtap").join("config.toml"))
}

impl TapSettings {
    pub fn from_toml_str(contents: &str) -> Result<Self, TapError> {
        toml::from_str(contents).map_err(|e| TapError::Settings(e.to_string()))
    }

    /// Load an explicit file (must exist), else the default location if
    /// present, else built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, TapError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_settings_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let contents = std::fs::read_to_string(&path)
            .map_err(|e| TapError::Settings(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
            .map_err(|e| TapError::Settings(format!("{}: {}", path.display(), e)))
    }

    pub fn packet_timeout(&self) -> Duration {
        Duration::from_millis(self.packet_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Fill a port entry's unset fields from the session defaults
    pub fn resolve_port(&self, entry: &PortEntry) -> PortConfig {
        PortConfig {
            device_path: entry.device_path.clone(),
            label: entry.label.clone().filter(|l| !l.is_empty()),
            baud_rate: entry.baud_rate.unwrap_or(self.baud_rate),
            byte_size: entry.byte_size.unwrap_or(self.byte_size),
            parity: entry.parity.unwrap_or(self.parity),
            stop_bits: entry.stop_bits.unwrap_or(self.stop_bits),
            protocol: entry.protocol.unwrap_or(self.protocol),
        }
    }

    pub fn port_configs(&self) -> Vec<PortConfig> {
        self.ports.iter().map(|p| self.resolve_port(p)).collect()
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            packet_timeout: self.packet_timeout(),
            detection: self.detection,
            pattern_seeds: self.pattern_seeds.clone(),
            channel_capacity: self.channel_capacity,
        }
    }

    pub fn validate(&self) -> Result<(), TapError> {
        if self.packet_timeout_ms == 0 {
            return Err(TapError::InvalidConfig(
                "packet timeout must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(TapError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(TapError::InvalidConfig(
                "channel capacity must be greater than zero".to_string(),
            ));
        }
        if let Some(seed) = self.pattern_seeds.iter().find(|s| s.prefix.is_empty()) {
            return Err(TapError::InvalidConfig(format!(
                "pattern seed for {} has an empty prefix",
                seed.direction
            )));
        }
        validate_ports(&self.port_configs())
    }

    /// Timing settings that are likely to mis-frame traffic
    pub fn timing_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let timeout = self.packet_timeout();
        let ports = self.port_configs();

        if let Some(fastest) = ports.iter().max_by_key(|p| p.baud_rate) {
            let recommended = recommended_packet_timeout(fastest.baud_rate);
            if timeout > recommended * 4 || timeout * 4 < recommended {
                warnings.push(format!(
                    "packet timeout {}ms is far from the {}ms suggested for {} baud",
                    self.packet_timeout_ms,
                    recommended.as_millis(),
                    fastest.baud_rate
                ));
            }
        }

        for port in &ports {
            let char_time =
                character_time(port.baud_rate, port.byte_size, port.parity, port.stop_bits);
            if timeout < char_time * 2 {
                warnings.push(format!(
                    "{}: packet timeout is shorter than two characters at {} baud; frames will be split",
                    port.display_label(),
                    port.baud_rate
                ));
            }
        }

        if self.poll_interval() > timeout {
            warnings.push(format!(
                "poll interval {}ms exceeds packet timeout {}ms; packets are finalised late",
                self.poll_interval_ms, self.packet_timeout_ms
            ));
        }

        warnings
    }
}
