// src/render.rs
//
// Packet sinks for the command-line tap: console rendering, packet log
// files, and the session banner / statistics report.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::capture::{CaptureReport, PacketSink};
use crate::io::serial::PortConfig;
use crate::io::{Direction, PacketEvent, PortEndReason};

const RULE_WIDTH: usize = 80;

// ============================================================================
// Modes
// ============================================================================

/// Console rendering of packet payloads
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Hex,
    Ascii,
    #[default]
    Both,
    /// Print nothing per packet (statistics only)
    None,
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hex" => Ok(DisplayMode::Hex),
            "ascii" => Ok(DisplayMode::Ascii),
            "both" => Ok(DisplayMode::Both),
            "none" => Ok(DisplayMode::None),
            other => Err(format!(
                "unknown display mode '{}' (expected hex, ascii, both or none)",
                other
            )),
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisplayMode::Hex => "HEX",
            DisplayMode::Ascii => "ASCII",
            DisplayMode::Both => "BOTH",
            DisplayMode::None => "NONE",
        })
    }
}

/// Packet log file line format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Hex,
    Ascii,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            LogFormat::Hex | LogFormat::Ascii => "txt",
            LogFormat::Json => "jsonl",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hex" => Ok(LogFormat::Hex),
            "ascii" => Ok(LogFormat::Ascii),
            "json" | "jsonl" => Ok(LogFormat::Json),
            other => Err(format!(
                "unknown log format '{}' (expected hex, ascii or json)",
                other
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Hex => "HEX",
            LogFormat::Ascii => "ASCII",
            LogFormat::Json => "JSON",
        })
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// `48 65 6C`
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Printable ASCII as-is, everything else as `[XX]`
pub fn format_ascii(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (32..127).contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("[{:02X}]", b));
        }
    }
    out
}

/// Printable ASCII as-is, everything else as `.` (column-aligned with hex)
pub fn format_ascii_dotted(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if (32..127).contains(&b) { b as char } else { '.' })
        .collect()
}

/// `YYYY-MM-DD HH:MM:SS.mmm` in the given zone
pub fn format_timestamp_in<Tz: TimeZone>(timestamp_us: u64, tz: &Tz) -> String
where
    Tz::Offset: fmt::Display,
{
    match DateTime::<Utc>::from_timestamp_micros(timestamp_us as i64) {
        Some(utc) => utc
            .with_timezone(tz)
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string(),
        None => timestamp_us.to_string(),
    }
}

/// Local wall-clock rendering of a capture timestamp
pub fn format_timestamp(timestamp_us: u64) -> String {
    format_timestamp_in(timestamp_us, &Local)
}

fn arrow(direction: Direction) -> &'static str {
    match direction {
        Direction::Tx => "→",
        Direction::Rx => "←",
        Direction::Unknown => "?",
    }
}

// ============================================================================
// Console
// ============================================================================

/// Human-readable packet blocks
pub struct ConsoleSink<W: Write + Send> {
    out: W,
    mode: DisplayMode,
    show_direction: bool,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout(mode: DisplayMode, show_direction: bool) -> Self {
        Self::new(io::stdout(), mode, show_direction)
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W, mode: DisplayMode, show_direction: bool) -> Self {
        Self {
            out,
            mode,
            show_direction,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_packet(&mut self, event: &PacketEvent) -> io::Result<()> {
        let out = &mut self.out;
        writeln!(out, "{}", "─".repeat(RULE_WIDTH))?;
        let direction = if self.show_direction {
            format!("{} {} | ", arrow(event.direction), event.direction)
        } else {
            String::new()
        };
        writeln!(
            out,
            "[{}] {} ({}) {}Length: {} bytes",
            format_timestamp(event.start_timestamp_us),
            event.port_label,
            event.device_path,
            direction,
            event.byte_length
        )?;

        match self.mode {
            DisplayMode::Hex => writeln!(out, "HEX:   {}", format_hex(&event.raw_bytes))?,
            DisplayMode::Ascii => writeln!(out, "ASCII: {}", format_ascii(&event.raw_bytes))?,
            DisplayMode::Both => {
                writeln!(out, "HEX:   {}", format_hex(&event.raw_bytes))?;
                writeln!(out, "ASCII: {}", format_ascii_dotted(&event.raw_bytes))?;
            }
            DisplayMode::None => {}
        }
        writeln!(out)?;
        out.flush()
    }
}

impl<W: Write + Send> PacketSink for ConsoleSink<W> {
    fn on_packet(&mut self, event: &PacketEvent) {
        if self.mode == DisplayMode::None {
            return;
        }
        if let Err(e) = self.write_packet(event) {
            warn!("[Console] Write failed: {}", e);
        }
    }

    fn on_port_ended(&mut self, port: &PortConfig, reason: &PortEndReason) {
        if let PortEndReason::DeviceLost(message) = reason {
            let _ = writeln!(
                self.out,
                "!! {} ({}) disconnected: {}",
                port.display_label(),
                port.device_path,
                message
            );
        }
    }
}

// ============================================================================
// Packet Log File
// ============================================================================

/// Expand `{date}`, `{time}`, `{datetime}` and `{timestamp}` in a log path and
/// make sure it carries the format's extension.
pub fn expand_log_path<Tz: TimeZone>(
    template: &str,
    now: &DateTime<Tz>,
    format: LogFormat,
) -> PathBuf
where
    Tz::Offset: fmt::Display,
{
    let expanded = template
        .replace("{datetime}", &now.format("%Y%m%d_%H%M%S").to_string())
        .replace("{date}", &now.format("%Y%m%d").to_string())
        .replace("{time}", &now.format("%H%M%S").to_string())
        .replace("{timestamp}", &now.timestamp().to_string());

    let suffix = format!(".{}", format.extension());
    if expanded.ends_with(&suffix) {
        PathBuf::from(expanded)
    } else {
        PathBuf::from(format!("{}{}", expanded, suffix))
    }
}

/// Appends one line per packet and flushes after each
pub struct LogFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    format: LogFormat,
    failed: bool,
}

impl LogFileSink {
    pub fn create(path: &Path, format: LogFormat) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("[PacketLog] Writing {} packets to {}", format, path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            format,
            failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&mut self, event: &PacketEvent) -> io::Result<()> {
        match self.format {
            LogFormat::Hex | LogFormat::Ascii => {
                let data = if self.format == LogFormat::Ascii {
                    format_ascii(&event.raw_bytes)
                } else {
                    format_hex(&event.raw_bytes)
                };
                writeln!(
                    self.writer,
                    "{} : {} {}",
                    event.direction,
                    format_timestamp(event.start_timestamp_us),
                    data
                )?;
            }
            LogFormat::Json => {
                serde_json::to_writer(&mut self.writer, event)?;
                writeln!(self.writer)?;
            }
        }
        self.writer.flush()
    }
}

impl PacketSink for LogFileSink {
    fn on_packet(&mut self, event: &PacketEvent) {
        if let Err(e) = self.write_event(event) {
            // Report once; the capture itself carries on
            if !self.failed {
                warn!("[PacketLog] Write to {} failed: {}", self.path.display(), e);
                self.failed = true;
            }
        }
    }
}

// ============================================================================
// Banner and Report
// ============================================================================

/// What the banner shows about the session
pub struct SessionSummary<'a> {
    pub ports: &'a [PortConfig],
    pub display: DisplayMode,
    pub detection: &'a str,
    pub packet_timeout_ms: u64,
    pub log_file: Option<(&'a Path, LogFormat)>,
}

pub fn write_banner<W: Write>(out: &mut W, summary: &SessionSummary<'_>) -> io::Result<()> {
    let rule = "=".repeat(RULE_WIDTH);
    writeln!(out, "\n{}", rule)?;
    writeln!(out, "  SERIAL TAP - MONITORING ACTIVE (read-only)")?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "  Display Mode: {}", summary.display)?;
    writeln!(out, "  Packet Timeout: {}ms", summary.packet_timeout_ms)?;
    writeln!(out, "  Direction Detection: {}", summary.detection.to_uppercase())?;
    if let Some((path, format)) = summary.log_file {
        writeln!(out, "  Log File: {} | Log Format: {}", path.display(), format)?;
    }
    writeln!(out, "  Monitoring {} port(s):", summary.ports.len())?;
    for port in summary.ports {
        writeln!(
            out,
            "    - {} ({}) @ {} [{}]",
            port.display_label(),
            port.device_path,
            port.line_summary(),
            port.protocol
        )?;
    }
    writeln!(out, "\n  Press Ctrl+C to stop monitoring")?;
    writeln!(out, "{}\n", rule)
}

pub fn write_report<W: Write>(out: &mut W, report: &CaptureReport) -> io::Result<()> {
    let rule = "=".repeat(RULE_WIDTH);
    writeln!(out, "\n{}", rule)?;
    writeln!(out, "  COMMUNICATION STATISTICS")?;
    writeln!(out, "{}", rule)?;
    for port in &report.stats.ports {
        writeln!(out, "  {:<30} ({})", port.label, port.device_path)?;
        writeln!(
            out,
            "    Total Packets: {:<10} | Total Bytes: {}",
            port.total_packets, port.total_bytes
        )?;
        writeln!(
            out,
            "    TX Packets: {:<13} | TX Bytes: {}",
            port.tx_packets, port.tx_bytes
        )?;
        writeln!(
            out,
            "    RX Packets: {:<13} | RX Bytes: {}",
            port.rx_packets, port.rx_bytes
        )?;
        if port.unknown_packets > 0 || port.malformed_packets > 0 {
            writeln!(
                out,
                "    Unknown Packets: {:<8} | Malformed: {}",
                port.unknown_packets, port.malformed_packets
            )?;
        }
        if let Some(reason) = &port.end_reason {
            writeln!(out, "    Ended: {}", reason)?;
        }
    }
    writeln!(out, "{}\n", rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{PortId, ProtocolType};
    use crate::stats::{PortStats, StatsSnapshot};

    fn event(direction: Direction, bytes: &[u8]) -> PacketEvent {
        PacketEvent {
            port: PortId(0),
            port_label: "modem".to_string(),
            device_path: "/dev/ttyUSB0".to_string(),
            protocol: ProtocolType::Rs232,
            direction,
            start_timestamp_us: 1_740_479_445_123_000,
            end_timestamp_us: 1_740_479_445_124_000,
            byte_length: bytes.len(),
            raw_bytes: bytes.to_vec(),
            decided_by: "alternating".to_string(),
            malformed: false,
        }
    }

    #[test]
    fn test_format_hex_and_ascii() {
        assert_eq!(format_hex(b"Hel"), "48 65 6C");
        assert_eq!(format_hex(&[]), "");
        assert_eq!(format_ascii(b"OK\r\n"), "OK[0D][0A]");
        assert_eq!(format_ascii_dotted(b"OK\r\n"), "OK..");
        assert_eq!(format_ascii_dotted(&[0x7F, 0x20]), ". ");
    }

    #[test]
    fn test_timestamp_millis() {
        assert_eq!(
            format_timestamp_in(1_740_479_445_123_456, &Utc),
            "2025-02-25 10:30:45.123"
        );
    }

    #[test]
    fn test_expand_log_path() {
        let now = Utc.with_ymd_and_hms(2025, 2, 25, 10, 30, 45).unwrap();
        assert_eq!(
            expand_log_path("logs/tap_{datetime}", &now, LogFormat::Hex),
            PathBuf::from("logs/tap_20250225_103045.txt")
        );
        assert_eq!(
            expand_log_path("{date}-{time}.txt", &now, LogFormat::Ascii),
            PathBuf::from("20250225-103045.txt")
        );
        assert_eq!(
            expand_log_path("run_{timestamp}", &now, LogFormat::Json),
            PathBuf::from("run_1740479445.jsonl")
        );
    }

    #[test]
    fn test_console_both_mode() {
        let mut sink = ConsoleSink::new(Vec::new(), DisplayMode::Both, true);
        sink.on_packet(&event(Direction::Tx, b"AT\r\n"));
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.contains("modem (/dev/ttyUSB0) → TX | Length: 4 bytes"));
        assert!(text.contains("HEX:   41 54 0D 0A"));
        assert!(text.contains("ASCII: AT.."));
    }

    #[test]
    fn test_console_without_direction() {
        let mut sink = ConsoleSink::new(Vec::new(), DisplayMode::Ascii, false);
        sink.on_packet(&event(Direction::Rx, b"OK\r\n"));
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.contains("modem (/dev/ttyUSB0) Length: 4 bytes"));
        assert!(text.contains("ASCII: OK[0D][0A]"));
        assert!(!text.contains("HEX:"));
    }

    #[test]
    fn test_console_none_mode_is_silent() {
        let mut sink = ConsoleSink::new(Vec::new(), DisplayMode::None, true);
        sink.on_packet(&event(Direction::Rx, b"x"));
        assert!(sink.into_inner().is_empty());
    }

    #[test]
    fn test_log_file_hex_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tap.txt");
        let mut sink = LogFileSink::create(&path, LogFormat::Hex).unwrap();
        sink.on_packet(&event(Direction::Tx, b"Hel"));
        sink.on_packet(&event(Direction::Rx, &[0x06]));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("TX : "));
        assert!(lines[0].ends_with(" 48 65 6C"));
        assert!(lines[1].starts_with("RX : "));
        assert!(lines[1].ends_with(" 06"));
    }

    #[test]
    fn test_log_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tap.txt");
        for _ in 0..2 {
            let mut sink = LogFileSink::create(&path, LogFormat::Ascii).unwrap();
            sink.on_packet(&event(Direction::Tx, b"AT\r"));
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().all(|l| l.ends_with("AT[0D]")));
    }

    #[test]
    fn test_log_file_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tap.jsonl");
        let mut sink = LogFileSink::create(&path, LogFormat::Json).unwrap();
        sink.on_packet(&event(Direction::Rx, &[0x11, 0x03]));

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: PacketEvent = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(parsed.raw_bytes, vec![0x11, 0x03]);
        assert_eq!(parsed.direction, Direction::Rx);
        assert_eq!(parsed.port_label, "modem");
    }

    #[test]
    fn test_report_lists_every_port() {
        let report = CaptureReport {
            stats: StatsSnapshot {
                ports: vec![PortStats {
                    device_path: "/dev/ttyUSB0".into(),
                    label: "plc".into(),
                    total_packets: 3,
                    total_bytes: 12,
                    tx_packets: 1,
                    rx_packets: 1,
                    unknown_packets: 1,
                    malformed_packets: 1,
                    end_reason: Some(PortEndReason::Stopped),
                    ..PortStats::default()
                }],
            },
            interrupted: true,
        };
        let mut out = Vec::new();
        write_report(&mut out, &report).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("plc"));
        assert!(text.contains("Total Packets: 3"));
        assert!(text.contains("Malformed: 1"));
        assert!(text.contains("Ended: stopped"));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("HEX".parse::<DisplayMode>(), Ok(DisplayMode::Hex));
        assert!("colour".parse::<DisplayMode>().is_err());
        assert_eq!("jsonl".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(LogFormat::Json.extension(), "jsonl");
    }
}
