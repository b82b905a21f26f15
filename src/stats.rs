// src/stats.rs
//
// Per-port packet/byte counters. One slot per port, indexed by PortId;
// pipelines only touch their own slot, so recording never contends.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::io::serial::PortConfig;
use crate::io::{Direction, PortEndReason, PortId};

#[derive(Default)]
struct Counter {
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl Counter {
    fn add(&self, byte_length: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(byte_length as u64, Ordering::Relaxed);
    }

    fn load(&self) -> (u64, u64) {
        (
            self.packets.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }
}

struct PortSlot {
    device_path: String,
    label: String,
    tx: Counter,
    rx: Counter,
    unknown: Counter,
    malformed: AtomicU64,
    end_reason: Mutex<Option<PortEndReason>>,
}

/// Read-only counters for one port
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PortStats {
    pub device_path: String,
    pub label: String,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub unknown_packets: u64,
    pub unknown_bytes: u64,
    pub malformed_packets: u64,
    /// Set once the port's pipeline has finished
    pub end_reason: Option<PortEndReason>,
}

/// Snapshot of every port, in configuration order
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub ports: Vec<PortStats>,
}

impl StatsSnapshot {
    pub fn port(&self, device_path: &str) -> Option<&PortStats> {
        self.ports.iter().find(|p| p.device_path == device_path)
    }

    pub fn total_packets(&self) -> u64 {
        self.ports.iter().map(|p| p.total_packets).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.ports.iter().map(|p| p.total_bytes).sum()
    }
}

pub struct StatsAggregator {
    slots: Vec<PortSlot>,
}

impl StatsAggregator {
    pub fn new(ports: &[PortConfig]) -> Self {
        let slots = ports
            .iter()
            .map(|port| PortSlot {
                device_path: port.device_path.clone(),
                label: port.display_label(),
                tx: Counter::default(),
                rx: Counter::default(),
                unknown: Counter::default(),
                malformed: AtomicU64::new(0),
                end_reason: Mutex::new(None),
            })
            .collect();
        Self { slots }
    }

    /// Count one packet. Unknown port ids are ignored.
    pub fn record(&self, port: PortId, direction: Direction, byte_length: usize) {
        let Some(slot) = self.slots.get(port.0) else {
            return;
        };
        match direction {
            Direction::Tx => slot.tx.add(byte_length),
            Direction::Rx => slot.rx.add(byte_length),
            Direction::Unknown => slot.unknown.add(byte_length),
        }
    }

    pub fn record_malformed(&self, port: PortId) {
        if let Some(slot) = self.slots.get(port.0) {
            slot.malformed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn mark_ended(&self, port: PortId, reason: PortEndReason) {
        if let Some(slot) = self.slots.get(port.0) {
            if let Ok(mut guard) = slot.end_reason.lock() {
                *guard = Some(reason);
            }
        }
    }

    /// Safe to call while pipelines are still recording. Totals are derived
    /// from the per-direction counters so they always add up.
    pub fn snapshot(&self) -> StatsSnapshot {
        let ports = self
            .slots
            .iter()
            .map(|slot| {
                let (tx_packets, tx_bytes) = slot.tx.load();
                let (rx_packets, rx_bytes) = slot.rx.load();
                let (unknown_packets, unknown_bytes) = slot.unknown.load();
                PortStats {
                    device_path: slot.device_path.clone(),
                    label: slot.label.clone(),
                    total_packets: tx_packets + rx_packets + unknown_packets,
                    total_bytes: tx_bytes + rx_bytes + unknown_bytes,
                    tx_packets,
                    tx_bytes,
                    rx_packets,
                    rx_bytes,
                    unknown_packets,
                    unknown_bytes,
                    malformed_packets: slot.malformed.load(Ordering::Relaxed),
                    end_reason: slot.end_reason.lock().ok().and_then(|g| g.clone()),
                }
            })
            .collect();
        StatsSnapshot { ports }
    }
}
