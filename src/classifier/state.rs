// src/classifier/state.rs
//
// Per-port classifier state. Owned by exactly one pipeline.

use std::collections::VecDeque;

use super::patterns::{PatternSeed, PatternTable};
use crate::io::Direction;

/// Recent packets remembered per port
pub const HISTORY_CAPACITY: usize = 32;

/// Leading bytes stored per history entry
pub const LEAD_BYTES: usize = 4;

/// Request frames awaiting a reply on an RS-485 bus
pub const PENDING_CAPACITY: usize = 16;

/// Summary of one classified packet
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub len: usize,
    pub lead: Vec<u8>,
    pub direction: Direction,
}

/// Running mean of packet lengths
#[derive(Clone, Debug, Default)]
pub struct SizeStats {
    count: u64,
    mean: f64,
}

impl SizeStats {
    pub fn observe(&mut self, len: usize) {
        self.count += 1;
        self.mean += (len as f64 - self.mean) / self.count as f64;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.mean)
        }
    }
}

#[derive(Clone, Debug)]
struct PendingRequest {
    address: u8,
    function: u8,
    bytes: Vec<u8>,
}

/// Address/function-code bookkeeping for Modbus-shaped traffic
#[derive(Clone, Debug, Default)]
pub struct Rs485State {
    /// First unicast address seen on the port
    pub master_address: Option<u8>,
    last_frame: Option<Vec<u8>>,
    pending: VecDeque<PendingRequest>,
}

impl Rs485State {
    /// The outstanding request for (address, function), if any.
    /// `function` is the base code with the exception bit cleared.
    pub fn pending_request(&self, address: u8, function: u8) -> Option<&[u8]> {
        self.pending
            .iter()
            .find(|p| p.address == address && p.function == function)
            .map(|p| p.bytes.as_slice())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The packet seen just before the one being classified
    pub fn last_frame(&self) -> Option<&[u8]> {
        self.last_frame.as_deref()
    }

    pub fn is_master(&self, address: u8) -> bool {
        self.master_address == Some(address)
    }

    fn observe(&mut self, bytes: &[u8], direction: Direction) {
        self.last_frame = Some(bytes.to_vec());
        if bytes.len() < 2 {
            return;
        }
        let address = bytes[0];
        let function = bytes[1] & 0x7F;

        if address != 0 && self.master_address.is_none() {
            self.master_address = Some(address);
        }

        self.pending
            .retain(|p| !(p.address == address && p.function == function));
        // broadcasts get no reply
        if direction == Direction::Tx && address != 0 {
            if self.pending.len() >= PENDING_CAPACITY {
                self.pending.pop_front();
            }
            self.pending.push_back(PendingRequest {
                address,
                function,
                bytes: bytes.to_vec(),
            });
        }
    }
}

/// Everything the classifier knows about one port's traffic so far
#[derive(Clone, Debug)]
pub struct ClassifierState {
    last_direction: Option<Direction>,
    history: VecDeque<HistoryEntry>,
    sizes: SizeStats,
    patterns: PatternTable,
    rs485: Rs485State,
}

impl ClassifierState {
    pub fn new(seeds: &[PatternSeed]) -> Self {
        ClassifierState {
            last_direction: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            sizes: SizeStats::default(),
            patterns: PatternTable::new(seeds),
            rs485: Rs485State::default(),
        }
    }

    pub fn last_direction(&self) -> Option<Direction> {
        self.last_direction
    }

    /// Oldest first
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// The most recent history entry
    pub fn previous(&self) -> Option<&HistoryEntry> {
        self.history.back()
    }

    pub fn sizes(&self) -> &SizeStats {
        &self.sizes
    }

    pub fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    pub fn rs485(&self) -> &Rs485State {
        &self.rs485
    }

    /// Fold a classified packet into every heuristic, whichever one decided
    pub(crate) fn record(&mut self, bytes: &[u8], direction: Direction) {
        self.last_direction = Some(direction);

        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry {
            len: bytes.len(),
            lead: bytes[..bytes.len().min(LEAD_BYTES)].to_vec(),
            direction,
        });

        self.sizes.observe(bytes.len());
        self.patterns.record(bytes, direction);
        self.rs485.observe(bytes, direction);
    }
}

impl Default for ClassifierState {
    fn default() -> Self {
        Self::new(&[])
    }
}
