// src/classifier/strategies.rs
//
// Individual direction heuristics. Each one only judges; fallbacks and the
// state update live in the dispatcher.

use super::patterns::PatternTable;
use super::state::ClassifierState;
use crate::io::Direction;

/// Relative distance from the mean length before size decides
pub const SIZE_MARGIN: f64 = 0.25;

/// Samples needed before size is trusted in auto mode
pub const MIN_SIZE_SAMPLES: u64 = 8;

/// Highest unicast Modbus address; 248..=255 are reserved
pub const MAX_UNIT_ADDRESS: u8 = 247;

const EXCEPTION_BIT: u8 = 0x80;

/// Outcome of a single heuristic
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Decided(Direction),
    /// No opinion; the next strategy (or a fallback) should decide
    Deferred,
    /// Too short for the strategy's framing assumptions
    Malformed,
}

/// Fixed receive-only view
pub fn none() -> Direction {
    Direction::Rx
}

/// Toggle from the previous packet. A port's first packet is TX.
pub fn alternating(state: &ClassifierState) -> Direction {
    match state.last_direction() {
        Some(Direction::Tx) => Direction::Rx,
        _ => Direction::Tx,
    }
}

/// Learned prefixes are ignored when the previous packet had the same prefix,
/// since requests and replies of one protocol often share leading bytes.
pub fn pattern(state: &ClassifierState, bytes: &[u8]) -> Verdict {
    let patterns = state.patterns();
    let repeats_previous = state
        .previous()
        .is_some_and(|prev| PatternTable::key(&prev.lead) == PatternTable::key(bytes));

    let learned = if repeats_previous {
        None
    } else {
        patterns.learned(bytes)
    };
    match learned.or_else(|| patterns.seeded(bytes)) {
        Some(direction) => Verdict::Decided(direction),
        None => Verdict::Deferred,
    }
}

/// Short packets look like commands, long ones like responses
pub fn size(state: &ClassifierState, len: usize, min_samples: u64) -> Verdict {
    let sizes = state.sizes();
    let mean = match sizes.mean() {
        Some(mean) if sizes.count() >= min_samples && mean > 0.0 => mean,
        _ => return Verdict::Deferred,
    };

    let len = len as f64;
    if len < mean * (1.0 - SIZE_MARGIN) {
        Verdict::Decided(Direction::Tx)
    } else if len > mean * (1.0 + SIZE_MARGIN) {
        Verdict::Decided(Direction::Rx)
    } else {
        Verdict::Deferred
    }
}

/// Address + function code interpretation of a multi-drop bus frame
pub fn rs485(state: &ClassifierState, bytes: &[u8]) -> Verdict {
    if bytes.len() < 2 {
        return Verdict::Malformed;
    }
    let address = bytes[0];
    let function = bytes[1];
    let base = function & !EXCEPTION_BIT;

    if address == 0 {
        // broadcast, only the master sends these
        return Verdict::Decided(Direction::Tx);
    }
    if address > MAX_UNIT_ADDRESS || base == 0 {
        return Verdict::Deferred;
    }
    if function & EXCEPTION_BIT != 0 {
        return Verdict::Decided(Direction::Rx);
    }

    let bus = state.rs485();
    match bus.pending_request(address, base) {
        // FC05/06/08 replies echo the request; a copy right behind the
        // request is the reply, a copy after other traffic is a retry
        Some(request) if request == bytes => {
            let echo = state.last_direction() == Some(Direction::Tx)
                && bus.last_frame() == Some(bytes);
            if echo {
                Verdict::Decided(Direction::Rx)
            } else {
                Verdict::Decided(Direction::Tx)
            }
        }
        Some(_) => Verdict::Decided(Direction::Rx),
        None if bus.master_address.is_none() || bus.is_master(address) => {
            Verdict::Decided(Direction::Tx)
        }
        // another unit with nothing outstanding
        None => Verdict::Deferred,
    }
}
