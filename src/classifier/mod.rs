// src/classifier/mod.rs
//
// Direction classifier: assigns TX/RX/Unknown to each finalized packet
// using per-port running state. Deterministic in packet content and prior
// state; no clocks, no randomness.

mod patterns;
mod state;
pub mod strategies;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::io::{Direction, Packet, ProtocolType};
use strategies::{Verdict, MIN_SIZE_SAMPLES};

pub use patterns::{default_seeds, PatternSeed, PatternSource, PatternTable};
pub use state::{ClassifierState, HistoryEntry, Rs485State, SizeStats};

// ============================================================================
// Modes
// ============================================================================

/// Direction detection mode, fixed for a capture session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    None,
    #[default]
    Alternating,
    Pattern,
    Size,
    Rs485,
    Auto,
}

impl DetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::None => "none",
            DetectionMode::Alternating => "alternating",
            DetectionMode::Pattern => "pattern",
            DetectionMode::Size => "size",
            DetectionMode::Rs485 => "rs485",
            DetectionMode::Auto => "auto",
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(DetectionMode::None),
            "alternating" => Ok(DetectionMode::Alternating),
            "pattern" => Ok(DetectionMode::Pattern),
            "size" => Ok(DetectionMode::Size),
            "rs485" => Ok(DetectionMode::Rs485),
            "auto" => Ok(DetectionMode::Auto),
            other => Err(format!(
                "unknown detection mode '{}' (expected none, alternating, pattern, size, rs485 or auto)",
                other
            )),
        }
    }
}

/// Strategy that produced a direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    None,
    Alternating,
    Pattern,
    Size,
    Rs485,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::None => "none",
            StrategyKind::Alternating => "alternating",
            StrategyKind::Pattern => "pattern",
            StrategyKind::Size => "size",
            StrategyKind::Rs485 => "rs485",
        }
    }
}

/// Result of classifying one packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub direction: Direction,
    pub decided_by: StrategyKind,
    /// The packet did not fit the active strategy's framing assumptions
    pub malformed: bool,
}

impl Classification {
    fn decided(direction: Direction, decided_by: StrategyKind) -> Self {
        Self {
            direction,
            decided_by,
            malformed: false,
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Classify `bytes` and fold the result into `state`
pub fn classify(
    mode: DetectionMode,
    protocol: ProtocolType,
    bytes: &[u8],
    state: &mut ClassifierState,
) -> Classification {
    let result = judge(mode, protocol, bytes, state);
    state.record(bytes, result.direction);
    result
}

fn judge(
    mode: DetectionMode,
    protocol: ProtocolType,
    bytes: &[u8],
    state: &ClassifierState,
) -> Classification {
    let alternate = || {
        Classification::decided(strategies::alternating(state), StrategyKind::Alternating)
    };

    match mode {
        DetectionMode::None => Classification::decided(strategies::none(), StrategyKind::None),
        DetectionMode::Alternating => alternate(),
        DetectionMode::Pattern => match strategies::pattern(state, bytes) {
            Verdict::Decided(d) => Classification::decided(d, StrategyKind::Pattern),
            _ => alternate(),
        },
        DetectionMode::Size => match strategies::size(state, bytes.len(), 1) {
            Verdict::Decided(d) => Classification::decided(d, StrategyKind::Size),
            _ => alternate(),
        },
        DetectionMode::Rs485 => match strategies::rs485(state, bytes) {
            Verdict::Decided(d) => Classification::decided(d, StrategyKind::Rs485),
            Verdict::Deferred => alternate(),
            Verdict::Malformed => Classification {
                direction: Direction::Unknown,
                decided_by: StrategyKind::Rs485,
                malformed: true,
            },
        },
        DetectionMode::Auto => {
            if protocol == ProtocolType::Rs485 {
                if let Verdict::Decided(d) = strategies::rs485(state, bytes) {
                    return Classification::decided(d, StrategyKind::Rs485);
                }
            }
            if let Verdict::Decided(d) = strategies::pattern(state, bytes) {
                return Classification::decided(d, StrategyKind::Pattern);
            }
            if let Verdict::Decided(d) = strategies::size(state, bytes.len(), MIN_SIZE_SAMPLES) {
                return Classification::decided(d, StrategyKind::Size);
            }
            alternate()
        }
    }
}

/// A port's classifier: mode, protocol and running state together
#[derive(Clone, Debug)]
pub struct DirectionClassifier {
    mode: DetectionMode,
    protocol: ProtocolType,
    state: ClassifierState,
}

impl DirectionClassifier {
    pub fn new(mode: DetectionMode, protocol: ProtocolType, seeds: &[PatternSeed]) -> Self {
        Self {
            mode,
            protocol,
            state: ClassifierState::new(seeds),
        }
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    pub fn classify(&mut self, packet: &Packet) -> Classification {
        classify(self.mode, self.protocol, packet.bytes(), &mut self.state)
    }

    pub fn state(&self) -> &ClassifierState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run(mode: DetectionMode, protocol: ProtocolType, packets: &[&[u8]]) -> Vec<Classification> {
        let mut state = ClassifierState::default();
        packets
            .iter()
            .map(|p| classify(mode, protocol, p, &mut state))
            .collect()
    }

    fn directions(results: &[Classification]) -> Vec<Direction> {
        results.iter().map(|c| c.direction).collect()
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("AUTO".parse::<DetectionMode>(), Ok(DetectionMode::Auto));
        assert_eq!("rs485".parse::<DetectionMode>(), Ok(DetectionMode::Rs485));
        assert!("sniff".parse::<DetectionMode>().is_err());
        assert_eq!(DetectionMode::default(), DetectionMode::Alternating);
    }

    #[test]
    fn test_rs485_request_response_scenario() {
        let results = run(
            DetectionMode::Rs485,
            ProtocolType::Rs485,
            &[&[0x11, 0x03, 0x00, 0x6B], &[0x11, 0x83, 0x02]],
        );
        assert_eq!(directions(&results), vec![Direction::Tx, Direction::Rx]);
        assert!(results.iter().all(|c| c.decided_by == StrategyKind::Rs485));
    }

    #[test]
    fn test_rs485_short_packet_is_malformed_unknown() {
        let results = run(DetectionMode::Rs485, ProtocolType::Rs485, &[&[0x11]]);
        assert_eq!(results[0].direction, Direction::Unknown);
        assert!(results[0].malformed);
    }

    #[test]
    fn test_auto_cascades_past_malformed_rs485() {
        let results = run(DetectionMode::Auto, ProtocolType::Rs485, &[&[0x11]]);
        assert_eq!(results[0].direction, Direction::Tx);
        assert_eq!(results[0].decided_by, StrategyKind::Alternating);
        assert!(!results[0].malformed);
    }

    #[test]
    fn test_shared_prefix_keeps_alternating() {
        let request: &[u8] = &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87];
        let response: &[u8] = &[0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x49, 0xAD];
        let packets = [request, response, request, response, request, response];
        let expected = vec![
            Direction::Tx,
            Direction::Rx,
            Direction::Tx,
            Direction::Rx,
            Direction::Tx,
            Direction::Rx,
        ];

        for mode in [DetectionMode::Auto, DetectionMode::Pattern] {
            let results = run(mode, ProtocolType::Rs232, &packets);
            assert_eq!(directions(&results), expected, "{} mode", mode);
            assert!(results.iter().all(|c| c.decided_by != StrategyKind::Rs485));
        }
    }

    #[test]
    fn test_rs485_echoed_write_closes_transaction() {
        let write: &[u8] = &[0x11, 0x06, 0x00, 0x01, 0x00, 0x03, 0x9A, 0x9B];
        let expected = vec![Direction::Tx, Direction::Rx, Direction::Tx, Direction::Rx];

        for mode in [DetectionMode::Rs485, DetectionMode::Auto] {
            let results = run(mode, ProtocolType::Rs485, &[write, write, write, write]);
            assert_eq!(directions(&results), expected, "{} mode", mode);
            assert!(results.iter().all(|c| c.decided_by == StrategyKind::Rs485));
        }
    }

    #[test]
    fn test_rs485_second_unit_falls_back_then_pairs() {
        let results = run(
            DetectionMode::Rs485,
            ProtocolType::Rs485,
            &[
                &[0x11, 0x03, 0x00, 0x6B],
                &[0x11, 0x03, 0x02, 0x00, 0x05],
                &[0x22, 0x03, 0x00, 0x01],
                &[0x22, 0x03, 0x02, 0x00, 0x07],
            ],
        );
        assert_eq!(
            directions(&results),
            vec![Direction::Tx, Direction::Rx, Direction::Tx, Direction::Rx]
        );
        assert_eq!(results[2].decided_by, StrategyKind::Alternating);
        assert_eq!(results[3].decided_by, StrategyKind::Rs485);
    }

    #[test]
    fn test_auto_uses_seeds() {
        let results = run(
            DetectionMode::Auto,
            ProtocolType::Rs232,
            &[b"AT+CSQ\r\n", b"+CSQ: 20,99\r\n", b"OK\r\n"],
        );
        assert_eq!(
            directions(&results),
            vec![Direction::Tx, Direction::Rx, Direction::Rx]
        );
    }

    #[test]
    fn test_pattern_mode_falls_back_to_alternating() {
        let results = run(
            DetectionMode::Pattern,
            ProtocolType::Rs232,
            &[&[0x7E, 0x01], &[0x7F, 0x02]],
        );
        assert_eq!(directions(&results), vec![Direction::Tx, Direction::Rx]);
        assert!(results.iter().all(|c| c.decided_by == StrategyKind::Alternating));
    }

    #[test]
    fn test_size_mode() {
        let long = [0u8; 40];
        let short = [1u8; 4];
        let results = run(
            DetectionMode::Size,
            ProtocolType::Rs232,
            &[&long, &short, &long],
        );
        // first packet has no mean yet
        assert_eq!(results[0].decided_by, StrategyKind::Alternating);
        assert_eq!(results[1].direction, Direction::Tx);
        assert_eq!(results[1].decided_by, StrategyKind::Size);
        assert_eq!(results[2].direction, Direction::Rx);
    }

    #[test]
    fn test_state_updated_whatever_decides() {
        let mut classifier = DirectionClassifier::new(DetectionMode::None, ProtocolType::Rs232, &[]);
        let packet = Packet::new(vec![0x01, 0x02, 0x03], 0, 0, 1);
        classifier.classify(&packet);
        assert_eq!(classifier.state().last_direction(), Some(Direction::Rx));
        assert_eq!(classifier.state().history().count(), 1);
        assert_eq!(classifier.state().sizes().count(), 1);
    }

    fn packets_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
        prop::collection::vec(prop::collection::vec(any::<u8>(), 1..12), 1..40)
    }

    fn mode_strategy() -> impl Strategy<Value = DetectionMode> {
        prop_oneof![
            Just(DetectionMode::Pattern),
            Just(DetectionMode::Size),
            Just(DetectionMode::Rs485),
            Just(DetectionMode::Auto),
        ]
    }

    proptest! {
        #[test]
        fn test_none_is_always_rx(packets in packets_strategy()) {
            let refs: Vec<&[u8]> = packets.iter().map(Vec::as_slice).collect();
            let results = run(DetectionMode::None, ProtocolType::Rs232, &refs);
            prop_assert!(results.iter().all(|c| c.direction == Direction::Rx));
        }

        #[test]
        fn test_alternating_toggles(packets in packets_strategy()) {
            let refs: Vec<&[u8]> = packets.iter().map(Vec::as_slice).collect();
            let dirs = directions(&run(DetectionMode::Alternating, ProtocolType::Rs232, &refs));
            prop_assert_eq!(dirs[0], Direction::Tx);
            for pair in dirs.windows(2) {
                prop_assert_ne!(pair[0], pair[1]);
            }
        }

        #[test]
        fn test_replay_is_deterministic(
            packets in packets_strategy(),
            mode in mode_strategy(),
        ) {
            let refs: Vec<&[u8]> = packets.iter().map(Vec::as_slice).collect();
            let first = run(mode, ProtocolType::Rs485, &refs);
            let second = run(mode, ProtocolType::Rs485, &refs);
            prop_assert_eq!(first, second);
        }
    }
}
