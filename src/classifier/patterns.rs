// src/classifier/patterns.rs
//
// Prefix -> direction associations for the pattern strategy.
// Seeds are fixed markers; learned entries are keyed by the first
// PREFIX_LEN bytes of a packet and strengthen or decay with use. A learned
// entry only decides once it has been seen with the same direction twice,
// so a single fallback guess cannot feed itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::io::Direction;

/// Bytes of a packet used as the learned association key
pub const PREFIX_LEN: usize = 2;

/// Learned associations kept per port
pub const TABLE_CAPACITY: usize = 64;

const MAX_STRENGTH: u8 = 8;

/// Strength at which a learned association starts deciding
pub const CONFIRMED_STRENGTH: u8 = 2;

/// A fixed prefix marker. Packets starting with `prefix` suggest `direction`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSeed {
    #[serde(with = "hex::serde")]
    pub prefix: Vec<u8>,
    pub direction: Direction,
}

impl PatternSeed {
    pub fn new(prefix: &[u8], direction: Direction) -> Self {
        Self {
            prefix: prefix.to_vec(),
            direction,
        }
    }
}

/// Common request and acknowledgement markers
pub fn default_seeds() -> Vec<PatternSeed> {
    let tx: [&[u8]; 8] = [b"AT", b"GET", b"SET", b"READ", b"WRITE", b"*", b"?", &[0x05]];
    let rx: [&[u8]; 7] = [b"OK", b"ERROR", b"+", b"ACK", b"NAK", &[0x06], &[0x15]];

    tx.iter()
        .map(|p| PatternSeed::new(p, Direction::Tx))
        .chain(rx.iter().map(|p| PatternSeed::new(p, Direction::Rx)))
        .collect()
}

/// Where a match came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternSource {
    Learned,
    Seed,
}

#[derive(Clone, Debug)]
struct Association {
    direction: Direction,
    strength: u8,
    last_used: u64,
}

/// Bounded association table, one per port
#[derive(Clone, Debug)]
pub struct PatternTable {
    /// Longest prefix first so the most specific seed wins
    seeds: Vec<PatternSeed>,
    learned: HashMap<Vec<u8>, Association>,
    tick: u64,
}

impl PatternTable {
    /// `extra` seeds are consulted before the defaults
    pub fn new(extra: &[PatternSeed]) -> Self {
        let mut seeds: Vec<PatternSeed> = extra
            .iter()
            .filter(|s| !s.prefix.is_empty() && s.direction.is_known())
            .cloned()
            .collect();
        seeds.extend(default_seeds());
        // stable sort keeps configured seeds ahead of defaults of equal length
        seeds.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        PatternTable {
            seeds,
            learned: HashMap::new(),
            tick: 0,
        }
    }

    pub fn key(bytes: &[u8]) -> &[u8] {
        &bytes[..bytes.len().min(PREFIX_LEN)]
    }

    /// Confirmed learned association first, then the longest matching seed
    pub fn lookup(&self, bytes: &[u8]) -> Option<(Direction, PatternSource)> {
        self.learned(bytes)
            .map(|d| (d, PatternSource::Learned))
            .or_else(|| self.seeded(bytes).map(|d| (d, PatternSource::Seed)))
    }

    /// Direction of a confirmed learned association
    pub fn learned(&self, bytes: &[u8]) -> Option<Direction> {
        if bytes.is_empty() {
            return None;
        }
        self.learned
            .get(Self::key(bytes))
            .filter(|a| a.strength >= CONFIRMED_STRENGTH)
            .map(|a| a.direction)
    }

    /// Direction of the longest seed the packet starts with
    pub fn seeded(&self, bytes: &[u8]) -> Option<Direction> {
        if bytes.is_empty() {
            return None;
        }
        self.seeds
            .iter()
            .find(|seed| bytes.starts_with(&seed.prefix))
            .map(|seed| seed.direction)
    }

    /// Record the final direction of a packet. Agreement reinforces an
    /// association; disagreement weakens it and flips it once exhausted.
    pub fn record(&mut self, bytes: &[u8], direction: Direction) {
        if bytes.is_empty() || !direction.is_known() {
            return;
        }
        self.tick += 1;
        let tick = self.tick;
        let key = Self::key(bytes);

        if let Some(assoc) = self.learned.get_mut(key) {
            assoc.last_used = tick;
            if assoc.direction == direction {
                assoc.strength = (assoc.strength + 1).min(MAX_STRENGTH);
            } else if assoc.strength > 1 {
                assoc.strength -= 1;
            } else {
                assoc.direction = direction;
                assoc.strength = 1;
            }
            return;
        }

        if self.learned.len() >= TABLE_CAPACITY {
            self.evict_weakest();
        }
        self.learned.insert(
            key.to_vec(),
            Association {
                direction,
                strength: 1,
                last_used: tick,
            },
        );
    }

    fn evict_weakest(&mut self) {
        let victim = self
            .learned
            .iter()
            .min_by_key(|(_, a)| (a.strength, a.last_used))
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            self.learned.remove(&key);
        }
    }

    /// Number of learned associations
    pub fn len(&self) -> usize {
        self.learned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.learned.is_empty()
    }

    /// Strength of the learned association for a packet's prefix
    pub fn strength(&self, bytes: &[u8]) -> Option<u8> {
        self.learned.get(Self::key(bytes)).map(|a| a.strength)
    }
}

impl Default for PatternTable {
    fn default() -> Self {
        Self::new(&[])
    }
}
