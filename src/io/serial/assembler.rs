// src/io/serial/assembler.rs
//
// Quiet-period framing: groups consecutive chunks into packets.
// A chunk arriving strictly less than `timeout` after the previous one joins
// the open packet; a gap of `timeout` or more starts a new one. Quiet-period
// framing is also commonly described with `<= timeout` joining; equality
// splits here so a chunk's fate matches the idle flush, which closes the
// packet at exactly `timeout`.

use std::time::Duration;

use crate::io::{Chunk, Packet};

// =============================================================================
// Packet Assembler
// =============================================================================

/// Stateful per-port assembler. One instance per port pipeline.
pub struct PacketAssembler {
    timeout: Duration,
    buffer: Vec<u8>,
    start_us: u64,
    end_us: u64,
    chunk_count: usize,
}

impl PacketAssembler {
    pub fn new(timeout: Duration) -> Self {
        PacketAssembler {
            timeout,
            buffer: Vec::new(),
            start_us: 0,
            end_us: 0,
            chunk_count: 0,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Bytes waiting in the open packet
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Feed one chunk. Returns the previous packet if this chunk's gap closed it.
    pub fn push(&mut self, chunk: Chunk) -> Option<Packet> {
        if chunk.bytes.is_empty() {
            return None;
        }

        let continues = match chunk.gap {
            Some(gap) => gap < self.timeout,
            None => false,
        };

        let finished = if continues && self.has_pending() {
            None
        } else {
            self.take()
        };

        if self.buffer.is_empty() {
            self.start_us = chunk.timestamp_us;
        }
        self.end_us = chunk.timestamp_us;
        self.chunk_count += 1;
        self.buffer.extend_from_slice(&chunk.bytes);

        finished
    }

    /// The line has been silent for `quiet`. Finalizes the open packet once the
    /// silence reaches the timeout, so the last packet of a burst is not held
    /// until the next one begins.
    pub fn on_quiet(&mut self, quiet: Duration) -> Option<Packet> {
        if quiet >= self.timeout {
            self.take()
        } else {
            None
        }
    }

    /// Finalize whatever is buffered. Call when the pipeline ends.
    pub fn flush(&mut self) -> Option<Packet> {
        self.take()
    }

    fn take(&mut self) -> Option<Packet> {
        if self.buffer.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.buffer);
        let packet = Packet::new(bytes, self.start_us, self.end_us, self.chunk_count);
        self.chunk_count = 0;
        Some(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const T: Duration = Duration::from_millis(50);

    fn chunk(bytes: &[u8], ts_ms: u64, gap_ms: Option<u64>) -> Chunk {
        Chunk::new(bytes.to_vec(), ts_ms * 1_000, gap_ms.map(Duration::from_millis))
    }

    #[test]
    fn test_chunks_within_timeout_join() {
        let mut asm = PacketAssembler::new(T);
        assert!(asm.push(chunk(&[0xAA], 0, None)).is_none());
        assert!(asm.push(chunk(&[0xBB], 10, Some(10))).is_none());

        let packet = asm.flush().unwrap();
        assert_eq!(packet.bytes(), &[0xAA, 0xBB]);
        assert_eq!(packet.start_us(), 0);
        assert_eq!(packet.end_us(), 10_000);
        assert_eq!(packet.chunk_count(), 2);
    }

    #[test]
    fn test_gap_over_timeout_splits() {
        let mut asm = PacketAssembler::new(T);
        asm.push(chunk(&[0xCC], 0, None));
        let first = asm.push(chunk(&[0xDD], 80, Some(80))).unwrap();
        assert_eq!(first.bytes(), &[0xCC]);

        let second = asm.flush().unwrap();
        assert_eq!(second.bytes(), &[0xDD]);
        assert_eq!(second.start_us(), 80_000);
    }

    #[test]
    fn test_gap_equal_to_timeout_splits() {
        let mut asm = PacketAssembler::new(T);
        asm.push(chunk(b"A", 0, None));
        assert!(asm.push(chunk(b"B", 50, Some(50))).is_some());
    }

    #[test]
    fn test_quiet_flushes_last_packet() {
        let mut asm = PacketAssembler::new(T);
        asm.push(chunk(b"OK\r\n", 0, None));
        assert!(asm.on_quiet(Duration::from_millis(20)).is_none());
        assert!(asm.has_pending());

        let packet = asm.on_quiet(Duration::from_millis(50)).unwrap();
        assert_eq!(packet.bytes(), b"OK\r\n");
        assert!(!asm.has_pending());
        assert!(asm.on_quiet(Duration::from_millis(500)).is_none());
    }

    #[test]
    fn test_chunk_after_quiet_flush_starts_new_packet() {
        let mut asm = PacketAssembler::new(T);
        asm.push(chunk(b"AT", 0, None));
        asm.on_quiet(Duration::from_millis(60)).unwrap();
        // gap below timeout but nothing is pending any more
        assert!(asm.push(chunk(b"OK", 70, Some(70))).is_none());
        assert_eq!(asm.flush().unwrap().start_us(), 70_000);
    }

    #[test]
    fn test_empty_chunk_ignored() {
        let mut asm = PacketAssembler::new(T);
        assert!(asm.push(chunk(&[], 0, None)).is_none());
        assert!(asm.flush().is_none());
    }

    #[test]
    fn test_flush_empty_is_none() {
        let mut asm = PacketAssembler::new(T);
        assert!(asm.flush().is_none());
        assert_eq!(asm.pending_len(), 0);
    }

    fn group_strategy() -> impl Strategy<Value = Vec<(Vec<Vec<u8>>, Vec<u64>)>> {
        // Each group: chunks plus the intra-group gaps (all below the timeout)
        prop::collection::vec(
            prop::collection::vec(prop::collection::vec(any::<u8>(), 1..8), 1..5).prop_flat_map(
                |chunks| {
                    let n = chunks.len();
                    (Just(chunks), prop::collection::vec(0u64..50, n))
                },
            ),
            1..6,
        )
    }

    proptest! {
        #[test]
        fn test_packets_are_concatenated_groups(
            groups in group_strategy(),
            split_gap in 50u64..500,
        ) {
            let mut asm = PacketAssembler::new(T);
            let mut packets = Vec::new();
            let mut ts = 0u64;
            let mut first = true;

            for (chunks, gaps) in &groups {
                for (i, bytes) in chunks.iter().enumerate() {
                    let gap = if first {
                        None
                    } else if i == 0 {
                        Some(split_gap)
                    } else {
                        Some(gaps[i])
                    };
                    first = false;
                    ts += gap.unwrap_or(0);
                    if let Some(p) = asm.push(chunk(bytes, ts, gap)) {
                        packets.push(p);
                    }
                }
            }
            packets.extend(asm.flush());

            let expected: Vec<Vec<u8>> = groups.iter().map(|(chunks, _)| chunks.concat()).collect();
            let actual: Vec<Vec<u8>> = packets.into_iter().map(Packet::into_bytes).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
