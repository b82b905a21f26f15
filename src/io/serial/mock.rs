// src/io/serial/mock.rs
//
// Scripted chunk sources for exercising capture pipelines without hardware.
// Time is virtual: gaps come from the script, not from the wall clock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::config::PortConfig;
use super::session::{ChunkSource, PortOpener, ReadOutcome};
use crate::io::{Chunk, OpenErrorKind, OpenFailure, TapError};

/// Virtual epoch for scripted timestamps (2024-01-01T00:00:00Z)
const SCRIPT_EPOCH_US: u64 = 1_704_067_200_000_000;

/// Pause per idle poll once a held-open script is exhausted
const HOLD_POLL: Duration = Duration::from_millis(2);

#[derive(Clone, Debug)]
enum Step {
    Bytes { after: Duration, bytes: Vec<u8> },
    Quiet(Duration),
    Lost(String),
}

/// A port whose traffic is given up front
#[derive(Clone, Debug, Default)]
pub struct ScriptedPort {
    steps: VecDeque<Step>,
    hold_open: bool,
    clock: Duration,
    last_chunk_at: Option<Duration>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes arriving `after` the previous script step
    pub fn bytes(mut self, after: Duration, bytes: &[u8]) -> Self {
        self.steps.push_back(Step::Bytes {
            after,
            bytes: bytes.to_vec(),
        });
        self
    }

    /// An idle poll after `quiet` of silence
    pub fn quiet(mut self, quiet: Duration) -> Self {
        self.steps.push_back(Step::Quiet(quiet));
        self
    }

    /// The device disappears at this point
    pub fn lost(mut self, reason: &str) -> Self {
        self.steps.push_back(Step::Lost(reason.to_string()));
        self
    }

    /// Keep reporting idle after the script ends instead of ending the stream
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    fn quiet_since_last(&self) -> Option<Duration> {
        self.last_chunk_at.map(|at| self.clock.saturating_sub(at))
    }
}

impl ChunkSource for ScriptedPort {
    fn read_chunk(&mut self) -> Result<ReadOutcome, TapError> {
        match self.steps.pop_front() {
            Some(Step::Bytes { after, bytes }) => {
                self.clock += after;
                let gap = self.quiet_since_last();
                self.last_chunk_at = Some(self.clock);
                let timestamp_us = SCRIPT_EPOCH_US + self.clock.as_micros() as u64;
                Ok(ReadOutcome::Chunk(Chunk::new(bytes, timestamp_us, gap)))
            }
            Some(Step::Quiet(quiet)) => {
                self.clock += quiet;
                Ok(ReadOutcome::Idle {
                    quiet: self.quiet_since_last(),
                })
            }
            Some(Step::Lost(reason)) => Err(TapError::DeviceLost {
                device: "scripted".to_string(),
                reason,
            }),
            None if self.hold_open => {
                std::thread::sleep(HOLD_POLL);
                self.clock += HOLD_POLL;
                Ok(ReadOutcome::Idle {
                    quiet: self.quiet_since_last(),
                })
            }
            None => Ok(ReadOutcome::EndOfStream),
        }
    }
}

/// Hands out scripted ports by device path. Each path can be opened once;
/// a second open reports the port as busy.
#[derive(Default)]
pub struct ScriptedOpener {
    scripts: Mutex<HashMap<String, ScriptedPort>>,
    failures: HashMap<String, OpenErrorKind>,
    opened: Mutex<HashSet<String>>,
}

impl ScriptedOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(self, device_path: &str, port: ScriptedPort) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(device_path.to_string(), port);
        }
        self
    }

    /// Opening `device_path` fails with `kind`
    pub fn with_failure(mut self, device_path: &str, kind: OpenErrorKind) -> Self {
        self.failures.insert(device_path.to_string(), kind);
        self
    }

    /// Device paths opened so far
    pub fn opened(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .opened
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }
}

impl PortOpener for ScriptedOpener {
    type Source = ScriptedPort;

    fn open(&self, config: &PortConfig) -> Result<ScriptedPort, OpenFailure> {
        let path = config.device_path.as_str();
        if let Some(kind) = self.failures.get(path) {
            return Err(OpenFailure::new(path, *kind, "scripted failure"));
        }

        let mut opened = self
            .opened
            .lock()
            .map_err(|_| OpenFailure::new(path, OpenErrorKind::Other, "opener poisoned"))?;
        if !opened.insert(path.to_string()) {
            return Err(OpenFailure::new(
                path,
                OpenErrorKind::PortBusy,
                "already open",
            ));
        }

        let script = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.remove(path));
        script.ok_or_else(|| {
            opened.remove(path);
            OpenFailure::new(path, OpenErrorKind::PortNotFound, "no such scripted port")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_scripted_gaps_accumulate_quiet_time() {
        let mut port = ScriptedPort::new()
            .bytes(ms(0), b"A")
            .quiet(ms(30))
            .bytes(ms(30), b"B");

        match port.read_chunk().unwrap() {
            ReadOutcome::Chunk(c) => assert_eq!(c.gap, None),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            port.read_chunk().unwrap(),
            ReadOutcome::Idle { quiet: Some(ms(30)) }
        );
        match port.read_chunk().unwrap() {
            ReadOutcome::Chunk(c) => {
                assert_eq!(c.gap, Some(ms(60)));
                assert_eq!(c.timestamp_us, SCRIPT_EPOCH_US + 60_000);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(port.read_chunk().unwrap(), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_lost_step_is_an_error() {
        let mut port = ScriptedPort::new().lost("unplugged");
        assert!(matches!(
            port.read_chunk(),
            Err(TapError::DeviceLost { .. })
        ));
    }

    #[test]
    fn test_second_open_is_busy() {
        let opener = ScriptedOpener::new().with_port("/dev/ttyUSB0", ScriptedPort::new());
        let config = PortConfig::new("/dev/ttyUSB0");
        assert!(opener.open(&config).is_ok());
        let err = opener.open(&config).unwrap_err();
        assert_eq!(err.kind, OpenErrorKind::PortBusy);
        assert_eq!(opener.opened(), vec!["/dev/ttyUSB0".to_string()]);
    }

    #[test]
    fn test_unknown_path_not_found() {
        let opener = ScriptedOpener::new();
        let err = opener.open(&PortConfig::new("/dev/nothing")).unwrap_err();
        assert_eq!(err.kind, OpenErrorKind::PortNotFound);
        assert!(opener.opened().is_empty());
    }
}
