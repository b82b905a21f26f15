// src/capture.rs
//
// Capture coordinator: opens every configured port up front, then runs one
// independent read -> assemble -> classify -> record pipeline per port and
// merges their packets into a single event stream.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::{DetectionMode, DirectionClassifier, PatternSeed};
use crate::io::serial::{
    validate_ports, ChunkSource, PacketAssembler, PortConfig, PortOpener, ReadOutcome,
};
use crate::io::types::SourceMessage;
use crate::io::{Packet, PacketEvent, PortEndReason, PortId, TapError};
use crate::stats::{StatsAggregator, StatsSnapshot};

// ============================================================================
// Options and Sinks
// ============================================================================

/// Session-wide pipeline settings, shared by every port
#[derive(Clone, Debug)]
pub struct CaptureOptions {
    pub packet_timeout: Duration,
    pub detection: DetectionMode,
    pub pattern_seeds: Vec<PatternSeed>,
    pub channel_capacity: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            packet_timeout: crate::io::serial::utils::DEFAULT_PACKET_TIMEOUT,
            detection: DetectionMode::default(),
            pattern_seeds: Vec::new(),
            channel_capacity: 1024,
        }
    }
}

/// Consumer of the merged packet stream (console, log file, tests)
pub trait PacketSink: Send {
    fn on_packet(&mut self, event: &PacketEvent);

    fn on_port_ended(&mut self, _port: &PortConfig, _reason: &PortEndReason) {}
}

impl PacketSink for Vec<PacketEvent> {
    fn on_packet(&mut self, event: &PacketEvent) {
        self.push(event.clone());
    }
}

impl<S: PacketSink + ?Sized> PacketSink for Box<S> {
    fn on_packet(&mut self, event: &PacketEvent) {
        (**self).on_packet(event)
    }

    fn on_port_ended(&mut self, port: &PortConfig, reason: &PortEndReason) {
        (**self).on_port_ended(port, reason)
    }
}

/// Fan out to several sinks in order
impl PacketSink for Vec<Box<dyn PacketSink>> {
    fn on_packet(&mut self, event: &PacketEvent) {
        for sink in self.iter_mut() {
            sink.on_packet(event);
        }
    }

    fn on_port_ended(&mut self, port: &PortConfig, reason: &PortEndReason) {
        for sink in self.iter_mut() {
            sink.on_port_ended(port, reason);
        }
    }
}

/// Outcome of a finished capture
#[derive(Clone, Debug)]
pub struct CaptureReport {
    pub stats: StatsSnapshot,
    /// Shutdown was requested rather than every port ending on its own
    pub interrupted: bool,
}

impl CaptureReport {
    /// Every port ended cleanly (stopped or end of stream)
    pub fn all_clean(&self) -> bool {
        self.stats
            .ports
            .iter()
            .all(|p| p.end_reason.as_ref().map_or(true, PortEndReason::is_clean))
    }
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct CaptureCoordinator<O: PortOpener> {
    opener: O,
    ports: Vec<PortConfig>,
    options: CaptureOptions,
}

impl<O: PortOpener> CaptureCoordinator<O> {
    pub fn new(
        opener: O,
        ports: Vec<PortConfig>,
        options: CaptureOptions,
    ) -> Result<Self, TapError> {
        validate_ports(&ports)?;
        if options.packet_timeout.is_zero() {
            return Err(TapError::InvalidConfig(
                "packet timeout must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            opener,
            ports,
            options,
        })
    }

    pub fn ports(&self) -> &[PortConfig] {
        &self.ports
    }

    /// Open every port, then start the pipelines. Any open failure aborts
    /// the whole session before a single byte is read; ports that did open
    /// are closed again. Must be called inside a Tokio runtime.
    pub fn start(self) -> Result<RunningCapture, TapError> {
        let mut sources = Vec::with_capacity(self.ports.len());
        let mut failures = Vec::new();

        for config in &self.ports {
            match self.opener.open(config) {
                Ok(source) => sources.push(source),
                Err(failure) => {
                    warn!("[Capture] Cannot open {}", failure);
                    failures.push(failure);
                }
            }
        }

        if !failures.is_empty() {
            drop(sources);
            return Err(TapError::StartupAborted(failures));
        }

        let stats = Arc::new(StatsAggregator::new(&self.ports));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));

        let mut handles = Vec::with_capacity(sources.len());
        for (idx, (config, source)) in self.ports.iter().zip(sources).enumerate() {
            let pipeline = PortPipeline {
                port: PortId(idx),
                label: config.display_label(),
                config: config.clone(),
                assembler: PacketAssembler::new(self.options.packet_timeout),
                classifier: DirectionClassifier::new(
                    self.options.detection,
                    config.protocol,
                    &self.options.pattern_seeds,
                ),
                stats: Arc::clone(&stats),
                tx: tx.clone(),
            };
            let stop_flag = Arc::clone(&stop_flag);
            handles.push(tokio::task::spawn_blocking(move || {
                pipeline.run(source, stop_flag)
            }));
        }
        // Only pipelines hold senders, so the channel closes when the last one ends
        drop(tx);

        info!(
            "[Capture] Started {} port(s), detection {}, packet timeout {:?}",
            self.ports.len(),
            self.options.detection,
            self.options.packet_timeout
        );

        Ok(RunningCapture {
            ports: self.ports,
            stop_flag,
            stats,
            rx,
            handles,
        })
    }
}

// ============================================================================
// Per-port Pipeline
// ============================================================================

struct PortPipeline {
    port: PortId,
    label: String,
    config: PortConfig,
    assembler: PacketAssembler,
    classifier: DirectionClassifier,
    stats: Arc<StatsAggregator>,
    tx: mpsc::Sender<SourceMessage>,
}

impl PortPipeline {
    /// Blocking read loop; runs on the blocking pool
    fn run<S: ChunkSource>(mut self, mut source: S, stop_flag: Arc<AtomicBool>) {
        let reason = loop {
            if stop_flag.load(Ordering::SeqCst) {
                break PortEndReason::Stopped;
            }

            let finished = match source.read_chunk() {
                Ok(ReadOutcome::Chunk(chunk)) => self.assembler.push(chunk),
                Ok(ReadOutcome::Idle { quiet: Some(quiet) }) => self.assembler.on_quiet(quiet),
                Ok(ReadOutcome::Idle { quiet: None }) => None,
                Ok(ReadOutcome::EndOfStream) => break PortEndReason::EndOfStream,
                Err(TapError::DeviceLost { reason, .. }) => {
                    warn!("[Serial:{}] Device lost: {}", self.label, reason);
                    break PortEndReason::DeviceLost(reason);
                }
                Err(e) => {
                    warn!("[Serial:{}] Read failed: {}", self.label, e);
                    break PortEndReason::DeviceLost(e.to_string());
                }
            };

            if let Some(packet) = finished {
                if !self.emit(packet) {
                    // Coordinator is gone; nobody is listening
                    break PortEndReason::Stopped;
                }
            }
        };

        // Partial packet still counts, whatever ended the session
        if let Some(packet) = self.assembler.flush() {
            self.emit(packet);
        }

        debug!("[Serial:{}] Pipeline ended: {}", self.label, reason);
        self.stats.mark_ended(self.port, reason.clone());
        let _ = self.tx.blocking_send(SourceMessage::Ended(self.port, reason));
    }

    /// Classify, count and forward one packet. False once the receiver is closed.
    fn emit(&mut self, packet: Packet) -> bool {
        let verdict = self.classifier.classify(&packet);
        self.stats
            .record(self.port, verdict.direction, packet.len());
        if verdict.malformed {
            self.stats.record_malformed(self.port);
        }

        let event = PacketEvent {
            port: self.port,
            port_label: self.label.clone(),
            device_path: self.config.device_path.clone(),
            protocol: self.config.protocol,
            direction: verdict.direction,
            start_timestamp_us: packet.start_us(),
            end_timestamp_us: packet.end_us(),
            byte_length: packet.len(),
            decided_by: verdict.decided_by.as_str().to_string(),
            malformed: verdict.malformed,
            raw_bytes: packet.into_bytes(),
        };
        self.tx.blocking_send(SourceMessage::Packet(event)).is_ok()
    }
}

// ============================================================================
// Running Capture
// ============================================================================

/// Requests a cooperative stop of every pipeline
#[derive(Clone, Debug)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct RunningCapture {
    ports: Vec<PortConfig>,
    stop_flag: Arc<AtomicBool>,
    stats: Arc<StatsAggregator>,
    rx: mpsc::Receiver<SourceMessage>,
    handles: Vec<JoinHandle<()>>,
}

impl RunningCapture {
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop_flag))
    }

    /// Live counters; safe while pipelines are running
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn ports(&self) -> &[PortConfig] {
        &self.ports
    }

    /// Forward events to `sink` until every port has ended. When `shutdown`
    /// resolves, pipelines are told to stop; their final flushed packets
    /// are still delivered before this returns.
    pub async fn run<S, F>(mut self, sink: &mut S, shutdown: F) -> CaptureReport
    where
        S: PacketSink + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut interrupted = false;

        loop {
            tokio::select! {
                _ = &mut shutdown, if !interrupted => {
                    info!("[Capture] Shutdown requested, stopping {} port(s)", self.ports.len());
                    self.stop_flag.store(true, Ordering::SeqCst);
                    interrupted = true;
                }
                msg = self.rx.recv() => match msg {
                    Some(SourceMessage::Packet(event)) => sink.on_packet(&event),
                    Some(SourceMessage::Ended(port, reason)) => {
                        if let Some(config) = self.ports.get(port.0) {
                            info!("[Capture] {} ended: {}", config.display_label(), reason);
                            sink.on_port_ended(config, &reason);
                        }
                    }
                    None => break,
                },
            }
        }

        for result in futures::future::join_all(self.handles.drain(..)).await {
            if let Err(e) = result {
                warn!("[Capture] Pipeline task failed: {}", e);
            }
        }

        CaptureReport {
            stats: self.stats.snapshot(),
            interrupted,
        }
    }
}
