// src/io/serial/mod.rs
//
// Serial port tap: read-only sessions and quiet-period packet assembly.
//
// Features:
// - Exclusive, read-only port sessions (never transmits)
// - Chunk -> packet grouping by inter-chunk silence
// - Scripted sources for hardware-free pipelines

pub mod assembler;
pub mod config;
pub mod mock;
pub mod session;
pub mod utils;

pub use assembler::PacketAssembler;
pub use config::{validate_ports, ByteSize, Parity, PortConfig, ProtocolType, StopBits};
pub use session::{ChunkSource, PortOpener, PortSession, ReadOutcome, SerialOpener};
pub use utils::{list_serial_ports, recommended_packet_timeout, SerialPortInfo, UsbIdentity};
