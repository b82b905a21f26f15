// src/io/types.rs
//
// Messages sent from per-port pipelines to the capture coordinator.

use super::{PacketEvent, PortEndReason, PortId};

/// Internal message from a port pipeline to the coordinator
#[derive(Debug)]
pub(crate) enum SourceMessage {
    /// A finalized, classified packet
    Packet(PacketEvent),
    /// The pipeline finished (port, reason)
    Ended(PortId, PortEndReason),
}
