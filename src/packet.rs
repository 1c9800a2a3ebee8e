// src/packet.rs
use std::time::Duration;

/// A single replay unit: its size, the idle delay before it should be
/// sent, and (for delayed packets only) the cross-connection progress
/// preconditions captured at extraction time.
///
/// `parallel_snapshot` is append-only and short (typically under ten
/// entries); lookup is a linear scan, which is the right trade-off at
/// this size.
#[derive(Debug, Clone, Default)]
pub struct PacketDescriptor {
    size: u32,
    delay: Duration,
    parallel_snapshot: Vec<ParallelEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ParallelEntry {
    peer_client_port: u16,
    peer_server_port: u16,
    byte_threshold: u64,
}

impl PacketDescriptor {
    pub fn new(size: u32, delay: Duration) -> Self {
        Self {
            size,
            delay,
            parallel_snapshot: Vec::new(),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_delayed(&self) -> bool {
        !self.delay.is_zero()
    }

    pub fn add_parallel_connection(&mut self, peer_client_port: u16, peer_server_port: u16, byte_threshold: u64) {
        self.parallel_snapshot.push(ParallelEntry {
            peer_client_port,
            peer_server_port,
            byte_threshold,
        });
    }

    pub fn num_parallel_connections(&self) -> usize {
        self.parallel_snapshot.len()
    }

    pub fn parallel_connection(&self, index: usize) -> Option<(u16, u16, u64)> {
        self.parallel_snapshot
            .get(index)
            .map(|e| (e.peer_client_port, e.peer_server_port, e.byte_threshold))
    }

    /// Byte threshold recorded for the peer connection identified by
    /// (peer_client_port, peer_server_port); 0 ("no precondition") if
    /// the peer wasn't in the snapshot.
    pub fn byte_threshold_for(&self, peer_client_port: u16, peer_server_port: u16) -> u64 {
        self.parallel_snapshot
            .iter()
            .find(|e| e.peer_client_port == peer_client_port && e.peer_server_port == peer_server_port)
            .map(|e| e.byte_threshold)
            .unwrap_or(0)
    }

    pub fn parallel_connections(&self) -> impl Iterator<Item = (u16, u16, u64)> + '_ {
        self.parallel_snapshot
            .iter()
            .map(|e| (e.peer_client_port, e.peer_server_port, e.byte_threshold))
    }
}
