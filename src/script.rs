// src/script.rs
use crate::addr::ConnId;
use crate::packet::PacketDescriptor;
use std::time::Duration;

/// Immutable, per-connection replay script produced by the extractor and
/// consumed by the replay engine. See spec.md §3 for the invariants this
/// type must uphold; `validate` checks them at construction time so a
/// corrupt trace file is rejected before any endpoint is built from it.
#[derive(Debug, Clone)]
pub struct ConnectionScript {
    pub id: ConnId,
    pub start_time: Duration,
    pub client_packets: Vec<PacketDescriptor>,
    pub server_packets: Vec<PacketDescriptor>,
    pub req_counts: Vec<u32>,
    pub rep_counts: Vec<u32>,
    pub exp_bytes_from_server: Vec<u64>,
    pub exp_bytes_from_client: Vec<u64>,
}

impl ConnectionScript {
    /// Checks the invariants listed in spec.md §3. Returns the first
    /// violation found, if any.
    pub fn validate(&self) -> Result<(), String> {
        let req_sum: u32 = self.req_counts.iter().sum();
        if req_sum as usize != self.client_packets.len() {
            return Err(format!(
                "sum(req_counts)={} != len(client_packets)={}",
                req_sum,
                self.client_packets.len()
            ));
        }
        let rep_sum: u32 = self.rep_counts.iter().sum();
        if rep_sum as usize != self.server_packets.len() {
            return Err(format!(
                "sum(rep_counts)={} != len(server_packets)={}",
                rep_sum,
                self.server_packets.len()
            ));
        }
        let diff = self.req_counts.len() as i64 - self.rep_counts.len() as i64;
        if diff.abs() > 1 {
            return Err(format!(
                "bursts must alternate: |{} - {}| > 1",
                self.req_counts.len(),
                self.rep_counts.len()
            ));
        }
        for p in self.client_packets.iter().chain(self.server_packets.iter()) {
            if !p.is_delayed() && p.num_parallel_connections() > 0 {
                return Err("packet with delay == 0 carries a non-empty parallel_snapshot".into());
            }
        }
        Ok(())
    }

    /// A script with no packets on either side still terminates cleanly:
    /// both cursors are seeded with a single zero (spec.md §4.3, "empty
    /// script convention").
    pub fn is_empty_both_sides(&self) -> bool {
        self.client_packets.is_empty() && self.server_packets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn id() -> ConnId {
        ConnId::new(
            Ipv4Addr::new(10, 0, 0, 1).into(),
            100,
            Ipv4Addr::new(10, 0, 0, 2).into(),
            80,
        )
    }

    #[test]
    fn single_ping_pong_validates() {
        let script = ConnectionScript {
            id: id(),
            start_time: Duration::ZERO,
            client_packets: vec![PacketDescriptor::new(100, Duration::ZERO)],
            server_packets: vec![PacketDescriptor::new(200, Duration::ZERO)],
            req_counts: vec![1],
            rep_counts: vec![1],
            exp_bytes_from_server: vec![200],
            exp_bytes_from_client: vec![100],
        };
        assert!(script.validate().is_ok());
    }

    #[test]
    fn mismatched_req_counts_is_rejected() {
        let script = ConnectionScript {
            id: id(),
            start_time: Duration::ZERO,
            client_packets: vec![PacketDescriptor::new(100, Duration::ZERO)],
            server_packets: vec![],
            req_counts: vec![2],
            rep_counts: vec![],
            exp_bytes_from_server: vec![],
            exp_bytes_from_client: vec![],
        };
        assert!(script.validate().is_err());
    }

    #[test]
    fn zero_delay_with_snapshot_is_rejected() {
        let mut pkt = PacketDescriptor::new(10, Duration::ZERO);
        pkt.add_parallel_connection(101, 80, 5);
        let script = ConnectionScript {
            id: id(),
            start_time: Duration::ZERO,
            client_packets: vec![pkt],
            server_packets: vec![],
            req_counts: vec![1],
            rep_counts: vec![],
            exp_bytes_from_server: vec![0],
            exp_bytes_from_client: vec![],
        };
        assert!(script.validate().is_err());
    }
}
