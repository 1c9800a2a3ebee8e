// src/endpoint.rs
use crate::addr::ConnId;
use crate::packet::PacketDescriptor;
use std::cell::Cell;
use std::rc::Rc;

/// Shared cursor/bookkeeping machinery for one side of a replayed
/// connection (spec.md §4.3, "Replay engine — common structure"). A
/// driver owns one over `(client_packets, req_counts,
/// exp_bytes_from_server)`; a responder owns one over `(server_packets,
/// rep_counts, exp_bytes_from_client)`.
///
/// Cursors are plain indices rather than iterators: both
/// `packet`/`remaining_in_burst`/`recv_threshold` need to be read
/// repeatedly across suspend/resume boundaries (a suspended send can be
/// rescheduled many times before it fires), which an iterator's
/// one-shot `next()` doesn't fit.
pub struct EndpointCore {
    pub id: ConnId,
    packets: Vec<PacketDescriptor>,
    send_counts: Vec<u32>,
    recv_thresholds: Vec<u64>,

    packet_idx: usize,
    /// Index into `send_counts` of the burst currently being sent (or, for
    /// a receive-first endpoint that hasn't sent yet, the burst about to be
    /// sent). Advanced only by [`Self::finish_send_burst`], which runs when
    /// a send burst has actually been exhausted — unlike `recv_burst_idx`,
    /// it must never move just because a reply threshold was consulted
    /// (see `finish_send_burst` vs. plain `consume_recv_threshold`, used by
    /// a responder's receive-first accept path before it has sent
    /// anything).
    send_burst_idx: usize,
    /// Index into `recv_thresholds` of the next expected-bytes value to
    /// consume. Advanced independently of `send_burst_idx` by
    /// [`Self::consume_recv_threshold`].
    recv_burst_idx: usize,
    remaining_in_burst: u32,
    current_burst_bytes: u64,

    pub total_bytes_seen: Rc<Cell<u64>>,
    siblings: Vec<(u16, u16, Rc<Cell<u64>>)>,
}

impl EndpointCore {
    pub fn new(id: ConnId, packets: Vec<PacketDescriptor>, send_counts: Vec<u32>, recv_thresholds: Vec<u64>) -> Self {
        let remaining_in_burst = send_counts.first().copied().unwrap_or(0);
        Self {
            id,
            packets,
            send_counts,
            recv_thresholds,
            packet_idx: 0,
            send_burst_idx: 0,
            recv_burst_idx: 0,
            remaining_in_burst,
            current_burst_bytes: 0,
            total_bytes_seen: Rc::new(Cell::new(0)),
            siblings: Vec::new(),
        }
    }

    /// Sibling endpoints assembled at initialization time (spec.md §4.3,
    /// "Sibling discovery"), keyed by the `(client_port, server_port)`
    /// pair a packet's parallel snapshot uses to look them up.
    pub fn set_siblings(&mut self, siblings: Vec<(u16, u16, Rc<Cell<u64>>)>) {
        self.siblings = siblings;
    }

    pub fn total_bytes_seen(&self) -> u64 {
        self.total_bytes_seen.get()
    }

    /// The packet due to be sent next, or `None` once the script is
    /// exhausted.
    pub fn current_packet(&self) -> Option<&PacketDescriptor> {
        self.packets.get(self.packet_idx)
    }

    pub fn remaining_in_burst(&self) -> u32 {
        self.remaining_in_burst
    }

    /// The first sibling (by the packet's own snapshot order) whose
    /// recorded progress is still below the threshold the packet demands
    /// (spec.md §4.4 step `attempt_send`.1). `None` once every threshold
    /// in the snapshot is satisfied. A peer named in the snapshot but not
    /// found among this endpoint's registered siblings never blocks —
    /// there is nothing to gate on.
    pub fn blocking_sibling(&self, packet: &PacketDescriptor) -> Option<(u16, u16)> {
        packet.parallel_connections().find_map(|(peer_client_port, peer_server_port, threshold)| {
            let blocked = self
                .siblings
                .iter()
                .find(|(cp, sp, _)| *cp == peer_client_port && *sp == peer_server_port)
                .is_some_and(|(_, _, counter)| counter.get() < threshold);
            blocked.then_some((peer_client_port, peer_server_port))
        })
    }

    /// Records a packet transmission: advances the send cursor and
    /// decrements the current burst's remaining count.
    pub fn record_send(&mut self, size: u32) {
        self.total_bytes_seen.set(self.total_bytes_seen.get() + size as u64);
        self.packet_idx += 1;
        self.remaining_in_burst = self.remaining_in_burst.saturating_sub(1);
    }

    /// True once the current burst has no more packets queued to send.
    pub fn burst_exhausted(&self) -> bool {
        self.remaining_in_burst == 0
    }

    /// Consumes the next expected-bytes value from `recv_thresholds`
    /// without touching `send_burst_idx` (the "empty-script convention":
    /// an exhausted `recv_thresholds` list behaves as a single `0`). Used
    /// directly by a receive-first endpoint's initial accept, before it
    /// has sent anything to advance a send burst past.
    pub fn consume_recv_threshold(&mut self) -> u64 {
        let expected = self.recv_thresholds.get(self.recv_burst_idx).copied().unwrap_or(0);
        self.recv_burst_idx += 1;
        expected
    }

    /// Called exactly once when `burst_exhausted()` first becomes true for
    /// a burst this endpoint just finished sending: advances
    /// `send_burst_idx` past the burst just sent, then consumes the next
    /// recv threshold. A receive-first endpoint's first burst is primed by
    /// a direct `consume_recv_threshold()` call instead (see
    /// [`Self::consume_recv_threshold`]), since nothing has been sent yet
    /// for `send_burst_idx` to advance past.
    pub fn finish_send_burst(&mut self) -> u64 {
        self.send_burst_idx += 1;
        self.consume_recv_threshold()
    }

    /// Records received bytes against the current burst; returns `true`
    /// once the expected byte count for this burst has been met.
    pub fn record_recv(&mut self, bytes: u64, expected: u64) -> bool {
        self.total_bytes_seen.set(self.total_bytes_seen.get() + bytes);
        self.current_burst_bytes += bytes;
        self.current_burst_bytes >= expected
    }

    /// Advances past a satisfied receive burst and primes the next send
    /// burst's remaining-in-burst counter from `send_burst_idx`, which was
    /// already positioned by whichever of `consume_recv_threshold` (first
    /// burst, receive-first endpoint) or `finish_send_burst` (every other
    /// burst) ran before this receive began.
    pub fn advance_past_recv_burst(&mut self) {
        self.current_burst_bytes = 0;
        self.remaining_in_burst = self.send_counts.get(self.send_burst_idx).copied().unwrap_or(0);
    }

    pub fn has_more_to_send(&self) -> bool {
        self.packet_idx < self.packets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn id() -> ConnId {
        ConnId::new(Ipv4Addr::new(10, 0, 0, 1).into(), 100, Ipv4Addr::new(10, 0, 0, 2).into(), 80)
    }

    #[test]
    fn empty_script_seeds_a_single_zero_cursor() {
        let core = EndpointCore::new(id(), vec![], vec![], vec![]);
        assert_eq!(core.remaining_in_burst(), 0);
        assert!(core.burst_exhausted());
        assert!(!core.has_more_to_send());
    }

    #[test]
    fn blocking_sibling_reports_unmet_threshold() {
        let mut core = EndpointCore::new(id(), vec![], vec![], vec![]);
        let sibling_counter = Rc::new(Cell::new(50));
        core.set_siblings(vec![(101, 80, sibling_counter.clone())]);

        let mut packet = PacketDescriptor::new(10, std::time::Duration::from_secs(1));
        packet.add_parallel_connection(101, 80, 200);
        assert_eq!(core.blocking_sibling(&packet), Some((101, 80)));

        sibling_counter.set(200);
        assert_eq!(core.blocking_sibling(&packet), None);
    }

    #[test]
    fn blocking_sibling_ignores_unregistered_peer() {
        let core = EndpointCore::new(id(), vec![], vec![], vec![]);
        let mut packet = PacketDescriptor::new(10, std::time::Duration::from_secs(1));
        packet.add_parallel_connection(999, 999, 1);
        assert_eq!(core.blocking_sibling(&packet), None);
    }

    #[test]
    fn record_send_advances_cursor_and_burst_count() {
        let mut core = EndpointCore::new(id(), vec![PacketDescriptor::new(10, Duration::ZERO)], vec![1], vec![0]);
        assert!(!core.burst_exhausted());
        core.record_send(10);
        assert!(core.burst_exhausted());
        assert_eq!(core.total_bytes_seen(), 10);
        assert_eq!(core.consume_recv_threshold(), 0);
    }

    #[test]
    fn record_recv_completes_at_expected_threshold() {
        let mut core = EndpointCore::new(id(), vec![], vec![], vec![100]);
        assert!(!core.record_recv(40, 100));
        assert!(core.record_recv(60, 100));
        assert_eq!(core.total_bytes_seen(), 100);
    }

    /// A receive-first endpoint (a responder: `server_packets=[200]`,
    /// `rep_counts=[1]`, `exp_bytes_from_client=[100]`) consumes its first
    /// recv threshold directly via `consume_recv_threshold` — mirroring
    /// `Responder::accept` — before it has sent anything. Once that burst
    /// is satisfied, `advance_past_recv_burst` must prime burst 0 of
    /// `send_counts`, not burst 1: `send_burst_idx` only advances on a
    /// completed *send* burst (`finish_send_burst`), never on a bare
    /// `consume_recv_threshold` call.
    #[test]
    fn receive_first_endpoint_primes_send_burst_zero_not_one() {
        let mut core = EndpointCore::new(id(), vec![PacketDescriptor::new(200, Duration::ZERO)], vec![1], vec![100]);

        let expect = core.consume_recv_threshold();
        assert_eq!(expect, 100);
        assert!(core.record_recv(100, expect));
        core.advance_past_recv_burst();

        assert_eq!(core.remaining_in_burst(), 1, "burst 0 of send_counts must not be skipped");
        assert!(!core.burst_exhausted());
    }

    /// A send-first endpoint (a driver) advances `send_burst_idx` via
    /// `finish_send_burst` once its own burst is exhausted, and the
    /// following `advance_past_recv_burst` must prime the *next* send
    /// burst, not replay the one just sent.
    #[test]
    fn send_first_endpoint_advances_to_next_send_burst_after_reply() {
        let mut core = EndpointCore::new(
            id(),
            vec![PacketDescriptor::new(10, Duration::ZERO), PacketDescriptor::new(20, Duration::ZERO)],
            vec![1, 1],
            vec![50],
        );
        core.record_send(10);
        assert!(core.burst_exhausted());
        let expect = core.finish_send_burst();
        assert_eq!(expect, 50);
        assert!(core.record_recv(50, expect));
        core.advance_past_recv_burst();

        assert_eq!(core.remaining_in_burst(), 1, "second send burst must be primed, not the first again");
    }
}
