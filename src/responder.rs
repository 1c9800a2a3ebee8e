// src/responder.rs
use crate::addr::ConnId;
use crate::burst::{self, AfterSend, SendStep, POLL_INTERVAL};
use crate::endpoint::EndpointCore;
use crate::script::ConnectionScript;
use crate::sim::{EndpointHandle, Scheduler, Socket, SocketFactory};
use crate::util::drain_wait;
use log::{info, warn};
use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

/// spec.md §4.5. `Draining` isn't one of the spec's four named states;
/// it's this crate's name for "my own script is exhausted, waiting for
/// the driver's FIN" — §4.5 says the responder "never initiates close;
/// it closes in response to the peer's FIN", which needs *some* state to
/// sit in between finishing its own bursts and actually observing the
/// close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    Listening,
    Receiving,
    Sending,
    Draining,
    Closed,
}

/// The passive listener — the "server side" of a replayed connection
/// (spec.md §4.5). Shares [`EndpointCore`]'s burst machine with
/// [`crate::driver::Driver`]; differs only in how it acquires a socket
/// (bind + listen, then accept) and in how it terminates (spec.md §9:
/// "passive close").
pub struct Responder {
    pub handle: EndpointHandle,
    core: EndpointCore,
    state: ResponderState,
    local_addr: SocketAddr,
    /// The driver's local address, known up front because this responder
    /// was built from the same captured connection (spec.md §9: the
    /// source's own driver/responder pairing is scripted, not a generic
    /// listen/accept). Used to disambiguate this connection's link from
    /// any other scripted connection sharing the same server port.
    peer_addr: SocketAddr,
    socket: Option<Box<dyn Socket>>,
    recv_expected: u64,
    /// `(peer_client_port, peer_server_port)` of the previous
    /// sibling-gating check, used to detect a stall: two consecutive
    /// wakes blocked on the same peer with no intervening `Sent` mean no
    /// sibling made progress between them (spec.md §4.6, "Implementations
    /// MAY detect a stall"). Virtual time itself can't be compared here —
    /// each `WaitSibling` reschedules strictly later, so two checks never
    /// share a `now`.
    last_block: Option<(u16, u16)>,
    /// Set once a stall has been logged for the current `last_block`
    /// episode, so a long wait logs once instead of on every poll.
    stall_logged: bool,
    data_rate: u64,
}

impl Responder {
    pub fn new(
        handle: EndpointHandle,
        script: &ConnectionScript,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        data_rate: u64,
    ) -> Self {
        let core = EndpointCore::new(
            script.id,
            script.server_packets.clone(),
            script.rep_counts.clone(),
            script.exp_bytes_from_client.clone(),
        );
        Self {
            handle,
            core,
            state: ResponderState::Listening,
            local_addr,
            peer_addr,
            socket: None,
            recv_expected: 0,
            last_block: None,
            stall_logged: false,
            data_rate,
        }
    }

    pub fn id(&self) -> ConnId {
        self.core.id
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ResponderState::Closed
    }

    pub fn total_bytes_seen(&self) -> u64 {
        self.core.total_bytes_seen()
    }

    pub fn total_bytes_seen_handle(&self) -> Rc<Cell<u64>> {
        self.core.total_bytes_seen.clone()
    }

    pub fn set_siblings(&mut self, siblings: Vec<(u16, u16, Rc<Cell<u64>>)>) {
        self.core.set_siblings(siblings);
    }

    /// Binds and listens immediately; a responder has no jittered start
    /// time of its own (spec.md §4.5: "On start: bind and listen on the
    /// assigned port").
    pub fn start(&mut self, now: Duration, scheduler: &mut dyn Scheduler, factory: &mut dyn SocketFactory) {
        let mut socket = factory.create();
        if let Err(e) = socket.bind(self.local_addr) {
            warn!("responder {:?} failed to bind {}: {e}", self.core.id, self.local_addr);
            self.state = ResponderState::Closed;
            return;
        }
        socket.listen(self.peer_addr);
        self.socket = Some(socket);
        self.accept(now, scheduler);
    }

    /// spec.md §4.5: "On accept: if the first expected-bytes value is 0,
    /// jump directly to SENDING; else -> RECEIVING." With the in-memory
    /// `sim` reference, a `connect()` from the peer is visible the moment
    /// its byte pipe exists, so "accept" here just means "begin serving
    /// this connection" rather than a distinct blocking step.
    fn accept(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        self.recv_expected = self.core.consume_recv_threshold();
        if self.recv_expected == 0 {
            self.begin_send_burst(now, scheduler);
        } else {
            self.state = ResponderState::Receiving;
            scheduler.schedule_wake(now + POLL_INTERVAL, self.handle);
        }
    }

    /// Advances the state machine in response to a scheduled wake at
    /// `now`.
    pub fn on_wake(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        match self.state {
            ResponderState::Listening => {}
            ResponderState::Receiving => self.poll_receive(now, scheduler),
            ResponderState::Sending => self.attempt_current_send(now, scheduler),
            ResponderState::Draining => self.poll_drain(now, scheduler),
            ResponderState::Closed => {}
        }
    }

    fn begin_send_burst(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        self.state = ResponderState::Sending;
        if self.core.burst_exhausted() {
            self.finish_send_burst(now, scheduler);
            return;
        }
        let packet = self.core.current_packet().expect("burst not exhausted implies a packet").clone();
        let at = if packet.is_delayed() {
            now + packet.delay() + drain_wait(packet.size() as u64, self.data_rate)
        } else {
            now
        };
        scheduler.schedule_wake(at, self.handle);
    }

    fn attempt_current_send(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        let socket = self.socket.as_mut().expect("SENDING state implies a bound socket");
        match burst::attempt_send(&mut self.core, socket.as_mut(), self.data_rate, "responder") {
            SendStep::Sent => {
                self.last_block = None;
                self.stall_logged = false;
                if self.core.burst_exhausted() {
                    self.finish_send_burst(now, scheduler);
                } else {
                    self.begin_send_burst(now, scheduler);
                }
            }
            SendStep::WaitSibling { peer_client_port, peer_server_port } => {
                if self.last_block == Some((peer_client_port, peer_server_port)) {
                    if !self.stall_logged {
                        burst::log_stall(self.handle, peer_client_port, peer_server_port);
                        self.stall_logged = true;
                    }
                } else {
                    self.last_block = Some((peer_client_port, peer_server_port));
                }
                scheduler.schedule_wake(now + POLL_INTERVAL, self.handle);
            }
            SendStep::WaitBuffer(wait) => {
                scheduler.schedule_wake(now + wait, self.handle);
            }
        }
    }

    fn finish_send_burst(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        match burst::after_send(&mut self.core) {
            AfterSend::MoreInBurst => unreachable!("finish_send_burst called with packets still pending"),
            AfterSend::Finished => self.begin_draining(now, scheduler),
            AfterSend::AwaitReply { expect } => {
                self.state = ResponderState::Receiving;
                self.recv_expected = expect;
                if expect == 0 {
                    self.advance_past_receive(now, scheduler);
                } else {
                    scheduler.schedule_wake(now + POLL_INTERVAL, self.handle);
                }
            }
        }
    }

    fn poll_receive(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        let socket = self.socket.as_mut().expect("RECEIVING state implies a bound socket");
        let done = burst::drain_available(&mut self.core, socket.as_mut(), self.recv_expected, "responder");
        if done {
            self.advance_past_receive(now, scheduler);
        } else {
            scheduler.schedule_wake(now + POLL_INTERVAL, self.handle);
        }
    }

    fn advance_past_receive(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        self.core.advance_past_recv_burst();
        if self.core.has_more_to_send() {
            self.begin_send_burst(now, scheduler);
        } else {
            self.begin_draining(now, scheduler);
        }
    }

    /// The responder's own script is exhausted; wait for the driver's
    /// FIN rather than closing itself (spec.md §4.5).
    fn begin_draining(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        self.state = ResponderState::Draining;
        self.poll_drain(now, scheduler);
    }

    fn poll_drain(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        let peer_closed = self.socket.as_ref().is_some_and(|s| s.is_closed());
        if peer_closed {
            self.state = ResponderState::Closed;
            info!(
                "responder {:?} closed at {:?} following peer FIN, total_bytes_seen={}",
                self.core.id,
                now,
                self.core.total_bytes_seen()
            );
        } else {
            scheduler.schedule_wake(now + POLL_INTERVAL, self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;
    use crate::packet::PacketDescriptor;
    use crate::sim::memory::{MemoryScheduler, MemorySocketFactory};
    use crate::sim::Role;
    use std::net::Ipv4Addr;

    fn script() -> ConnectionScript {
        ConnectionScript {
            id: ConnId::new(Ipv4Addr::new(10, 0, 0, 1).into(), 100, Ipv4Addr::new(10, 0, 0, 2).into(), 80),
            start_time: Duration::ZERO,
            client_packets: vec![PacketDescriptor::new(100, Duration::ZERO)],
            server_packets: vec![PacketDescriptor::new(200, Duration::ZERO)],
            req_counts: vec![1],
            rep_counts: vec![1],
            exp_bytes_from_server: vec![200],
            exp_bytes_from_client: vec![100],
        }
    }

    #[test]
    fn accept_with_nonzero_expected_bytes_waits_to_receive() {
        let script = script();
        let addr: SocketAddr = "127.0.0.1:9100".parse().unwrap();
        let driver_addr: SocketAddr = "127.0.0.1:40100".parse().unwrap();
        let handle = EndpointHandle { node: 1, role: Role::Responder, slot: 0 };
        let mut responder = Responder::new(handle, &script, addr, driver_addr, 1_000_000);
        let mut scheduler = MemoryScheduler::new(Duration::from_secs(10));
        let mut factory = MemorySocketFactory::new(1500);
        responder.start(Duration::ZERO, &mut scheduler, &mut factory);
        assert_eq!(responder.state(), ResponderState::Receiving);
    }

    #[test]
    fn full_ping_pong_drains_to_closed_after_driver_fin() {
        let script = script();
        let peer: SocketAddr = "127.0.0.1:9101".parse().unwrap();
        let r_handle = EndpointHandle { node: 1, role: Role::Responder, slot: 0 };
        let d_handle = EndpointHandle { node: 0, role: Role::Driver, slot: 0 };

        let mut scheduler = MemoryScheduler::new(Duration::from_secs(10));
        let mut factory = MemorySocketFactory::new(1500);

        let driver_addr: SocketAddr = "127.0.0.1:40101".parse().unwrap();
        let mut responder = Responder::new(r_handle, &script, peer, driver_addr, 1_000_000);
        responder.start(Duration::ZERO, &mut scheduler, &mut factory);
        assert_eq!(responder.state(), ResponderState::Receiving);

        let mut driver = Driver::new(d_handle, &script, driver_addr, peer, Duration::ZERO, 1_000_000);
        driver.on_wake(Duration::ZERO, &mut scheduler, &mut factory); // IDLE -> CONNECTING -> SENDING, schedules attempt

        let mut guard = 0;
        while !(driver.is_closed() && responder.is_closed()) {
            guard += 1;
            assert!(guard < 1000, "state machines failed to converge");
            let Some(due) = scheduler.pop_due() else { break };
            let now = scheduler.now();
            match due.role {
                Role::Driver => driver.on_wake(now, &mut scheduler, &mut factory),
                Role::Responder => responder.on_wake(now, &mut scheduler),
            }
        }

        assert!(driver.is_closed());
        assert!(responder.is_closed());
        assert_eq!(driver.total_bytes_seen(), 100 + 200);
        assert_eq!(responder.total_bytes_seen(), 200 + 100);
    }
}
