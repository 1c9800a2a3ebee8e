// src/driver.rs
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

/// spec.md §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Connecting,
    Sending,
    Receiving,
    Closed,
}

/// The active opener — the "client side" of a replayed connection
/// (spec.md §4.4). Shares [`EndpointCore`]'s burst machine with
/// [`crate::responder::Responder`]; the two differ only in how they
/// acquire a socket (here: bind then connect) and how they terminate
/// (spec.md §9 "Endpoint polymorphism": "initiator closes").
pub struct Driver {
    pub handle: EndpointHandle,
    core: EndpointCore,
    state: DriverState,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    socket: Option<Box<dyn Socket>>,
    start_time: Duration,
    data_rate: u64,
    /// Bytes expected from the peer before the current receive burst is
    /// satisfied; set when entering `RECEIVING`, consulted on every poll.
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
}

impl Driver {
    pub fn new(
        handle: EndpointHandle,
        script: &ConnectionScript,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        start_time: Duration,
        data_rate: u64,
    ) -> Self {
        let core = EndpointCore::new(
            script.id,
            script.client_packets.clone(),
            script.req_counts.clone(),
            script.exp_bytes_from_server.clone(),
        );
        Self {
            handle,
            core,
            state: DriverState::Idle,
            local_addr,
            peer_addr,
            socket: None,
            start_time,
            data_rate,
            recv_expected: 0,
            last_block: None,
            stall_logged: false,
        }
    }

    pub fn id(&self) -> ConnId {
        self.core.id
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == DriverState::Closed
    }

    pub fn total_bytes_seen(&self) -> u64 {
        self.core.total_bytes_seen()
    }

    /// The scheduled `IDLE -> CONNECTING` time: the script's captured
    /// start time plus the configured offset plus this connection's
    /// jitter (spec.md §6/§8 scenario 6).
    pub fn start_time(&self) -> Duration {
        self.start_time
    }

    /// The shared counter siblings read to gate their own sends (spec.md
    /// §4.3: "`total_bytes_seen` counter ... readable by any sibling").
    pub fn total_bytes_seen_handle(&self) -> Rc<Cell<u64>> {
        self.core.total_bytes_seen.clone()
    }

    pub fn set_siblings(&mut self, siblings: Vec<(u16, u16, Rc<Cell<u64>>)>) {
        self.core.set_siblings(siblings);
    }

    /// `IDLE → CONNECTING` at the scheduled start time (spec.md §4.4;
    /// `start_time` is expected to already fold in the configured
    /// `start_time_offset` and per-flow jitter, spec.md §6).
    pub fn schedule_start(&self, scheduler: &mut dyn Scheduler) {
        scheduler.schedule_wake(self.start_time, self.handle);
    }

    /// Advances the state machine in response to a scheduled wake at
    /// `now`. The host loop calls this whenever `scheduler` fires this
    /// driver's handle.
    pub fn on_wake(&mut self, now: Duration, scheduler: &mut dyn Scheduler, factory: &mut dyn SocketFactory) {
        match self.state {
            DriverState::Idle => self.connect(now, scheduler, factory),
            DriverState::Connecting => {}
            DriverState::Sending => self.attempt_current_send(now, scheduler),
            DriverState::Receiving => self.poll_receive(now, scheduler),
            DriverState::Closed => {}
        }
    }

    fn connect(&mut self, now: Duration, scheduler: &mut dyn Scheduler, factory: &mut dyn SocketFactory) {
        self.state = DriverState::Connecting;
        let mut socket = factory.create();
        let result = socket.bind(self.local_addr).and_then(|_| socket.connect(self.peer_addr));
        match result {
            Ok(()) => {
                self.socket = Some(socket);
                self.begin_send_burst(now, scheduler);
            }
            Err(e) => {
                warn!("driver {:?} failed to connect to {}: {e}", self.core.id, self.peer_addr);
                self.state = DriverState::Closed;
            }
        }
    }

    /// Enters `SENDING` for the burst the cursor is currently pointed at.
    /// If the burst has no packets of its own, falls straight through to
    /// the post-send transition (spec.md §4.3 empty-script convention).
    fn begin_send_burst(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        self.state = DriverState::Sending;
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

    /// spec.md §4.4's `attempt_send`.
    fn attempt_current_send(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        let socket = self.socket.as_mut().expect("SENDING state implies a connected socket");
        match burst::attempt_send(&mut self.core, socket.as_mut(), self.data_rate, "driver") {
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

    /// spec.md §4.4 step 4's post-burst branch.
    fn finish_send_burst(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        match burst::after_send(&mut self.core) {
            AfterSend::MoreInBurst => unreachable!("finish_send_burst called with packets still pending"),
            AfterSend::Finished => self.close(now),
            AfterSend::AwaitReply { expect } => {
                self.state = DriverState::Receiving;
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
        let socket = self.socket.as_mut().expect("RECEIVING state implies a connected socket");
        let done = burst::drain_available(&mut self.core, socket.as_mut(), self.recv_expected, "driver");
        if done {
            self.advance_past_receive(now, scheduler);
        } else {
            scheduler.schedule_wake(now + POLL_INTERVAL, self.handle);
        }
    }

    fn advance_past_receive(&mut self, now: Duration, scheduler: &mut dyn Scheduler) {
        self.core.advance_past_recv_burst();
        if self.core.has_more_to_send() {
            self.state = DriverState::Sending;
            self.begin_send_burst(now, scheduler);
        } else {
            self.close(now);
        }
    }

    fn close(&mut self, now: Duration) {
        if let Some(socket) = self.socket.as_mut() {
            socket.close();
        }
        self.state = DriverState::Closed;
        info!(
            "driver {:?} closed at {:?}, total_bytes_seen={}",
            self.core.id,
            now,
            self.core.total_bytes_seen()
        );
    }
}
