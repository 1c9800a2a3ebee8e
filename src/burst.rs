// src/burst.rs
//! The burst state machine shared by `driver::Driver` and
//! `responder::Responder` (spec.md §9, "Endpoint polymorphism": driver
//! and responder "share the packet burst machine behavior" and should
//! differ only in how they acquire a socket and how they terminate).
//! This module holds that shared machine; the two endpoint types each
//! own an [`crate::endpoint::EndpointCore`] and drive it through these
//! functions, supplying their own socket and scheduling.

use crate::endpoint::EndpointCore;
use crate::metrics;
use crate::sim::{EndpointHandle, Socket};
use crate::util::drain_wait;
use log::warn;
use std::time::Duration;

/// Polling granularity for both sibling-gating and receive-availability
/// back-off (spec.md §4.4 step `attempt_send`.1: "a busy-wait polled at
/// 10 µs granularity ... acceptable because the simulator clock advances
/// only at scheduled events"). The spec names this constant only for
/// sibling gating; §4.6's rationale applies equally to polling for
/// incoming bytes, so this crate reuses it there too.
pub const POLL_INTERVAL: Duration = Duration::from_micros(10);

/// Outcome of trying to send the endpoint's current packet (spec.md
/// §4.4's `attempt_send`, mirrored for the responder in §4.5).
pub enum SendStep {
    /// Packet transmitted; `core` has already advanced.
    Sent,
    /// A sibling named in the packet's snapshot hasn't reached its
    /// threshold yet; reschedule after [`POLL_INTERVAL`].
    WaitSibling { peer_client_port: u16, peer_server_port: u16 },
    /// The transmit buffer doesn't have `size` bytes free; reschedule
    /// after the time it takes the buffer to drain that much space.
    WaitBuffer(Duration),
}

/// Attempts to send the packet `core` is currently pointed at. Does not
/// advance any cursor on its own except via `record_send`/
/// `consume_recv_threshold` once the send actually happens.
pub fn attempt_send(core: &mut EndpointCore, socket: &mut dyn Socket, data_rate: u64, role: &str) -> SendStep {
    let packet = core
        .current_packet()
        .expect("attempt_send called with an exhausted packet cursor")
        .clone();

    if packet.is_delayed() {
        if let Some((peer_client_port, peer_server_port)) = core.blocking_sibling(&packet) {
            metrics::inc_engine_gating_backoff();
            return SendStep::WaitSibling { peer_client_port, peer_server_port };
        }
    }

    if (socket.send_buffer_free() as u64) < packet.size() as u64 {
        return SendStep::WaitBuffer(drain_wait(packet.size() as u64, data_rate));
    }

    socket.send(packet.size() as usize);
    core.record_send(packet.size());
    metrics::inc_engine_packets_sent(role);
    SendStep::Sent
}

/// What the burst machine should do once a send lands (spec.md §4.4
/// step 4: "Decrement remaining-in-burst ... if ==0, advance exp_bytes
/// cursor").
pub enum AfterSend {
    /// More packets queued in the current burst; attempt the next one.
    MoreInBurst,
    /// The burst just closed with no bytes expected back: the script is
    /// exhausted on this side.
    Finished,
    /// The burst just closed and `expect` bytes are now expected from
    /// the peer before this side may send again.
    AwaitReply { expect: u64 },
}

pub fn after_send(core: &mut EndpointCore) -> AfterSend {
    if !core.burst_exhausted() {
        return AfterSend::MoreInBurst;
    }
    let expect = core.finish_send_burst();
    if expect == 0 {
        AfterSend::Finished
    } else {
        AfterSend::AwaitReply { expect }
    }
}

/// Logs a detected stall (spec.md §4.6: "Implementations MAY detect a
/// stall (no event between two successive checks) and log it"). Called
/// when a sibling-gating re-check lands at the same virtual time as the
/// previous one against the same peer, meaning no sibling made progress
/// in between.
pub fn log_stall(handle: EndpointHandle, peer_client_port: u16, peer_server_port: u16) {
    metrics::inc_engine_stall();
    warn!(
        "{:?} stalled waiting on sibling {}:{}",
        handle, peer_client_port, peer_server_port
    );
}

/// Drains whatever is currently available on `socket`'s receive buffer
/// against `expected` (spec.md §4.4 `RECEIVING`: "drain socket reads;
/// each received byte increments total_bytes_seen and
/// current_burst_bytes"). Returns `true` once the burst's expectation is
/// met.
pub fn drain_available(core: &mut EndpointCore, socket: &mut dyn Socket, expected: u64, role: &str) -> bool {
    let available = socket.recv_available() as u64;
    if available == 0 {
        return false;
    }
    socket.recv(available as usize);
    metrics::inc_engine_packets_received(role);
    core.record_recv(available, expected)
}
