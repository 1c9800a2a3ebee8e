//! The boundary this crate needs from a host discrete-event simulator
//! (spec.md §5, §9: simulator kernel internals are out of scope). A host
//! implements `Scheduler` and `SocketFactory`/`Socket`; `memory` is a
//! minimal in-process reference implementation used by this crate's own
//! tests and the `replay` demo binary.

pub mod memory;

use std::net::SocketAddr;
use std::time::Duration;

/// Identifies one replay endpoint for scheduling purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointHandle {
    pub node: usize,
    pub role: Role,
    pub slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Driver,
    Responder,
}

/// Read-only access to the virtual clock.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Cooperative event scheduling over a virtual clock (spec.md §5:
/// "single-threaded cooperative ... no OS threads, no synchronization
/// primitives"). `schedule_wake` is the only way an endpoint suspends:
/// it enqueues a future wake-up and returns control to the host loop.
pub trait Scheduler: Clock {
    fn schedule_wake(&mut self, at: Duration, endpoint: EndpointHandle);
    fn stop_time(&self) -> Duration;
}

/// A simulated TCP socket as seen by a replay endpoint. Buffer space and
/// availability are modeled in bytes; actual payload content is never
/// materialized (spec.md Non-goals: "payload content").
pub trait Socket {
    fn connect(&mut self, peer: SocketAddr) -> std::io::Result<()>;
    fn bind(&mut self, local: SocketAddr) -> std::io::Result<()>;

    /// Starts listening for a connection from `peer`. A real TCP listener
    /// accepts from any peer and `accept()` hands back a per-connection
    /// socket; this crate's endpoints are always built from a specific
    /// captured 4-tuple, so a responder already knows which peer it's
    /// waiting for and a host `Socket` implementation can use that to
    /// disambiguate multiple scripted connections sharing one server port
    /// (e.g. several clients all replaying against port 80).
    fn listen(&mut self, peer: SocketAddr);

    /// Bytes of free space left in the transmit buffer.
    fn send_buffer_free(&self) -> usize;
    /// Enqueues `bytes` for transmission; caller has already checked
    /// `send_buffer_free`.
    fn send(&mut self, bytes: usize);

    /// Bytes available to read without blocking.
    fn recv_available(&self) -> usize;
    /// Consumes `bytes` from the receive buffer.
    fn recv(&mut self, bytes: usize);

    fn close(&mut self);
    fn is_closed(&self) -> bool;
}

/// Produces sockets bound to the host simulator's network stack.
pub trait SocketFactory {
    fn create(&mut self) -> Box<dyn Socket>;
}
