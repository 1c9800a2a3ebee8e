//! Minimal in-process implementation of the `sim` trait boundary, used by
//! this crate's own tests and the `replay` demo binary. Not a simulator:
//! delivery is immediate (a sent byte is available to the peer's `recv`
//! the instant it's sent), bounded only by each direction's configured
//! buffer capacity. Real topology, latency and loss belong to a host
//! simulator (spec.md §1 Non-goals).

use super::{Clock, EndpointHandle, Scheduler, Socket, SocketFactory};
use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug)]
struct ScheduledEvent {
    at: Duration,
    seq: u64,
    endpoint: EndpointHandle,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for ScheduledEvent {}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so a `BinaryHeap` (a max-heap) behaves as a min-heap over
        // (time, insertion order) — earliest-scheduled event pops first,
        // ties broken by schedule order for deterministic replay.
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A single-threaded virtual-clock event queue (spec.md §5).
pub struct MemoryScheduler {
    now: Duration,
    stop_time: Duration,
    next_seq: u64,
    queue: BinaryHeap<ScheduledEvent>,
}

impl MemoryScheduler {
    pub fn new(stop_time: Duration) -> Self {
        Self {
            now: Duration::ZERO,
            stop_time,
            next_seq: 0,
            queue: BinaryHeap::new(),
        }
    }

    /// Pops and returns the next due event, advancing the virtual clock to
    /// its scheduled time. Returns `None` once the queue is drained or the
    /// next event falls at/after `stop_time` (spec.md §5: a global
    /// stop-time cancels any pending send event).
    pub fn pop_due(&mut self) -> Option<EndpointHandle> {
        let event = self.queue.peek()?;
        if event.at >= self.stop_time {
            return None;
        }
        let event = self.queue.pop().expect("peeked event must be present");
        self.now = event.at;
        Some(event.endpoint)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Clock for MemoryScheduler {
    fn now(&self) -> Duration {
        self.now
    }
}

impl Scheduler for MemoryScheduler {
    fn schedule_wake(&mut self, at: Duration, endpoint: EndpointHandle) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(ScheduledEvent { at, seq, endpoint });
    }

    fn stop_time(&self) -> Duration {
        self.stop_time
    }
}

/// Shared byte-availability counters for one simulated direction of a
/// connection; a sender increments it, the matching receiver drains it.
type Pipe = Rc<Cell<usize>>;

#[derive(Clone)]
struct Link {
    client_to_server: Pipe,
    server_to_client: Pipe,
    /// Shared by both ends: either side's `close()` sets this, so the
    /// other side's `is_closed()` observes a peer-initiated close (spec.md
    /// §4.5: "The responder never initiates close; it closes in response
    /// to the peer's FIN").
    closed: Rc<Cell<bool>>,
}

/// Produces `MemorySocket`s wired together by (server address, client
/// address): a responder binds and listens for a specific peer first,
/// then a driver's `connect` from that same address pair shares the
/// matching pair of byte pipes. Keying by the full address pair (rather
/// than server address alone) lets several scripted connections share
/// one server port without colliding, the way real accepted sockets are
/// disambiguated by four-tuple.
pub struct MemorySocketFactory {
    capacity: usize,
    links: Rc<std::cell::RefCell<HashMap<(SocketAddr, SocketAddr), Link>>>,
}

impl MemorySocketFactory {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            capacity: buffer_capacity,
            links: Rc::new(std::cell::RefCell::new(HashMap::new())),
        }
    }
}

impl SocketFactory for MemorySocketFactory {
    fn create(&mut self) -> Box<dyn Socket> {
        Box::new(MemorySocket {
            links: self.links.clone(),
            capacity: self.capacity,
            local: None,
            outbound: None,
            inbound: None,
            peer_closed: None,
            closed: false,
        })
    }
}

pub struct MemorySocket {
    links: Rc<std::cell::RefCell<HashMap<(SocketAddr, SocketAddr), Link>>>,
    capacity: usize,
    local: Option<SocketAddr>,
    outbound: Option<Pipe>,
    inbound: Option<Pipe>,
    peer_closed: Option<Rc<Cell<bool>>>,
    closed: bool,
}

impl Socket for MemorySocket {
    fn bind(&mut self, local: SocketAddr) -> std::io::Result<()> {
        self.local = Some(local);
        Ok(())
    }

    fn listen(&mut self, peer: SocketAddr) {
        let local = self.local.expect("bind before listen");
        let link = Link {
            client_to_server: Rc::new(Cell::new(0)),
            server_to_client: Rc::new(Cell::new(0)),
            closed: Rc::new(Cell::new(false)),
        };
        self.outbound = Some(link.server_to_client.clone());
        self.inbound = Some(link.client_to_server.clone());
        self.peer_closed = Some(link.closed.clone());
        self.links.borrow_mut().insert((local, peer), link);
    }

    fn connect(&mut self, peer: SocketAddr) -> std::io::Result<()> {
        let local = self.local.expect("bind before connect");
        let link = self
            .links
            .borrow()
            .get(&(peer, local))
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no listener for this address pair"))?;
        self.outbound = Some(link.client_to_server);
        self.inbound = Some(link.server_to_client);
        self.peer_closed = Some(link.closed);
        Ok(())
    }

    fn send_buffer_free(&self) -> usize {
        let used = self.outbound.as_ref().map(|p| p.get()).unwrap_or(0);
        self.capacity.saturating_sub(used)
    }

    fn send(&mut self, bytes: usize) {
        if let Some(p) = &self.outbound {
            p.set(p.get() + bytes);
        }
    }

    fn recv_available(&self) -> usize {
        self.inbound.as_ref().map(|p| p.get()).unwrap_or(0)
    }

    fn recv(&mut self, bytes: usize) {
        if let Some(p) = &self.inbound {
            p.set(p.get().saturating_sub(bytes));
        }
    }

    fn close(&mut self) {
        self.closed = true;
        if let Some(shared) = &self.peer_closed {
            shared.set(true);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed || self.peer_closed.as_ref().is_some_and(|c| c.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Role;

    #[test]
    fn scheduler_pops_events_in_time_order() {
        let mut s = MemoryScheduler::new(Duration::from_secs(10));
        let e = |slot| EndpointHandle { node: 0, role: Role::Driver, slot };
        s.schedule_wake(Duration::from_secs(3), e(0));
        s.schedule_wake(Duration::from_secs(1), e(1));
        s.schedule_wake(Duration::from_secs(2), e(2));
        assert_eq!(s.pop_due(), Some(e(1)));
        assert_eq!(s.now(), Duration::from_secs(1));
        assert_eq!(s.pop_due(), Some(e(2)));
        assert_eq!(s.pop_due(), Some(e(0)));
        assert_eq!(s.pop_due(), None);
    }

    #[test]
    fn scheduler_respects_stop_time() {
        let mut s = MemoryScheduler::new(Duration::from_secs(5));
        let e = EndpointHandle { node: 0, role: Role::Driver, slot: 0 };
        s.schedule_wake(Duration::from_secs(10), e);
        assert_eq!(s.pop_due(), None);
    }

    #[test]
    fn connected_sockets_exchange_byte_counts() {
        let mut factory = MemorySocketFactory::new(1500);
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        let client_addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let mut server = factory.create();
        server.bind(addr).unwrap();
        server.listen(client_addr);

        let mut client = factory.create();
        client.bind(client_addr).unwrap();
        client.connect(addr).unwrap();

        assert_eq!(client.send_buffer_free(), 1500);
        client.send(500);
        assert_eq!(client.send_buffer_free(), 1000);
        assert_eq!(server.recv_available(), 500);
        server.recv(500);
        assert_eq!(server.recv_available(), 0);
        assert_eq!(client.send_buffer_free(), 1500);
    }

    #[test]
    fn connect_without_listener_fails() {
        let mut factory = MemorySocketFactory::new(1500);
        let mut client = factory.create();
        let err = client.connect("127.0.0.1:1".parse().unwrap());
        assert!(err.is_err());
    }

    #[test]
    fn closing_one_side_is_observed_by_the_other() {
        let mut factory = MemorySocketFactory::new(1500);
        let addr: SocketAddr = "127.0.0.1:9002".parse().unwrap();

        let client_addr: SocketAddr = "127.0.0.1:40002".parse().unwrap();
        let mut server = factory.create();
        server.bind(addr).unwrap();
        server.listen(client_addr);

        let mut client = factory.create();
        client.bind(client_addr).unwrap();
        client.connect(addr).unwrap();

        assert!(!server.is_closed());
        client.close();
        assert!(client.is_closed());
        assert!(server.is_closed(), "responder should observe the driver's FIN");
    }
}
