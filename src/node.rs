// src/node.rs
use crate::addr::ConnId;
use slab::Slab;
use std::cell::Cell;
use std::net::IpAddr;
use std::rc::Rc;

/// A simulated node hosting a set of replay endpoints that gate sends on
/// each other's progress (spec.md §4.3 "Sibling discovery", §9 "Sibling
/// back-references": "an arena-or-index design ... eliminates lifetime
/// concerns without changing semantics").
///
/// spec.md §9 notes the source defines "parallel connection" two ways:
/// the extractor's (same client+server IP, different ports — used when
/// *computing* a snapshot, see [`crate::addr::ConnId::is_parallel_to`])
/// and the responder's (same server address only, because a responder
/// doesn't know its peer's client IP at bind time). This registry applies
/// the server-address-only rule uniformly to both driver and responder
/// sibling discovery: the lookup that consumes it (`EndpointCore::
/// blocking_sibling`) is keyed on `(client_port, server_port)`, so an
/// unrelated sibling an over-broad filter admits simply never matches a
/// snapshot entry.
#[derive(Default)]
pub struct Node {
    entries: Slab<SiblingEntry>,
}

struct SiblingEntry {
    id: ConnId,
    total_bytes_seen: Rc<Cell<u64>>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint's shared byte counter for later sibling
    /// lookups, returning its slab key. Call once per driver/responder at
    /// load time.
    pub fn register(&mut self, id: ConnId, total_bytes_seen: Rc<Cell<u64>>) -> usize {
        self.entries.insert(SiblingEntry { id, total_bytes_seen })
    }

    /// Other endpoints on this node whose server address matches
    /// `server_ip`, excluding `exclude` itself.
    pub fn siblings_with_server(&self, server_ip: IpAddr, exclude: ConnId) -> Vec<(u16, u16, Rc<Cell<u64>>)> {
        self.entries
            .iter()
            .map(|(_, e)| e)
            .filter(|e| e.id.server_ip == server_ip && e.id != exclude)
            .map(|e| (e.id.client_port, e.id.server_port, e.total_bytes_seen.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn conn(client_port: u16, server_ip: u8) -> ConnId {
        ConnId::new(
            Ipv4Addr::new(10, 0, 0, 1).into(),
            client_port,
            Ipv4Addr::new(10, 0, 0, server_ip).into(),
            80,
        )
    }

    #[test]
    fn siblings_share_server_address_excluding_self() {
        let mut node = Node::new();
        let a = conn(100, 2);
        let b = conn(101, 2);
        let c = conn(102, 3); // different server, not a sibling of a/b

        node.register(a, Rc::new(Cell::new(10)));
        node.register(b, Rc::new(Cell::new(20)));
        node.register(c, Rc::new(Cell::new(30)));

        let siblings = node.siblings_with_server(a.server_ip, a);
        assert_eq!(siblings.len(), 1);
        assert_eq!((siblings[0].0, siblings[0].1), (101, 80));
        assert_eq!(siblings[0].2.get(), 20);
    }

    #[test]
    fn empty_node_has_no_siblings() {
        let node = Node::new();
        assert!(node.siblings_with_server(Ipv4Addr::new(10, 0, 0, 2).into(), conn(100, 2)).is_empty());
    }
}
