// src/addr.rs
use std::net::IpAddr;

/// Four-tuple identity of a captured TCP connection.
///
/// Ordering is lexicographic over (client ip, client port, server ip,
/// server port), matching the connection map key used by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId {
    pub client_ip: IpAddr,
    pub client_port: u16,
    pub server_ip: IpAddr,
    pub server_port: u16,
}

impl ConnId {
    pub fn new(client_ip: IpAddr, client_port: u16, server_ip: IpAddr, server_port: u16) -> Self {
        Self {
            client_ip,
            client_port,
            server_ip,
            server_port,
        }
    }

    /// The same connection observed from the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            client_ip: self.server_ip,
            client_port: self.server_port,
            server_ip: self.client_ip,
            server_port: self.client_port,
        }
    }

    /// True if `other` is a distinct connection between the same client and
    /// server IPs (the extractor's definition of "parallel connection",
    /// spec.md §9 — same client+server IP, different ports).
    pub fn is_parallel_to(&self, other: &ConnId) -> bool {
        self.client_ip == other.client_ip
            && self.server_ip == other.server_ip
            && (self.client_port != other.client_port || self.server_port != other.server_port)
    }
}
