//! Replays captured TCP conversations as synthetic traffic inside a
//! discrete-event network simulator.
//!
//! Three components, leaves first (spec.md §2): [`packet`] holds the
//! immutable per-packet descriptor, [`extractor`] turns a decoded
//! capture into a deterministic [`script::ConnectionScript`] per
//! connection, and [`driver`]/[`responder`] replay those scripts as a
//! pair of cooperating endpoints against a host simulator's [`sim`]
//! trait boundary.
//!
//! This crate does not implement a simulator: the event queue, virtual
//! clock, and real TCP/IP stack are a host's responsibility, expressed
//! here only as the `sim::{Clock, Scheduler, Socket, SocketFactory}`
//! traits. [`sim::memory`] is a minimal in-process reference
//! implementation used by this crate's own tests and the `replay` demo
//! binary.

pub mod addr;
pub mod burst;
pub mod config;
pub mod decoder;
pub mod driver;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod metrics;
pub mod node;
pub mod packet;
pub mod responder;
pub mod script;
pub mod sim;
pub mod trace_io;
pub mod util;

pub use addr::ConnId;
pub use config::EngineConfig;
pub use driver::Driver;
pub use engine::ReplayEngine;
pub use packet::PacketDescriptor;
pub use responder::Responder;
pub use script::ConnectionScript;
