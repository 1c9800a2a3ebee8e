// src/error.rs
use thiserror::Error;

/// Errors surfaced while reading or writing the trace file format (§6).
#[derive(Debug, Error)]
pub enum TraceFileError {
    #[error("I/O error reading trace data: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed trace record at line {line}: expected {context}")]
    MalformedRecord { line: usize, context: &'static str },

    #[error("trace file ended unexpectedly while reading {context}")]
    UnexpectedEof { context: &'static str },
}

/// Runtime errors confined to a single endpoint (§7: "runtime errors are
/// confined to a single endpoint and surfaced via the simulator's logging
/// facility" — callers generally log these rather than propagate them).
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("connect failed for connection on port {client_port}")]
    ConnectFailed { client_port: u16 },

    #[error("sibling progress stalled waiting on port {peer_client_port}:{peer_server_port}")]
    Stalled {
        peer_client_port: u16,
        peer_server_port: u16,
    },
}
