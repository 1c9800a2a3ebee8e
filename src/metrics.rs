// src/metrics.rs
use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// The process-wide registry. A host embedding this crate scrapes this
/// directly; the crate itself never starts an HTTP exporter.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

static EXTRACTOR_CONNECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "extractor_connections_total",
        "Connections emitted by the trace extractor",
    )
    .expect("extractor_connections_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static EXTRACTOR_PACKETS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "extractor_packets_total",
        "Packets classified by the trace extractor",
    )
    .expect("extractor_packets_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static ENGINE_PACKETS_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("engine_packets_sent_total", "Packets sent by the replay engine"),
        &["role"],
    )
    .expect("engine_packets_sent_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static ENGINE_PACKETS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "engine_packets_received_total",
            "Packets received by the replay engine",
        ),
        &["role"],
    )
    .expect("engine_packets_received_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static ENGINE_GATING_BACKOFFS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "engine_gating_backoffs_total",
        "Busy-wait polls performed while waiting on a sibling connection's byte threshold",
    )
    .expect("engine_gating_backoffs_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static ENGINE_STALLS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "engine_stalls_total",
        "Sibling-progress waits that never resolved before the endpoint gave up",
    )
    .expect("engine_stalls_total");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn inc_extractor_connections(n: u64) {
    EXTRACTOR_CONNECTIONS.inc_by(n);
}

pub fn inc_extractor_packets() {
    EXTRACTOR_PACKETS.inc();
}

pub fn inc_engine_packets_sent(role: &str) {
    ENGINE_PACKETS_SENT.with_label_values(&[role]).inc();
}

pub fn inc_engine_packets_received(role: &str) {
    ENGINE_PACKETS_RECEIVED.with_label_values(&[role]).inc();
}

pub fn inc_engine_gating_backoff() {
    ENGINE_GATING_BACKOFFS.inc();
}

pub fn inc_engine_stall() {
    ENGINE_STALLS.inc();
}
