//! Crate-level integration tests: extractor -> trace file round-trip ->
//! replay engine against the in-memory `sim` reference implementation
//! (spec.md §8 "Testable properties").

use std::io::Cursor;
use std::time::Duration;

use tracereplay::config::EngineConfig;
use tracereplay::decoder::{CaptureStreams, PacketRecord};
use tracereplay::sim::memory::{MemoryScheduler, MemorySocketFactory};
use tracereplay::{extractor, trace_io, ReplayEngine};

fn rec(src_ip: &str, src_port: u16, dst_ip: &str, dst_port: u16, len: u32, t: f64, frame: u32) -> PacketRecord {
    PacketRecord {
        src_ip: src_ip.parse().unwrap(),
        src_port,
        dst_ip: dst_ip.parse().unwrap(),
        dst_port,
        tcp_payload_len: len,
        relative_time_seconds: t,
        frame_number: frame,
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        data_rate: 10_000_000,
        stop_time: Duration::from_secs(30),
        start_time_offset: Duration::ZERO,
        start_port: 50000,
        jitter_seed: 99,
    }
}

/// End-to-end: a captured two-connection trace with an HTTP think-time
/// gap on one flow survives extraction, a write/read round trip through
/// the trace file format, and a full replay against the in-memory
/// simulator, with byte accounting matching what was captured.
#[test]
fn extract_persist_and_replay_round_trip() {
    let streams = CaptureStreams {
        http_request_frames: [1, 3].into_iter().collect(),
        packets: vec![
            rec("10.0.0.1", 100, "10.0.0.2", 80, 50, 0.0, 1),
            rec("10.0.0.2", 80, "10.0.0.1", 100, 1000, 0.1, 2),
            rec("10.0.0.1", 100, "10.0.0.2", 80, 50, 5.2, 3),
            rec("10.0.0.2", 80, "10.0.0.1", 100, 2000, 5.3, 4),
        ],
        ..Default::default()
    };

    let scripts = extractor::extract(&streams);
    assert_eq!(scripts.len(), 1);

    let mut buf = Vec::new();
    trace_io::write(&mut buf, &scripts).unwrap();
    let reloaded = trace_io::read(Cursor::new(buf)).unwrap();
    assert_eq!(reloaded.len(), scripts.len());
    assert_eq!(reloaded[0].id, scripts[0].id);

    let config = config();
    let mut engine = ReplayEngine::load(&reloaded, &config);
    let mut scheduler = MemoryScheduler::new(config.stop_time);
    let mut factory = MemorySocketFactory::new(64 * 1024);

    engine.start(&mut scheduler, &mut factory);
    engine.run_to_completion(&mut scheduler, &mut factory);

    assert!(engine.all_closed(), "replay should finish well within stop_time");
    let expected_driver_bytes: u64 = 50 + 50 + 1000 + 2000;
    assert_eq!(engine.drivers()[0].total_bytes_seen(), expected_driver_bytes);
    assert_eq!(engine.responders()[0].total_bytes_seen(), expected_driver_bytes);
}

/// Two parallel connections between the same client and server IPs:
/// the second connection's delayed packet carries a snapshot of the
/// first's progress, and the replay only lands that send once the
/// first connection has made the recorded progress (spec.md §8 scenario
/// 5, run through the live engine rather than just the extractor).
#[test]
fn parallel_connection_snapshot_gates_replay() {
    let streams = CaptureStreams {
        packets: vec![
            rec("10.0.0.1", 100, "10.0.0.2", 80, 500, 0.0, 1),
            rec("10.0.0.1", 101, "10.0.0.2", 80, 200, 0.05, 2),
            rec("10.0.0.1", 100, "10.0.0.2", 80, 30, 5.0, 3),
        ],
        ..Default::default()
    };
    let scripts = extractor::extract(&streams);
    assert_eq!(scripts.len(), 2);

    let a = scripts.iter().find(|s| s.id.client_port == 100).unwrap();
    assert_eq!(a.client_packets.last().unwrap().byte_threshold_for(101, 80), 200);

    let config = config();
    let mut engine = ReplayEngine::load(&scripts, &config);
    let mut scheduler = MemoryScheduler::new(config.stop_time);
    let mut factory = MemorySocketFactory::new(64 * 1024);

    engine.start(&mut scheduler, &mut factory);
    engine.run_to_completion(&mut scheduler, &mut factory);

    assert!(engine.all_closed());
    let a_driver = engine
        .drivers()
        .iter()
        .find(|d| d.id().client_port == 100)
        .expect("driver for connection A");
    assert_eq!(a_driver.total_bytes_seen(), 500 + 30);
}

/// A client with no parallel connections at all still replays cleanly;
/// the empty-siblings path in `EndpointCore::blocking_sibling` never
/// blocks on an absent peer (spec.md §4.3 "empty-script convention").
#[test]
fn single_byte_connection_terminates_cleanly() {
    let streams = CaptureStreams {
        packets: vec![rec("10.0.0.1", 100, "10.0.0.2", 80, 1, 0.0, 1)],
        ..Default::default()
    };
    let scripts = extractor::extract(&streams);
    let config = config();
    let mut engine = ReplayEngine::load(&scripts, &config);
    let mut scheduler = MemoryScheduler::new(config.stop_time);
    let mut factory = MemorySocketFactory::new(64 * 1024);

    engine.start(&mut scheduler, &mut factory);
    engine.run_to_completion(&mut scheduler, &mut factory);

    assert!(engine.all_closed());
    assert_eq!(engine.drivers()[0].total_bytes_seen(), 1);
    assert_eq!(engine.responders()[0].total_bytes_seen(), 1);
}
