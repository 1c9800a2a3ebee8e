//! Demo replay harness (spec.md §6 "CLI surface of the example
//! harness"; SPEC_FULL.md §6 "CLI surface"). Loads a trace file and an
//! engine config, wires one driver/responder pair per connection using
//! the in-memory `sim` reference implementation, and runs the engine to
//! completion.
//!
//! This binary is the "thin example that wires nodes together" spec.md
//! §1 places out of scope for the core: it contains no extraction or
//! replay logic of its own, only assembly and reporting.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use log::{info, warn};
use tracereplay::config::EngineConfig;
use tracereplay::sim::memory::{MemoryScheduler, MemorySocketFactory};
use tracereplay::{trace_io, ReplayEngine};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        eprintln!("usage: replay <trace_path> <client_count> <config_path>");
        std::process::exit(2);
    }
    let trace_path = PathBuf::from(&args[1]);
    let client_count: usize = args[2].parse()?;
    let config_path = PathBuf::from(&args[3]);

    let config = EngineConfig::from_file(&config_path)?;
    let scripts = trace_io::read(BufReader::new(File::open(&trace_path)?))?;
    info!("loaded {} connection scripts from {:?}", scripts.len(), trace_path);

    let distinct_clients: HashSet<_> = scripts.iter().map(|s| s.id.client_ip).collect();
    if distinct_clients.len() > client_count {
        warn!(
            "trace references {} distinct client addresses but client_count is {client_count}; \
             the engine has no notion of simulated node capacity and will replay all of them anyway",
            distinct_clients.len()
        );
    }

    let mut engine = ReplayEngine::load(&scripts, &config);
    let mut scheduler = MemoryScheduler::new(config.stop_time);
    let mut factory = MemorySocketFactory::new(64 * 1024);

    engine.start(&mut scheduler, &mut factory);
    engine.run_to_completion(&mut scheduler, &mut factory);

    if !engine.all_closed() {
        warn!("stop_time elapsed before every endpoint reached CLOSED");
    }

    for (script, (driver, responder)) in scripts.iter().zip(engine.drivers().iter().zip(engine.responders())) {
        println!(
            "{}:{} <-> {}:{}\tdriver_bytes={}\tresponder_bytes={}\tdriver_state={:?}\tresponder_state={:?}",
            script.id.client_ip,
            script.id.client_port,
            script.id.server_ip,
            script.id.server_port,
            driver.total_bytes_seen(),
            responder.total_bytes_seen(),
            driver.state(),
            responder.state(),
        );
    }

    Ok(())
}
