//! Offline trace extractor CLI (spec.md §6 "CLI surface of the example
//! harness"): reads a decoded capture's three tabular streams from a
//! directory and writes a normalized trace file.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use log::info;
use tracereplay::decoder::CaptureStreams;
use tracereplay::{extractor, trace_io};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: extract <capture_streams_dir> <out_trace_path>");
        std::process::exit(2);
    }
    let streams_dir = PathBuf::from(&args[1]);
    let out_path = PathBuf::from(&args[2]);

    let streams = CaptureStreams::load_from_dir(&streams_dir)?;
    info!("loaded {} packet records from {:?}", streams.packets.len(), streams_dir);

    let scripts = extractor::extract(&streams);
    info!("extracted {} connection scripts", scripts.len());

    let out = BufWriter::new(File::create(&out_path)?);
    trace_io::write(out, &scripts)?;
    info!("wrote trace file to {:?}", out_path);

    Ok(())
}
