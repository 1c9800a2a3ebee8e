// src/decoder.rs
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::net::IpAddr;
use std::path::Path;

/// One TCP packet as reported by the external protocol decoder (spec.md
/// §6, stream 2): source/destination four-tuple, payload length, relative
/// capture timestamp, and the frame number used to cross-reference the
/// other two streams.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub tcp_payload_len: u32,
    pub relative_time_seconds: f64,
    pub frame_number: u32,
}

/// The three tabular streams the extractor consumes (spec.md §6 and §9's
/// open question: a re-implementation "should either call a library
/// decoder or accept the three tabular streams directly"). This crate
/// takes the latter route — no external process is invoked and no
/// intermediate filenames are hardcoded.
#[derive(Debug, Clone, Default)]
pub struct CaptureStreams {
    pub http_request_frames: HashSet<u32>,
    pub packets: Vec<PacketRecord>,
    pub timeouts: HashMap<u32, f64>,
}

impl CaptureStreams {
    pub fn is_http_request(&self, frame: u32) -> bool {
        self.http_request_frames.contains(&frame)
    }

    /// Missing/flagged-false if the decoder never reported the frame
    /// (spec.md §7: "decoder-supplied flag stream inconsistent with packet
    /// stream ... treated as flag=false").
    pub fn is_retransmission_timeout(&self, frame: u32) -> bool {
        self.timeouts.contains_key(&frame)
    }

    /// Reference loader: reads the three streams from plain line-oriented
    /// files, matching the shapes the ns-3 original produced via `tshark`
    /// (one frame number per line; tab-separated packet tuples; frame
    /// number + RTO seconds pairs). A host embedding a real decoder would
    /// bypass this and build `CaptureStreams` directly.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let http_path = dir.join("http_requests.txt");
        let packets_path = dir.join("packets.tsv");
        let timeouts_path = dir.join("timeouts.tsv");

        let http_request_frames = read_frame_set(&http_path)
            .with_context(|| format!("reading {:?}", http_path))?;
        let packets = read_packet_records(&packets_path)
            .with_context(|| format!("reading {:?}", packets_path))?;
        let timeouts = read_timeout_map(&timeouts_path)
            .with_context(|| format!("reading {:?}", timeouts_path))?;

        Ok(Self {
            http_request_frames,
            packets,
            timeouts,
        })
    }
}

fn read_frame_set(path: &Path) -> Result<HashSet<u32>> {
    let file = std::fs::File::open(path).context("open")?;
    let mut set = HashSet::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        set.insert(line.parse::<u32>().with_context(|| format!("parsing frame number {line:?}"))?);
    }
    Ok(set)
}

fn read_timeout_map(path: &Path) -> Result<HashMap<u32, f64>> {
    let file = std::fs::File::open(path).context("open")?;
    let mut map = HashMap::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split('\t');
        let frame: u32 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .with_context(|| format!("parsing frame number in {line:?}"))?;
        let rto: f64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .with_context(|| format!("parsing rto seconds in {line:?}"))?;
        map.insert(frame, rto);
    }
    Ok(map)
}

fn read_packet_records(path: &Path) -> Result<Vec<PacketRecord>> {
    let file = std::fs::File::open(path).context("open")?;
    let mut out = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split('\t');
        let src_ip = parse_ip(fields.next().context("missing src_ip")?)?;
        let src_port: u16 = fields.next().context("missing src_port")?.parse()?;
        let dst_ip = parse_ip(fields.next().context("missing dst_ip")?)?;
        let dst_port: u16 = fields.next().context("missing dst_port")?.parse()?;
        let tcp_payload_len: u32 = fields.next().context("missing tcp_payload_len")?.parse()?;
        let relative_time_seconds: f64 = fields.next().context("missing relative_time")?.parse()?;
        let frame_number: u32 = fields.next().context("missing frame_number")?.parse()?;
        out.push(PacketRecord {
            src_ip,
            src_port,
            dst_ip,
            dst_port,
            tcp_payload_len,
            relative_time_seconds,
            frame_number,
        });
    }
    Ok(out)
}

/// IPv4 addresses match `^\d+\.\d+\.\d+\.\d+$`; anything else is parsed as
/// IPv6 (spec.md §6). `Ipv4Addr`'s own `FromStr` already enforces this
/// shape, so we try it first and fall back to `Ipv6Addr`.
pub fn parse_ip(s: &str) -> Result<IpAddr> {
    if let Ok(v4) = s.parse::<std::net::Ipv4Addr>() {
        return Ok(IpAddr::V4(v4));
    }
    let v6 = s
        .parse::<std::net::Ipv6Addr>()
        .with_context(|| format!("{s:?} is neither a valid IPv4 nor IPv6 address"))?;
    Ok(IpAddr::V6(v6))
}
