// src/trace_io.rs
use crate::addr::ConnId;
use crate::decoder::parse_ip;
use crate::error::TraceFileError;
use crate::packet::PacketDescriptor;
use crate::script::ConnectionScript;
use std::fmt::Write as _;
use std::io::{BufRead, Write};
use std::time::Duration;

/// Reads the line-oriented trace file format (spec.md §6) into connection
/// scripts. Blank lines and lines starting with `#` are skipped wherever
/// a data line is expected, matching the original's `CheckRegex` comment
/// convention.
pub fn read<R: BufRead>(reader: R) -> Result<Vec<ConnectionScript>, TraceFileError> {
    let mut lines = DataLines::new(reader);

    let num_connections = lines.next_usize("connection count")?;
    let mut scripts = Vec::with_capacity(num_connections);

    for _ in 0..num_connections {
        let header = lines.next_line("connection header")?;
        let mut fields = header.split('\t');
        let client_ip = parse_field_ip(fields.next(), &header)?;
        let client_port = parse_field(fields.next(), &header, "client_port")?;
        let server_ip = parse_field_ip(fields.next(), &header)?;
        let server_port = parse_field(fields.next(), &header, "server_port")?;
        let start_time: f64 = parse_field(fields.next(), &header, "start_time_sec")?;

        let id = ConnId::new(client_ip, client_port, server_ip, server_port);

        let client_packets = read_packet_block(&mut lines)?;
        let req_counts = read_u32_list(&mut lines, "num_req_bursts")?;
        let exp_bytes_from_server = read_u64_list(&mut lines, "num_rep_bursts")?;

        let server_packets = read_packet_block(&mut lines)?;
        let rep_counts = read_u32_list(&mut lines, "num_rep_bursts")?;
        let exp_bytes_from_client = read_u64_list(&mut lines, "num_req_bursts")?;

        scripts.push(ConnectionScript {
            id,
            start_time: Duration::from_secs_f64(start_time.max(0.0)),
            client_packets,
            server_packets,
            req_counts,
            rep_counts,
            exp_bytes_from_server,
            exp_bytes_from_client,
        });
    }

    Ok(scripts)
}

/// Writes connection scripts in the same layout `read` expects, matching
/// the original's `PrintTraceFile`. Output is byte-for-byte deterministic
/// for a given input: no map iteration, no locale-dependent formatting.
pub fn write<W: Write>(mut writer: W, scripts: &[ConnectionScript]) -> std::io::Result<()> {
    writeln!(writer, "{}", scripts.len())?;
    for script in scripts {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}",
            script.id.client_ip,
            script.id.client_port,
            script.id.server_ip,
            script.id.server_port,
            format_secs(script.start_time)
        )?;
        write_packet_block(&mut writer, &script.client_packets)?;
        write_u32_list(&mut writer, &script.req_counts)?;
        write_u64_list(&mut writer, &script.exp_bytes_from_server)?;
        write_packet_block(&mut writer, &script.server_packets)?;
        write_u32_list(&mut writer, &script.rep_counts)?;
        write_u64_list(&mut writer, &script.exp_bytes_from_client)?;
    }
    Ok(())
}

fn read_packet_block(lines: &mut DataLines<impl BufRead>) -> Result<Vec<PacketDescriptor>, TraceFileError> {
    let count = lines.next_usize("packet count")?;
    let mut packets = Vec::with_capacity(count);
    for _ in 0..count {
        let line = lines.next_line("packet record")?;
        let mut fields = line.split('\t');
        let size: u32 = parse_field(fields.next(), &line, "size")?;
        let delay_sec: f64 = parse_field(fields.next(), &line, "delay_sec")?;
        let delay = Duration::from_secs_f64(delay_sec.max(0.0));
        let mut descriptor = PacketDescriptor::new(size, delay);
        if !delay.is_zero() {
            let num_parallel = lines.next_usize("parallel connection count")?;
            for _ in 0..num_parallel {
                let line = lines.next_line("parallel connection entry")?;
                let mut fields = line.split('\t');
                let peer_client_port = parse_field(fields.next(), &line, "peer_client_port")?;
                let peer_server_port = parse_field(fields.next(), &line, "peer_server_port")?;
                let byte_threshold = parse_field(fields.next(), &line, "byte_threshold")?;
                descriptor.add_parallel_connection(peer_client_port, peer_server_port, byte_threshold);
            }
        }
        packets.push(descriptor);
    }
    Ok(packets)
}

fn write_packet_block<W: Write>(writer: &mut W, packets: &[PacketDescriptor]) -> std::io::Result<()> {
    writeln!(writer, "{}", packets.len())?;
    for p in packets {
        writeln!(writer, "{}\t{}", p.size(), format_secs(p.delay()))?;
        if p.is_delayed() {
            writeln!(writer, "{}", p.num_parallel_connections())?;
            for (peer_client_port, peer_server_port, byte_threshold) in p.parallel_connections() {
                writeln!(writer, "{peer_client_port}\t{peer_server_port}\t{byte_threshold}")?;
            }
        }
    }
    Ok(())
}

fn read_u32_list(lines: &mut DataLines<impl BufRead>, context: &'static str) -> Result<Vec<u32>, TraceFileError> {
    let count = lines.next_usize(context)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(lines.next_usize("burst entry")? as u32);
    }
    Ok(out)
}

fn read_u64_list(lines: &mut DataLines<impl BufRead>, context: &'static str) -> Result<Vec<u64>, TraceFileError> {
    let count = lines.next_usize(context)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let line = lines.next_line("burst byte total")?;
        out.push(parse_field(Some(line.as_str()), &line, "byte total")?);
    }
    Ok(out)
}

fn write_u32_list<W: Write>(writer: &mut W, values: &[u32]) -> std::io::Result<()> {
    writeln!(writer, "{}", values.len())?;
    for v in values {
        writeln!(writer, "{v}")?;
    }
    Ok(())
}

fn write_u64_list<W: Write>(writer: &mut W, values: &[u64]) -> std::io::Result<()> {
    writeln!(writer, "{}", values.len())?;
    for v in values {
        writeln!(writer, "{v}")?;
    }
    Ok(())
}

fn format_secs(d: Duration) -> String {
    let mut s = String::new();
    let _ = write!(s, "{}", d.as_secs_f64());
    s
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, _line: &str, context: &'static str) -> Result<T, TraceFileError> {
    field
        .and_then(|s| s.parse().ok())
        .ok_or(TraceFileError::MalformedRecord { line: 0, context })
}

fn parse_field_ip(field: Option<&str>, _line: &str) -> Result<std::net::IpAddr, TraceFileError> {
    let s = field.ok_or(TraceFileError::MalformedRecord {
        line: 0,
        context: "connection ip",
    })?;
    parse_ip(s).map_err(|_| TraceFileError::MalformedRecord {
        line: 0,
        context: "connection ip",
    })
}

/// A line iterator that skips blank lines and `#`-comments, tracking the
/// physical line number for diagnostics.
struct DataLines<R> {
    reader: R,
    line_no: usize,
}

impl<R: BufRead> DataLines<R> {
    fn new(reader: R) -> Self {
        Self { reader, line_no: 0 }
    }

    fn next_line(&mut self, context: &'static str) -> Result<String, TraceFileError> {
        loop {
            let mut buf = String::new();
            let n = self.reader.read_line(&mut buf)?;
            if n == 0 {
                return Err(TraceFileError::UnexpectedEof { context });
            }
            self.line_no += 1;
            let trimmed = buf.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Ok(trimmed.to_string());
        }
    }

    fn next_usize(&mut self, context: &'static str) -> Result<usize, TraceFileError> {
        let line = self.next_line(context)?;
        line.parse().map_err(|_| TraceFileError::MalformedRecord {
            line: self.line_no,
            context,
        })
    }
}
