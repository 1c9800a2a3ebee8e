// src/extractor.rs
use crate::addr::ConnId;
use crate::decoder::CaptureStreams;
use crate::metrics;
use crate::packet::PacketDescriptor;
use crate::script::ConnectionScript;
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-connection bookkeeping maintained while walking the packet stream
/// (spec.md §4.1 step 3). Mirrors the ns-3 original's `m_connInfo`.
struct ConnState {
    start_time: Duration,
    /// true while the open burst is client->server.
    packet_c2s: bool,
    burst_packet_count: u32,
    burst_byte_count: u64,
    last_time: Duration,
    total_bytes: u64,

    client_packets: Vec<PacketDescriptor>,
    server_packets: Vec<PacketDescriptor>,
    req_counts: Vec<u32>,
    rep_counts: Vec<u32>,
    /// Byte totals of the server's own bursts, in the order those bursts
    /// closed — this is what a driver waits to receive (spec.md §4.4's
    /// `exp_bytes_from_server` recv threshold), not a client-side count.
    exp_bytes_from_server: Vec<u64>,
    /// Byte totals of the client's own bursts, in the order those bursts
    /// closed — what a responder waits to receive.
    exp_bytes_from_client: Vec<u64>,
}

impl ConnState {
    fn new(start_time: Duration) -> Self {
        Self {
            start_time,
            packet_c2s: true,
            burst_packet_count: 0,
            burst_byte_count: 0,
            last_time: start_time,
            total_bytes: 0,
            client_packets: Vec::new(),
            server_packets: Vec::new(),
            req_counts: Vec::new(),
            rep_counts: Vec::new(),
            exp_bytes_from_server: Vec::new(),
            exp_bytes_from_client: Vec::new(),
        }
    }

    fn flush_final_burst(&mut self) {
        if self.total_bytes == 0 {
            return;
        }
        if self.packet_c2s {
            self.req_counts.push(self.burst_packet_count);
            self.exp_bytes_from_client.push(self.burst_byte_count);
        } else {
            self.rep_counts.push(self.burst_packet_count);
            self.exp_bytes_from_server.push(self.burst_byte_count);
        }
    }
}

/// One pass over a capture's tabular streams, producing a deterministic
/// script for every TCP connection observed (spec.md §4.1).
pub fn extract(streams: &CaptureStreams) -> Vec<ConnectionScript> {
    // BTreeMap gives deterministic iteration order for PrintTraceFile
    // parity with a stable connection ordering (ordering matches ConnId's
    // Ord, i.e. the original's m_connId::operator<).
    let mut conns: BTreeMap<ConnId, ConnState> = BTreeMap::new();

    for record in &streams.packets {
        let candidate = ConnId::new(record.src_ip, record.src_port, record.dst_ip, record.dst_port);
        let reversed = candidate.reversed();

        // Step 1: the first packet of a four-tuple defines the client
        // direction; a later packet matching the reversed tuple belongs
        // to the same connection, seen from the server side. The
        // connection's start_time/last_time baseline is seeded from this
        // first packet regardless of payload size — including a
        // zero-payload SYN — matching trace-replay-helper.cc:372-388.
        let (id, client_packet) = if conns.contains_key(&candidate) {
            (candidate, true)
        } else if conns.contains_key(&reversed) {
            (reversed, false)
        } else {
            conns.insert(candidate, ConnState::new(Duration::from_secs_f64(record.relative_time_seconds)));
            (candidate, true)
        };

        if record.tcp_payload_len == 0 {
            // Step 2: zero-payload packets are dropped from burst/delay/
            // byte accounting, but only after they've had a chance to seed
            // the connection above.
            continue;
        }

        process_packet(&mut conns, id, client_packet, record.tcp_payload_len, record.relative_time_seconds, streams.is_http_request(record.frame_number), streams.is_retransmission_timeout(record.frame_number));
    }

    for state in conns.values_mut() {
        // Step 6: flush the final open burst on each connection.
        state.flush_final_burst();
    }

    metrics::inc_extractor_connections(conns.len() as u64);

    conns
        .into_iter()
        .map(|(id, state)| ConnectionScript {
            id,
            start_time: state.start_time,
            client_packets: state.client_packets,
            server_packets: state.server_packets,
            req_counts: state.req_counts,
            rep_counts: state.rep_counts,
            exp_bytes_from_server: state.exp_bytes_from_server,
            exp_bytes_from_client: state.exp_bytes_from_client,
        })
        .collect()
}

fn process_packet(
    conns: &mut BTreeMap<ConnId, ConnState>,
    id: ConnId,
    client_packet: bool,
    packet_size: u32,
    packet_time: f64,
    is_http_request: bool,
    is_retransmission_timeout: bool,
) {
    let packet_time_dur = Duration::from_secs_f64(packet_time.max(0.0));

    // Step 3: walk packets in arrival order, flushing the closed burst on
    // a direction change.
    {
        let state = conns.get_mut(&id).expect("connection must exist before processing a packet");
        if client_packet == state.packet_c2s {
            state.burst_packet_count += 1;
            state.burst_byte_count += packet_size as u64;
        } else {
            if state.packet_c2s {
                state.req_counts.push(state.burst_packet_count);
                state.exp_bytes_from_client.push(state.burst_byte_count);
            } else {
                state.rep_counts.push(state.burst_packet_count);
                state.exp_bytes_from_server.push(state.burst_byte_count);
            }
            state.packet_c2s = client_packet;
            state.burst_packet_count = 1;
            state.burst_byte_count = packet_size as u64;
        }
    }

    // Step 4: compute the packet's delay.
    let gap = {
        let state = &conns[&id];
        packet_time_dur.saturating_sub(state.last_time).as_secs_f64()
    };
    let delay = calculate_delay(is_retransmission_timeout, is_http_request, gap);

    let mut descriptor = PacketDescriptor::new(packet_size, Duration::from_secs_f64(delay));

    // Step 5: snapshot parallel connections for delayed packets.
    if delay > 0.0 {
        for (other_id, other_state) in conns.iter() {
            if id.is_parallel_to(other_id) && other_state.total_bytes > 0 {
                descriptor.add_parallel_connection(other_id.client_port, other_id.server_port, other_state.total_bytes);
            }
        }
    }

    let state = conns.get_mut(&id).expect("connection must exist before processing a packet");
    if client_packet {
        state.client_packets.push(descriptor);
    } else {
        state.server_packets.push(descriptor);
    }
    state.last_time = packet_time_dur;
    state.total_bytes += packet_size as u64;
    metrics::inc_extractor_packets();
}

/// spec.md §4.1 step 4.
fn calculate_delay(is_retransmission_timeout: bool, is_http_request: bool, gap: f64) -> f64 {
    if is_retransmission_timeout {
        return 0.0;
    }
    let http_component = if is_http_request { gap } else { 0.0 };
    let ssh_component = if gap > 1.0 { gap } else { 0.0 };
    let delay = http_component.max(ssh_component);
    if delay < 1e-6 {
        0.0
    } else {
        delay
    }
}
