//! RTP receiver (§4.7 "MultiFramedRTPSource").
//!
//! A UDP read handler pulls one datagram at a time into a pooled
//! buffer, parses the fixed header, and inserts the packet into a
//! sequence-ordered reordering window keyed by the wrapping 16-bit RTP
//! sequence number. Payload bytes are handed to the downstream
//! [`FramedSource`] consumer in sequence order — either because the
//! next-expected packet has arrived, or because a per-source reordering
//! deadline has elapsed and the source gives up waiting and skips
//! forward (§4.7).
//!
//! Reception statistics are tracked per SSRC (§3 "RTPSource"), since a
//! single UDP socket may carry packets from more than one sender over
//! its lifetime (SSRC collision, stream restart).

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::groupsock::GroupSocket;
use crate::pipeline::{CloseCallback, FrameCallback, FrameInfo, FramedSource, PresentationTime};
use crate::rtp::header::ParsedHeader;
use crate::scheduler::{ReadReason, Scheduler};

const DEFAULT_PACKET_POOL_CAPACITY: usize = 64;
const DEFAULT_REORDER_TIMEOUT: Duration = Duration::from_millis(100);

/// Wrap-aware ordering of 16-bit RTP sequence numbers (§4.7 "reordering
/// window keyed by 16-bit RTP sequence numbers (wrap-aware)"). Treats
/// two sequence numbers as ordered by whichever is reachable from the
/// other by advancing fewer than half the sequence space — the
/// standard RFC 1982 serial-number comparison.
fn seq_less_than(a: u16, b: u16) -> bool {
    let diff = b.wrapping_sub(a);
    diff != 0 && diff < 0x8000
}

/// Per-SSRC reception statistics (§4.7 "reception-stats DB").
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceptionStats {
    pub ssrc: u32,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub base_sequence: Option<u16>,
    pub highest_sequence: Option<u16>,
    pub min_inter_packet_gap: Option<Duration>,
    pub max_inter_packet_gap: Option<Duration>,
    /// Whether an RTCP sender report for this SSRC has been correlated
    /// with this RTP timestamp stream (§3 "RTPSource": "RTCP-sync
    /// status" is part of the reception-stats DB). Never set by this
    /// module itself — this crate doesn't parse RTCP compound packets,
    /// the same out-of-scope boundary `rtp::sink::SenderReportStats`
    /// draws on the sending side. A caller running a separate RTCP
    /// receiver calls [`note_rtcp_sync`](Self::note_rtcp_sync) once it
    /// has matched a sender report to this SSRC.
    pub rtcp_synced: bool,
    last_arrival: Option<Instant>,
}

impl ReceptionStats {
    /// Record that an RTCP sender report has been correlated with this
    /// SSRC's RTP stream, enabling wall-clock-synced presentation.
    pub fn note_rtcp_sync(&mut self) {
        self.rtcp_synced = true;
    }

    fn note_packet(&mut self, sequence: u16, payload_len: usize, now: Instant) {
        self.packets_received += 1;
        self.bytes_received += payload_len as u64;

        if self.base_sequence.is_none() {
            self.base_sequence = Some(sequence);
        }
        if self.highest_sequence.map_or(true, |hi| seq_less_than(hi, sequence)) {
            self.highest_sequence = Some(sequence);
        }

        if let Some(prev) = self.last_arrival {
            let gap = now.saturating_duration_since(prev);
            self.min_inter_packet_gap = Some(self.min_inter_packet_gap.map_or(gap, |m| m.min(gap)));
            self.max_inter_packet_gap = Some(self.max_inter_packet_gap.map_or(gap, |m| m.max(gap)));
        }
        self.last_arrival = Some(now);
    }

    /// Packets expected since the first one seen, counting any wrap.
    /// `None` until at least one packet has arrived.
    pub fn packets_expected(&self) -> Option<u64> {
        let base = self.base_sequence?;
        let highest = self.highest_sequence?;
        Some(highest.wrapping_sub(base) as u64 + 1)
    }

    pub fn kilobytes_received(&self) -> f64 {
        self.bytes_received as f64 / 1000.0
    }
}

struct PendingPacket {
    payload: Vec<u8>,
    timestamp: u32,
    arrived_at: Instant,
}

/// Reads RTP packets off a bound [`GroupSocket`] and delivers reordered
/// payload bytes through the [`FramedSource`] contract (§3 "RTPSource").
pub struct RtpSource {
    socket: GroupSocket,
    window: BTreeMap<u16, PendingPacket>,
    next_expected: Option<u16>,
    reorder_timeout: Duration,
    stats: BTreeMap<u32, ReceptionStats>,
    current_ssrc: Option<u32>,
    packet_pool_capacity: usize,
    awaiting: Cell<bool>,
    pending_request: Option<(Box<[u8]>, FrameCallback, CloseCallback)>,
    closed: bool,
}

impl RtpSource {
    pub fn new(socket: GroupSocket) -> Self {
        socket.set_nonblocking(true).ok();
        Self {
            socket,
            window: BTreeMap::new(),
            next_expected: None,
            reorder_timeout: DEFAULT_REORDER_TIMEOUT,
            stats: BTreeMap::new(),
            current_ssrc: None,
            packet_pool_capacity: DEFAULT_PACKET_POOL_CAPACITY,
            awaiting: Cell::new(false),
            pending_request: None,
            closed: false,
        }
    }

    pub fn set_reorder_timeout(&mut self, timeout: Duration) {
        self.reorder_timeout = timeout;
    }

    pub fn set_packet_pool_capacity(&mut self, capacity: usize) {
        self.packet_pool_capacity = capacity;
    }

    pub fn stats_for(&self, ssrc: u32) -> Option<&ReceptionStats> {
        self.stats.get(&ssrc)
    }

    /// Install this source's socket on `scheduler`, so readiness
    /// notifications drive [`Self::on_socket_readable`]. `source` must
    /// be the same `Rc<RefCell<_>>`-style shared handle the caller holds
    /// elsewhere, since the scheduler's handler closure needs its own
    /// reference into the source (§4.1, §4.7 "UDP read handler").
    pub fn register_with(
        this: Rc<std::cell::RefCell<Self>>,
        scheduler: &mut Scheduler,
    ) -> Result<()> {
        let fd = this.borrow().socket.as_raw_fd();
        let handle = this.clone();
        scheduler.turn_on_read(fd, move |reason: ReadReason| {
            if reason == ReadReason::SocketReadable {
                handle.borrow_mut().on_socket_readable();
            }
        })?;
        Ok(())
    }

    /// Drain one datagram, classify it, and attempt to satisfy any
    /// outstanding `get_next_frame` request (§4.7).
    pub fn on_socket_readable(&mut self) {
        let mut scratch = [0u8; 65_507];
        loop {
            match self.socket.recv(&mut scratch) {
                Ok((n, _from)) => self.accept_packet(&scratch[..n]),
                Err(_) => break,
            }
        }
        self.try_deliver();
    }

    fn accept_packet(&mut self, packet: &[u8]) {
        let Some(header) = ParsedHeader::parse(packet) else {
            tracing::debug!("rtp source: dropped malformed packet");
            return;
        };
        let payload = packet[header.payload_offset..].to_vec();
        let now = Instant::now();

        self.stats
            .entry(header.ssrc)
            .or_insert_with(|| ReceptionStats {
                ssrc: header.ssrc,
                ..Default::default()
            })
            .note_packet(header.sequence, payload.len(), now);
        self.current_ssrc = Some(header.ssrc);

        if self.next_expected.is_none() {
            self.next_expected = Some(header.sequence);
        }
        if self.window.len() >= self.packet_pool_capacity {
            tracing::warn!("rtp source: packet pool exhausted, dropping oldest pending packet");
            if let Some((&oldest, _)) = self.window.iter().next() {
                self.window.remove(&oldest);
            }
        }
        self.window.insert(
            header.sequence,
            PendingPacket {
                payload,
                timestamp: header.timestamp,
                arrived_at: now,
            },
        );
    }

    /// Pop the next in-order packet if it's ready, skipping past a gap
    /// once it has aged past [`Self::reorder_timeout`] (§4.7).
    fn pop_ready(&mut self) -> Option<PendingPacket> {
        let expected = self.next_expected?;
        if let Some(pkt) = self.window.remove(&expected) {
            self.next_expected = Some(expected.wrapping_add(1));
            return Some(pkt);
        }

        let oldest_arrival = self.window.values().map(|p| p.arrived_at).min()?;
        if oldest_arrival.elapsed() < self.reorder_timeout {
            return None;
        }

        let next_seq = *self.window.keys().next()?;
        let pkt = self.window.remove(&next_seq)?;
        self.next_expected = Some(next_seq.wrapping_add(1));
        Some(pkt)
    }

    fn try_deliver(&mut self) {
        if self.pending_request.is_none() {
            return;
        }
        let Some(pkt) = self.pop_ready() else {
            return;
        };
        let (mut buf, on_frame, on_close) = self.pending_request.take().expect("checked above");

        let n = pkt.payload.len().min(buf.len());
        buf[..n].copy_from_slice(&pkt.payload[..n]);
        let info = FrameInfo {
            frame_size: n,
            presentation_time: timestamp_to_presentation_time(pkt.timestamp),
            duration_us: None,
            num_truncated_bytes: pkt.payload.len() - n,
        };
        self.complete_frame(buf, info, on_frame);
        let _ = on_close;
    }
}

/// Converts an RTP 32-bit timestamp to a presentation time assuming a
/// 1 Hz clock rate placeholder — real clock-rate-aware conversion
/// belongs to the subsession that knows the codec's declared rate
/// (§4.7 only extracts the raw timestamp; SDP supplies the rate).
fn timestamp_to_presentation_time(timestamp: u32) -> PresentationTime {
    PresentationTime {
        secs: timestamp as u64,
        micros: 0,
    }
}

impl FramedSource for RtpSource {
    fn mime_type(&self) -> &str {
        "application/rtp"
    }

    fn is_awaiting(&self) -> bool {
        self.awaiting.get()
    }

    fn set_awaiting(&self, awaiting: bool) {
        self.awaiting.set(awaiting);
    }

    fn do_get_next_frame(
        &mut self,
        to: Box<[u8]>,
        on_frame: FrameCallback,
        on_close: CloseCallback,
    ) -> Result<()> {
        if self.closed {
            self.complete_close(to, on_close);
            return Ok(());
        }
        self.pending_request = Some((to, on_frame, on_close));
        self.try_deliver();
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        if let Some((buf, _on_frame, on_close)) = self.pending_request.take() {
            self.complete_close(buf, on_close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::net::Ipv4Addr;

    fn header_bytes(sequence: u16, timestamp: u32, ssrc: u32, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; 12];
        packet[0] = 2 << 6;
        packet[1] = 96;
        packet[2..4].copy_from_slice(&sequence.to_be_bytes());
        packet[4..8].copy_from_slice(&timestamp.to_be_bytes());
        packet[8..12].copy_from_slice(&ssrc.to_be_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn seq_less_than_handles_wraparound() {
        assert!(seq_less_than(65534, 2));
        assert!(seq_less_than(5, 10));
        assert!(!seq_less_than(10, 5));
    }

    #[test]
    fn delivers_in_order_packets_immediately() {
        let socket = GroupSocket::bind(Ipv4Addr::LOCALHOST, 0).unwrap();
        let sender = GroupSocket::bind_send_only(Ipv4Addr::LOCALHOST).unwrap();
        let dest = std::net::SocketAddr::new(Ipv4Addr::LOCALHOST.into(), socket.local_port().unwrap());

        sender.send_to(&header_bytes(0, 1000, 0xAAAA, b"hello"), dest).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        let mut source = RtpSource::new(socket);
        source.on_socket_readable();

        let delivered = Rc::new(RefCell::new(None));
        let d = delivered.clone();
        source
            .get_next_frame(
                vec![0u8; 16].into_boxed_slice(),
                Box::new(move |buf, info| { d.borrow_mut().replace((buf, info)); }),
                Box::new(|_| {}),
            )
            .unwrap();

        let (buf, info) = delivered.borrow_mut().take().unwrap();
        assert_eq!(&buf[..info.frame_size], b"hello");
        assert_eq!(source.stats_for(0xAAAA).unwrap().packets_received, 1);
    }

    #[test]
    fn waits_for_a_missing_packet_then_delivers_in_order() {
        let socket = GroupSocket::bind(Ipv4Addr::LOCALHOST, 0).unwrap();
        let mut source = RtpSource::new(socket);

        // Packet 1 arrives before packet 0: must not deliver until 0
        // shows up (or the reorder timeout elapses).
        source.accept_packet(&header_bytes(1, 2000, 1, b"second"));

        let delivered = Rc::new(RefCell::new(Vec::new()));
        let d = delivered.clone();
        source
            .get_next_frame(
                vec![0u8; 16].into_boxed_slice(),
                Box::new(move |buf, info| d.borrow_mut().push((buf[..info.frame_size].to_vec(), info)),),
                Box::new(|_| {}),
            )
            .unwrap();
        source.try_deliver();
        assert!(delivered.borrow().is_empty(), "must not skip ahead of sequence 0");

        source.accept_packet(&header_bytes(0, 1000, 1, b"first"));
        source.try_deliver();
        let got = delivered.borrow();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, b"first");
    }

    #[test]
    fn reception_stats_track_min_max_gap_and_expected_count() {
        let mut stats = ReceptionStats::default();
        let t0 = Instant::now();
        stats.note_packet(10, 100, t0);
        stats.note_packet(11, 100, t0 + Duration::from_millis(20));
        stats.note_packet(13, 100, t0 + Duration::from_millis(50));

        assert_eq!(stats.packets_received, 3);
        assert_eq!(stats.packets_expected(), Some(4));
        assert_eq!(stats.min_inter_packet_gap, Some(Duration::from_millis(20)));
        assert_eq!(stats.max_inter_packet_gap, Some(Duration::from_millis(30)));
    }

    #[test]
    fn rtcp_sync_defaults_false_and_is_set_explicitly() {
        let mut stats = ReceptionStats::default();
        assert!(!stats.rtcp_synced);
        stats.note_rtcp_sync();
        assert!(stats.rtcp_synced);
    }

    #[test]
    fn close_fires_on_close_for_any_outstanding_request() {
        let socket = GroupSocket::bind(Ipv4Addr::LOCALHOST, 0).unwrap();
        let mut source = RtpSource::new(socket);
        let closed = Rc::new(RefCell::new(false));
        let c = closed.clone();
        source
            .get_next_frame(
                vec![0u8; 4].into_boxed_slice(),
                Box::new(|_, _| {}),
                Box::new(move |_| *c.borrow_mut() = true),
            )
            .unwrap();
        source.close();
        assert!(*closed.borrow());
    }
}
