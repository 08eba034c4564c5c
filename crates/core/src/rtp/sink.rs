//! RTP sender (§4.6, "MultiFramedRTPSink" in the original).
//!
//! Packs frames pulled from an upstream [`FramedSource`] into RTP
//! packets: a 12-byte fixed header, followed by payload bytes,
//! fragmenting a frame across multiple packets when it exceeds the
//! packet budget. [`FramePackingPolicy`] is the generalized
//! `frameCanAppearAfterPacketStart`/marker-bit hook the original gives
//! each codec-specific subclass (grounded in
//! `original_source/liveMedia/MPEGVideoRTPSink.cpp`); the default packs
//! exactly one frame per packet, which is correct for any codec that
//! doesn't specifically opt into sharing packets.
//!
//! The pull loop defers its own continuation through the scheduler
//! (§4.1) instead of recursing synchronously from inside `on_frame` —
//! see the module docs on [`crate::pipeline`] for why a borrowed buffer
//! can't survive that recursion, and why a scheduler hop sidesteps it
//! cleanly instead.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use crate::error::Result;
use crate::groupsock::GroupSocket;
use crate::pipeline::{CloseCallback, FrameCallback, FrameInfo, FramedSource, MediaSink, PresentationTime};
use crate::rtp::header::{self, RtpHeader};
use crate::scheduler::Scheduler;

const DEFAULT_MAX_PACKET_SIZE: usize = 1456;

/// Per-codec hook deciding whether a second frame may share the tail of
/// an already-open packet, and how the marker bit is set on a
/// fragment (§4.6).
pub trait FramePackingPolicy {
    /// `true` if `frame_start` may be appended after an already-buffered
    /// frame in the same packet rather than starting a fresh one.
    fn frame_can_appear_after_packet_start(&self, frame_start: &[u8], num_bytes_in_frame: usize) -> bool {
        let _ = (frame_start, num_bytes_in_frame);
        false
    }

    /// Marker bit for one fragment of a (possibly split) frame.
    /// Default: set on the final fragment only, the common RFC 3551
    /// convention for frame-boundary-signaling codecs.
    fn marker_for_fragment(&self, fragmentation_offset: usize, num_remaining_bytes: usize) -> bool {
        let _ = fragmentation_offset;
        num_remaining_bytes == 0
    }
}

/// One frame, one packet, marker always set — the right default for any
/// codec without its own packing rules.
pub struct SingleFramePerPacket;
impl FramePackingPolicy for SingleFramePerPacket {}

/// Snapshot of per-sink counters since the last RTCP sync point.
/// No RTCP sender-report *construction* here (§11 — out of scope), just
/// the counters a report would be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderReportStats {
    pub packets_sent: u64,
    pub octets_sent: u64,
}

struct Inner {
    socket: GroupSocket,
    dest: SocketAddr,
    header: RtpHeader,
    clock_rate: u32,
    policy: Box<dyn FramePackingPolicy>,
    max_packet_size: usize,
    pending: Vec<u8>,
    source: Option<Box<dyn FramedSource>>,
    on_done: Option<Box<dyn FnOnce()>>,
    packets_sent: u64,
    octets_sent: u64,
    scheduler: Rc<RefCell<Scheduler>>,
}

impl Inner {
    fn payload_capacity(&self) -> usize {
        self.max_packet_size.saturating_sub(header::HEADER_LEN)
    }

    fn send_frame(&mut self, frame: &[u8], presentation_time: PresentationTime) {
        let capacity = self.payload_capacity();
        if capacity == 0 {
            tracing::warn!("rtp sink: max_packet_size too small to carry any payload");
            return;
        }

        self.header
            .set_timestamp(timestamp_ticks(presentation_time, self.clock_rate));

        if !self.pending.is_empty() {
            let can_append = self.policy.frame_can_appear_after_packet_start(frame, frame.len())
                && self.pending.len() + frame.len() <= capacity;
            if !can_append {
                self.flush_pending(true);
            }
        }

        if self.pending.len() + frame.len() <= capacity {
            self.pending.extend_from_slice(frame);
            self.flush_pending(true);
            return;
        }

        let mut offset = 0usize;
        while offset < frame.len() {
            let chunk_len = capacity.min(frame.len() - offset);
            let num_remaining_bytes = frame.len() - offset - chunk_len;
            let marker = self.policy.marker_for_fragment(offset, num_remaining_bytes);
            let chunk_start = offset;
            let chunk_end = offset + chunk_len;
            self.emit_packet_range(chunk_start, chunk_end, frame, marker);
            offset = chunk_end;
        }
    }

    fn emit_packet_range(&mut self, start: usize, end: usize, frame: &[u8], marker: bool) {
        let header = self.header.write(marker);
        let mut packet = Vec::with_capacity(header::HEADER_LEN + (end - start));
        packet.extend_from_slice(&header);
        packet.extend_from_slice(&frame[start..end]);
        self.send_packet(&packet);
    }

    fn flush_pending(&mut self, marker: bool) {
        if self.pending.is_empty() {
            return;
        }
        let header = self.header.write(marker);
        let mut packet = Vec::with_capacity(header::HEADER_LEN + self.pending.len());
        packet.extend_from_slice(&header);
        packet.append(&mut self.pending);
        self.send_packet(&packet);
    }

    fn send_packet(&mut self, packet: &[u8]) {
        match self.socket.send_to(packet, self.dest) {
            Ok(n) => {
                self.packets_sent += 1;
                self.octets_sent += n as u64;
            }
            Err(e) => tracing::warn!(error = %e, "rtp sink: send failed"),
        }
    }
}

fn timestamp_ticks(pt: PresentationTime, clock_rate: u32) -> u64 {
    let secs_ticks = pt.secs.saturating_mul(clock_rate as u64);
    let micros_ticks = (pt.micros as u64 * clock_rate as u64) / 1_000_000;
    secs_ticks.wrapping_add(micros_ticks)
}

/// A [`MediaSink`] that packetizes and sends frames as RTP over a bound
/// [`GroupSocket`] (§3 "RTPSink").
#[derive(Clone)]
pub struct RtpSink {
    inner: Rc<RefCell<Inner>>,
}

impl RtpSink {
    pub fn new(
        scheduler: Rc<RefCell<Scheduler>>,
        socket: GroupSocket,
        dest: SocketAddr,
        payload_type: u8,
        clock_rate: u32,
        policy: Box<dyn FramePackingPolicy>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                socket,
                dest,
                header: RtpHeader::with_random_ssrc(payload_type),
                clock_rate,
                policy,
                max_packet_size: DEFAULT_MAX_PACKET_SIZE,
                pending: Vec::new(),
                source: None,
                on_done: None,
                packets_sent: 0,
                octets_sent: 0,
                scheduler,
            })),
        }
    }

    pub fn set_max_packet_size(&self, size: usize) {
        self.inner.borrow_mut().max_packet_size = size;
    }

    pub fn stats(&self) -> SenderReportStats {
        let inner = self.inner.borrow();
        SenderReportStats {
            packets_sent: inner.packets_sent,
            octets_sent: inner.octets_sent,
        }
    }

    fn request_next_frame(inner: Rc<RefCell<Inner>>) {
        let max_packet_size = {
            let guard = inner.borrow();
            if guard.source.is_none() {
                return;
            }
            guard.max_packet_size
        };
        let buffer = vec![0u8; max_packet_size].into_boxed_slice();

        let for_frame = inner.clone();
        let for_close = inner.clone();
        let on_frame: FrameCallback = Box::new(move |buf, info| {
            Self::on_frame_ready(for_frame, buf, info);
        });
        let on_close: CloseCallback = Box::new(move |_buf| {
            Self::on_source_closed(for_close);
        });

        let result = {
            let mut guard = inner.borrow_mut();
            let source = guard.source.as_mut().expect("checked above");
            source.get_next_frame(buffer, on_frame, on_close)
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "rtp sink: get_next_frame failed");
        }
    }

    fn on_frame_ready(inner: Rc<RefCell<Inner>>, buf: Box<[u8]>, info: FrameInfo) {
        inner
            .borrow_mut()
            .send_frame(&buf[..info.frame_size], info.presentation_time);

        let scheduler = inner.borrow().scheduler.clone();
        let inner_next = inner.clone();
        scheduler
            .borrow_mut()
            .schedule_delayed(Duration::ZERO, move || {
                Self::request_next_frame(inner_next);
            });
    }

    fn on_source_closed(inner: Rc<RefCell<Inner>>) {
        let on_done = inner.borrow_mut().on_done.take();
        inner.borrow_mut().source = None;
        if let Some(done) = on_done {
            done();
        }
    }
}

impl MediaSink for RtpSink {
    fn has_source(&self) -> bool {
        self.inner.borrow().source.is_some()
    }

    fn do_start_playing(
        &mut self,
        source: Box<dyn FramedSource>,
        on_done: Box<dyn FnOnce()>,
    ) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            inner.source = Some(source);
            inner.on_done = Some(on_done);
        }
        Self::request_next_frame(self.inner.clone());
        Ok(())
    }

    fn do_stop_playing(&mut self) -> Option<Box<dyn FramedSource>> {
        let mut inner = self.inner.borrow_mut();
        inner.on_done = None;
        inner.source.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::net::Ipv4Addr;

    /// Delivers a fixed number of frames, then closes. Completes
    /// synchronously, matching the common case for in-memory/test sources.
    struct CountedSource {
        awaiting: Cell<bool>,
        remaining: usize,
        frame: &'static [u8],
    }

    impl FramedSource for CountedSource {
        fn mime_type(&self) -> &str {
            "video"
        }
        fn is_awaiting(&self) -> bool {
            self.awaiting.get()
        }
        fn set_awaiting(&self, v: bool) {
            self.awaiting.set(v);
        }
        fn do_get_next_frame(
            &mut self,
            mut to: Box<[u8]>,
            on_frame: FrameCallback,
            on_close: CloseCallback,
        ) -> Result<()> {
            if self.remaining == 0 {
                self.complete_close(to, on_close);
                return Ok(());
            }
            self.remaining -= 1;
            to[..self.frame.len()].copy_from_slice(self.frame);
            let info = FrameInfo {
                frame_size: self.frame.len(),
                presentation_time: PresentationTime { secs: 1, micros: 0 },
                duration_us: None,
                num_truncated_bytes: 0,
            };
            self.complete_frame(to, info, on_frame);
            Ok(())
        }
        fn close(&mut self) {}
    }

    fn drain(scheduler: &Rc<RefCell<Scheduler>>, ticks: usize) {
        for _ in 0..ticks {
            scheduler.borrow_mut().single_step(Duration::from_millis(1)).unwrap();
        }
    }

    #[test]
    fn fragments_a_frame_larger_than_one_packet() {
        let scheduler = Rc::new(RefCell::new(Scheduler::new().unwrap()));
        let receiver = GroupSocket::bind(Ipv4Addr::LOCALHOST, 0).unwrap();
        let dest = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), receiver.local_port().unwrap());
        let sender_socket = GroupSocket::bind_send_only(Ipv4Addr::LOCALHOST).unwrap();

        let mut sink = RtpSink::new(
            scheduler.clone(),
            sender_socket,
            dest,
            96,
            90_000,
            Box::new(SingleFramePerPacket),
        );
        sink.set_max_packet_size(32);

        let big_frame: &'static [u8] = Box::leak(vec![0xABu8; 50].into_boxed_slice());
        let source = Box::new(CountedSource {
            awaiting: Cell::new(false),
            remaining: 1,
            frame: big_frame,
        });

        sink.start_playing(source, Box::new(|| {})).unwrap();
        drain(&scheduler, 3);

        assert_eq!(sink.stats().packets_sent, 3);
        assert_eq!(sink.stats().octets_sent, 3 * header::HEADER_LEN as u64 + 50);
    }

    #[test]
    fn start_playing_twice_without_stop_is_rejected() {
        let scheduler = Rc::new(RefCell::new(Scheduler::new().unwrap()));
        let socket = GroupSocket::bind_send_only(Ipv4Addr::LOCALHOST).unwrap();
        let dest = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 5004);
        let mut sink = RtpSink::new(scheduler, socket, dest, 96, 90_000, Box::new(SingleFramePerPacket));

        let source_a = Box::new(CountedSource {
            awaiting: Cell::new(false),
            remaining: 0,
            frame: b"",
        });
        let source_b = Box::new(CountedSource {
            awaiting: Cell::new(false),
            remaining: 0,
            frame: b"",
        });
        sink.start_playing(source_a, Box::new(|| {})).unwrap();
        assert!(sink.start_playing(source_b, Box::new(|| {})).is_err());
    }
}
