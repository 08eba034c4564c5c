//! Framed media pipeline: sources, filters, and sinks (§4.4).
//!
//! The original `FramedSource::getNextFrame` takes a destination buffer
//! *pointer* owned by the caller and a pair of C function-pointer/client-data
//! callbacks, trusting that the buffer stays alive (the caller never frees
//! it while a request is outstanding) because everything runs on one
//! thread with no aliasing checks. A borrowed `&mut [u8]` can't make the
//! same promise to the *borrow checker*: if a source defers completion to
//! a later scheduler tick (the common case — this is why the pipeline
//! exists), the reference would have to outlive the call that created it,
//! which Rust rejects outright.
//!
//! So the buffer is passed *by value* instead: [`get_next_frame`](FramedSource::get_next_frame)
//! takes ownership of a `Box<[u8]>`, and whichever completion callback
//! fires gets it back as an argument. This is the same ownership-transfer
//! shape completion-based I/O APIs use elsewhere in the ecosystem (io_uring
//! wrappers, for instance) — the buffer is "checked out" to the in-flight
//! request and "checked back in" through the callback, so there's always
//! exactly one owner and never a dangling reference.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::{EngineError, Result};

/// Presentation timestamp as whole seconds plus a microsecond remainder,
/// matching the original's `struct timeval`-shaped frame metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentationTime {
    pub secs: u64,
    pub micros: u32,
}

/// Output parameters delivered to `on_frame` after a successful
/// `get_next_frame` (§4.4 step 2a).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_size: usize,
    pub presentation_time: PresentationTime,
    pub duration_us: Option<u32>,
    /// Bytes the source had to discard because the caller's buffer was
    /// smaller than the frame (§4.4; the original's `numTruncatedBytes`).
    pub num_truncated_bytes: usize,
}

/// Fired on successful completion. Carries the buffer back so the caller
/// can read `buf[..frame.frame_size]` and reuse the allocation for the
/// next request.
pub type FrameCallback = Box<dyn FnOnce(Box<[u8]>, FrameInfo)>;
/// Fired on end-of-stream. Still returns the buffer — it was never
/// written to, but ownership round-trips the same way either way.
pub type CloseCallback = Box<dyn FnOnce(Box<[u8]>)>;

/// A lazy sequence of frames (§3 "FramedSource").
///
/// Implementors provide [`do_get_next_frame`](Self::do_get_next_frame);
/// callers use [`get_next_frame`](Self::get_next_frame), which enforces
/// the one-outstanding-request invariant before delegating. A frame may
/// complete synchronously (within `do_get_next_frame` itself) or later —
/// from a scheduler read-readiness handler or a delayed task — but
/// either way the *first* thing that happens on completion must be a
/// call to [`complete_frame`](Self::complete_frame) or
/// [`complete_close`](Self::complete_close), never a direct call to the
/// stored callback, so the in-flight flag is always cleared before the
/// consumer's callback can reentrantly call `get_next_frame` again
/// (§4.4 step 4). A consumer that wants to immediately re-pull from
/// within its own `on_frame` should prefer scheduling that re-pull
/// through the event loop (§4.1) rather than calling back in directly —
/// deep synchronous recursion through a long pipeline is exactly what
/// the scheduler's delay queue exists to cut short.
pub trait FramedSource {
    /// RTSP/SDP media type string, e.g. `"video"`, `"audio"`.
    fn mime_type(&self) -> &str;

    /// A hint for how large a single frame from this source can be, or
    /// `0` if the source has no fixed bound. [`crate::parser::StreamParser`]
    /// uses this to decide how many bytes to request on a refill.
    fn max_frame_size(&self) -> usize {
        0
    }

    fn is_awaiting(&self) -> bool;

    /// Interior-mutability setter so the flag can be cleared from inside
    /// a boxed completion closure that only holds `&self`-shaped access
    /// (concrete sources back this with a `Cell<bool>`).
    fn set_awaiting(&self, awaiting: bool);

    /// Begin producing the next frame into `to`. Must call
    /// [`complete_frame`](Self::complete_frame) or
    /// [`complete_close`](Self::complete_close) — synchronously or from
    /// a later scheduler callback — exactly once per call, handing `to`
    /// back through whichever one fires.
    fn do_get_next_frame(
        &mut self,
        to: Box<[u8]>,
        on_frame: FrameCallback,
        on_close: CloseCallback,
    ) -> Result<()>;

    /// Release any held resources (sockets, upstream sources) and fire
    /// `on_close` for whatever request is currently outstanding, if any.
    fn close(&mut self);

    fn debug_name(&self) -> String {
        self.mime_type().to_string()
    }

    /// Request the next frame. Fails with
    /// [`EngineError::AlreadyAwaitingData`] if a request is already
    /// outstanding on this source (§4.4 step 3).
    fn get_next_frame(
        &mut self,
        to: Box<[u8]>,
        on_frame: FrameCallback,
        on_close: CloseCallback,
    ) -> Result<()> {
        if self.is_awaiting() {
            return Err(EngineError::AlreadyAwaitingData(self.debug_name()));
        }
        self.set_awaiting(true);
        self.do_get_next_frame(to, on_frame, on_close)
    }

    /// Clear the in-flight flag and invoke `on_frame`. Concrete sources
    /// call this instead of `on_frame(buf, info)` directly.
    fn complete_frame(&self, buf: Box<[u8]>, frame: FrameInfo, on_frame: FrameCallback) {
        self.set_awaiting(false);
        on_frame(buf, frame);
    }

    /// Clear the in-flight flag and invoke `on_close`. A source must
    /// call this at most once over its lifetime (§4.4 "closure").
    fn complete_close(&self, buf: Box<[u8]>, on_close: CloseCallback) {
        self.set_awaiting(false);
        on_close(buf);
    }
}

/// A [`FramedSource`] whose input is another `FramedSource` it owns
/// (§3 "FramedFilter"). Closing a filter closes its upstream.
pub trait FramedFilter: FramedSource {
    fn upstream(&self) -> &dyn FramedSource;
    fn upstream_mut(&mut self) -> &mut dyn FramedSource;
}

/// Rescales a wrapped source's presentation time from raw RTP-clock
/// ticks to true wall seconds/microseconds, using a fixed clock rate
/// (§4.4 "filters forward `get_next_frame` to their upstream,
/// interposing a private completion that transforms bytes" — here the
/// transform is on the timestamp, not the payload).
///
/// [`crate::rtp::source::RtpSource`] can only extract the raw 32-bit RTP
/// timestamp off the wire (it doesn't know the codec's declared clock
/// rate); it stamps that raw tick count directly into
/// [`PresentationTime::secs`] as a placeholder. This filter is the
/// `a=rtpmap`-clock-rate-aware conversion step a subsession interposes
/// once it knows the rate.
pub struct ClockRateFilter<S: FramedSource> {
    upstream: S,
    clock_rate: u32,
    awaiting: Rc<Cell<bool>>,
}

impl<S: FramedSource> ClockRateFilter<S> {
    pub fn new(upstream: S, clock_rate: u32) -> Self {
        Self {
            upstream,
            clock_rate,
            awaiting: Rc::new(Cell::new(false)),
        }
    }

    pub fn into_upstream(self) -> S {
        self.upstream
    }
}

fn rescale_ticks(raw_ticks: u64, clock_rate: u32) -> PresentationTime {
    if clock_rate == 0 {
        return PresentationTime { secs: raw_ticks, micros: 0 };
    }
    let rate = clock_rate as u64;
    let secs = raw_ticks / rate;
    let remainder = raw_ticks % rate;
    let micros = (remainder * 1_000_000) / rate;
    PresentationTime { secs, micros: micros as u32 }
}

impl<S: FramedSource> FramedSource for ClockRateFilter<S> {
    fn mime_type(&self) -> &str {
        self.upstream.mime_type()
    }

    fn max_frame_size(&self) -> usize {
        self.upstream.max_frame_size()
    }

    fn is_awaiting(&self) -> bool {
        self.awaiting.get()
    }

    fn set_awaiting(&self, awaiting: bool) {
        self.awaiting.set(awaiting);
    }

    /// Forwards straight to the upstream source's own `get_next_frame`
    /// (which tracks its own in-flight flag independently) rather than
    /// calling `do_get_next_frame` directly, so the one-outstanding-call
    /// invariant is enforced on the upstream source too. The completion
    /// callback can't borrow `self` — it may fire long after this call
    /// returns, from inside the scheduler — so the in-flight flag is a
    /// shared `Rc<Cell<bool>>` cleared from within the callback instead
    /// of through `complete_frame`.
    fn do_get_next_frame(
        &mut self,
        to: Box<[u8]>,
        on_frame: FrameCallback,
        on_close: CloseCallback,
    ) -> Result<()> {
        let clock_rate = self.clock_rate;
        let awaiting_frame = self.awaiting.clone();
        let wrapped_on_frame: FrameCallback = Box::new(move |buf, mut info| {
            info.presentation_time = rescale_ticks(info.presentation_time.secs, clock_rate);
            awaiting_frame.set(false);
            on_frame(buf, info);
        });
        let awaiting_close = self.awaiting.clone();
        let wrapped_on_close: CloseCallback = Box::new(move |buf| {
            awaiting_close.set(false);
            on_close(buf);
        });
        self.upstream.get_next_frame(to, wrapped_on_frame, wrapped_on_close)
    }

    fn close(&mut self) {
        self.upstream.close();
    }

    fn debug_name(&self) -> String {
        format!("clock-rate-filter({})", self.upstream.debug_name())
    }
}

impl<S: FramedSource> FramedFilter for ClockRateFilter<S> {
    fn upstream(&self) -> &dyn FramedSource {
        &self.upstream
    }

    fn upstream_mut(&mut self) -> &mut dyn FramedSource {
        &mut self.upstream
    }
}

/// Consumes frames from a single bound source (§3 "MediaSink").
///
/// As with [`FramedSource`], the public [`start_playing`](Self::start_playing)
/// wrapper enforces the "no source already bound" precondition and
/// delegates to [`do_start_playing`](Self::do_start_playing) for the
/// actual pull-loop setup.
pub trait MediaSink {
    fn has_source(&self) -> bool;

    fn do_start_playing(
        &mut self,
        source: Box<dyn FramedSource>,
        on_done: Box<dyn FnOnce()>,
    ) -> Result<()>;

    /// Detach the bound source without closing it. Returns it so the
    /// caller may rebind it elsewhere.
    fn do_stop_playing(&mut self) -> Option<Box<dyn FramedSource>>;

    fn debug_name(&self) -> String {
        "sink".to_string()
    }

    fn start_playing(
        &mut self,
        source: Box<dyn FramedSource>,
        on_done: Box<dyn FnOnce()>,
    ) -> Result<()> {
        if self.has_source() {
            return Err(EngineError::SinkAlreadyBound(self.debug_name()));
        }
        self.do_start_playing(source, on_done)
    }

    fn stop_playing(&mut self) -> Option<Box<dyn FramedSource>> {
        self.do_stop_playing()
    }
}
