//! # streamcore — the core of a single-threaded streaming-media runtime
//!
//! A Rust library for moving timed media between local sources, network
//! sockets using RTP, and RTSP/SDP signaling endpoints.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Client request/response, session lifecycle, transport negotiation |
//! | [RFC 2617](https://tools.ietf.org/html/rfc2617) | Digest auth | `WWW-Authenticate`/`Authorization` challenge-response |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Fixed header format, SSRC, sequence/timestamp semantics |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Session description parsing and minimal generation |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  rtsp      — control-plane client        │
//! ├──────────────────────────────────────────┤
//! │  rtp       — sender, receiver, header     │
//! │  pipeline  — FramedSource/Filter/Sink     │
//! │  parser    — StreamParser byte-level I/O  │
//! ├──────────────────────────────────────────┤
//! │  groupsock — UDP group socket             │
//! │  medium    — arena-like object registry   │
//! │  scheduler — single-threaded event loop   │
//! │  env       — per-process execution context│
//! └──────────────────────────────────────────┘
//! ```
//!
//! Everything above `scheduler` runs on the single thread that owns
//! [`env::Environment`]; the only blocking calls permitted outside of
//! `scheduler::Scheduler::single_step` are the RTSP client's own
//! connect/send/recv turns, since those are short and precede
//! data-plane streaming (see the `rtsp` module docs).
//!
//! ## Crate layout
//!
//! - [`scheduler`] — single-threaded cooperative event loop and delay queue.
//! - [`env`] — the execution context bundling scheduler, registry, and diagnostics.
//! - [`medium`] — arena-like registry of named pipeline objects.
//! - [`groupsock`] — UDP socket with multicast/SSM join, TTL, buffer growth.
//! - [`pipeline`] — `FramedSource`/`FramedFilter`/`MediaSink` traits.
//! - [`parser`] — `StreamParser`, a bank-buffered byte/bit reader with explicit refill.
//! - [`rtp`] — RTP fixed header, sender, and receiver.
//! - [`rtsp`] — RTSP client: requests, responses, Digest auth, Transport, SDP.
//! - [`error`] — the engine-wide error type.

pub mod env;
pub mod error;
pub mod groupsock;
pub mod medium;
pub mod parser;
pub mod pipeline;
pub mod rtp;
pub mod rtsp;
pub mod scheduler;

pub use env::{Environment, ShutdownFlag};
pub use error::{EngineError, Result};
pub use medium::{MediumId, Registry};
pub use pipeline::{ClockRateFilter, FrameInfo, FramedFilter, FramedSource, MediaSink, PresentationTime};
pub use scheduler::{DelayToken, Scheduler};
