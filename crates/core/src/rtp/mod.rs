//! RTP transport: fixed-header codec, sender, and receiver (§3 "RTPSink",
//! "RTPSource"; §4.6, §4.7).

pub mod header;
pub mod sink;
pub mod source;

pub use header::{ParsedHeader, RtpHeader, HEADER_LEN};
pub use sink::{FramePackingPolicy, RtpSink, SenderReportStats, SingleFramePerPacket};
pub use source::{ReceptionStats, RtpSource};
