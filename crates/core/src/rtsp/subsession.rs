//! One media track within an RTSP session (§3 "MediaSubsession").

use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;

use crate::groupsock::GroupSocket;
use crate::rtp::{RtpSink, RtpSource, SingleFramePerPacket};
use crate::rtsp::sdp::SdpMediaDescription;
use crate::rtsp::transport::TransportResponse;
use crate::scheduler::Scheduler;

/// A single `m=` track: its SDP-derived identity plus whatever the
/// transport negotiation (SETUP) has filled in so far.
pub struct MediaSubsession {
    pub medium: String,
    pub codec_name: Option<String>,
    pub clock_rate: u32,
    pub control: Option<String>,
    pub fmtp: Option<String>,
    pub payload_type: u8,

    pub client_rtp_port: Option<u16>,
    pub client_rtcp_port: Option<u16>,
    pub server_rtp_port: Option<u16>,
    pub server_rtcp_port: Option<u16>,
    pub connection_endpoint: Option<Ipv4Addr>,
    pub interleaved_channels: Option<(u8, u8)>,

    /// Per-track session id, populated after a successful SETUP whose
    /// response carries a `Session` header (§3).
    pub session_id: Option<String>,

    source: Option<RtpSource>,
}

impl MediaSubsession {
    pub fn from_sdp(description: &SdpMediaDescription) -> Self {
        Self {
            medium: description.medium.clone(),
            codec_name: description.codec_name.clone(),
            clock_rate: description.clock_rate.unwrap_or(90_000),
            control: description.control.clone(),
            fmtp: description.fmtp.clone(),
            payload_type: description.payload_type,
            client_rtp_port: None,
            client_rtcp_port: None,
            server_rtp_port: None,
            server_rtcp_port: None,
            connection_endpoint: None,
            interleaved_channels: None,
            session_id: None,
            source: None,
        }
    }

    /// Record what a SETUP round-trip negotiated (§4.8 "Response
    /// Transport parsing").
    pub fn apply_transport_response(&mut self, response: &TransportResponse) {
        self.server_rtp_port = response.server_rtp_port;
        self.server_rtcp_port = response.server_rtcp_port;
        self.interleaved_channels = response.interleaved;
        if let Some(addr) = &response.source {
            self.connection_endpoint = addr.parse().ok();
        }
    }

    /// Build the RTP source for this track from an already-bound socket
    /// (§3 "a constructed RTP source ... after initiate"). The default
    /// packing policy is attached to the paired sink side only — a
    /// receive-only subsession has no packing decision to make.
    pub fn initiate(&mut self, socket: crate::groupsock::GroupSocket) {
        self.source = Some(RtpSource::new(socket));
    }

    pub fn source(&self) -> Option<&RtpSource> {
        self.source.as_ref()
    }

    pub fn source_mut(&mut self) -> Option<&mut RtpSource> {
        self.source.as_mut()
    }

    pub fn take_source(&mut self) -> Option<RtpSource> {
        self.source.take()
    }

    /// The packing policy [`build_sink`](Self::build_sink) attaches when
    /// the caller doesn't need codec-specific multi-frame packing
    /// (§4.6).
    pub fn default_packing_policy() -> SingleFramePerPacket {
        SingleFramePerPacket
    }

    /// Construct a sender-side RTP sink for this track from its
    /// negotiated payload type and clock rate, using
    /// [`default_packing_policy`](Self::default_packing_policy). A
    /// subsession whose codec needs multi-frame packet sharing builds
    /// its own `RtpSink` with a custom `FramePackingPolicy` instead of
    /// going through this helper.
    pub fn build_sink(
        &self,
        scheduler: Rc<RefCell<Scheduler>>,
        socket: GroupSocket,
        dest: SocketAddr,
    ) -> RtpSink {
        RtpSink::new(
            scheduler,
            socket,
            dest,
            self.payload_type,
            self.clock_rate,
            Box::new(Self::default_packing_policy()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::MediaSink;
    use crate::rtsp::sdp::SessionDescription;

    const SAMPLE: &str = "v=0\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=control:trackID=1\r\n";

    #[test]
    fn builds_subsession_from_sdp_media_section() {
        let sdp = SessionDescription::parse(SAMPLE);
        let sub = MediaSubsession::from_sdp(&sdp.media[0]);
        assert_eq!(sub.medium, "video");
        assert_eq!(sub.codec_name.as_deref(), Some("H264"));
        assert_eq!(sub.clock_rate, 90_000);
        assert_eq!(sub.control.as_deref(), Some("trackID=1"));
        assert_eq!(sub.payload_type, 96);
    }

    #[test]
    fn applies_transport_response_fields() {
        let sdp = SessionDescription::parse(SAMPLE);
        let mut sub = MediaSubsession::from_sdp(&sdp.media[0]);
        let resp = TransportResponse {
            server_rtp_port: Some(9000),
            server_rtcp_port: Some(9001),
            source: Some("10.0.0.1".to_string()),
            interleaved: None,
        };
        sub.apply_transport_response(&resp);
        assert_eq!(sub.server_rtp_port, Some(9000));
        assert_eq!(sub.connection_endpoint, Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn build_sink_carries_negotiated_payload_type_and_clock_rate() {
        let sdp = SessionDescription::parse(SAMPLE);
        let sub = MediaSubsession::from_sdp(&sdp.media[0]);

        let scheduler = Rc::new(RefCell::new(Scheduler::new().unwrap()));
        let socket = crate::groupsock::GroupSocket::bind_send_only(Ipv4Addr::LOCALHOST).unwrap();
        let dest = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 5004);

        let sink = sub.build_sink(scheduler, socket, dest);
        assert_eq!(sink.stats().packets_sent, 0);
        assert!(!sink.has_source());
    }
}
