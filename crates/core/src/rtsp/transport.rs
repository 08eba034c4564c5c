//! SETUP `Transport` header construction and parsing (§4.8).

use crate::rtsp::error::{ParseErrorKind, Result, RtspError};

/// What the client asked for in a SETUP request (§4.8 "SETUP Transport
/// header construction").
#[derive(Debug, Clone, Copy)]
pub enum TransportRequest {
    /// `RTP/AVP;unicast;client_port=<rtp>-<rtcp>`.
    UdpUnicast { client_rtp_port: u16, client_rtcp_port: u16 },
    /// `RTP/AVP;multicast;client_port=<rtp>-<rtcp>`.
    UdpMulticast { client_rtp_port: u16, client_rtcp_port: u16 },
    /// `RTP/AVP/TCP;unicast;interleaved=<c1>-<c2>`.
    TcpInterleaved { channel_rtp: u8, channel_rtcp: u8 },
}

impl TransportRequest {
    pub fn header_value(&self) -> String {
        match self {
            Self::UdpUnicast { client_rtp_port, client_rtcp_port } => {
                format!("RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port}")
            }
            Self::UdpMulticast { client_rtp_port, client_rtcp_port } => {
                format!("RTP/AVP;multicast;client_port={client_rtp_port}-{client_rtcp_port}")
            }
            Self::TcpInterleaved { channel_rtp, channel_rtcp } => {
                format!("RTP/AVP/TCP;unicast;interleaved={channel_rtp}-{channel_rtcp}")
            }
        }
    }
}

/// What the server granted in its SETUP 200 response (§4.8 "Response
/// Transport parsing").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    pub server_rtp_port: Option<u16>,
    pub server_rtcp_port: Option<u16>,
    pub source: Option<String>,
    pub interleaved: Option<(u8, u8)>,
}

impl TransportResponse {
    /// Parse a `Transport:` header value, splitting on `;` and
    /// recognizing `server_port=<n>[-<n>]`, `source=<dotted-ip>`, and
    /// `interleaved=<c1>-<c2>`. Fields this client doesn't recognize are
    /// ignored rather than rejected, since servers commonly echo back
    /// additional fields (`ssrc=`, `mode=`) this client has no use for.
    pub fn parse(header_value: &str) -> Result<Self> {
        let mut out = TransportResponse::default();
        let mut saw_recognized_field = false;

        for field in header_value.split(';') {
            let field = field.trim();
            if let Some(value) = field.strip_prefix("server_port=") {
                let (a, b) = split_pair(value)?;
                out.server_rtp_port = Some(a);
                out.server_rtcp_port = Some(b);
                saw_recognized_field = true;
            } else if let Some(value) = field.strip_prefix("source=") {
                out.source = Some(value.to_string());
                saw_recognized_field = true;
            } else if let Some(value) = field.strip_prefix("interleaved=") {
                let (a, b) = split_pair(value)?;
                out.interleaved = Some((a as u8, b as u8));
                saw_recognized_field = true;
            }
        }

        if !saw_recognized_field {
            return Err(RtspError::Parse { kind: ParseErrorKind::InvalidTransport });
        }
        Ok(out)
    }
}

fn split_pair(value: &str) -> Result<(u16, u16)> {
    let mut parts = value.splitn(2, '-');
    let a = parts.next().and_then(|s| s.parse().ok());
    let b = parts.next().and_then(|s| s.parse().ok());
    match (a, b) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(RtspError::Parse { kind: ParseErrorKind::InvalidTransport }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_udp_unicast_header() {
        let t = TransportRequest::UdpUnicast { client_rtp_port: 6970, client_rtcp_port: 6971 };
        assert_eq!(t.header_value(), "RTP/AVP;unicast;client_port=6970-6971");
    }

    #[test]
    fn builds_tcp_interleaved_header() {
        let t = TransportRequest::TcpInterleaved { channel_rtp: 0, channel_rtcp: 1 };
        assert_eq!(t.header_value(), "RTP/AVP/TCP;unicast;interleaved=0-1");
    }

    #[test]
    fn parses_udp_unicast_round_trip() {
        let resp = TransportResponse::parse(
            "RTP/AVP;unicast;client_port=6970-6971;server_port=9000-9001;source=10.0.0.1",
        )
        .unwrap();
        assert_eq!(resp.server_rtp_port, Some(9000));
        assert_eq!(resp.server_rtcp_port, Some(9001));
        assert_eq!(resp.source.as_deref(), Some("10.0.0.1"));
        assert_eq!(resp.interleaved, None);
    }

    #[test]
    fn parses_interleaved_channels() {
        let resp = TransportResponse::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
        assert_eq!(resp.interleaved, Some((2, 3)));
    }

    #[test]
    fn rejects_transport_with_no_recognized_fields() {
        assert!(TransportResponse::parse("RTP/AVP;unicast").is_err());
    }
}
