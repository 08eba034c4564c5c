//! RTSP control-plane client (§4.8).
//!
//! A blocking TCP state object: `connect`/`send`/`recv` turns are short
//! and precede data-plane streaming, so they're the one place this
//! engine allows an indefinite blocking syscall (§5 "Concurrency &
//! Resource Model"). Once SETUP/PLAY has handed RTP socket descriptors
//! off to the pipeline, this client's own socket goes back to being
//! used only for PLAY/RECORD/TEARDOWN control turns.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::rtsp::auth::{parse_challenge, Authenticator};
use crate::rtsp::error::{ParseErrorKind, Result, RtspError};
use crate::rtsp::request::RtspRequest;
use crate::rtsp::response::{skip_interleaved_frames, RtspResponse};
use crate::rtsp::transport::TransportRequest;

const MAX_RESPONSE_BYTES: usize = 64 * 1024;
const DEFAULT_RTSP_PORT: u16 = 554;

/// `rtsp://host[:port][/path]` — case-insensitive scheme only (§6 "URL
/// grammar").
pub fn parse_rtsp_url(url: &str) -> Result<(String, u16, String)> {
    let rest = url
        .get(..7)
        .filter(|prefix| prefix.eq_ignore_ascii_case("rtsp://"))
        .map(|_| &url[7..])
        .ok_or_else(|| RtspError::InvalidUrl(url.to_string()))?;

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return Err(RtspError::InvalidUrl(url.to_string()));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().map_err(|_| RtspError::InvalidUrl(url.to_string()))?),
        None => (authority.to_string(), DEFAULT_RTSP_PORT),
    };
    Ok((host, port, path.to_string()))
}

/// RTSP client state (§3 "RTSP client"): TCP socket, CSeq counter, base
/// URL, session id, authenticator, interleaved-channel counter.
pub struct RtspClient {
    stream: Option<TcpStream>,
    host: String,
    port: u16,
    base_path: String,
    cseq: u32,
    session_id: Option<String>,
    authenticator: Option<Authenticator>,
    next_interleaved_channel: u8,
}

impl RtspClient {
    /// `open_connection` (§4.8 step 1): parse the URL, resolve+connect a
    /// blocking TCP socket, and set the stable base URL.
    pub fn open_connection(url: &str) -> Result<Self> {
        let (host, port, path) = parse_rtsp_url(url)?;
        let stream = TcpStream::connect((host.as_str(), port))?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        tracing::debug!(%host, port, %path, "RTSP connected");
        Ok(Self {
            stream: Some(stream),
            host,
            port,
            base_path: path,
            cseq: 0,
            session_id: None,
            authenticator: None,
            next_interleaved_channel: 0,
        })
    }

    pub fn set_credentials(&mut self, username: &str, password: &str) {
        let auth = self.authenticator.get_or_insert_with(Authenticator::default);
        auth.username = username.to_string();
        auth.password = password.to_string();
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn base_url(&self) -> String {
        format!("rtsp://{}:{}{}", self.host, self.port, self.base_path)
    }

    /// Reserve the next pair of interleaved channel ids for a
    /// TCP-tunneled SETUP (§4.8 "SETUP Transport header construction").
    fn next_interleaved_pair(&mut self) -> (u8, u8) {
        let pair = (self.next_interleaved_channel, self.next_interleaved_channel + 1);
        self.next_interleaved_channel += 2;
        pair
    }

    /// Send one request and return its parsed response, following a
    /// single 301/302 redirect (§4.8 step 8). Digest challenges are
    /// surfaced as [`RtspError::AuthChallenge`]/[`RtspError::AuthFailed`]
    /// rather than retried automatically — the caller supplies
    /// credentials via [`Self::set_credentials`] and calls again.
    fn execute(
        &mut self,
        method: &str,
        uri: &str,
        headers: Vec<(String, String)>,
        body: Option<String>,
        allow_redirect: bool,
    ) -> Result<RtspResponse> {
        self.cseq += 1;
        let cseq = self.cseq;

        let mut request = RtspRequest::new(method, uri, cseq);
        let had_authenticator_before = self
            .authenticator
            .as_ref()
            .map(|a| a.is_challenged())
            .unwrap_or(false);
        if let Some(auth) = &self.authenticator {
            if auth.is_challenged() && !auth.username.is_empty() {
                request = request.add_header("Authorization", auth.authorization_header(method, uri));
            }
        }
        for (name, value) in headers {
            request = request.add_header(&name, value);
        }
        if let Some(body) = body {
            request = request.with_body(body);
        }

        let response = self.round_trip(&request.serialize())?;

        match response.status_code {
            200 => Ok(response),
            301 | 302 if allow_redirect => {
                let location = response
                    .get_header("Location")
                    .ok_or(RtspError::MissingHeader("Location"))?;
                let (host, port, path) = parse_rtsp_url(location)?;
                self.reconnect(host, port, path)?;
                self.execute(method, uri, Vec::new(), None, false)
            }
            301 | 302 => Err(RtspError::TooManyRedirects),
            401 => {
                let www_auth = response
                    .get_header("WWW-Authenticate")
                    .ok_or(RtspError::MissingHeader("WWW-Authenticate"))?;
                let (realm, nonce) = parse_challenge(www_auth)
                    .ok_or(RtspError::Parse { kind: ParseErrorKind::InvalidHeader })?;
                if had_authenticator_before {
                    return Err(RtspError::AuthFailed);
                }
                let auth = self.authenticator.get_or_insert_with(Authenticator::default);
                auth.apply_challenge(&realm, &nonce);
                Err(RtspError::AuthChallenge { realm, nonce })
            }
            status => Err(RtspError::BadStatus { status, reason: response.status_text }),
        }
    }

    fn reconnect(&mut self, host: String, port: u16, path: String) -> Result<()> {
        let stream = TcpStream::connect((host.as_str(), port))?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        self.stream = Some(stream);
        self.host = host;
        self.port = port;
        self.base_path = path;
        Ok(())
    }

    /// Write the request, then accumulate bytes until the header block
    /// plus any announced body has arrived, skipping interleaved
    /// RTP/RTCP frames that land on the same socket (§4.8 steps 3-5).
    fn round_trip(&mut self, request: &str) -> Result<RtspResponse> {
        let stream = self.stream.as_mut().ok_or(RtspError::Io(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "RTSP client is not connected",
        )))?;
        stream.write_all(request.as_bytes())?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let consumed = skip_interleaved_frames(&buf);
            if consumed > 0 {
                buf.drain(..consumed);
            }

            if let Some(header_end) = find_double_crlf(&buf) {
                let text = String::from_utf8_lossy(&buf);
                let partial = RtspResponse::parse(&text)?;
                match partial.content_length()? {
                    Some(len) if buf.len() - header_end < len => {
                        if buf.len() > MAX_RESPONSE_BYTES {
                            return Err(RtspError::Parse { kind: ParseErrorKind::InvalidContentLength });
                        }
                        continue;
                    }
                    _ => return Ok(partial),
                }
            }
            if buf.len() > MAX_RESPONSE_BYTES {
                return Err(RtspError::Parse { kind: ParseErrorKind::EmptyResponse });
            }
        }
        Err(RtspError::Parse { kind: ParseErrorKind::EmptyResponse })
    }

    pub fn options(&mut self) -> Result<RtspResponse> {
        let uri = self.base_url();
        self.execute("OPTIONS", &uri, Vec::new(), None, true)
    }

    /// DESCRIBE — returns the SDP response body (§4.8 step 7).
    pub fn describe(&mut self, uri: &str) -> Result<String> {
        let headers = vec![("Accept".to_string(), "application/sdp".to_string())];
        let response = self.execute("DESCRIBE", uri, headers, None, true)?;
        Ok(response.body)
    }

    /// ANNOUNCE — publishes a minimal SDP body for the record direction
    /// (§11 "ANNOUNCE with a generated minimal SDP body").
    pub fn announce(&mut self, uri: &str, sdp_body: String) -> Result<()> {
        let headers = vec![("Content-Type".to_string(), "application/sdp".to_string())];
        self.execute("ANNOUNCE", uri, headers, Some(sdp_body), true)?;
        Ok(())
    }

    /// SETUP for a UDP unicast track (§4.8 "SETUP Transport header
    /// construction"). Returns the negotiated transport.
    pub fn setup_udp(
        &mut self,
        uri: &str,
        client_rtp_port: u16,
        client_rtcp_port: u16,
    ) -> Result<crate::rtsp::transport::TransportResponse> {
        let transport = TransportRequest::UdpUnicast { client_rtp_port, client_rtcp_port };
        self.setup(uri, transport)
    }

    /// SETUP for a TCP-interleaved track, drawing the next channel pair
    /// from this client's counter (§4.8 step 5 "SETUP Transport (TCP
    /// interleaved)").
    pub fn setup_tcp_interleaved(&mut self, uri: &str) -> Result<crate::rtsp::transport::TransportResponse> {
        let (channel_rtp, channel_rtcp) = self.next_interleaved_pair();
        let transport = TransportRequest::TcpInterleaved { channel_rtp, channel_rtcp };
        self.setup(uri, transport)
    }

    fn setup(&mut self, uri: &str, transport: TransportRequest) -> Result<crate::rtsp::transport::TransportResponse> {
        let headers = vec![("Transport".to_string(), transport.header_value())];
        let response = self.execute("SETUP", uri, headers, None, true)?;
        if let Some(session) = response.get_header("Session") {
            self.session_id = Some(session.split(';').next().unwrap_or(session).trim().to_string());
        }
        let transport_value = response
            .get_header("Transport")
            .ok_or(RtspError::MissingHeader("Transport"))?;
        crate::rtsp::transport::TransportResponse::parse(transport_value)
    }

    pub fn play(&mut self, uri: &str) -> Result<()> {
        self.with_session("PLAY", uri)
    }

    /// RECORD — the publish-direction counterpart of PLAY, used after
    /// ANNOUNCE (§11 "OPTIONS and RECORD methods").
    pub fn record(&mut self, uri: &str) -> Result<()> {
        self.with_session("RECORD", uri)
    }

    fn with_session(&mut self, method: &str, uri: &str) -> Result<()> {
        let session = self
            .session_id
            .clone()
            .ok_or(RtspError::MissingHeader("Session"))?;
        let headers = vec![
            ("Session".to_string(), session),
            ("Range".to_string(), "npt=0-".to_string()),
        ];
        self.execute(method, uri, headers, None, true)?;
        Ok(())
    }

    /// TEARDOWN never reads a response, since some servers hang after
    /// sending theirs, and unconditionally clears the session id
    /// (§4.8 "TEARDOWN does not read a response").
    pub fn teardown(&mut self, uri: &str) {
        self.cseq += 1;
        let mut request = RtspRequest::new("TEARDOWN", uri, self.cseq);
        if let Some(session) = &self.session_id {
            request = request.add_header("Session", session.clone());
        }
        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.write_all(request.serialize().as_bytes());
        }
        self.session_id = None;
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rtsp_url_with_explicit_port_and_path() {
        let (host, port, path) = parse_rtsp_url("rtsp://example.com:8554/stream/track1").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 8554);
        assert_eq!(path, "/stream/track1");
    }

    #[test]
    fn defaults_to_port_554_and_root_path() {
        let (host, port, path) = parse_rtsp_url("rtsp://example.com").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 554);
        assert_eq!(path, "/");
    }

    #[test]
    fn rejects_non_rtsp_scheme() {
        assert!(parse_rtsp_url("http://example.com").is_err());
    }

    #[test]
    fn interleaved_channel_pairs_increment_by_two() {
        let (host, _port, _path) = ("127.0.0.1".to_string(), 554u16, "/".to_string());
        let _ = host;
        // Exercise the counter directly without a live connection.
        let mut client = RtspClient {
            stream: None,
            host: "h".to_string(),
            port: 554,
            base_path: "/".to_string(),
            cseq: 0,
            session_id: None,
            authenticator: None,
            next_interleaved_channel: 0,
        };
        assert_eq!(client.next_interleaved_pair(), (0, 1));
        assert_eq!(client.next_interleaved_pair(), (2, 3));
    }
}
