//! Incoming RTSP response parsing (§4.8 steps 4-7).

use crate::rtsp::error::{ParseErrorKind, Result, RtspError};

/// A parsed RTSP response: status line, headers, and body (§6).
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RtspResponse {
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Parse `RTSP/1.0 <code> <reason>\r\n<headers>\r\n\r\n[body]`. The
    /// caller is responsible for having already accumulated a complete
    /// message (header block plus a body of the announced
    /// `Content-Length`, §4.8 step 5) — this only interprets it.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.split("\r\n");

        let status_line = lines.next().ok_or(RtspError::Parse { kind: ParseErrorKind::EmptyResponse })?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next();
        let code = parts.next();
        let reason = parts.next().unwrap_or("");
        let (Some(version), Some(code)) = (version, code) else {
            return Err(RtspError::Parse { kind: ParseErrorKind::InvalidStatusLine });
        };
        if !version.starts_with("RTSP/") {
            return Err(RtspError::Parse { kind: ParseErrorKind::InvalidStatusLine });
        }
        let status_code: u16 = code
            .parse()
            .map_err(|_| RtspError::Parse { kind: ParseErrorKind::InvalidStatusLine })?;

        let mut headers = Vec::new();
        let mut body_start = raw.len();
        let mut consumed = status_line.len() + 2;
        for line in lines {
            if line.is_empty() {
                body_start = consumed + 2;
                break;
            }
            let colon = line
                .find(':')
                .ok_or(RtspError::Parse { kind: ParseErrorKind::InvalidHeader })?;
            headers.push((line[..colon].trim().to_string(), line[colon + 1..].trim().to_string()));
            consumed += line.len() + 2;
        }

        let body = raw.get(body_start..).unwrap_or("").to_string();

        Ok(Self {
            status_code,
            status_text: reason.to_string(),
            headers,
            body,
        })
    }

    pub fn content_length(&self) -> Result<Option<usize>> {
        match self.get_header("Content-Length") {
            Some(v) => v
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| RtspError::Parse { kind: ParseErrorKind::InvalidContentLength }),
            None => Ok(None),
        }
    }
}

/// Strip any interleaved RTP/RTCP-over-TCP frames (`$<channel><len16>`
/// followed by `len` bytes of payload) from the front of `buf`, since
/// they may arrive on the same socket as RTSP control responses when a
/// data-plane has already been SETUP (§4.8 step 4). Returns the number
/// of bytes consumed from the front of `buf`.
pub fn skip_interleaved_frames(buf: &[u8]) -> usize {
    let mut offset = 0;
    while offset + 4 <= buf.len() && buf[offset] == b'$' {
        let len = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        let frame_end = offset + 4 + len;
        if frame_end > buf.len() {
            break;
        }
        offset = frame_end;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_line() {
        let resp = RtspResponse::parse("RTSP/1.0 200 OK\r\n\r\n").unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.status_text, "OK");
    }

    #[test]
    fn parses_headers_and_body() {
        let raw = "RTSP/1.0 200 OK\r\nContent-Length: 7\r\n\r\nv=0\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.get_header("Content-Length"), Some("7"));
        assert_eq!(resp.body, "v=0\r\n\r\n");
        assert_eq!(resp.content_length().unwrap(), Some(7));
    }

    #[test]
    fn rejects_garbage_status_line() {
        assert!(RtspResponse::parse("garbage").is_err());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let resp = RtspResponse::parse("RTSP/1.0 401 Unauthorized\r\nwww-authenticate: Digest realm=\"R\", nonce=\"N\"\r\n\r\n").unwrap();
        assert_eq!(
            resp.get_header("WWW-Authenticate"),
            Some("Digest realm=\"R\", nonce=\"N\"")
        );
    }

    #[test]
    fn skip_interleaved_frames_consumes_one_frame() {
        let mut buf = vec![b'$', 0, 0, 3];
        buf.extend_from_slice(b"xyz");
        buf.extend_from_slice(b"RTSP/1.0 200 OK\r\n\r\n");
        let consumed = skip_interleaved_frames(&buf);
        assert_eq!(consumed, 7);
        assert!(buf[consumed..].starts_with(b"RTSP/1.0"));
    }

    #[test]
    fn skip_interleaved_frames_stops_on_partial_frame() {
        let buf = vec![b'$', 0, 0, 100, 1, 2, 3];
        assert_eq!(skip_interleaved_frames(&buf), 0);
    }
}
