//! Outgoing RTSP request construction (§4.8 step 2).
//!
//! Mirrors the response parser's builder shape but for the
//! client's send side: a method line, a fixed header set every request
//! carries, method-specific headers layered on by the caller, and an
//! optional body.

/// One outgoing RTSP request, built incrementally then serialized to
/// the wire format (§6 "RTSP over TCP").
#[must_use]
pub struct RtspRequest {
    method: String,
    uri: String,
    cseq: u32,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

/// Sent with every request so servers can report us in logs (§4.8 step 2).
pub const USER_AGENT: &str = "streamcore (rtsp-engine 0.1)";

impl RtspRequest {
    pub fn new(method: &str, uri: &str, cseq: u32) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            cseq,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn add_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Serialize to the wire format: method line, `CSeq`, `User-Agent`,
    /// any caller-added headers in the order added, `Content-Length`
    /// when a body is present, a blank line, then the body.
    pub fn serialize(&self) -> String {
        let mut out = format!("{} {} RTSP/1.0\r\n", self.method, self.uri);
        out.push_str(&format!("CSeq: {}\r\n", self.cseq));
        out.push_str(&format!("User-Agent: {USER_AGENT}\r\n"));

        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }

        match &self.body {
            Some(body) => {
                out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
                out.push_str(body);
            }
            None => out.push_str("\r\n"),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_method_line_cseq_and_user_agent() {
        let req = RtspRequest::new("OPTIONS", "rtsp://host/stream", 1);
        let s = req.serialize();
        assert!(s.starts_with("OPTIONS rtsp://host/stream RTSP/1.0\r\n"));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.contains(&format!("User-Agent: {USER_AGENT}\r\n")));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn describe_adds_accept_header() {
        let req = RtspRequest::new("DESCRIBE", "rtsp://host/stream", 2)
            .add_header("Accept", "application/sdp");
        assert!(req.serialize().contains("Accept: application/sdp\r\n"));
    }

    #[test]
    fn body_gets_content_length() {
        let req = RtspRequest::new("ANNOUNCE", "rtsp://host/stream", 3)
            .add_header("Content-Type", "application/sdp")
            .with_body("v=0\r\n".to_string());
        let s = req.serialize();
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("v=0\r\n"));
    }
}
