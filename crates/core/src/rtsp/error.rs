//! RTSP client error type (RFC 2326).
//!
//! Kept separate from [`crate::error::EngineError`]: the control-plane
//! failure taxonomy (status codes, auth challenges, redirects,
//! malformed Transport headers) doesn't overlap much with the engine's
//! scheduler/pipeline/parser errors.

use std::fmt;

/// Errors raised while issuing RTSP requests or parsing responses.
///
/// - **Transport**: [`Io`](Self::Io).
/// - **Protocol**: [`Parse`](Self::Parse), [`MissingHeader`](Self::MissingHeader),
///   [`BadStatus`](Self::BadStatus).
/// - **Authentication**: [`AuthChallenge`](Self::AuthChallenge),
///   [`AuthFailed`](Self::AuthFailed).
/// - **Redirect**: [`TooManyRedirects`](Self::TooManyRedirects).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a response status line or a structured header
    /// value (Transport, Session).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A header required by the calling method was absent from the
    /// response (e.g. `Transport` on a SETUP 200, `Session` on a PLAY 200).
    #[error("response missing required header: {0}")]
    MissingHeader(&'static str),

    /// Server returned a non-2xx status that isn't a redirect or an
    /// auth challenge this client knows how to retry.
    #[error("RTSP request failed: {status} {reason}")]
    BadStatus { status: u16, reason: String },

    /// 401 received with no authenticator yet installed on the caller's
    /// request; `realm`/`nonce` have been populated on the authenticator
    /// so the caller can retry (§4.8 step 9).
    #[error("authentication required: realm={realm:?}")]
    AuthChallenge { realm: String, nonce: String },

    /// 401 received even though a populated authenticator was already
    /// attached to the request — credentials are wrong.
    #[error("authentication failed")]
    AuthFailed,

    /// Followed a 301/302 `Location` once and the retry also redirected.
    #[error("too many redirects")]
    TooManyRedirects,

    /// `rtsp://` URL failed to parse (bad scheme, missing host).
    #[error("invalid RTSP URL: {0}")]
    InvalidUrl(String),
}

/// Specific kind of RTSP response parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    EmptyResponse,
    InvalidStatusLine,
    InvalidHeader,
    InvalidTransport,
    InvalidContentLength,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidTransport => write!(f, "invalid Transport header"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
        }
    }
}

pub type Result<T> = std::result::Result<T, RtspError>;
