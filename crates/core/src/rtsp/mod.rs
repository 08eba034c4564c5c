//! RTSP control-plane client (§3 "RTSP client", §4.8, §6).

pub mod auth;
pub mod client;
pub mod error;
pub mod request;
pub mod response;
pub mod sdp;
pub mod subsession;
pub mod transport;

pub use auth::Authenticator;
pub use client::{parse_rtsp_url, RtspClient};
pub use error::{RtspError, Result as RtspResult};
pub use sdp::SessionDescription;
pub use subsession::MediaSubsession;
pub use transport::{TransportRequest, TransportResponse};
