//! SDP consumption and minimal generation (RFC 4566, §6 "SDP consumption").
//!
//! Parsing extracts only what a subsession needs: medium name, codec
//! name, clock frequency, and the track's control path plus `a=fmtp:`
//! auxiliary parameters. Generation (for the ANNOUNCE direction) emits
//! the minimal session description this system's publish path needs —
//! not a general-purpose SDP writer.

use base64::Engine;

/// One `m=` media section plus the attributes that follow it, up to the
/// next `m=` line or end of input (§3 "MediaSubsession").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdpMediaDescription {
    pub medium: String,
    pub port: u16,
    pub payload_type: u8,
    pub codec_name: Option<String>,
    pub clock_rate: Option<u32>,
    pub control: Option<String>,
    pub fmtp: Option<String>,
    /// Decoded `sprop-parameter-sets` NAL units, present for H.264 tracks
    /// whose `a=fmtp:` carries them base64-encoded and comma-separated
    /// (RFC 6184 §8.1.1).
    pub sprop_parameter_sets: Vec<Vec<u8>>,
}

/// A parsed SDP session description (§6 "SDP consumption").
#[derive(Debug, Clone, Default)]
pub struct SessionDescription {
    pub session_control: Option<String>,
    pub connection_address: Option<String>,
    pub media: Vec<SdpMediaDescription>,
}

impl SessionDescription {
    /// Parse the subset of RFC 4566 this system needs. Unrecognized
    /// line types are ignored; a malformed `m=` line is skipped rather
    /// than aborting the whole parse, since one bad track shouldn't
    /// block the others.
    pub fn parse(body: &str) -> Self {
        let mut session = SessionDescription::default();
        let mut current: Option<SdpMediaDescription> = None;

        for raw_line in body.lines() {
            let line = raw_line.trim_end_matches('\r');
            let Some((tag, rest)) = line.split_once('=') else {
                continue;
            };

            match tag {
                "m" => {
                    if let Some(done) = current.take() {
                        session.media.push(done);
                    }
                    current = parse_media_line(rest);
                }
                "c" => {
                    if let Some(addr) = parse_connection_line(rest) {
                        if current.is_none() {
                            session.connection_address = Some(addr);
                        }
                    }
                }
                "a" => {
                    apply_attribute(rest, current.as_mut(), &mut session);
                }
                _ => {}
            }
        }
        if let Some(done) = current.take() {
            session.media.push(done);
        }
        session
    }
}

fn parse_media_line(rest: &str) -> Option<SdpMediaDescription> {
    // `<medium> <port> <proto> <fmt> ...`
    let mut parts = rest.split_whitespace();
    let medium = parts.next()?.to_string();
    let port = parts.next()?.parse().ok()?;
    let _proto = parts.next()?;
    let payload_type = parts.next()?.parse().ok()?;
    Some(SdpMediaDescription {
        medium,
        port,
        payload_type,
        codec_name: None,
        clock_rate: None,
        control: None,
        fmtp: None,
        sprop_parameter_sets: Vec::new(),
    })
}

fn parse_connection_line(rest: &str) -> Option<String> {
    // `IN IP4 <address>`
    rest.split_whitespace().nth(2).map(|s| s.to_string())
}

fn apply_attribute(rest: &str, media: Option<&mut SdpMediaDescription>, session: &mut SessionDescription) {
    if let Some(value) = rest.strip_prefix("control:") {
        match media {
            Some(m) => m.control = Some(value.to_string()),
            None => session.session_control = Some(value.to_string()),
        }
        return;
    }
    let Some(media) = media else { return };

    if let Some(value) = rest.strip_prefix("rtpmap:") {
        // `<pt> <codec>/<clock-rate>[/<channels>]`
        if let Some((_pt, codec_and_rate)) = value.split_once(' ') {
            let mut parts = codec_and_rate.split('/');
            media.codec_name = parts.next().map(|s| s.to_string());
            media.clock_rate = parts.next().and_then(|s| s.parse().ok());
        }
    } else if let Some(value) = rest.strip_prefix("fmtp:") {
        if let Some((_pt, params)) = value.split_once(' ') {
            media.sprop_parameter_sets = extract_sprop_parameter_sets(params);
            media.fmtp = Some(params.to_string());
        }
    }
}

/// Pull `sprop-parameter-sets=<b64>,<b64>,...` out of an `a=fmtp:` value
/// and base64-decode each set. Absent or undecodable entries yield an
/// empty vec rather than aborting the rest of the fmtp parse.
fn extract_sprop_parameter_sets(fmtp_params: &str) -> Vec<Vec<u8>> {
    fmtp_params
        .split(';')
        .map(str::trim)
        .find_map(|kv| kv.strip_prefix("sprop-parameter-sets="))
        .map(|value| {
            value
                .split(',')
                .filter_map(|set| base64::engine::general_purpose::STANDARD.decode(set).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Build the minimal session description an ANNOUNCE body carries (§6,
/// §11 "ANNOUNCE with a generated minimal SDP body").
pub fn build_announce_sdp(origin_addr: &str, session_id: u64, session_version: u64, payload_type: u8) -> String {
    format!(
        "v=0\r\n\
         o=- {session_id} {session_version} IN IP4 {origin_addr}\r\n\
         s=-\r\n\
         t=0 0\r\n\
         c=IN IP4 {origin_addr}\r\n\
         a=control:*\r\n\
         m=audio 0 RTP/AVP {payload_type}\r\n\
         a=control:trackID=0\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "v=0\r\n\
        o=- 123 1 IN IP4 10.0.0.1\r\n\
        s=Example\r\n\
        c=IN IP4 10.0.0.1\r\n\
        t=0 0\r\n\
        a=control:*\r\n\
        m=video 0 RTP/AVP 96\r\n\
        a=rtpmap:96 H264/90000\r\n\
        a=fmtp:96 packetization-mode=1\r\n\
        a=control:trackID=1\r\n\
        m=audio 0 RTP/AVP 97\r\n\
        a=rtpmap:97 MPEG4-GENERIC/44100\r\n\
        a=control:trackID=2\r\n";

    #[test]
    fn parses_two_media_sections() {
        let sdp = SessionDescription::parse(SAMPLE);
        assert_eq!(sdp.media.len(), 2);
        assert_eq!(sdp.connection_address.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn recovers_codec_clock_rate_and_control_per_track() {
        let sdp = SessionDescription::parse(SAMPLE);
        let video = &sdp.media[0];
        assert_eq!(video.medium, "video");
        assert_eq!(video.payload_type, 96);
        assert_eq!(video.codec_name.as_deref(), Some("H264"));
        assert_eq!(video.clock_rate, Some(90_000));
        assert_eq!(video.control.as_deref(), Some("trackID=1"));
        assert_eq!(video.fmtp.as_deref(), Some("packetization-mode=1"));

        let audio = &sdp.media[1];
        assert_eq!(audio.codec_name.as_deref(), Some("MPEG4-GENERIC"));
        assert_eq!(audio.clock_rate, Some(44_100));
        assert_eq!(audio.control.as_deref(), Some("trackID=2"));
    }

    #[test]
    fn session_level_control_does_not_leak_into_first_media_section() {
        let sdp = SessionDescription::parse(SAMPLE);
        assert_eq!(sdp.session_control.as_deref(), Some("*"));
        assert_eq!(sdp.media[0].control.as_deref(), Some("trackID=1"));
    }

    #[test]
    fn decodes_sprop_parameter_sets_from_fmtp() {
        // base64("\x67\x42") == "Z0I="
        let sdp = SessionDescription::parse(
            "v=0\r\nm=video 0 RTP/AVP 96\r\na=fmtp:96 packetization-mode=1; sprop-parameter-sets=Z0I=,aE4=\r\n",
        );
        let sets = &sdp.media[0].sprop_parameter_sets;
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0], vec![0x67, 0x42]);
        assert_eq!(sets[1], vec![0x68, 0x4e]);
    }

    #[test]
    fn announce_sdp_matches_the_documented_wire_format() {
        let body = build_announce_sdp("192.168.1.5", 1, 1, 97);
        assert!(body.starts_with("v=0\r\n"));
        assert!(body.contains("o=- 1 1 IN IP4 192.168.1.5\r\n"));
        assert!(body.contains("c=IN IP4 192.168.1.5\r\n"));
        assert!(body.contains("m=audio 0 RTP/AVP 97\r\n"));
        assert!(body.ends_with("a=control:trackID=0\r\n"));
    }
}
