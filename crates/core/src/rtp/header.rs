//! RTP fixed header encode/decode (RFC 3550 §5.1, §4.6/§4.7).
//!
//! Covers both directions: the encode side (`write`) tracks its own
//! sequence/timestamp/SSRC state for a sender, and the decode side
//! (`ParsedHeader::parse`) reads a received header back out.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use rand::RngExt;

pub const HEADER_LEN: usize = 12;

/// Outgoing-side header state: sequence number, timestamp, and SSRC,
/// with version/padding/extension/CSRC-count fixed at their RTP-sender
/// defaults (version 2, no padding, no extension, no CSRC list).
#[derive(Debug)]
pub struct RtpHeader {
    pub pt: u8,
    pub ssrc: u32,
    sequence: u16,
    timestamp: u64,
}

impl RtpHeader {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(pt, ssrc = format_args!("{ssrc:#010X}"), "RTP sender header initialized");
        Self {
            pt,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// SSRC chosen randomly per RFC 3550 §8.1, to minimize collisions
    /// between independent sessions sharing a multicast group.
    pub fn with_random_ssrc(pt: u8) -> Self {
        let ssrc = rand::rng().random::<u32>();
        Self::new(pt, ssrc)
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Set the RTP clock directly, e.g. from a frame's presentation time
    /// converted at the sink's declared clock frequency, rather than
    /// incrementing by a fixed per-frame amount.
    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
    }

    /// Serialize the 12-byte fixed header and advance the sequence
    /// number. `marker` is set on the packet that completes a frame for
    /// codecs that signal frame boundaries (§4.6).
    pub fn write(&mut self, marker: bool) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0] = 2 << 6;
        header[1] = ((marker as u8) << 7) | self.pt;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&(self.timestamp as u32).to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Advance the RTP clock by `increment` ticks (e.g. `90000 / fps`
    /// for 90 kHz video).
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment as u64);
    }
}

/// Decoded view of a received RTP packet's fixed header (§4.7 "extracts
/// sequence number and timestamp").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub pt: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Byte offset of the payload, accounting for the CSRC list (the
    /// extension header itself, if present, is left for the caller —
    /// this crate doesn't originate RTP extensions).
    pub payload_offset: usize,
}

impl ParsedHeader {
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() < HEADER_LEN {
            return None;
        }
        let version = packet[0] >> 6;
        let padding = (packet[0] & 0x20) != 0;
        let extension = (packet[0] & 0x10) != 0;
        let csrc_count = packet[0] & 0x0F;
        let marker = (packet[1] & 0x80) != 0;
        let pt = packet[1] & 0x7F;
        let sequence = u16::from_be_bytes([packet[2], packet[3]]);
        let timestamp = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        let ssrc = u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]);
        let payload_offset = HEADER_LEN + 4 * csrc_count as usize;
        if payload_offset > packet.len() {
            return None;
        }

        Some(Self {
            version,
            padding,
            extension,
            csrc_count,
            marker,
            pt,
            sequence,
            timestamp,
            ssrc,
            payload_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> RtpHeader {
        RtpHeader::new(96, 0xAABBCCDD)
    }

    #[test]
    fn version_is_2() {
        let mut h = make_header();
        let buf = h.write(false);
        assert_eq!(buf[0] >> 6, 2);
    }

    #[test]
    fn marker_bit_round_trips() {
        let mut h = make_header();
        let no_marker = h.write(false);
        let with_marker = h.write(true);
        assert_eq!(ParsedHeader::parse(&no_marker_packet(&no_marker)).unwrap().marker, false);
        assert_eq!(ParsedHeader::parse(&no_marker_packet(&with_marker)).unwrap().marker, true);
    }

    fn no_marker_packet(header: &[u8; HEADER_LEN]) -> Vec<u8> {
        header.to_vec()
    }

    #[test]
    fn sequence_increments_and_wraps() {
        let mut h = make_header();
        h.sequence = u16::MAX;
        let buf = h.write(false);
        let parsed = ParsedHeader::parse(&buf).unwrap();
        assert_eq!(parsed.sequence, u16::MAX);
        assert_eq!(h.sequence(), 0);
    }

    #[test]
    fn parse_rejects_short_packets() {
        assert!(ParsedHeader::parse(&[0u8; 4]).is_none());
    }

    #[test]
    fn parse_recovers_pt_sequence_timestamp_ssrc() {
        let mut h = make_header();
        h.advance_timestamp(3000);
        let buf = h.write(true);
        let parsed = ParsedHeader::parse(&buf).unwrap();
        assert_eq!(parsed.version, 2);
        assert_eq!(parsed.pt, 96);
        assert_eq!(parsed.timestamp, 3000);
        assert_eq!(parsed.ssrc, 0xAABBCCDD);
        assert_eq!(parsed.payload_offset, HEADER_LEN);
    }

    #[test]
    fn random_ssrc_differs_between_instances() {
        let h1 = RtpHeader::with_random_ssrc(96);
        let h2 = RtpHeader::with_random_ssrc(96);
        assert_ne!(h1.ssrc, h2.ssrc);
    }
}
