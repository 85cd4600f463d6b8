//! H.265 (HEVC) RTP packetizer, RFC 7798.
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header** (vs 1-byte in H.264):
//!   ```text
//!   [F|   Type (6)  |LayerId(6)|TID(3)]
//!   ```
//!   The NAL type is in bits 1..6 of the first byte.
//!
//! - **Aggregation Packet** (§4.4.2, type 48) replaces STAP-A. Its payload
//!   header is a NAL header whose F bit is the OR of the aggregated F bits and
//!   whose LayerId and TID are the lowest among them.
//!
//! - **Fragmentation Unit** (§4.4.3, type 49): a 2-byte payload header plus a
//!   1-byte FU header `[S|E|FuType(6)]`, so each fragment carries at most
//!   `MTU - 3` bytes of the original NAL body.
//!
//! - **SDP attributes** (RFC 7798 §7.1):
//!   ```text
//!   a=rtpmap:97 H265/90000
//!   a=fmtp:97 sprop-vps=...;sprop-sps=...;sprop-pps=...
//!   ```

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::nal::{self, PayloadUnit};
use super::rtp::RtpHeader;
use super::{Packetizer, clock, frame_nal_units};
use crate::config::{Codec, DEFAULT_MTU};
use crate::source::CodedFrame;

const AP_HEADER_LEN: usize = 2;
const NAL_TYPE_AP: u8 = 48;
const NAL_TYPE_FU: u8 = 49;

const NAL_TYPE_VPS: u8 = 32;
const NAL_TYPE_SPS: u8 = 33;
const NAL_TYPE_PPS: u8 = 34;

fn nal_type(header0: u8) -> u8 {
    (header0 >> 1) & 0x3f
}

fn layer_id(nal: &[u8]) -> u8 {
    ((nal[0] & 0x01) << 5) | (nal[1] >> 3)
}

fn tid(nal: &[u8]) -> u8 {
    nal[1] & 0x07
}

/// H.265 RTP packetizer (RFC 7798, no DONL fields).
#[derive(Debug)]
pub struct H265Packetizer {
    header: RtpHeader,
    mtu: usize,
    aggregation: bool,
    vps: Option<Vec<u8>>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H265Packetizer {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self::with_header(RtpHeader::new(pt, ssrc))
    }

    pub fn with_random_ssrc(pt: u8) -> Self {
        Self::with_header(RtpHeader::with_random_ssrc(pt))
    }

    pub fn with_header(header: RtpHeader) -> Self {
        Self {
            header,
            mtu: DEFAULT_MTU,
            aggregation: true,
            vps: None,
            sps: None,
            pps: None,
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_aggregation(mut self, aggregation: bool) -> Self {
        self.aggregation = aggregation;
        self
    }

    fn capture_parameter_sets(&mut self, nal_units: &[&[u8]]) {
        if self.has_parameter_sets() {
            return;
        }
        for nal in nal_units {
            let slot = match nal_type(nal[0]) {
                NAL_TYPE_VPS => &mut self.vps,
                NAL_TYPE_SPS => &mut self.sps,
                NAL_TYPE_PPS => &mut self.pps,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(nal.to_vec());
                tracing::debug!(
                    nal_type = nal_type(nal[0]),
                    bytes = nal.len(),
                    "H.265 parameter set captured from bitstream"
                );
            }
        }
    }

    /// Build an Aggregation Packet payload.
    fn aggregate(nal_units: &[&[u8]]) -> Vec<u8> {
        let size: usize = nal_units.iter().map(|n| 2 + n.len()).sum();
        let mut payload = Vec::with_capacity(AP_HEADER_LEN + size);

        let f = nal_units.iter().fold(0u8, |acc, n| acc | (n[0] & 0x80));
        let layer = nal_units.iter().map(|n| layer_id(n)).min().unwrap_or(0);
        let min_tid = nal_units.iter().map(|n| tid(n)).min().unwrap_or(0);
        payload.push(f | (NAL_TYPE_AP << 1) | ((layer >> 5) & 0x01));
        payload.push(((layer & 0x1f) << 3) | min_tid);

        for nal in nal_units {
            payload.extend_from_slice(&(nal.len() as u16).to_be_bytes());
            payload.extend_from_slice(nal);
        }
        payload
    }

    /// Split one oversized NAL unit into FU payloads.
    fn fragment(&self, nal_unit: &[u8]) -> Vec<Vec<u8>> {
        let fu_type = nal_type(nal_unit[0]);
        // Payload header: original F, LayerId and TID with type = 49
        let header0 = (nal_unit[0] & 0x81) | (NAL_TYPE_FU << 1);
        let header1 = nal_unit[1];
        let body = &nal_unit[2..];

        let max_fragment = self.mtu - 3;
        let mut fragments = Vec::with_capacity(body.len().div_ceil(max_fragment));

        for (i, chunk) in body.chunks(max_fragment).enumerate() {
            let start_bit = if i == 0 { 0x80 } else { 0x00 };
            let end_bit = if (i + 1) * max_fragment >= body.len() {
                0x40
            } else {
                0x00
            };

            let mut fragment = Vec::with_capacity(3 + chunk.len());
            fragment.push(header0);
            fragment.push(header1);
            fragment.push(start_bit | end_bit | fu_type);
            fragment.extend_from_slice(chunk);
            fragments.push(fragment);
        }

        tracing::trace!(
            nal_type = fu_type,
            nal_size = nal_unit.len(),
            fragments = fragments.len(),
            "FU fragmented NAL unit"
        );

        fragments
    }

    /// Packetize the NAL units of one access unit sharing `timestamp`.
    ///
    /// NAL units shorter than the 2-byte header are dropped.
    pub fn packetize_nal_units(&mut self, nal_units: &[&[u8]], timestamp: u32) -> Vec<Vec<u8>> {
        let nal_units: Vec<&[u8]> = nal_units.iter().copied().filter(|n| n.len() >= 2).collect();
        self.capture_parameter_sets(&nal_units);

        let mut payloads = Vec::new();
        for unit in nal::plan_payloads(&nal_units, self.mtu, AP_HEADER_LEN, self.aggregation) {
            match unit {
                PayloadUnit::Single(i) => payloads.push(nal_units[i].to_vec()),
                PayloadUnit::Aggregate(range) => {
                    payloads.push(Self::aggregate(&nal_units[range]));
                }
                PayloadUnit::Fragmented(i) => payloads.extend(self.fragment(nal_units[i])),
            }
        }

        self.header.frame(payloads, timestamp)
    }
}

impl Packetizer for H265Packetizer {
    fn packetize(&mut self, frame: &CodedFrame) -> Vec<Vec<u8>> {
        let nal_units = frame_nal_units(frame);
        let timestamp = clock::to_rtp_clock(frame.pts_us()) as u32;
        let packets = self.packetize_nal_units(&nal_units, timestamp);

        tracing::trace!(
            nal_count = nal_units.len(),
            rtp_packets = packets.len(),
            seq = self.header.sequence(),
            ts = timestamp,
            "frame packetized"
        );

        packets
    }

    fn codec(&self) -> Codec {
        Codec::H265
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    /// `sprop-vps`/`sprop-sps`/`sprop-pps` for whichever sets are known.
    fn fmtp(&self) -> String {
        [
            ("sprop-vps", &self.vps),
            ("sprop-sps", &self.sps),
            ("sprop-pps", &self.pps),
        ]
        .iter()
        .filter_map(|(name, set)| {
            set.as_deref()
                .map(|s| format!("{}={}", name, BASE64_STANDARD.encode(s)))
        })
        .collect::<Vec<_>>()
        .join(";")
    }

    fn has_parameter_sets(&self) -> bool {
        self.vps.is_some() && self.sps.is_some() && self.pps.is_some()
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn last_rtp_timestamp(&self) -> u32 {
        self.header.last_timestamp()
    }
}
