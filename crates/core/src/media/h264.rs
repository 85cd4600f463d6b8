use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::nal::{self, PayloadUnit};
use super::rtp::RtpHeader;
use super::{Packetizer, clock, frame_nal_units};
use crate::config::{Codec, DEFAULT_MTU};
use crate::source::CodedFrame;

/// STAP-A payload header size (RFC 6184 §5.7.1).
const STAP_A_HEADER_LEN: usize = 1;
const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_FU_A: u8 = 28;

/// H.264 RTP packetizer (RFC 6184, packetization-mode=1).
///
/// Converts the NAL units of one access unit into RTP packets using three
/// payload structures:
///
/// - **Single NAL Unit** (§5.6): a NAL that fits the MTU budget is sent
///   as-is in one RTP packet (12-byte header + NAL bytes).
///
/// - **STAP-A aggregation** (§5.7.1): with aggregation enabled, consecutive
///   small NALs are packed into one packet:
///
///   ```text
///   STAP-A header: [F|NRI|Type=24]           (1 byte)
///   per NAL:       [size (16 bit)][NAL ...]
///   ```
///
///   F is the OR of the aggregated F bits, NRI their maximum.
///
/// - **FU-A fragmentation** (§5.8): NALs exceeding the MTU are split across
///   multiple RTP packets. Each fragment carries a 2-byte FU header
///   (FU indicator + FU header) before the NAL payload:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]               (up to MTU - 2 bytes)
///   ```
///
/// ## Marker bit
///
/// Per RFC 6184 §5.1, the RTP marker bit is set on the last RTP packet of an
/// access unit. Every packet of a frame carries the same RTP timestamp.
///
/// SPS/PPS are captured from the first frame that contains them; the
/// `a=fmtp` line then includes `profile-level-id` and `sprop-parameter-sets`
/// (RFC 6184 §8.1).
#[derive(Debug)]
pub struct H264Packetizer {
    header: RtpHeader,
    mtu: usize,
    aggregation: bool,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264Packetizer {
    /// Create with explicit payload type and SSRC.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self::with_header(RtpHeader::new(pt, ssrc))
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8) -> Self {
        Self::with_header(RtpHeader::with_random_ssrc(pt))
    }

    /// Create around existing mux state.
    pub fn with_header(header: RtpHeader) -> Self {
        Self {
            header,
            mtu: DEFAULT_MTU,
            aggregation: true,
            sps: None,
            pps: None,
        }
    }

    /// Largest RTP payload before FU-A fragmentation kicks in.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Enable or disable STAP-A aggregation.
    pub fn with_aggregation(mut self, aggregation: bool) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Derive profile-level-id from SPS NAL (RFC 6184 §8.1): bytes 1–3 are profile_idc, constraint_set, level_idc.
    fn get_profile_level_id(&self) -> Result<String, String> {
        let sps = self.sps.as_deref().ok_or("SPS not set")?;
        if sps.len() < 4 {
            return Err("SPS too short for profile-level-id".into());
        }
        Ok(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
    }

    fn get_sprop_parameter_sets(&self) -> Result<String, String> {
        let sps = self.sps.as_deref().ok_or("SPS not set")?;
        let pps = self.pps.as_deref().ok_or("PPS not set")?;
        Ok(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }

    fn capture_parameter_sets(&mut self, nal_units: &[&[u8]]) {
        if self.sps.is_some() && self.pps.is_some() {
            return;
        }
        for nal in nal_units {
            let Some(&first) = nal.first() else {
                continue;
            };
            let nal_type = first & 0x1f;
            if nal_type == 7 && self.sps.is_none() {
                self.sps = Some(nal.to_vec());
                tracing::debug!("H.264 SPS captured from bitstream ({} bytes)", nal.len());
            } else if nal_type == 8 && self.pps.is_none() {
                self.pps = Some(nal.to_vec());
                tracing::debug!("H.264 PPS captured from bitstream ({} bytes)", nal.len());
            }
        }
    }

    /// Build the STAP-A payload for several small NAL units.
    fn aggregate(nal_units: &[&[u8]]) -> Vec<u8> {
        let size: usize = nal_units.iter().map(|n| 2 + n.len()).sum();
        let mut payload = Vec::with_capacity(STAP_A_HEADER_LEN + size);

        let f = nal_units.iter().fold(0u8, |acc, n| acc | (n[0] & 0x80));
        let nri = nal_units.iter().map(|n| n[0] & 0x60).max().unwrap_or(0);
        payload.push(f | nri | NAL_TYPE_STAP_A);

        for nal in nal_units {
            payload.extend_from_slice(&(nal.len() as u16).to_be_bytes());
            payload.extend_from_slice(nal);
        }
        payload
    }

    /// Split one oversized NAL unit into FU-A payloads.
    fn fragment(&self, nal_unit: &[u8]) -> Vec<Vec<u8>> {
        let nal_header = nal_unit[0];
        let nal_type = nal_header & 0x1f;

        // FU indicator: F and NRI from original NAL, type = 28 (FU-A)
        let fu_indicator = (nal_header & 0xe0) | NAL_TYPE_FU_A;
        let payload = &nal_unit[1..];

        let max_fragment = self.mtu - 2; // 2 bytes for FU indicator + FU header
        let mut fragments = Vec::with_capacity(payload.len().div_ceil(max_fragment));
        let mut offset = 0usize;

        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let chunk_size = remaining.min(max_fragment);
            let chunk = &payload[offset..offset + chunk_size];

            // FU header: S=start, E=end, R=0, Type=original NAL type
            let start_bit = if offset == 0 { 0x80 } else { 0x00 };
            let end_bit = if remaining <= max_fragment { 0x40 } else { 0x00 };

            let mut fragment = Vec::with_capacity(2 + chunk.len());
            fragment.push(fu_indicator);
            fragment.push(start_bit | end_bit | nal_type);
            fragment.extend_from_slice(chunk);
            fragments.push(fragment);

            offset += chunk_size;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal_unit.len(),
            fragments = fragments.len(),
            "FU-A fragmented NAL unit"
        );

        fragments
    }

    /// Packetize the NAL units of one access unit sharing `timestamp`.
    pub fn packetize_nal_units(&mut self, nal_units: &[&[u8]], timestamp: u32) -> Vec<Vec<u8>> {
        let nal_units: Vec<&[u8]> = nal_units.iter().copied().filter(|n| !n.is_empty()).collect();
        self.capture_parameter_sets(&nal_units);

        let mut payloads = Vec::new();
        for unit in nal::plan_payloads(&nal_units, self.mtu, STAP_A_HEADER_LEN, self.aggregation) {
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

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, frame: &CodedFrame) -> Vec<Vec<u8>> {
        let nal_units = frame_nal_units(frame);
        let timestamp = clock::to_rtp_clock(frame.pts_us()) as u32;
        let packets = self.packetize_nal_units(&nal_units, timestamp);

        tracing::trace!(
            nal_count = nal_units.len(),
            rtp_packets = packets.len(),
            frame_bytes = frame.payload_len(),
            seq = self.header.sequence(),
            ts = timestamp,
            "frame packetized"
        );

        packets
    }

    fn codec(&self) -> Codec {
        Codec::H264
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    /// Format parameters per RFC 6184 §8.1.
    fn fmtp(&self) -> String {
        let mut fmtp = "packetization-mode=1".to_string();
        if let Ok(pl) = self.get_profile_level_id() {
            fmtp.push_str(&format!(";profile-level-id={}", pl));
        }
        if let Ok(sprop) = self.get_sprop_parameter_sets() {
            fmtp.push_str(&format!(";sprop-parameter-sets={}", sprop));
        }
        fmtp
    }

    fn has_parameter_sets(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn last_rtp_timestamp(&self) -> u32 {
        self.header.last_timestamp()
    }
}
