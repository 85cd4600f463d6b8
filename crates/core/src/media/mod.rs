//! Media codecs and RTP packetization.
//!
//! This module provides the [`Packetizer`] trait and codec-specific
//! implementations that convert encoded frames into RTP packets.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded video frame is split into one or more RTP packets.
//! Every RTP packet carries a 12-byte fixed header ([`rtp::RtpHeader`])
//! containing:
//!
//! - **Sequence number** (16-bit, wrapping), for reordering and loss detection.
//! - **Timestamp** (32-bit), the frame PTS on the 90 kHz media clock.
//! - **SSRC** (32-bit), randomly chosen to identify the sender.
//! - **Marker bit**, set on the last packet of an access unit (frame).
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | Payload type |
//! |-------|--------|-----|--------------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | 96 |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) | 97 |

pub mod clock;
pub mod h264;
pub mod h265;
pub mod nal;
pub mod rtp;

use crate::config::Codec;
use crate::source::CodedFrame;

/// Codec-specific RTP packetizer.
///
/// Each supported codec implements this trait, providing:
/// - **Packetization**: splitting one encoded frame into RTP-sized packets
/// - **SDP attributes**: codec parameters for the session description
/// - **RTP metadata**: payload type, clock rate, sequence/timestamp state
///
/// The generic RTP header is handled by [`rtp::RtpHeader`]; packetizers
/// compose it rather than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Packetize one encoded frame into RTP packets.
    ///
    /// Each returned `Vec<u8>` is a complete RTP packet: 12-byte header
    /// (RFC 3550 §5.1) followed by the codec-specific payload. All packets
    /// share the frame's timestamp and only the last carries the marker bit.
    fn packetize(&mut self, frame: &CodedFrame) -> Vec<Vec<u8>>;

    fn codec(&self) -> Codec;

    /// RTP clock rate in Hz.
    ///
    /// Video codecs use 90000 (90 kHz) per RFC 3551 §4.
    fn clock_rate(&self) -> u32 {
        clock::VIDEO_CLOCK_RATE as u32
    }

    /// RTP payload type number (RFC 3551). Dynamic range 96–127.
    fn payload_type(&self) -> u8;

    fn ssrc(&self) -> u32;

    /// Value of the `a=fmtp` attribute, without the payload type prefix.
    fn fmtp(&self) -> String;

    /// SDP media-level attribute lines for this codec.
    ///
    /// Returned strings include the `a=` prefix, e.g.:
    /// - `"a=rtpmap:96 H264/90000"`
    /// - `"a=fmtp:96 packetization-mode=1"`
    ///
    /// The fmtp line is left out while there is nothing to put in it.
    fn sdp_attributes(&self) -> Vec<String> {
        let pt = self.payload_type();
        let mut attrs = vec![format!(
            "a=rtpmap:{} {}/{}",
            pt,
            self.codec().encoding_name(),
            self.clock_rate()
        )];
        let fmtp = self.fmtp();
        if !fmtp.is_empty() {
            attrs.push(format!("a=fmtp:{} {}", pt, fmtp));
        }
        attrs
    }

    /// Whether every parameter set the fmtp line advertises has been seen.
    fn has_parameter_sets(&self) -> bool;

    /// Sequence number of the next packet.
    fn next_sequence(&self) -> u16;

    /// RTP timestamp of the most recent frame.
    fn last_rtp_timestamp(&self) -> u32;
}

/// Build the packetizer for `codec` with a random SSRC.
pub fn packetizer_for(codec: Codec, mtu: usize, aggregation: bool) -> Box<dyn Packetizer> {
    let pt = codec.payload_type();
    match codec {
        Codec::H264 => Box::new(
            h264::H264Packetizer::with_random_ssrc(pt)
                .with_mtu(mtu)
                .with_aggregation(aggregation),
        ),
        Codec::H265 => Box::new(
            h265::H265Packetizer::with_random_ssrc(pt)
                .with_mtu(mtu)
                .with_aggregation(aggregation),
        ),
    }
}

/// NAL units of every packet in `frame`, in order.
pub(crate) fn frame_nal_units(frame: &CodedFrame) -> Vec<&[u8]> {
    frame
        .packets()
        .iter()
        .flat_map(|p| nal::split_payload(p.payload()))
        .collect()
}
