//! Presentation time to RTP clock conversion.

/// RTP clock rate for video payloads (RFC 3551 §5).
pub const VIDEO_CLOCK_RATE: u64 = 90_000;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Convert an encoder presentation timestamp (µs) to 90 kHz RTP ticks.
///
/// Truncates: `floor(pts_us * 90000 / 1_000_000)`. The intermediate product is
/// 128-bit so the result is exact for every `u64` input. Callers write the low
/// 32 bits to the wire. Ordering of inputs is not checked here.
pub fn to_rtp_clock(pts_us: u64) -> u64 {
    (pts_us as u128 * VIDEO_CLOCK_RATE as u128 / MICROS_PER_SECOND as u128) as u64
}
