//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Describes the outbound RTP stream so a plain RTP receiver (ffplay, VLC)
//! can open it from a `.sdp` file. The format:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=- <sess-id> <sess-ver> IN IP4 <addr>       ← origin
//! s=venc-stream                                ← session name
//! c=IN IP4 <addr>                              ← connection address
//! t=0 0                                        ← timing (live stream)
//! a=tool:venc-stream                           ← sender software (§6)
//! a=sendonly                                   ← direction (§6)
//! m=video 1234 RTP/AVP 96                      ← media description
//! a=rtpmap:96 H264/90000                       ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;...           ← codec parameters
//! a=framerate:24                               ← nominal frame rate
//! a=framesize:96 1920-1080                     ← picture size
//! ```
//!
//! The session id is the stream's SSRC; the version is bumped each time
//! the description is rewritten.

use std::fs;
use std::path::Path;

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::media::Packetizer;

const SESSION_NAME: &str = "venc-stream";

/// Generate the session description for the current packetizer state.
pub fn generate_sdp(config: &StreamConfig, packetizer: &dyn Packetizer, version: u32) -> String {
    let ip = config.destination;
    let pt = packetizer.payload_type();
    let (width, height) = config.frame_size.dimensions();

    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o=- {} {} IN IP4 {}",
        packetizer.ssrc(),
        version,
        ip
    ));
    sdp.push(format!("s={}", SESSION_NAME));
    sdp.push(format!("c=IN IP4 {}", ip));
    sdp.push("t=0 0".to_string());
    sdp.push(format!("a=tool:{}", SESSION_NAME));
    sdp.push("a=sendonly".to_string());
    sdp.push(format!("m=video {} RTP/AVP {}", config.port, pt));
    sdp.extend(packetizer.sdp_attributes());
    sdp.push(format!("a=framerate:{}", config.frame_rate));
    sdp.push(format!("a=framesize:{} {}-{}", pt, width, height));

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

/// Write the session description to `path`, replacing any previous one.
pub fn write_sdp(
    path: &Path,
    config: &StreamConfig,
    packetizer: &dyn Packetizer,
    version: u32,
) -> Result<()> {
    fs::write(path, generate_sdp(config, packetizer, version)).map_err(|source| {
        StreamError::OpenOutput {
            path: path.to_path_buf(),
            source,
        }
    })?;
    tracing::info!(path = %path.display(), version, "session description written");
    Ok(())
}
