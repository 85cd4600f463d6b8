//! Pipeline configuration.
//!
//! [`StreamConfig`] is the record handed over by the command-line layer.
//! The pipeline trusts it: range checks on frame rate, bit rate and the
//! destination address happen where the values are parsed, not here.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default RTP destination port.
pub const DEFAULT_PORT: u16 = 1234;

/// Default RTP payload budget (bytes after the 12-byte RTP header).
pub const DEFAULT_MTU: usize = 1400;

/// Smallest payload budget the packetizers can fragment into.
pub const MIN_MTU: usize = 16;

/// Default bound on a single encoder poll.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest frame rate accepted by the command line (fps).
pub const MAX_FRAME_RATE: u32 = 30;

/// Largest bit rate accepted by the command line (kbps).
pub const MAX_BIT_RATE: u32 = 4096;

/// Where encoded frames go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Raw elementary stream appended to a local file.
    #[default]
    File,
    /// RTP packets sent as UDP datagrams to a single destination.
    Rtp,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "rtp" => Ok(Self::Rtp),
            _ => Err(format!("mode {s} is invalid (expected file or rtp)")),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Rtp => write!(f, "rtp"),
        }
    }
}

/// Video codec produced by the encoder channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    H264,
    H265,
}

impl Codec {
    /// Extension used for elementary-stream output files.
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
        }
    }

    /// Encoding name for the SDP `a=rtpmap` attribute.
    pub fn encoding_name(self) -> &'static str {
        match self {
            Self::H264 => "H264",
            Self::H265 => "H265",
        }
    }

    /// Dynamic RTP payload type used for this codec.
    pub fn payload_type(self) -> u8 {
        match self {
            Self::H264 => 96,
            Self::H265 => 97,
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    /// Accepts `264`, `h264`, `H.264`, `avc` and the H.265/HEVC equivalents.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if lower.contains("264") || lower == "avc" {
            Ok(Self::H264)
        } else if lower.contains("265") || lower == "hevc" {
            Ok(Self::H265)
        } else {
            Err(format!("video format {s} is invalid (expected H.264 or H.265)"))
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => write!(f, "H.264"),
            Self::H265 => write!(f, "H.265"),
        }
    }
}

/// Encoded picture size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameSize {
    #[default]
    Hd1080,
    Hd720,
    D1,
    Cif,
}

impl FrameSize {
    /// Width and height in pixels (NTSC variants for D1 and CIF).
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Hd1080 => (1920, 1080),
            Self::Hd720 => (1280, 720),
            Self::D1 => (720, 480),
            Self::Cif => (352, 240),
        }
    }
}

impl FromStr for FrameSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1080p" => Ok(Self::Hd1080),
            "720p" => Ok(Self::Hd720),
            "d1" => Ok(Self::D1),
            "cif" => Ok(Self::Cif),
            _ => Err(format!("video size {s} is invalid (expected 1080p, 720p, D1 or CIF)")),
        }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hd1080 => write!(f, "1080p"),
            Self::Hd720 => write!(f, "720p"),
            Self::D1 => write!(f, "D1"),
            Self::Cif => write!(f, "CIF"),
        }
    }
}

/// Configuration for one streaming run.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// File or RTP output. Fixed for the lifetime of the pipeline.
    pub mode: OutputMode,
    /// Target frame rate in fps. Also paces file replay sources.
    pub frame_rate: u32,
    /// Target bit rate in kbps (passed to the encoder, logged here).
    pub bit_rate: u32,
    /// RTP destination address.
    pub destination: Ipv4Addr,
    /// RTP destination port.
    pub port: u16,
    pub codec: Codec,
    pub frame_size: FrameSize,
    /// Largest RTP payload (after the RTP header) before fragmentation.
    pub mtu: usize,
    /// Pack small NAL units into aggregation packets (STAP-A / AP).
    pub aggregation: bool,
    /// Directory that receives `stream_<time>.<ext>` in file mode.
    pub output_dir: PathBuf,
    /// Where to write an SDP description of the RTP session, if anywhere.
    pub sdp_path: Option<PathBuf>,
    /// Upper bound on a single encoder poll.
    pub poll_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::File,
            frame_rate: 24,
            bit_rate: 1024,
            destination: Ipv4Addr::new(192, 168, 1, 100),
            port: DEFAULT_PORT,
            codec: Codec::H264,
            frame_size: FrameSize::Hd1080,
            mtu: DEFAULT_MTU,
            aggregation: true,
            output_dir: PathBuf::from("."),
            sdp_path: None,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl StreamConfig {
    /// Reject values the packetizers and capture loop cannot work with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.mtu < MIN_MTU || self.mtu > u16::MAX as usize {
            return Err(crate::StreamError::InvalidConfig(format!(
                "mtu {} out of range ({MIN_MTU}..={})",
                self.mtu,
                u16::MAX
            )));
        }
        if self.poll_timeout.is_zero() {
            return Err(crate::StreamError::InvalidConfig(
                "poll timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Name of the elementary-stream file for a run started at `started`.
    pub fn output_file_name(&self, started: chrono::DateTime<chrono::Local>) -> String {
        format!(
            "stream_{}.{}",
            started.format("%Y%m%d-%H%M%S"),
            self.codec.file_extension()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_match_command_line_defaults() {
        let c = StreamConfig::default();
        assert_eq!(c.mode, OutputMode::File);
        assert_eq!(c.frame_rate, 24);
        assert_eq!(c.bit_rate, 1024);
        assert_eq!(c.destination, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(c.port, 1234);
        assert_eq!(c.codec, Codec::H264);
        assert_eq!(c.frame_size, FrameSize::Hd1080);
        assert!(c.aggregation);
    }

    #[test]
    fn validate_rejects_tiny_mtu() {
        let mut c = StreamConfig::default();
        assert!(c.validate().is_ok());
        c.mtu = 4;
        assert!(matches!(
            c.validate(),
            Err(crate::StreamError::InvalidConfig(_))
        ));
        c.mtu = DEFAULT_MTU;
        c.poll_timeout = Duration::ZERO;
        assert!(c.validate().is_err());
    }

    #[test]
    fn codec_aliases() {
        for s in ["264", "h264", "H.264", "AVC", "avc"] {
            assert_eq!(s.parse::<Codec>().unwrap(), Codec::H264, "{s}");
        }
        for s in ["265", "H265", "H.265", "HEVC", "hevc"] {
            assert_eq!(s.parse::<Codec>().unwrap(), Codec::H265, "{s}");
        }
        assert!("vp8".parse::<Codec>().is_err());
    }

    #[test]
    fn frame_size_parsing() {
        assert_eq!("1080P".parse::<FrameSize>().unwrap(), FrameSize::Hd1080);
        assert_eq!("720p".parse::<FrameSize>().unwrap(), FrameSize::Hd720);
        assert_eq!("d1".parse::<FrameSize>().unwrap(), FrameSize::D1);
        assert_eq!("CIF".parse::<FrameSize>().unwrap(), FrameSize::Cif);
        assert!("4k".parse::<FrameSize>().is_err());
        assert_eq!(FrameSize::Hd720.dimensions(), (1280, 720));
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("FILE".parse::<OutputMode>().unwrap(), OutputMode::File);
        assert_eq!("rtp".parse::<OutputMode>().unwrap(), OutputMode::Rtp);
        assert!("rtsp".parse::<OutputMode>().is_err());
    }

    #[test]
    fn output_file_name_uses_codec_extension() {
        let started = chrono::Local
            .with_ymd_and_hms(2018, 5, 1, 12, 30, 5)
            .unwrap();
        let mut c = StreamConfig::default();
        assert_eq!(c.output_file_name(started), "stream_20180501-123005.h264");
        c.codec = Codec::H265;
        assert_eq!(c.output_file_name(started), "stream_20180501-123005.h265");
    }
}
