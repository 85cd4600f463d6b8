//! Encoder-to-network streaming pipeline.
//!
//! Drains coded H.264/H.265 frames from an [`EncoderChannel`] and either
//! appends them to an elementary-stream file or packetizes them into RTP
//! (RFC 3550, RFC 6184, RFC 7798) and sends them over UDP.
//!
//! ```no_run
//! use venc::{OutputMode, ReplayChannel, StreamConfig, Streamer};
//!
//! # fn main() -> venc::Result<()> {
//! let config = StreamConfig {
//!     mode: OutputMode::Rtp,
//!     ..StreamConfig::default()
//! };
//! let channel = ReplayChannel::open("capture.h264", config.codec, config.frame_rate)?;
//!
//! let mut streamer = Streamer::new(config);
//! streamer.start(channel)?;
//! // ...
//! streamer.stop();
//! let stats = streamer.join()?;
//! println!("{} frames", stats.frames_dispatched);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod sdp;
pub mod source;
pub mod streamer;
pub mod transport;

pub use config::{Codec, FrameSize, OutputMode, StreamConfig};
pub use error::{ErrorClass, Result, StreamError};
pub use media::Packetizer;
pub use pipeline::{CaptureLoop, LoopState, PipelineControl, PipelineStats};
pub use source::{CodedFrame, EncoderChannel, Packet, PollStatus, PushChannel, ReplayChannel};
pub use streamer::Streamer;
