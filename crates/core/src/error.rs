//! Error types for the streaming pipeline.

use std::io;
use std::path::PathBuf;

/// How far an error is allowed to propagate.
///
/// The capture loop absorbs [`Frame`](Self::Frame) and [`Packet`](Self::Packet)
/// failures and keeps streaming. [`Startup`](Self::Startup) and
/// [`Channel`](Self::Channel) failures reach the control path, which tears the
/// pipeline down and exits with a failure status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Setup could not complete; the loop never started.
    Startup,
    /// The encoder channel itself failed; the loop stops.
    Channel,
    /// One frame was lost (fetch or dispatch failed); the loop continues.
    Frame,
    /// One RTP packet was lost; session state is unaffected.
    Packet,
    /// Misuse of the [`Streamer`](crate::Streamer) handle.
    Control,
}

/// Errors that can occur in the streaming pipeline.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Startup**: [`OpenOutput`](Self::OpenOutput),
///   [`InvalidConfig`](Self::InvalidConfig), [`Io`](Self::Io).
/// - **Channel**: [`Channel`](Self::Channel), [`Release`](Self::Release).
/// - **Frame**: [`Fetch`](Self::Fetch), [`FrameMismatch`](Self::FrameMismatch),
///   [`Write`](Self::Write).
/// - **Packet**: [`Send`](Self::Send).
/// - **Control**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning),
///   [`WorkerPanicked`](Self::WorkerPanicked).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O error outside the per-frame and per-packet paths.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The elementary-stream output file could not be created.
    #[error("failed to open output {}: {source}", path.display())]
    OpenOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A configuration value the pipeline cannot work with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The encoder channel reported a hardware-level failure.
    #[error("encoder channel {channel} failed with {code:#x}")]
    Channel { channel: u32, code: u32 },

    /// Returning frame storage to the encoder failed.
    #[error("encoder channel {channel} rejected frame release with {code:#x}")]
    Release { channel: u32, code: u32 },

    /// Fetching a frame failed; no partial frame is valid.
    #[error("frame fetch failed with {code:#x}")]
    Fetch { code: u32 },

    /// The encoder handed back a different number of packets than requested.
    #[error("requested {requested} packets, encoder holds {available}")]
    FrameMismatch { requested: usize, available: usize },

    /// Writing a frame to the output file failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// Sending one RTP datagram failed.
    #[error("send of RTP packet seq={sequence} failed: {source}")]
    Send {
        sequence: u16,
        #[source]
        source: io::Error,
    },

    /// [`Streamer::start`](crate::Streamer::start) has not been called yet.
    #[error("streamer not started")]
    NotStarted,

    /// [`Streamer::start`](crate::Streamer::start) was called while already running.
    #[error("streamer already running")]
    AlreadyRunning,

    /// The capture worker thread panicked.
    #[error("capture worker panicked")]
    WorkerPanicked,
}

impl StreamError {
    /// Propagation class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io(_) | Self::OpenOutput { .. } | Self::InvalidConfig(_) => ErrorClass::Startup,
            Self::Channel { .. } | Self::Release { .. } => ErrorClass::Channel,
            Self::Fetch { .. } | Self::FrameMismatch { .. } | Self::Write(_) => ErrorClass::Frame,
            Self::Send { .. } => ErrorClass::Packet,
            Self::NotStarted | Self::AlreadyRunning | Self::WorkerPanicked => ErrorClass::Control,
        }
    }

    /// Whether the capture loop must stop on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Startup | ErrorClass::Channel | ErrorClass::Control
        )
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
