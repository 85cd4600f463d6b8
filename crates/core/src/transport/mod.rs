//! Output sinks for encoded media.
//!
//! The pipeline writes through a single [`Sink`], chosen once at startup:
//!
//! - **File** ([`file`]): raw elementary stream bytes appended to a local
//!   file in delivery order, no framing.
//!
//! - **UDP** ([`udp`]): one RTP packet per datagram, sent from an ephemeral
//!   socket to a single fixed destination.

pub mod file;
pub mod udp;

use crate::error::Result;

pub use file::FileSink;
pub use udp::UdpSink;

/// Destination for pipeline output.
pub trait Sink: Send {
    /// Write one unit (a packet payload or an RTP packet).
    ///
    /// Returns the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush and release the endpoint. Further writes are undefined.
    fn close(&mut self) -> Result<()>;

    /// Human-readable endpoint for log lines.
    fn describe(&self) -> String;
}
