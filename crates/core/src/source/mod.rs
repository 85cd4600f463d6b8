//! Encoder channel abstraction.
//!
//! The hardware encoder is an external collaborator. The pipeline only sees
//! it through [`EncoderChannel`]: a pollable channel that buffers completed
//! packets, hands them out one frame at a time, and expects every fetched
//! frame back through [`release`](EncoderChannel::release).
//!
//! ## Drain cycle
//!
//! ```text
//! poll(timeout) ── TimedOut ──▶ poll again
//!      │
//!    Ready
//!      ▼
//! query_pending() ── 0 ──▶ poll again (no data yet, not end of stream)
//!      │ n
//!      ▼
//! fetch(n) ──▶ CodedFrame ──▶ dispatch ──▶ release(frame)
//! ```
//!
//! Two adapters ship with the crate: [`ReplayChannel`] replays an Annex B
//! file at the configured frame rate, and [`PushChannel`] accepts frames from
//! an in-process encoder.

pub mod push;
pub mod replay;

use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

pub use push::{PushChannel, PushSender};
pub use replay::ReplayChannel;

/// Identifier of an encoder channel.
pub type ChannelId = u32;

/// Outcome of [`EncoderChannel::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// At least one frame is ready to be queried and fetched.
    Ready,
    /// Nothing became ready within the timeout.
    TimedOut,
    /// The channel will never produce another frame.
    Exhausted,
}

/// One encoder output packet.
///
/// `data` is the buffer as reported by the encoder; `offset` skips any
/// container header in front of the elementary stream bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Bytes,
    pub offset: usize,
    /// Presentation timestamp in microseconds (encoder clock).
    pub pts_us: u64,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>, pts_us: u64) -> Self {
        Self {
            data: data.into(),
            offset: 0,
            pts_us,
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Elementary stream bytes of this packet.
    pub fn payload(&self) -> &[u8] {
        self.data.get(self.offset..).unwrap_or_default()
    }
}

/// One encoder output unit: the ordered packets of a single picture.
///
/// All packets share one presentation timestamp and must be delivered in
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedFrame {
    packets: Vec<Packet>,
}

impl CodedFrame {
    pub fn new(packets: Vec<Packet>) -> Self {
        Self { packets }
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Presentation timestamp of the frame (taken from its first packet).
    pub fn pts_us(&self) -> u64 {
        self.packets.first().map_or(0, |p| p.pts_us)
    }

    /// Total elementary stream bytes across all packets.
    pub fn payload_len(&self) -> usize {
        self.packets.iter().map(|p| p.payload().len()).sum()
    }

    pub fn into_packets(self) -> Vec<Packet> {
        self.packets
    }
}

/// Contract of a hardware (or software) encoder channel.
///
/// `release` takes the frame by value: every successful `fetch` is matched by
/// exactly one `release`, and the pipeline enforces that with [`FrameGuard`].
pub trait EncoderChannel: Send {
    /// Channel identifier, for logging and error reports.
    fn id(&self) -> ChannelId;

    /// Block up to `timeout` for frame availability.
    fn poll(&mut self, timeout: Duration) -> Result<PollStatus>;

    /// Number of complete packets currently buffered. Zero means "not yet".
    fn query_pending(&mut self) -> Result<usize>;

    /// Retrieve exactly `count` packets forming one frame.
    fn fetch(&mut self, count: usize) -> Result<CodedFrame>;

    /// Return a fetched frame's storage to the encoder.
    fn release(&mut self, frame: CodedFrame) -> Result<()>;
}

impl<C: EncoderChannel + ?Sized> EncoderChannel for Box<C> {
    fn id(&self) -> ChannelId {
        (**self).id()
    }

    fn poll(&mut self, timeout: Duration) -> Result<PollStatus> {
        (**self).poll(timeout)
    }

    fn query_pending(&mut self) -> Result<usize> {
        (**self).query_pending()
    }

    fn fetch(&mut self, count: usize) -> Result<CodedFrame> {
        (**self).fetch(count)
    }

    fn release(&mut self, frame: CodedFrame) -> Result<()> {
        (**self).release(frame)
    }
}

/// Scoped ownership of a fetched frame.
///
/// The frame goes back to the channel exactly once: explicitly through
/// [`release`](Self::release) on the normal path, or from `Drop` on any early
/// return or unwind.
pub struct FrameGuard<'a, C: EncoderChannel + ?Sized> {
    channel: &'a mut C,
    frame: Option<CodedFrame>,
}

impl<'a, C: EncoderChannel + ?Sized> FrameGuard<'a, C> {
    /// Fetch `count` packets and take ownership of the resulting frame.
    pub fn fetch(channel: &'a mut C, count: usize) -> Result<Self> {
        let frame = channel.fetch(count)?;
        Ok(Self {
            channel,
            frame: Some(frame),
        })
    }

    pub fn frame(&self) -> &CodedFrame {
        self.frame
            .as_ref()
            .unwrap_or_else(|| unreachable!("frame is only taken by release"))
    }

    /// Give the frame back to the channel, reporting any release failure.
    pub fn release(mut self) -> Result<()> {
        match self.frame.take() {
            Some(frame) => self.channel.release(frame),
            None => Ok(()),
        }
    }
}

impl<C: EncoderChannel + ?Sized> Drop for FrameGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            let channel = self.channel.id();
            if let Err(e) = self.channel.release(frame) {
                tracing::error!(channel, error = %e, "frame release failed during unwind");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::StreamError;

    /// Channel that hands out one fixed frame and counts releases.
    pub(crate) struct CountingChannel {
        pub fetched: usize,
        pub released: usize,
        pub fail_release: bool,
    }

    impl EncoderChannel for CountingChannel {
        fn id(&self) -> ChannelId {
            3
        }

        fn poll(&mut self, _timeout: Duration) -> Result<PollStatus> {
            Ok(PollStatus::Ready)
        }

        fn query_pending(&mut self) -> Result<usize> {
            Ok(1)
        }

        fn fetch(&mut self, count: usize) -> Result<CodedFrame> {
            self.fetched += 1;
            Ok(CodedFrame::new(vec![Packet::new(vec![0u8; 4], 0); count]))
        }

        fn release(&mut self, _frame: CodedFrame) -> Result<()> {
            self.released += 1;
            if self.fail_release {
                return Err(StreamError::Release {
                    channel: 3,
                    code: 1,
                });
            }
            Ok(())
        }
    }

    fn counting() -> CountingChannel {
        CountingChannel {
            fetched: 0,
            released: 0,
            fail_release: false,
        }
    }

    #[test]
    fn payload_skips_offset() {
        let p = Packet::new(vec![0xAA, 0xBB, 0, 0, 0, 1, 0x65], 40).with_offset(2);
        assert_eq!(p.payload(), &[0, 0, 0, 1, 0x65]);
        let bad = Packet::new(vec![1, 2], 0).with_offset(5);
        assert!(bad.payload().is_empty());
    }

    #[test]
    fn frame_reports_first_packet_pts() {
        let frame = CodedFrame::new(vec![Packet::new(vec![1], 500), Packet::new(vec![2, 3], 500)]);
        assert_eq!(frame.pts_us(), 500);
        assert_eq!(frame.payload_len(), 3);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn guard_releases_once_on_explicit_release() {
        let mut ch = counting();
        let guard = FrameGuard::fetch(&mut ch, 2).unwrap();
        assert_eq!(guard.frame().len(), 2);
        guard.release().unwrap();
        assert_eq!((ch.fetched, ch.released), (1, 1));
    }

    #[test]
    fn guard_releases_once_on_drop() {
        let mut ch = counting();
        {
            let _guard = FrameGuard::fetch(&mut ch, 1).unwrap();
        }
        assert_eq!((ch.fetched, ch.released), (1, 1));
    }

    #[test]
    fn guard_reports_release_failure() {
        let mut ch = counting();
        ch.fail_release = true;
        let guard = FrameGuard::fetch(&mut ch, 1).unwrap();
        assert!(matches!(guard.release(), Err(StreamError::Release { .. })));
        assert_eq!(ch.released, 1);
    }
}
