use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use super::{ChannelId, CodedFrame, EncoderChannel, Packet, PollStatus};
use crate::error::{Result, StreamError};

/// Producer half of a [`PushChannel`].
///
/// Cloneable; the channel reports [`PollStatus::Exhausted`] once every sender
/// has been dropped and the queue is drained.
#[derive(Clone)]
pub struct PushSender {
    tx: SyncSender<Vec<Packet>>,
}

impl PushSender {
    /// Queue one frame, blocking while the queue is full.
    ///
    /// Returns the packets back if the channel has been dropped.
    pub fn send(&self, packets: Vec<Packet>) -> std::result::Result<(), Vec<Packet>> {
        self.tx.send(packets).map_err(|e| e.0)
    }

    /// Queue one frame without blocking.
    ///
    /// Returns the packets back if the queue is full or the channel is gone.
    pub fn try_send(&self, packets: Vec<Packet>) -> std::result::Result<(), Vec<Packet>> {
        self.tx.try_send(packets).map_err(|e| match e {
            TrySendError::Full(p) | TrySendError::Disconnected(p) => p,
        })
    }
}

/// Encoder channel fed by an in-process producer.
///
/// The queue is bounded: a producer that outruns the capture loop blocks (or
/// gets its frame back from [`PushSender::try_send`]) instead of growing
/// memory without limit.
pub struct PushChannel {
    id: ChannelId,
    rx: Receiver<Vec<Packet>>,
    /// Frame received by `poll`, waiting for `fetch`.
    ready: Option<Vec<Packet>>,
    outstanding: usize,
}

impl PushChannel {
    /// Create a channel holding at most `capacity` queued frames.
    pub fn new(id: ChannelId, capacity: usize) -> (PushSender, Self) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        let channel = Self {
            id,
            rx,
            ready: None,
            outstanding: 0,
        };
        (PushSender { tx }, channel)
    }

    /// Frames fetched but not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

impl EncoderChannel for PushChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn poll(&mut self, timeout: Duration) -> Result<PollStatus> {
        if self.ready.is_some() {
            return Ok(PollStatus::Ready);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(packets) => {
                self.ready = Some(packets);
                Ok(PollStatus::Ready)
            }
            Err(RecvTimeoutError::Timeout) => Ok(PollStatus::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Ok(PollStatus::Exhausted),
        }
    }

    fn query_pending(&mut self) -> Result<usize> {
        let pending = self.ready.as_ref().map_or(0, Vec::len);
        if pending == 0 {
            // An empty push is a wake-up without data.
            self.ready = None;
        }
        Ok(pending)
    }

    fn fetch(&mut self, count: usize) -> Result<CodedFrame> {
        let available = self.ready.as_ref().map_or(0, Vec::len);
        if count == 0 || count != available {
            return Err(StreamError::FrameMismatch {
                requested: count,
                available,
            });
        }
        let packets = self.ready.take().unwrap_or_default();
        self.outstanding += 1;
        Ok(CodedFrame::new(packets))
    }

    fn release(&mut self, frame: CodedFrame) -> Result<()> {
        drop(frame);
        self.outstanding = self.outstanding.saturating_sub(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(20);

    #[test]
    fn poll_times_out_when_idle() {
        let (_tx, mut ch) = PushChannel::new(0, 4);
        assert_eq!(ch.poll(WAIT).unwrap(), PollStatus::TimedOut);
    }

    #[test]
    fn frame_round_trip() {
        let (tx, mut ch) = PushChannel::new(0, 4);
        tx.send(vec![Packet::new(vec![1, 2], 10), Packet::new(vec![3], 10)])
            .unwrap();

        assert_eq!(ch.poll(WAIT).unwrap(), PollStatus::Ready);
        assert_eq!(ch.query_pending().unwrap(), 2);
        let frame = ch.fetch(2).unwrap();
        assert_eq!(frame.pts_us(), 10);
        assert_eq!(ch.outstanding(), 1);
        ch.release(frame).unwrap();
        assert_eq!(ch.outstanding(), 0);
    }

    #[test]
    fn empty_push_reports_zero_pending() {
        let (tx, mut ch) = PushChannel::new(0, 4);
        tx.send(Vec::new()).unwrap();
        assert_eq!(ch.poll(WAIT).unwrap(), PollStatus::Ready);
        assert_eq!(ch.query_pending().unwrap(), 0);
        assert_eq!(ch.poll(WAIT).unwrap(), PollStatus::TimedOut);
    }

    #[test]
    fn fetch_count_must_match() {
        let (tx, mut ch) = PushChannel::new(0, 4);
        tx.send(vec![Packet::new(vec![1], 0)]).unwrap();
        ch.poll(WAIT).unwrap();
        assert!(matches!(
            ch.fetch(3),
            Err(StreamError::FrameMismatch {
                requested: 3,
                available: 1
            })
        ));
    }

    #[test]
    fn exhausted_after_senders_drop() {
        let (tx, mut ch) = PushChannel::new(0, 4);
        drop(tx);
        assert_eq!(ch.poll(WAIT).unwrap(), PollStatus::Exhausted);
    }

    #[test]
    fn try_send_returns_frame_when_full() {
        let (tx, _ch) = PushChannel::new(0, 1);
        tx.try_send(vec![Packet::new(vec![1], 0)]).unwrap();
        let rejected = tx.try_send(vec![Packet::new(vec![2], 0)]).unwrap_err();
        assert_eq!(rejected[0].payload(), &[2]);
    }
}
