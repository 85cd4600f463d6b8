use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::{ChannelId, CodedFrame, EncoderChannel, Packet, PollStatus};
use crate::config::Codec;
use crate::error::{Result, StreamError};
use crate::media::nal::{self, NalKind, NalRange};

/// Encoder channel that replays an Annex B elementary stream.
///
/// The file is split into access units up front. Each access unit becomes one
/// frame whose packets are its NAL units, start codes included, the way a
/// hardware encoder lays out its packet array. Frames become available at the
/// configured frame rate and are stamped `n * 1_000_000 / fps` µs.
pub struct ReplayChannel {
    id: ChannelId,
    data: Bytes,
    access_units: Vec<Vec<NalRange>>,
    interval: Duration,
    frame_rate: u32,
    looping: bool,
    /// Index of the next access unit to stage.
    cursor: usize,
    /// Frames staged so far; drives timestamps and pacing.
    frames_emitted: u64,
    started: Option<Instant>,
    staged: Option<usize>,
    outstanding: usize,
}

impl ReplayChannel {
    /// Load `path` for replay at `frame_rate` fps.
    pub fn open(path: impl AsRef<Path>, codec: Codec, frame_rate: u32) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        tracing::info!(path = %path.display(), bytes = data.len(), %codec, "replay input loaded");
        Self::from_bytes(data, codec, frame_rate)
    }

    /// Replay an in-memory Annex B stream.
    pub fn from_bytes(data: impl Into<Bytes>, codec: Codec, frame_rate: u32) -> Result<Self> {
        let data = data.into();
        if frame_rate == 0 {
            return Err(StreamError::InvalidConfig("replay frame rate must be > 0".into()));
        }

        let access_units = group_access_units(codec, &data);
        if access_units.is_empty() {
            return Err(StreamError::InvalidConfig(
                "replay input holds no NAL units".into(),
            ));
        }
        tracing::debug!(access_units = access_units.len(), "replay input indexed");

        Ok(Self {
            id: 0,
            data,
            access_units,
            interval: Duration::from_secs(1) / frame_rate,
            frame_rate,
            looping: false,
            cursor: 0,
            frames_emitted: 0,
            started: None,
            staged: None,
            outstanding: 0,
        })
    }

    /// Restart from the first access unit instead of reporting exhaustion.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_id(mut self, id: ChannelId) -> Self {
        self.id = id;
        self
    }

    /// Number of access units found in the input.
    pub fn access_unit_count(&self) -> usize {
        self.access_units.len()
    }

    /// Frames fetched but not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    fn pts_us(&self, frame: u64) -> u64 {
        frame * 1_000_000 / self.frame_rate as u64
    }
}

impl EncoderChannel for ReplayChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn poll(&mut self, timeout: Duration) -> Result<PollStatus> {
        if self.staged.is_some() {
            return Ok(PollStatus::Ready);
        }

        if self.cursor >= self.access_units.len() {
            if !self.looping {
                return Ok(PollStatus::Exhausted);
            }
            self.cursor = 0;
        }

        let started = *self.started.get_or_insert_with(Instant::now);
        let due = started + self.interval * self.frames_emitted as u32;
        let now = Instant::now();
        if due > now {
            let wait = due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(PollStatus::TimedOut);
            }
            thread::sleep(wait);
        }

        self.staged = Some(self.cursor);
        self.cursor += 1;
        Ok(PollStatus::Ready)
    }

    fn query_pending(&mut self) -> Result<usize> {
        Ok(self.staged.map_or(0, |au| self.access_units[au].len()))
    }

    fn fetch(&mut self, count: usize) -> Result<CodedFrame> {
        let available = self.query_pending()?;
        let Some(au) = self.staged.filter(|_| count == available && count > 0) else {
            return Err(StreamError::FrameMismatch {
                requested: count,
                available,
            });
        };

        let pts = self.pts_us(self.frames_emitted);
        let packets = self.access_units[au]
            .iter()
            .map(|r| Packet::new(self.data.slice(r.start_code..r.end), pts))
            .collect();

        self.staged = None;
        self.frames_emitted += 1;
        self.outstanding += 1;
        Ok(CodedFrame::new(packets))
    }

    fn release(&mut self, frame: CodedFrame) -> Result<()> {
        drop(frame);
        self.outstanding = self.outstanding.saturating_sub(1);
        Ok(())
    }
}

/// Group the NAL units of an Annex B stream into access units.
///
/// A new access unit starts at a delimiter, parameter set or prefix SEI that
/// follows a slice, or at a slice flagged as first in its picture that follows
/// another slice.
pub fn group_access_units(codec: Codec, data: &[u8]) -> Vec<Vec<NalRange>> {
    let mut units = Vec::new();
    let mut current: Vec<NalRange> = Vec::new();
    let mut seen_slice = false;

    for range in nal::find_nal_units(data) {
        let kind = nal::classify(codec, &data[range.start..range.end]);
        let starts_new = match kind {
            NalKind::Delimiter | NalKind::ParameterSet | NalKind::Sei => seen_slice,
            NalKind::Slice { first_in_picture } => seen_slice && first_in_picture,
            NalKind::Other => false,
        };

        if starts_new && !current.is_empty() {
            units.push(std::mem::take(&mut current));
            seen_slice = false;
        }
        if matches!(kind, NalKind::Slice { .. }) {
            seen_slice = true;
        }
        current.push(range);
    }

    if !current.is_empty() {
        units.push(current);
    }
    units
}
