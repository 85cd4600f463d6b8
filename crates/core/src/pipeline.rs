//! Capture loop: drains the encoder channel into the configured sink.
//!
//! ```text
//! Initializing ──▶ Polling ◀──────────────┐
//!                    │  TimedOut ─────────┤
//!                    │  Ready             │
//!                    ▼                    │
//!                 Draining ── 0 pending ──┤
//!                    │  fetch / dispatch  │
//!                    │  / release ────────┘
//!                    ▼
//!              ShuttingDown ──▶ Stopped
//! ```
//!
//! The loop leaves Polling when the running flag is cleared, the channel is
//! exhausted, or a fatal (channel-class) error occurs. Frame and packet
//! failures are logged, counted and absorbed.

use std::net::SocketAddrV4;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::config::{OutputMode, StreamConfig};
use crate::error::{Result, StreamError};
use crate::media::{self, Packetizer};
use crate::sdp;
use crate::source::{ChannelId, CodedFrame, EncoderChannel, FrameGuard, PollStatus};
use crate::transport::{FileSink, Sink, UdpSink};

/// Cooperative stop signal shared between the control path and the worker.
///
/// Only ever read at loop iteration boundaries, so clearing it never
/// interrupts a frame in flight.
#[derive(Debug, Clone)]
pub struct PipelineControl {
    running: Arc<AtomicBool>,
    channel: ChannelId,
}

impl PipelineControl {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            channel,
        }
    }

    /// Ask the loop to stop after the current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }
}

/// Lifecycle state of a [`CaptureLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Polling,
    Draining,
    ShuttingDown,
    Stopped,
}

/// Counters kept by the capture loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames fully handed to the sink.
    pub frames_dispatched: u64,
    /// Frames lost to fetch or dispatch failures.
    pub frames_dropped: u64,
    /// Ready wake-ups that found nothing pending.
    pub empty_wakeups: u64,
    pub poll_timeouts: u64,
    pub packets_sent: u64,
    pub packet_failures: u64,
    pub bytes_written: u64,
}

/// Snapshot shared with the control path.
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub state: LoopState,
    pub stats: PipelineStats,
}

/// Sink plus, in RTP mode, the packetizer feeding it.
struct Output {
    sink: Box<dyn Sink>,
    packetizer: Option<Box<dyn Packetizer>>,
    sdp_version: u32,
}

impl Output {
    fn dispatch(
        &mut self,
        frame: &CodedFrame,
        stats: &mut PipelineStats,
        config: &StreamConfig,
    ) -> Result<()> {
        match self.packetizer.as_mut() {
            None => {
                for packet in frame.packets() {
                    let n = self.sink.write(packet.payload())?;
                    stats.bytes_written += n as u64;
                }
            }
            Some(packetizer) => {
                let had_parameter_sets = packetizer.has_parameter_sets();
                for rtp in packetizer.packetize(frame) {
                    match self.sink.write(&rtp) {
                        Ok(n) => {
                            stats.packets_sent += 1;
                            stats.bytes_written += n as u64;
                        }
                        Err(e) => {
                            stats.packet_failures += 1;
                            tracing::warn!(error = %e, "RTP packet dropped");
                        }
                    }
                }
                if !had_parameter_sets && packetizer.has_parameter_sets() {
                    tracing::info!("parameter sets captured");
                    self.refresh_sdp(config);
                }
            }
        }
        Ok(())
    }

    /// Rewrite the session description, if one is configured.
    fn refresh_sdp(&mut self, config: &StreamConfig) {
        if let Err(e) = self.write_sdp(config) {
            tracing::warn!(error = %e, "session description not updated");
        }
    }

    fn write_sdp(&mut self, config: &StreamConfig) -> Result<()> {
        let (Some(path), Some(packetizer)) = (config.sdp_path.as_deref(), &self.packetizer) else {
            return Ok(());
        };
        self.sdp_version += 1;
        sdp::write_sdp(path, config, packetizer.as_ref(), self.sdp_version)
    }
}

/// The capture loop for one encoder channel.
///
/// Built by [`open`](Self::open) (the Initializing phase) and consumed by
/// [`run`](Self::run).
pub struct CaptureLoop<C: EncoderChannel> {
    config: StreamConfig,
    channel: C,
    control: PipelineControl,
    output: Output,
    stats: PipelineStats,
    status: Arc<RwLock<PipelineStatus>>,
}

impl<C: EncoderChannel> CaptureLoop<C> {
    /// Resolve the output mode, open the sink and build the packetizer.
    ///
    /// Every error returned here is a startup failure.
    pub fn open(config: StreamConfig, channel: C, control: PipelineControl) -> Result<Self> {
        config.validate()?;
        let sink: Box<dyn Sink> = match config.mode {
            OutputMode::File => {
                let name = config.output_file_name(chrono::Local::now());
                Box::new(FileSink::create(config.output_dir.join(name))?)
            }
            OutputMode::Rtp => Box::new(UdpSink::bind(SocketAddrV4::new(
                config.destination,
                config.port,
            ))?),
        };
        Self::with_sink(config, channel, control, sink)
    }

    /// Like [`open`](Self::open) but writing to a caller-supplied sink.
    pub fn with_sink(
        config: StreamConfig,
        channel: C,
        control: PipelineControl,
        sink: Box<dyn Sink>,
    ) -> Result<Self> {
        config.validate()?;
        let packetizer = match config.mode {
            OutputMode::File => None,
            OutputMode::Rtp => Some(media::packetizer_for(
                config.codec,
                config.mtu,
                config.aggregation,
            )),
        };

        tracing::info!(
            channel = channel.id(),
            mode = %config.mode,
            codec = %config.codec,
            size = %config.frame_size,
            fps = config.frame_rate,
            kbps = config.bit_rate,
            output = %sink.describe(),
            "capture loop initialized"
        );
        if let Some(p) = &packetizer {
            tracing::info!(
                pt = p.payload_type(),
                ssrc = format_args!("{:#010X}", p.ssrc()),
                mtu = config.mtu,
                aggregation = config.aggregation,
                "RTP session"
            );
        }

        let mut output = Output {
            sink,
            packetizer,
            sdp_version: 0,
        };
        output.write_sdp(&config)?;

        Ok(Self {
            config,
            channel,
            control,
            output,
            stats: PipelineStats::default(),
            status: Arc::new(RwLock::new(PipelineStatus {
                state: LoopState::Initializing,
                stats: PipelineStats::default(),
            })),
        })
    }

    /// Shared view of the loop's state and counters.
    pub fn status(&self) -> Arc<RwLock<PipelineStatus>> {
        self.status.clone()
    }

    pub fn control(&self) -> &PipelineControl {
        &self.control
    }

    /// Path of the session description, if one is being maintained.
    pub fn sdp_path(&self) -> Option<&Path> {
        self.config.sdp_path.as_deref()
    }

    fn set_state(&self, state: LoopState) {
        let mut status = self.status.write();
        status.state = state;
        status.stats = self.stats.clone();
    }

    /// Drive the loop until stopped, exhausted or failed.
    ///
    /// Returns the final counters, or the fatal error that ended the loop.
    pub fn run(mut self) -> Result<PipelineStats> {
        let channel = self.channel.id();
        tracing::info!(channel, "capture loop started");

        let mut fatal = None;
        loop {
            self.set_state(LoopState::Polling);
            if !self.control.is_running() {
                break;
            }

            match self.channel.poll(self.config.poll_timeout) {
                Ok(_) if !self.control.is_running() => {
                    tracing::debug!(channel, "stop requested while polling");
                    break;
                }
                Ok(PollStatus::TimedOut) => {
                    self.stats.poll_timeouts += 1;
                    tracing::trace!(channel, "poll timed out");
                    continue;
                }
                Ok(PollStatus::Exhausted) => {
                    tracing::info!(channel, "encoder channel exhausted");
                    break;
                }
                Ok(PollStatus::Ready) => {}
                Err(e) => {
                    tracing::error!(channel, error = %e, "encoder poll failed");
                    fatal = Some(e);
                    break;
                }
            }

            self.set_state(LoopState::Draining);
            if let Err(e) = self.drain() {
                if e.is_fatal() {
                    tracing::error!(channel, error = %e, "encoder channel failed");
                    fatal = Some(e);
                    break;
                }
                self.stats.frames_dropped += 1;
                tracing::warn!(channel, error = %e, "frame dropped");
            }
        }

        self.shutdown(fatal)
    }

    /// Fetch, dispatch and release whatever the channel has pending.
    fn drain(&mut self) -> Result<()> {
        let pending = self.channel.query_pending()?;
        if pending == 0 {
            self.stats.empty_wakeups += 1;
            tracing::trace!(channel = self.channel.id(), "no packets pending");
            return Ok(());
        }

        let guard = FrameGuard::fetch(&mut self.channel, pending)?;
        let frame = guard.frame();
        tracing::debug!(
            packets = frame.len(),
            bytes = frame.payload_len(),
            pts_us = frame.pts_us(),
            "frame fetched"
        );

        let dispatched = self
            .output
            .dispatch(frame, &mut self.stats, &self.config);
        guard.release()?;
        dispatched?;

        self.stats.frames_dispatched += 1;
        Ok(())
    }

    fn shutdown(mut self, fatal: Option<StreamError>) -> Result<PipelineStats> {
        self.set_state(LoopState::ShuttingDown);
        self.control.stop();

        if let Err(e) = self.output.sink.close() {
            tracing::warn!(error = %e, "closing output failed");
        }
        self.output.refresh_sdp(&self.config);

        let s = &self.stats;
        tracing::info!(
            channel = self.channel.id(),
            frames = s.frames_dispatched,
            dropped = s.frames_dropped,
            empty_wakeups = s.empty_wakeups,
            timeouts = s.poll_timeouts,
            packets = s.packets_sent,
            packet_failures = s.packet_failures,
            bytes = s.bytes_written,
            "capture loop stopped"
        );
        self.set_state(LoopState::Stopped);

        match fatal {
            Some(e) => Err(e),
            None => Ok(self.stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Codec;
    use crate::media::rtp::ParsedHeader;
    use crate::source::Packet;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Default)]
    struct Calls {
        polls: usize,
        fetched: usize,
        released: usize,
    }

    /// Channel that replays a fixed script and exhausts afterwards.
    struct ScriptedChannel {
        polls: VecDeque<Result<PollStatus>>,
        frames: VecDeque<Vec<Packet>>,
        fail_fetch: bool,
        fail_release: bool,
        calls: Arc<Mutex<Calls>>,
        staged: usize,
    }

    impl ScriptedChannel {
        fn new(polls: Vec<Result<PollStatus>>, frames: Vec<Vec<Packet>>) -> Self {
            Self {
                polls: polls.into(),
                frames: frames.into(),
                fail_fetch: false,
                fail_release: false,
                calls: Arc::default(),
                staged: 0,
            }
        }
    }

    impl EncoderChannel for ScriptedChannel {
        fn id(&self) -> ChannelId {
            0
        }

        fn poll(&mut self, _timeout: Duration) -> Result<PollStatus> {
            self.calls.lock().polls += 1;
            self.polls.pop_front().unwrap_or(Ok(PollStatus::Exhausted))
        }

        fn query_pending(&mut self) -> Result<usize> {
            let frame = self.frames.pop_front().unwrap_or_default();
            self.staged = frame.len();
            if !frame.is_empty() {
                self.frames.push_front(frame);
            }
            Ok(self.staged)
        }

        fn fetch(&mut self, count: usize) -> Result<CodedFrame> {
            if self.fail_fetch {
                self.frames.pop_front();
                return Err(StreamError::Fetch { code: 0xa00e });
            }
            assert_eq!(count, self.staged);
            self.calls.lock().fetched += 1;
            Ok(CodedFrame::new(self.frames.pop_front().unwrap_or_default()))
        }

        fn release(&mut self, _frame: CodedFrame) -> Result<()> {
            self.calls.lock().released += 1;
            if self.fail_release {
                return Err(StreamError::Release {
                    channel: 0,
                    code: 0xa012,
                });
            }
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        closed: Arc<AtomicBool>,
        fail: bool,
    }

    impl Sink for RecordingSink {
        fn write(&mut self, data: &[u8]) -> Result<usize> {
            if self.fail {
                return Err(StreamError::Write(std::io::Error::other("disk full")));
            }
            self.writes.lock().push(data.to_vec());
            Ok(data.len())
        }

        fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn describe(&self) -> String {
            "memory".into()
        }
    }

    fn nal(pts: u64, bytes: &[u8]) -> Packet {
        Packet::new([&[0u8, 0, 0, 1][..], bytes].concat(), pts)
    }

    fn run_loop(
        config: StreamConfig,
        channel: ScriptedChannel,
        sink: RecordingSink,
    ) -> Result<PipelineStats> {
        CaptureLoop::with_sink(config, channel, PipelineControl::new(0), Box::new(sink))
            .unwrap()
            .run()
    }

    #[test]
    fn zero_pending_never_fetches_or_writes() {
        let channel = ScriptedChannel::new(
            vec![Ok(PollStatus::Ready), Ok(PollStatus::Ready)],
            Vec::new(),
        );
        let calls = channel.calls.clone();
        let sink = RecordingSink::default();

        let stats = run_loop(StreamConfig::default(), channel, sink.clone()).unwrap();
        assert_eq!(stats.empty_wakeups, 2);
        assert_eq!(stats.frames_dispatched, 0);
        assert_eq!(calls.lock().fetched, 0);
        assert!(sink.writes.lock().is_empty());
        assert!(sink.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn file_mode_writes_payloads_and_releases_each_frame() {
        let channel = ScriptedChannel::new(
            vec![
                Ok(PollStatus::Ready),
                Ok(PollStatus::TimedOut),
                Ok(PollStatus::Ready),
            ],
            vec![
                vec![nal(0, &[0x67, 1]), nal(0, &[0x65, 2])],
                vec![nal(41_666, &[0x41, 3])],
            ],
        );
        let calls = channel.calls.clone();
        let sink = RecordingSink::default();

        let stats = run_loop(StreamConfig::default(), channel, sink.clone()).unwrap();
        assert_eq!(stats.frames_dispatched, 2);
        assert_eq!(stats.poll_timeouts, 1);
        assert_eq!(stats.bytes_written, 18);
        assert_eq!(
            *sink.writes.lock(),
            vec![
                vec![0, 0, 0, 1, 0x67, 1],
                vec![0, 0, 0, 1, 0x65, 2],
                vec![0, 0, 0, 1, 0x41, 3],
            ]
        );
        let calls = calls.lock();
        assert_eq!((calls.fetched, calls.released), (2, 2));
    }

    #[test]
    fn dispatch_failure_still_releases_once() {
        let channel = ScriptedChannel::new(
            vec![Ok(PollStatus::Ready)],
            vec![vec![nal(0, &[0x65, 1])]],
        );
        let calls = channel.calls.clone();
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };

        let stats = run_loop(StreamConfig::default(), channel, sink).unwrap();
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.frames_dispatched, 0);
        let calls = calls.lock();
        assert_eq!((calls.fetched, calls.released), (1, 1));
    }

    #[test]
    fn fetch_failure_is_absorbed() {
        let mut channel = ScriptedChannel::new(
            vec![Ok(PollStatus::Ready)],
            vec![vec![nal(0, &[0x65, 1])]],
        );
        channel.fail_fetch = true;
        let calls = channel.calls.clone();

        let stats = run_loop(StreamConfig::default(), channel, RecordingSink::default()).unwrap();
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(calls.lock().released, 0);
        assert_eq!(calls.lock().polls, 2, "loop kept polling after the failure");
    }

    #[test]
    fn channel_failure_is_fatal() {
        let channel = ScriptedChannel::new(
            vec![
                Err(StreamError::Channel {
                    channel: 0,
                    code: 0xa008,
                }),
                Ok(PollStatus::Ready),
            ],
            Vec::new(),
        );
        let calls = channel.calls.clone();
        let sink = RecordingSink::default();

        let err = run_loop(StreamConfig::default(), channel, sink.clone()).unwrap_err();
        assert!(matches!(err, StreamError::Channel { code: 0xa008, .. }));
        assert_eq!(calls.lock().polls, 1);
        assert!(sink.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn release_failure_is_fatal() {
        let mut channel = ScriptedChannel::new(
            vec![Ok(PollStatus::Ready), Ok(PollStatus::Ready)],
            vec![vec![nal(0, &[0x65, 1])], vec![nal(1, &[0x41, 2])]],
        );
        channel.fail_release = true;
        let calls = channel.calls.clone();

        let err = run_loop(StreamConfig::default(), channel, RecordingSink::default()).unwrap_err();
        assert!(matches!(err, StreamError::Release { .. }));
        let calls = calls.lock();
        assert_eq!((calls.fetched, calls.released), (1, 1));
    }

    #[test]
    fn cleared_flag_stops_before_polling() {
        let channel = ScriptedChannel::new(vec![Ok(PollStatus::Ready)], Vec::new());
        let calls = channel.calls.clone();
        let control = PipelineControl::new(0);
        control.stop();

        let capture = CaptureLoop::with_sink(
            StreamConfig::default(),
            channel,
            control,
            Box::new(RecordingSink::default()),
        )
        .unwrap();
        let status = capture.status();
        assert_eq!(status.read().state, LoopState::Initializing);

        let stats = capture.run().unwrap();
        assert_eq!(stats, PipelineStats::default());
        assert_eq!(calls.lock().polls, 0);
        assert_eq!(status.read().state, LoopState::Stopped);
    }

    #[test]
    fn rtp_mode_packetizes_with_continuous_sequence() {
        let config = StreamConfig {
            mode: OutputMode::Rtp,
            codec: Codec::H264,
            aggregation: false,
            ..StreamConfig::default()
        };
        let channel = ScriptedChannel::new(
            vec![Ok(PollStatus::Ready), Ok(PollStatus::Ready)],
            vec![
                vec![nal(0, &[0x67, 0x42, 0, 0x1e]), nal(0, &[0x65, 1])],
                vec![nal(1_000_000, &[0x41, 2])],
            ],
        );
        let sink = RecordingSink::default();

        let stats = run_loop(config, channel, sink.clone()).unwrap();
        assert_eq!(stats.packets_sent, 3);
        assert_eq!(stats.frames_dispatched, 2);

        let headers: Vec<_> = sink
            .writes
            .lock()
            .iter()
            .map(|p| ParsedHeader::parse(p).unwrap())
            .collect();
        assert_eq!(
            headers.iter().map(|h| h.sequence).collect::<Vec<_>>(),
            [0, 1, 2]
        );
        assert_eq!(
            headers.iter().map(|h| h.marker).collect::<Vec<_>>(),
            [false, true, true]
        );
        assert_eq!(headers[2].timestamp, 90_000);
        assert!(headers.iter().all(|h| h.payload_type == 96));
    }

    #[test]
    fn rtp_send_failures_are_counted_per_packet() {
        let config = StreamConfig {
            mode: OutputMode::Rtp,
            ..StreamConfig::default()
        };
        let channel = ScriptedChannel::new(
            vec![Ok(PollStatus::Ready)],
            vec![vec![nal(0, &[0x65, 1])]],
        );
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };

        let stats = run_loop(config, channel, sink).unwrap();
        assert_eq!(stats.packet_failures, 1);
        assert_eq!(stats.frames_dispatched, 1);
    }

    #[test]
    fn sdp_rewritten_once_parameter_sets_appear() {
        let dir = tempfile::tempdir().unwrap();
        let sdp_path = dir.path().join("stream.sdp");
        let config = StreamConfig {
            mode: OutputMode::Rtp,
            sdp_path: Some(sdp_path.clone()),
            ..StreamConfig::default()
        };
        let channel = ScriptedChannel::new(
            vec![Ok(PollStatus::Ready)],
            vec![vec![
                nal(0, &[0x67, 0x42, 0x00, 0x1e]),
                nal(0, &[0x68, 0xce, 0x38, 0x80]),
                nal(0, &[0x65, 0x88]),
            ]],
        );

        let capture = CaptureLoop::with_sink(
            config,
            channel,
            PipelineControl::new(0),
            Box::new(RecordingSink::default()),
        )
        .unwrap();
        let initial = std::fs::read_to_string(&sdp_path).unwrap();
        assert!(initial.contains("a=fmtp:96 packetization-mode=1\r\n"));

        capture.run().unwrap();
        let text = std::fs::read_to_string(&sdp_path).unwrap();
        assert!(text.contains("sprop-parameter-sets=Z0IAHg==,aM44gA=="));
        assert!(text.contains("profile-level-id=42001e"));
    }

    #[test]
    fn open_rejects_unwritable_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = StreamConfig {
            output_dir: dir.path().join("missing"),
            ..StreamConfig::default()
        };
        let channel = ScriptedChannel::new(Vec::new(), Vec::new());
        let result = CaptureLoop::open(config, channel, PipelineControl::new(0));
        assert!(matches!(result, Err(StreamError::OpenOutput { .. })));
    }
}
