use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::pipeline::{CaptureLoop, LoopState, PipelineControl, PipelineStats, PipelineStatus};
use crate::source::EncoderChannel;

/// High-level pipeline orchestrator.
///
/// Runs the [`CaptureLoop`] for one encoder channel on a dedicated worker
/// thread. Startup happens on the caller's thread so that a missing output
/// directory or an unbindable socket is reported by [`start`](Self::start)
/// itself; everything after that is reported by [`join`](Self::join).
pub struct Streamer {
    config: StreamConfig,
    control: Option<PipelineControl>,
    status: Option<Arc<RwLock<PipelineStatus>>>,
    worker: Option<JoinHandle<Result<PipelineStats>>>,
}

impl Streamer {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            control: None,
            status: None,
            worker: None,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Initialize the pipeline for `channel` and start the worker.
    pub fn start<C>(&mut self, channel: C) -> Result<()>
    where
        C: EncoderChannel + 'static,
    {
        if self.worker.is_some() {
            return Err(StreamError::AlreadyRunning);
        }

        let channel_id = channel.id();
        let control = PipelineControl::new(channel_id);
        let capture = CaptureLoop::open(self.config.clone(), channel, control.clone())?;
        let status = capture.status();

        let worker = thread::Builder::new()
            .name(format!("capture-{}", channel_id))
            .spawn(move || capture.run())?;

        tracing::info!(channel = channel_id, "streamer started");

        self.control = Some(control);
        self.status = Some(status);
        self.worker = Some(worker);
        Ok(())
    }

    /// Request a cooperative stop. Returns immediately.
    pub fn stop(&self) {
        if let Some(control) = &self.control {
            control.stop();
            tracing::info!(channel = control.channel(), "streamer stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.control.as_ref().is_some_and(|c| c.is_running()) && !self.is_finished()
    }

    /// Whether the worker has returned (stopped, exhausted or failed).
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.is_finished())
    }

    /// Current loop state, or `None` before the first start.
    pub fn state(&self) -> Option<LoopState> {
        self.status.as_ref().map(|s| s.read().state)
    }

    /// Counters as of the last loop state change.
    pub fn stats(&self) -> PipelineStats {
        self.status
            .as_ref()
            .map(|s| s.read().stats.clone())
            .unwrap_or_default()
    }

    /// Wait for the worker and collect its outcome.
    pub fn join(&mut self) -> Result<PipelineStats> {
        let worker = self.worker.take().ok_or(StreamError::NotStarted)?;
        worker.join().map_err(|_| StreamError::WorkerPanicked)?
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
            if let Err(e) = self.join() {
                tracing::warn!(error = %e, "capture worker ended with an error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PushChannel;
    use std::time::Duration;

    fn file_config(dir: &std::path::Path) -> StreamConfig {
        StreamConfig {
            output_dir: dir.to_path_buf(),
            poll_timeout: Duration::from_millis(20),
            ..StreamConfig::default()
        }
    }

    #[test]
    fn join_before_start_is_not_started() {
        let mut streamer = Streamer::new(StreamConfig::default());
        assert!(matches!(streamer.join(), Err(StreamError::NotStarted)));
        assert!(!streamer.is_running());
        assert_eq!(streamer.state(), None);
    }

    #[test]
    fn second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut streamer = Streamer::new(file_config(dir.path()));
        let (_tx, channel) = PushChannel::new(0, 4);
        streamer.start(channel).unwrap();

        let (_tx2, other) = PushChannel::new(1, 4);
        assert!(matches!(
            streamer.start(other),
            Err(StreamError::AlreadyRunning)
        ));

        streamer.stop();
        streamer.join().unwrap();
    }

    #[test]
    fn startup_failure_reported_by_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut streamer = Streamer::new(file_config(&dir.path().join("nope")));
        let (_tx, channel) = PushChannel::new(0, 4);
        assert!(matches!(
            streamer.start(channel),
            Err(StreamError::OpenOutput { .. })
        ));
        assert!(matches!(streamer.join(), Err(StreamError::NotStarted)));
    }

    #[test]
    fn stop_then_join_returns_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut streamer = Streamer::new(file_config(dir.path()));
        let (_tx, channel) = PushChannel::new(0, 4);
        streamer.start(channel).unwrap();
        assert!(streamer.is_running());

        streamer.stop();
        let stats = streamer.join().unwrap();
        assert_eq!(stats.frames_dispatched, 0);
        assert_eq!(streamer.state(), Some(LoopState::Stopped));
        assert!(!streamer.is_running());
    }
}
