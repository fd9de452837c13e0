//! The per-session capture loop.
//!
//! `StreamPump` drives one `FrameSource` through the pipeline into a
//! `FrameSink`:
//!
//! ```text
//! Starting -> Streaming -> Closing -> Closed
//! ```
//!
//! Per-frame failures (`CaptureFailed`, `InferenceError`, `EncodeError`) are
//! logged and the loop moves on to the next frame. The loop ends on
//! end-of-stream, a failed push, device loss, the shutdown flag, or a panic in
//! one of the stages. Every one of those paths closes the source.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::multipart::FrameSink;
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::{Capture, FrameSource};
use crate::pipeline::{InferenceFailurePolicy, Pipeline};

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Streaming,
    Closing,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    EndOfStream,
    ClientDisconnected,
    DeviceLost,
    Shutdown,
    /// A stage panicked.
    Fault,
    StartFailed,
}

#[derive(Clone, Debug)]
pub struct PumpSettings {
    /// Minimum spacing between two successful pushes.
    pub min_frame_interval: Duration,
    pub on_inference_error: InferenceFailurePolicy,
    /// Consecutive `CaptureFailed` reads after which the device counts as lost.
    /// 0 retries forever.
    pub max_capture_failures: u32,
    pub capture_retry_delay: Duration,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            min_frame_interval: Duration::from_millis(33),
            on_inference_error: InferenceFailurePolicy::SkipFrame,
            max_capture_failures: 50,
            capture_retry_delay: Duration::from_millis(100),
        }
    }
}

/// Session summary, logged when the pump closes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PumpReport {
    pub frames_sent: u64,
    pub frames_skipped: u64,
    pub capture_failures: u64,
    pub inference_failures: u64,
    pub encode_failures: u64,
    pub exit: ExitReason,
}

impl PumpReport {
    fn new() -> Self {
        Self {
            frames_sent: 0,
            frames_skipped: 0,
            capture_failures: 0,
            inference_failures: 0,
            encode_failures: 0,
            exit: ExitReason::StartFailed,
        }
    }
}

pub struct StreamPump<S: FrameSource> {
    source: S,
    pipeline: Arc<Pipeline>,
    settings: PumpSettings,
    shutdown: Arc<AtomicBool>,
    state: SessionState,
}

impl<S: FrameSource> StreamPump<S> {
    pub fn new(
        source: S,
        pipeline: Arc<Pipeline>,
        settings: PumpSettings,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            pipeline,
            settings,
            shutdown,
            state: SessionState::Starting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Open the source. On failure the pump is already `Closed` when this
    /// returns and the error is the one to report to the client.
    pub fn start(&mut self) -> PipelineResult<()> {
        match self.state {
            SessionState::Streaming => return Ok(()),
            SessionState::Starting => {}
            SessionState::Closing | SessionState::Closed => {
                return Err(PipelineError::DeviceUnavailable(format!(
                    "session on {} already closed",
                    self.source.describe()
                )))
            }
        }
        match self.source.open() {
            Ok(()) => {
                self.state = SessionState::Streaming;
                log::info!("stream session started on {}", self.source.describe());
                Ok(())
            }
            Err(err) => {
                log::warn!("stream session on {} failed to start: {}", self.source.describe(), err);
                self.close_source();
                Err(err)
            }
        }
    }

    /// Stream until the session ends. Calls `start` first when needed.
    /// The source is closed and the state is `Closed` on return.
    pub fn run<K: FrameSink + ?Sized>(&mut self, sink: &mut K) -> PumpReport {
        let mut report = PumpReport::new();
        if self.start().is_err() {
            return report;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.stream_loop(sink, &mut report)));
        report.exit = match outcome {
            Ok(exit) => exit,
            Err(_) => {
                log::error!(
                    "stream session on {} aborted by a panic in the pipeline",
                    self.source.describe()
                );
                ExitReason::Fault
            }
        };
        self.close_source();
        log::info!(
            "stream session on {} closed: exit={:?} sent={} skipped={} capture_failures={} inference_failures={} encode_failures={}",
            self.source.describe(),
            report.exit,
            report.frames_sent,
            report.frames_skipped,
            report.capture_failures,
            report.inference_failures,
            report.encode_failures
        );
        report
    }

    fn stream_loop<K: FrameSink + ?Sized>(&mut self, sink: &mut K, report: &mut PumpReport) -> ExitReason {
        let mut last_push: Option<Instant> = None;
        let mut consecutive_capture_failures = 0u32;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return ExitReason::Shutdown;
            }
            if sink.is_closed() {
                return ExitReason::ClientDisconnected;
            }

            let frame = match self.source.next_frame() {
                Ok(Capture::Frame(frame)) => {
                    consecutive_capture_failures = 0;
                    frame
                }
                Ok(Capture::EndOfStream) => return ExitReason::EndOfStream,
                Err(PipelineError::CaptureFailed(msg)) => {
                    report.capture_failures += 1;
                    consecutive_capture_failures += 1;
                    log::warn!("capture failed ({} in a row): {}", consecutive_capture_failures, msg);
                    let limit = self.settings.max_capture_failures;
                    if limit > 0 && consecutive_capture_failures >= limit {
                        log::error!("{} lost after {} failed reads", self.source.describe(), limit);
                        return ExitReason::DeviceLost;
                    }
                    if !self.pause(self.settings.capture_retry_delay) {
                        return ExitReason::Shutdown;
                    }
                    continue;
                }
                Err(err) => {
                    log::error!("{} lost: {}", self.source.describe(), err);
                    return ExitReason::DeviceLost;
                }
            };

            let encoded = match self.pipeline.detect(&frame) {
                Ok(detections) => self.pipeline.render(frame, &detections),
                Err(err) => {
                    report.inference_failures += 1;
                    match self.settings.on_inference_error {
                        InferenceFailurePolicy::SkipFrame => {
                            log::warn!("frame {} skipped: {}", frame.sequence(), err);
                            report.frames_skipped += 1;
                            continue;
                        }
                        InferenceFailurePolicy::StreamRaw => {
                            log::warn!("frame {} sent unannotated: {}", frame.sequence(), err);
                            self.pipeline.render_raw(frame)
                        }
                    }
                }
            };
            let encoded = match encoded {
                Ok(encoded) => encoded,
                Err(err) => {
                    report.encode_failures += 1;
                    report.frames_skipped += 1;
                    log::warn!("frame skipped: {}", err);
                    continue;
                }
            };

            if let Some(last) = last_push {
                let elapsed = last.elapsed();
                if elapsed < self.settings.min_frame_interval
                    && !self.pause(self.settings.min_frame_interval - elapsed)
                {
                    return ExitReason::Shutdown;
                }
            }

            if sink.push(&encoded).is_err() {
                return ExitReason::ClientDisconnected;
            }
            report.frames_sent += 1;
            last_push = Some(Instant::now());
        }
    }

    /// Sleep that wakes early on shutdown. Returns false when shutting down.
    fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }

    fn close_source(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        self.source.close();
        self.state = SessionState::Closed;
    }
}

impl<S: FrameSource> Drop for StreamPump<S> {
    fn drop(&mut self) {
        self.close_source();
    }
}
