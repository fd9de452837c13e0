//! Deterministic sources and detectors for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::device::{DeviceClaim, DeviceLock};
use super::{Capture, FrameSource};
use crate::detect::{Detector, DetectionSet};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

#[derive(Clone, Copy, Debug)]
pub(crate) enum Step {
    Frame,
    /// A frame wider than a JPEG can describe.
    Oversized,
    CaptureFailed,
    Lost,
    End,
}

/// Open/release bookkeeping shared between a test and its source.
#[derive(Clone, Debug, Default)]
pub(crate) struct Counters {
    opens: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl Counters {
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Replays a fixed list of steps. Once the script runs out it keeps
/// returning `EndOfStream`.
pub(crate) struct ScriptedSource {
    script: VecDeque<Step>,
    counters: Counters,
    fail_open: bool,
    is_open: bool,
    sequence: u64,
    device: Option<DeviceLock>,
    claim: Option<DeviceClaim>,
    close_delay: Duration,
}

impl ScriptedSource {
    pub(crate) fn new(script: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: script.into_iter().collect(),
            counters: Counters::default(),
            fail_open: false,
            is_open: false,
            sequence: 0,
            device: None,
            claim: None,
            close_delay: Duration::ZERO,
        }
    }

    pub(crate) fn frames(n: usize) -> Self {
        Self::new(std::iter::repeat(Step::Frame).take(n).chain([Step::End]))
    }

    pub(crate) fn failing_open() -> Self {
        let mut source = Self::new([]);
        source.fail_open = true;
        source
    }

    pub(crate) fn counters(&self) -> Counters {
        self.counters.clone()
    }

    /// Report opens and releases into an existing set of counters.
    pub(crate) fn sharing(mut self, counters: &Counters) -> Self {
        self.counters = counters.clone();
        self
    }

    /// Hold `device` while open, like a real camera would.
    pub(crate) fn claiming(mut self, device: &DeviceLock) -> Self {
        self.device = Some(device.clone());
        self
    }

    /// Keep the device for `delay` inside `close` before letting go.
    pub(crate) fn slow_close(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }
}

/// Past the 65535-pixel limit of JPEG frame headers.
pub(crate) const OVERSIZED_WIDTH: u32 = 70_000;

pub(crate) fn test_frame(sequence: u64) -> Frame {
    Frame::from_image(image::RgbImage::from_pixel(32, 24, image::Rgb([90, 90, 90])), sequence)
}

impl FrameSource for ScriptedSource {
    fn open(&mut self) -> PipelineResult<()> {
        if self.fail_open {
            return Err(PipelineError::DeviceUnavailable("scripted open failure".into()));
        }
        if let Some(device) = &self.device {
            self.claim = Some(device.try_claim()?);
        }
        self.is_open = true;
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn next_frame(&mut self) -> PipelineResult<Capture> {
        if !self.is_open {
            return Err(PipelineError::DeviceUnavailable("scripted source closed".into()));
        }
        match self.script.pop_front().unwrap_or(Step::End) {
            Step::Frame => {
                self.sequence += 1;
                Ok(Capture::Frame(test_frame(self.sequence)))
            }
            Step::Oversized => {
                self.sequence += 1;
                let wide = image::RgbImage::new(OVERSIZED_WIDTH, 1);
                Ok(Capture::Frame(Frame::from_image(wide, self.sequence)))
            }
            Step::CaptureFailed => Err(PipelineError::CaptureFailed("scripted read failure".into())),
            Step::Lost => Err(PipelineError::DeviceUnavailable("scripted unplug".into())),
            Step::End => Ok(Capture::EndOfStream),
        }
    }

    fn close(&mut self) {
        if self.is_open {
            std::thread::sleep(self.close_delay);
            self.is_open = false;
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
            self.claim = None;
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Fails the first `failures` calls, then returns empty sets.
pub(crate) struct FlakyDetector {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyDetector {
    pub(crate) fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn always() -> Self {
        Self::new(usize::MAX)
    }
}

impl Detector for FlakyDetector {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn infer(&self, _frame: &Frame) -> PipelineResult<DetectionSet> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(PipelineError::InferenceError(format!("scripted failure {}", call)));
        }
        Ok(DetectionSet::empty())
    }
}

pub(crate) struct PanickingDetector;

impl Detector for PanickingDetector {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn infer(&self, _frame: &Frame) -> PipelineResult<DetectionSet> {
        panic!("detector blew up");
    }
}
