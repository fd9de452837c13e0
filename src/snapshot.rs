//! Single annotated still.

use crate::error::{PipelineError, PipelineResult};
use crate::frame::{EncodedImage, Frame};
use crate::ingest::{Capture, FrameSource};
use crate::pipeline::Pipeline;

/// Closes the wrapped source when dropped, including during unwinding.
struct OpenedSource<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
}

impl<S: FrameSource + ?Sized> Drop for OpenedSource<'_, S> {
    fn drop(&mut self) {
        self.source.close();
    }
}

/// Open `source`, take one frame through the pipeline, and close the source.
///
/// No retries: the first error is returned as is. The source is released
/// exactly once whether or not the capture succeeded.
pub fn capture_snapshot<S: FrameSource + ?Sized>(
    source: &mut S,
    pipeline: &Pipeline,
) -> PipelineResult<EncodedImage> {
    if let Err(err) = source.open() {
        source.close();
        return Err(err);
    }
    let opened = OpenedSource { source };
    let frame = match opened.source.next_frame()? {
        Capture::Frame(frame) => frame,
        Capture::EndOfStream => {
            return Err(PipelineError::CaptureFailed(format!(
                "{} ended before delivering a frame",
                opened.source.describe()
            )))
        }
    };
    let image = pipeline.process(frame)?;
    drop(opened);
    log::debug!("snapshot encoded ({} bytes)", image.len());
    Ok(image)
}

/// Snapshot of an already decoded frame. No device is involved.
pub fn snapshot_from_frame(frame: Frame, pipeline: &Pipeline) -> PipelineResult<EncodedImage> {
    pipeline.process(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::Annotator;
    use crate::detect::{ClassNames, Detector, StubBackend};
    use crate::encode::JpegEncoder;
    use crate::ingest::scripted::{
        test_frame, FlakyDetector, PanickingDetector, ScriptedSource, Step,
    };
    use std::sync::Arc;

    fn pipeline(detector: Arc<dyn Detector>) -> Pipeline {
        Pipeline::new(detector, Annotator::default(), JpegEncoder::default())
    }

    fn stub() -> Arc<dyn Detector> {
        Arc::new(StubBackend::centered(0, 0.87, ClassNames::default()))
    }

    #[test]
    fn snapshot_succeeds_and_releases_once() -> anyhow::Result<()> {
        let mut source = ScriptedSource::frames(3);
        let counters = source.counters();
        let jpeg = capture_snapshot(&mut source, &pipeline(stub()))?;
        assert_eq!(&jpeg.as_bytes()[..2], &[0xFF, 0xD8]);
        assert_eq!(counters.opens(), 1);
        assert_eq!(counters.releases(), 1);
        Ok(())
    }

    #[test]
    fn inference_error_fails_and_releases_once() {
        let mut source = ScriptedSource::frames(1);
        let counters = source.counters();
        let result = capture_snapshot(&mut source, &pipeline(Arc::new(FlakyDetector::always())));
        assert!(matches!(result, Err(PipelineError::InferenceError(_))));
        assert_eq!(counters.releases(), 1);
    }

    #[test]
    fn capture_failure_is_not_retried() {
        let mut source = ScriptedSource::new([Step::CaptureFailed, Step::Frame]);
        let counters = source.counters();
        let result = capture_snapshot(&mut source, &pipeline(stub()));
        assert!(matches!(result, Err(PipelineError::CaptureFailed(_))));
        assert_eq!(counters.releases(), 1);
    }

    #[test]
    fn empty_source_is_a_capture_failure() {
        let mut source = ScriptedSource::new([Step::End]);
        let result = capture_snapshot(&mut source, &pipeline(stub()));
        assert!(matches!(result, Err(PipelineError::CaptureFailed(_))));
    }

    #[test]
    fn failed_open_surfaces_device_error() {
        let mut source = ScriptedSource::failing_open();
        let counters = source.counters();
        let result = capture_snapshot(&mut source, &pipeline(stub()));
        assert!(matches!(result, Err(PipelineError::DeviceUnavailable(_))));
        assert_eq!(counters.releases(), 0);
    }

    #[test]
    fn panic_in_detector_still_releases() {
        let mut source = ScriptedSource::frames(1);
        let counters = source.counters();
        let p = pipeline(Arc::new(PanickingDetector));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = capture_snapshot(&mut source, &p);
        }));
        assert!(outcome.is_err());
        assert_eq!(counters.releases(), 1);
    }

    #[test]
    fn still_frame_snapshot() -> anyhow::Result<()> {
        let jpeg = snapshot_from_frame(test_frame(4), &pipeline(stub()))?;
        assert_eq!(jpeg.sequence(), 4);
        Ok(())
    }
}
