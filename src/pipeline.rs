//! Detect → annotate → encode for one frame.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::annotate::Annotator;
use crate::detect::{DetectionSet, Detector};
use crate::encode::JpegEncoder;
use crate::error::PipelineResult;
use crate::frame::{AnnotatedFrame, EncodedImage, Frame};

/// What a stream does with a frame whose inference failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceFailurePolicy {
    /// Drop the frame; the client keeps showing the previous one.
    #[default]
    SkipFrame,
    /// Send the frame without annotations.
    StreamRaw,
}

/// The read-only per-frame stages, shared by every session.
pub struct Pipeline {
    detector: Arc<dyn Detector>,
    annotator: Annotator,
    encoder: JpegEncoder,
}

impl Pipeline {
    pub fn new(detector: Arc<dyn Detector>, annotator: Annotator, encoder: JpegEncoder) -> Self {
        Self {
            detector,
            annotator,
            encoder,
        }
    }

    pub fn detector(&self) -> &Arc<dyn Detector> {
        &self.detector
    }

    pub fn detect(&self, frame: &Frame) -> PipelineResult<DetectionSet> {
        self.detector.infer(frame)
    }

    /// Draw `detections` onto `frame` and encode the result.
    pub fn render(&self, frame: Frame, detections: &DetectionSet) -> PipelineResult<EncodedImage> {
        let annotated = self.annotator.annotate(frame, detections);
        self.encoder.encode(&annotated)
    }

    /// Encode `frame` as captured.
    pub fn render_raw(&self, frame: Frame) -> PipelineResult<EncodedImage> {
        self.encoder.encode(&AnnotatedFrame::unannotated(frame))
    }

    /// Full pass, surfacing the first error.
    pub fn process(&self, frame: Frame) -> PipelineResult<EncodedImage> {
        let detections = self.detect(&frame)?;
        log::debug!(
            "frame {}: {} detection(s)",
            frame.sequence(),
            detections.len()
        );
        self.render(frame, &detections)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("detector", &self.detector.name())
            .field("jpeg_quality", &self.encoder.quality())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ClassNames, StubBackend};
    use crate::error::PipelineError;
    use crate::ingest::scripted::{test_frame, FlakyDetector};

    fn pipeline(detector: Arc<dyn Detector>) -> Pipeline {
        Pipeline::new(detector, Annotator::default(), JpegEncoder::default())
    }

    #[test]
    fn process_produces_jpeg() -> anyhow::Result<()> {
        let p = pipeline(Arc::new(StubBackend::centered(0, 0.87, ClassNames::default())));
        let jpeg = p.process(test_frame(7))?;
        assert_eq!(jpeg.sequence(), 7);
        assert_eq!(&jpeg.as_bytes()[..2], &[0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn process_surfaces_inference_error() {
        let p = pipeline(Arc::new(FlakyDetector::always()));
        assert!(matches!(
            p.process(test_frame(1)),
            Err(PipelineError::InferenceError(_))
        ));
    }

    #[test]
    fn raw_and_annotated_output_differ() -> anyhow::Result<()> {
        let p = pipeline(Arc::new(StubBackend::centered(0, 0.87, ClassNames::default())));
        let raw = p.render_raw(test_frame(1))?;
        let annotated = p.process(test_frame(1))?;
        assert_ne!(raw, annotated);
        Ok(())
    }

    #[test]
    fn policy_names() -> anyhow::Result<()> {
        let policy: InferenceFailurePolicy = serde_json::from_str("\"stream_raw\"")?;
        assert_eq!(policy, InferenceFailurePolicy::StreamRaw);
        assert_eq!(InferenceFailurePolicy::default(), InferenceFailurePolicy::SkipFrame);
        Ok(())
    }
}
