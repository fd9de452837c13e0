//! Start-up self check behind `--test`.

use std::path::Path;

use crate::detect::{DetectionSet, Detector};
use crate::error::PipelineResult;
use crate::ingest::still::load_frame;

/// Run one inference on the image at `sample`.
pub fn run_smoke_test(detector: &dyn Detector, sample: &Path) -> PipelineResult<DetectionSet> {
    let frame = load_frame(sample)?;
    log::info!(
        "smoke test: {} on {} ({}x{})",
        detector.name(),
        sample.display(),
        frame.width(),
        frame.height()
    );
    let detections = detector.infer(&frame)?;
    for detection in &detections {
        log::info!("  {}", detection.caption());
    }
    log::info!("smoke test passed: {} detection(s)", detections.len());
    Ok(detections)
}
