use std::sync::Arc;

use crate::config::DetectorSettings;
use crate::detect::backend::Detector;
use crate::detect::backends::StubBackend;
use crate::detect::labels::ClassNames;
use crate::error::{PipelineError, PipelineResult};

/// Load the configured detector exactly once and warm it up.
///
/// Callers must treat an error here as fatal for serving: no endpoint may be
/// exposed without a loaded model.
pub fn load_detector(settings: &DetectorSettings) -> PipelineResult<Arc<dyn Detector>> {
    let names = match &settings.labels_path {
        Some(path) => ClassNames::from_file(path)?,
        None => ClassNames::default(),
    };

    let detector: Arc<dyn Detector> = match settings.backend.as_str() {
        "stub" => Arc::new(StubBackend::centered(0, 0.87, names)),
        "tract" => load_tract(settings, names)?,
        other => {
            return Err(PipelineError::ModelLoadError(format!(
                "unknown detector backend '{}'; expected 'tract' or 'stub'",
                other
            )))
        }
    };

    detector.warm_up().map_err(|e| {
        PipelineError::ModelLoadError(format!("{} warm-up failed: {}", detector.name(), e))
    })?;
    log::info!(
        "detector '{}' loaded (model={})",
        detector.name(),
        settings.model_path.display()
    );
    Ok(detector)
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &DetectorSettings, names: ClassNames) -> PipelineResult<Arc<dyn Detector>> {
    use crate::detect::backends::TractBackend;

    if !settings.model_path.is_file() {
        return Err(PipelineError::ModelLoadError(format!(
            "model artifact {} not found",
            settings.model_path.display()
        )));
    }
    let backend = TractBackend::new(
        &settings.model_path,
        settings.input_width,
        settings.input_height,
        names,
    )?
    .with_thresholds(settings.confidence_threshold, settings.iou_threshold);
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(_settings: &DetectorSettings, _names: ClassNames) -> PipelineResult<Arc<dyn Detector>> {
    Err(PipelineError::ModelLoadError(
        "the tract detector requires the backend-tract feature".into(),
    ))
}
