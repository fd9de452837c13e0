//! Error taxonomy for the capture/detect/encode pipeline.
//!
//! Per-frame failures (`CaptureFailed`, `InferenceError`, `EncodeError`) are
//! absorbed by a running stream. Everything else ends the session or, for
//! `ModelLoadError`, the process start-up.

use thiserror::Error;

/// Result alias for pipeline stages.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The capture device is absent, already gone, or cannot be configured.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Another source currently holds the capture device.
    #[error("capture device busy")]
    DeviceBusy,

    /// A single frame read failed. The device may still deliver later frames.
    #[error("frame capture failed: {0}")]
    CaptureFailed(String),

    #[error("inference failed: {0}")]
    InferenceError(String),

    #[error("image encode failed: {0}")]
    EncodeError(String),

    /// The downstream sink stopped accepting data.
    #[error("client disconnected")]
    ClientDisconnected,

    #[error("model load failed: {0}")]
    ModelLoadError(String),
}

impl PipelineError {
    /// True for failures that skip one frame without ending a stream.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::CaptureFailed(_)
                | PipelineError::InferenceError(_)
                | PipelineError::EncodeError(_)
        )
    }

    /// True when the failure is about claiming the capture device.
    pub fn is_device_contention(&self) -> bool {
        matches!(
            self,
            PipelineError::DeviceBusy | PipelineError::DeviceUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_frame_failures_are_transient() {
        assert!(PipelineError::CaptureFailed("eio".into()).is_transient());
        assert!(PipelineError::InferenceError("shape".into()).is_transient());
        assert!(PipelineError::EncodeError("jpeg".into()).is_transient());

        assert!(!PipelineError::DeviceBusy.is_transient());
        assert!(!PipelineError::ClientDisconnected.is_transient());
        assert!(!PipelineError::ModelLoadError("missing".into()).is_transient());
        assert!(!PipelineError::DeviceUnavailable("gone".into()).is_transient());
    }

    #[test]
    fn contention_covers_busy_and_unavailable() {
        assert!(PipelineError::DeviceBusy.is_device_contention());
        assert!(PipelineError::DeviceUnavailable("absent".into()).is_device_contention());
        assert!(!PipelineError::CaptureFailed("eio".into()).is_device_contention());
    }
}
