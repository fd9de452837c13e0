use crate::detect::result::DetectionSet;
use crate::error::PipelineResult;
use crate::frame::Frame;

/// Object detector contract.
///
/// A detector is loaded once and shared by every session, so `infer` takes
/// `&self`: the model is never mutated per request. The artifact it was
/// loaded from is assumed immutable for the process lifetime.
///
/// Implementations must:
/// - treat the frame as read-only and not retain it past the call
/// - return an empty set (not an error) when nothing is found
/// - return `PipelineError::InferenceError` for malformed input or runtime failures
/// - resolve every label through their class-index table
pub trait Detector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn infer(&self, frame: &Frame) -> PipelineResult<DetectionSet>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&self) -> PipelineResult<()> {
        Ok(())
    }
}
