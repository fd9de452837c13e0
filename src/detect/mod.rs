mod backend;
mod backends;
mod labels;
mod load;
mod postprocess;
mod result;

pub use backend::Detector;
pub use backends::{StubBackend, StubDetection};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::ClassNames;
pub use load::load_detector;
pub use postprocess::{decode_yolo, non_max_suppression, Candidate, MAX_DETECTIONS};
pub use result::{BoundingBox, Detection, DetectionSet};
