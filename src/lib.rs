//! Live object-detection camera stream.
//!
//! Frames flow one way per request:
//!
//! ```text
//! FrameSource -> Detector -> Annotator -> Encoder -> HTTP (snapshot or multipart stream)
//! ```
//!
//! # Module Structure
//!
//! - `frame`: frame ownership (`Frame`, `AnnotatedFrame`, `EncodedImage`)
//! - `ingest`: frame sources (V4L2, synthetic `stub://`, still images) and the device lock
//! - `detect`: the `Detector` trait, backends (stub, tract ONNX), YOLO post-processing
//! - `annotate`, `encode`, `pipeline`: the per-frame stages
//! - `stream`: the session pump, the shared capture hub, multipart framing
//! - `snapshot`: one-shot annotated still
//! - `context`, `server`: request handling over plain HTTP/1.1
//! - `config`: file and environment configuration
//!
//! # Invariants
//!
//! - A `Frame` has one owner. The annotator consumes it, so pixels already drawn
//!   on are never fed back to a detector.
//! - Exactly one open source holds the camera at a time (`DeviceLock`), and
//!   every session closes its source on every exit path.
//! - The detector is loaded once at start-up and shared read-only.

pub mod annotate;
pub mod config;
pub mod context;
pub mod detect;
pub mod encode;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod server;
pub mod smoke;
pub mod snapshot;
pub mod stream;

pub use annotate::Annotator;
pub use config::{DevicePolicy, StreamdConfig};
pub use context::AppContext;
pub use detect::{load_detector, BoundingBox, Detection, DetectionSet, Detector, StubBackend};
pub use encode::JpegEncoder;
pub use error::{PipelineError, PipelineResult};
pub use frame::{AnnotatedFrame, EncodedImage, Frame};
pub use ingest::{Camera, CameraSource, Capture, FrameSource};
pub use pipeline::{InferenceFailurePolicy, Pipeline};
pub use server::{HttpServer, ServerHandle};
pub use snapshot::capture_snapshot;
pub use stream::{ExitReason, StreamPump};
