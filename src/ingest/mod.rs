//! Frame ingestion sources.
//!
//! This module provides the sources a pipeline can pull frames from:
//! - Synthetic camera (`stub://`, testing and demos)
//! - Still image files (snapshots of a fixed picture, smoke tests)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! `CameraSource` selects one of these from the configured device string and
//! enforces single ownership of the device through a `DeviceLock`.
//!
//! A source:
//! - blocks in `next_frame` for at most its read timeout
//! - reports per-read failures as `CaptureFailed`, which callers may retry
//! - releases everything in `close`, which is safe to call any number of times

mod camera;
mod device;
pub mod still;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod convert;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

#[cfg(test)]
pub(crate) mod scripted;

pub use camera::{Camera, CameraSource, CameraStatus};
pub use device::{DeviceClaim, DeviceLock};
pub use still::StillImageSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

use crate::error::PipelineResult;
use crate::frame::Frame;

/// Outcome of a successful read.
#[derive(Debug)]
pub enum Capture {
    Frame(Frame),
    EndOfStream,
}

/// A producer of frames that owns a capture device for its open lifetime.
pub trait FrameSource: Send {
    /// Acquire the device. Fails with `DeviceBusy` or `DeviceUnavailable`.
    fn open(&mut self) -> PipelineResult<()>;

    /// Read the next frame, blocking for at most the source's read timeout.
    fn next_frame(&mut self) -> PipelineResult<Capture>;

    /// Release the device. Idempotent, including after a failed `open`.
    fn close(&mut self);

    /// Human-readable device identifier for logs.
    fn describe(&self) -> String;

    /// Whether recent reads have been succeeding.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Capture counters, for sources that keep them.
    fn stats(&self) -> Option<SourceStats> {
        None
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self) -> PipelineResult<()> {
        (**self).open()
    }

    fn next_frame(&mut self) -> PipelineResult<Capture> {
        (**self).next_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> Option<SourceStats> {
        (**self).stats()
    }
}

/// Statistics for a source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}
