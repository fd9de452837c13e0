//! Still image file source.
//!
//! Decodes a local image once on `open` and serves it as frames. With
//! `repeat` the picture behaves like a static camera; without it the source
//! yields a single frame followed by `EndOfStream`.

use std::path::{Path, PathBuf};

use super::{Capture, FrameSource};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// Decode an image file into an RGB frame.
pub fn load_frame(path: &Path) -> PipelineResult<Frame> {
    let image = image::open(path).map_err(|e| {
        PipelineError::DeviceUnavailable(format!("failed to read image {}: {}", path.display(), e))
    })?;
    Ok(Frame::from_image(image.to_rgb8(), 1))
}

pub struct StillImageSource {
    path: PathBuf,
    repeat: bool,
    decoded: Option<image::RgbImage>,
    served: u64,
}

impl StillImageSource {
    pub fn new(path: impl Into<PathBuf>, repeat: bool) -> Self {
        Self {
            path: path.into(),
            repeat,
            decoded: None,
            served: 0,
        }
    }
}

impl FrameSource for StillImageSource {
    fn open(&mut self) -> PipelineResult<()> {
        let frame = load_frame(&self.path)?;
        self.decoded = Some(frame.into_image());
        self.served = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> PipelineResult<Capture> {
        let image = self.decoded.as_ref().ok_or_else(|| {
            PipelineError::DeviceUnavailable(format!("{} not opened", self.path.display()))
        })?;
        if !self.repeat && self.served > 0 {
            return Ok(Capture::EndOfStream);
        }
        self.served += 1;
        Ok(Capture::Frame(Frame::from_image(image.clone(), self.served)))
    }

    fn close(&mut self) {
        self.decoded = None;
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
