//! Frame ownership layer.
//!
//! - `Frame`: decoded RGB8 raster. Not `Clone`; each pipeline iteration owns
//!   exactly one and hands it to the annotator by value.
//! - `AnnotatedFrame`: a frame with detections drawn on it. Read-only once built.
//! - `EncodedImage`: compressed JPEG bytes ready for the transport.
//!
//! Because the annotator consumes the `Frame`, nothing upstream (source or
//! detector) can observe the pixels after they have been drawn on.

use image::RgbImage;

use crate::error::{PipelineError, PipelineResult};

/// Bytes per pixel for the only supported layout (packed RGB, 8 bits per channel).
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Decoded raster produced by a `FrameSource`.
///
/// Explicitly NOT implementing `Clone`: a frame has a single owner at any time.
pub struct Frame {
    image: RgbImage,
    sequence: u64,
}

impl Frame {
    /// Wrap packed RGB bytes. Fails when the buffer does not match the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> PipelineResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| PipelineError::CaptureFailed("frame dimensions overflow".into()))?;
        if width == 0 || height == 0 {
            return Err(PipelineError::CaptureFailed(format!(
                "empty frame {}x{}",
                width, height
            )));
        }
        if data.len() != expected {
            return Err(PipelineError::CaptureFailed(format!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        let image = RgbImage::from_raw(width, height, data).ok_or_else(|| {
            PipelineError::CaptureFailed("frame buffer does not fit dimensions".into())
        })?;
        Ok(Self { image, sequence })
    }

    pub fn from_image(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Capture sequence number assigned by the source (starts at 1).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Read-only pixel access for detectors.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Give up ownership of the raster. Used by the annotator.
    pub(crate) fn into_image(self) -> RgbImage {
        self.image
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel data intentionally omitted.
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("sequence", &self.sequence)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// AnnotatedFrame
// ----------------------------------------------------------------------------

/// Frame with detections drawn on it.
pub struct AnnotatedFrame {
    image: RgbImage,
    sequence: u64,
    detection_count: usize,
}

impl AnnotatedFrame {
    pub(crate) fn new(image: RgbImage, sequence: u64, detection_count: usize) -> Self {
        Self {
            image,
            sequence,
            detection_count,
        }
    }

    /// Pass a frame through without drawing anything.
    pub fn unannotated(frame: Frame) -> Self {
        let sequence = frame.sequence();
        Self::new(frame.into_image(), sequence, 0)
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn detection_count(&self) -> usize {
        self.detection_count
    }
}

// ----------------------------------------------------------------------------
// EncodedImage
// ----------------------------------------------------------------------------

/// Compressed image bytes (JPEG).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedImage {
    bytes: Vec<u8>,
    sequence: u64,
}

impl EncodedImage {
    pub fn new(bytes: Vec<u8>, sequence: u64) -> Self {
        Self { bytes, sequence }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_mismatched_buffer() {
        let err = Frame::from_rgb(vec![0u8; 10], 4, 4, 1).unwrap_err();
        assert!(matches!(err, PipelineError::CaptureFailed(_)));
    }

    #[test]
    fn frame_rejects_zero_dimensions() {
        assert!(Frame::from_rgb(Vec::new(), 0, 4, 1).is_err());
    }

    #[test]
    fn frame_exposes_dimensions_and_pixels() -> anyhow::Result<()> {
        let frame = Frame::from_rgb(vec![7u8; 4 * 2 * 3], 4, 2, 9)?;
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.sequence(), 9);
        assert!(frame.pixels().iter().all(|p| *p == 7));
        Ok(())
    }

    #[test]
    fn unannotated_keeps_pixels() -> anyhow::Result<()> {
        let frame = Frame::from_rgb(vec![42u8; 2 * 2 * 3], 2, 2, 3)?;
        let annotated = AnnotatedFrame::unannotated(frame);
        assert_eq!(annotated.detection_count(), 0);
        assert_eq!(annotated.sequence(), 3);
        assert!(annotated.image().as_raw().iter().all(|p| *p == 42));
        Ok(())
    }
}
