//! JPEG encoder stage.

use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;

use crate::error::{PipelineError, PipelineResult};
use crate::frame::{AnnotatedFrame, EncodedImage};

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// MIME type of every `EncodedImage` this crate produces.
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Clone, Copy, Debug)]
pub struct JpegEncoder {
    quality: u8,
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl JpegEncoder {
    /// Quality is clamped to `1..=100`.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &AnnotatedFrame) -> PipelineResult<EncodedImage> {
        let image = frame.image();
        let mut buffer = Vec::with_capacity(image.as_raw().len() / 8);
        ImageJpegEncoder::new_with_quality(&mut buffer, self.quality)
            .encode_image(image)
            .map_err(|err| PipelineError::EncodeError(err.to_string()))?;
        Ok(EncodedImage::new(buffer, frame.sequence()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn encodes_valid_jpeg() -> anyhow::Result<()> {
        let frame = Frame::from_rgb(vec![200u8; 32 * 16 * 3], 32, 16, 5)?;
        let encoded = JpegEncoder::default().encode(&AnnotatedFrame::unannotated(frame))?;

        assert_eq!(encoded.sequence(), 5);
        assert_eq!(&encoded.as_bytes()[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory_with_format(encoded.as_bytes(), image::ImageFormat::Jpeg)?;
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
        Ok(())
    }

    #[test]
    fn oversized_frame_is_encode_error() {
        let frame = Frame::from_image(image::RgbImage::new(70_000, 1), 1);
        let result = JpegEncoder::default().encode(&AnnotatedFrame::unannotated(frame));
        assert!(matches!(result, Err(PipelineError::EncodeError(_))));
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(JpegEncoder::new(0).quality(), 1);
        assert_eq!(JpegEncoder::new(250).quality(), 100);
    }
}
