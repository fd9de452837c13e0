//! Pixel format conversion for device buffers.

use crate::error::{PipelineError, PipelineResult};

/// Pixel layouts negotiated with capture devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb24,
    Yuyv,
    Mjpeg,
}

impl PixelLayout {
    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

/// Convert one device buffer to packed RGB. Returns `(pixels, width, height)`.
pub fn to_rgb(
    layout: PixelLayout,
    buf: &[u8],
    width: u32,
    height: u32,
) -> PipelineResult<(Vec<u8>, u32, u32)> {
    match layout {
        PixelLayout::Rgb24 => {
            let expected = width as usize * height as usize * 3;
            if buf.len() < expected {
                return Err(PipelineError::CaptureFailed(format!(
                    "short RGB buffer: {} < {}",
                    buf.len(),
                    expected
                )));
            }
            Ok((buf[..expected].to_vec(), width, height))
        }
        PixelLayout::Yuyv => Ok((yuyv_to_rgb(buf, width, height)?, width, height)),
        PixelLayout::Mjpeg => {
            let decoded = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                .map_err(|e| PipelineError::CaptureFailed(format!("corrupt MJPEG frame: {}", e)))?
                .to_rgb8();
            let (w, h) = decoded.dimensions();
            Ok((decoded.into_raw(), w, h))
        }
    }
}

fn yuyv_to_rgb(buf: &[u8], width: u32, height: u32) -> PipelineResult<Vec<u8>> {
    let pixels = width as usize * height as usize;
    if buf.len() < pixels * 2 {
        return Err(PipelineError::CaptureFailed(format!(
            "short YUYV buffer: {} < {}",
            buf.len(),
            pixels * 2
        )));
    }
    let mut out = Vec::with_capacity(pixels * 3);
    for chunk in buf[..pixels * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        out.extend_from_slice(&yuv_to_rgb(y0, u, v));
        out.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(out)
}

// BT.601 limited range.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}
