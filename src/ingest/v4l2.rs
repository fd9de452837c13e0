//! V4L2 frame source.
//!
//! Captures from a local device node (e.g. /dev/video0) through memory-mapped
//! buffers. RGB3 is requested; devices that only offer YUYV or MJPG are
//! converted in-memory.

use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::convert::{to_rgb, PixelLayout};
use super::{Capture, FrameSource, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    pub target_fps: u32,
    /// Preferred frame width. The driver may pick another size.
    pub width: u32,
    pub height: u32,
    /// Upper bound on a single blocking read.
    pub read_timeout: Duration,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
            read_timeout: Duration::from_secs(2),
        }
    }
}

pub struct V4l2Source {
    config: V4l2Config,
    state: Option<DeviceV4l2State>,
    layout: PixelLayout,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this>,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            layout: PixelLayout::Rgb24,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    fn unavailable(&self, what: &str, err: impl std::fmt::Display) -> PipelineError {
        PipelineError::DeviceUnavailable(format!("{} {}: {}", what, self.config.device, err))
    }
}

impl FrameSource for V4l2Source {
    fn open(&mut self) -> PipelineResult<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture as _;

        let device = v4l::Device::with_path(&self.config.device)
            .map_err(|e| self.unavailable("open v4l2 device", e))?;
        let mut format = device
            .format()
            .map_err(|e| self.unavailable("read v4l2 format of", e))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .map_err(|e| self.unavailable("read v4l2 format after set failure on", e))?
            }
        };
        self.layout = PixelLayout::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            self.unavailable("unsupported pixel format on", format.fourcc)
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let timeout = self.config.read_timeout;
        let state = DeviceV4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)?;
                stream.set_timeout(timeout);
                Ok::<_, std::io::Error>(stream)
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            self.unavailable("create v4l2 buffer stream for", err)
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.layout
        );
        Ok(())
    }

    fn next_frame(&mut self) -> PipelineResult<Capture> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or_else(|| {
            PipelineError::DeviceUnavailable(format!("{} not connected", self.config.device))
        })?;
        let (layout, width, height) = (self.layout, self.active_width, self.active_height);
        let converted = state.with_stream_mut(|stream| match stream.next() {
            Ok((buf, _meta)) => Ok(to_rgb(layout, buf, width, height)),
            Err(err) => Err(err),
        });

        let (pixels, w, h) = match converted {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => return Err(err),
            Err(err) if is_unplugged(&err) => {
                self.last_error = Some(err.to_string());
                return Err(PipelineError::DeviceUnavailable(format!(
                    "{} disconnected: {}",
                    self.config.device, err
                )));
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(PipelineError::CaptureFailed(format!(
                    "capture v4l2 frame from {}: {}",
                    self.config.device, err
                )));
            }
        };

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        Ok(Capture::Frame(Frame::from_rgb(pixels, w, h, self.frame_count)?))
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Source: released {} after {} frames",
                self.config.device,
                self.frame_count
            );
        }
    }

    fn describe(&self) -> String {
        self.config.device.clone()
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> Option<SourceStats> {
        Some(SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        })
    }
}

/// ENODEV from a dequeue means the device node went away. std has no
/// `ErrorKind` for it, so match the errno.
const ENODEV: i32 = 19;

fn is_unplugged(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(ENODEV) || err.kind() == std::io::ErrorKind::NotFound
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_unavailable() {
        let mut source = V4l2Source::new(V4l2Config {
            device: "/dev/video-does-not-exist".to_string(),
            ..V4l2Config::default()
        });
        assert!(matches!(
            source.open(),
            Err(PipelineError::DeviceUnavailable(_))
        ));
        source.close();
        source.close();
        assert!(source.is_healthy());
        assert_eq!(source.stats().map(|s| s.frames_captured), Some(0));
    }

    #[test]
    fn enodev_counts_as_unplugged() {
        assert!(is_unplugged(&std::io::Error::from_raw_os_error(ENODEV)));
        assert!(!is_unplugged(&std::io::Error::from_raw_os_error(5)));
        assert!(!is_unplugged(&std::io::Error::from(std::io::ErrorKind::TimedOut)));
    }
}
