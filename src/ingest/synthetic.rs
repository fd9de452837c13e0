//! Synthetic camera (`stub://`).
//!
//! Produces a moving test pattern at the configured frame rate. A
//! `?frames=N` suffix makes the stream finite: after N frames the source
//! reports `EndOfStream`.

use std::time::{Duration, Instant};

use super::{Capture, FrameSource, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

pub const SYNTHETIC_SCHEME: &str = "stub://";

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Emulated capture rate. 0 delivers frames as fast as they are requested.
    pub target_fps: u32,
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            width: 640,
            height: 480,
            target_fps: 10,
            frame_limit: None,
        }
    }
}

impl SyntheticConfig {
    /// Parse a `stub://name[?frames=N]` device string.
    pub fn from_device(device: &str, width: u32, height: u32, target_fps: u32) -> PipelineResult<Self> {
        let rest = device.strip_prefix(SYNTHETIC_SCHEME).ok_or_else(|| {
            PipelineError::DeviceUnavailable(format!("'{}' is not a stub:// device", device))
        })?;
        let mut frame_limit = None;
        if let Some((_, query)) = rest.split_once('?') {
            for pair in query.split('&') {
                if let Some(("frames", value)) = pair.split_once('=') {
                    let n = value.parse::<u64>().map_err(|_| {
                        PipelineError::DeviceUnavailable(format!(
                            "invalid frame count '{}' in {}",
                            value, device
                        ))
                    })?;
                    frame_limit = Some(n);
                }
            }
        }
        Ok(Self {
            device: device.to_string(),
            width,
            height,
            target_fps,
            frame_limit,
        })
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    connected: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            connected: false,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn wait_for_cadence(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let period = Duration::from_millis(1000 / self.config.target_fps.max(1) as u64);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < period {
                std::thread::sleep(period - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    /// Diagonal gradient with a bright square sweeping left to right.
    fn generate_pixels(&self) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let mut pixels = vec![0u8; w * h * 3];
        let side = (w.min(h) / 6).max(1);
        let travel = w.saturating_sub(side).max(1);
        let sq_x = (self.frame_count as usize * 8) % travel;
        let sq_y = h.saturating_sub(side) / 2;
        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * 3;
                let in_square = x >= sq_x && x < sq_x + side && y >= sq_y && y < sq_y + side;
                if in_square {
                    pixels[i..i + 3].copy_from_slice(&[240, 240, 240]);
                } else {
                    let base = ((x + y + self.frame_count as usize) % 256) as u8;
                    pixels[i] = base / 2;
                    pixels[i + 1] = base / 3;
                    pixels[i + 2] = 64;
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> PipelineResult<()> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(PipelineError::DeviceUnavailable(format!(
                "{}: invalid size {}x{}",
                self.config.device, self.config.width, self.config.height
            )));
        }
        self.connected = true;
        self.frame_count = 0;
        self.last_frame_at = None;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.config.device,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> PipelineResult<Capture> {
        if !self.connected {
            return Err(PipelineError::DeviceUnavailable(format!(
                "{} not connected",
                self.config.device
            )));
        }
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Ok(Capture::EndOfStream);
            }
        }
        self.wait_for_cadence();
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        let frame = Frame::from_rgb(pixels, self.config.width, self.config.height, self.frame_count)?;
        Ok(Capture::Frame(frame))
    }

    fn close(&mut self) {
        if self.connected {
            log::debug!(
                "SyntheticSource: closed {} after {} frames",
                self.config.device,
                self.frame_count
            );
        }
        self.connected = false;
    }

    fn describe(&self) -> String {
        self.config.device.clone()
    }

    fn stats(&self) -> Option<SourceStats> {
        Some(SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        })
    }
}
