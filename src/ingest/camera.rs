use std::path::Path;
use std::sync::{Arc, Mutex};

use super::device::{DeviceClaim, DeviceLock};
use super::still::StillImageSource;
use super::synthetic::{SyntheticConfig, SyntheticSource, SYNTHETIC_SCHEME};
use super::{Capture, FrameSource, SourceStats};
use crate::config::CameraSettings;
use crate::error::{PipelineError, PipelineResult};

/// The process's one physical camera.
///
/// Cheap to clone; every clone shares the same `DeviceLock`, so at most one
/// `CameraSource` built from it can be open at a time.
#[derive(Clone, Debug)]
pub struct Camera {
    settings: CameraSettings,
    lock: DeviceLock,
    status: Arc<Mutex<CameraStatus>>,
}

/// What the most recent source on this camera reported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraStatus {
    pub healthy: bool,
    /// Frames read since that source was opened.
    pub frames_captured: u64,
}

impl Default for CameraStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            frames_captured: 0,
        }
    }
}

impl Camera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            lock: DeviceLock::new(),
            status: Arc::default(),
        }
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    /// Whether some source currently owns the device.
    pub fn in_use(&self) -> bool {
        self.lock.is_held()
    }

    pub fn status(&self) -> CameraStatus {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Open the device once and release it again. Fails the same way the
    /// first stream or snapshot would, including `DeviceBusy` when the
    /// camera is already held.
    pub fn check_available(&self) -> PipelineResult<()> {
        let mut source = self.source();
        source.open()?;
        source.close();
        Ok(())
    }

    /// A closed source bound to this camera. Nothing is claimed until `open`.
    pub fn source(&self) -> CameraSource {
        CameraSource {
            settings: self.settings.clone(),
            lock: self.lock.clone(),
            status: self.status.clone(),
            claim: None,
            backend: None,
        }
    }
}

/// `FrameSource` over the configured device string:
/// - `stub://...` synthetic camera
/// - an existing image file, repeated as a static camera
/// - anything else is a V4L2 device node
pub struct CameraSource {
    settings: CameraSettings,
    lock: DeviceLock,
    status: Arc<Mutex<CameraStatus>>,
    claim: Option<DeviceClaim>,
    backend: Option<Box<dyn FrameSource>>,
}

impl CameraSource {
    fn build_backend(&self) -> PipelineResult<Box<dyn FrameSource>> {
        let s = &self.settings;
        if s.device.starts_with(SYNTHETIC_SCHEME) {
            let config = SyntheticConfig::from_device(&s.device, s.width, s.height, s.target_fps)?;
            return Ok(Box::new(SyntheticSource::new(config)));
        }
        if Path::new(&s.device).is_file() {
            return Ok(Box::new(StillImageSource::new(&s.device, true)));
        }
        open_device_node(s)
    }

    fn publish(&self, healthy: bool, frames_captured: u64) {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        status.healthy = healthy;
        status.frames_captured = frames_captured;
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_device_node(s: &CameraSettings) -> PipelineResult<Box<dyn FrameSource>> {
    Ok(Box::new(super::v4l2::V4l2Source::new(super::v4l2::V4l2Config {
        device: s.device.clone(),
        target_fps: s.target_fps,
        width: s.width,
        height: s.height,
        read_timeout: std::time::Duration::from_millis(s.read_timeout_ms),
    })))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device_node(s: &CameraSettings) -> PipelineResult<Box<dyn FrameSource>> {
    Err(PipelineError::DeviceUnavailable(format!(
        "{}: camera devices require the ingest-v4l2 feature",
        s.device
    )))
}

impl FrameSource for CameraSource {
    fn open(&mut self) -> PipelineResult<()> {
        if self.backend.is_some() {
            return Ok(());
        }
        let claim = self.lock.try_claim()?;
        let mut backend = match self.build_backend() {
            Ok(backend) => backend,
            Err(err) => {
                self.publish(false, 0);
                return Err(err);
            }
        };
        if let Err(err) = backend.open() {
            backend.close();
            drop(claim);
            self.publish(false, 0);
            log::warn!("CameraSource: open {} failed: {}", self.settings.device, err);
            return Err(match err {
                PipelineError::DeviceUnavailable(_) | PipelineError::DeviceBusy => err,
                other => PipelineError::DeviceUnavailable(other.to_string()),
            });
        }
        self.claim = Some(claim);
        self.backend = Some(backend);
        self.publish(true, 0);
        Ok(())
    }

    fn next_frame(&mut self) -> PipelineResult<Capture> {
        let Some(backend) = self.backend.as_mut() else {
            return Err(PipelineError::DeviceUnavailable(format!(
                "{} not opened",
                self.settings.device
            )));
        };
        let result = backend.next_frame();
        let healthy = result.is_ok() && backend.is_healthy();
        let frames = backend.stats().map_or(0, |stats| stats.frames_captured);
        self.publish(healthy, frames);
        result
    }

    fn close(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.close();
            log::debug!("CameraSource: released {}", self.settings.device);
        }
        self.claim = None;
    }

    fn describe(&self) -> String {
        self.settings.device.clone()
    }

    fn is_healthy(&self) -> bool {
        self.backend.as_ref().is_some_and(|backend| backend.is_healthy())
    }

    fn stats(&self) -> Option<SourceStats> {
        self.backend.as_ref().and_then(|backend| backend.stats())
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_camera(device: &str) -> Camera {
        Camera::new(CameraSettings {
            device: device.to_string(),
            width: 32,
            height: 24,
            target_fps: 0,
            ..CameraSettings::default()
        })
    }

    #[test]
    fn second_open_is_busy_until_close() -> anyhow::Result<()> {
        let camera = stub_camera("stub://cam");
        let mut first = camera.source();
        let mut second = camera.source();
        first.open()?;
        assert!(camera.in_use());
        assert!(matches!(second.open(), Err(PipelineError::DeviceBusy)));

        first.close();
        first.close();
        assert!(!camera.in_use());
        second.open()?;
        assert!(matches!(second.next_frame()?, Capture::Frame(_)));
        Ok(())
    }

    #[test]
    fn failed_open_releases_the_claim() {
        let camera = stub_camera("/dev/video-missing-for-test");
        let mut source = camera.source();
        assert!(matches!(
            source.open(),
            Err(PipelineError::DeviceUnavailable(_))
        ));
        assert!(!camera.in_use());
        source.close();
        assert!(!camera.in_use());
    }

    #[test]
    fn dropping_an_open_source_releases_the_device() -> anyhow::Result<()> {
        let camera = stub_camera("stub://cam");
        {
            let mut source = camera.source();
            source.open()?;
            assert!(camera.in_use());
        }
        assert!(!camera.in_use());
        Ok(())
    }

    #[test]
    fn status_tracks_reads_and_failed_opens() -> anyhow::Result<()> {
        let camera = stub_camera("stub://cam");
        let mut source = camera.source();
        source.open()?;
        for _ in 0..3 {
            source.next_frame()?;
        }
        assert!(source.is_healthy());
        assert_eq!(source.stats().map(|s| s.frames_captured), Some(3));
        assert_eq!(
            camera.status(),
            CameraStatus {
                healthy: true,
                frames_captured: 3
            }
        );
        source.close();
        assert!(!source.is_healthy());

        let missing = stub_camera("/dev/video-missing-for-test");
        assert!(missing.source().open().is_err());
        assert!(!missing.status().healthy);
        Ok(())
    }

    #[test]
    fn availability_check_opens_and_releases() -> anyhow::Result<()> {
        let camera = stub_camera("stub://cam");
        camera.check_available()?;
        assert!(!camera.in_use());
        Ok(())
    }

    #[test]
    fn availability_check_reports_missing_device() {
        let camera = stub_camera("/dev/video-missing-for-test");
        assert!(matches!(
            camera.check_available(),
            Err(PipelineError::DeviceUnavailable(_))
        ));
        assert!(!camera.in_use());
    }

    #[test]
    fn read_before_open_is_unavailable() {
        let camera = stub_camera("stub://cam");
        let mut source = camera.source();
        assert!(matches!(
            source.next_frame(),
            Err(PipelineError::DeviceUnavailable(_))
        ));
    }
}
