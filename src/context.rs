use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::annotate::Annotator;
use crate::config::{CameraSettings, DevicePolicy, StreamSettings};
use crate::detect::Detector;
use crate::encode::JpegEncoder;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::EncodedImage;
use crate::ingest::{Camera, FrameSource};
use crate::pipeline::Pipeline;
use crate::snapshot::capture_snapshot;
use crate::stream::{FrameHub, SourceFactory, StreamPump, StreamSession};

/// How long a shared-policy snapshot waits for the running stream.
const SHARED_SNAPSHOT_WAIT: Duration = Duration::from_secs(5);

/// Everything a request handler needs, built once at start-up.
///
/// The detector is loaded before this exists and never reloaded; the model
/// artifact must not change while the process runs.
pub struct AppContext {
    camera: Camera,
    pipeline: Arc<Pipeline>,
    hub: FrameHub,
    stream: StreamSettings,
    shutdown: Arc<AtomicBool>,
}

impl AppContext {
    pub fn new(
        camera: CameraSettings,
        stream: StreamSettings,
        detector: Arc<dyn Detector>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let camera = Camera::new(camera);
        let pipeline = Arc::new(Pipeline::new(
            detector,
            Annotator::default(),
            JpegEncoder::new(stream.jpeg_quality),
        ));
        let hub_camera = camera.clone();
        let factory: SourceFactory =
            Arc::new(move || Box::new(hub_camera.source()) as Box<dyn FrameSource>);
        let hub = FrameHub::new(
            factory,
            pipeline.clone(),
            stream.pump_settings(),
            shutdown.clone(),
        );
        Self {
            camera,
            pipeline,
            hub,
            stream,
            shutdown,
        }
    }

    pub fn policy(&self) -> DevicePolicy {
        self.stream.policy
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn hub(&self) -> &FrameHub {
        &self.hub
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// One annotated still. Under the shared policy a busy camera means a
    /// stream is running, so the still is taken from it instead.
    pub fn snapshot(&self) -> PipelineResult<EncodedImage> {
        let mut source = self.camera.source();
        match capture_snapshot(&mut source, &self.pipeline) {
            Err(PipelineError::DeviceBusy) if self.stream.policy == DevicePolicy::Shared => {
                log::debug!("snapshot: camera busy, using the shared stream");
                let frame = self.hub.next_frame(SHARED_SNAPSHOT_WAIT)?;
                Ok(Arc::try_unwrap(frame).unwrap_or_else(|shared| (*shared).clone()))
            }
            other => other,
        }
    }

    /// Set up a stream session. Errors here happen before any response body.
    pub fn open_stream(&self) -> PipelineResult<StreamSession> {
        match self.stream.policy {
            DevicePolicy::Shared => Ok(StreamSession::Shared {
                subscription: self.hub.subscribe()?,
                shutdown: self.shutdown.clone(),
            }),
            DevicePolicy::Exclusive => {
                let mut pump = StreamPump::new(
                    self.camera.source(),
                    self.pipeline.clone(),
                    self.stream.pump_settings(),
                    self.shutdown.clone(),
                );
                pump.start()?;
                Ok(StreamSession::Exclusive(Box::new(pump)))
            }
        }
    }

    /// Stop every session and wait for the shared loop to release the camera.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(report) = self.hub.join() {
            log::info!("shared capture loop stopped: {:?}", report.exit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ClassNames, StubBackend};
    use crate::stream::{ExitReason, MultipartWriter};

    fn context(policy: DevicePolicy) -> AppContext {
        let camera = CameraSettings {
            device: "stub://ctx".to_string(),
            width: 48,
            height: 32,
            target_fps: 0,
            ..CameraSettings::default()
        };
        let stream = StreamSettings {
            policy,
            min_frame_interval: Duration::from_millis(5),
            ..StreamSettings::default()
        };
        let detector = Arc::new(StubBackend::centered(0, 0.87, ClassNames::default()));
        AppContext::new(camera, stream, detector, Arc::default())
    }

    #[test]
    fn snapshot_when_idle_opens_the_camera() -> anyhow::Result<()> {
        let ctx = context(DevicePolicy::Exclusive);
        let jpeg = ctx.snapshot()?;
        assert!(!jpeg.is_empty());
        assert!(!ctx.camera().in_use());
        Ok(())
    }

    #[test]
    fn exclusive_policy_rejects_second_stream() -> anyhow::Result<()> {
        let ctx = context(DevicePolicy::Exclusive);
        let first = ctx.open_stream()?;
        assert!(matches!(ctx.open_stream(), Err(PipelineError::DeviceBusy)));
        assert!(matches!(ctx.snapshot(), Err(PipelineError::DeviceBusy)));
        drop(first);
        assert!(!ctx.camera().in_use());
        Ok(())
    }

    #[test]
    fn shared_policy_snapshot_uses_running_stream() -> anyhow::Result<()> {
        let ctx = context(DevicePolicy::Shared);
        let stream = ctx.open_stream()?;
        let second = ctx.open_stream()?;
        assert!(ctx.camera().in_use());
        let jpeg = ctx.snapshot()?;
        assert!(!jpeg.is_empty());
        drop(stream);
        drop(second);
        ctx.shutdown();
        assert!(!ctx.camera().in_use());
        Ok(())
    }

    #[test]
    fn shutdown_ends_exclusive_session() -> anyhow::Result<()> {
        let ctx = context(DevicePolicy::Exclusive);
        let session = ctx.open_stream()?;
        ctx.shutdown();
        let summary = session.run(&mut MultipartWriter::new(Vec::new()));
        assert_eq!(summary.exit, ExitReason::Shutdown);
        assert!(!ctx.camera().in_use());
        Ok(())
    }
}
