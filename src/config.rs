use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::pipeline::InferenceFailurePolicy;
use crate::stream::PumpSettings;

pub const CONFIG_ENV: &str = "DETECT_STREAM_CONFIG";

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_CLIENTS: usize = 16;
const DEFAULT_CAMERA: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 10;
const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_BACKEND: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "./model/best.onnx";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_FRAME_INTERVAL_MS: u64 = 33;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_MAX_CAPTURE_FAILURES: u32 = 50;
const DEFAULT_SAMPLE_IMAGE: &str = "./dummy_image.jpg";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamdConfigFile {
    server: Option<ServerConfigFile>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    stream: Option<StreamConfigFile>,
    sample_image: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServerConfigFile {
    addr: Option<String>,
    write_timeout_ms: Option<u64>,
    max_clients: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    policy: Option<DevicePolicy>,
    min_frame_interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    on_inference_error: Option<InferenceFailurePolicy>,
    max_capture_failures: Option<u32>,
}

/// How concurrent viewers share the single capture device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePolicy {
    /// One capture loop fans frames out to every viewer.
    #[default]
    Shared,
    /// One viewer at a time; others get `DeviceBusy`.
    Exclusive,
}

impl FromStr for DevicePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "exclusive" => Ok(Self::Exclusive),
            other => Err(anyhow!(
                "unknown device policy '{}'; expected 'shared' or 'exclusive'",
                other
            )),
        }
    }
}

impl DevicePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Exclusive => "exclusive",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamdConfig {
    pub server: ServerSettings,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub stream: StreamSettings,
    /// Image used by `--test`.
    pub sample_image: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: String,
    pub write_timeout: Duration,
    pub max_clients: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// `/dev/videoN`, `stub://name[?frames=N]`, or an image file.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub read_timeout_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_CAMERA.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            target_fps: DEFAULT_FPS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `tract` or `stub`.
    pub backend: String,
    pub model_path: PathBuf,
    pub labels_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            labels_path: None,
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub policy: DevicePolicy,
    pub min_frame_interval: Duration,
    pub jpeg_quality: u8,
    pub on_inference_error: InferenceFailurePolicy,
    pub max_capture_failures: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            policy: DevicePolicy::default(),
            min_frame_interval: Duration::from_millis(DEFAULT_FRAME_INTERVAL_MS),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            on_inference_error: InferenceFailurePolicy::default(),
            max_capture_failures: DEFAULT_MAX_CAPTURE_FAILURES,
        }
    }
}

impl StreamSettings {
    pub fn pump_settings(&self) -> PumpSettings {
        PumpSettings {
            min_frame_interval: self.min_frame_interval,
            on_inference_error: self.on_inference_error,
            max_capture_failures: self.max_capture_failures,
            ..PumpSettings::default()
        }
    }
}

impl StreamdConfig {
    /// Load from the file named by `DETECT_STREAM_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like `load`, with an explicit config file taking precedence over the
    /// environment variable.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let file_cfg = match path.or(env_path.as_deref()) {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamdConfigFile) -> Self {
        let server = file.server.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        let camera_defaults = CameraSettings::default();
        let detector_defaults = DetectorSettings::default();
        let stream_defaults = StreamSettings::default();

        Self {
            server: ServerSettings {
                addr: server.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
                write_timeout: Duration::from_millis(
                    server.write_timeout_ms.unwrap_or(DEFAULT_WRITE_TIMEOUT_MS),
                ),
                max_clients: server.max_clients.unwrap_or(DEFAULT_MAX_CLIENTS),
            },
            camera: CameraSettings {
                device: camera.device.unwrap_or(camera_defaults.device),
                width: camera.width.unwrap_or(camera_defaults.width),
                height: camera.height.unwrap_or(camera_defaults.height),
                target_fps: camera.target_fps.unwrap_or(camera_defaults.target_fps),
                read_timeout_ms: camera
                    .read_timeout_ms
                    .unwrap_or(camera_defaults.read_timeout_ms),
            },
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or(detector_defaults.backend),
                model_path: detector.model_path.unwrap_or(detector_defaults.model_path),
                labels_path: detector.labels_path,
                input_width: detector.input_width.unwrap_or(detector_defaults.input_width),
                input_height: detector
                    .input_height
                    .unwrap_or(detector_defaults.input_height),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(detector_defaults.confidence_threshold),
                iou_threshold: detector
                    .iou_threshold
                    .unwrap_or(detector_defaults.iou_threshold),
            },
            stream: StreamSettings {
                policy: stream.policy.unwrap_or(stream_defaults.policy),
                min_frame_interval: stream
                    .min_frame_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(stream_defaults.min_frame_interval),
                jpeg_quality: stream.jpeg_quality.unwrap_or(stream_defaults.jpeg_quality),
                on_inference_error: stream
                    .on_inference_error
                    .unwrap_or(stream_defaults.on_inference_error),
                max_capture_failures: stream
                    .max_capture_failures
                    .unwrap_or(stream_defaults.max_capture_failures),
            },
            sample_image: file
                .sample_image
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SAMPLE_IMAGE)),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("DETECT_STREAM_ADDR") {
            self.server.addr = addr;
        }
        if let Some(device) = non_empty_env("DETECT_STREAM_CAMERA") {
            self.camera.device = device;
        }
        if let Some(model) = non_empty_env("DETECT_STREAM_MODEL") {
            self.detector.model_path = PathBuf::from(model);
        }
        if let Some(backend) = non_empty_env("DETECT_STREAM_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(policy) = non_empty_env("DETECT_STREAM_POLICY") {
            self.stream.policy = policy.parse().context("DETECT_STREAM_POLICY")?;
        }
        if let Some(path) = non_empty_env("DETECT_STREAM_SAMPLE_IMAGE") {
            self.sample_image = PathBuf::from(path);
        }
        if let Some(interval) = non_empty_env("DETECT_STREAM_FRAME_INTERVAL_MS") {
            let ms: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("DETECT_STREAM_FRAME_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.stream.min_frame_interval = Duration::from_millis(ms);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!(
                "camera size must be non-zero (got {}x{})",
                self.camera.width,
                self.camera.height
            ));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }
        for (name, value) in [
            ("confidence_threshold", self.detector.confidence_threshold),
            ("iou_threshold", self.detector.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1] (got {})", name, value));
            }
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must be within 1..=100 (got {})",
                self.stream.jpeg_quality
            ));
        }
        if self.server.max_clients == 0 {
            return Err(anyhow!("max_clients must be greater than zero"));
        }
        if self.server.write_timeout.is_zero() {
            return Err(anyhow!("write_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<StreamdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let cfg = StreamdConfig::from_file(StreamdConfigFile::default());
        cfg.validate()?;
        assert_eq!(cfg.server.addr, DEFAULT_ADDR);
        assert_eq!(cfg.camera.device, "/dev/video0");
        assert_eq!(cfg.stream.policy, DevicePolicy::Shared);
        assert_eq!(cfg.stream.min_frame_interval, Duration::from_millis(33));
        assert_eq!(cfg.detector.backend, "tract");
        Ok(())
    }

    #[test]
    fn policy_parsing() -> Result<()> {
        assert_eq!("Exclusive".parse::<DevicePolicy>()?, DevicePolicy::Exclusive);
        assert!("roundrobin".parse::<DevicePolicy>().is_err());
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = StreamdConfig::from_file(StreamdConfigFile::default());
        cfg.detector.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = StreamdConfig::from_file(StreamdConfigFile::default());
        cfg.stream.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = StreamdConfig::from_file(StreamdConfigFile::default());
        cfg.camera.width = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn pump_settings_follow_stream_section() {
        let stream = StreamSettings {
            on_inference_error: InferenceFailurePolicy::StreamRaw,
            max_capture_failures: 7,
            ..StreamSettings::default()
        };
        let pump = stream.pump_settings();
        assert_eq!(pump.on_inference_error, InferenceFailurePolicy::StreamRaw);
        assert_eq!(pump.max_capture_failures, 7);
    }
}
