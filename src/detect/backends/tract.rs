#![cfg(feature = "backend-tract")]

use std::path::Path;

use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::labels::ClassNames;
use crate::detect::postprocess::{decode_yolo, non_max_suppression, MAX_DETECTIONS};
use crate::detect::result::{BoundingBox, Detection, DetectionSet};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Frames are resized to the model input, inferred, and the boxes are scaled
/// back to frame pixels. No network I/O and no disk access beyond model loading.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    names: ClassNames,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_width: u32,
        input_height: u32,
        names: ClassNames,
    ) -> PipelineResult<Self> {
        let model_path = model_path.as_ref();
        let load_err = |stage: &str, err: TractError| {
            PipelineError::ModelLoadError(format!(
                "{} ({}): {}",
                stage,
                model_path.display(),
                err
            ))
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| load_err("failed to load ONNX model", e))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .map_err(|e| load_err("failed to set input fact", e))?
            .into_optimized()
            .map_err(|e| load_err("failed to optimize ONNX model", e))?
            .into_runnable()
            .map_err(|e| load_err("failed to build runnable ONNX model", e))?;

        Ok(Self {
            model,
            names,
            input_width,
            input_height,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = imageops::resize(
            frame.image(),
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );
        let pixels = resized.as_raw();
        let width = self.input_width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        input.into_tensor()
    }
}

impl Detector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&self, frame: &Frame) -> PipelineResult<DetectionSet> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| PipelineError::InferenceError(format!("ONNX inference failed: {}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| PipelineError::InferenceError("model produced no outputs".into()))?;
        let view = output.to_array_view::<f32>().map_err(|e| {
            PipelineError::InferenceError(format!("model output tensor was not f32: {}", e))
        })?;
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();

        let candidates = decode_yolo(&data, &shape, self.confidence_threshold)?;
        let kept = non_max_suppression(candidates, self.iou_threshold, MAX_DETECTIONS);

        let (w, h) = (frame.width(), frame.height());
        let sx = w as f32 / self.input_width as f32;
        let sy = h as f32 / self.input_height as f32;
        let detections = kept
            .into_iter()
            .map(|c| {
                let bbox = BoundingBox::new(c.bbox.x1 * sx, c.bbox.y1 * sy, c.bbox.x2 * sx, c.bbox.y2 * sy);
                Detection::new(c.class_id, self.names.resolve(c.class_id), c.confidence, bbox, w, h)
            })
            .collect();
        Ok(DetectionSet::new(detections))
    }

    fn warm_up(&self) -> PipelineResult<()> {
        let blank = Frame::from_rgb(
            vec![0u8; self.input_width as usize * self.input_height as usize * 3],
            self.input_width,
            self.input_height,
            0,
        )?;
        self.infer(&blank).map(|_| ())
    }
}
