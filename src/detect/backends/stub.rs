use crate::detect::backend::Detector;
use crate::detect::labels::ClassNames;
use crate::detect::result::{BoundingBox, Detection, DetectionSet};
use crate::error::PipelineResult;
use crate::frame::Frame;

/// Detection template with box corners in normalized `0..1` frame coordinates.
#[derive(Clone, Copy, Debug)]
pub struct StubDetection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Stub backend for testing and demos. Returns the same detections for every frame.
pub struct StubBackend {
    fixed: Vec<StubDetection>,
    names: ClassNames,
}

impl StubBackend {
    /// Backend that never finds anything.
    pub fn new() -> Self {
        Self {
            fixed: Vec::new(),
            names: ClassNames::default(),
        }
    }

    pub fn fixed(fixed: Vec<StubDetection>, names: ClassNames) -> Self {
        Self { fixed, names }
    }

    /// One centered box covering the middle half of the frame.
    pub fn centered(class_id: usize, confidence: f32, names: ClassNames) -> Self {
        Self::fixed(
            vec![StubDetection {
                class_id,
                confidence,
                bbox: BoundingBox::new(0.25, 0.25, 0.75, 0.75),
            }],
            names,
        )
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&self, frame: &Frame) -> PipelineResult<DetectionSet> {
        let (w, h) = (frame.width(), frame.height());
        let detections = self
            .fixed
            .iter()
            .map(|d| {
                let bbox = BoundingBox::new(
                    d.bbox.x1 * w as f32,
                    d.bbox.y1 * h as f32,
                    d.bbox.x2 * w as f32,
                    d.bbox.y2 * h as f32,
                );
                Detection::new(d.class_id, self.names.resolve(d.class_id), d.confidence, bbox, w, h)
            })
            .collect();
        Ok(DetectionSet::new(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_scales_boxes_to_frame() -> anyhow::Result<()> {
        let backend = StubBackend::centered(0, 0.87, ClassNames::parse("widget"));
        let frame = Frame::from_rgb(vec![0u8; 100 * 40 * 3], 100, 40, 1)?;

        let set = backend.infer(&frame)?;
        assert_eq!(set.len(), 1);
        let det = &set.as_slice()[0];
        assert_eq!(det.label(), "widget");
        assert_eq!(det.confidence(), 0.87);
        assert_eq!(det.bbox(), BoundingBox::new(25.0, 10.0, 75.0, 30.0));
        Ok(())
    }

    #[test]
    fn default_stub_finds_nothing() -> anyhow::Result<()> {
        let frame = Frame::from_rgb(vec![0u8; 4 * 4 * 3], 4, 4, 1)?;
        assert!(StubBackend::default().infer(&frame)?.is_empty());
        Ok(())
    }
}
