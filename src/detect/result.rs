/// Axis-aligned box in pixel coordinates, `x1 <= x2` and `y1 <= y2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from a center/size box as emitted by YOLO-style heads.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    /// Order the corners and clamp them to `[0, width-1] x [0, height-1]`.
    ///
    /// Non-finite coordinates collapse to 0.
    pub fn clamped(self, width: u32, height: u32) -> Self {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        let fix = |v: f32, max: f32| if v.is_finite() { v.clamp(0.0, max) } else { 0.0 };
        let (x1, x2) = (fix(self.x1, max_x), fix(self.x2, max_x));
        let (y1, y2) = (fix(self.y1, max_y), fix(self.y2, max_y));
        Self::new(x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2))
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// True when the box lies inside a `width x height` frame.
    pub fn within(&self, width: u32, height: u32) -> bool {
        self.x1 >= 0.0
            && self.y1 >= 0.0
            && self.x1 <= self.x2
            && self.y1 <= self.y2
            && self.x2 <= width.saturating_sub(1) as f32
            && self.y2 <= height.saturating_sub(1) as f32
    }
}

/// One labeled, localized object.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    class_id: usize,
    label: String,
    confidence: f32,
    bbox: BoundingBox,
}

impl Detection {
    /// Build a detection normalised to a `width x height` frame.
    ///
    /// Confidence is clamped to `[0, 1]` and the box to the frame bounds.
    pub fn new(
        class_id: usize,
        label: impl Into<String>,
        confidence: f32,
        bbox: BoundingBox,
        width: u32,
        height: u32,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            class_id,
            label: label.into(),
            confidence,
            bbox: bbox.clamped(width, height),
        }
    }

    pub fn class_id(&self) -> usize {
        self.class_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Text drawn next to the box, e.g. `"person 0.87"`.
    pub fn caption(&self) -> String {
        format!("{} {:.2}", self.label, self.confidence)
    }
}

/// Ordered detections for a single frame. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_clamps_confidence_and_box() {
        let det = Detection::new(
            0,
            "bolt",
            1.7,
            BoundingBox::new(-20.0, 470.0, 700.0, 10.0),
            640,
            480,
        );
        assert_eq!(det.confidence(), 1.0);
        let b = det.bbox();
        assert_eq!(b, BoundingBox::new(0.0, 10.0, 639.0, 470.0));
        assert!(b.within(640, 480));

        let low = Detection::new(1, "nut", -0.2, BoundingBox::new(1.0, 1.0, 2.0, 2.0), 8, 8);
        assert_eq!(low.confidence(), 0.0);
    }

    #[test]
    fn non_finite_values_collapse() {
        let det = Detection::new(
            0,
            "x",
            f32::NAN,
            BoundingBox::new(f32::NAN, f32::INFINITY, 4.0, 4.0),
            10,
            10,
        );
        assert_eq!(det.confidence(), 0.0);
        assert!(det.bbox().within(10, 10));
    }

    #[test]
    fn caption_uses_two_decimals() {
        let det = Detection::new(3, "crack", 0.8749, BoundingBox::new(0.0, 0.0, 1.0, 1.0), 4, 4);
        assert_eq!(det.caption(), "crack 0.87");
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn from_center_converts_to_corners() {
        let b = BoundingBox::from_center(50.0, 40.0, 20.0, 10.0);
        assert_eq!(b, BoundingBox::new(40.0, 35.0, 60.0, 45.0));
    }
}
