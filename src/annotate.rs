//! Annotator: draws detection boxes and captions onto a frame.
//!
//! Drawing is pure and deterministic: the same frame and detections always
//! give byte-identical output. Every pixel write is bounds-checked, so boxes
//! touching the frame edge are clipped rather than written out of range.
//! Captions use a built-in 5x7 bitmap font (upper-case only).

use image::{Rgb, RgbImage};

use crate::detect::DetectionSet;
use crate::frame::{AnnotatedFrame, Frame};

/// Box and caption color.
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Caption backing color.
pub const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
/// Rectangle stroke width in pixels.
pub const BOX_THICKNESS: u32 = 2;

const GLYPH_WIDTH: i64 = 5;
const GLYPH_HEIGHT: i64 = 7;
const GLYPH_ADVANCE: i64 = 6;
/// Caption offset above the box top edge.
const LABEL_OFFSET: i64 = 10;

#[derive(Clone, Copy, Debug)]
pub struct Annotator {
    color: Rgb<u8>,
    background: Rgb<u8>,
    thickness: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            color: BOX_COLOR,
            background: LABEL_BACKGROUND,
            thickness: BOX_THICKNESS,
        }
    }
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the frame and draw every detection on it.
    pub fn annotate(&self, frame: Frame, detections: &DetectionSet) -> AnnotatedFrame {
        let sequence = frame.sequence();
        let mut image = frame.into_image();

        for det in detections {
            let b = det.bbox();
            draw_box(
                &mut image,
                b.x1.round() as i64,
                b.y1.round() as i64,
                b.x2.round() as i64,
                b.y2.round() as i64,
                self.thickness,
                self.color,
            );
        }

        for det in detections {
            let b = det.bbox();
            let caption = det.caption();
            let x = b.x1.round() as i64;
            let top = b.y1.round() as i64;
            // Above the box when there is room, otherwise just inside it.
            let y = if top - LABEL_OFFSET >= 0 {
                top - LABEL_OFFSET
            } else {
                top + self.thickness as i64 + 1
            };
            let text_width = caption.chars().count() as i64 * GLYPH_ADVANCE;
            fill_rect(
                &mut image,
                x - 1,
                y - 1,
                x + text_width,
                y + GLYPH_HEIGHT,
                self.background,
            );
            draw_text(&mut image, x, y, &caption, self.color);
        }

        AnnotatedFrame::new(image, sequence, detections.len())
    }
}

fn put(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < image.width() as i64 && y < image.height() as i64 {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_box(
    image: &mut RgbImage,
    left: i64,
    top: i64,
    right: i64,
    bottom: i64,
    thickness: u32,
    color: Rgb<u8>,
) {
    for inset in 0..thickness as i64 {
        let (l, t, r, b) = (left + inset, top + inset, right - inset, bottom - inset);
        if l > r || t > b {
            break;
        }
        for x in l..=r {
            put(image, x, t, color);
            put(image, x, b, color);
        }
        for y in t..=b {
            put(image, l, y, color);
            put(image, r, y, color);
        }
    }
}

fn fill_rect(image: &mut RgbImage, left: i64, top: i64, right: i64, bottom: i64, color: Rgb<u8>) {
    let left = left.max(0);
    let top = top.max(0);
    let right = right.min(image.width() as i64 - 1);
    let bottom = bottom.min(image.height() as i64 - 1);
    for y in top..=bottom {
        for x in left..=right {
            put(image, x, y, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, mut x: i64, y: i64, text: &str, color: Rgb<u8>) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        let rows = glyph(ch);
        for (row, pattern) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                    put(image, x + col, y + row as i64, color);
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0],
        ' ' => [0; 7],
        _ => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0, 0b00100],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};

    fn gray_frame(width: u32, height: u32) -> Frame {
        Frame::from_rgb(vec![128u8; (width * height * 3) as usize], width, height, 1)
            .expect("valid frame")
    }

    fn one_box(width: u32, height: u32, bbox: BoundingBox) -> DetectionSet {
        DetectionSet::new(vec![Detection::new(0, "part", 0.87, bbox, width, height)])
    }

    #[test]
    fn annotation_is_deterministic() {
        let dets = one_box(64, 48, BoundingBox::new(10.0, 20.0, 40.0, 40.0));
        let a = Annotator::new().annotate(gray_frame(64, 48), &dets);
        let b = Annotator::new().annotate(gray_frame(64, 48), &dets);
        assert_eq!(a.image().as_raw(), b.image().as_raw());
        assert_eq!(a.detection_count(), 1);
    }

    #[test]
    fn draws_box_edges_in_box_color() {
        let dets = one_box(64, 48, BoundingBox::new(10.0, 20.0, 40.0, 40.0));
        let out = Annotator::new().annotate(gray_frame(64, 48), &dets);
        let img = out.image();
        assert_eq!(*img.get_pixel(25, 40), BOX_COLOR);
        assert_eq!(*img.get_pixel(40, 30), BOX_COLOR);
        assert_eq!(*img.get_pixel(11, 30), BOX_COLOR);
        // Interior untouched.
        assert_eq!(*img.get_pixel(25, 30), Rgb([128, 128, 128]));
    }

    #[test]
    fn boxes_at_frame_edges_do_not_panic() {
        let dets = DetectionSet::new(vec![
            Detection::new(0, "edge", 0.5, BoundingBox::new(-50.0, -50.0, 500.0, 500.0), 16, 12),
            Detection::new(1, "corner", 1.0, BoundingBox::new(15.0, 11.0, 15.0, 11.0), 16, 12),
            Detection::new(2, "a very long caption", 0.1, BoundingBox::new(14.0, 0.0, 15.0, 2.0), 16, 12),
        ]);
        let out = Annotator::new().annotate(gray_frame(16, 12), &dets);
        assert_eq!(out.image().dimensions(), (16, 12));
        assert_eq!(*out.image().get_pixel(15, 11), BOX_COLOR);
    }

    #[test]
    fn empty_detection_set_leaves_frame_unchanged() {
        let out = Annotator::new().annotate(gray_frame(8, 8), &DetectionSet::empty());
        assert!(out.image().as_raw().iter().all(|p| *p == 128));
        assert_eq!(out.detection_count(), 0);
    }
}
