//! Decoding of YOLO-style detection heads and non-max suppression.
//!
//! Two output layouts are recognised for a `[1, a, b]` tensor:
//! - channels-first (`a < b`): `a = 4 + classes`, no objectness column
//! - anchors-first (`a >= b`): `b = 5 + classes`, score = objectness x class score
//!
//! Box coordinates are center/size in model-input pixels.

use std::cmp::Ordering;

use crate::detect::result::BoundingBox;
use crate::error::{PipelineError, PipelineResult};

/// Upper bound on boxes kept per frame after suppression.
pub const MAX_DETECTIONS: usize = 300;

/// Scored box before label resolution, in model-input pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Decode a raw head tensor into candidates above `threshold`.
pub fn decode_yolo(data: &[f32], shape: &[usize], threshold: f32) -> PipelineResult<Vec<Candidate>> {
    let (a, b) = match shape {
        [1, a, b] => (*a, *b),
        [a, b] => (*a, *b),
        other => {
            return Err(PipelineError::InferenceError(format!(
                "unexpected detector output shape {:?}",
                other
            )))
        }
    };
    if data.len() != a * b {
        return Err(PipelineError::InferenceError(format!(
            "output holds {} values, shape implies {}",
            data.len(),
            a * b
        )));
    }

    let mut out = Vec::new();
    if a < b {
        // [4 + nc, N]
        if a < 5 {
            return Err(PipelineError::InferenceError(format!(
                "detector output needs at least 5 channels, got {}",
                a
            )));
        }
        let at = |channel: usize, anchor: usize| data[channel * b + anchor];
        for anchor in 0..b {
            let Some((class_id, score)) = best_class((4..a).map(|c| at(c, anchor))) else {
                continue;
            };
            if score < threshold {
                continue;
            }
            out.push(Candidate {
                class_id,
                confidence: score,
                bbox: BoundingBox::from_center(
                    at(0, anchor),
                    at(1, anchor),
                    at(2, anchor),
                    at(3, anchor),
                ),
            });
        }
    } else {
        // [N, 5 + nc]
        if b < 6 {
            return Err(PipelineError::InferenceError(format!(
                "detector rows need at least 6 values, got {}",
                b
            )));
        }
        for row in data.chunks_exact(b) {
            let objectness = row[4];
            if objectness < threshold {
                continue;
            }
            let Some((class_id, class_score)) = best_class(row[5..].iter().copied()) else {
                continue;
            };
            let score = objectness * class_score;
            if score < threshold {
                continue;
            }
            out.push(Candidate {
                class_id,
                confidence: score,
                bbox: BoundingBox::from_center(row[0], row[1], row[2], row[3]),
            });
        }
    }
    Ok(out)
}

fn best_class(scores: impl Iterator<Item = f32>) -> Option<(usize, f32)> {
    scores
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .max_by(|x, y| x.1.partial_cmp(&y.1).unwrap_or(Ordering::Equal))
}

/// Greedy per-class suppression. Output is sorted by descending confidence.
pub fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|x, y| {
        y.confidence
            .partial_cmp(&x.confidence)
            .unwrap_or(Ordering::Equal)
    });
    let mut kept: Vec<Candidate> = Vec::new();
    for cand in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == cand.class_id && k.bbox.iou(&cand.bbox) > iou_threshold);
        if !overlaps {
            kept.push(cand);
        }
    }
    kept
}
