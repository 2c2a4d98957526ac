//! Applying a plan to raw detector output.

use std::cmp::Ordering;

use crate::detect::result::DetectedBox;
use crate::plan::DetectionPlan;

/// Frame dimensions in pixels, when the backend knows them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Turn raw candidates into the final boxes for one image.
///
/// Order: confidence threshold, per-label NMS at `plan.iou`, top `max_det`
/// by confidence, minimum area, then clamping.
pub fn finalize(
    raw: Vec<DetectedBox>,
    plan: &DetectionPlan,
    frame: Option<FrameSize>,
) -> Vec<DetectedBox> {
    let candidates: Vec<DetectedBox> = raw
        .into_iter()
        .filter(|b| b.confidence >= plan.conf)
        .collect();

    let mut kept = non_max_suppression(candidates, plan.iou);
    kept.truncate(plan.max_det as usize);

    let min_area = f64::from(plan.postprocess.min_box_area);
    kept.retain(|b| b.area() >= min_area);

    if plan.postprocess.clamp_to_bounds {
        for b in &mut kept {
            clamp_to_frame(b, frame);
        }
    }
    kept
}

/// Greedy per-label NMS. Output is sorted by descending confidence.
pub fn non_max_suppression(mut boxes: Vec<DetectedBox>, iou_threshold: f64) -> Vec<DetectedBox> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<DetectedBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept
            .iter()
            .any(|k| k.label == candidate.label && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

fn clamp_to_frame(b: &mut DetectedBox, frame: Option<FrameSize>) {
    let mut x_max = b.x + b.w;
    let mut y_max = b.y + b.h;
    b.x = b.x.max(0.0);
    b.y = b.y.max(0.0);
    if let Some(frame) = frame {
        let (fw, fh) = (f64::from(frame.width), f64::from(frame.height));
        b.x = b.x.min(fw);
        b.y = b.y.min(fh);
        x_max = x_max.min(fw);
        y_max = y_max.min(fh);
    }
    b.w = (x_max - b.x).max(0.0);
    b.h = (y_max - b.y).max(0.0);
}
