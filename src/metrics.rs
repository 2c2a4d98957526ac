//! Aggregate quality signals over a sample run.

use serde::{Deserialize, Serialize};

use crate::detect::DetectedBox;

/// Pairs within one image above this IoU count as overlapping.
pub const OVERLAP_IOU_THRESHOLD: f64 = 0.8;
/// Boxes with area below this are tiny.
pub const TINY_BOX_AREA: f64 = 100.0;

/// Statistics computed from per-image detection lists.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SampleMetrics {
    pub avg_dets_per_image: f64,
    pub pct_zero_det_images: f64,
    pub avg_confidence: f64,
    /// Overlapping pairs divided by total boxes (not by pairs).
    pub overlap_rate: f64,
    pub tiny_box_ratio: f64,
}

/// Score a sample run. One inner slice per image.
///
/// Empty samples and images without detections never divide by zero;
/// the affected ratios are 0.
pub fn compute_sample_metrics(per_image_boxes: &[Vec<DetectedBox>]) -> SampleMetrics {
    let mut det_count_sum = 0usize;
    let mut zero_det_images = 0usize;
    let mut confidence_sum = 0.0;
    let mut total_boxes = 0usize;
    let mut overlap_pairs = 0usize;
    let mut tiny_boxes = 0usize;

    for boxes in per_image_boxes {
        det_count_sum += boxes.len();
        if boxes.is_empty() {
            zero_det_images += 1;
            continue;
        }

        for (i, a) in boxes.iter().enumerate() {
            confidence_sum += a.confidence;
            if a.area() < TINY_BOX_AREA {
                tiny_boxes += 1;
            }
            overlap_pairs += boxes[i + 1..]
                .iter()
                .filter(|b| a.iou(b) > OVERLAP_IOU_THRESHOLD)
                .count();
            total_boxes += 1;
        }
    }

    let images = per_image_boxes.len();
    let (avg_dets_per_image, pct_zero_det_images) = if images == 0 {
        (0.0, 0.0)
    } else {
        (
            det_count_sum as f64 / images as f64,
            zero_det_images as f64 / images as f64,
        )
    };
    let avg_confidence = if total_boxes == 0 {
        0.0
    } else {
        confidence_sum / total_boxes as f64
    };
    let box_denominator = total_boxes.max(1) as f64;

    SampleMetrics {
        avg_dets_per_image,
        pct_zero_det_images,
        avg_confidence,
        overlap_rate: overlap_pairs as f64 / box_denominator,
        tiny_box_ratio: tiny_boxes as f64 / box_denominator,
    }
}
