//! Deterministic plan refinement from sample metrics.

use crate::metrics::SampleMetrics;
use crate::plan::{scale_area, DetectionPlan, CONFIDENCE_STEP, MAX_CONFIDENCE, MIN_CONFIDENCE};

pub const ZERO_DET_IMAGES_LIMIT: f64 = 0.40;
pub const DETS_PER_IMAGE_LIMIT: f64 = 15.0;
pub const OVERLAP_RATE_LIMIT: f64 = 0.25;
pub const TINY_BOX_RATIO_LIMIT: f64 = 0.35;

/// Floor for the detector IoU threshold after refinement.
pub const MIN_IOU: f64 = 0.20;
pub const IOU_STEP: f64 = 0.05;
const TINY_BOX_AREA_SCALE: f64 = 1.2;

/// Produce the plan for the full run from the sample-run plan and its metrics.
///
/// The input plan is left untouched. Each rule edits its own field; the two
/// confidence rules run in order on the same working value.
pub fn refine_plan(plan: &DetectionPlan, metrics: &SampleMetrics) -> DetectionPlan {
    let mut refined = plan.clone();

    if metrics.pct_zero_det_images > ZERO_DET_IMAGES_LIMIT {
        refined.conf = (refined.conf - CONFIDENCE_STEP).max(MIN_CONFIDENCE);
    }
    if metrics.avg_dets_per_image > DETS_PER_IMAGE_LIMIT {
        refined.conf = (refined.conf + CONFIDENCE_STEP).min(MAX_CONFIDENCE);
    }
    if metrics.overlap_rate > OVERLAP_RATE_LIMIT {
        refined.iou = (refined.iou - IOU_STEP).max(MIN_IOU);
    }
    if metrics.tiny_box_ratio > TINY_BOX_RATIO_LIMIT {
        refined.postprocess.min_box_area =
            scale_area(refined.postprocess.min_box_area, TINY_BOX_AREA_SCALE);
    }

    if refined != *plan {
        log::debug!(
            "refined plan: conf {:.2}->{:.2} iou {:.2}->{:.2} min_box_area {}->{}",
            plan.conf,
            refined.conf,
            plan.iou,
            refined.iou,
            plan.postprocess.min_box_area,
            refined.postprocess.min_box_area
        );
    }
    refined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::build_initial_plan;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn neutral() -> SampleMetrics {
        SampleMetrics {
            avg_dets_per_image: 4.0,
            pct_zero_det_images: 0.1,
            avg_confidence: 0.6,
            overlap_rate: 0.05,
            tiny_box_ratio: 0.1,
        }
    }

    #[test]
    fn neutral_metrics_leave_plan_unchanged() {
        for goal in ["fast", "balanced", "quality"] {
            let plan = build_initial_plan(goal, "");
            assert_eq!(refine_plan(&plan, &neutral()), plan);
        }
    }

    #[test]
    fn many_empty_images_lower_confidence() {
        let plan = build_initial_plan("balanced", "");
        let metrics = SampleMetrics {
            pct_zero_det_images: 0.5,
            ..neutral()
        };
        let refined = refine_plan(&plan, &metrics);
        assert!(approx(refined.conf, 0.20));
        assert!(approx(plan.conf, 0.25), "input plan must not change");
    }

    #[test]
    fn crowded_images_raise_confidence() {
        let plan = build_initial_plan("balanced", "");
        let metrics = SampleMetrics {
            avg_dets_per_image: 20.0,
            ..neutral()
        };
        assert!(approx(refine_plan(&plan, &metrics).conf, 0.30));
    }

    #[test]
    fn both_confidence_rules_apply_in_sequence() {
        let plan = build_initial_plan("balanced", "");
        let metrics = SampleMetrics {
            pct_zero_det_images: 0.9,
            avg_dets_per_image: 40.0,
            ..neutral()
        };
        assert!(approx(refine_plan(&plan, &metrics).conf, 0.25));

        // Clamped on the way down, then raised from the floor.
        let mut low = plan.clone();
        low.conf = 0.05;
        assert!(approx(refine_plan(&low, &metrics).conf, 0.10));
    }

    #[test]
    fn overlap_lowers_iou() {
        let plan = build_initial_plan("quality", "");
        let metrics = SampleMetrics {
            overlap_rate: 0.3,
            ..neutral()
        };
        assert!(approx(refine_plan(&plan, &metrics).iou, 0.40));
    }

    #[test]
    fn tiny_boxes_raise_min_area() {
        let metrics = SampleMetrics {
            tiny_box_ratio: 0.5,
            ..neutral()
        };
        let balanced = build_initial_plan("balanced", "");
        assert_eq!(
            refine_plan(&balanced, &metrics).postprocess.min_box_area,
            180
        );
        let fast_small = build_initial_plan("fast", "ignore small");
        assert_eq!(
            refine_plan(&fast_small, &metrics).postprocess.min_box_area,
            360
        );
    }

    #[test]
    fn thresholds_are_strict() {
        let plan = build_initial_plan("balanced", "");
        let metrics = SampleMetrics {
            avg_dets_per_image: DETS_PER_IMAGE_LIMIT,
            pct_zero_det_images: ZERO_DET_IMAGES_LIMIT,
            avg_confidence: 0.0,
            overlap_rate: OVERLAP_RATE_LIMIT,
            tiny_box_ratio: TINY_BOX_RATIO_LIMIT,
        };
        assert_eq!(refine_plan(&plan, &metrics), plan);
    }

    #[test]
    fn extreme_metrics_stay_within_bounds() {
        let extremes = [
            SampleMetrics {
                avg_dets_per_image: 1e9,
                pct_zero_det_images: 0.0,
                avg_confidence: 1.0,
                overlap_rate: 1e9,
                tiny_box_ratio: 5.0,
            },
            SampleMetrics {
                avg_dets_per_image: 0.0,
                pct_zero_det_images: 7.0,
                avg_confidence: -1.0,
                overlap_rate: 1.0,
                tiny_box_ratio: 1.0,
            },
        ];
        for goal in ["fast", "balanced", "quality"] {
            for instructions in ["", "recall", "precision"] {
                let mut plan = build_initial_plan(goal, instructions);
                for metrics in &extremes {
                    // Repeated refinement keeps pushing toward the bounds.
                    for _ in 0..30 {
                        let next = refine_plan(&plan, metrics);
                        assert!(next.conf >= MIN_CONFIDENCE - 1e-12);
                        assert!(next.conf <= MAX_CONFIDENCE + 1e-12);
                        assert!(next.iou >= MIN_IOU - 1e-12);
                        assert!(next.iou <= plan.iou);
                        plan = next;
                    }
                }
            }
        }
    }
}
