//! Detection plans and the goal-driven plan builder.
//!
//! A plan is the full set of detector parameters used for one pass over a
//! dataset. Plans are values: every adjustment produces a new plan.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Detector family every plan targets.
pub const PLAN_TOOL: &str = "yolov8";

/// Lower bound for any confidence adjustment.
pub const MIN_CONFIDENCE: f64 = 0.05;
/// Upper bound for any confidence adjustment.
pub const MAX_CONFIDENCE: f64 = 0.70;
/// Step applied by instruction and refinement rules to the confidence threshold.
pub const CONFIDENCE_STEP: f64 = 0.05;

const IGNORE_SMALL_AREA_SCALE: f64 = 1.5;

const FAST_MODEL: &str = "yolov8n.pt";
const MID_MODEL: &str = "yolov8s.pt";

/// Coarse speed/quality selector for a labeling run.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Fast,
    #[default]
    Balanced,
    Quality,
}

impl Goal {
    /// Resolve a goal selector. Anything unrecognized is treated as `balanced`.
    pub fn from_selector(selector: &str) -> Self {
        match selector {
            "fast" => Goal::Fast,
            "quality" => Goal::Quality,
            _ => Goal::Balanced,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Goal::Fast => "fast",
            Goal::Balanced => "balanced",
            Goal::Quality => "quality",
        }
    }

    /// Base plan for this goal before any instruction is applied.
    pub fn base_plan(self) -> DetectionPlan {
        let (model, imgsz, conf, max_det, min_box_area) = match self {
            Goal::Fast => (FAST_MODEL, 512, 0.30, 100, 200),
            Goal::Balanced => (MID_MODEL, 640, 0.25, 150, 150),
            Goal::Quality => (MID_MODEL, 640, 0.15, 200, 100),
        };
        DetectionPlan {
            tool: PLAN_TOOL.to_string(),
            model: model.to_string(),
            imgsz,
            conf,
            iou: 0.45,
            max_det,
            postprocess: PostProcess {
                min_box_area,
                clamp_to_bounds: true,
            },
        }
    }
}

/// Post-processing rules applied to detector output.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PostProcess {
    /// Boxes with `w * h` below this are dropped.
    pub min_box_area: u32,
    pub clamp_to_bounds: bool,
}

/// Concrete detector configuration.
///
/// Field names follow the persisted job-record layout, so a serialized plan
/// reads `{"tool", "model", "imgsz", "conf", "iou", "max_det", "postprocess"}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectionPlan {
    pub tool: String,
    /// Model selector, e.g. `yolov8s.pt`.
    pub model: String,
    /// Square input resolution in pixels.
    pub imgsz: u32,
    /// Confidence threshold in `[0, 1]`.
    pub conf: f64,
    /// IoU threshold used by the detector's own deduplication.
    pub iou: f64,
    pub max_det: u32,
    pub postprocess: PostProcess,
}

impl DetectionPlan {
    /// Hex SHA-256 over the plan's JSON form.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&json))
    }

    /// File stem of the model selector (`yolov8s.pt` -> `yolov8s`).
    pub fn model_stem(&self) -> &str {
        self.model
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.model)
    }
}

/// Build the initial plan for a goal selector and free-text instructions.
///
/// Instruction rules are case-insensitive substring matches applied in a
/// fixed order; more than one may fire.
pub fn build_initial_plan(goal: &str, instructions: &str) -> DetectionPlan {
    let mut plan = Goal::from_selector(goal).base_plan();
    let text = instructions.to_lowercase();

    if text.contains("recall") || text.contains("don't miss") {
        plan.conf = (plan.conf - CONFIDENCE_STEP).max(MIN_CONFIDENCE);
    }
    if text.contains("precision") || text.contains("fewer false") {
        plan.conf = (plan.conf + CONFIDENCE_STEP).min(MAX_CONFIDENCE);
    }
    if text.contains("ignore small") {
        plan.postprocess.min_box_area =
            scale_area(plan.postprocess.min_box_area, IGNORE_SMALL_AREA_SCALE);
    }

    plan
}

pub(crate) fn scale_area(area: u32, factor: f64) -> u32 {
    (f64::from(area) * factor).round() as u32
}
