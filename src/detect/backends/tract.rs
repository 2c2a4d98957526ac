#![cfg(feature = "backend-tract")]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::postprocess::{finalize, FrameSize};
use crate::detect::result::DetectedBox;
use crate::plan::DetectionPlan;

type YoloModel = TypedRunnableModel<TypedModel>;

const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// The plan's model selector picks `<model_dir>/<stem>.onnx`; compiled models
/// are cached per model and input resolution.
pub struct TractBackend {
    model_dir: PathBuf,
    models: HashMap<(String, u32), YoloModel>,
}

impl TractBackend {
    pub fn new<P: Into<PathBuf>>(model_dir: P) -> Self {
        Self {
            model_dir: model_dir.into(),
            models: HashMap::new(),
        }
    }

    fn model_for(&mut self, plan: &DetectionPlan) -> Result<&YoloModel> {
        let key = (plan.model_stem().to_string(), plan.imgsz);
        if !self.models.contains_key(&key) {
            let model_path = self.model_dir.join(format!("{}.onnx", key.0));
            log::info!(
                "TractBackend: loading {} at {}px",
                model_path.display(),
                plan.imgsz
            );
            let size = plan.imgsz as usize;
            let model = tract_onnx::onnx()
                .model_for_path(&model_path)
                .with_context(|| {
                    format!("failed to load ONNX model from {}", model_path.display())
                })?
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
                )
                .context("failed to set input fact")?
                .into_optimized()
                .context("failed to optimize ONNX model")?
                .into_runnable()
                .context("failed to build runnable ONNX model")?;
            self.models.insert(key.clone(), model);
        }
        self.models
            .get(&key)
            .ok_or_else(|| anyhow!("model cache miss for {}", key.0))
    }
}

fn build_input(rgb: &image::RgbImage, size: u32) -> Tensor {
    let resized = image::imageops::resize(rgb, size, size, FilterType::Triangle);
    let s = size as usize;
    tract_ndarray::Array4::from_shape_fn((1, 3, s, s), |(_, channel, y, x)| {
        resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
    })
    .into_tensor()
}

/// Decode a `[1, 4 + classes, candidates]` YOLOv8 head into frame coordinates.
fn decode_output(
    output: &Tensor,
    plan: &DetectionPlan,
    frame: FrameSize,
) -> Result<Vec<DetectedBox>> {
    let view = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?
        .into_dimensionality::<tract_ndarray::Ix3>()
        .context("unexpected model output rank")?;
    let attrs = view.shape()[1];
    let candidates = view.shape()[2];
    if attrs < 5 {
        return Err(anyhow!("model output has {} attributes per candidate", attrs));
    }

    let sx = f64::from(frame.width) / f64::from(plan.imgsz);
    let sy = f64::from(frame.height) / f64::from(plan.imgsz);
    let mut boxes = Vec::new();

    for i in 0..candidates {
        let (class_id, score) = (4..attrs)
            .map(|c| (c - 4, view[[0, c, i]]))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if f64::from(score) < plan.conf {
            continue;
        }
        let cx = f64::from(view[[0, 0, i]]);
        let cy = f64::from(view[[0, 1, i]]);
        let w = f64::from(view[[0, 2, i]]);
        let h = f64::from(view[[0, 3, i]]);
        let label = COCO_LABELS.get(class_id).copied().unwrap_or("object");
        boxes.push(DetectedBox::new(
            (cx - w / 2.0) * sx,
            (cy - h / 2.0) * sy,
            w * sx,
            h * sy,
            f64::from(score),
            label,
        ));
    }
    Ok(boxes)
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn warm_up(&mut self, plan: &DetectionPlan) -> Result<()> {
        self.model_for(plan).map(|_| ())
    }

    fn detect(&mut self, image: &Path, plan: &DetectionPlan) -> Result<Vec<DetectedBox>> {
        let rgb = image::open(image)
            .with_context(|| format!("failed to decode image {}", image.display()))?
            .to_rgb8();
        let frame = FrameSize {
            width: rgb.width(),
            height: rgb.height(),
        };
        let input = build_input(&rgb, plan.imgsz);

        let model = self.model_for(plan)?;
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;

        let raw = decode_output(output, plan, frame)?;
        log::debug!("{}: {} raw candidates", image.display(), raw.len());
        Ok(finalize(raw, plan, Some(frame)))
    }
}
