use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::backend::DetectorBackend;
use crate::detect::postprocess::{finalize, FrameSize};
use crate::detect::result::DetectedBox;
use crate::plan::DetectionPlan;

/// Raw detector output recorded for one image.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecordedImage {
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(default)]
    pub boxes: Vec<DetectedBox>,
}

/// On-disk layout: `{"images": {"<path>": {"width", "height", "boxes"}}}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecordedDetections {
    pub images: BTreeMap<String, RecordedImage>,
}

/// Replays recorded raw detections through the plan's post-processing.
///
/// Recordings should be made with a permissive detector configuration so
/// that every plan can still narrow them down.
pub struct ReplayBackend {
    recorded: RecordedDetections,
}

impl ReplayBackend {
    pub fn new(recorded: RecordedDetections) -> Self {
        Self { recorded }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read detections file {}: {}", path.display(), e))?;
        let recorded: RecordedDetections = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detections file {}: {}", path.display(), e))?;
        log::info!(
            "ReplayBackend: loaded {} recorded images from {}",
            recorded.images.len(),
            path.display()
        );
        Ok(Self::new(recorded))
    }

    /// Recorded image paths in sorted order.
    pub fn images(&self) -> Vec<PathBuf> {
        self.recorded.images.keys().map(PathBuf::from).collect()
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&mut self, image: &Path, plan: &DetectionPlan) -> Result<Vec<DetectedBox>> {
        let key = image.to_string_lossy();
        let entry = self
            .recorded
            .images
            .get(key.as_ref())
            .ok_or_else(|| anyhow!("no recorded detections for image {}", key))?;
        let frame = match (entry.width, entry.height) {
            (Some(width), Some(height)) => Some(FrameSize { width, height }),
            _ => None,
        };
        Ok(finalize(entry.boxes.clone(), plan, frame))
    }
}
