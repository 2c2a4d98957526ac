use std::path::Path;

use anyhow::Result;

use crate::detect::result::DetectedBox;
use crate::plan::DetectionPlan;

/// Detector backend trait.
///
/// A backend turns one image into the final boxes for that image under a
/// plan: confidence threshold, deduplication, detection cap and the plan's
/// post-processing are all the backend's job (see
/// [`finalize`](crate::detect::postprocess::finalize)).
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one image.
    fn detect(&mut self, image: &Path, plan: &DetectionPlan) -> Result<Vec<DetectedBox>>;

    /// Optional warm-up hook, called once per plan before a pass.
    fn warm_up(&mut self, _plan: &DetectionPlan) -> Result<()> {
        Ok(())
    }
}
