use std::path::Path;

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::postprocess::{finalize, FrameSize};
use crate::detect::result::DetectedBox;
use crate::plan::DetectionPlan;

const STUB_FRAME: FrameSize = FrameSize {
    width: 640,
    height: 480,
};
const STUB_LABELS: [&str; 4] = ["person", "car", "dog", "bicycle"];

/// Stub backend for testing. Derives candidate boxes from a hash of the image path.
///
/// The same path always yields the same candidates, so runs are reproducible
/// without a model.
pub struct StubBackend {
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { calls: 0 }
    }

    /// Number of `detect` calls served.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn candidates(image: &Path) -> Vec<DetectedBox> {
        let digest: [u8; 32] = Sha256::digest(image.to_string_lossy().as_bytes()).into();
        // 0..=7 candidates; each uses four digest bytes.
        let count = (digest[0] % 8) as usize;
        digest[1..]
            .chunks_exact(4)
            .take(count)
            .map(|c| {
                let w = 8.0 + f64::from(c[2] % 120);
                let h = 8.0 + f64::from(c[3] % 120);
                let x = f64::from(c[0]) / 255.0 * (f64::from(STUB_FRAME.width) - w);
                let y = f64::from(c[1]) / 255.0 * (f64::from(STUB_FRAME.height) - h);
                let confidence = 0.05 + f64::from(c[0] ^ c[3]) / 255.0 * 0.9;
                let label = STUB_LABELS[(c[1] as usize) % STUB_LABELS.len()];
                DetectedBox::new(x, y, w, h, confidence, label)
            })
            .collect()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &Path, plan: &DetectionPlan) -> Result<Vec<DetectedBox>> {
        self.calls += 1;
        Ok(finalize(Self::candidates(image), plan, Some(STUB_FRAME)))
    }
}
