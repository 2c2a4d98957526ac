//! Prelabel jobs: plan, sample, evaluate, refine, then label the full set.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::detect::{BackendRegistry, DetectedBox};
use crate::metrics::{compute_sample_metrics, SampleMetrics};
use crate::plan::{build_initial_plan, DetectionPlan};
use crate::refine::refine_plan;
use crate::storage::JobStore;

/// Images scored before committing to the full run.
pub const DEFAULT_SAMPLE_SIZE: usize = 20;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(anyhow!("unknown job status '{}'", other)),
        }
    }
}

/// What the caller asked for.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PrelabelRequest {
    /// `fast`, `balanced` or `quality`; anything else behaves as `balanced`.
    #[serde(default = "default_goal")]
    pub goal: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub agent_mode: bool,
}

fn default_goal() -> String {
    "balanced".to_string()
}

impl Default for PrelabelRequest {
    fn default() -> Self {
        Self {
            goal: default_goal(),
            instructions: String::new(),
            agent_mode: false,
        }
    }
}

/// Persisted job record. Plans and metrics are only set in agent mode.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PrelabelJob {
    pub id: String,
    pub dataset_id: String,
    pub status: JobStatus,
    pub processed: usize,
    pub total: usize,
    pub error: Option<String>,
    pub agent_mode: bool,
    pub plan_v0: Option<DetectionPlan>,
    pub sample_metrics: Option<SampleMetrics>,
    pub plan_v1: Option<DetectionPlan>,
    /// Seconds since epoch.
    pub created_at: u64,
    pub finished_at: Option<u64>,
}

impl PrelabelJob {
    pub fn queued(dataset_id: &str, total: usize, agent_mode: bool) -> Result<Self> {
        if total == 0 {
            return Err(anyhow!("no images to label"));
        }
        Ok(Self {
            id: new_job_id(),
            dataset_id: dataset_id.to_string(),
            status: JobStatus::Queued,
            processed: 0,
            total,
            error: None,
            agent_mode,
            plan_v0: None,
            sample_metrics: None,
            plan_v1: None,
            created_at: crate::now_s()?,
            finished_at: None,
        })
    }
}

/// Random 128-bit job id, hex encoded.
pub fn new_job_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Receives the final boxes for each image of the full run.
pub type AnnotationSink<'s> = dyn FnMut(&Path, &[DetectedBox]) -> Result<()> + 's;

/// Drives one prelabel job against a detector registry and a job store.
pub struct PrelabelRunner<'a> {
    registry: &'a BackendRegistry,
    store: &'a mut dyn JobStore,
    backend: Option<String>,
    sample_size: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> PrelabelRunner<'a> {
    pub fn new(registry: &'a BackendRegistry, store: &'a mut dyn JobStore) -> Self {
        Self {
            registry,
            store,
            backend: None,
            sample_size: DEFAULT_SAMPLE_SIZE,
            cancel: None,
        }
    }

    /// Use a named backend instead of the registry default.
    pub fn with_backend(mut self, name: &str) -> Self {
        self.backend = Some(name.to_string());
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// The job fails with `cancelled` at the next image once the flag is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Create and persist a queued job for a dataset.
    pub fn enqueue(
        &mut self,
        dataset_id: &str,
        request: &PrelabelRequest,
        images: &[PathBuf],
    ) -> Result<PrelabelJob> {
        let job = PrelabelJob::queued(dataset_id, images.len(), request.agent_mode)?;
        self.store.save_job(&job)?;
        log::info!(
            "job {} queued: dataset={} images={} agent_mode={}",
            job.id,
            job.dataset_id,
            job.total,
            job.agent_mode
        );
        Ok(job)
    }

    /// Run a queued job to completion.
    ///
    /// On error the job is persisted as failed with the error message and the
    /// error is returned.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        job: &mut PrelabelJob,
        request: &PrelabelRequest,
        images: &[PathBuf],
        rng: &mut R,
        sink: &mut AnnotationSink<'_>,
    ) -> Result<()> {
        if images.len() != job.total {
            return Err(anyhow!(
                "job {} expects {} images, got {}",
                job.id,
                job.total,
                images.len()
            ));
        }
        job.status = JobStatus::Running;
        self.store.save_job(job)?;

        match self.execute(job, request, images, rng, sink) {
            Ok(()) => {
                job.status = JobStatus::Complete;
                job.finished_at = Some(crate::now_s()?);
                self.store.save_job(job)?;
                log::info!("job {} complete: {} images", job.id, job.processed);
                Ok(())
            }
            Err(err) => {
                job.status = JobStatus::Failed;
                job.error = Some(format!("{:#}", err));
                log::warn!("job {} failed: {:#}", job.id, err);
                if let Err(save_err) = self.store.save_job(job) {
                    log::error!("job {}: failed to record failure: {}", job.id, save_err);
                }
                Err(err)
            }
        }
    }

    fn execute<R: Rng + ?Sized>(
        &mut self,
        job: &mut PrelabelJob,
        request: &PrelabelRequest,
        images: &[PathBuf],
        rng: &mut R,
        sink: &mut AnnotationSink<'_>,
    ) -> Result<()> {
        let plan = build_initial_plan(&request.goal, &request.instructions);
        log_plan(&job.id, "plan_v0", &plan);

        let final_plan = if request.agent_mode {
            job.plan_v0 = Some(plan.clone());
            self.store.save_job(job)?;

            let sample_size = self.sample_size.min(images.len());
            let sample: Vec<&PathBuf> = images.choose_multiple(rng, sample_size).collect();
            log::info!("job {}: sample run over {} images", job.id, sample.len());

            self.warm_up(&plan)?;
            let mut sample_results = Vec::with_capacity(sample.len());
            for image in sample {
                self.check_cancelled()?;
                sample_results.push(self.detect(image, &plan)?);
            }

            let metrics = compute_sample_metrics(&sample_results);
            log::info!(
                "job {}: sample metrics dets/img={:.2} zero={:.2} conf={:.2} overlap={:.2} tiny={:.2}",
                job.id,
                metrics.avg_dets_per_image,
                metrics.pct_zero_det_images,
                metrics.avg_confidence,
                metrics.overlap_rate,
                metrics.tiny_box_ratio
            );
            job.sample_metrics = Some(metrics.clone());
            self.store.save_job(job)?;

            let refined = refine_plan(&plan, &metrics);
            log_plan(&job.id, "plan_v1", &refined);
            job.plan_v1 = Some(refined.clone());
            self.store.save_job(job)?;
            refined
        } else {
            plan
        };

        self.warm_up(&final_plan)?;
        for (idx, image) in images.iter().enumerate() {
            self.check_cancelled()?;
            let boxes = self.detect(image, &final_plan)?;
            log::debug!("{}: {} boxes", image.display(), boxes.len());
            sink(image.as_path(), boxes.as_slice())?;
            job.processed = idx + 1;
            self.store.save_job(job)?;
        }
        Ok(())
    }

    fn detect(&self, image: &Path, plan: &DetectionPlan) -> Result<Vec<DetectedBox>> {
        self.registry.detect(self.backend.as_deref(), image, plan)
    }

    fn warm_up(&self, plan: &DetectionPlan) -> Result<()> {
        self.registry.warm_up(self.backend.as_deref(), plan)
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(anyhow!("cancelled")),
            _ => Ok(()),
        }
    }
}

fn log_plan(job_id: &str, stage: &str, plan: &DetectionPlan) {
    log::info!(
        "job {}: {} model={} imgsz={} conf={:.2} iou={:.2} max_det={} min_box_area={} fingerprint={}",
        job_id,
        stage,
        plan.model,
        plan.imgsz,
        plan.conf,
        plan.iou,
        plan.max_det,
        plan.postprocess.min_box_area,
        &plan.fingerprint()[..12]
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_dataset_cannot_be_queued() {
        let err = PrelabelJob::queued("ds", 0, true).unwrap_err();
        assert_eq!(err.to_string(), "no images to label");
    }

    #[test]
    fn queued_job_starts_clean() {
        let job = PrelabelJob::queued("ds", 3, false).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.processed, 0);
        assert_eq!(job.total, 3);
        assert_eq!(job.id.len(), 32);
        assert!(job.plan_v0.is_none() && job.plan_v1.is_none());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Complete,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::parse("paused").is_err());
    }

    #[test]
    fn request_defaults_to_balanced_direct_mode() {
        let request: PrelabelRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, PrelabelRequest::default());
        assert_eq!(request.goal, "balanced");
    }
}
