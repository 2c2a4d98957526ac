use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::job::{JobStatus, PrelabelJob};

/// Persistence for prelabel job records.
///
/// Plans and sample metrics are stored verbatim as JSON text.
pub trait JobStore {
    /// Insert or overwrite a job record.
    fn save_job(&mut self, job: &PrelabelJob) -> Result<()>;

    fn load_job(&self, id: &str) -> Result<Option<PrelabelJob>>;

    /// Jobs for a dataset in creation order.
    fn jobs_for_dataset(&self, dataset_id: &str) -> Result<Vec<PrelabelJob>>;
}

pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS jobs (
              id TEXT PRIMARY KEY,
              dataset_id TEXT NOT NULL,
              status TEXT NOT NULL,
              processed INTEGER NOT NULL,
              total INTEGER NOT NULL,
              error TEXT,
              agent_mode INTEGER NOT NULL,
              plan_v0_json TEXT,
              sample_metrics_json TEXT,
              plan_v1_json TEXT,
              created_at INTEGER NOT NULL,
              finished_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_dataset ON jobs(dataset_id);
            "#,
        )?;
        Ok(())
    }
}

const JOB_COLUMNS: &str = "id, dataset_id, status, processed, total, error, agent_mode, \
     plan_v0_json, sample_metrics_json, plan_v1_json, created_at, finished_at";

struct JobRow {
    id: String,
    dataset_id: String,
    status: String,
    processed: i64,
    total: i64,
    error: Option<String>,
    agent_mode: bool,
    plan_v0_json: Option<String>,
    sample_metrics_json: Option<String>,
    plan_v1_json: Option<String>,
    created_at: i64,
    finished_at: Option<i64>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            dataset_id: row.get(1)?,
            status: row.get(2)?,
            processed: row.get(3)?,
            total: row.get(4)?,
            error: row.get(5)?,
            agent_mode: row.get(6)?,
            plan_v0_json: row.get(7)?,
            sample_metrics_json: row.get(8)?,
            plan_v1_json: row.get(9)?,
            created_at: row.get(10)?,
            finished_at: row.get(11)?,
        })
    }

    fn into_job(self) -> Result<PrelabelJob> {
        Ok(PrelabelJob {
            status: JobStatus::parse(&self.status)?,
            processed: usize::try_from(self.processed)
                .map_err(|_| anyhow!("corrupt job {}: negative processed count", self.id))?,
            total: usize::try_from(self.total)
                .map_err(|_| anyhow!("corrupt job {}: negative total", self.id))?,
            error: self.error,
            agent_mode: self.agent_mode,
            plan_v0: from_json(self.plan_v0_json.as_deref())?,
            sample_metrics: from_json(self.sample_metrics_json.as_deref())?,
            plan_v1: from_json(self.plan_v1_json.as_deref())?,
            created_at: u64::try_from(self.created_at)
                .map_err(|_| anyhow!("corrupt job {}: negative created_at", self.id))?,
            finished_at: self
                .finished_at
                .map(u64::try_from)
                .transpose()
                .map_err(|_| anyhow!("corrupt job {}: negative finished_at", self.id))?,
            id: self.id,
            dataset_id: self.dataset_id,
        })
    }
}

fn to_json<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

fn from_json<T: DeserializeOwned>(raw: Option<&str>) -> Result<Option<T>> {
    Ok(raw.map(serde_json::from_str).transpose()?)
}

fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{} exceeds i64 range", field))
}

impl JobStore for SqliteJobStore {
    fn save_job(&mut self, job: &PrelabelJob) -> Result<()> {
        let finished_at = job
            .finished_at
            .map(|ts| to_i64(ts, "finished_at"))
            .transpose()?;
        self.conn.execute(
            r#"
            INSERT INTO jobs(id, dataset_id, status, processed, total, error, agent_mode,
                             plan_v0_json, sample_metrics_json, plan_v1_json, created_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
              status = excluded.status,
              processed = excluded.processed,
              total = excluded.total,
              error = excluded.error,
              agent_mode = excluded.agent_mode,
              plan_v0_json = excluded.plan_v0_json,
              sample_metrics_json = excluded.sample_metrics_json,
              plan_v1_json = excluded.plan_v1_json,
              finished_at = excluded.finished_at
            "#,
            params![
                job.id,
                job.dataset_id,
                job.status.as_str(),
                to_i64(job.processed as u64, "processed")?,
                to_i64(job.total as u64, "total")?,
                job.error,
                job.agent_mode,
                to_json(job.plan_v0.as_ref())?,
                to_json(job.sample_metrics.as_ref())?,
                to_json(job.plan_v1.as_ref())?,
                to_i64(job.created_at, "created_at")?,
                finished_at,
            ],
        )?;
        Ok(())
    }

    fn load_job(&self, id: &str) -> Result<Option<PrelabelJob>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        row.map(JobRow::into_job).transpose()
    }

    fn jobs_for_dataset(&self, dataset_id: &str) -> Result<Vec<PrelabelJob>> {
        let rows = {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM jobs WHERE dataset_id = ?1 ORDER BY rowid ASC",
                JOB_COLUMNS
            ))?;
            let rows = stmt.query_map(params![dataset_id], JobRow::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        rows.into_iter().map(JobRow::into_job).collect()
    }
}

/// In-memory job store for tests and one-shot runs.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Vec<PrelabelJob>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn save_job(&mut self, job: &PrelabelJob) -> Result<()> {
        match self.jobs.iter_mut().find(|existing| existing.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => self.jobs.push(job.clone()),
        }
        Ok(())
    }

    fn load_job(&self, id: &str) -> Result<Option<PrelabelJob>> {
        Ok(self.jobs.iter().find(|job| job.id == id).cloned())
    }

    fn jobs_for_dataset(&self, dataset_id: &str) -> Result<Vec<PrelabelJob>> {
        Ok(self
            .jobs
            .iter()
            .filter(|job| job.dataset_id == dataset_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SampleMetrics;
    use crate::plan::build_initial_plan;

    fn agent_job(dataset_id: &str) -> PrelabelJob {
        let mut job = PrelabelJob::queued(dataset_id, 4, true).unwrap();
        job.plan_v0 = Some(build_initial_plan("quality", "ignore small"));
        job.sample_metrics = Some(SampleMetrics {
            avg_dets_per_image: 2.5,
            pct_zero_det_images: 0.25,
            avg_confidence: 0.61,
            overlap_rate: 0.1,
            tiny_box_ratio: 0.4,
        });
        job
    }

    fn exercise_store(store: &mut dyn JobStore) {
        let mut job = agent_job("ds-1");
        store.save_job(&job).unwrap();
        store.save_job(&agent_job("ds-2")).unwrap();

        job.status = JobStatus::Failed;
        job.processed = 2;
        job.error = Some("detector crashed".to_string());
        job.finished_at = Some(job.created_at + 5);
        store.save_job(&job).unwrap();

        assert_eq!(store.load_job(&job.id).unwrap(), Some(job.clone()));
        assert_eq!(store.load_job("missing").unwrap(), None);

        let second = agent_job("ds-1");
        store.save_job(&second).unwrap();
        let ids: Vec<String> = store
            .jobs_for_dataset("ds-1")
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![job.id, second.id]);
    }

    #[test]
    fn in_memory_store_upserts() {
        exercise_store(&mut InMemoryJobStore::new());
    }

    #[test]
    fn sqlite_store_upserts() {
        let mut store = SqliteJobStore::open(&crate::shared_memory_uri()).unwrap();
        exercise_store(&mut store);
    }

    #[test]
    fn sqlite_store_keeps_plan_json_verbatim() {
        let mut store = SqliteJobStore::open(&crate::shared_memory_uri()).unwrap();
        let job = agent_job("ds-1");
        store.save_job(&job).unwrap();

        let raw: String = store
            .conn
            .query_row(
                "SELECT plan_v0_json FROM jobs WHERE id = ?1",
                params![job.id],
                |row| row.get(0),
            )
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["postprocess"]["min_box_area"], 150);
        assert_eq!(value["conf"], 0.15);
    }
}
