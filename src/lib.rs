//! Orion prelabel
//!
//! Auto-labeling for image datasets with an object detector, including an
//! adaptive "agent" mode that tunes the detector on a sample before the
//! full run.
//!
//! # Pipeline
//!
//! 1. **Plan**: a goal (`fast`, `balanced`, `quality`) and free-text
//!    instructions become a [`DetectionPlan`] (plan_v0).
//! 2. **Sample**: the detector runs on a small random subset with plan_v0.
//! 3. **Evaluate**: the sample is scored into [`SampleMetrics`].
//! 4. **Refine**: deterministic rules turn plan_v0 and the metrics into plan_v1.
//! 5. **Full run**: every image is labeled with plan_v1.
//!
//! Steps 1, 3 and 4 are pure functions. Steps 2 and 5 go through a
//! [`DetectorBackend`]; [`PrelabelRunner`] drives the whole job and records
//! its progress in a [`JobStore`].
//!
//! # Module Structure
//!
//! - `plan`: goals, plans and the plan builder
//! - `metrics`: sample metrics and box overlap
//! - `refine`: plan refinement
//! - `detect`: detector backends, registry and post-processing
//! - `job`, `storage`: job orchestration and persistence
//! - `config`: file and environment configuration

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod detect;
pub mod job;
pub mod metrics;
pub mod plan;
pub mod refine;
pub mod storage;

pub use detect::{BackendRegistry, DetectedBox, DetectorBackend, ReplayBackend, StubBackend};
pub use job::{JobStatus, PrelabelJob, PrelabelRequest, PrelabelRunner};
pub use metrics::{compute_sample_metrics, SampleMetrics};
pub use plan::{build_initial_plan, DetectionPlan, Goal, PostProcess};
pub use refine::refine_plan;
pub use storage::{InMemoryJobStore, JobStore, SqliteJobStore};

#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;

/// URI for a private, shared-cache in-memory SQLite database.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:orion_prelabel_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

pub(crate) fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
