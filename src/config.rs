use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::job::DEFAULT_SAMPLE_SIZE;

const DEFAULT_DB_PATH: &str = "prelabel.db";
const DEFAULT_GOAL: &str = "balanced";
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_MODEL_DIR: &str = "models";
const KNOWN_BACKENDS: [&str; 3] = ["stub", "replay", "tract"];

#[derive(Debug, Deserialize, Default)]
struct PrelabelConfigFile {
    storage: Option<StorageConfigFile>,
    agent: Option<AgentConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    db_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AgentConfigFile {
    sample_size: Option<usize>,
    default_goal: Option<String>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_dir: Option<PathBuf>,
    detections_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PrelabelConfig {
    pub db_path: String,
    pub agent: AgentSettings,
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub sample_size: usize,
    pub default_goal: String,
    /// Fixed seed for sample selection; random when unset.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_dir: PathBuf,
    /// Recorded detections for the `replay` backend.
    pub detections_path: Option<PathBuf>,
}

impl PrelabelConfig {
    /// File named by `PRELABEL_CONFIG` (TOML), then `PRELABEL_*` overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PRELABEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PrelabelConfigFile) -> Self {
        let db_path = file
            .storage
            .and_then(|storage| storage.db_path)
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let agent = file.agent.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        Self {
            db_path,
            agent: AgentSettings {
                sample_size: agent.sample_size.unwrap_or(DEFAULT_SAMPLE_SIZE),
                default_goal: agent
                    .default_goal
                    .unwrap_or_else(|| DEFAULT_GOAL.to_string()),
                seed: agent.seed,
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                model_dir: detector
                    .model_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
                detections_path: detector.detections_path,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("PRELABEL_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(goal) = std::env::var("PRELABEL_GOAL") {
            if !goal.trim().is_empty() {
                self.agent.default_goal = goal.trim().to_string();
            }
        }
        if let Ok(backend) = std::env::var("PRELABEL_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_lowercase();
            }
        }
        if let Ok(dir) = std::env::var("PRELABEL_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.detector.model_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("PRELABEL_DETECTIONS") {
            if !path.trim().is_empty() {
                self.detector.detections_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(size) = std::env::var("PRELABEL_SAMPLE_SIZE") {
            self.agent.sample_size = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("PRELABEL_SAMPLE_SIZE must be a positive integer"))?;
        }
        if let Ok(seed) = std::env::var("PRELABEL_SEED") {
            let seed: u64 = seed
                .trim()
                .parse()
                .map_err(|_| anyhow!("PRELABEL_SEED must be an unsigned integer"))?;
            self.agent.seed = Some(seed);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.agent.sample_size == 0 {
            return Err(anyhow!("sample size must be greater than zero"));
        }
        if !KNOWN_BACKENDS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}' (expected one of {})",
                self.detector.backend,
                KNOWN_BACKENDS.join(", ")
            ));
        }
        if self.detector.backend == "tract" && !cfg!(feature = "backend-tract") {
            return Err(anyhow!(
                "detector backend 'tract' requires the backend-tract feature"
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PrelabelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
