use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use orion_prelabel::config::PrelabelConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PRELABEL_CONFIG",
        "PRELABEL_DB_PATH",
        "PRELABEL_GOAL",
        "PRELABEL_BACKEND",
        "PRELABEL_MODEL_DIR",
        "PRELABEL_DETECTIONS",
        "PRELABEL_SAMPLE_SIZE",
        "PRELABEL_SEED",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(toml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PrelabelConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "prelabel.db");
    assert_eq!(cfg.agent.sample_size, 20);
    assert_eq!(cfg.agent.default_goal, "balanced");
    assert_eq!(cfg.agent.seed, None);
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.model_dir, PathBuf::from("models"));
    assert_eq!(cfg.detector.detections_path, None);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        [storage]
        db_path = "labels_prod.db"

        [agent]
        sample_size = 8
        default_goal = "quality"
        seed = 7

        [detector]
        backend = "replay"
        model_dir = "/opt/models"
        detections_path = "/data/recorded.json"
        "#,
    );

    std::env::set_var("PRELABEL_CONFIG", file.path());
    std::env::set_var("PRELABEL_SAMPLE_SIZE", "32");
    std::env::set_var("PRELABEL_GOAL", "fast");
    std::env::set_var("PRELABEL_BACKEND", " STUB ");

    let cfg = PrelabelConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "labels_prod.db");
    assert_eq!(cfg.agent.sample_size, 32);
    assert_eq!(cfg.agent.default_goal, "fast");
    assert_eq!(cfg.agent.seed, Some(7));
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.model_dir, PathBuf::from("/opt/models"));
    assert_eq!(
        cfg.detector.detections_path,
        Some(PathBuf::from("/data/recorded.json"))
    );

    clear_env();
}

#[test]
fn env_only_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PRELABEL_DB_PATH", "/tmp/jobs.db");
    std::env::set_var("PRELABEL_SEED", "42");
    std::env::set_var("PRELABEL_DETECTIONS", "recorded.json");
    std::env::set_var("PRELABEL_MODEL_DIR", "onnx");

    let cfg = PrelabelConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "/tmp/jobs.db");
    assert_eq!(cfg.agent.seed, Some(42));
    assert_eq!(
        cfg.detector.detections_path,
        Some(PathBuf::from("recorded.json"))
    );
    assert_eq!(cfg.detector.model_dir, PathBuf::from("onnx"));

    clear_env();
}

#[test]
fn rejects_zero_sample_size() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PRELABEL_SAMPLE_SIZE", "0");
    let err = PrelabelConfig::load().unwrap_err();
    assert!(err.to_string().contains("sample size"));

    clear_env();
}

#[test]
fn rejects_malformed_numbers() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PRELABEL_SAMPLE_SIZE", "twenty");
    assert!(PrelabelConfig::load().is_err());
    std::env::remove_var("PRELABEL_SAMPLE_SIZE");

    std::env::set_var("PRELABEL_SEED", "-1");
    assert!(PrelabelConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_unknown_backend() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        [detector]
        backend = "opencv"
        "#,
    );
    std::env::set_var("PRELABEL_CONFIG", file.path());

    let err = PrelabelConfig::load().unwrap_err();
    assert!(err.to_string().contains("unknown detector backend 'opencv'"));

    clear_env();
}

#[test]
fn rejects_invalid_toml() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("[agent\nsample_size = 3");
    std::env::set_var("PRELABEL_CONFIG", file.path());

    let err = PrelabelConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}

#[cfg(not(feature = "backend-tract"))]
#[test]
fn tract_backend_needs_feature() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PRELABEL_BACKEND", "tract");
    let err = PrelabelConfig::load().unwrap_err();
    assert!(err.to_string().contains("backend-tract"));

    clear_env();
}
