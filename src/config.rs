use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::PipelineConfig;
use crate::session::SessionOptions;

const DEFAULT_DEVICE: &str = "stub://oak";
const DEFAULT_SAVE_PATH: &str = "./camera_captures";
const DEFAULT_TICK_MS: u64 = 30;
const DEFAULT_SAVE_INTERVAL_MS: u64 = 500;
const DEFAULT_STOP_GRACE_MS: u64 = 2_000;
const DEFAULT_STATUS_TTL_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    device: Option<String>,
    save_path: Option<PathBuf>,
    timing: Option<TimingConfigFile>,
    pipeline: Option<PipelineConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    tick_ms: Option<u64>,
    save_interval_ms: Option<u64>,
    stop_grace_ms: Option<u64>,
    status_ttl_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device: String,
    pub save_path: PathBuf,
    pub tick: Duration,
    pub save_interval: Duration,
    pub stop_grace: Duration,
    pub status_ttl: Duration,
    pub pipeline: PipelineConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from_file(CaptureConfigFile::default())
    }
}

impl CaptureConfig {
    /// Defaults, then the JSON file named by `CAPTURE_CONFIG`, then
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAPTURE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Self {
        let timing = file.timing.unwrap_or_default();
        Self {
            device: file.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            save_path: file
                .save_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SAVE_PATH)),
            tick: Duration::from_millis(timing.tick_ms.unwrap_or(DEFAULT_TICK_MS)),
            save_interval: Duration::from_millis(
                timing.save_interval_ms.unwrap_or(DEFAULT_SAVE_INTERVAL_MS),
            ),
            stop_grace: Duration::from_millis(
                timing.stop_grace_ms.unwrap_or(DEFAULT_STOP_GRACE_MS),
            ),
            status_ttl: Duration::from_millis(
                timing.status_ttl_ms.unwrap_or(DEFAULT_STATUS_TTL_MS),
            ),
            pipeline: file.pipeline.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("CAPTURE_DEVICE") {
            if !device.trim().is_empty() {
                self.device = device;
            }
        }
        if let Ok(path) = std::env::var("CAPTURE_SAVE_PATH") {
            if !path.trim().is_empty() {
                self.save_path = PathBuf::from(path);
            }
        }
        if let Some(tick) = env_millis("CAPTURE_TICK_MS")? {
            self.tick = tick;
        }
        if let Some(interval) = env_millis("CAPTURE_SAVE_INTERVAL_MS")? {
            self.save_interval = interval;
        }
        if let Some(grace) = env_millis("CAPTURE_STOP_GRACE_MS")? {
            self.stop_grace = grace;
        }
        if let Some(ttl) = env_millis("CAPTURE_STATUS_TTL_MS")? {
            self.status_ttl = ttl;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("tick", self.tick),
            ("save interval", self.save_interval),
            ("stop grace", self.stop_grace),
            ("status ttl", self.status_ttl),
        ] {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        if self.device.trim().is_empty() {
            return Err(anyhow!("device must not be empty"));
        }
        if self.save_path.as_os_str().is_empty() {
            return Err(anyhow!("save path must not be empty"));
        }
        self.pipeline
            .validate()
            .map_err(|e| anyhow!("invalid pipeline: {}", e))?;
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            pipeline: self.pipeline.clone(),
            save_root: self.save_path.clone(),
            tick: self.tick,
            save_interval: self.save_interval,
            stop_grace: self.stop_grace,
            status_ttl: self.status_ttl,
        }
    }
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(raw) => {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be an integer number of milliseconds", key))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        Err(_) => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
