use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::frame::MAX_DIMENSION;

const DEFAULT_POOL_SIZE: usize = 2;

/// Requested capture geometry and rate. Zero means "unspecified".
///
/// Values are hints: the device may negotiate something else.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl CaptureConfig {
    pub fn has_size_hint(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Width and height are set together or not at all, and stay within
    /// `MAX_DIMENSION`.
    pub fn validate(&self) -> Result<()> {
        if (self.width == 0) != (self.height == 0) {
            return Err(anyhow!(
                "capture width and height must be set together (got {}x{})",
                self.width,
                self.height
            ));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(anyhow!(
                "capture size {}x{} exceeds the {} pixel limit",
                self.width,
                self.height,
                MAX_DIMENSION
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    capture: Option<CaptureSectionFile>,
    output: Option<OutputSectionFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureSectionFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    framerate: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputSectionFile {
    pool_size: Option<usize>,
}

/// Settings for a capture process, layered file -> env.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Device path; empty resolves to the default device.
    pub device: String,
    pub capture: CaptureConfig,
    /// Number of images circulating between pipeline and consumer.
    pub pool_size: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: String::new(),
            capture: CaptureConfig::default(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl CaptureSettings {
    /// Load from the TOML file named by `PICAM_CONFIG` (if any), then apply
    /// `PICAM_*` environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PICAM_CONFIG").ok();
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
        let section = file.capture.unwrap_or_default();
        Self {
            device: section.device.unwrap_or_default(),
            capture: CaptureConfig {
                width: section.width.unwrap_or(0),
                height: section.height.unwrap_or(0),
                framerate: section.framerate.unwrap_or(0),
            },
            pool_size: file
                .output
                .and_then(|output| output.pool_size)
                .unwrap_or(DEFAULT_POOL_SIZE),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("PICAM_DEVICE") {
            if !device.trim().is_empty() {
                self.device = device.trim().to_string();
            }
        }
        if let Some(width) = env_u32("PICAM_WIDTH")? {
            self.capture.width = width;
        }
        if let Some(height) = env_u32("PICAM_HEIGHT")? {
            self.capture.height = height;
        }
        if let Some(framerate) = env_u32("PICAM_FRAMERATE")? {
            self.capture.framerate = framerate;
        }
        Ok(())
    }

    /// The capture config with per-invocation overrides layered on top,
    /// re-validated as a whole.
    pub fn capture_with(
        &self,
        width: Option<u32>,
        height: Option<u32>,
        framerate: Option<u32>,
    ) -> Result<CaptureConfig> {
        let config = CaptureConfig {
            width: width.unwrap_or(self.capture.width),
            height: height.unwrap_or(self.capture.height),
            framerate: framerate.unwrap_or(self.capture.framerate),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(anyhow!("output pool_size must be greater than zero"));
        }
        self.capture.validate()
    }
}

fn env_u32(key: &str) -> Result<Option<u32>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{key} must be a non-negative integer")),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
