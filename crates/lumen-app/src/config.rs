//! Application configuration.
//!
//! Settings can be built in code or loaded from a TOML file. Every field is
//! optional in the file; missing fields keep their defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Deserializer};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Number of frames the CPU may record ahead of the GPU.
    pub max_frames_in_flight: usize,
    /// Force FIFO presentation. When off, mailbox is used if the surface offers it.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Sleep between framebuffer size polls while the window is minimized.
    #[serde(rename = "minimized_poll_interval_ms", deserialize_with = "millis")]
    pub minimized_poll_interval: Duration,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Lumen".to_string(),
            width: 1280,
            height: 720,
            max_frames_in_flight: 2,
            vsync: false,
            validation: cfg!(debug_assertions),
            minimized_poll_interval: Duration::from_millis(16),
            target_fps: None,
        }
    }
}

fn millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set how many frames may be in flight at once.
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the minimized-window poll interval.
    pub fn with_minimized_poll_interval(mut self, interval: Duration) -> Self {
        self.minimized_poll_interval = interval;
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, falling back to defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!("Config file not found at {path:?}, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {path:?}"))?;

        tracing::info!("Loaded configuration from {path:?}");
        tracing::debug!("Config: {config:?}");
        Ok(config)
    }

    /// Reject settings the renderer cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_frames_in_flight >= 1,
            "max_frames_in_flight must be at least 1"
        );
        ensure!(
            self.width > 0 && self.height > 0,
            "window size must be non-zero, got {}x{}",
            self.width,
            self.height
        );
        Ok(())
    }

    /// Frame budget implied by `target_fps`.
    pub fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}
