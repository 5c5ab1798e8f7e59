//! Engine configuration
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! { "width": 1280, "height": 720, "samples": 8, "output": "depth" }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use rz_render::{DEFAULT_CHUNK_ROWS, OutputType, RenderSettings};
use serde::{Deserialize, Serialize};

use crate::runner::Backoff;
use crate::scene::SceneError;

/// Image a render delivers, as written in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Output {
    #[default]
    Final,
    Depth,
    Ao,
    Shadows,
    Fog,
}

impl From<Output> for OutputType {
    fn from(output: Output) -> Self {
        match output {
            Output::Final => OutputType::FinalImage,
            Output::Depth => OutputType::DepthMap,
            Output::Ao => OutputType::Ao,
            Output::Shadows => OutputType::Shadows,
            Output::Fog => OutputType::FogDensity,
        }
    }
}

/// Settings of an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub width: u32,
    pub height: u32,
    /// Hit passes per chunk
    pub reflections: u32,
    pub samples: u32,
    pub output: Output,
    pub minimal_preview: bool,
    /// Rows per scheduler step
    pub chunk_rows: u32,
    /// Compile modules on the rayon pool
    pub async_compile: bool,
    /// First delay while waiting for compilation
    pub backoff_initial_ms: u64,
    /// Longest delay while waiting for compilation
    pub backoff_max_ms: u64,
    pub time: f32,
    pub seed: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            reflections: 2,
            samples: 1,
            output: Output::Final,
            minimal_preview: false,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            async_compile: true,
            backoff_initial_ms: 1,
            backoff_max_ms: 64,
            time: 0.0,
            seed: 0.0,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, SceneError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON config file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String, SceneError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_reflections(mut self, reflections: u32) -> Self {
        self.reflections = reflections;
        self
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    pub fn with_minimal_preview(mut self, enabled: bool) -> Self {
        self.minimal_preview = enabled;
        self
    }

    pub fn with_chunk_rows(mut self, rows: u32) -> Self {
        self.chunk_rows = rows;
        self
    }

    pub fn with_async_compile(mut self, enabled: bool) -> Self {
        self.async_compile = enabled;
        self
    }

    pub fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.backoff_initial_ms = initial_ms;
        self.backoff_max_ms = max_ms;
        self
    }

    /// Settings of one render, without callbacks
    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings::new()
            .with_reflections(self.reflections)
            .with_samples(self.samples)
            .with_output(self.output.into())
            .with_time(self.time)
            .with_seed(self.seed)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "width": 64, "output": "shadows" }"#).unwrap();
        assert_eq!(config.width, 64);
        assert_eq!(config.height, 600);
        assert_eq!(config.output, Output::Shadows);
        assert_eq!(OutputType::from(config.output), OutputType::Shadows);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EngineConfig::new().with_size(32, 16).with_samples(4);
        let parsed = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(matches!(
            EngineConfig::from_json("{ \"width\": \"wide\" }"),
            Err(SceneError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_render_settings_carry_values() {
        let settings = EngineConfig::new()
            .with_reflections(3)
            .with_output(Output::Ao)
            .render_settings();
        assert_eq!(settings.reflections, 3);
        assert_eq!(settings.output, OutputType::Ao);
    }
}
