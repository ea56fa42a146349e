//! Application Configuration
//!
//! User settings and preferences stored in TOML format. Every field has a
//! default, so a partial file is valid and a corrupt one never blocks
//! startup.

use anyhow::anyhow;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::vision::{EngineId, EngineRegistry, PreprocessingPipeline, StepConfig};

/// Errors reading or writing the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O failed for {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub capture: CaptureSettings,
    pub detection: DetectionConfig,
    pub ocr: OcrConfig,
    pub translation: TranslationConfig,
}

/// Polling and display settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Time between pipeline cycles
    pub pipeline_interval_ms: u64,
    /// Abort the rest of a cycle after this long (0 = no limit)
    pub cycle_timeout_ms: u64,
    /// Longest text shown for a region
    pub max_display_chars: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            pipeline_interval_ms: 100,
            cycle_timeout_ms: 0,
            max_display_chars: crate::display::DEFAULT_MAX_CHARS,
        }
    }
}

/// Capture-related settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Target window title (partial match)
    pub target_window: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Mean luminance difference below which a region counts as unchanged
    pub change_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            change_threshold: crate::vision::DEFAULT_CHANGE_THRESHOLD,
        }
    }
}

/// Recognition engines and preprocessing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub active_engine: String,
    /// Language tag for the Windows OCR engine
    pub windows_language: String,
    /// Whether each engine runs the preprocessing pipeline first
    pub preprocess_by_engine: BTreeMap<String, bool>,
    /// Serialized pipeline; absent means the default step list
    #[serde(deserialize_with = "lenient_steps")]
    pub pipeline: Option<Vec<StepConfig>>,
    pub vlm: VlmConfig,
}

impl Default for OcrConfig {
    fn default() -> Self {
        let preprocess_by_engine = BTreeMap::from([
            (EngineId::LIGHTWEIGHT.to_string(), true),
            (EngineId::VLM.to_string(), false),
        ]);

        Self {
            active_engine: EngineId::LIGHTWEIGHT.to_string(),
            windows_language: "ja".to_string(),
            preprocess_by_engine,
            pipeline: None,
            vlm: VlmConfig::default(),
        }
    }
}

/// Malformed step entries are dropped one at a time so a bad pipeline
/// never takes the rest of the file down with it
fn lenient_steps<'de, D>(deserializer: D) -> Result<Option<Vec<StepConfig>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(entries) = Option::<Vec<toml::Value>>::deserialize(deserializer)? else {
        return Ok(None);
    };

    let steps = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match entry.try_into::<StepConfig>() {
            Ok(step) => Some(step),
            Err(e) => {
                warn!("Skipping preprocessing step #{}: {}", index + 1, e);
                None
            }
        })
        .collect();
    Ok(Some(steps))
}

/// Vision-language model endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VlmConfig {
    pub url: String,
    pub model: String,
    pub prompt: String,
    pub timeout_secs: u64,
}

impl Default for VlmConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "qwen2.5vl:7b".to_string(),
            prompt: "Transcribe all Japanese text in this image exactly as written. \
                     Output only the text, with no commentary."
                .to_string(),
            timeout_secs: 60,
        }
    }
}

/// Translation backend endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub url: String,
    pub model: String,
    pub source_language: String,
    pub target_language: String,
    pub timeout_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            source_language: "Japanese".to_string(),
            target_language: "English".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Default location of `config.toml` under the platform config directory
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "screentranslator", "ScreenTranslator")
        .ok_or_else(|| anyhow!("Could not determine config directory"))?;
    Ok(proj_dirs.config_dir().join("config.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Save configuration to file, creating its directory if needed
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    let io_err = |source: std::io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    std::fs::write(path, content).map_err(io_err)
}

/// Load `path`, falling back to defaults when it is missing or unreadable
pub fn load_or_default(path: &Path) -> AppConfig {
    if !path.exists() {
        info!("No configuration at {:?}, using defaults", path);
        return AppConfig::default();
    }
    match load_config(path) {
        Ok(config) => {
            info!("Loaded configuration from {:?}", path);
            config
        }
        Err(e) => {
            warn!("Ignoring configuration at {:?}: {}", path, e);
            AppConfig::default()
        }
    }
}

/// Persistent preferences: the config plus where it is saved
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    config: AppConfig,
    path: Option<PathBuf>,
}

impl Preferences {
    /// Load from `path`; later changes are written back there
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            config: load_or_default(&path),
            path: Some(path),
        }
    }

    /// Preferences that are never written to disk
    pub fn in_memory(config: AppConfig) -> Self {
        Self { config, path: None }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        match &self.path {
            Some(path) => save_config(&self.config, path),
            None => Ok(()),
        }
    }

    /// Apply `change` and persist the result
    pub fn update(&mut self, change: impl FnOnce(&mut AppConfig)) -> Result<(), ConfigError> {
        change(&mut self.config);
        self.save()
    }

    pub fn set_active_engine(&mut self, id: &EngineId) -> Result<(), ConfigError> {
        self.update(|c| c.ocr.active_engine = id.as_str().to_string())
    }

    pub fn set_pipeline_interval_ms(&mut self, interval_ms: u64) -> Result<(), ConfigError> {
        self.update(|c| c.general.pipeline_interval_ms = interval_ms)
    }

    pub fn set_engine_preprocess(&mut self, id: &EngineId, enabled: bool) -> Result<(), ConfigError> {
        self.update(|c| {
            c.ocr
                .preprocess_by_engine
                .insert(id.as_str().to_string(), enabled);
        })
    }

    pub fn set_pipeline(&mut self, pipeline: &PreprocessingPipeline) -> Result<(), ConfigError> {
        let steps = pipeline.to_config();
        self.update(|c| c.ocr.pipeline = Some(steps))
    }

    /// The stored pipeline, or the default step list
    pub fn pipeline(&self) -> PreprocessingPipeline {
        match &self.config.ocr.pipeline {
            Some(steps) => PreprocessingPipeline::from_config(steps),
            None => PreprocessingPipeline::default(),
        }
    }

    /// Push stored pipeline, policies and active engine into `registry`.
    ///
    /// An unknown stored engine id keeps the registry's current engine.
    pub fn apply_to_registry(&self, registry: &mut EngineRegistry) {
        registry.set_pipeline(self.pipeline());

        for (id, enabled) in &self.config.ocr.preprocess_by_engine {
            registry.set_preprocess_for(EngineId::from(id.as_str()), *enabled);
        }

        let active = EngineId::from(self.config.ocr.active_engine.as_str());
        if let Err(e) = registry.set_active(&active) {
            warn!(
                "Stored engine unavailable ({}), keeping {}",
                e,
                registry
                    .active_id()
                    .map(EngineId::as_str)
                    .unwrap_or("none")
            );
        }
    }

    /// Record the registry's current choices and persist them
    pub fn capture_registry(&mut self, registry: &EngineRegistry) -> Result<(), ConfigError> {
        let active = registry.active_id().cloned();
        let policies = registry.preprocess_policies();
        let steps = registry.pipeline().to_config();

        self.update(|c| {
            if let Some(active) = active {
                c.ocr.active_engine = active.as_str().to_string();
            }
            for (id, enabled) in policies {
                c.ocr.preprocess_by_engine.insert(id.as_str().to_string(), enabled);
            }
            c.ocr.pipeline = Some(steps);
        })
    }
}
