//! Registry of interchangeable recognition engines
//!
//! Holds at most one engine per id, the active selection, a per-engine
//! "run preprocessing first" policy and the preprocessing pipeline itself.
//! Switching engines never loads or unloads anything.

use image::DynamicImage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use super::ocr::{EngineError, ManagedEngine, OcrResult, RecognitionEngine};
use super::preprocess::PreprocessingPipeline;

/// Registry shared between the scheduler thread and settings code
pub type SharedRegistry = Arc<RwLock<EngineRegistry>>;

/// Identifier of a registered engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(String);

impl EngineId {
    /// Lightweight CPU engine
    pub const LIGHTWEIGHT: &'static str = "lightweight";
    /// Vision-language model engine
    pub const VLM: &'static str = "vlm";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn lightweight() -> Self {
        Self::new(Self::LIGHTWEIGHT)
    }

    pub fn vlm() -> Self {
        Self::new(Self::VLM)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Summary of a registered engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInfo {
    pub id: EngineId,
    pub name: String,
    pub requires_specialized_hardware: bool,
    pub loaded: bool,
    pub preprocess: bool,
}

#[derive(Debug)]
pub struct EngineRegistry {
    engines: BTreeMap<EngineId, ManagedEngine>,
    active: Option<EngineId>,
    preprocess: HashMap<EngineId, bool>,
    pipeline: PreprocessingPipeline,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new(PreprocessingPipeline::default())
    }
}

impl EngineRegistry {
    pub fn new(pipeline: PreprocessingPipeline) -> Self {
        Self {
            engines: BTreeMap::new(),
            active: None,
            preprocess: HashMap::new(),
            pipeline,
        }
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Add or replace the engine for `id`.
    ///
    /// The first registered engine becomes active. A replaced engine is
    /// unloaded before it is dropped; the preprocessing policy for `id` is
    /// kept if one was already set.
    pub fn register(&mut self, id: EngineId, engine: Box<dyn RecognitionEngine>) {
        let managed = ManagedEngine::new(engine);
        self.preprocess
            .entry(id.clone())
            .or_insert_with(|| managed.preprocess_by_default());

        info!("Registered OCR engine '{}' ({})", id, managed.name());

        if let Some(previous) = self.engines.insert(id.clone(), managed) {
            if let Err(e) = previous.unload() {
                warn!("Failed to unload replaced engine '{}': {}", id, e);
            }
        }

        if self.active.is_none() {
            self.active = Some(id);
        }
    }

    pub fn is_registered(&self, id: &EngineId) -> bool {
        self.engines.contains_key(id)
    }

    /// Switch the active engine without loading it.
    ///
    /// Unknown ids are rejected and the previous selection is kept.
    pub fn set_active(&mut self, id: &EngineId) -> Result<(), EngineError> {
        if !self.engines.contains_key(id) {
            return Err(EngineError::UnknownEngine(id.to_string()));
        }
        if self.active.as_ref() != Some(id) {
            info!("Active OCR engine: {}", id);
        }
        self.active = Some(id.clone());
        Ok(())
    }

    pub fn active_id(&self) -> Option<&EngineId> {
        self.active.as_ref()
    }

    pub fn active_engine(&self) -> Option<&ManagedEngine> {
        self.active.as_ref().and_then(|id| self.engines.get(id))
    }

    pub fn engine(&self, id: &EngineId) -> Option<&ManagedEngine> {
        self.engines.get(id)
    }

    /// True when an active engine is registered
    pub fn is_ready(&self) -> bool {
        self.active_engine().is_some()
    }

    /// Preprocessing policy of the active engine
    pub fn should_preprocess(&self) -> bool {
        self.active
            .as_ref()
            .map_or(true, |id| self.preprocess_enabled_for(id))
    }

    pub fn set_should_preprocess(&mut self, enabled: bool) {
        if let Some(id) = self.active.clone() {
            self.set_preprocess_for(id, enabled);
        }
    }

    pub fn preprocess_enabled_for(&self, id: &EngineId) -> bool {
        self.preprocess.get(id).copied().unwrap_or(true)
    }

    /// Set the policy for any id, registered or not yet
    pub fn set_preprocess_for(&mut self, id: EngineId, enabled: bool) {
        self.preprocess.insert(id, enabled);
    }

    /// Policies for every id that has one
    pub fn preprocess_policies(&self) -> BTreeMap<EngineId, bool> {
        self.preprocess
            .iter()
            .map(|(id, enabled)| (id.clone(), *enabled))
            .collect()
    }

    pub fn pipeline(&self) -> &PreprocessingPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut PreprocessingPipeline {
        &mut self.pipeline
    }

    pub fn set_pipeline(&mut self, pipeline: PreprocessingPipeline) {
        self.pipeline = pipeline;
    }

    /// Recognize with the active engine, preprocessing first if its policy says so
    pub fn process(&self, image: &DynamicImage) -> Result<OcrResult, EngineError> {
        let engine = self.active_engine().ok_or(EngineError::NoActiveEngine)?;

        if self.should_preprocess() {
            let processed = self.pipeline.process(image);
            engine.recognize(&processed, true)
        } else {
            engine.recognize(image, false)
        }
    }

    /// Always preprocess and hand back the image the engine saw
    pub fn process_with_preview(
        &self,
        image: &DynamicImage,
    ) -> Result<(OcrResult, DynamicImage), EngineError> {
        let engine = self.active_engine().ok_or(EngineError::NoActiveEngine)?;
        let processed = self.pipeline.process(image);
        let result = engine.recognize(&processed, true)?;
        Ok((result, processed))
    }

    pub fn available_engines(&self) -> Vec<EngineInfo> {
        self.engines
            .iter()
            .map(|(id, engine)| EngineInfo {
                id: id.clone(),
                name: engine.name().to_string(),
                requires_specialized_hardware: engine.requires_specialized_hardware(),
                loaded: engine.is_loaded(),
                preprocess: self.preprocess_enabled_for(id),
            })
            .collect()
    }

    /// Unload every engine, continuing past individual failures
    pub fn unload_all(&self) {
        for (id, engine) in &self.engines {
            if let Err(e) = engine.unload() {
                warn!("Failed to unload engine '{}': {}", id, e);
            }
        }
    }
}
