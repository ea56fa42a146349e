//! Recognition engine contract and lifecycle wrapper
//!
//! Backends implement [`RecognitionEngine`]. The registry never calls them
//! directly; each one is wrapped in a [`ManagedEngine`] that loads it on
//! first use, times loading separately from recognition, and serializes
//! access so a model is never loaded twice.

use image::DynamicImage;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by recognition engines and the registry
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine '{0}' is not registered")]
    UnknownEngine(String),

    #[error("no recognition engine is active")]
    NoActiveEngine,

    #[error("failed to load {engine}: {reason}")]
    LoadFailed { engine: String, reason: String },

    #[error("{engine} recognition failed: {reason}")]
    RecognitionFailed { engine: String, reason: String },

    #[error("engine backend error: {0}")]
    Backend(String),
}

/// Text a backend read from one image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognized {
    pub text: String,
    /// 0.0 - 1.0; backends without a confidence report 1.0
    pub confidence: f32,
}

impl Recognized {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Result of one recognition call
#[derive(Debug, Clone, PartialEq)]
pub struct OcrResult {
    pub text: String,
    pub confidence: f32,
    pub engine_name: String,
    /// Recognition time only; load time is tracked on the engine
    pub processing_time: Duration,
    pub preprocessed: bool,
}

impl OcrResult {
    /// No text found. This is not a failure.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn processing_ms(&self) -> f64 {
        self.processing_time.as_secs_f64() * 1000.0
    }
}

/// A pluggable text recognition backend
pub trait RecognitionEngine: Send {
    /// Human-readable name
    fn name(&self) -> &str;

    /// Needs a GPU or a remote accelerator to be practical
    fn requires_specialized_hardware(&self) -> bool {
        false
    }

    /// Initial preprocessing policy when the engine is registered
    fn preprocess_by_default(&self) -> bool {
        true
    }

    /// Acquire heavy resources. Only called while unloaded.
    fn load(&mut self) -> Result<(), EngineError>;

    /// Read text from `image`. Only called after a successful `load`.
    fn recognize(&mut self, image: &DynamicImage) -> Result<Recognized, EngineError>;

    /// Release what `load` acquired
    fn unload(&mut self) -> Result<(), EngineError>;
}

/// Lifecycle state of a managed engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unloaded,
    Loading,
    Loaded,
}

#[derive(Debug)]
struct EngineStatus {
    state: EngineState,
    load_time: Option<Duration>,
}

/// A backend plus its load state
pub struct ManagedEngine {
    backend: Mutex<Box<dyn RecognitionEngine>>,
    status: Mutex<EngineStatus>,
    name: String,
    requires_specialized_hardware: bool,
    preprocess_by_default: bool,
}

impl ManagedEngine {
    pub fn new(backend: Box<dyn RecognitionEngine>) -> Self {
        let name = backend.name().to_string();
        let requires_specialized_hardware = backend.requires_specialized_hardware();
        let preprocess_by_default = backend.preprocess_by_default();

        Self {
            backend: Mutex::new(backend),
            status: Mutex::new(EngineStatus {
                state: EngineState::Unloaded,
                load_time: None,
            }),
            name,
            requires_specialized_hardware,
            preprocess_by_default,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requires_specialized_hardware(&self) -> bool {
        self.requires_specialized_hardware
    }

    pub fn preprocess_by_default(&self) -> bool {
        self.preprocess_by_default
    }

    pub fn state(&self) -> EngineState {
        self.status.lock().state
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == EngineState::Loaded
    }

    /// Duration of the last successful load
    pub fn load_time(&self) -> Option<Duration> {
        self.status.lock().load_time
    }

    /// Load the backend; a no-op when already loaded
    pub fn load(&self) -> Result<(), EngineError> {
        let mut backend = self.backend.lock();
        self.ensure_loaded(backend.as_mut())
    }

    fn ensure_loaded(&self, backend: &mut dyn RecognitionEngine) -> Result<(), EngineError> {
        {
            let mut status = self.status.lock();
            if status.state == EngineState::Loaded {
                return Ok(());
            }
            status.state = EngineState::Loading;
        }

        info!("Loading OCR engine: {}", self.name);
        let start = Instant::now();
        let result = backend.load();
        let elapsed = start.elapsed();

        let mut status = self.status.lock();
        match result {
            Ok(()) => {
                status.state = EngineState::Loaded;
                status.load_time = Some(elapsed);
                info!("{} loaded in {:.2}s", self.name, elapsed.as_secs_f64());
                Ok(())
            }
            Err(e) => {
                status.state = EngineState::Unloaded;
                Err(match e {
                    EngineError::LoadFailed { .. } => e,
                    other => EngineError::LoadFailed {
                        engine: self.name.clone(),
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Recognize text, loading the backend first if needed
    pub fn recognize(&self, image: &DynamicImage, preprocessed: bool) -> Result<OcrResult, EngineError> {
        let mut backend = self.backend.lock();
        self.ensure_loaded(backend.as_mut())?;

        let start = Instant::now();
        let recognized = backend.recognize(image).map_err(|e| match e {
            EngineError::RecognitionFailed { .. } => e,
            other => EngineError::RecognitionFailed {
                engine: self.name.clone(),
                reason: other.to_string(),
            },
        })?;
        let processing_time = start.elapsed();

        debug!(
            "{} recognized {} chars in {:.1}ms",
            self.name,
            recognized.text.chars().count(),
            processing_time.as_secs_f64() * 1000.0
        );

        Ok(OcrResult {
            text: recognized.text,
            confidence: recognized.confidence,
            engine_name: self.name.clone(),
            processing_time,
            preprocessed,
        })
    }

    /// Release backend resources; safe to call when not loaded
    pub fn unload(&self) -> Result<(), EngineError> {
        let mut backend = self.backend.lock();
        if self.state() == EngineState::Unloaded {
            return Ok(());
        }

        backend.unload()?;

        let mut status = self.status.lock();
        status.state = EngineState::Unloaded;
        status.load_time = None;
        info!("{} unloaded", self.name);
        Ok(())
    }
}

impl std::fmt::Debug for ManagedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedEngine")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use image::{GrayImage, Luma};
    use std::sync::atomic::Ordering;

    fn image() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([0])))
    }

    #[test]
    fn test_result_is_empty_on_whitespace() {
        let mut result = OcrResult {
            text: "  \n\t".to_string(),
            confidence: 1.0,
            engine_name: "x".to_string(),
            processing_time: Duration::ZERO,
            preprocessed: false,
        };
        assert!(result.is_empty());
        result.text = " こんにちは ".to_string();
        assert!(!result.is_empty());
    }

    #[test]
    fn test_auto_loads_once() {
        let fake = FakeEngine::new("Fake").with_text("hello");
        let probe = fake.probe();
        let engine = ManagedEngine::new(Box::new(fake));

        assert_eq!(engine.state(), EngineState::Unloaded);
        let result = engine.recognize(&image(), true).unwrap();
        engine.recognize(&image(), false).unwrap();

        assert_eq!(probe.loads.load(Ordering::SeqCst), 1);
        assert_eq!(probe.recognitions.load(Ordering::SeqCst), 2);
        assert!(engine.is_loaded());
        assert!(engine.load_time().is_some());
        assert_eq!(result.text, "hello");
        assert_eq!(result.engine_name, "Fake");
        assert!(result.preprocessed);
    }

    #[test]
    fn test_explicit_load_is_idempotent() {
        let fake = FakeEngine::new("Fake");
        let probe = fake.probe();
        let engine = ManagedEngine::new(Box::new(fake));

        engine.load().unwrap();
        engine.load().unwrap();
        assert_eq!(probe.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_failure_leaves_engine_unloaded() {
        let engine = ManagedEngine::new(Box::new(FakeEngine::new("Broken").failing_load()));
        let err = engine.recognize(&image(), false).unwrap_err();
        assert!(matches!(err, EngineError::LoadFailed { .. }));
        assert_eq!(engine.state(), EngineState::Unloaded);
    }

    #[test]
    fn test_recognition_failure_is_wrapped() {
        let engine = ManagedEngine::new(Box::new(FakeEngine::new("Flaky").failing_recognition()));
        let err = engine.recognize(&image(), false).unwrap_err();
        assert!(matches!(err, EngineError::RecognitionFailed { ref engine, .. } if engine == "Flaky"));
        assert!(engine.is_loaded());
    }

    #[test]
    fn test_unload_when_not_loaded_is_noop() {
        let fake = FakeEngine::new("Fake");
        let probe = fake.probe();
        let engine = ManagedEngine::new(Box::new(fake));

        engine.unload().unwrap();
        assert_eq!(probe.unloads.load(Ordering::SeqCst), 0);

        engine.load().unwrap();
        engine.unload().unwrap();
        assert_eq!(probe.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state(), EngineState::Unloaded);
        assert!(engine.load_time().is_none());
    }
}
