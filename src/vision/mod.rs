//! Vision layer
//!
//! Change detection, OCR preprocessing and the recognition engines.
//! Supported backends:
//! - Windows OCR API (lightweight, CPU)
//! - Vision-language model over an Ollama-compatible endpoint

pub mod diff;
pub mod ocr;
pub mod preprocess;
pub mod registry;
pub mod vlm;
#[cfg(windows)]
pub mod windows_ocr;

pub use diff::{ChangeDetector, CHANGED_SENTINEL, DEFAULT_CHANGE_THRESHOLD};
pub use ocr::{EngineError, EngineState, ManagedEngine, OcrResult, RecognitionEngine, Recognized};
pub use preprocess::{
    param_specs, ParamSpec, PreprocessingPipeline, PreprocessingStep, StepConfig, StepType,
};
pub use registry::{EngineId, EngineInfo, EngineRegistry, SharedRegistry};
pub use vlm::VlmEngine;
#[cfg(windows)]
pub use windows_ocr::WindowsOcrEngine;
