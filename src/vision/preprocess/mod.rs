//! Configurable OCR preprocessing pipeline
//!
//! An ordered list of toggleable steps applied left to right. A step that
//! fails is logged and skipped; the image it was given flows on unchanged.

mod clahe;
mod executors;
mod filters;
pub mod step;

pub use executors::{execute, StepError, MAX_OUTPUT_SIDE};
pub use step::{
    find_spec, param_specs, ParamKind, ParamSpec, ParamValue, PreprocessingStep, SpecDefault,
    StepType,
};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Serialized form of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

fn default_enabled() -> bool {
    true
}

/// Output of [`PreprocessingPipeline::process_with_report`]
#[derive(Debug)]
pub struct PreprocessResult {
    pub image: DynamicImage,
    /// Steps that ran successfully, in order
    pub applied: Vec<StepType>,
    /// Steps that failed and were passed through
    pub failed: Vec<(StepType, StepError)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingPipeline {
    steps: Vec<PreprocessingStep>,
}

impl Default for PreprocessingPipeline {
    fn default() -> Self {
        Self::new(Self::default_steps())
    }
}

impl PreprocessingPipeline {
    pub fn new(steps: Vec<PreprocessingStep>) -> Self {
        Self { steps }
    }

    /// Defaults tuned for game dialogue text.
    ///
    /// Every step type is present so it can be toggled on later; only
    /// scale, grayscale, auto-invert, CLAHE and padding start enabled.
    pub fn default_steps() -> Vec<PreprocessingStep> {
        use StepType::*;
        [
            (Scale, true),
            (Grayscale, true),
            (AutoInvert, true),
            (Contrast, false),
            (Clahe, true),
            (Sharpen, false),
            (Denoise, false),
            (Binarize, false),
            (Morphology, false),
            (Padding, true),
        ]
        .into_iter()
        .map(|(step_type, enabled)| PreprocessingStep::new(step_type).with_enabled(enabled))
        .collect()
    }

    pub fn steps(&self) -> &[PreprocessingStep] {
        &self.steps
    }

    pub fn steps_mut(&mut self) -> &mut Vec<PreprocessingStep> {
        &mut self.steps
    }

    /// First step of the given type, if present
    pub fn step_mut(&mut self, step_type: StepType) -> Option<&mut PreprocessingStep> {
        self.steps.iter_mut().find(|s| s.step_type() == step_type)
    }

    pub fn enabled_count(&self) -> usize {
        self.steps.iter().filter(|s| s.enabled).count()
    }

    /// Run every enabled step on a copy of `image`
    pub fn process(&self, image: &DynamicImage) -> DynamicImage {
        self.process_with_report(image).image
    }

    /// Like [`process`](Self::process) but also reports which steps ran or failed
    pub fn process_with_report(&self, image: &DynamicImage) -> PreprocessResult {
        let mut current = image.clone();
        let mut applied = Vec::new();
        let mut failed = Vec::new();

        for step in self.steps.iter().filter(|s| s.enabled) {
            match execute(step, &current) {
                Ok(next) => {
                    current = next;
                    applied.push(step.step_type());
                }
                Err(e) => {
                    warn!("Preprocessing step {} failed: {}", step.step_type(), e);
                    failed.push((step.step_type(), e));
                }
            }
        }

        debug!(
            "Preprocessed {}x{} -> {}x{} ({} steps, {} failed)",
            image.width(),
            image.height(),
            current.width(),
            current.height(),
            applied.len(),
            failed.len()
        );

        PreprocessResult {
            image: current,
            applied,
            failed,
        }
    }

    /// Serialize step order, enabled flags and parameters
    pub fn to_config(&self) -> Vec<StepConfig> {
        self.steps
            .iter()
            .map(|step| StepConfig {
                step_type: step.step_type().config_name().to_string(),
                enabled: step.enabled,
                params: step.params().clone(),
            })
            .collect()
    }

    /// Rebuild a pipeline from its serialized form.
    ///
    /// Unknown step types and parameters are skipped with a warning. An
    /// empty config, or one where nothing survives, yields the default steps.
    pub fn from_config(config: &[StepConfig]) -> Self {
        if config.is_empty() {
            return Self::default();
        }

        let mut steps = Vec::with_capacity(config.len());
        for entry in config {
            let step_type = match entry.step_type.parse::<StepType>() {
                Ok(t) => t,
                Err(e) => {
                    warn!("Skipping invalid preprocessing step: {}", e);
                    continue;
                }
            };

            let mut step = PreprocessingStep::bare(step_type).with_enabled(entry.enabled);
            for (name, value) in &entry.params {
                step.set_param(name, value.clone());
            }
            steps.push(step);
        }

        if steps.is_empty() {
            warn!("No valid preprocessing steps in config, using defaults");
            return Self::default();
        }

        Self::new(steps)
    }
}
