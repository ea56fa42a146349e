//! Preprocessing step types and their parameter specs
//!
//! Every step type owns a fixed table of [`ParamSpec`]s. A step's parameter
//! map only ever holds keys from that table, with values coerced into the
//! declared kind and range.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// The closed set of preprocessing transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepType {
    Scale,
    Grayscale,
    AutoInvert,
    Contrast,
    Clahe,
    Sharpen,
    Denoise,
    Binarize,
    Morphology,
    Padding,
}

impl StepType {
    pub const ALL: [StepType; 10] = [
        StepType::Scale,
        StepType::Grayscale,
        StepType::AutoInvert,
        StepType::Contrast,
        StepType::Clahe,
        StepType::Sharpen,
        StepType::Denoise,
        StepType::Binarize,
        StepType::Morphology,
        StepType::Padding,
    ];

    /// Name used in serialized configs
    pub fn config_name(&self) -> &'static str {
        match self {
            StepType::Scale => "SCALE",
            StepType::Grayscale => "GRAYSCALE",
            StepType::AutoInvert => "AUTO_INVERT",
            StepType::Contrast => "CONTRAST",
            StepType::Clahe => "CLAHE",
            StepType::Sharpen => "SHARPEN",
            StepType::Denoise => "DENOISE",
            StepType::Binarize => "BINARIZE",
            StepType::Morphology => "MORPHOLOGY",
            StepType::Padding => "PADDING",
        }
    }

    /// Display name for settings surfaces
    pub fn label(&self) -> &'static str {
        match self {
            StepType::Scale => "Upscale",
            StepType::Grayscale => "Grayscale",
            StepType::AutoInvert => "Auto-Invert",
            StepType::Contrast => "Contrast / Brightness",
            StepType::Clahe => "Local Contrast (CLAHE)",
            StepType::Sharpen => "Sharpen",
            StepType::Denoise => "Denoise",
            StepType::Binarize => "Binarize",
            StepType::Morphology => "Morphology",
            StepType::Padding => "Padding",
        }
    }

    pub fn param_specs(&self) -> &'static [ParamSpec] {
        param_specs(*self)
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        StepType::ALL
            .iter()
            .copied()
            .find(|t| t.config_name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown preprocessing step type '{s}'"))
    }
}

/// Value kind of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    Choice,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            ParamKind::Int => "int",
            ParamKind::Float => "float",
            ParamKind::Bool => "bool",
            ParamKind::Choice => "choice",
        })
    }
}

/// Default value as stored in the static spec tables
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpecDefault {
    Int(i64),
    Float(f64),
    Bool(bool),
    Choice(&'static str),
}

/// A parameter value held by a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.is_finite() => Some(v.round() as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<SpecDefault> for ParamValue {
    fn from(value: SpecDefault) -> Self {
        match value {
            SpecDefault::Int(v) => ParamValue::Int(v),
            SpecDefault::Float(v) => ParamValue::Float(v),
            SpecDefault::Bool(v) => ParamValue::Bool(v),
            SpecDefault::Choice(v) => ParamValue::Text(v.to_string()),
        }
    }
}

/// Describes one tunable parameter; settings surfaces build their controls from these
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: ParamKind,
    pub default: SpecDefault,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub choices: &'static [&'static str],
    pub tooltip: &'static str,
}

impl ParamSpec {
    const fn int(name: &'static str, label: &'static str, default: i64, min: i64, max: i64) -> Self {
        Self {
            name,
            label,
            kind: ParamKind::Int,
            default: SpecDefault::Int(default),
            min: Some(min as f64),
            max: Some(max as f64),
            step: Some(1.0),
            choices: &[],
            tooltip: "",
        }
    }

    const fn float(
        name: &'static str,
        label: &'static str,
        default: f64,
        min: f64,
        max: f64,
        step: f64,
    ) -> Self {
        Self {
            name,
            label,
            kind: ParamKind::Float,
            default: SpecDefault::Float(default),
            min: Some(min),
            max: Some(max),
            step: Some(step),
            choices: &[],
            tooltip: "",
        }
    }

    const fn flag(name: &'static str, label: &'static str, default: bool) -> Self {
        Self {
            name,
            label,
            kind: ParamKind::Bool,
            default: SpecDefault::Bool(default),
            min: None,
            max: None,
            step: None,
            choices: &[],
            tooltip: "",
        }
    }

    const fn choice(
        name: &'static str,
        label: &'static str,
        default: &'static str,
        choices: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            label,
            kind: ParamKind::Choice,
            default: SpecDefault::Choice(default),
            min: None,
            max: None,
            step: None,
            choices,
            tooltip: "",
        }
    }

    const fn step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    const fn tooltip(mut self, tooltip: &'static str) -> Self {
        self.tooltip = tooltip;
        self
    }

    pub fn default_value(&self) -> ParamValue {
        self.default.into()
    }

    /// Coerce `value` into this spec's kind and range.
    ///
    /// Numbers are clamped to `min..=max` and ints are rounded. Returns `None`
    /// for values that cannot be represented (wrong kind, unknown choice).
    pub fn coerce(&self, value: &ParamValue) -> Option<ParamValue> {
        match self.kind {
            ParamKind::Int => {
                let v = value.as_i64()?;
                let v = self.clamp(v as f64).round() as i64;
                Some(ParamValue::Int(v))
            }
            ParamKind::Float => {
                let v = value.as_f64()?;
                if !v.is_finite() {
                    return None;
                }
                Some(ParamValue::Float(self.clamp(v)))
            }
            ParamKind::Bool => value.as_bool().map(ParamValue::Bool),
            ParamKind::Choice => {
                let v = value.as_str()?;
                self.choices
                    .iter()
                    .find(|c| c.eq_ignore_ascii_case(v.trim()))
                    .map(|c| ParamValue::Text(c.to_string()))
            }
        }
    }

    fn clamp(&self, v: f64) -> f64 {
        let v = self.min.map_or(v, |min| v.max(min));
        self.max.map_or(v, |max| v.min(max))
    }
}

const INTERPOLATIONS: &[&str] = &["nearest", "bilinear", "bicubic", "lanczos"];
const DENOISE_METHODS: &[&str] = &["nlmeans", "bilateral", "median", "gaussian"];
const BINARIZE_METHODS: &[&str] = &["otsu", "adaptive_gaussian", "adaptive_mean", "simple"];
const MORPH_OPERATIONS: &[&str] = &["close", "open", "dilate", "erode"];
const PAD_COLORS: &[&str] = &["white", "black"];

const SCALE_SPECS: &[ParamSpec] = &[
    ParamSpec::float("factor", "Scale Factor", 2.0, 1.0, 4.0, 0.25)
        .tooltip("Upscale image for better OCR. 2x is usually optimal."),
    ParamSpec::choice("interpolation", "Interpolation", "lanczos", INTERPOLATIONS)
        .tooltip("Resampling method. Lanczos preserves text edges best."),
];

const GRAYSCALE_SPECS: &[ParamSpec] = &[ParamSpec::flag("enabled_note", "Convert to Grayscale", true)
    .tooltip("Convert to grayscale. Required for binarization/CLAHE.")];

const AUTO_INVERT_SPECS: &[ParamSpec] = &[ParamSpec::int("threshold", "Brightness Threshold", 127, 0, 255)
    .tooltip("If mean brightness is above this, invert. Normalizes text polarity.")];

const CONTRAST_SPECS: &[ParamSpec] = &[
    ParamSpec::float("factor", "Contrast Factor", 1.5, 0.5, 3.0, 0.1)
        .tooltip("1.0 = no change, 2.0 = double contrast."),
    ParamSpec::float("brightness", "Brightness Factor", 1.0, 0.5, 2.0, 0.1)
        .tooltip("1.0 = no change."),
];

const CLAHE_SPECS: &[ParamSpec] = &[
    ParamSpec::float("clip_limit", "Clip Limit", 2.0, 0.5, 10.0, 0.5)
        .tooltip("Higher = more local contrast."),
    ParamSpec::int("grid_size", "Grid Size", 8, 2, 32)
        .tooltip("Smaller = more localized contrast adjustment."),
];

const SHARPEN_SPECS: &[ParamSpec] = &[
    ParamSpec::float("amount", "Sharpen Amount", 1.5, 0.0, 5.0, 0.1)
        .tooltip("Unsharp mask amount. 0 = none."),
    ParamSpec::float("radius", "Radius", 1.0, 0.5, 5.0, 0.5)
        .tooltip("Unsharp mask radius in pixels."),
];

const DENOISE_SPECS: &[ParamSpec] = &[
    ParamSpec::int("strength", "Denoise Strength", 10, 1, 30)
        .tooltip("Higher = smoother but may lose detail."),
    ParamSpec::choice("method", "Method", "nlmeans", DENOISE_METHODS)
        .tooltip("Denoising algorithm. NL-Means is best quality."),
];

const BINARIZE_SPECS: &[ParamSpec] = &[
    ParamSpec::choice("method", "Method", "adaptive_gaussian", BINARIZE_METHODS)
        .tooltip("Adaptive works best on uneven backgrounds."),
    ParamSpec::int("block_size", "Block Size (adaptive)", 11, 3, 99)
        .step(2.0)
        .tooltip("Must be odd. Used by adaptive methods only."),
    ParamSpec::int("constant", "Constant (adaptive)", 2, -20, 20)
        .tooltip("Subtracted from adaptive threshold mean."),
    ParamSpec::int("threshold", "Threshold (simple)", 128, 0, 255)
        .tooltip("Manual threshold for simple method."),
];

const MORPHOLOGY_SPECS: &[ParamSpec] = &[
    ParamSpec::choice("operation", "Operation", "close", MORPH_OPERATIONS)
        .tooltip("Close fills gaps in strokes. Open removes noise."),
    ParamSpec::int("kernel_size", "Kernel Size", 2, 1, 7),
    ParamSpec::int("iterations", "Iterations", 1, 1, 5),
];

const PADDING_SPECS: &[ParamSpec] = &[
    ParamSpec::int("pixels", "Padding (px)", 8, 0, 50)
        .tooltip("Border padding. Helps detect edge characters."),
    ParamSpec::choice("color", "Pad Color", "white", PAD_COLORS),
];

/// Registered parameter specs for a step type
pub fn param_specs(step_type: StepType) -> &'static [ParamSpec] {
    match step_type {
        StepType::Scale => SCALE_SPECS,
        StepType::Grayscale => GRAYSCALE_SPECS,
        StepType::AutoInvert => AUTO_INVERT_SPECS,
        StepType::Contrast => CONTRAST_SPECS,
        StepType::Clahe => CLAHE_SPECS,
        StepType::Sharpen => SHARPEN_SPECS,
        StepType::Denoise => DENOISE_SPECS,
        StepType::Binarize => BINARIZE_SPECS,
        StepType::Morphology => MORPHOLOGY_SPECS,
        StepType::Padding => PADDING_SPECS,
    }
}

/// Look up one parameter spec
pub fn find_spec(step_type: StepType, name: &str) -> Option<&'static ParamSpec> {
    param_specs(step_type).iter().find(|s| s.name == name)
}

/// A single preprocessing step with enable toggle and parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingStep {
    step_type: StepType,
    pub enabled: bool,
    params: BTreeMap<String, ParamValue>,
}

impl PreprocessingStep {
    /// Enabled step with every parameter at its default
    pub fn new(step_type: StepType) -> Self {
        let params = param_specs(step_type)
            .iter()
            .map(|spec| (spec.name.to_string(), spec.default_value()))
            .collect();

        Self {
            step_type,
            enabled: true,
            params,
        }
    }

    /// Enabled step with no explicit parameters; executors fall back to spec defaults
    pub fn bare(step_type: StepType) -> Self {
        Self {
            step_type,
            enabled: true,
            params: BTreeMap::new(),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builder form of [`set_param`](Self::set_param); invalid values are ignored
    pub fn with_param(mut self, name: &str, value: ParamValue) -> Self {
        self.set_param(name, value);
        self
    }

    pub fn step_type(&self) -> StepType {
        self.step_type
    }

    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Set a parameter, coercing it into its ParamSpec's kind and range.
    ///
    /// Unknown names and unrepresentable values are dropped with a warning;
    /// returns whether the value was stored.
    pub fn set_param(&mut self, name: &str, value: ParamValue) -> bool {
        let Some(spec) = find_spec(self.step_type, name) else {
            warn!(
                "Ignoring unknown parameter '{}' for step {}",
                name, self.step_type
            );
            return false;
        };

        match spec.coerce(&value) {
            Some(coerced) => {
                self.params.insert(name.to_string(), coerced);
                true
            }
            None => {
                warn!(
                    "Ignoring invalid value '{}' for {}.{} (expected {})",
                    value, self.step_type, name, spec.kind
                );
                false
            }
        }
    }

    /// Parameter or its spec default, or `None` if the name is not registered
    fn value_or_default(&self, name: &str) -> Option<ParamValue> {
        match self.params.get(name) {
            Some(v) => Some(v.clone()),
            None => find_spec(self.step_type, name).map(|s| s.default_value()),
        }
    }

    pub fn float(&self, name: &str) -> f64 {
        self.value_or_default(name)
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    }

    pub fn int(&self, name: &str) -> i64 {
        self.value_or_default(name)
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.value_or_default(name)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn choice(&self, name: &str) -> String {
        self.value_or_default(name)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_step_type_has_specs() {
        for step_type in StepType::ALL {
            assert!(!param_specs(step_type).is_empty(), "{step_type} has no specs");
        }
    }

    #[test]
    fn test_step_type_names_roundtrip() {
        for step_type in StepType::ALL {
            assert_eq!(step_type.config_name().parse::<StepType>(), Ok(step_type));
        }
        assert_eq!("clahe".parse::<StepType>(), Ok(StepType::Clahe));
        assert!("SEPIA".parse::<StepType>().is_err());
    }

    #[test]
    fn test_new_step_has_defaults() {
        let step = PreprocessingStep::new(StepType::Binarize);
        assert!(step.enabled);
        assert_eq!(step.params().len(), 4);
        assert_eq!(step.choice("method"), "adaptive_gaussian");
        assert_eq!(step.int("block_size"), 11);
        assert_eq!(step.int("constant"), 2);
    }

    #[test]
    fn test_set_param_clamps_and_rounds() {
        let mut step = PreprocessingStep::new(StepType::Scale);
        assert!(step.set_param("factor", ParamValue::Float(9.0)));
        assert_eq!(step.float("factor"), 4.0);

        let mut step = PreprocessingStep::new(StepType::Clahe);
        assert!(step.set_param("grid_size", ParamValue::Float(7.6)));
        assert_eq!(step.param("grid_size"), Some(&ParamValue::Int(8)));

        assert!(step.set_param("clip_limit", ParamValue::Int(3)));
        assert_eq!(step.param("clip_limit"), Some(&ParamValue::Float(3.0)));
    }

    #[test]
    fn test_set_param_rejects_unknown_and_invalid() {
        let mut step = PreprocessingStep::new(StepType::Denoise);
        assert!(!step.set_param("radius", ParamValue::Int(3)));
        assert!(step.param("radius").is_none());

        assert!(!step.set_param("method", ParamValue::Text("wavelet".into())));
        assert_eq!(step.choice("method"), "nlmeans");

        assert!(!step.set_param("strength", ParamValue::Text("high".into())));
        assert_eq!(step.int("strength"), 10);

        assert!(step.set_param("method", ParamValue::Text("MEDIAN".into())));
        assert_eq!(step.choice("method"), "median");
    }

    #[test]
    fn test_bare_step_falls_back_to_spec_defaults() {
        let step = PreprocessingStep::bare(StepType::Padding);
        assert!(step.params().is_empty());
        assert_eq!(step.int("pixels"), 8);
        assert_eq!(step.choice("color"), "white");
    }
}
