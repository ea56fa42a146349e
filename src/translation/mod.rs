//! Translation of recognized text
//!
//! [`TranslationService`] wraps a backend with the failure policy the
//! pipeline relies on: blank input never reaches the backend, and a failing
//! backend yields [`TRANSLATION_ERROR`] instead of an error.

pub mod llm;

pub use llm::LlmTranslator;

use thiserror::Error;
use tracing::warn;

/// Text shown in place of a translation when the backend fails
pub const TRANSLATION_ERROR: &str = "Translation error";

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("translation backend failed: {0}")]
    Backend(String),

    #[error("translation backend returned nothing")]
    EmptyResponse,
}

/// A source-to-target text translator.
///
/// Expensive resources are acquired when the backend is constructed and
/// stay fixed for its lifetime.
pub trait TranslationBackend: Send {
    fn name(&self) -> &str;

    fn translate(&self, text: &str) -> Result<String, TranslationError>;
}

/// Outcome of [`TranslationService::translate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    /// Translated text, or [`TRANSLATION_ERROR`] when the backend failed
    pub text: String,
    pub failed: bool,
}

pub struct TranslationService {
    backend: Box<dyn TranslationBackend>,
}

impl TranslationService {
    pub fn new(backend: Box<dyn TranslationBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Translate `text`, substituting [`TRANSLATION_ERROR`] on failure
    pub fn translate(&self, text: &str) -> Translation {
        if text.trim().is_empty() {
            return Translation {
                text: String::new(),
                failed: false,
            };
        }

        match self.backend.translate(text) {
            Ok(text) => Translation {
                text,
                failed: false,
            },
            Err(e) => {
                warn!("Translation via {} failed: {}", self.backend.name(), e);
                Translation {
                    text: TRANSLATION_ERROR.to_string(),
                    failed: true,
                }
            }
        }
    }
}
