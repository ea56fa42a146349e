//! LLM translation backend
//!
//! Asks a local Ollama-compatible model for a translation. The HTTP client
//! and runtime are built once at construction.

use anyhow::Result;
use std::time::Duration;
use tracing::info;

use super::{TranslationBackend, TranslationError};
use crate::config::TranslationConfig;
use crate::ollama::OllamaClient;

pub struct LlmTranslator {
    client: OllamaClient,
    model: String,
    system_prompt: String,
}

impl LlmTranslator {
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        let client = OllamaClient::new(&config.url, Duration::from_secs(config.timeout_secs))?;
        info!(
            "Translator: {} ({} -> {}) at {}",
            config.model,
            config.source_language,
            config.target_language,
            client.base_url()
        );

        Ok(Self {
            client,
            model: config.model.clone(),
            system_prompt: system_prompt(&config.source_language, &config.target_language),
        })
    }
}

fn system_prompt(source: &str, target: &str) -> String {
    format!(
        "You translate {source} video game text into natural {target}. \
         Reply with the translation only, without notes or quotation marks."
    )
}

impl TranslationBackend for LlmTranslator {
    fn name(&self) -> &str {
        &self.model
    }

    fn translate(&self, text: &str) -> Result<String, TranslationError> {
        let translated = self
            .client
            .generate(&self.model, text, Some(&self.system_prompt), &[])
            .map_err(|e| TranslationError::Backend(format!("{e:#}")))?;

        if translated.is_empty() {
            return Err(TranslationError::EmptyResponse);
        }
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_names_languages() {
        let prompt = system_prompt("Japanese", "English");
        assert!(prompt.contains("Japanese"));
        assert!(prompt.contains("English"));
    }

    #[test]
    fn test_unreachable_backend_is_an_error() {
        let config = TranslationConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..TranslationConfig::default()
        };
        let translator = LlmTranslator::new(&config).unwrap();
        assert!(matches!(
            translator.translate("テスト"),
            Err(TranslationError::Backend(_))
        ));
    }
}
