//! Vision-language model engine
//!
//! Sends the region image to an Ollama-compatible endpoint and asks the
//! model to transcribe it. Accurate on stylized fonts but slow, and it
//! reads raw screenshots better than binarized ones.

use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

use super::ocr::{EngineError, RecognitionEngine, Recognized};
use crate::config::VlmConfig;
use crate::ollama::OllamaClient;

pub struct VlmEngine {
    config: VlmConfig,
    client: Option<OllamaClient>,
}

impl VlmEngine {
    pub fn new(config: VlmConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

/// PNG-encode and base64 an image for the generate API
pub fn encode_png_base64(image: &DynamicImage) -> Result<String, EngineError> {
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| EngineError::Backend(format!("Failed to encode PNG: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(png))
}

impl RecognitionEngine for VlmEngine {
    fn name(&self) -> &str {
        "Vision LLM (High Accuracy)"
    }

    fn requires_specialized_hardware(&self) -> bool {
        true
    }

    fn preprocess_by_default(&self) -> bool {
        false
    }

    fn load(&mut self) -> Result<(), EngineError> {
        let load_failed = |e: anyhow::Error| EngineError::LoadFailed {
            engine: "Vision LLM".to_string(),
            reason: format!("{e:#}"),
        };

        let client = OllamaClient::new(&self.config.url, Duration::from_secs(self.config.timeout_secs))
            .map_err(load_failed)?;
        client.ensure_model(&self.config.model).map_err(load_failed)?;

        self.client = Some(client);
        Ok(())
    }

    fn recognize(&mut self, image: &DynamicImage) -> Result<Recognized, EngineError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| EngineError::Backend("vision model is not loaded".to_string()))?;

        if image.width() == 0 || image.height() == 0 {
            return Ok(Recognized::default());
        }

        let encoded = encode_png_base64(image)?;
        debug!("VLM request: {}x{}, {} bytes base64", image.width(), image.height(), encoded.len());

        let text = client
            .generate(&self.config.model, &self.config.prompt, None, &[encoded])
            .map_err(|e| EngineError::Backend(format!("{e:#}")))?;

        Ok(Recognized::new(text, 1.0))
    }

    fn unload(&mut self) -> Result<(), EngineError> {
        self.client = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_payload_decodes() {
        let image = DynamicImage::new_luma8(6, 3);
        let encoded = encode_png_base64(&image).unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (6, 3));
    }

    #[test]
    fn test_vlm_policy() {
        let engine = VlmEngine::new(VlmConfig::default());
        assert!(engine.requires_specialized_hardware());
        assert!(!engine.preprocess_by_default());
    }

    #[test]
    fn test_load_fails_without_endpoint() {
        let config = VlmConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..VlmConfig::default()
        };
        let mut engine = VlmEngine::new(config);
        assert!(matches!(engine.load(), Err(EngineError::LoadFailed { .. })));
        assert!(engine.recognize(&DynamicImage::new_luma8(2, 2)).is_err());
    }
}
