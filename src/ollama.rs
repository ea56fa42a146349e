//! Blocking client for an Ollama-compatible generation endpoint
//!
//! The pipeline runs on a plain thread, so each client owns a small tokio
//! runtime and blocks on the async reqwest calls.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::debug;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "no_images")]
    images: &'a [String],
    stream: bool,
}

fn no_images(images: &&[String]) -> bool {
    images.is_empty()
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

pub struct OllamaClient {
    runtime: Runtime,
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let runtime = Runtime::new().context("Failed to create tokio runtime")?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            runtime,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fail unless the endpoint answers and serves `model`
    pub fn ensure_model(&self, model: &str) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        let tags = self.runtime.block_on(self.fetch_tags(&url))?;

        let wanted = model.trim();
        let found = tags.models.iter().any(|m| {
            m.name == wanted || m.name.strip_suffix(":latest") == Some(wanted)
        });
        if !found {
            bail!("model '{}' is not available at {}", wanted, self.base_url);
        }
        Ok(())
    }

    /// One non-streaming generation; images are base64-encoded
    pub fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: Option<&str>,
        images: &[String],
    ) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model,
            prompt,
            system,
            images,
            stream: false,
        };

        debug!(model, images = images.len(), "Calling {}", url);

        let body = self.runtime.block_on(self.post_generate(&url, &request))?;

        Ok(body.response.trim().to_string())
    }

    async fn fetch_tags(&self, url: &str) -> Result<TagsResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        if !response.status().is_success() {
            bail!("{} returned status {}", url, response.status());
        }

        response.json().await.context("Failed to parse model list")
    }

    async fn post_generate(&self, url: &str, request: &GenerateRequest<'_>) -> Result<GenerateResponse> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .context("Failed to send generate request")?;

        if !response.status().is_success() {
            bail!("generate failed with status {}", response.status());
        }

        response.json().await.context("Failed to parse generate response")
    }
}
