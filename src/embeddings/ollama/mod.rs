#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::Config;
use crate::embeddings::embedder::EmbeddingBackend;
use crate::generation::{GenerationBackend, GenerationOptions};

/// Output width of the default `all-minilm` embedding model
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    generation_model: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateRequestOptions,
}

#[derive(Debug, Serialize)]
struct GenerateRequestOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ModelDetails {
    pub family: Option<String>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl ModelInfo {
    /// Ollama reports untagged models with an implicit `:latest` suffix
    #[inline]
    pub fn matches(&self, requested: &str) -> bool {
        self.name == requested
            || (!requested.contains(':')
                && self.name.strip_suffix(":latest") == Some(requested))
    }
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let timeout = config.ollama.timeout().max(config.generation.timeout());
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Ok(Self {
            base_url,
            embedding_model: config.ollama.embedding_model.clone(),
            generation_model: config.generation.model.clone(),
            batch_size: config.ollama.batch_size,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Test connection to Ollama and verify both configured models are pulled
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;
        for model in [&self.embedding_model, &self.generation_model] {
            Self::require_model(&models, model)?;
        }

        info!(
            "Health check passed for Ollama server at {} (embedding: {}, generation: {})",
            self.base_url, self.embedding_model, self.generation_model
        );
        Ok(())
    }

    /// Validate that the embedding model is available
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        debug!("Validating model: {}", self.embedding_model);
        let models = self.list_models().context("Failed to list models")?;
        Self::require_model(&models, &self.embedding_model)
    }

    fn require_model(models: &[ModelInfo], model: &str) -> Result<()> {
        if models.iter().any(|m| m.matches(model)) {
            debug!("Model {} is available", model);
            return Ok(());
        }

        let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        warn!(
            "Model {} not found. Available models: {:?}",
            model, available_models
        );
        Err(anyhow::anyhow!(
            "Model '{}' is not available. Available models: {:?}",
            model,
            available_models
        ))
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Generate embeddings for multiple text inputs, `batch_size` per request
    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size.max(1) as usize) {
            let batch = self
                .generate_embeddings_single_batch(chunk)
                .with_context(|| format!("Failed to process batch of {} texts", chunk.len()))?;
            results.extend(batch);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn generate_embeddings_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings)
    }

    /// Run a single non-streaming completion
    #[inline]
    pub fn generate_completion(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let request = GenerateRequest {
            model: &self.generation_model,
            prompt,
            stream: false,
            options: GenerateRequestOptions {
                temperature: options.temperature,
                num_predict: options.max_output_tokens,
            },
        };

        let url = self
            .base_url
            .join("/api/generate")
            .context("Failed to build generation URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize generation request")?;

        debug!(
            "Requesting completion from {} (prompt length: {})",
            self.generation_model,
            prompt.len()
        );

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate completion")?;

        let response: GenerateResponse = serde_json::from_str(&response_text)
            .context("Failed to parse generation response")?;

        Ok(response.response)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) if *status >= 500 => {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, self.retry_attempts
                            );
                            true
                        }
                        ureq::Error::StatusCode(status) => {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => false,
                    };

                    if !should_retry {
                        warn!("Non-retryable error: {}", error);
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        let delay = Duration::from_millis(delay_ms);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

impl EmbeddingBackend for OllamaClient {
    #[inline]
    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    #[inline]
    fn ensure_ready(&self) -> Result<()> {
        self.validate_model()
    }

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.generate_embeddings_batch(texts)
    }
}

impl GenerationBackend for OllamaClient {
    #[inline]
    fn model_name(&self) -> &str {
        &self.generation_model
    }

    #[inline]
    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        self.generate_completion(prompt, options)
    }
}
