
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::GenerationConfig;
use crate::{RagError, Result};

/// Sampling parameters passed with every completion request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    #[inline]
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 1500,
        }
    }
}

impl From<&GenerationConfig> for GenerationOptions {
    #[inline]
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

/// A language model invoked as a blocking, non-streaming black box
pub trait GenerationBackend: Send + Sync {
    fn model_name(&self) -> &str;

    fn generate(&self, prompt: &str, options: &GenerationOptions) -> anyhow::Result<String>;
}

/// Answer generation with a caller-side timeout
pub struct Generator {
    backend: Arc<dyn GenerationBackend>,
    options: GenerationOptions,
    timeout: Duration,
}

impl std::fmt::Debug for Generator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("model", &self.backend.model_name())
            .field("options", &self.options)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Generator {
    #[inline]
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        options: GenerationOptions,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            options,
            timeout,
        }
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Generate a completion for `prompt`.
    ///
    /// An overrun surfaces as [`RagError::GenerationTimeout`]; the blocking call
    /// is left to finish in the background.
    #[inline]
    pub async fn generate(&self, prompt: String) -> Result<String> {
        let backend = Arc::clone(&self.backend);
        let options = self.options;
        let handle = tokio::task::spawn_blocking(move || backend.generate(&prompt, &options));

        let text = match tokio::time::timeout(self.timeout, handle).await {
            Err(_) => return Err(RagError::GenerationTimeout(self.timeout)),
            Ok(Err(join_error)) => {
                return Err(RagError::GenerationUnavailable(format!(
                    "generation task failed: {join_error}"
                )));
            }
            Ok(Ok(result)) => {
                result.map_err(|e| RagError::GenerationUnavailable(format!("{e:#}")))?
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(RagError::GenerationUnavailable(format!(
                "{} returned an empty response",
                self.model_name()
            )));
        }

        debug!("Generated {} characters with {}", text.len(), self.model_name());
        Ok(text.to_string())
    }
}
