
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{RagError, Result};

/// A text-embedding model invoked as a blocking black box.
///
/// Implementations must return one vector per input, in input order.
pub trait EmbeddingBackend: Send + Sync {
    fn model_name(&self) -> &str;

    /// Load or verify the model. Called once per process until it succeeds.
    fn ensure_ready(&self) -> anyhow::Result<()>;

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Shared embedding service with lazy model readiness and call timeouts
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    dimension: usize,
    batch_size: usize,
    timeout: Duration,
    ready: OnceCell<()>,
}

impl std::fmt::Debug for Embedder {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.backend.model_name())
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .field("timeout", &self.timeout)
            .field("ready", &self.ready.initialized())
            .finish()
    }
}

impl Embedder {
    #[inline]
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        dimension: usize,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            dimension,
            batch_size: batch_size.max(1),
            timeout,
            ready: OnceCell::new(),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Whether the model has been successfully loaded in this process
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Embed a single text
    #[inline]
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(vec![text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            RagError::EmbeddingUnavailable("backend returned no vector".to_string())
        })
    }

    /// Embed many texts, preserving input order
    #[inline]
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.ensure_ready().await?;

        let total = texts.len();
        let mut vectors = Vec::with_capacity(total);
        for slice in texts.chunks(self.batch_size) {
            let inputs = slice.to_vec();
            let backend = Arc::clone(&self.backend);
            let batch = self
                .run_blocking(move || backend.embed_batch(&inputs))
                .await?;
            self.check_batch(slice.len(), &batch)?;
            vectors.extend(batch);
        }

        debug!("Embedded {} texts with {}", total, self.model_name());
        Ok(vectors)
    }

    async fn ensure_ready(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                let backend = Arc::clone(&self.backend);
                let result = self.run_blocking(move || backend.ensure_ready()).await;
                match &result {
                    Ok(()) => info!("Embedding model {} ready", self.model_name()),
                    Err(e) => warn!("Embedding model {} not ready: {}", self.model_name(), e),
                }
                result
            })
            .await?;
        Ok(())
    }

    fn check_batch(&self, expected: usize, batch: &[Vec<f32>]) -> Result<()> {
        if batch.len() != expected {
            return Err(RagError::EmbeddingUnavailable(format!(
                "backend returned {} vectors for {} inputs",
                batch.len(),
                expected
            )));
        }

        if let Some(bad) = batch.iter().find(|v| v.len() != self.dimension) {
            return Err(RagError::EmbeddingUnavailable(format!(
                "backend returned {}-dimensional vector, expected {}",
                bad.len(),
                self.dimension
            )));
        }

        Ok(())
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(f);
        match tokio::time::timeout(self.timeout, handle).await {
            Err(_) => Err(RagError::EmbeddingTimeout(self.timeout)),
            Ok(Err(join_error)) => Err(RagError::EmbeddingUnavailable(format!(
                "embedding task failed: {join_error}"
            ))),
            Ok(Ok(result)) => {
                result.map_err(|e| RagError::EmbeddingUnavailable(format!("{e:#}")))
            }
        }
    }
}
