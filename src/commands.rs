use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::RagError;
use crate::config::Config;
use crate::database::RecordStore;
use crate::database::sqlite::models::{Document, ProcessingStatus};
use crate::database::sqlite::Database;
use crate::database::vector_index::{IndexStatus, VectorIndex};
use crate::documents::DocumentProcessor;
use crate::embeddings::embedder::{Embedder, EmbeddingBackend};
use crate::embeddings::ollama::OllamaClient;
use crate::generation::{GenerationBackend, GenerationOptions, Generator};
use crate::indexer::{ConsistencyValidator, Indexer};
use crate::rag::{QueryRequest, RagService};

/// Everything a command needs, wired from one configuration
pub struct Services {
    pub config: Config,
    pub database: Arc<Database>,
    pub index: Arc<VectorIndex>,
    pub rag: RagService,
    pub processor: DocumentProcessor,
    pub indexer: Indexer,
}

impl Services {
    /// Open the database and connect the Ollama backends
    #[inline]
    pub async fn open(config: Config) -> Result<Self> {
        let database = Database::new(config.database_path())
            .await
            .context("Failed to initialize database")?;
        let ollama = Arc::new(OllamaClient::new(&config).context("Failed to create Ollama client")?);

        Ok(Self::with_backends(
            config,
            database,
            Arc::clone(&ollama) as Arc<dyn EmbeddingBackend>,
            ollama as Arc<dyn GenerationBackend>,
        ))
    }

    /// Wire services around explicit model backends
    #[inline]
    pub fn with_backends(
        config: Config,
        database: Database,
        embedding: Arc<dyn EmbeddingBackend>,
        generation: Arc<dyn GenerationBackend>,
    ) -> Self {
        let database = Arc::new(database);
        let store = Arc::clone(&database) as Arc<dyn RecordStore>;

        let embedder = Arc::new(Embedder::new(
            embedding,
            usize::try_from(config.ollama.embedding_dimension).unwrap_or_default(),
            usize::try_from(config.ollama.batch_size).unwrap_or(1),
            config.ollama.timeout(),
        ));
        let generator = Arc::new(Generator::new(
            generation,
            GenerationOptions::from(&config.generation),
            config.generation.timeout(),
        ));
        let index = Arc::new(VectorIndex::new(
            &config.index.name,
            &config.index_dir_path(),
            embedder,
            Arc::clone(&store),
            config.retrieval.overfetch_factor,
        ));
        let rag = RagService::new(
            Arc::clone(&index),
            generator,
            store,
            config.retrieval.clone(),
        );
        let processor = DocumentProcessor::new(
            Arc::clone(&database),
            config.chunking.clone(),
            config.documents_dir_path(),
        );
        let indexer = Indexer::new(
            Arc::clone(&database),
            processor.clone(),
            Arc::clone(&index),
            config.indexer_lock_path(),
        );

        Self {
            config,
            database,
            index,
            rag,
            processor,
            indexer,
        }
    }
}

fn spinner(message: &str) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Find a document by id or by its original file name
#[inline]
pub async fn resolve_document(database: &Database, identifier: &str) -> Result<Document> {
    if let Ok(id) = identifier.parse::<Uuid>() {
        return database
            .get_document(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Document not found: {identifier}"));
    }

    let mut matches = database.find_documents_by_name(identifier).await?;
    match matches.len() {
        0 => bail!("Document not found: {identifier}"),
        1 => Ok(matches.remove(0)),
        n => bail!(
            "{n} documents are named {identifier}; use one of their ids: {}",
            matches.iter().map(|d| d.id).join(", ")
        ),
    }
}

/// Register a document, chunk it and rebuild the index
#[inline]
pub async fn add_document(services: &Services, path: &Path, name: Option<&str>) -> Result<()> {
    info!("Adding document: {}", path.display());

    let document = services.processor.register(path, name).await?;
    println!(
        "Registered {} (ID: {})",
        style(&document.original_filename).bold(),
        document.id
    );

    let bar = spinner("Extracting and chunking");
    let processed = services.processor.process(&document).await;
    bar.finish_and_clear();
    let processed = processed?;
    println!(
        "  {} pages, {} chunks",
        processed.pages, processed.chunks
    );

    rebuild_index(services, &[]).await
}

#[inline]
pub async fn list_documents(services: &Services) -> Result<()> {
    let documents = services.database.list_documents().await?;

    if documents.is_empty() {
        println!("No documents have been added yet.");
        println!("Use 'pdf-rag add <path>' to add one.");
        return Ok(());
    }

    println!("Documents ({} total):", documents.len());
    println!();

    for summary in &documents {
        let document = &summary.document;
        println!("📄 {} (ID: {})", style(document.title()).bold(), document.id);
        println!("   File: {}", document.original_filename);
        println!("   Status: {}", document.processing_status);
        println!("   Size: {}", document.display_size());
        if let Some(pages) = document.page_count {
            println!("   Pages: {pages}");
        }
        println!("   Chunks: {}", summary.chunk_count);
        if let Some(error) = &document.processing_error {
            println!("   ⚠️  Error: {error}");
        }
        println!(
            "   Uploaded: {}",
            document.upload_timestamp.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    let counts = documents
        .iter()
        .counts_by(|s| s.document.processing_status);
    println!("Summary:");
    for status in [
        ProcessingStatus::Completed,
        ProcessingStatus::Pending,
        ProcessingStatus::Processing,
        ProcessingStatus::Failed,
    ] {
        println!("  {}: {}", status, counts.get(&status).copied().unwrap_or(0));
    }

    Ok(())
}

/// Delete a document with its chunks and rebuild the index without it
#[inline]
pub async fn delete_document(services: &Services, identifier: &str) -> Result<()> {
    let document = resolve_document(&services.database, identifier).await?;

    if !services.processor.remove(&document).await? {
        bail!("Document {} was already deleted", document.id);
    }
    println!(
        "Deleted {} (ID: {})",
        document.original_filename, document.id
    );

    match services.indexer.rebuild(None).await {
        Ok(vectors) => println!("Index rebuilt with {vectors} vectors"),
        Err(RagError::EmptyCorpus) => {
            warn!("No chunks left after deletion");
            println!("No documents left to index.");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Process pending documents and rebuild the index, optionally for some documents only
#[inline]
pub async fn rebuild_index(services: &Services, documents: &[String]) -> Result<()> {
    let bar = spinner("Rebuilding index");

    let result = if documents.is_empty() {
        services.indexer.run().await.map(|stats| {
            if stats.documents_processed + stats.documents_failed > 0 {
                bar.println(format!(
                    "Processed {} pending documents ({} failed, {} chunks)",
                    stats.documents_processed, stats.documents_failed, stats.chunks_created
                ));
            }
            stats.vectors_indexed
        })
    } else {
        let mut ids = Vec::with_capacity(documents.len());
        for identifier in documents {
            ids.push(resolve_document(&services.database, identifier).await?.id);
        }
        services.indexer.rebuild(Some(ids.as_slice())).await.map(Some)
    };
    bar.finish_and_clear();

    match result? {
        Some(vectors) => println!("✅ Index rebuilt with {vectors} vectors"),
        None => println!("No chunks available; the index was left unchanged."),
    }
    Ok(())
}

/// Answer a question, recording it in a conversation
#[inline]
pub async fn ask(
    services: &Services,
    question: &str,
    conversation: Option<Uuid>,
    documents: &[String],
    top_k: Option<usize>,
) -> Result<()> {
    let mut request = QueryRequest::new(question);
    request.conversation_id = conversation;
    request.top_k = top_k;
    for identifier in documents {
        request
            .document_ids
            .push(resolve_document(&services.database, identifier).await?.id);
    }

    let bar = spinner("Thinking");
    let response = services.rag.converse(&request).await;
    bar.finish_and_clear();

    let response = match response {
        Ok(response) => response,
        Err(e) if e.is_backend_unavailable() => {
            println!("{}", style("The model backend is unavailable.").red());
            println!("Check that Ollama is running, or use 'pdf-rag config' to update the connection.");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", response.answer);

    if !response.sources.is_empty() {
        println!();
        println!("{}", style("Sources:").bold());
        for (i, source) in response.sources.iter().enumerate() {
            println!(
                "  [{}] {}, page {} (similarity {:.3})",
                i + 1,
                style(&source.document_name).cyan(),
                source.page_number,
                source.similarity_score
            );
            println!("      {}", style(&source.text).dim());
        }
    }

    if let Some(id) = response.conversation_id {
        println!();
        println!("Conversation: {id}");
    }
    Ok(())
}

#[inline]
pub async fn new_conversation(services: &Services) -> Result<()> {
    let id = services.database.create_conversation(None).await?;
    println!("{id}");
    Ok(())
}

#[inline]
pub async fn list_conversations(services: &Services, limit: i64) -> Result<()> {
    let conversations = services.database.recent_conversations(limit).await?;
    if conversations.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }

    for conversation in conversations {
        println!(
            "{}  last active {}",
            conversation.id,
            conversation.last_updated.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Show the health of every part of the pipeline
#[inline]
pub async fn show_status(services: &Services) -> Result<()> {
    let config = &services.config;

    println!("📊 PDF RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(config) {
        Ok(client) => match client.health_check() {
            Ok(()) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                println!("   📋 Embedding Model: {}", config.ollama.embedding_model);
                println!("   💬 Generation Model: {}", config.generation.model);
            }
            Err(e) => println!("   ⚠️  Ollama: Unhealthy - {e:#}"),
        },
        Err(e) => println!("   ❌ Ollama: Misconfigured - {e:#}"),
    }

    println!();
    println!("🔍 Vector Index '{}':", services.index.name());
    match services.index.stats().await {
        Ok(stats) => {
            let marker = match stats.status {
                IndexStatus::Active => "✅",
                IndexStatus::NotInitialized => "💤",
            };
            println!("   {} Status: {}", marker, stats.status);
            println!("   📊 Vectors: {}", stats.total_vectors);
            println!("   🔢 Dimension: {}", stats.dimension);
        }
        Err(e) => println!("   ❌ Unavailable - {e}"),
    }
    if let Ok(Some(record)) = services.database.get_index_record(services.index.name()).await {
        println!(
            "   🕒 Last Built: {}",
            record.last_updated.format("%Y-%m-%d %H:%M:%S")
        );
        println!("   📚 Documents: {}", record.documents_included.0.len());
    }
    if services.indexer.is_indexer_running() {
        println!("   🔄 A rebuild is in progress");
    }

    println!();
    println!("🧮 Consistency:");
    match ConsistencyValidator::new(&*services.database, &services.index)
        .validate_consistency()
        .await
    {
        Ok(report) if report.is_consistent => println!("   ✅ {}", report.summary()),
        Ok(report) => {
            println!("   ⚠️  {}", report.summary());
            println!("   Run 'pdf-rag rebuild' to bring the index up to date.");
        }
        Err(e) => println!("   ❌ Failed to check consistency: {e}"),
    }

    println!();
    println!("📚 Documents:");
    let documents = services.database.list_documents().await?;
    if documents.is_empty() {
        println!("   📭 No documents added yet");
    } else {
        let failed = documents.iter().filter(|d| d.document.is_failed()).count();
        let completed = documents.iter().filter(|d| d.document.is_completed()).count();
        println!("   📊 Total: {}", documents.len());
        println!("   ✅ Completed: {completed}");
        println!("   ❌ Failed: {failed}");
        println!("   📄 Chunks: {}", services.database.count_chunks().await?);
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'pdf-rag add <file>' to add a document");
    println!("   • Use 'pdf-rag ask \"<question>\"' to query your documents");

    Ok(())
}
