use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;

use super::*;
use crate::database::sqlite::models::NewVectorIndexRecord;
use crate::database::{ChunkContext, Database};
use crate::test_support::{
    RecordingGenerator, VocabularyEmbedder, add_document, test_database, test_embedder,
    test_generator,
};

/// Delegates to SQLite and records how much history was requested and returned
struct HistorySpy {
    inner: Arc<Database>,
    lookups: Mutex<Vec<(usize, usize)>>,
}

#[async_trait]
impl RecordStore for HistorySpy {
    async fn chunks_for_build(&self, document_ids: Option<&[Uuid]>) -> Result<Vec<ChunkContext>> {
        self.inner.chunks_for_build(document_ids).await
    }

    async fn get_chunks(&self, chunk_ids: &[Uuid]) -> Result<HashMap<Uuid, ChunkContext>> {
        self.inner.get_chunks(chunk_ids).await
    }

    async fn conversation_history(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Option<Vec<ConversationTurn>>> {
        let turns = self.inner.conversation_history(conversation_id, limit).await?;
        let returned = turns.as_ref().map_or(0, Vec::len);
        self.lookups
            .lock()
            .expect("lookups lock")
            .push((limit, returned));
        Ok(turns)
    }

    async fn conversation_exists(&self, conversation_id: Uuid) -> Result<bool> {
        self.inner.conversation_exists(conversation_id).await
    }

    async fn create_conversation(&self, session_id: Option<&str>) -> Result<Uuid> {
        self.inner.create_conversation(session_id).await
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        source_chunks: &[Uuid],
    ) -> Result<()> {
        self.inner
            .append_message(conversation_id, role, content, source_chunks)
            .await
    }

    async fn upsert_index_record(&self, record: &NewVectorIndexRecord) -> Result<()> {
        self.inner.upsert_index_record(record).await
    }
}

struct Fixture {
    _temp_dir: TempDir,
    _index_dir: TempDir,
    database: Arc<Database>,
    store: Arc<HistorySpy>,
    embedder: Arc<VocabularyEmbedder>,
    generator: Arc<RecordingGenerator>,
    service: RagService,
}

async fn fixture_with(generator: RecordingGenerator) -> Fixture {
    let (temp_dir, database) = test_database().await;
    let index_dir = TempDir::new().expect("index dir");
    let store = Arc::new(HistorySpy {
        inner: Arc::clone(&database),
        lookups: Mutex::new(Vec::new()),
    });
    let generator = Arc::new(generator);
    let embedder = Arc::new(VocabularyEmbedder::default());

    let index = Arc::new(VectorIndex::new(
        "default",
        index_dir.path(),
        test_embedder(Arc::clone(&embedder)),
        Arc::clone(&store) as Arc<dyn RecordStore>,
        3,
    ));
    let service = RagService::new(
        index,
        test_generator(Arc::clone(&generator)),
        Arc::clone(&store) as Arc<dyn RecordStore>,
        RetrievalConfig::default(),
    );

    Fixture {
        _temp_dir: temp_dir,
        _index_dir: index_dir,
        database,
        store,
        embedder,
        generator,
        service,
    }
}

async fn fixture() -> Fixture {
    fixture_with(RecordingGenerator::replying("Paris.")).await
}

async fn capitals(f: &Fixture) -> Uuid {
    let doc = add_document(
        &f.database,
        "capitals.pdf",
        &[
            "Paris is the capital of France.",
            "Berlin is the capital of Germany.",
        ],
    )
    .await;
    let summary = f.service.rebuild_index(None).await.expect("rebuild");
    assert_eq!(summary.vectors_indexed, 2);
    doc
}

#[tokio::test]
async fn answers_with_the_matching_chunk_as_source() {
    let f = fixture().await;
    let doc = capitals(&f).await;

    let response = f
        .service
        .process_query(&QueryRequest::new("What is the capital of France?").with_top_k(1))
        .await
        .expect("query");

    assert_eq!(response.answer, "Paris.");
    assert_eq!(response.chunks_retrieved, 1);
    assert_eq!(response.sources.len(), 1);
    let source = &response.sources[0];
    assert_eq!(source.text, "Paris is the capital of France.");
    assert_eq!(source.document_id, doc);
    assert_eq!(source.document_name, "capitals.pdf");
    assert_eq!(source.page_number, 1);

    let both = f
        .service
        .process_query(&QueryRequest::new("What is the capital of France?").with_top_k(2))
        .await
        .expect("query");
    assert_eq!(both.sources[0].chunk_id, source.chunk_id);
    assert!(both.sources[0].similarity_score > both.sources[1].similarity_score);

    let prompt = f.generator.last_prompt().expect("prompt sent");
    assert!(prompt.contains("[Document: capitals.pdf, Page: 1]\nParis is the capital of France."));
    assert!(prompt.contains("Question: What is the capital of France?"));
}

#[tokio::test]
async fn empty_corpus_yields_canned_answer() {
    let f = fixture().await;

    let rebuild = f.service.rebuild_index(None).await;
    assert!(matches!(rebuild, Err(RagError::EmptyCorpus)));

    let response = f
        .service
        .process_query(&QueryRequest::new("Anything at all?"))
        .await
        .expect("query");
    assert_eq!(response.answer, NO_RELEVANT_INFORMATION);
    assert!(response.sources.is_empty());
    assert_eq!(response.chunks_retrieved, 0);
    assert!(f.generator.last_prompt().is_none());
}

#[tokio::test]
async fn history_is_bounded_in_lookup_and_prompt() {
    let f = fixture().await;
    capitals(&f).await;

    let conversation = f.database.create_conversation(None).await.expect("conversation");
    for i in 0..11 {
        let role = if i % 2 == 0 {
            MessageRole::User
        } else {
            MessageRole::Assistant
        };
        f.database
            .append_message(conversation, role, &format!("message number {i}"), &[])
            .await
            .expect("append");
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    f.service
        .process_query(&QueryRequest::new("capital of Germany?").with_conversation(conversation))
        .await
        .expect("query");

    let lookups = f.store.lookups.lock().expect("lookups lock").clone();
    assert_eq!(lookups, vec![(10, 10)]);

    let prompt = f.generator.last_prompt().expect("prompt sent");
    for i in 0..6 {
        assert!(!prompt.contains(&format!("message number {i}\n")), "message {i} leaked");
    }
    for i in 6..11 {
        assert!(prompt.contains(&format!("message number {i}\n")), "message {i} missing");
    }
}

#[tokio::test]
async fn unknown_conversation_only_drops_history() {
    let f = fixture().await;
    capitals(&f).await;

    let response = f
        .service
        .process_query(&QueryRequest::new("capital of France").with_conversation(Uuid::new_v4()))
        .await
        .expect("query");

    assert_eq!(response.answer, "Paris.");
    let prompt = f.generator.last_prompt().expect("prompt sent");
    assert!(!prompt.contains("Previous conversation:"));
}

#[tokio::test]
async fn generation_failure_fails_the_query() {
    let f = fixture_with(RecordingGenerator::failing()).await;
    capitals(&f).await;

    let result = f
        .service
        .process_query(&QueryRequest::new("capital of France"))
        .await;
    let error = result.expect_err("generation is down");
    assert!(matches!(error, RagError::GenerationUnavailable(_)));
    assert!(error.is_backend_unavailable());
}

#[tokio::test]
async fn embedding_failure_fails_the_query() {
    let f = fixture().await;
    capitals(&f).await;
    f.embedder.set_unreachable(true);

    let error = f
        .service
        .process_query(&QueryRequest::new("capital of France"))
        .await
        .expect_err("embedding is down");
    assert!(matches!(error, RagError::EmbeddingUnavailable(_)));
    assert!(error.is_backend_unavailable());
    assert!(f.generator.last_prompt().is_none());
}

#[tokio::test]
async fn top_k_outside_range_is_rejected() {
    let f = fixture().await;

    for top_k in [0, 21] {
        let result = f
            .service
            .process_query(&QueryRequest::new("question").with_top_k(top_k))
            .await;
        assert!(matches!(result, Err(RagError::InvalidRequest(_))), "top_k {top_k}");
    }

    let blank = f.service.process_query(&QueryRequest::new("   ")).await;
    assert!(matches!(blank, Err(RagError::InvalidRequest(_))));
}

#[tokio::test]
async fn document_filter_limits_sources() {
    let f = fixture().await;
    capitals(&f).await;
    let other = add_document(&f.database, "rivers.pdf", &["The Seine flows through the capital Paris."])
        .await;
    f.service.rebuild_index(None).await.expect("rebuild");

    let response = f
        .service
        .process_query(
            &QueryRequest::new("capital of France")
                .with_documents(vec![other])
                .with_top_k(3),
        )
        .await
        .expect("query");

    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].document_id, other);
}

#[tokio::test]
async fn long_chunks_are_previewed() {
    let f = fixture().await;
    let long_text = format!("capital {}", "word ".repeat(100));
    add_document(&f.database, "long.pdf", &[long_text.as_str()]).await;
    f.service.rebuild_index(None).await.expect("rebuild");

    let response = f
        .service
        .process_query(&QueryRequest::new("capital"))
        .await
        .expect("query");

    let preview = &response.sources[0].text;
    assert_eq!(preview.chars().count(), 203);
    assert!(preview.ends_with("..."));

    let prompt = f.generator.last_prompt().expect("prompt sent");
    assert!(prompt.contains(long_text.trim()));
}

#[tokio::test]
async fn converse_records_both_turns() {
    let f = fixture().await;
    capitals(&f).await;

    let response = f
        .service
        .converse(&QueryRequest::new("What is the capital of France?").with_top_k(1))
        .await
        .expect("converse");
    let conversation = response.conversation_id.expect("conversation started");

    let messages = f
        .database
        .conversation_messages(conversation, 10)
        .await
        .expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content, "What is the capital of France?");
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, "Paris.");
    assert_eq!(messages[1].source_chunk_ids(), response.source_chunk_ids().as_slice());

    let follow_up = f
        .service
        .converse(&QueryRequest::new("And Germany?").with_conversation(conversation))
        .await
        .expect("follow up");
    assert_eq!(follow_up.conversation_id, Some(conversation));
    let prompt = f.generator.last_prompt().expect("prompt sent");
    assert!(prompt.contains("User: What is the capital of France?\nAssistant: Paris.\n"));
}

#[tokio::test]
async fn converse_rejects_unknown_conversation() {
    let f = fixture().await;
    let missing = Uuid::new_v4();

    let result = f
        .service
        .converse(&QueryRequest::new("hello").with_conversation(missing))
        .await;
    assert!(matches!(result, Err(RagError::ConversationNotFound(id)) if id == missing));
}
