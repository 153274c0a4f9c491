use super::*;

fn test_config() -> Config {
    let mut config = Config::default();
    config.ollama.host = "test-host".to_string();
    config.ollama.port = 1234;
    config.ollama.embedding_model = "test-embed".to_string();
    config.ollama.batch_size = 16;
    config.generation.model = "test-llm".to_string();
    config
}

fn model(name: &str) -> ModelInfo {
    ModelInfo {
        name: name.to_string(),
        size: None,
        digest: None,
        details: None,
    }
}

#[test]
fn client_configuration() {
    let client = OllamaClient::new(&test_config()).expect("Failed to create client");

    assert_eq!(client.embedding_model, "test-embed");
    assert_eq!(client.generation_model, "test-llm");
    assert_eq!(client.batch_size, 16);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
    assert_eq!(EmbeddingBackend::model_name(&client), "test-embed");
    assert_eq!(GenerationBackend::model_name(&client), "test-llm");
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&test_config())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);
    assert_eq!(client.retry_attempts, 5);

    let client = client.with_retry_attempts(0);
    assert_eq!(client.retry_attempts, 1);
}

#[test]
fn model_matching_accepts_implicit_latest_tag() {
    assert!(model("all-minilm:latest").matches("all-minilm"));
    assert!(model("all-minilm:latest").matches("all-minilm:latest"));
    assert!(model("all-minilm").matches("all-minilm"));
    assert!(!model("all-minilm:33m").matches("all-minilm"));
    assert!(!model("all-minilm:latest").matches("all-minilm:33m"));
}

#[test]
fn require_model_lists_alternatives() {
    let models = vec![model("llama3.2:latest"), model("all-minilm:latest")];
    assert!(OllamaClient::require_model(&models, "llama3.2").is_ok());

    let err = OllamaClient::require_model(&models, "mistral").expect_err("missing model");
    let message = err.to_string();
    assert!(message.contains("mistral"));
    assert!(message.contains("all-minilm:latest"));
}

#[test]
fn empty_batch_needs_no_server() {
    let client = OllamaClient::new(&test_config()).expect("Failed to create client");
    let embeddings = client
        .generate_embeddings_batch(&[])
        .expect("empty batch should succeed");
    assert!(embeddings.is_empty());
}

#[test]
fn generate_request_serialization() {
    let request = GenerateRequest {
        model: "llama3.2",
        prompt: "Hello",
        stream: false,
        options: GenerateRequestOptions {
            temperature: 0.5,
            num_predict: 100,
        },
    };
    let json: serde_json::Value =
        serde_json::to_value(&request).expect("request should serialize");

    assert_eq!(json["stream"], false);
    assert_eq!(json["options"]["num_predict"], 100);
    assert_eq!(json["options"]["temperature"], 0.5);
}
