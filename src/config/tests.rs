use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn config_file_persistence() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let config_path = temp_dir.path().join("config.toml");

    let original_config = Config {
        ollama: OllamaConfig {
            protocol: "https".to_string(),
            host: "gpu-box".to_string(),
            port: 8080,
            embedding_model: "nomic-embed-text".to_string(),
            batch_size: 16,
            embedding_dimension: 768,
            timeout_seconds: 30,
        },
        retrieval: RetrievalConfig {
            default_top_k: 3,
            ..RetrievalConfig::default()
        },
        ..Config::default()
    };

    let toml_content = toml::to_string_pretty(&original_config)
        .expect("config should convert to toml string successfully");
    fs::write(&config_path, toml_content).expect("should write to config_path successfully");

    let content =
        fs::read_to_string(&config_path).expect("should read from config_path successfully");
    let loaded_config: Config = toml::from_str(&content).expect("should parse toml correctly");

    assert_eq!(original_config, loaded_config);
}

#[test]
fn invalid_toml_handling() {
    let invalid_toml = r#"
        [ollama
        host = "localhost"
        port = "invalid_port"
    "#;

    let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
    assert!(result.is_err());
}

#[test]
fn empty_host_is_invalid() {
    let mut config = Config::default();
    config.ollama.host = String::new();
    assert!(config.validate().is_err());
}

#[test]
fn ollama_url_generation_with_different_hosts() {
    let cases = vec![
        ("http", "localhost", 11434, "http://localhost:11434/"),
        ("http", "127.0.0.1", 8080, "http://127.0.0.1:8080/"),
        (
            "https",
            "secure.example.com",
            443,
            "https://secure.example.com/",
        ),
    ];

    for (protocol, host, port, expected_url) in cases {
        let mut config = Config::default();
        config.ollama.protocol = protocol.to_string();
        config.ollama.host = host.to_string();
        config.ollama.port = port;

        let url = config.ollama_url().expect("ollama_url is ok");
        assert_eq!(url.as_str(), expected_url);
    }
}

#[test]
fn index_name_validation() {
    for name in ["default", "papers_2024", "team-a"] {
        let index = IndexConfig {
            name: name.to_string(),
        };
        assert!(index.validate().is_ok(), "{name} should be accepted");
    }

    for name in ["", "a/b", "..", "with space"] {
        let index = IndexConfig {
            name: name.to_string(),
        };
        assert!(index.validate().is_err(), "{name:?} should be rejected");
    }
}

#[test]
fn error_display_messages() {
    let errors = vec![
        ConfigError::InvalidProtocol("ftp".to_string()),
        ConfigError::InvalidPort(0),
        ConfigError::InvalidBatchSize(0),
        ConfigError::InvalidModel(String::new()),
        ConfigError::OverlapTooLarge(300, 200),
        ConfigError::InvalidTopK(0, 20),
    ];

    for error in errors {
        let message = format!("{error}");
        assert!(message.len() > 10);
    }
}
