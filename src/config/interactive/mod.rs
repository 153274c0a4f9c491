
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;

use super::{Config, GenerationConfig, OllamaConfig, RetrievalConfig};
use crate::embeddings::chunking::ChunkingConfig;

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 PDF RAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure the local Ollama instance used for embeddings and answers.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;
    eprintln!();
    configure_generation(&mut config.generation)?;
    eprintln!();
    configure_chunking(&mut config.chunking)?;
    eprintln!();
    configure_retrieval(&mut config.retrieval)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before asking questions.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!(
        "  Embedding Model: {} ({} dims)",
        style(&config.ollama.embedding_model).cyan(),
        config.ollama.embedding_dimension
    );
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Generation:").bold().yellow());
    eprintln!("  Model: {}", style(&config.generation.model).cyan());
    eprintln!(
        "  Temperature: {}",
        style(config.generation.temperature).cyan()
    );
    eprintln!(
        "  Max Output Tokens: {}",
        style(config.generation.max_output_tokens).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Chunking:").bold().yellow());
    eprintln!("  Chunk Size: {}", style(config.chunking.chunk_size).cyan());
    eprintln!(
        "  Chunk Overlap: {}",
        style(config.chunking.chunk_overlap).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!(
        "  Default top_k: {} (max {})",
        style(config.retrieval.default_top_k).cyan(),
        config.retrieval.max_top_k
    );
    eprintln!(
        "  History: {} turns loaded, {} in prompt",
        style(config.retrieval.history_limit).cyan(),
        config.retrieval.prompt_history_turns
    );
    eprintln!("  Index Name: {}", style(&config.index.name).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Config {
    match Config::load(config_dir) {
        Ok(config) => {
            if config.config_file_path().exists() {
                eprintln!("{}", style("Found existing configuration.").green());
            } else {
                eprintln!(
                    "{}",
                    style("No existing configuration found. Using defaults.").yellow()
                );
            }
            config
        }
        Err(e) => {
            eprintln!(
                "{}",
                style(format!("Existing configuration is invalid ({e}). Using defaults.")).yellow()
            );
            Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            }
        }
    }
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), String> {
            let candidate = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..ollama.clone()
            };
            candidate.validate().map_err(|e| e.to_string())
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.embedding_model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(ollama.embedding_dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 64 and 4096")
            }
        })
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_embedding_model(model)?;
    ollama.set_embedding_dimension(dimension)?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_generation(generation: &mut GenerationConfig) -> Result<()> {
    eprintln!("{}", style("Answer Generation").bold().yellow());

    let model: String = Input::new()
        .with_prompt("Generation model")
        .default(generation.model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let temperature: f32 = Input::new()
        .with_prompt("Temperature")
        .default(generation.temperature)
        .validate_with(|input: &f32| -> Result<(), &str> {
            if (0.0..=2.0).contains(input) {
                Ok(())
            } else {
                Err("Temperature must be between 0.0 and 2.0")
            }
        })
        .interact_text()?;

    generation.set_model(model)?;
    generation.set_temperature(temperature)?;
    Ok(())
}

fn configure_chunking(chunking: &mut ChunkingConfig) -> Result<()> {
    eprintln!("{}", style("Chunking").bold().yellow());

    let chunk_size: usize = Input::new()
        .with_prompt("Chunk size (characters)")
        .default(chunking.chunk_size)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (100..=10_000).contains(input) {
                Ok(())
            } else {
                Err("Chunk size must be between 100 and 10000")
            }
        })
        .interact_text()?;

    let chunk_overlap: usize = Input::new()
        .with_prompt("Chunk overlap (characters)")
        .default(chunking.chunk_overlap.min(chunk_size.saturating_sub(1)))
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input < chunk_size {
                Ok(())
            } else {
                Err("Overlap must be smaller than the chunk size")
            }
        })
        .interact_text()?;

    let candidate = ChunkingConfig {
        chunk_size,
        chunk_overlap,
    };
    candidate.validate()?;
    *chunking = candidate;
    Ok(())
}

fn configure_retrieval(retrieval: &mut RetrievalConfig) -> Result<()> {
    eprintln!("{}", style("Retrieval").bold().yellow());

    let max_top_k = retrieval.max_top_k;
    let default_top_k: usize = Input::new()
        .with_prompt("Chunks retrieved per question")
        .default(retrieval.default_top_k)
        .validate_with(|input: &usize| -> Result<(), String> {
            if (1..=max_top_k).contains(input) {
                Ok(())
            } else {
                Err(format!("Must be between 1 and {max_top_k}"))
            }
        })
        .interact_text()?;

    let candidate = RetrievalConfig {
        default_top_k,
        ..retrieval.clone()
    };
    candidate.validate()?;
    *retrieval = candidate;
    Ok(())
}

fn non_empty(input: &String) -> Result<(), &'static str> {
    if input.trim().is_empty() {
        Err("Model name cannot be empty")
    } else {
        Ok(())
    }
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) => (400..500).contains(&code),
        Err(_) => false,
    }
}
