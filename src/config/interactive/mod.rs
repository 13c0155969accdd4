#[cfg(test)]
mod tests;

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, EmbeddingConfig, GenerationConfig};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 PDF QA Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Embedding Model (Ollama)").bold().yellow());
    eprintln!("Configure the Ollama instance that serves the sentence-embedding model.");
    eprintln!();

    configure_embedding(&mut config.embedding)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.embedding) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before ingesting.");
    }

    eprintln!();
    eprintln!("{}", style("Answer Generation").bold().yellow());
    eprintln!("Without a provider, answers are quoted extracts from your documents.");
    eprintln!();

    configure_generation(&mut config.generation)?;

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
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!(
        "  Dimension: {}",
        style(config.embedding.embedding_dimension).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());

    eprintln!();
    eprintln!("{}", style("Chunking Settings:").bold().yellow());
    eprintln!(
        "  Window: {} chars, overlap {} chars",
        style(config.chunking.max_chunk_chars).cyan(),
        style(config.chunking.overlap_chars).cyan()
    );
    eprintln!(
        "  Merge paragraphs shorter than: {} chars",
        style(config.chunking.min_chunk_chars).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Answer Settings:").bold().yellow());
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());
    eprintln!(
        "  Minimum relevance: {}",
        style(config.answer.min_relevance).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Generation Settings:").bold().yellow());
    if config.generation.enabled {
        eprintln!("  Provider: {}", style(&config.generation.base_url).cyan());
        eprintln!("  Model: {}", style(&config.generation.model).cyan());
        let key_state = if config.generation.api_key().is_some() {
            style("set").green()
        } else {
            style("missing, extractive answers only").yellow()
        };
        eprintln!(
            "  API key (${}): {}",
            config.generation.api_key_env, key_state
        );
    } else {
        eprintln!("  {}", style("Disabled, extractive answers only").yellow());
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    eprintln!("Data directory: {}", style(config.data_dir().display()).dim());
}

fn load_existing_config(config_dir: &Path) -> Config {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No usable configuration found. Using defaults.").yellow()
            );
            Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            }
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn configure_embedding(embedding: &mut EmbeddingConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == embedding.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(embedding.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = EmbeddingConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..EmbeddingConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(embedding.port)
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
        .default(embedding.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(embedding.embedding_dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 64 and 4096")
            }
        })
        .interact_text()?;

    embedding.set_protocol(protocol)?;
    embedding.set_host(host)?;
    embedding.set_port(port)?;
    embedding.set_model(model)?;
    embedding.set_embedding_dimension(dimension)?;

    Ok(())
}

fn configure_generation(generation: &mut GenerationConfig) -> Result<()> {
    generation.enabled = Confirm::new()
        .with_prompt("Use a generative provider when an API key is available?")
        .default(generation.enabled)
        .interact()?;

    if !generation.enabled {
        return Ok(());
    }

    generation.base_url = Input::new()
        .with_prompt("Chat completions base URL")
        .default(generation.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            url::Url::parse(input)
                .map(|_| ())
                .map_err(|_| ConfigError::InvalidUrl(input.clone()))
        })
        .interact_text()?;

    generation.model = Input::new()
        .with_prompt("Chat model")
        .default(generation.model.clone())
        .interact_text()?;

    generation.api_key_env = Input::new()
        .with_prompt("Environment variable holding the API key")
        .default(generation.api_key_env.clone())
        .interact_text()?;

    generation.validate()?;
    Ok(())
}

fn test_ollama_connection(embedding: &EmbeddingConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        embedding.protocol, embedding.host, embedding.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
