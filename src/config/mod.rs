// Configuration management module
// TOML settings for embedding, chunking, retrieval, answering and generation

pub mod interactive;
pub mod settings;

#[cfg(test)]
mod tests;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    AnswerConfig, Config, ConfigError, EmbeddingConfig, GenerationConfig, RetrievalConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_dir()
}
