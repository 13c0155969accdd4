use super::*;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join("config.toml");

        let mut original_config = Config::default();
        original_config.embedding.protocol = "https".to_string();
        original_config.embedding.host = "test-host".to_string();
        original_config.embedding.port = 8080;
        original_config.embedding.model = "test-model".to_string();
        original_config.generation.enabled = false;

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
            [embedding
            host = "localhost"
            port = "invalid_port"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn wrongly_typed_field_is_rejected() {
        let invalid_toml = r#"
            [retrieval]
            top_k = "five"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn complete_valid_config() {
        let valid_toml = r#"
            [embedding]
            protocol = "http"
            host = "localhost"
            port = 11434
            model = "all-minilm:latest"
            batch_size = 64
            embedding_dimension = 384
            timeout_secs = 10

            [chunking]
            max_chunk_chars = 500
            overlap_chars = 100
            min_chunk_chars = 120
            max_chunks_per_page = 20

            [retrieval]
            top_k = 3

            [answer]
            min_relevance = 0.3
            context_char_budget = 4000
            excerpt_char_budget = 400

            [generation]
            enabled = true
            base_url = "http://localhost:8000/v1"
            model = "local-model"
            api_key_env = "LOCAL_LLM_KEY"
            timeout_secs = 15
            temperature = 0.0
            max_tokens = 256
        "#;

        let config: Config = toml::from_str(valid_toml).expect("should parse toml successfully");
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.chunking.max_chunk_chars, 500);
        assert_eq!(config.retrieval.top_k, 3);
        assert!((config.answer.min_relevance - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.generation.base_url, "http://localhost:8000/v1");
        assert_eq!(config.generation.api_key_env, "LOCAL_LLM_KEY");
    }

    #[test]
    fn config_validation_edge_cases() {
        let mut config = Config::default();
        config.embedding.host = String::new();

        let result = config.validate();
        assert!(result.is_err()); // Empty host should be invalid
    }

    #[test]
    fn ollama_url_generation_with_different_hosts() {
        let configs = vec![
            ("http", "localhost", 11434, "http://localhost:11434/"),
            ("http", "127.0.0.1", 8080, "http://127.0.0.1:8080/"),
            (
                "https",
                "secure.example.com",
                443,
                "https://secure.example.com/",
            ),
        ];

        for (protocol, host, port, expected_url) in configs {
            let config = EmbeddingConfig {
                protocol: protocol.to_string(),
                host: host.to_string(),
                port,
                ..EmbeddingConfig::default()
            };

            let url = config.ollama_url().expect("ollama_url is ok");
            assert_eq!(url.as_str(), expected_url);
        }
    }

    #[test]
    fn error_display_messages() {
        let errors = vec![
            ConfigError::InvalidProtocol("ftp".to_string()),
            ConfigError::InvalidPort(0),
            ConfigError::InvalidBatchSize(0),
            ConfigError::InvalidModel(String::new()),
            ConfigError::InvalidUrl("invalid-url".to_string()),
            ConfigError::InvalidOverlap(800, 750),
            ConfigError::InvalidRelevance(2.0),
        ];

        for error in errors {
            let message = format!("{error}");
            assert!(!message.is_empty());
            assert!(message.len() > 10);
        }
    }
}
