use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn explicit_data_dir_wins() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let resolved = resolve_data_dir(Some(temp_dir.path())).expect("should resolve data dir");
    assert_eq!(resolved, temp_dir.path());
}

#[test]
fn partial_config_with_defaults() {
    let partial_toml = r#"
        [search]
        min_score = 0.7
    "#;

    let config: Config = toml::from_str(partial_toml).expect("should fill in defaults");
    assert!((config.search.min_score - 0.7).abs() < f32::EPSILON);
    assert_eq!(config.search.default_limit, 10);
    assert_eq!(config.import, ImportSettings::default());
    assert_eq!(config.embedding, EmbeddingConfig::default());
}

#[test]
fn invalid_toml_handling() {
    let invalid_toml = r#"
        [import
        chunk_size = "large"
    "#;

    let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
    assert!(result.is_err());
}

#[test]
fn config_file_persistence() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");

    let mut original = Config::with_base_dir(temp_dir.path());
    original.embedding = EmbeddingConfig::Ollama(OllamaEmbeddingConfig {
        host: "embed-host".to_string(),
        port: 8080,
        ..OllamaEmbeddingConfig::default()
    });
    original.generation = GenerationConfig::OpenAi(OpenAiGenerationConfig::default());
    original.save().expect("should save config");

    let content =
        fs::read_to_string(original.config_file_path()).expect("should read saved config");
    assert!(content.contains("provider = \"ollama\""));
    assert!(content.contains("provider = \"openai\""));

    let loaded = Config::load(temp_dir.path()).expect("should load config");
    assert_eq!(original, loaded);
}

#[test]
fn ollama_url_generation_with_different_hosts() {
    let cases = [
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
        let ollama = OllamaEmbeddingConfig {
            protocol: protocol.to_string(),
            host: host.to_string(),
            port,
            ..OllamaEmbeddingConfig::default()
        };

        let url = ollama.ollama_url().expect("ollama_url is ok");
        assert_eq!(url.as_str(), expected_url);
    }
}

#[test]
fn error_display_messages() {
    let errors = vec![
        ConfigError::InvalidProtocol("ftp".to_string()),
        ConfigError::InvalidPort(0),
        ConfigError::OverlapTooLarge(200, 100),
        ConfigError::InvalidModel(String::new()),
        ConfigError::InvalidMinScore(2.0),
    ];

    for error in errors {
        let message = format!("{error}");
        assert!(message.len() > 10);
    }
}
