use super::*;
use crate::config::{OllamaGenerationConfig, OpenAiGenerationConfig};
use serial_test::serial;

#[test]
fn retry_hints_by_category() {
    assert!(
        GenerationError::Connection {
            endpoint: "http://localhost:11434".to_string(),
            message: "refused".to_string(),
        }
        .is_retryable()
    );
    assert!(GenerationError::Timeout { seconds: 30 }.is_retryable());
    assert!(!GenerationError::ModelNotFound("llama".to_string()).is_retryable());
    assert!(!GenerationError::Provider("bad request".to_string()).is_retryable());
}

#[test]
fn transport_errors_are_classified() {
    let endpoint = "http://localhost:1/api/generate";

    assert!(matches!(
        classify_error(ureq::Error::ConnectionFailed, endpoint, "m", 30),
        GenerationError::Connection { .. }
    ));
    assert!(matches!(
        classify_error(
            ureq::Error::Io(std::io::Error::from(ErrorKind::ConnectionRefused)),
            endpoint,
            "m",
            30
        ),
        GenerationError::Connection { .. }
    ));
    assert!(matches!(
        classify_error(
            ureq::Error::Io(std::io::Error::from(ErrorKind::TimedOut)),
            endpoint,
            "m",
            30
        ),
        GenerationError::Timeout { seconds: 30 }
    ));
    match classify_error(ureq::Error::StatusCode(404), endpoint, "llama", 30) {
        GenerationError::ModelNotFound(model) => assert_eq!(model, "llama"),
        other => panic!("expected missing model, got {other:?}"),
    }
    assert!(matches!(
        classify_error(ureq::Error::StatusCode(401), endpoint, "m", 30),
        GenerationError::Provider(_)
    ));
    assert!(matches!(
        classify_error(ureq::Error::StatusCode(500), endpoint, "m", 30),
        GenerationError::Provider(_)
    ));
}

#[test]
fn creates_ollama_generator_from_config() {
    let config = GenerationConfig::Ollama(OllamaGenerationConfig {
        model: "mistral".to_string(),
        ..OllamaGenerationConfig::default()
    });
    let generator = create_generator(&config).expect("should create generator");
    assert_eq!(generator.provider(), "ollama");
    assert_eq!(generator.model_name(), "mistral");
}

#[test]
#[serial]
fn openai_generator_needs_its_api_key() {
    let config = GenerationConfig::OpenAi(OpenAiGenerationConfig {
        api_key_env: "DOC_VAULT_TEST_MISSING_KEY".to_string(),
        ..OpenAiGenerationConfig::default()
    });
    // SAFETY: serialized with every other test touching the environment
    unsafe { std::env::remove_var("DOC_VAULT_TEST_MISSING_KEY") };

    let error = create_generator(&config)
        .err()
        .expect("missing key should fail");
    assert!(format!("{error:#}").contains("DOC_VAULT_TEST_MISSING_KEY"));
}
