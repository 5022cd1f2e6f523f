use super::*;
use serial_test::serial;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, timeout_secs: u64) -> OpenAiGenerationConfig {
    OpenAiGenerationConfig {
        base_url: format!("{}/v1/", server.uri()),
        model: "test-chat".to_string(),
        api_key_env: "DOC_VAULT_TEST_OPENAI_KEY".to_string(),
        timeout_secs,
    }
}

#[test]
#[serial]
fn api_key_comes_from_environment() {
    let config = OpenAiGenerationConfig {
        api_key_env: "DOC_VAULT_TEST_OPENAI_KEY".to_string(),
        ..OpenAiGenerationConfig::default()
    };
    // SAFETY: serialized with every other test touching the environment
    unsafe { std::env::set_var("DOC_VAULT_TEST_OPENAI_KEY", "sk-from-env") };
    let generator = OpenAiGenerator::new(&config).expect("should create generator");
    unsafe { std::env::remove_var("DOC_VAULT_TEST_OPENAI_KEY") };

    assert_eq!(generator.api_key, "sk-from-env");
    assert_eq!(
        generator.endpoint,
        "https://api.openai.com/v1/chat/completions"
    );
    assert!(!format!("{generator:?}").contains("sk-from-env"));
}

#[tokio::test(flavor = "multi_thread")]
async fn returns_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-chat",
            "messages": [{ "role": "user", "content": "Say hi" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": "Hi there!\n" } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let generator = OpenAiGenerator::with_api_key(&config_for(&server, 5), "sk-test".to_string());
    let answer = generator.generate("Say hi").await.expect("should generate");
    assert_eq!(answer, "Hi there!");
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_choices_are_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
        )
        .mount(&server)
        .await;

    let generator = OpenAiGenerator::with_api_key(&config_for(&server, 5), "sk-test".to_string());
    assert!(matches!(
        generator.generate("hello").await,
        Err(GenerationError::Provider(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_model_and_bad_key_are_told_apart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-wrong"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let wrong_key =
        OpenAiGenerator::with_api_key(&config_for(&server, 5), "sk-wrong".to_string());
    match wrong_key.generate("hello").await {
        Err(GenerationError::Provider(message)) => assert!(message.contains("401")),
        other => panic!("expected authentication failure, got {other:?}"),
    }

    let missing_model =
        OpenAiGenerator::with_api_key(&config_for(&server, 5), "sk-test".to_string());
    assert!(matches!(
        missing_model.generate("hello").await,
        Err(GenerationError::ModelNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "choices": [] }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let generator = OpenAiGenerator::with_api_key(&config_for(&server, 1), "sk-test".to_string());
    assert!(matches!(
        generator.generate("hello").await,
        Err(GenerationError::Timeout { seconds: 1 })
    ));
}
