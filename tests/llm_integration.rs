//! Live tests against a LiteLLM-compatible endpoint.
//!
//! Run with: LITELLM_API_BASE=http://localhost:4000 LITELLM_API_KEY=key \
//!   cargo test --test llm_integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use content_forge::llm::{
    GenerationRequest, LiteLlmClient, LlmProvider, Message, ModelGateway, ProviderGateway,
    SamplingParams,
};
use content_forge::pipeline::{PipelineConfig, RetryController};
use content_forge::task::{AssessmentMaterial, Language, SpeakingSection, TaskSpec, Tier};

fn create_test_client() -> LiteLlmClient {
    LiteLlmClient::from_env()
        .expect("LITELLM_API_BASE environment variable must be set for integration tests")
}

#[tokio::test]
#[ignore]
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        client.default_model().to_string(),
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(content.contains('4'), "Response should contain '4', got: {}", content);
}

#[tokio::test]
#[ignore]
async fn test_gateway_json_mode() {
    let client = Arc::new(create_test_client());
    let model = client.default_model().to_string();
    let gateway = ProviderGateway::new(client, model);

    let reply = gateway
        .generate(
            "Respond with a JSON object only.",
            "Return {\"answer\": 4} for 2 + 2.",
            &SamplingParams::new(0.0, 50),
            Duration::from_secs(60),
        )
        .await
        .expect("gateway call should succeed");

    let value: serde_json::Value = serde_json::from_str(reply.trim()).expect("JSON reply");
    assert!(value.get("answer").is_some());
}

#[tokio::test]
#[ignore]
async fn test_roleplay_assessment_end_to_end() {
    let client = Arc::new(create_test_client());
    let model = client.default_model().to_string();
    let gateway = Arc::new(ProviderGateway::new(client, model.clone()));
    let controller = RetryController::new(
        gateway,
        PipelineConfig::default()
            .with_model(model)
            .with_attempt_timeout(Duration::from_secs(90)),
    );

    let spec = TaskSpec::spoken(
        Language::Es,
        Tier::Foundation,
        SpeakingSection::Roleplay,
        AssessmentMaterial::new("Hola, quiero comprar una entrada para el cine, por favor.")
            .with_question("Estás en el cine. Compra una entrada."),
    );

    let outcome = controller.submit(&spec).await.expect("assessment should pass");
    let result = outcome.result.as_assessment().expect("assessment result");
    assert_eq!(result.max_score, 10);
    assert!(result.total_score <= result.max_score);
    assert!(!result.feedback.is_empty());
}
