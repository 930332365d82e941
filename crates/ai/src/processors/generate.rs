use tracing::debug;

use crate::error::ProcessorError;
use crate::input::GenerateInput;
use crate::output::GeneratedAlgorithm;
use crate::prompts;

use super::ProcessorContext;

pub(crate) async fn run(
    ctx: &ProcessorContext<'_>,
    input: GenerateInput,
) -> Result<GeneratedAlgorithm, ProcessorError> {
    let raw = ctx
        .client
        .generate_text(
            prompts::GENERATE_SYSTEM,
            &prompts::generate(&input),
            Some(&prompts::algorithm_schema()),
        )
        .await?;

    let mut algorithm: GeneratedAlgorithm = ctx.require("generate", &raw)?;
    if !algorithm.is_complete() {
        return Err(ProcessorError::UnusableResponse(
            "generate: algorithm is missing a name or description".to_string(),
        ));
    }
    if algorithm.inspiration.is_none() {
        algorithm.inspiration = Some(input.inspiration);
    }

    debug!(name = %algorithm.name, "generated algorithm");
    Ok(algorithm)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use bioforge_core::{JobType, UserId};

    use crate::client::ScriptedAiClient;
    use crate::error::ProcessorError;
    use crate::processor::JobProcessor;
    use crate::processors::test_support::dispatch;

    #[tokio::test]
    async fn fenced_response_becomes_algorithm() {
        let (dispatch, client) = dispatch(ScriptedAiClient::always(
            "```json\n{\"name\": \"Firefly Drift\", \"description\": \"Light-attraction search\", \"steps\": [\"glow\", \"move\"]}\n```",
        ));

        let result = dispatch
            .process(JobType::Generate, &json!({"inspiration": "fireflies"}), UserId::new(7))
            .await
            .unwrap();

        assert_eq!(result["name"], "Firefly Drift");
        assert_eq!(result["inspiration"], "fireflies");
        assert_eq!(result["steps"], json!(["glow", "move"]));

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].user_prompt.contains("fireflies"));
        assert!(calls[0].schema_hint.is_some());
    }

    #[tokio::test]
    async fn truncated_response_is_unusable() {
        let (dispatch, _) = dispatch(ScriptedAiClient::always("{\"name\": \"Firefly"));

        let err = dispatch
            .process(JobType::Generate, &json!({"inspiration": "fireflies"}), UserId::new(7))
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessorError::UnusableResponse(_)));
        assert_eq!(dispatch.fallbacks().total(), 1);
    }

    #[tokio::test]
    async fn nameless_algorithm_is_unusable() {
        let (dispatch, _) = dispatch(ScriptedAiClient::always("{\"name\": \"\", \"description\": \"x\"}"));

        let err = dispatch
            .process(JobType::Generate, &json!({"inspiration": "moss"}), UserId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::UnusableResponse(_)));
    }
}
