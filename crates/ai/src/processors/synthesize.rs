use crate::error::ProcessorError;
use crate::input::SynthesizeInput;
use crate::output::{GeneratedAlgorithm, HybridAlgorithm};
use crate::prompts;

use super::ProcessorContext;

pub(crate) async fn run(
    ctx: &ProcessorContext<'_>,
    input: SynthesizeInput,
) -> Result<HybridAlgorithm, ProcessorError> {
    let mut sources = Vec::with_capacity(input.algorithm_ids.len());
    for id in &input.algorithm_ids {
        sources.push(ctx.load(*id).await?);
    }

    let raw = ctx
        .client
        .generate_text(
            prompts::SYNTHESIZE_SYSTEM,
            &prompts::synthesize(&input, &sources),
            Some(&prompts::algorithm_schema()),
        )
        .await?;

    let algorithm: GeneratedAlgorithm = ctx.require("synthesize", &raw)?;
    if !algorithm.is_complete() {
        return Err(ProcessorError::UnusableResponse(
            "synthesize: hybrid is missing a name or description".to_string(),
        ));
    }

    Ok(HybridAlgorithm {
        source_ids: input.algorithm_ids,
        algorithm,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use bioforge_core::{AlgorithmId, JobType, UserId};

    use crate::client::ScriptedAiClient;
    use crate::error::ProcessorError;
    use crate::processor::JobProcessor;
    use crate::processors::test_support::dispatch;

    #[tokio::test]
    async fn hybrid_lists_its_sources() {
        let (dispatch, client) = dispatch(ScriptedAiClient::always(
            "Here you go: {\"name\": \"Ant-Bee Hybrid\", \"description\": \"Pheromones plus dances\"}",
        ));

        let result = dispatch
            .process(JobType::Synthesize, &json!({"algorithmIds": [1, 2]}), UserId::new(3))
            .await
            .unwrap();

        assert_eq!(result["sourceIds"], json!([1, 2]));
        assert_eq!(result["algorithm"]["name"], "Ant-Bee Hybrid");

        let prompt = &client.calls()[0].user_prompt;
        assert!(prompt.contains("Ant Colony"));
        assert!(prompt.contains("Bee Foraging"));
    }

    #[tokio::test]
    async fn missing_source_fails_before_calling_the_model() {
        let (dispatch, client) = dispatch(ScriptedAiClient::always("{}"));

        let err = dispatch
            .process(JobType::Synthesize, &json!({"algorithmIds": [1, 99]}), UserId::new(3))
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessorError::AlgorithmNotFound(id) if id == AlgorithmId::new(99)));
        assert!(client.calls().is_empty());
    }
}
