use serde::Deserialize;

use crate::error::ProcessorError;
use crate::input::ImproveInput;
use crate::output::{GeneratedAlgorithm, ImprovedAlgorithm};
use crate::prompts;

use super::ProcessorContext;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImprovementDraft {
    algorithm: GeneratedAlgorithm,
    #[serde(default)]
    change_summary: Option<String>,
}

pub(crate) async fn run(
    ctx: &ProcessorContext<'_>,
    input: ImproveInput,
) -> Result<ImprovedAlgorithm, ProcessorError> {
    let current = ctx.load(input.algorithm_id).await?;

    let raw = ctx
        .client
        .generate_text(
            prompts::IMPROVE_SYSTEM,
            &prompts::improve(&input, &current),
            Some(&prompts::improvement_schema()),
        )
        .await?;

    let draft: ImprovementDraft = ctx.require("improve", &raw)?;
    if !draft.algorithm.is_complete() {
        return Err(ProcessorError::UnusableResponse(
            "improve: revised algorithm is missing a name or description".to_string(),
        ));
    }

    Ok(ImprovedAlgorithm {
        algorithm_id: input.algorithm_id,
        revised: draft.algorithm,
        change_summary: draft
            .change_summary
            .unwrap_or(input.change_description),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use bioforge_core::{JobType, UserId};

    use crate::client::ScriptedAiClient;
    use crate::error::{AiError, ProcessorError};
    use crate::processor::JobProcessor;
    use crate::processors::test_support::dispatch;

    #[tokio::test]
    async fn revision_defaults_summary_to_request() {
        let (dispatch, _) = dispatch(ScriptedAiClient::always(
            r#"{"algorithm": {"name": "Slime Mould v2", "description": "Adds decay"}}"#,
        ));

        let result = dispatch
            .process(
                JobType::Improve,
                &json!({"algorithmId": 5, "changeDescription": "add decay"}),
                UserId::new(2),
            )
            .await
            .unwrap();

        assert_eq!(result["algorithmId"], 5);
        assert_eq!(result["revised"]["name"], "Slime Mould v2");
        assert_eq!(result["changeSummary"], "add decay");
    }

    #[tokio::test]
    async fn client_errors_propagate() {
        let (dispatch, _) = dispatch(ScriptedAiClient::failing("connection reset"));

        let err = dispatch
            .process(
                JobType::Improve,
                &json!({"algorithmId": 5, "changeDescription": "add decay"}),
                UserId::new(2),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessorError::Ai(AiError::Transport(_))));
        assert_eq!(err.to_string(), "AI transport error: connection reset");
    }
}
