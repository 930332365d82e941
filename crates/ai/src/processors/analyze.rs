//! Analysis processor.
//!
//! Unlike the other processors, analysis degrades instead of failing: an
//! unusable model response yields a default report flagged `degraded`.

use serde::Deserialize;
use tracing::warn;

use crate::error::ProcessorError;
use crate::input::{AnalysisType, AnalyzeInput};
use crate::output::{AnalysisReport, ExtensionIdea};
use crate::prompts;
use crate::sanitize::sanitize;

use super::ProcessorContext;

const DEGRADED_SUMMARY: &str = "Analysis unavailable: the AI response could not be parsed.";

#[derive(Debug, Default, Deserialize)]
struct ScoredDraft {
    score: f64,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    findings: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
}

pub(crate) async fn run(
    ctx: &ProcessorContext<'_>,
    input: AnalyzeInput,
) -> Result<AnalysisReport, ProcessorError> {
    let algorithm = ctx.load(input.algorithm_id).await?;
    let kind = input.analysis_type;

    let raw = ctx
        .client
        .generate_text(
            prompts::analysis_system(kind),
            &prompts::analyze(kind, &algorithm),
            Some(&prompts::analysis_schema(kind)),
        )
        .await?;

    let mut report = AnalysisReport {
        algorithm_id: input.algorithm_id,
        analysis_type: kind,
        score: None,
        summary: String::new(),
        findings: Vec::new(),
        recommendations: Vec::new(),
        ideas: Vec::new(),
        degraded: false,
    };

    match kind {
        AnalysisType::Sanity | AnalysisType::BlindSpots => {
            let outcome = sanitize::<ScoredDraft>(&raw, ScoredDraft::default());
            ctx.fallbacks.observe("analyze", &outcome);
            report.degraded = outcome.is_fallback();
            let draft = outcome.into_inner();

            report.score = Some(clamp_score(draft.score));
            report.summary = draft.summary;
            report.findings = draft.findings;
            report.recommendations = draft.recommendations;
        }
        AnalysisType::Extensions => {
            let outcome = sanitize::<Vec<ExtensionIdea>>(&raw, Vec::new());
            ctx.fallbacks.observe("analyze", &outcome);
            report.degraded = outcome.is_fallback();
            report.ideas = outcome.into_inner();
            report.summary = format!("{} extension ideas", report.ideas.len());
        }
    }

    if report.degraded {
        warn!(
            algorithm_id = %input.algorithm_id,
            analysis_type = kind.as_str(),
            "returning degraded analysis report"
        );
        report.summary = DEGRADED_SUMMARY.to_string();
    }

    Ok(report)
}

fn clamp_score(score: f64) -> f64 {
    if score.is_finite() { score.clamp(0.0, 100.0) } else { 0.0 }
}
