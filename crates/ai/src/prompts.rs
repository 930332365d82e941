//! Prompt text for each processor.
//!
//! Wording is deliberately short; the shape of the expected JSON travels as a
//! schema hint alongside.

use serde_json::{Value as JsonValue, json};

use crate::input::{AnalysisType, GenerateInput, ImproveInput, SynthesizeInput};
use crate::source::AlgorithmSummary;

pub(crate) const GENERATE_SYSTEM: &str =
    "You design optimisation and search algorithms inspired by biological systems.";

pub(crate) const SYNTHESIZE_SYSTEM: &str =
    "You combine existing bio-inspired algorithms into a coherent hybrid algorithm.";

pub(crate) const IMPROVE_SYSTEM: &str =
    "You revise bio-inspired algorithms according to requested changes, keeping what works.";

pub(crate) fn analysis_system(kind: AnalysisType) -> &'static str {
    match kind {
        AnalysisType::Sanity => {
            "You review bio-inspired algorithms for feasibility and internal consistency and score them 0-100."
        }
        AnalysisType::BlindSpots => {
            "You identify blind spots, failure modes and risks in bio-inspired algorithms and score their robustness 0-100."
        }
        AnalysisType::Extensions => {
            "You propose concrete extensions and new applications for bio-inspired algorithms."
        }
    }
}

pub(crate) fn algorithm_schema() -> JsonValue {
    json!({
        "name": "string",
        "description": "string",
        "inspiration": "string",
        "steps": ["string"],
        "parameters": {"<name>": "description"},
        "applications": ["string"],
        "pseudocode": "string"
    })
}

pub(crate) fn improvement_schema() -> JsonValue {
    json!({
        "algorithm": algorithm_schema(),
        "changeSummary": "string"
    })
}

pub(crate) fn analysis_schema(kind: AnalysisType) -> JsonValue {
    match kind {
        AnalysisType::Sanity | AnalysisType::BlindSpots => json!({
            "score": "number 0-100",
            "summary": "string",
            "findings": ["string"],
            "recommendations": ["string"]
        }),
        AnalysisType::Extensions => json!([
            {"title": "string", "description": "string", "potential": "string"}
        ]),
    }
}

pub(crate) fn generate(input: &GenerateInput) -> String {
    let mut prompt = format!("Design a new algorithm inspired by: {}.", input.inspiration);
    if let Some(domain) = &input.domain {
        prompt.push_str(&format!("\nTarget problem domain: {domain}."));
    }
    if !input.constraints.is_empty() {
        prompt.push_str("\nConstraints:");
        for c in &input.constraints {
            prompt.push_str(&format!("\n- {c}"));
        }
    }
    prompt
}

pub(crate) fn synthesize(input: &SynthesizeInput, sources: &[AlgorithmSummary]) -> String {
    let mut prompt = String::from("Combine the following algorithms into one hybrid:");
    for s in sources {
        prompt.push_str(&format!("\n\n{}", describe(s)));
    }
    if let Some(goal) = &input.goal {
        prompt.push_str(&format!("\n\nThe hybrid should: {goal}"));
    }
    prompt
}

pub(crate) fn analyze(kind: AnalysisType, algorithm: &AlgorithmSummary) -> String {
    format!("Analysis requested: {}.\n\n{}", kind.as_str(), describe(algorithm))
}

pub(crate) fn improve(input: &ImproveInput, algorithm: &AlgorithmSummary) -> String {
    format!(
        "{}\n\nRequested change: {}",
        describe(algorithm),
        input.change_description
    )
}

fn describe(a: &AlgorithmSummary) -> String {
    let mut out = format!("Algorithm #{}: {}\n{}", a.id, a.name, a.description);
    if let Some(inspiration) = &a.inspiration {
        out.push_str(&format!("\nInspiration: {inspiration}"));
    }
    if !a.details.is_null() {
        out.push_str(&format!("\nDetails: {}", a.details));
    }
    out
}
