//! Per-criterion LLM judging
//!
//! Every criterion gets its own judge call with nothing but the criterion and
//! the transcript, so one judgment can't anchor another and each verdict can
//! be reproduced on its own. The calls for one trace run concurrently through
//! a bounded pool and are put back in rubric order afterwards.

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::report::EvaluationReport;
use super::rubric::{Criterion, Rubric};
use super::runner::preview;
use super::{Category, ConversationTrace, CriterionEval, Message, ModelConfig};
use crate::config::JUDGE_PREVIEW_CHARS;
use crate::error::Result;
use crate::llm::{ChatClient, ChatRequest};

pub const STRUCTURAL_PROMPT: &str = r#"You are evaluating a conversation between an AI agent and a user. The agent has a pedagogical skill installed.

Evaluate this specific criterion:
ID: {criterion_id}
Description: {description}
How to check: {check}

Conversation transcript:
{transcript}

Does the agent's behavior satisfy this criterion? Respond with exactly this JSON format:
{"result": "pass" or "fail", "justification": "<one sentence explaining your judgment>"}"#;

pub const PEDAGOGICAL_PROMPT: &str = r#"You are evaluating a conversation between an AI agent and a user. The agent has a pedagogical skill installed.

Evaluate this specific quality dimension:
ID: {criterion_id}
Description: {description}

Conversation transcript:
{transcript}

Rate the agent on this dimension. Respond with exactly this JSON format:
{"result": "strong" or "adequate" or "weak", "justification": "<one sentence explaining your judgment>"}"#;

pub const ANTI_PATTERN_PROMPT: &str = r#"You are evaluating a conversation between an AI agent and a user. The agent has a pedagogical skill installed.

Check for this anti-pattern:
ID: {criterion_id}
Description: {description}
How to detect: {check}

Conversation transcript:
{transcript}

Did the agent violate this anti-pattern? Respond with exactly this JSON format:
{"result": "clear" or "violation", "justification": "<one sentence explaining your judgment>"}"#;

const NO_JUSTIFICATION: &str = "No justification provided";

impl Category {
    pub fn prompt_template(&self) -> &'static str {
        match self {
            Category::Structural => STRUCTURAL_PROMPT,
            Category::Pedagogical => PEDAGOGICAL_PROMPT,
            Category::AntiPattern => ANTI_PATTERN_PROMPT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    result: Option<String>,
    /// Judges don't always send a string here
    justification: Option<serde_json::Value>,
}

fn justification_text(value: Option<serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => NO_JUSTIFICATION.to_string(),
        Some(serde_json::Value::String(text)) => text,
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        Some(other) => other.to_string(),
    }
}

/// Fill a judge prompt template for one criterion.
pub fn build_judge_prompt(template: &str, criterion: &Criterion, transcript: &str) -> String {
    // The transcript goes last so text inside it is never treated as a placeholder.
    template
        .replace("{criterion_id}", &criterion.id)
        .replace("{description}", &criterion.description)
        .replace("{check}", criterion.check_text())
        .replace("{transcript}", transcript)
}

/// Strip an optional markdown code fence around a judge response.
fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        text = rest.trim_start();
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim_end();
    }
    text
}

fn parse_raw_verdict(raw: &str) -> Option<RawVerdict> {
    let text = strip_fences(raw);

    if let Ok(verdict) = serde_json::from_str::<RawVerdict>(text) {
        return Some(verdict);
    }

    // Judges sometimes wrap the object in prose
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<RawVerdict>(&text[start..=end]).ok()
}

fn fallback_eval(criterion: &Criterion, category: Category, justification: String) -> CriterionEval {
    CriterionEval {
        criterion_id: criterion.id.clone(),
        description: criterion.description.clone(),
        result: category.fallback(),
        justification,
    }
}

/// Turn a judge's raw reply into a verdict.
///
/// Never fails: anything unreadable becomes the category's worst-case result.
pub fn parse_judge_response(raw: &str, criterion: &Criterion, category: Category) -> CriterionEval {
    let parsed = parse_raw_verdict(raw).and_then(|verdict| {
        let result = category.parse_result(verdict.result.as_deref()?)?;
        Some((result, verdict.justification))
    });

    match parsed {
        Some((result, justification)) => CriterionEval {
            criterion_id: criterion.id.clone(),
            description: criterion.description.clone(),
            result,
            justification: justification_text(justification),
        },
        None => {
            let snippet = preview(raw, JUDGE_PREVIEW_CHARS);
            warn!("  Judge response unparseable for {}: {}", criterion.id, snippet);
            fallback_eval(
                criterion,
                category,
                format!("Judge response unparseable: {}", snippet),
            )
        }
    }
}

/// Judge one criterion against a rendered transcript.
///
/// Errors only when the judge call itself fails.
pub async fn evaluate_criterion<C: ChatClient>(
    client: &C,
    judge: &ModelConfig,
    prompt_template: &str,
    criterion: &Criterion,
    transcript: &str,
    category: Category,
) -> Result<CriterionEval> {
    debug!(
        "  Judging {} [{}] with {} ...",
        criterion.id,
        category.label(),
        judge.model
    );
    let prompt = build_judge_prompt(prompt_template, criterion, transcript);
    let request = ChatRequest::for_model(judge, vec![Message::user(prompt)]);

    let response = client.chat(&request).await?;
    let eval = parse_judge_response(response.content(), criterion, category);

    info!(
        "  [{}] {} {} - {}",
        eval.result.as_str().to_uppercase(),
        category.label(),
        criterion.id,
        eval.justification
    );
    Ok(eval)
}

/// Judge every rubric criterion against `trace` and collect the report.
///
/// At most `max_workers` judge calls are in flight. A failed call degrades
/// to the category fallback instead of aborting the batch.
pub async fn evaluate_trace<C: ChatClient>(
    client: &C,
    judge: &ModelConfig,
    rubric: &Rubric,
    trace: &ConversationTrace,
    max_workers: usize,
) -> EvaluationReport {
    let transcript = trace.as_transcript();
    let sections = [
        (Category::Structural, &rubric.criteria.structural),
        (Category::Pedagogical, &rubric.criteria.pedagogical),
        (Category::AntiPattern, &rubric.anti_patterns),
    ];

    info!(
        "Evaluating {}::{} with judge {} ({} criteria)",
        trace.skill_name,
        trace.scenario_id,
        judge.model,
        rubric.criteria_count()
    );

    let jobs: Vec<(usize, usize, Category, &Criterion)> = sections
        .iter()
        .enumerate()
        .flat_map(|(slot, (category, criteria))| {
            criteria
                .iter()
                .enumerate()
                .map(move |(pos, criterion)| (slot, pos, *category, criterion))
        })
        .collect();

    let transcript = transcript.as_str();
    let finished: Vec<(usize, usize, CriterionEval)> = stream::iter(jobs)
        .map(|(slot, pos, category, criterion)| async move {
            let eval = match evaluate_criterion(
                client,
                judge,
                category.prompt_template(),
                criterion,
                transcript,
                category,
            )
            .await
            {
                Ok(eval) => eval,
                Err(e) => {
                    warn!("  Judge call failed for {}: {}", criterion.id, e);
                    fallback_eval(criterion, category, format!("Judge call failed: {}", e))
                }
            };
            (slot, pos, eval)
        })
        .buffer_unordered(max_workers.max(1))
        .collect()
        .await;

    // Completion order is arbitrary; put each verdict back in its rubric slot.
    let mut slots: [Vec<Option<CriterionEval>>; 3] = [
        vec![None; rubric.criteria.structural.len()],
        vec![None; rubric.criteria.pedagogical.len()],
        vec![None; rubric.anti_patterns.len()],
    ];
    for (slot, pos, eval) in finished {
        slots[slot][pos] = Some(eval);
    }
    let [structural, pedagogical, anti_patterns] = slots;

    let mut report = EvaluationReport::new(
        &trace.skill_name,
        &trace.scenario_id,
        &trace.model_id,
        &judge.id,
    )
    .with_weights_from(rubric);
    report.structural = structural.into_iter().flatten().collect();
    report.pedagogical = pedagogical.into_iter().flatten().collect();
    report.anti_patterns = anti_patterns.into_iter().flatten().collect();

    info!("  Score: {:.0}/100", report.score());
    report
}
