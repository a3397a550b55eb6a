pub mod judge;
pub mod report;
pub mod rubric;
pub mod runner;
pub mod session;
pub mod traces;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};

pub use judge::{evaluate_criterion, evaluate_trace, parse_judge_response};
pub use report::EvaluationReport;
pub use rubric::{discover_rubrics, Criterion, Discovery, Rubric, Scenario, SkillCase, Weight};
pub use runner::{build_system_prompt, run_scenario};
pub use traces::{IndexEntry, TraceIndex, TraceRecord, TraceStore};

// ============================================================================
// Model configuration
// ============================================================================

/// One model under test or judge model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl ModelConfig {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

// ============================================================================
// Conversation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The user/assistant exchange of one scenario run.
///
/// System messages are request-only and never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTrace {
    pub skill_name: String,
    pub scenario_id: String,
    pub model_id: String,
    pub messages: Vec<Message>,
}

impl ConversationTrace {
    pub fn new(
        skill_name: impl Into<String>,
        scenario_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            skill_name: skill_name.into(),
            scenario_id: scenario_id.into(),
            model_id: model_id.into(),
            messages: Vec::new(),
        }
    }

    pub fn agent_turns(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::Assistant)
    }

    pub fn user_turns(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::User)
    }

    /// Render as `[USER]` / `[AGENT]` blocks for the judge.
    pub fn as_transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let label = if m.role == Role::User { "USER" } else { "AGENT" };
                format!("[{}]\n{}\n", label, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// Criterion results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructuralResult {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PedagogicalRating {
    Strong,
    Adequate,
    Weak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntiPatternResult {
    Clear,
    Violation,
}

/// Verdict for one criterion; serializes as the bare result word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriterionResult {
    Structural(StructuralResult),
    Pedagogical(PedagogicalRating),
    AntiPattern(AntiPatternResult),
}

impl CriterionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CriterionResult::Structural(StructuralResult::Pass) => "pass",
            CriterionResult::Structural(StructuralResult::Fail) => "fail",
            CriterionResult::Pedagogical(PedagogicalRating::Strong) => "strong",
            CriterionResult::Pedagogical(PedagogicalRating::Adequate) => "adequate",
            CriterionResult::Pedagogical(PedagogicalRating::Weak) => "weak",
            CriterionResult::AntiPattern(AntiPatternResult::Clear) => "clear",
            CriterionResult::AntiPattern(AntiPatternResult::Violation) => "violation",
        }
    }
}

impl fmt::Display for CriterionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rubric section a criterion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Structural,
    Pedagogical,
    AntiPattern,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::Structural => "structural",
            Category::Pedagogical => "pedagogical",
            Category::AntiPattern => "anti-pattern",
        }
    }

    /// Worst-case outcome used when the judge's verdict can't be read.
    pub fn fallback(&self) -> CriterionResult {
        match self {
            Category::Structural => CriterionResult::Structural(StructuralResult::Fail),
            Category::Pedagogical => CriterionResult::Pedagogical(PedagogicalRating::Weak),
            Category::AntiPattern => CriterionResult::AntiPattern(AntiPatternResult::Violation),
        }
    }

    /// Parse a judge's result word; anything outside this category's enum is `None`.
    pub fn parse_result(&self, raw: &str) -> Option<CriterionResult> {
        let word = raw.trim().to_lowercase();
        match (self, word.as_str()) {
            (Category::Structural, "pass") => Some(CriterionResult::Structural(StructuralResult::Pass)),
            (Category::Structural, "fail") => Some(CriterionResult::Structural(StructuralResult::Fail)),
            (Category::Pedagogical, "strong") => {
                Some(CriterionResult::Pedagogical(PedagogicalRating::Strong))
            }
            (Category::Pedagogical, "adequate") => {
                Some(CriterionResult::Pedagogical(PedagogicalRating::Adequate))
            }
            (Category::Pedagogical, "weak") => Some(CriterionResult::Pedagogical(PedagogicalRating::Weak)),
            (Category::AntiPattern, "clear") => Some(CriterionResult::AntiPattern(AntiPatternResult::Clear)),
            (Category::AntiPattern, "violation") => {
                Some(CriterionResult::AntiPattern(AntiPatternResult::Violation))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionEval {
    pub criterion_id: String,
    pub description: String,
    pub result: CriterionResult,
    pub justification: String,
}

impl CriterionEval {
    pub fn is_violation(&self) -> bool {
        self.result == CriterionResult::AntiPattern(AntiPatternResult::Violation)
    }

    pub fn is_pass(&self) -> bool {
        self.result == CriterionResult::Structural(StructuralResult::Pass)
    }
}
