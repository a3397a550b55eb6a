use std::collections::HashMap;

use super::rubric::{Rubric, Weight};
use super::{CriterionEval, CriterionResult, PedagogicalRating};

const STRUCTURAL_POINTS: f64 = 40.0;
const PEDAGOGICAL_POINTS: f64 = 40.0;
const BASE_POINTS: f64 = 20.0;
/// Component value when a rubric defines no criteria of that kind.
const EMPTY_COMPONENT_POINTS: f64 = 20.0;
const VIOLATION_PENALTY: f64 = 20.0;
const MAX_PENALTY: f64 = 100.0;
const UNRATED_VALUE: f64 = 0.4;

/// Judged outcome of one trace against one rubric, by one judge.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub skill_name: String,
    pub scenario_id: String,
    pub model_id: String,
    pub judge_model_id: String,
    pub structural: Vec<CriterionEval>,
    pub pedagogical: Vec<CriterionEval>,
    pub anti_patterns: Vec<CriterionEval>,
    /// Weight per pedagogical criterion id
    pub pedagogical_weights: HashMap<String, Weight>,
}

impl EvaluationReport {
    pub fn new(
        skill_name: impl Into<String>,
        scenario_id: impl Into<String>,
        model_id: impl Into<String>,
        judge_model_id: impl Into<String>,
    ) -> Self {
        Self {
            skill_name: skill_name.into(),
            scenario_id: scenario_id.into(),
            model_id: model_id.into(),
            judge_model_id: judge_model_id.into(),
            structural: Vec::new(),
            pedagogical: Vec::new(),
            anti_patterns: Vec::new(),
            pedagogical_weights: HashMap::new(),
        }
    }

    /// Take the pedagogical weights from `rubric`.
    pub fn with_weights_from(mut self, rubric: &Rubric) -> Self {
        self.pedagogical_weights = rubric
            .criteria
            .pedagogical
            .iter()
            .map(|c| (c.id.clone(), c.weight()))
            .collect();
        self
    }

    pub fn structural_pass_count(&self) -> usize {
        self.structural.iter().filter(|c| c.is_pass()).count()
    }

    pub fn violations(&self) -> impl Iterator<Item = &CriterionEval> {
        self.anti_patterns.iter().filter(|c| c.is_violation())
    }

    pub fn has_anti_pattern_violations(&self) -> bool {
        self.violations().next().is_some()
    }

    fn structural_component(&self) -> f64 {
        if self.structural.is_empty() {
            return EMPTY_COMPONENT_POINTS;
        }
        self.structural_pass_count() as f64 / self.structural.len() as f64 * STRUCTURAL_POINTS
    }

    fn pedagogical_component(&self) -> f64 {
        if self.pedagogical.is_empty() {
            return EMPTY_COMPONENT_POINTS;
        }

        let mut total_weight = 0u32;
        let mut weighted_sum = 0.0;
        for c in &self.pedagogical {
            let w = self
                .pedagogical_weights
                .get(&c.criterion_id)
                .copied()
                .unwrap_or_default()
                .points();
            total_weight += w;
            weighted_sum += f64::from(w) * rating_value(&c.result);
        }

        weighted_sum / f64::from(total_weight) * PEDAGOGICAL_POINTS
    }

    fn penalty(&self) -> f64 {
        let count = self.violations().count() as f64;
        (count * VIOLATION_PENALTY).min(MAX_PENALTY)
    }

    /// 0-100 score: structural (40) + pedagogical (40) + base (20) - 20 per violation.
    ///
    /// Computed on demand from the criterion lists; clamped to `[0, 100]`.
    pub fn score(&self) -> f64 {
        let raw = self.structural_component() + self.pedagogical_component() + BASE_POINTS
            - self.penalty();
        raw.clamp(0.0, 100.0)
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Skill: {} | Scenario: {}", self.skill_name, self.scenario_id),
            format!("Model: {} | Judge: {}", self.model_id, self.judge_model_id),
            format!("Score: {:.0}/100", self.score()),
            String::new(),
            format!(
                "Structural: {}/{} pass",
                self.structural_pass_count(),
                self.structural.len()
            ),
        ];
        for c in &self.structural {
            let status = if c.is_pass() { "PASS" } else { "FAIL" };
            lines.push(format!("  [{}] {}: {}", status, c.criterion_id, c.justification));
        }

        lines.push(String::new());
        lines.push("Pedagogical:".to_string());
        for c in &self.pedagogical {
            lines.push(format!(
                "  [{}] {}: {}",
                c.result.as_str().to_uppercase(),
                c.criterion_id,
                c.justification
            ));
        }

        lines.push(String::new());
        let violations: Vec<_> = self.violations().collect();
        if violations.is_empty() {
            lines.push("Anti-patterns: all clear".to_string());
        } else {
            lines.push(format!("Anti-pattern violations: {}", violations.len()));
            for c in violations {
                lines.push(format!("  [VIOLATION] {}: {}", c.criterion_id, c.justification));
            }
        }

        lines.join("\n")
    }
}

fn rating_value(result: &CriterionResult) -> f64 {
    match result {
        CriterionResult::Pedagogical(PedagogicalRating::Strong) => 1.0,
        CriterionResult::Pedagogical(PedagogicalRating::Adequate) => 0.6,
        CriterionResult::Pedagogical(PedagogicalRating::Weak) => 0.2,
        _ => UNRATED_VALUE,
    }
}
