//! A full evaluation session
//!
//! Expands discovered skills into (scenario, model) cases, skilled and null
//! baseline, runs each one through the runner, every judge and the trace
//! store, and turns the reports into pass/fail verdicts. The index is rebuilt
//! once all cases are done.

use futures::stream::{self, StreamExt};
use std::fmt;
use tracing::{info, warn};

use super::judge::evaluate_trace;
use super::report::EvaluationReport;
use super::rubric::{Discovery, Scenario, SkillCase};
use super::runner::{build_system_prompt, run_scenario};
use super::traces::{SaveContext, TraceStore};
use super::ModelConfig;
use crate::config::{
    HarnessConfig, EXIT_INCONCLUSIVE, MAX_EVAL_WORKERS, MINIMUM_SCORE, NULL_SYSTEM_PROMPT,
    NULL_VERSION, SKILL_FILE,
};
use crate::error::{HarnessError, Result};
use crate::llm::ChatClient;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Run even when a trace for the case is already on disk
    pub rerun: bool,
    pub model_index: Option<usize>,
    /// Substring matched against skill name and scenario id
    pub filter: Option<String>,
    pub include_baseline: bool,
    pub minimum_score: f64,
    /// Cases in flight at once
    pub jobs: usize,
    /// Judge calls in flight per trace
    pub eval_workers: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            rerun: false,
            model_index: None,
            filter: None,
            include_baseline: true,
            minimum_score: MINIMUM_SCORE,
            jobs: 1,
            eval_workers: MAX_EVAL_WORKERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Passed,
    Failed(String),
    Skipped(String),
    Errored(String),
    /// Setup problem that keeps the case from saying pass or fail
    Inconclusive(String),
}

impl Verdict {
    pub fn is_failure(&self) -> bool {
        matches!(self, Verdict::Failed(_) | Verdict::Errored(_))
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => write!(f, "PASSED"),
            Verdict::Failed(msg) => write!(f, "FAILED: {}", msg),
            Verdict::Skipped(reason) => write!(f, "SKIPPED: {}", reason),
            Verdict::Errored(msg) => write!(f, "ERROR: {}", msg),
            Verdict::Inconclusive(reason) => write!(f, "INCONCLUSIVE: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaseOutcome {
    /// `skill::scenario [model]`, with `(null)` for baselines
    pub label: String,
    /// Judge id, when the case got as far as judging
    pub judge: Option<String>,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub outcomes: Vec<CaseOutcome>,
    /// Traces in the rebuilt index
    pub indexed: usize,
}

impl SessionSummary {
    fn count(&self, pred: impl Fn(&Verdict) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.verdict)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Skipped(_)))
    }

    pub fn errored(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Errored(_)))
    }

    pub fn inconclusive(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Inconclusive(_)))
    }

    /// 1 if anything failed or errored, 2 if nothing ran or a case was
    /// inconclusive, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.outcomes.iter().any(|o| o.verdict.is_failure()) {
            1
        } else if self.outcomes.is_empty() || self.inconclusive() > 0 {
            EXIT_INCONCLUSIVE
        } else {
            0
        }
    }
}

/// Pass/fail for one judge's report.
///
/// Any anti-pattern violation fails regardless of score.
pub fn judge_verdict(report: &EvaluationReport, minimum_score: f64) -> Verdict {
    if report.has_anti_pattern_violations() {
        let lines: Vec<String> = report
            .violations()
            .map(|c| format!("  {}: {}", c.criterion_id, c.justification))
            .collect();
        return Verdict::Failed(format!(
            "Anti-pattern violations detected:\n{}",
            lines.join("\n")
        ));
    }

    let score = report.score();
    if score < minimum_score {
        return Verdict::Failed(format!(
            "Score {:.0} below minimum {}\n{}",
            score,
            minimum_score,
            report.summary()
        ));
    }
    Verdict::Passed
}

struct Case<'a> {
    skill: &'a SkillCase,
    scenario: &'a Scenario,
    model: &'a ModelConfig,
    baseline: bool,
}

impl Case<'_> {
    fn version(&self) -> &str {
        if self.baseline {
            NULL_VERSION
        } else {
            &self.skill.version
        }
    }

    fn system_prompt(&self) -> String {
        if self.baseline {
            NULL_SYSTEM_PROMPT.to_string()
        } else {
            build_system_prompt(&self.skill.skill_text)
        }
    }

    fn minimum_score(&self, options: &RunOptions) -> f64 {
        if self.baseline {
            0.0
        } else {
            options.minimum_score
        }
    }

    fn label(&self) -> String {
        let suffix = if self.baseline { " (null)" } else { "" };
        format!(
            "{}::{} [{}]{}",
            self.skill.skill_name(),
            self.scenario.id,
            self.model.id,
            suffix
        )
    }
}

fn matches_filter(filter: Option<&str>, skill: &SkillCase, scenario: &Scenario) -> bool {
    match filter {
        Some(f) => skill.skill_name().contains(f) || scenario.id.contains(f),
        None => true,
    }
}

pub struct Session<'a, C> {
    client: &'a C,
    store: &'a TraceStore,
    config: &'a HarnessConfig,
    options: &'a RunOptions,
}

impl<'a, C: ChatClient> Session<'a, C> {
    pub fn new(
        client: &'a C,
        store: &'a TraceStore,
        config: &'a HarnessConfig,
        options: &'a RunOptions,
    ) -> Self {
        Self {
            client,
            store,
            config,
            options,
        }
    }

    /// Run every discovered case, then rebuild the index.
    ///
    /// Rubrics without a skill document are reported as inconclusive.
    pub async fn run(&self, discovery: &Discovery) -> Result<SessionSummary> {
        if self.config.judge_models.is_empty() {
            return Err(HarnessError::Config("no judge_models configured".to_string()));
        }
        if self.config.models_under_test.is_empty() {
            return Err(HarnessError::Config(
                "no models_under_test configured".to_string(),
            ));
        }

        let models = self.config.select_models(self.options.model_index);
        let filter = self.options.filter.as_deref();
        let mut summary = SessionSummary::default();
        let mut cases = Vec::new();

        for rubric_path in &discovery.unpaired {
            let verdict = Verdict::Inconclusive(format!("no {} next to the rubric", SKILL_FILE));
            warn!("{} {}", rubric_path.display(), verdict);
            summary.outcomes.push(CaseOutcome {
                label: rubric_path.display().to_string(),
                judge: None,
                verdict,
            });
        }

        for skill in &discovery.cases {
            for scenario in &skill.rubric.test_scenarios {
                if !matches_filter(filter, skill, scenario) {
                    continue;
                }
                if models.is_empty() {
                    if let Some(idx) = self.options.model_index {
                        summary.outcomes.push(CaseOutcome {
                            label: format!("{}::{}", skill.skill_name(), scenario.id),
                            judge: None,
                            verdict: Verdict::Skipped(format!("Model index {} out of range", idx)),
                        });
                    }
                    continue;
                }
                for model in &models {
                    cases.push(Case {
                        skill,
                        scenario,
                        model,
                        baseline: false,
                    });
                    if self.options.include_baseline {
                        cases.push(Case {
                            skill,
                            scenario,
                            model,
                            baseline: true,
                        });
                    }
                }
            }
        }

        info!(
            "Session: {} cases, {} judges, {} at a time",
            cases.len(),
            self.config.judge_models.len(),
            self.options.jobs.max(1)
        );

        let results: Vec<Vec<CaseOutcome>> = stream::iter(cases)
            .map(|case| self.run_case(case))
            .buffered(self.options.jobs.max(1))
            .collect()
            .await;
        summary.outcomes.extend(results.into_iter().flatten());

        summary.indexed = self.store.rebuild_index()?;
        Ok(summary)
    }

    async fn run_case(&self, case: Case<'_>) -> Vec<CaseOutcome> {
        let label = case.label();
        let outcome = |judge: Option<&str>, verdict: Verdict| {
            match &verdict {
                Verdict::Passed => info!("{} PASSED", label),
                Verdict::Skipped(reason) => info!("{} SKIPPED: {}", label, reason),
                other => warn!("{} {}", label, other),
            }
            CaseOutcome {
                label: label.clone(),
                judge: judge.map(str::to_string),
                verdict,
            }
        };

        let skill_name = case.skill.skill_name();
        let version = case.version();

        if !self.options.rerun {
            match self
                .store
                .exists(skill_name, version, &case.scenario.id, &case.model.model)
            {
                Ok(true) => {
                    let reason = format!(
                        "Trace exists for {}/{}/{} ({}); use --rerun to force",
                        skill_name, version, case.scenario.id, case.model.model
                    );
                    return vec![outcome(None, Verdict::Skipped(reason))];
                }
                Ok(false) => {}
                Err(e) => return vec![outcome(None, Verdict::Errored(e.to_string()))],
            }
        }

        let system_prompt = case.system_prompt();
        let trace = match run_scenario(
            self.client,
            case.model,
            &system_prompt,
            case.scenario,
            skill_name,
        )
        .await
        {
            Ok(trace) => trace,
            Err(e) => return vec![outcome(None, Verdict::Errored(e.to_string()))],
        };

        // Every turn got a reply, but a provider can still return no content
        if trace.agent_turns().all(|m| m.content.trim().is_empty()) {
            return vec![outcome(
                None,
                Verdict::Failed("Model produced no responses".to_string()),
            )];
        }

        let minimum_score = case.minimum_score(self.options);
        let mut outcomes = Vec::with_capacity(self.config.judge_models.len());
        for judge in &self.config.judge_models {
            let report = evaluate_trace(
                self.client,
                judge,
                &case.skill.rubric,
                &trace,
                self.options.eval_workers,
            )
            .await;
            info!("\n{}\n", report.summary());

            let ctx = SaveContext {
                persona: case.skill.persona(),
                version,
                scenario: case.scenario,
                model_config: case.model,
                judge_config: judge,
            };
            let verdict = match self.store.save(&trace, &report, &ctx) {
                Ok(_) => judge_verdict(&report, minimum_score),
                Err(e) => Verdict::Errored(format!("failed to save trace: {}", e)),
            };
            outcomes.push(outcome(Some(judge.id.as_str()), verdict));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{AntiPatternResult, CriterionEval, CriterionResult, StructuralResult};

    fn eval(id: &str, result: CriterionResult) -> CriterionEval {
        CriterionEval {
            criterion_id: id.to_string(),
            description: String::new(),
            result,
            justification: format!("because {}", id),
        }
    }

    #[test]
    fn test_violation_fails_even_with_high_score() {
        let mut report = EvaluationReport::new("s", "sc", "m", "j");
        report.structural = vec![eval("a", CriterionResult::Structural(StructuralResult::Pass))];
        report.anti_patterns = vec![
            eval("lecture", CriterionResult::AntiPattern(AntiPatternResult::Violation)),
            eval("sarcasm", CriterionResult::AntiPattern(AntiPatternResult::Clear)),
        ];

        match judge_verdict(&report, 0.0) {
            Verdict::Failed(msg) => {
                assert!(msg.starts_with("Anti-pattern violations detected:"));
                assert!(msg.contains("  lecture: because lecture"));
                assert!(!msg.contains("sarcasm"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_low_score_fails_with_summary() {
        let mut report = EvaluationReport::new("s", "sc", "m", "j");
        report.structural = vec![eval("a", CriterionResult::Structural(StructuralResult::Fail))];
        // 0 + 20 + 20 = 40
        match judge_verdict(&report, 50.0) {
            Verdict::Failed(msg) => {
                assert!(msg.starts_with("Score 40 below minimum 50"));
                assert!(msg.contains("Structural: 0/1 pass"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        assert_eq!(judge_verdict(&report, 0.0), Verdict::Passed);
    }

    #[test]
    fn test_exit_code() {
        let mut summary = SessionSummary::default();
        // Nothing ran
        assert_eq!(summary.exit_code(), EXIT_INCONCLUSIVE);

        summary.outcomes.push(CaseOutcome {
            label: "a".to_string(),
            judge: None,
            verdict: Verdict::Skipped("exists".to_string()),
        });
        assert_eq!(summary.exit_code(), 0);

        summary.outcomes.push(CaseOutcome {
            label: "skills/orphan/rubric.yaml".to_string(),
            judge: None,
            verdict: Verdict::Inconclusive("no SKILL.md next to the rubric".to_string()),
        });
        assert_eq!(summary.exit_code(), EXIT_INCONCLUSIVE);
        assert_eq!(summary.inconclusive(), 1);

        summary.outcomes.push(CaseOutcome {
            label: "b".to_string(),
            judge: None,
            verdict: Verdict::Errored("timeout".to_string()),
        });
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.errored(), 1);
    }
}
