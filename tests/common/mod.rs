#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use skill_harness::config::{ApiConfig, HarnessConfig, RUBRIC_FILE, SKILL_FILE};
use skill_harness::error::{HarnessError, Result};
use skill_harness::evaluation::ModelConfig;
use skill_harness::llm::{ChatClient, ChatRequest, ChatResponse};

pub const MODEL: &str = "vendor/small";
pub const JUDGE_MODEL: &str = "vendor/judge";

pub const RUBRIC: &str = r#"
skill: socratic-tutor
persona: student
criteria:
  structural:
    - id: asks-first
      description: Asks a guiding question before explaining
  pedagogical:
    - id: scaffolding
      description: Builds on the learner's answers
      weight: high
anti_patterns:
  - id: lecture
    description: Dumps the full answer unprompted
test_scenarios:
  - id: recursion-intro
    setup: A first-year CS student.
    messages:
      - content: What is recursion?
      - content: Can you just tell me?
"#;

pub const SKILL_DOC: &str = "---\nname: socratic-tutor\nversion: 1.2.0\n---\n# Socratic tutor\nAsk before you tell.\n";

/// Stands in for the endpoint: the model under test answers "Reply N", the
/// judge answers per criterion id (pass / strong / clear unless overridden).
pub struct ScriptedClient {
    pub model_calls: AtomicUsize,
    pub judge_calls: AtomicUsize,
    verdicts: HashMap<String, String>,
    failing_model: Option<String>,
    blank_replies: bool,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            model_calls: AtomicUsize::new(0),
            judge_calls: AtomicUsize::new(0),
            verdicts: HashMap::new(),
            failing_model: None,
            blank_replies: false,
        }
    }

    /// Model under test returns whitespace-only content.
    pub fn blank(mut self) -> Self {
        self.blank_replies = true;
        self
    }

    pub fn verdict(mut self, criterion_id: &str, result: &str) -> Self {
        self.verdicts
            .insert(criterion_id.to_string(), result.to_string());
        self
    }

    pub fn failing(mut self, model: &str) -> Self {
        self.failing_model = Some(model.to_string());
        self
    }

    pub fn model_calls(&self) -> usize {
        self.model_calls.load(Ordering::SeqCst)
    }

    pub fn judge_calls(&self) -> usize {
        self.judge_calls.load(Ordering::SeqCst)
    }
}

impl ChatClient for ScriptedClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        if self.failing_model.as_deref() == Some(request.model.as_str()) {
            return Err(HarnessError::Provider {
                status: 500,
                body: "upstream exploded".to_string(),
            });
        }

        if request.model == JUDGE_MODEL {
            self.judge_calls.fetch_add(1, Ordering::SeqCst);
            let prompt = &request.messages[0].content;
            let id = prompt
                .lines()
                .find_map(|line| line.strip_prefix("ID: "))
                .unwrap_or_default();
            let result = match self.verdicts.get(id) {
                Some(result) => result.as_str(),
                None if prompt.contains("How to detect") => "clear",
                None if prompt.contains("Rate the agent") => "strong",
                None => "pass",
            };
            return Ok(ChatResponse::with_content(format!(
                "```json\n{{\"result\": \"{}\", \"justification\": \"scripted {}\"}}\n```",
                result, id
            )));
        }

        let n = self.model_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.blank_replies {
            return Ok(ChatResponse::with_content("  \n"));
        }
        Ok(ChatResponse::with_content(format!("Reply {}", n)))
    }
}

pub fn harness_config(judges: &[&str]) -> HarnessConfig {
    HarnessConfig {
        api: ApiConfig::default(),
        models_under_test: vec![ModelConfig::new("small", MODEL)],
        judge_models: judges
            .iter()
            .map(|id| ModelConfig::new(*id, JUDGE_MODEL))
            .collect(),
    }
}

/// Write `<skills>/<persona>/<name>/{rubric.yaml,SKILL.md}`.
pub fn write_skill(skills_dir: &Path, persona: &str, name: &str, rubric: &str, skill_doc: &str) {
    let dir = skills_dir.join(persona).join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(RUBRIC_FILE), rubric).unwrap();
    std::fs::write(dir.join(SKILL_FILE), skill_doc).unwrap();
}
