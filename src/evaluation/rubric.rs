//! Rubric documents and skill discovery
//!
//! A skill lives in its own directory as `SKILL.md` next to a `rubric.yaml`
//! describing how conversations with that skill are judged and which
//! scripted scenarios drive them.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::config::{DEFAULT_SKILL_VERSION, RUBRIC_FILE, SKILL_FILE};
use crate::error::{HarnessError, Result};

static VERSION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"version:\s*(.+)").unwrap());

/// Relative importance of a pedagogical criterion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Weight {
    High,
    #[default]
    Medium,
    Low,
}

impl Weight {
    pub fn points(&self) -> u32 {
        match self {
            Weight::High => 3,
            Weight::Medium => 2,
            Weight::Low => 1,
        }
    }

    /// Unknown labels count as medium.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "high" => Weight::High,
            "low" => Weight::Low,
            _ => Weight::Medium,
        }
    }
}

impl<'de> Deserialize<'de> for Weight {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Weight::from_label(&label))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub description: String,
    /// Judge-facing instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    /// Only meaningful for pedagogical criteria
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<Weight>,
}

impl Criterion {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            check: None,
            weight: None,
        }
    }

    pub fn check_text(&self) -> &str {
        self.check.as_deref().unwrap_or(&self.description)
    }

    pub fn weight(&self) -> Weight {
        self.weight.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriteriaSet {
    #[serde(default)]
    pub structural: Vec<Criterion>,
    #[serde(default)]
    pub pedagogical: Vec<Criterion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMessage {
    pub content: String,
}

/// A scripted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    /// User context, sent as an extra system message when non-empty
    #[serde(default)]
    pub setup: String,
    pub messages: Vec<ScenarioMessage>,
    /// Free-form expectations carried through to the trace record
    #[serde(default = "default_expected")]
    pub expected: serde_json::Value,
}

fn default_expected() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

impl Scenario {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            setup: String::new(),
            messages: Vec::new(),
            expected: default_expected(),
        }
    }

    pub fn setup(mut self, setup: impl Into<String>) -> Self {
        self.setup = setup.into();
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ScenarioMessage {
            content: content.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub skill: String,
    #[serde(default = "default_persona")]
    pub persona: String,
    #[serde(default)]
    pub criteria: CriteriaSet,
    #[serde(default)]
    pub anti_patterns: Vec<Criterion>,
    #[serde(default)]
    pub test_scenarios: Vec<Scenario>,
}

fn default_persona() -> String {
    "unknown".to_string()
}

impl Rubric {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text).map_err(|e| {
            HarnessError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn criteria_count(&self) -> usize {
        self.criteria.structural.len() + self.criteria.pedagogical.len() + self.anti_patterns.len()
    }
}

/// A rubric paired with the skill document it judges.
#[derive(Debug, Clone)]
pub struct SkillCase {
    pub rubric: Rubric,
    pub rubric_path: PathBuf,
    pub skill_path: PathBuf,
    pub skill_text: String,
    pub version: String,
}

impl SkillCase {
    pub fn skill_name(&self) -> &str {
        &self.rubric.skill
    }

    pub fn persona(&self) -> &str {
        &self.rubric.persona
    }
}

/// Pull the version out of a skill document's preamble.
pub fn extract_version(skill_text: &str) -> String {
    VERSION_LINE
        .captures(skill_text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_SKILL_VERSION.to_string())
}

/// Result of scanning a skills directory.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub cases: Vec<SkillCase>,
    /// Rubrics with no `SKILL.md` next to them
    pub unpaired: Vec<PathBuf>,
}

impl Discovery {
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty() && self.unpaired.is_empty()
    }
}

/// Find every `rubric.yaml` under `skills_dir` and pair it with its `SKILL.md`.
///
/// Both lists are ordered by rubric path.
pub fn discover_rubrics(skills_dir: &Path) -> Result<Discovery> {
    let pattern = format!(
        "{}/**/{}",
        glob::Pattern::escape(&skills_dir.to_string_lossy()),
        RUBRIC_FILE
    );

    let mut rubric_paths: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(|e| e.ok()).collect();
    rubric_paths.sort();

    let mut discovery = Discovery::default();
    for rubric_path in rubric_paths {
        let Some(dir) = rubric_path.parent() else {
            continue;
        };
        let skill_path = dir.join(SKILL_FILE);
        if !skill_path.exists() {
            warn!(
                "{} has no {} alongside it",
                rubric_path.display(),
                SKILL_FILE
            );
            discovery.unpaired.push(rubric_path);
            continue;
        }

        let rubric = Rubric::load(&rubric_path)?;
        let skill_text = std::fs::read_to_string(&skill_path)?;
        let version = extract_version(&skill_text);
        info!(
            "Discovered {} v{} ({} scenarios) at {}",
            rubric.skill,
            version,
            rubric.test_scenarios.len(),
            dir.display()
        );

        discovery.cases.push(SkillCase {
            rubric,
            rubric_path,
            skill_path,
            skill_text,
            version,
        });
    }

    Ok(discovery)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUBRIC: &str = r#"
skill: socratic-tutor
persona: student
criteria:
  structural:
    - id: asks-first
      description: Agent asks a question before explaining
      check: First agent turn ends with a question
  pedagogical:
    - id: scaffolding
      description: Builds on the learner's answers
      weight: high
    - id: tone
      description: Encouraging tone
anti_patterns:
  - id: lecture
    description: Dumps the full answer unprompted
test_scenarios:
  - id: recursion-intro
    setup: A first-year CS student.
    messages:
      - content: What is recursion?
      - content: Can you just tell me?
    expected:
      - agent asks a guiding question
notes: ignored by the harness
"#;

    #[test]
    fn test_parse_rubric() {
        let rubric = Rubric::from_yaml(RUBRIC).unwrap();
        assert_eq!(rubric.skill, "socratic-tutor");
        assert_eq!(rubric.persona, "student");
        assert_eq!(rubric.criteria_count(), 4);

        let structural = &rubric.criteria.structural[0];
        assert_eq!(structural.check_text(), "First agent turn ends with a question");

        let ped = &rubric.criteria.pedagogical;
        assert_eq!(ped[0].weight(), Weight::High);
        assert_eq!(ped[1].weight(), Weight::Medium);

        let anti = &rubric.anti_patterns[0];
        assert_eq!(anti.check_text(), anti.description);

        let scenario = &rubric.test_scenarios[0];
        assert_eq!(scenario.messages.len(), 2);
        assert_eq!(scenario.setup, "A first-year CS student.");
        assert_eq!(scenario.expected[0], "agent asks a guiding question");
    }

    #[test]
    fn test_scenario_defaults() {
        let yaml = "skill: s\ntest_scenarios:\n  - id: bare\n    messages:\n      - content: hi\n";
        let rubric = Rubric::from_yaml(yaml).unwrap();
        let scenario = &rubric.test_scenarios[0];
        assert!(scenario.setup.is_empty());
        assert_eq!(scenario.expected, serde_json::json!([]));
        assert_eq!(rubric.persona, "unknown");
    }

    #[test]
    fn test_weight_labels() {
        assert_eq!(Weight::from_label("HIGH"), Weight::High);
        assert_eq!(Weight::from_label("low"), Weight::Low);
        assert_eq!(Weight::from_label("critical"), Weight::Medium);
        assert_eq!(Weight::High.points(), 3);
        assert_eq!(Weight::Medium.points(), 2);
        assert_eq!(Weight::Low.points(), 1);
    }

    #[test]
    fn test_extract_version() {
        let doc = "---\nname: socratic-tutor\ndescription: Teaches by asking\nversion: 1.2.0\n---\n# Body";
        assert_eq!(extract_version(doc), "1.2.0");
        assert_eq!(extract_version("# No preamble"), DEFAULT_SKILL_VERSION);
    }

    #[test]
    fn test_discover_pairs_rubric_with_skill() {
        let dir = tempfile::TempDir::new().unwrap();
        let paired = dir.path().join("student").join("socratic-tutor");
        let orphan = dir.path().join("student").join("orphan");
        std::fs::create_dir_all(&paired).unwrap();
        std::fs::create_dir_all(&orphan).unwrap();

        std::fs::write(paired.join(RUBRIC_FILE), RUBRIC).unwrap();
        std::fs::write(paired.join(SKILL_FILE), "name: socratic-tutor\nversion: 2.0.1\n").unwrap();
        std::fs::write(orphan.join(RUBRIC_FILE), "skill: orphan\n").unwrap();

        let discovery = discover_rubrics(dir.path()).unwrap();
        let cases = &discovery.cases;
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].skill_name(), "socratic-tutor");
        assert_eq!(cases[0].persona(), "student");
        assert_eq!(cases[0].version, "2.0.1");
        assert!(cases[0].skill_text.contains("socratic-tutor"));
        assert_eq!(cases[0].skill_path, paired.join(SKILL_FILE));
        assert_eq!(discovery.unpaired, vec![orphan.join(RUBRIC_FILE)]);
    }

    #[test]
    fn test_discover_empty_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(discover_rubrics(dir.path()).unwrap().is_empty());
    }
}
