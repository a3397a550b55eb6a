//! On-disk trace corpus
//!
//! Layout: `<root>/<persona>/<skill>/<version>/<scenario>_<seq>.json`, one
//! self-contained record per (trace, judge) pair. Records are written once and
//! never touched again. `index.json` at the root is a projection of every
//! record and can be thrown away and rebuilt at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use super::report::EvaluationReport;
use super::rubric::Scenario;
use super::{ConversationTrace, CriterionEval, Message, ModelConfig};
use crate::config::INDEX_FILE;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMeta {
    pub timestamp: DateTime<Utc>,
    pub persona: String,
    pub skill: String,
    pub version: String,
    pub scenario_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    pub model_under_test: ModelConfig,
    pub judge_model: ModelConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvaluation {
    /// Rounded to one decimal
    pub score: f64,
    pub structural: Vec<CriterionEval>,
    pub pedagogical: Vec<CriterionEval>,
    pub anti_patterns: Vec<CriterionEval>,
}

/// One persisted trace file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub meta: TraceMeta,
    pub config: TraceConfig,
    pub scenario: Scenario,
    pub conversation: Vec<Message>,
    pub evaluation: TraceEvaluation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Relative to the trace root, `/`-separated
    pub path: String,
    pub persona: String,
    pub skill: String,
    pub version: String,
    pub scenario_id: String,
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub model: String,
    pub judge: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceIndex {
    pub traces: Vec<IndexEntry>,
}

/// Everything about a run that isn't in the trace or the report.
#[derive(Debug, Clone, Copy)]
pub struct SaveContext<'a> {
    pub persona: &'a str,
    pub version: &'a str,
    pub scenario: &'a Scenario,
    pub model_config: &'a ModelConfig,
    pub judge_config: &'a ModelConfig,
}

// Only the fields the index and the existence check read, so a record with
// an unfamiliar criterion payload still indexes.
#[derive(Deserialize)]
struct RecordHead {
    meta: TraceMeta,
    config: HeadConfig,
    evaluation: HeadEvaluation,
}

#[derive(Deserialize)]
struct HeadConfig {
    model_under_test: ModelName,
    judge_model: ModelName,
}

#[derive(Deserialize)]
struct ModelName {
    model: String,
}

#[derive(Deserialize)]
struct HeadEvaluation {
    score: f64,
}

#[derive(Deserialize)]
struct ModelOnly {
    config: ModelOnlyConfig,
}

#[derive(Deserialize)]
struct ModelOnlyConfig {
    model_under_test: ModelName,
}

pub struct TraceStore {
    root: PathBuf,
}

impl TraceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Persist one evaluated trace under the next free sequence number.
    pub fn save(
        &self,
        trace: &ConversationTrace,
        report: &EvaluationReport,
        ctx: &SaveContext<'_>,
    ) -> Result<PathBuf> {
        let out_dir = self
            .root
            .join(ctx.persona)
            .join(&trace.skill_name)
            .join(ctx.version);
        std::fs::create_dir_all(&out_dir)?;

        let record = TraceRecord {
            meta: TraceMeta {
                timestamp: Utc::now(),
                persona: ctx.persona.to_string(),
                skill: trace.skill_name.clone(),
                version: ctx.version.to_string(),
                scenario_id: trace.scenario_id.clone(),
            },
            config: TraceConfig {
                model_under_test: ctx.model_config.clone(),
                judge_model: ctx.judge_config.clone(),
            },
            scenario: ctx.scenario.clone(),
            conversation: trace.messages.clone(),
            evaluation: TraceEvaluation {
                score: round_one_decimal(report.score()),
                structural: report.structural.clone(),
                pedagogical: report.pedagogical.clone(),
                anti_patterns: report.anti_patterns.clone(),
            },
        };
        let body = serde_json::to_string_pretty(&record)?;

        // create_new so concurrent writers in one session never share a file
        let mut seq = next_sequence(&out_dir, &trace.scenario_id)?;
        loop {
            let path = out_dir.join(format!("{}_{:04}.json", trace.scenario_id, seq));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(body.as_bytes())?;
                    info!("Trace saved: {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("{} taken, trying next sequence", path.display());
                    seq += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Whether a trace for this combination is already on disk.
    ///
    /// Reads the trace files themselves; the index may be stale or missing
    /// after an interrupted run.
    pub fn exists(&self, skill: &str, version: &str, scenario_id: &str, model: &str) -> Result<bool> {
        let pattern = format!(
            "{}/*/{}/{}/{}_*.json",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            glob::Pattern::escape(skill),
            glob::Pattern::escape(version),
            glob::Pattern::escape(scenario_id)
        );

        for path in glob::glob(&pattern)?.filter_map(|e| e.ok()) {
            if sequence_of(&path, scenario_id).is_none() {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<ModelOnly>(&text) {
                Ok(record) if record.config.model_under_test.model == model => return Ok(true),
                Ok(_) => {}
                Err(e) => debug!("Ignoring unreadable trace {}: {}", path.display(), e),
            }
        }
        Ok(false)
    }

    /// Regenerate `index.json` from every trace file under the root.
    ///
    /// Malformed files are skipped with a warning. Returns the number of
    /// indexed traces.
    pub fn rebuild_index(&self) -> Result<usize> {
        let pattern = format!(
            "{}/**/*.json",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );
        let mut paths: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(|e| e.ok()).collect();
        paths.sort();

        let mut entries = Vec::new();
        for path in paths {
            if path.file_name().is_some_and(|name| name == INDEX_FILE) {
                continue;
            }
            match self.index_entry(&path) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping malformed trace {}: {}", path.display(), e),
            }
        }
        entries.sort_by_key(|e| e.timestamp);

        let index = TraceIndex { traces: entries };
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.index_path(), serde_json::to_string_pretty(&index)?)?;

        info!("Rebuilt trace index: {} traces", index.traces.len());
        Ok(index.traces.len())
    }

    /// Current index contents; empty when no index has been built yet.
    pub fn load_index(&self) -> Result<TraceIndex> {
        let path = self.index_path();
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(TraceIndex::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn index_entry(&self, path: &Path) -> Result<IndexEntry> {
        let text = std::fs::read_to_string(path)?;
        let head: RecordHead = serde_json::from_str(&text)?;
        Ok(IndexEntry {
            path: relative_slash_path(&self.root, path),
            persona: head.meta.persona,
            skill: head.meta.skill,
            version: head.meta.version,
            scenario_id: head.meta.scenario_id,
            timestamp: head.meta.timestamp,
            score: head.evaluation.score,
            model: head.config.model_under_test.model,
            judge: head.config.judge_model.model,
        })
    }
}

/// Sequence number of `<prefix>_<seq>.json`; `None` for files that belong to
/// another scenario whose id merely starts with `prefix`.
fn sequence_of(path: &Path, prefix: &str) -> Option<Option<u32>> {
    let stem = path.file_stem()?.to_str()?;
    let suffix = stem.strip_prefix(prefix)?.strip_prefix('_')?;
    if suffix.contains('_') {
        return None;
    }
    Some(suffix.parse().ok())
}

/// Highest existing sequence + 1, or count + 1 when no suffix parses.
fn next_sequence(dir: &Path, prefix: &str) -> Result<u32> {
    let pattern = format!(
        "{}/{}_*.json",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(prefix)
    );

    let sequences: Vec<Option<u32>> = glob::glob(&pattern)?
        .filter_map(|e| e.ok())
        .filter_map(|p| sequence_of(&p, prefix))
        .collect();

    if sequences.is_empty() {
        return Ok(1);
    }
    let next = match sequences.iter().flatten().max() {
        Some(max) => max + 1,
        None => sequences.len() as u32 + 1,
    };
    Ok(next)
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn round_one_decimal(score: f64) -> f64 {
    (score * 10.0).round() / 10.0
}
