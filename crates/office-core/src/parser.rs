//! Source-file parsing.
//!
//! Agent files are written by independent processes, so everything here is
//! lenient: unknown states collapse to `idle`, plan statuses default to
//! `pending`, and only `name` and `team` are mandatory.

use crate::model::{AgentState, PlanItem, PlanStatus};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// A validated, normalized agent file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAgent {
    pub id: String,
    pub name: String,
    pub team: String,
    pub task: String,
    pub state: AgentState,
    pub current_file: Option<String>,
    pub plan: Vec<PlanItem>,
    pub updated_at: Option<String>,
    pub source_path: Option<PathBuf>,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RawAgentFile {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    team: Option<Value>,
    #[serde(default)]
    task: Option<Value>,
    #[serde(default)]
    state: Option<Value>,
    #[serde(default, rename = "currentFile")]
    current_file: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_plan")]
    plan: Vec<RawPlanItem>,
    #[serde(default, rename = "updatedAt", deserialize_with = "deserialize_timestamp")]
    updated_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPlanItem {
    #[serde(default)]
    text: Option<Value>,
    #[serde(default)]
    task: Option<Value>,
    #[serde(default)]
    status: Option<Value>,
}

/// Parse the raw bytes of one agent file.
pub fn parse_agent(bytes: &[u8]) -> Result<ParsedAgent, ParseError> {
    let raw: RawAgentFile = serde_json::from_slice(bytes)?;

    let name = non_empty(raw.name.as_ref()).ok_or(ParseError::MissingField("name"))?;
    let team = non_empty(raw.team.as_ref()).ok_or(ParseError::MissingField("team"))?;
    let id = non_empty(raw.id.as_ref()).unwrap_or_else(|| slugify(&name));
    if id.is_empty() {
        return Err(ParseError::MissingField("id"));
    }

    let state = raw
        .state
        .as_ref()
        .and_then(Value::as_str)
        .map(AgentState::normalize)
        .unwrap_or_default();

    let plan = raw
        .plan
        .into_iter()
        .map(|item| PlanItem {
            text: as_text(item.text.as_ref())
                .or_else(|| as_text(item.task.as_ref()))
                .unwrap_or_default(),
            status: item
                .status
                .as_ref()
                .and_then(Value::as_str)
                .map(PlanStatus::normalize)
                .unwrap_or_default(),
        })
        .collect();

    Ok(ParsedAgent {
        id,
        name,
        team,
        task: as_text(raw.task.as_ref()).unwrap_or_default(),
        state,
        current_file: non_empty(raw.current_file.as_ref()),
        plan,
        updated_at: raw.updated_at,
        source_path: None,
        modified_at: None,
    })
}

/// Read and parse an agent file, recording its path and modification time.
pub fn parse_agent_file(path: &Path) -> Result<ParsedAgent, ParseError> {
    let bytes = std::fs::read(path)?;
    let modified_at = std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    let mut parsed = parse_agent(&bytes)?;
    parsed.source_path = Some(path.to_path_buf());
    parsed.modified_at = modified_at;
    Ok(parsed)
}

/// Like [`parse_agent_file`], but logs and swallows rejections.
pub fn try_parse_agent_file(path: &Path) -> Option<ParsedAgent> {
    match parse_agent_file(path) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(event = "agent_file_rejected", path = %path.display(), error = %err);
            None
        }
    }
}

/// Lowercase the name and collapse whitespace runs into hyphens.
pub fn slugify(name: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));
    re.replace_all(name.trim(), "-").to_lowercase()
}

fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    as_text(value)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn deserialize_plan<'de, D>(deserializer: D) -> Result<Vec<RawPlanItem>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    let Value::Array(items) = val else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(_) => serde_json::from_value(item).ok(),
            Value::String(text) => Some(RawPlanItem {
                text: Some(Value::String(text)),
                ..RawPlanItem::default()
            }),
            _ => None,
        })
        .collect())
}

/// `updatedAt` is an ISO string from the wrapper CLI, but older writers
/// emit epoch milliseconds.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    Ok(match val {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
