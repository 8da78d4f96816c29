//! Create, patch and delete agent files on behalf of remote callers.
//!
//! These never touch the registry: the watcher picks the file change up
//! and drives it through the usual reconcile path.

use crate::parser::slugify;
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_TEAM: &str = "engineering";
pub const DEFAULT_TASK: &str = "Working...";

#[derive(Debug, Error)]
pub enum AgentFileError {
    #[error("agent name must not be empty")]
    EmptyName,
    #[error("agent `{0}` not found")]
    NotFound(String),
    #[error("patch must be a JSON object")]
    InvalidPatch,
    #[error("agent file {path} is not a JSON object")]
    Corrupt { path: PathBuf },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct AgentFiles {
    dir: PathBuf,
}

impl AgentFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        static UNSAFE: OnceLock<Regex> = OnceLock::new();
        let re = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]").expect("valid regex"));
        self.dir
            .join(format!("{}.json", re.replace_all(name.trim(), "-")))
    }

    pub fn create(
        &self,
        name: &str,
        team: Option<&str>,
        task: Option<&str>,
    ) -> Result<Value, AgentFileError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AgentFileError::EmptyName);
        }
        let team = team
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TEAM)
            .to_lowercase();
        let task = task.filter(|t| !t.trim().is_empty()).unwrap_or(DEFAULT_TASK);

        let doc = json!({
            "id": slugify(name),
            "name": name,
            "team": team,
            "task": task,
            "state": "typing",
            "plan": [],
            "updatedAt": timestamp(),
        });
        let path = self.path_for(name);
        write_atomic(&path, &doc)?;
        info!(event = "agent_file_created", name = %name, path = %path.display());
        Ok(doc)
    }

    /// Shallow-merge `patch` into the existing document.
    pub fn update(&self, name: &str, patch: &Value) -> Result<Value, AgentFileError> {
        let Value::Object(patch) = patch else {
            return Err(AgentFileError::InvalidPatch);
        };
        let path = self.path_for(name);
        let mut doc = match read_object(&path)? {
            Some(doc) => doc,
            None => return Err(AgentFileError::NotFound(name.to_string())),
        };
        for (key, value) in patch {
            doc.insert(key.clone(), value.clone());
        }
        doc.insert("updatedAt".to_string(), Value::String(timestamp()));

        let doc = Value::Object(doc);
        write_atomic(&path, &doc)?;
        info!(event = "agent_file_updated", name = %name, fields = patch.len());
        Ok(doc)
    }

    /// Delete the agent's file. Deleting an absent agent succeeds.
    pub fn remove(&self, name: &str) -> Result<bool, AgentFileError> {
        let path = self.path_for(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(event = "agent_file_removed", name = %name);
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(AgentFileError::Io { path, source }),
        }
    }

    pub fn get(&self, name: &str) -> Result<Option<Value>, AgentFileError> {
        Ok(read_object(&self.path_for(name))?.map(Value::Object))
    }

    /// Every readable agent document, sorted by file name.
    pub fn list(&self) -> Result<Vec<Value>, AgentFileError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AgentFileError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_agent_file(path))
            .collect();
        paths.sort();

        let mut docs = Vec::with_capacity(paths.len());
        for path in paths {
            match read_object(&path) {
                Ok(Some(doc)) => docs.push(Value::Object(doc)),
                Ok(None) => {}
                Err(err) => {
                    warn!(event = "agent_file_skipped", path = %path.display(), error = %err)
                }
            }
        }
        Ok(docs)
    }
}

/// Direct `*.json` agent file, excluding in-flight temp files.
pub fn is_agent_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

fn read_object(path: &Path) -> Result<Option<Map<String, Value>>, AgentFileError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(AgentFileError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    match serde_json::from_slice(&bytes)? {
        Value::Object(doc) => Ok(Some(doc)),
        _ => Err(AgentFileError::Corrupt {
            path: path.to_path_buf(),
        }),
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> AgentFileError {
    let path = path.to_path_buf();
    move |source| AgentFileError::Io { path, source }
}

fn write_atomic(path: &Path, doc: &Value) -> Result<(), AgentFileError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };
    let payload = serde_json::to_vec_pretty(doc)?;
    std::fs::write(&temp_path, payload).map_err(io_error(&temp_path))?;
    std::fs::rename(&temp_path, path).map_err(io_error(path))?;
    Ok(())
}
