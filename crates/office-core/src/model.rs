use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Typing,
    Walking,
    Talking,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::Idle
    }
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Typing => "typing",
            AgentState::Walking => "walking",
            AgentState::Talking => "talking",
        }
    }

    /// Lenient mapping used for source files: anything unknown is idle.
    pub fn normalize(input: &str) -> Self {
        input.parse().unwrap_or_default()
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "idle" => Ok(AgentState::Idle),
            "typing" => Ok(AgentState::Typing),
            "walking" => Ok(AgentState::Walking),
            "talking" => Ok(AgentState::Talking),
            other => Err(format!("Unknown agent state: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
}

impl Default for PlanStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::InProgress => "in_progress",
            PlanStatus::Completed => "completed",
        }
    }

    pub fn normalize(input: &str) -> Self {
        input.parse().unwrap_or_default()
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "pending" => Ok(PlanStatus::Pending),
            "in_progress" | "in-progress" | "inprogress" => Ok(PlanStatus::InProgress),
            "completed" | "done" => Ok(PlanStatus::Completed),
            other => Err(format!("Unknown plan status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanItem {
    pub text: String,
    #[serde(default)]
    pub status: PlanStatus,
}

/// Canonical registry entry for one agent.
///
/// `desk_position` is fixed at creation. `current_position` tracks the
/// desk unless the agent is walking, in which case it holds the walk target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub role: String,
    pub team: String,
    pub state: AgentState,
    #[serde(flatten)]
    pub current_position: Position,
    #[serde(rename = "deskPosition")]
    pub desk_position: Position,
    #[serde(default, rename = "currentFile", skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(default)]
    pub plan: Vec<PlanItem>,
    #[serde(
        default,
        rename = "lastSourceModifiedAt",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_source_modified_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl AgentRecord {
    pub fn tasks(&self) -> Vec<TaskRecord> {
        self.plan
            .iter()
            .enumerate()
            .map(|(index, item)| TaskRecord::from_plan_item(&self.id, index, item))
            .collect()
    }

    pub(crate) fn set_state(&mut self, state: AgentState) {
        self.state = state;
        if state != AgentState::Walking {
            self.current_position = self.desk_position;
        }
    }
}

/// A plan item seen as a task. Identity is positional: `<agent>-task-<index>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: String,
    pub description: String,
    #[serde(rename = "assignedTo")]
    pub assigned_agent_id: String,
    pub status: PlanStatus,
}

impl TaskRecord {
    pub fn task_id(agent_id: &str, index: usize) -> String {
        format!("{agent_id}-task-{index}")
    }

    pub fn from_plan_item(agent_id: &str, index: usize, item: &PlanItem) -> Self {
        Self {
            id: Self::task_id(agent_id, index),
            description: item.text.clone(),
            assigned_agent_id: agent_id.to_string(),
            status: item.status,
        }
    }
}
