use crate::model::{AgentRecord, AgentState, Position, TaskRecord};
use serde::{Deserialize, Serialize};

/// Every event published by the bridge, serialized as `{type, payload}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OfficeEvent {
    Init(Snapshot),
    AgentStateChanged(AgentStateChangedPayload),
    AgentMoving(AgentMovingPayload),
    AgentMessage(AgentMessagePayload),
    TaskUpdated(TaskRecord),
    AgentRemoved(AgentRemovedPayload),
    FileConflict(FileConflictPayload),
    FileConflictResolved(FileConflictPayload),
}

impl OfficeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OfficeEvent::Init(_) => "init",
            OfficeEvent::AgentStateChanged(_) => "agent_state_changed",
            OfficeEvent::AgentMoving(_) => "agent_moving",
            OfficeEvent::AgentMessage(_) => "agent_message",
            OfficeEvent::TaskUpdated(_) => "task_updated",
            OfficeEvent::AgentRemoved(_) => "agent_removed",
            OfficeEvent::FileConflict(_) => "file_conflict",
            OfficeEvent::FileConflictResolved(_) => "file_conflict_resolved",
        }
    }

    pub fn state_changed(agent_id: &str, state: AgentState) -> Self {
        OfficeEvent::AgentStateChanged(AgentStateChangedPayload {
            agent_id: agent_id.to_string(),
            state,
        })
    }

    pub fn moving(agent_id: &str, from: Position, to: Position) -> Self {
        OfficeEvent::AgentMoving(AgentMovingPayload {
            agent_id: agent_id.to_string(),
            from_x: from.x,
            from_y: from.y,
            to_x: to.x,
            to_y: to.y,
        })
    }

    pub fn removed(agent_id: &str) -> Self {
        OfficeEvent::AgentRemoved(AgentRemovedPayload {
            agent_id: agent_id.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub agents: Vec<AgentRecord>,
    pub tasks: Vec<TaskRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentStateChangedPayload {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    pub state: AgentState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentMovingPayload {
    pub agent_id: String,
    pub from_x: i32,
    pub from_y: i32,
    pub to_x: i32,
    pub to_y: i32,
}

impl AgentMovingPayload {
    pub fn to(&self) -> Position {
        Position::new(self.to_x, self.to_y)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentMessagePayload {
    pub id: String,
    pub from: String,
    pub to: String,
    pub text: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentRemovedPayload {
    #[serde(rename = "agentId")]
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileConflictPayload {
    pub file: String,
    #[serde(rename = "agentIds")]
    pub agent_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlanStatus;

    #[test]
    fn envelope_uses_type_and_camel_case_payload() {
        let event = OfficeEvent::moving("alice", Position::new(3, 3), Position::new(5, 3));
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["type"], "agent_moving");
        assert_eq!(value["payload"]["agentId"], "alice");
        assert_eq!(value["payload"]["fromX"], 3);
        assert_eq!(value["payload"]["toX"], 5);

        let conflict = OfficeEvent::FileConflictResolved(FileConflictPayload {
            file: "src/app.ts".to_string(),
            agent_ids: vec!["a".to_string(), "b".to_string()],
        });
        let value = serde_json::to_value(&conflict).expect("serialize");
        assert_eq!(value["type"], "file_conflict_resolved");
        assert_eq!(value["payload"]["agentIds"][1], "b");
        assert_eq!(conflict.kind(), "file_conflict_resolved");
    }

    #[test]
    fn init_payload_decodes_back() {
        let raw = r#"{"type":"init","payload":{"agents":[],"tasks":[{"id":"bob-task-0","description":"Ship","assignedTo":"bob","status":"completed"}]}}"#;
        let event: OfficeEvent = serde_json::from_str(raw).expect("decode");
        let OfficeEvent::Init(snapshot) = event else {
            panic!("expected init")
        };
        assert_eq!(snapshot.tasks[0].status, PlanStatus::Completed);
        assert_eq!(snapshot.tasks[0].assigned_agent_id, "bob");
    }
}
