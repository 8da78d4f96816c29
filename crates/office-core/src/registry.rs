use crate::desk::Layout;
use crate::events::{OfficeEvent, Snapshot};
use crate::model::{AgentRecord, AgentState, TaskRecord};
use crate::parser::{slugify, ParsedAgent};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result of applying one parsed agent file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    pub agent_id: String,
    pub created: bool,
    /// True when agents were added or removed, i.e. a fresh `init` is due.
    pub membership_changed: bool,
    pub events: Vec<OfficeEvent>,
}

/// Canonical agent id → record map.
///
/// Tasks are not stored separately; they are derived from each agent's
/// plan, so removing an agent removes its tasks with it.
#[derive(Debug, Default)]
pub struct Registry {
    layout: Layout,
    agents: BTreeMap<String, AgentRecord>,
    sources: HashMap<PathBuf, String>,
}

impl Registry {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            agents: BTreeMap::new(),
            sources: HashMap::new(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn apply_update(&mut self, parsed: ParsedAgent, is_new_file: bool) -> Applied {
        let agent_id = parsed.id.clone();
        let mut applied = Applied {
            agent_id: agent_id.clone(),
            ..Applied::default()
        };

        // A file that used to describe another agent now describes this one.
        if let Some(path) = parsed.source_path.as_ref() {
            if let Some(previous) = self.sources.get(path).filter(|id| **id != agent_id).cloned() {
                debug!(event = "source_reassigned", path = %path.display(), from = %previous, to = %agent_id);
                let removed = self.remove(&previous);
                applied.membership_changed |= !removed.is_empty();
                applied.events.extend(removed);
            }
        }

        let mut record = match self.agents.remove(&agent_id) {
            Some(existing) => {
                if is_new_file {
                    debug!(event = "agent_file_recreated", agent_id = %agent_id);
                }
                existing
            }
            None => {
                applied.created = true;
                applied.membership_changed = true;
                self.create_record(&parsed)
            }
        };

        if let Some(path) = parsed.source_path.clone() {
            if let Some(old) = record.source_path.as_ref().filter(|old| **old != path) {
                self.sources.remove(old);
            }
            self.sources.insert(path.clone(), agent_id.clone());
            record.source_path = Some(path);
        }
        if parsed.modified_at.is_some() {
            record.last_source_modified_at = parsed.modified_at;
        }

        let events = if applied.created {
            self.track_file(&mut record, None)
        } else {
            self.merge(&mut record, parsed)
        };
        applied.events.extend(events);

        if applied.created {
            info!(
                event = "agent_created",
                agent_id = %record.id,
                team = %record.team,
                desk = %record.desk_position
            );
        }
        self.agents.insert(agent_id, record);
        applied
    }

    fn create_record(&self, parsed: &ParsedAgent) -> AgentRecord {
        let desk = self.layout.assign_desk(&parsed.team, self.free_ordinal(&parsed.team));
        AgentRecord {
            id: parsed.id.clone(),
            name: parsed.name.clone(),
            role: parsed.task.clone(),
            team: parsed.team.clone(),
            state: parsed.state,
            current_position: desk,
            desk_position: desk,
            current_file: parsed.current_file.clone(),
            plan: parsed.plan.clone(),
            last_source_modified_at: None,
            source_path: None,
        }
    }

    /// Lowest slot in the team's zone that no live agent sits at.
    fn free_ordinal(&self, team: &str) -> u32 {
        let occupied: HashSet<_> = self.agents.values().map(|a| a.desk_position).collect();
        let limit = occupied.len() as u32;
        (0..=limit)
            .find(|ordinal| !occupied.contains(&self.layout.assign_desk(team, *ordinal)))
            .unwrap_or(limit)
    }

    fn merge(&mut self, record: &mut AgentRecord, parsed: ParsedAgent) -> Vec<OfficeEvent> {
        let mut events = Vec::new();
        record.name = parsed.name;
        record.role = parsed.task;

        if record.state != parsed.state {
            record.set_state(parsed.state);
            events.push(OfficeEvent::state_changed(&record.id, record.state));
        }

        if record.plan != parsed.plan {
            for (index, item) in parsed.plan.iter().enumerate() {
                let previous = record.plan.get(index).map(|p| p.status);
                if previous != Some(item.status) {
                    events.push(OfficeEvent::TaskUpdated(TaskRecord::from_plan_item(
                        &record.id, index, item,
                    )));
                }
            }
            record.plan = parsed.plan;
        }

        let previous_file = record.current_file.take();
        record.current_file = parsed.current_file;
        events.extend(self.track_file(record, previous_file.as_deref()));

        if !events.is_empty() {
            debug!(event = "agent_updated", agent_id = %record.id, changes = events.len());
        }
        events
    }

    /// Walk toward the first other agent on the same file when the file changed.
    fn track_file(&self, record: &mut AgentRecord, previous: Option<&str>) -> Vec<OfficeEvent> {
        let Some(file) = record.current_file.as_deref() else {
            return Vec::new();
        };
        if previous == Some(file) {
            return Vec::new();
        }
        let Some(target) = self
            .agents
            .values()
            .find(|other| other.id != record.id && other.current_file.as_deref() == Some(file))
        else {
            return Vec::new();
        };
        let event = OfficeEvent::moving(&record.id, record.current_position, target.desk_position);
        info!(
            event = "agent_walking",
            agent_id = %record.id,
            target = %target.id,
            file = %file
        );
        record.state = AgentState::Walking;
        record.current_position = target.desk_position;
        vec![event]
    }

    /// Delete an agent and, implicitly, all of its tasks. Unknown ids are a no-op.
    pub fn remove(&mut self, agent_id: &str) -> Vec<OfficeEvent> {
        let Some(record) = self.agents.remove(agent_id) else {
            return Vec::new();
        };
        self.sources.retain(|_, id| id != agent_id);
        info!(
            event = "agent_removed",
            agent_id = %agent_id,
            tasks = record.plan.len()
        );
        vec![OfficeEvent::removed(agent_id)]
    }

    /// Removal observed for a source file.
    pub fn remove_source(&mut self, path: &Path) -> Vec<OfficeEvent> {
        if let Some(agent_id) = self.sources.get(path).cloned() {
            return self.remove(&agent_id);
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return Vec::new();
        };
        let fallback = slugify(stem);
        let untracked = self
            .agents
            .get(&fallback)
            .is_some_and(|record| record.source_path.is_none());
        if untracked {
            self.remove(&fallback)
        } else {
            Vec::new()
        }
    }

    pub fn tracks_source(&self, path: &Path) -> bool {
        self.sources.contains_key(path)
    }

    pub fn agent_for_source(&self, path: &Path) -> Option<&str> {
        self.sources.get(path).map(String::as_str)
    }

    pub fn sources(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.agents.values().filter_map(|record| {
            record
                .source_path
                .as_deref()
                .map(|path| (record.id.as_str(), path))
        })
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentRecord> {
        self.agents.get(agent_id)
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn list_tasks(&self) -> Vec<TaskRecord> {
        self.agents.values().flat_map(AgentRecord::tasks).collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            agents: self.agents.values().cloned().collect(),
            tasks: self.list_tasks(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlanItem, PlanStatus, Position};
    use crate::parser::parse_agent;

    fn agent(json: &str) -> ParsedAgent {
        parse_agent(json.as_bytes()).expect("valid agent json")
    }

    fn plan(statuses: &[&str]) -> String {
        let items: Vec<String> = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| format!(r#"{{"text":"step {i}","status":"{s}"}}"#))
            .collect();
        format!("[{}]", items.join(","))
    }

    #[test]
    fn creation_assigns_desk_and_parks_agent_there() {
        let mut registry = Registry::default();
        let applied = registry.apply_update(
            agent(r#"{"id":"alice","name":"Alice","team":"engineering","state":"typing"}"#),
            true,
        );
        assert!(applied.created);
        assert!(applied.membership_changed);
        assert!(applied.events.is_empty());

        let record = registry.get("alice").expect("registered");
        assert_eq!(record.desk_position, Position::new(3, 3));
        assert_eq!(record.current_position, record.desk_position);
    }

    #[test]
    fn reapplying_identical_record_emits_nothing() {
        let mut registry = Registry::default();
        let json = format!(
            r#"{{"id":"bob","name":"Bob","team":"qa","state":"typing","currentFile":"a.rs","plan":{}}}"#,
            plan(&["pending", "completed"])
        );
        registry.apply_update(agent(&json), true);
        let again = registry.apply_update(agent(&json), false);
        assert!(!again.created);
        assert!(again.events.is_empty());
        let once_more = registry.apply_update(agent(&json), true);
        assert!(once_more.events.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn state_change_emits_single_event() {
        let mut registry = Registry::default();
        registry.apply_update(agent(r#"{"name":"Eve","team":"design","state":"idle"}"#), true);
        let applied =
            registry.apply_update(agent(r#"{"name":"Eve","team":"design","state":"talking"}"#), false);
        assert_eq!(applied.events, vec![OfficeEvent::state_changed("eve", AgentState::Talking)]);
    }

    #[test]
    fn only_changed_plan_items_emit_task_updates() {
        let mut registry = Registry::default();
        let before = format!(
            r#"{{"name":"Dan","team":"qa","plan":{}}}"#,
            plan(&["completed", "pending", "pending"])
        );
        let after = format!(
            r#"{{"name":"Dan","team":"qa","plan":{}}}"#,
            plan(&["completed", "in_progress", "pending"])
        );
        registry.apply_update(agent(&before), true);
        let applied = registry.apply_update(agent(&after), false);
        assert_eq!(applied.events.len(), 1);
        let OfficeEvent::TaskUpdated(task) = &applied.events[0] else {
            panic!("expected task_updated")
        };
        assert_eq!(task.id, "dan-task-1");
        assert_eq!(task.status, PlanStatus::InProgress);
        assert_eq!(task.assigned_agent_id, "dan");
    }

    #[test]
    fn appended_plan_item_counts_as_changed() {
        let mut registry = Registry::default();
        registry.apply_update(
            agent(&format!(r#"{{"name":"Dan","team":"qa","plan":{}}}"#, plan(&["pending"]))),
            true,
        );
        let applied = registry.apply_update(
            agent(&format!(
                r#"{{"name":"Dan","team":"qa","plan":{}}}"#,
                plan(&["pending", "pending"])
            )),
            false,
        );
        assert_eq!(applied.events.len(), 1);
        assert_eq!(registry.list_tasks().len(), 2);
    }

    #[test]
    fn shared_file_walks_agent_to_owner_desk_until_next_update() {
        let mut registry = Registry::default();
        registry.apply_update(
            agent(r#"{"name":"Bob","team":"engineering","state":"typing","currentFile":"x.ts"}"#),
            true,
        );
        registry.apply_update(agent(r#"{"name":"Alice","team":"engineering","state":"typing"}"#), true);
        let bob_desk = registry.get("bob").expect("bob").desk_position;
        let alice_desk = registry.get("alice").expect("alice").desk_position;

        let applied = registry.apply_update(
            agent(r#"{"name":"Alice","team":"engineering","state":"typing","currentFile":"x.ts"}"#),
            false,
        );
        assert_eq!(applied.events, vec![OfficeEvent::moving("alice", alice_desk, bob_desk)]);
        let alice = registry.get("alice").expect("alice");
        assert_eq!(alice.state, AgentState::Walking);
        assert_eq!(alice.current_position, bob_desk);

        let reset = registry.apply_update(
            agent(r#"{"name":"Alice","team":"engineering","state":"typing","currentFile":"x.ts"}"#),
            false,
        );
        assert_eq!(reset.events, vec![OfficeEvent::state_changed("alice", AgentState::Typing)]);
        let alice = registry.get("alice").expect("alice");
        assert_eq!(alice.current_position, alice.desk_position);
    }

    #[test]
    fn removal_cascades_tasks_and_is_idempotent() {
        let mut registry = Registry::default();
        registry.apply_update(
            agent(&format!(r#"{{"name":"Fay","team":"qa","plan":{}}}"#, plan(&["pending"]))),
            true,
        );
        assert_eq!(registry.list_tasks().len(), 1);
        assert_eq!(registry.remove("fay"), vec![OfficeEvent::removed("fay")]);
        assert!(registry.list_tasks().is_empty());
        assert!(registry.remove("fay").is_empty());
        assert!(registry.remove("nobody").is_empty());
    }

    #[test]
    fn freed_desk_is_reused_without_colliding() {
        let mut registry = Registry::default();
        for name in ["A", "B", "C"] {
            registry.apply_update(
                agent(&format!(r#"{{"name":"{name}","team":"engineering"}}"#)),
                true,
            );
        }
        registry.remove("a");
        registry.apply_update(agent(r#"{"name":"D","team":"engineering"}"#), true);
        let desks: HashSet<_> = registry.agents().map(|a| a.desk_position).collect();
        assert_eq!(desks.len(), 3);
        assert_eq!(registry.get("d").expect("d").desk_position, Position::new(3, 3));
    }

    #[test]
    fn desk_survives_file_recreation() {
        let mut registry = Registry::default();
        registry.apply_update(agent(r#"{"name":"A","team":"engineering"}"#), true);
        registry.apply_update(agent(r#"{"name":"B","team":"engineering"}"#), true);
        let desk = registry.get("b").expect("b").desk_position;
        registry.apply_update(agent(r#"{"name":"B","team":"engineering","state":"typing"}"#), true);
        assert_eq!(registry.get("b").expect("b").desk_position, desk);
    }

    #[test]
    fn source_index_resolves_removals_by_path() {
        let mut registry = Registry::default();
        let path = PathBuf::from("/agents/worker.json");
        let mut parsed = agent(r#"{"id":"w-1","name":"Worker","team":"qa"}"#);
        parsed.source_path = Some(path.clone());
        registry.apply_update(parsed, true);
        assert!(registry.tracks_source(&path));
        assert_eq!(registry.agent_for_source(&path), Some("w-1"));
        assert_eq!(registry.sources().count(), 1);

        assert_eq!(registry.remove_source(&path), vec![OfficeEvent::removed("w-1")]);
        assert!(!registry.tracks_source(&path));
        assert!(registry.remove_source(&path).is_empty());
    }

    #[test]
    fn file_describing_new_id_replaces_previous_agent() {
        let mut registry = Registry::default();
        let path = PathBuf::from("/agents/slot.json");
        let mut first = agent(r#"{"id":"one","name":"One","team":"qa"}"#);
        first.source_path = Some(path.clone());
        registry.apply_update(first, true);

        let mut second = agent(r#"{"id":"two","name":"Two","team":"qa"}"#);
        second.source_path = Some(path.clone());
        let applied = registry.apply_update(second, false);
        assert!(applied.created);
        assert_eq!(applied.events, vec![OfficeEvent::removed("one")]);
        assert_eq!(registry.agent_for_source(&path), Some("two"));
        assert!(!registry.contains("one"));
    }

    #[test]
    fn snapshot_lists_agents_and_derived_tasks() {
        let mut registry = Registry::default();
        registry.apply_update(
            agent(&format!(
                r#"{{"name":"Gus","team":"management","plan":{}}}"#,
                plan(&["completed", "pending"])
            )),
            true,
        );
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.agents.len(), 1);
        assert_eq!(
            snapshot.tasks,
            vec![
                TaskRecord::from_plan_item(
                    "gus",
                    0,
                    &PlanItem {
                        text: "step 0".to_string(),
                        status: PlanStatus::Completed
                    }
                ),
                TaskRecord::from_plan_item(
                    "gus",
                    1,
                    &PlanItem {
                        text: "step 1".to_string(),
                        status: PlanStatus::Pending
                    }
                ),
            ]
        );
    }
}
