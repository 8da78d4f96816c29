//! Collaboration and conflict detection over the current agent list.
//!
//! A file edited by two or more agents is a conflict; every unordered pair
//! of agents on it is a collaboration. Only transitions produce output, so
//! calling [`CollaborationDetector::detect`] repeatedly with the same input
//! is silent after the first call.

use crate::events::{AgentMessagePayload, FileConflictPayload, OfficeEvent};
use crate::model::{AgentRecord, AgentState};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollaborationTiming {
    /// Walk-over to speech bubble.
    pub message_delay: Duration,
    /// Walk-back to typing again.
    pub return_delay: Duration,
}

impl Default for CollaborationTiming {
    fn default() -> Self {
        Self {
            message_delay: Duration::from_millis(1000),
            return_delay: Duration::from_millis(1500),
        }
    }
}

/// One step of the collaboration choreography: publish `event` after `delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub delay: Duration,
    pub event: OfficeEvent,
}

impl Cue {
    pub fn now(event: OfficeEvent) -> Self {
        Self {
            delay: Duration::ZERO,
            event,
        }
    }

    pub fn after(delay: Duration, event: OfficeEvent) -> Self {
        Self { delay, event }
    }
}

/// `agent1_id` is the agent that walked over; it walks back when the pair ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaborationPair {
    pub agent1_id: String,
    pub agent2_id: String,
    pub file: String,
}

/// Order-independent key for a pair of agents.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

#[derive(Debug, Default)]
pub struct CollaborationDetector {
    timing: CollaborationTiming,
    active_collaborations: BTreeMap<String, CollaborationPair>,
    active_conflicts: BTreeMap<String, Vec<String>>,
}

impl CollaborationDetector {
    pub fn new(timing: CollaborationTiming) -> Self {
        Self {
            timing,
            ..Self::default()
        }
    }

    pub fn timing(&self) -> CollaborationTiming {
        self.timing
    }

    pub fn active_collaborations(&self) -> impl Iterator<Item = (&str, &CollaborationPair)> {
        self.active_collaborations
            .iter()
            .map(|(key, pair)| (key.as_str(), pair))
    }

    pub fn active_conflicts(&self) -> &BTreeMap<String, Vec<String>> {
        &self.active_conflicts
    }

    pub fn reset(&mut self) {
        self.active_collaborations.clear();
        self.active_conflicts.clear();
    }

    pub fn detect<'a, I>(&mut self, agents: I) -> Vec<Cue>
    where
        I: IntoIterator<Item = &'a AgentRecord>,
    {
        self.detect_joined(agents, None)
    }

    /// Same as [`CollaborationDetector::detect`], but `joined` is the agent
    /// whose update triggered the call: in every new pair it belongs to, it
    /// is the one that walks over and speaks first. Other pairs fall back to
    /// id order.
    pub fn detect_joined<'a, I>(&mut self, agents: I, joined: Option<&str>) -> Vec<Cue>
    where
        I: IntoIterator<Item = &'a AgentRecord>,
    {
        let agents: Vec<&AgentRecord> = agents.into_iter().collect();
        let by_id: HashMap<&str, &AgentRecord> =
            agents.iter().map(|agent| (agent.id.as_str(), *agent)).collect();

        let mut by_file: BTreeMap<&str, Vec<&AgentRecord>> = BTreeMap::new();
        for agent in &agents {
            if let Some(file) = agent.current_file.as_deref().filter(|f| !f.is_empty()) {
                by_file.entry(file).or_default().push(agent);
            }
        }

        let mut cues = Vec::new();
        let mut current = BTreeSet::new();

        for (file, on_file) in by_file.iter().filter(|(_, list)| list.len() >= 2) {
            let agent_ids: Vec<String> = on_file.iter().map(|a| a.id.clone()).collect();
            let changed = match self.active_conflicts.get(*file) {
                Some(existing) => !same_members(existing, &agent_ids),
                None => true,
            };
            if changed {
                let names: Vec<&str> = on_file.iter().map(|a| a.name.as_str()).collect();
                warn!(event = "file_conflict", file = %file, agents = %names.join(", "));
                self.active_conflicts
                    .insert(file.to_string(), agent_ids.clone());
                cues.push(Cue::now(OfficeEvent::FileConflict(FileConflictPayload {
                    file: file.to_string(),
                    agent_ids,
                })));
            }

            for (i, first) in on_file.iter().enumerate() {
                for second in &on_file[i + 1..] {
                    let key = pair_key(&first.id, &second.id);
                    if !self.active_collaborations.contains_key(&key) {
                        let (walker, host) = if joined == Some(second.id.as_str()) {
                            (*second, *first)
                        } else {
                            (*first, *second)
                        };
                        cues.extend(self.start(walker, host, file));
                        self.active_collaborations.insert(
                            key.clone(),
                            CollaborationPair {
                                agent1_id: walker.id.clone(),
                                agent2_id: host.id.clone(),
                                file: file.to_string(),
                            },
                        );
                    }
                    current.insert(key);
                }
            }
        }

        let ended: Vec<String> = self
            .active_collaborations
            .keys()
            .filter(|key| !current.contains(*key))
            .cloned()
            .collect();
        for key in ended {
            if let Some(pair) = self.active_collaborations.remove(&key) {
                if let (Some(first), Some(second)) = (
                    by_id.get(pair.agent1_id.as_str()),
                    by_id.get(pair.agent2_id.as_str()),
                ) {
                    cues.extend(self.end(first, second));
                }
            }
        }

        let resolved: Vec<String> = self
            .active_conflicts
            .keys()
            .filter(|file| {
                by_file
                    .get(file.as_str())
                    .map_or(true, |list| list.len() < 2)
            })
            .cloned()
            .collect();
        for file in resolved {
            if let Some(agent_ids) = self.active_conflicts.remove(&file) {
                info!(event = "file_conflict_resolved", file = %file);
                cues.push(Cue::now(OfficeEvent::FileConflictResolved(
                    FileConflictPayload { file, agent_ids },
                )));
            }
        }

        cues
    }

    fn start(&self, first: &AgentRecord, second: &AgentRecord, file: &str) -> [Cue; 2] {
        info!(
            event = "collaboration_start",
            agent = %first.name,
            visiting = %second.name,
            file = %file
        );
        let delay = self.timing.message_delay;
        let timestamp = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        [
            Cue::now(OfficeEvent::moving(
                &first.id,
                first.desk_position,
                second.desk_position,
            )),
            Cue::after(
                delay,
                OfficeEvent::AgentMessage(AgentMessagePayload {
                    id: format!("collab-{}", Uuid::new_v4()),
                    from: first.id.clone(),
                    to: second.id.clone(),
                    text: format!("Collaborating on {file}"),
                    timestamp,
                }),
            ),
        ]
    }

    fn end(&self, first: &AgentRecord, second: &AgentRecord) -> [Cue; 2] {
        info!(event = "collaboration_end", agent = %first.name, leaving = %second.name);
        [
            Cue::now(OfficeEvent::moving(
                &first.id,
                second.desk_position,
                first.desk_position,
            )),
            Cue::after(
                self.timing.return_delay,
                OfficeEvent::state_changed(&first.id, AgentState::Typing),
            ),
        ]
    }
}

fn same_members(existing: &[String], current: &[String]) -> bool {
    existing.len() == current.len() && current.iter().all(|id| existing.contains(id))
}
