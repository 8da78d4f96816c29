//! Composition root tying the registry, collaboration detector, stale
//! monitor and event hub together.
//!
//! `Office` is owned by a single task. Every operation applies its change
//! completely and then publishes the resulting events; delayed
//! choreography steps go onto the virtual [`Timeline`] instead of blocking.

use crate::collaboration::{CollaborationDetector, CollaborationTiming, Cue};
use crate::desk::Layout;
use crate::events::{OfficeEvent, Snapshot};
use crate::hub::EventHub;
use crate::model::TaskRecord;
use crate::parser::{try_parse_agent_file, ParsedAgent};
use crate::registry::Registry;
use crate::stale::{FileClock, StaleConfig, StaleMonitor, SweepAction};
use crate::timeline::Timeline;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct OfficeConfig {
    pub layout: Layout,
    pub collaboration: CollaborationTiming,
    pub stale: StaleConfig,
}

#[derive(Debug)]
pub struct Office {
    registry: Registry,
    detector: CollaborationDetector,
    stale: StaleMonitor,
    timeline: Timeline<OfficeEvent>,
    hub: EventHub,
}

impl Office {
    pub fn new(config: OfficeConfig, hub: EventHub) -> Self {
        Self {
            registry: Registry::new(config.layout),
            detector: CollaborationDetector::new(config.collaboration),
            stale: StaleMonitor::new(config.stale),
            timeline: Timeline::new(),
            hub,
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stale_monitor(&self) -> &StaleMonitor {
        &self.stale
    }

    /// Parse and apply one agent file. Rejected files are logged and leave
    /// the registry untouched.
    pub fn ingest_file(&mut self, path: &Path, is_new_file: bool) -> bool {
        match try_parse_agent_file(path) {
            Some(parsed) => {
                self.ingest(parsed, is_new_file);
                true
            }
            None => false,
        }
    }

    pub fn ingest(&mut self, parsed: ParsedAgent, is_new_file: bool) {
        let applied = self.registry.apply_update(parsed, is_new_file);
        debug!(
            event = "agent_ingested",
            agent_id = %applied.agent_id,
            created = applied.created,
            events = applied.events.len()
        );
        self.finish(
            applied.events,
            applied.membership_changed,
            Some(applied.agent_id.as_str()),
        );
    }

    /// Reconcile a path after a filesystem notification: ingest it when it
    /// exists, drop its agent when it does not.
    pub fn refresh_path(&mut self, path: &Path) {
        if path.is_file() {
            let is_new_file = !self.registry.tracks_source(path);
            self.ingest_file(path, is_new_file);
        } else {
            self.remove_source(path);
        }
    }

    pub fn remove_source(&mut self, path: &Path) {
        let events = self.registry.remove_source(path);
        let changed = !events.is_empty();
        self.finish(events, changed, None);
    }

    pub fn remove_agent(&mut self, agent_id: &str) {
        let events = self.registry.remove(agent_id);
        let changed = !events.is_empty();
        self.finish(events, changed, None);
    }

    /// Run one stale sweep as of `now`, evicting agents whose grace period
    /// ran out by deleting their source file.
    pub fn sweep<C>(&mut self, now: SystemTime, clock: &C) -> Vec<SweepAction>
    where
        C: FileClock + ?Sized,
    {
        let actions = self.stale.sweep(now, self.registry.sources(), clock);
        for action in &actions {
            match action {
                SweepAction::Evict { agent_id, path } => match std::fs::remove_file(path) {
                    Ok(()) => self.remove_source(path),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        self.remove_agent(agent_id)
                    }
                    Err(err) => warn!(
                        event = "stale_evict_failed",
                        agent_id = %agent_id,
                        path = %path.display(),
                        error = %err
                    ),
                },
                SweepAction::Vanished { agent_id, .. } => self.remove_agent(agent_id),
                SweepAction::MarkedStale { .. } | SweepAction::Reactivated { .. } => {}
            }
        }
        actions
    }

    /// Advance virtual time and publish every cue that became due.
    pub fn advance(&mut self, by: Duration) -> usize {
        let due = self.timeline.advance(by);
        self.publish_due(due)
    }

    pub fn advance_to(&mut self, at: Duration) -> usize {
        let due = self.timeline.advance_to(at);
        self.publish_due(due)
    }

    pub fn next_due(&self) -> Option<Duration> {
        self.timeline.next_due()
    }

    pub fn now(&self) -> Duration {
        self.timeline.now()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.registry.snapshot()
    }

    pub fn list_tasks(&self) -> Vec<TaskRecord> {
        self.registry.list_tasks()
    }

    pub fn tracks_source(&self, path: &Path) -> bool {
        self.registry.tracks_source(path)
    }

    /// Forget active pairs and conflicts and drop pending choreography.
    pub fn reset_collaborations(&mut self) {
        self.detector.reset();
        self.timeline.clear();
    }

    pub fn publish_snapshot(&self) {
        self.hub.publish(OfficeEvent::Init(self.registry.snapshot()));
    }

    /// Publish in an order subscribers can follow: removals, then the
    /// membership `init`, then events about agents that `init` introduced.
    fn finish(
        &mut self,
        events: Vec<OfficeEvent>,
        membership_changed: bool,
        updated: Option<&str>,
    ) {
        let (removals, changes): (Vec<_>, Vec<_>) = events
            .into_iter()
            .partition(|event| matches!(event, OfficeEvent::AgentRemoved(_)));
        for event in removals {
            if let OfficeEvent::AgentRemoved(payload) = &event {
                self.stale.forget(&payload.agent_id);
            }
            self.hub.publish(event);
        }
        if membership_changed {
            self.publish_snapshot();
        }
        for event in changes {
            self.hub.publish(event);
        }

        let cues = self.detector.detect_joined(self.registry.agents(), updated);
        self.dispatch(cues);

        if !membership_changed {
            self.hub.cache_snapshot(self.registry.snapshot());
        }
    }

    fn dispatch(&mut self, cues: Vec<Cue>) {
        for cue in cues {
            if cue.delay.is_zero() {
                self.hub.publish(cue.event);
            } else {
                self.timeline.schedule(cue.delay, cue.event);
            }
        }
    }

    fn publish_due(&mut self, due: Vec<OfficeEvent>) -> usize {
        let mut published = 0;
        for event in due {
            if let Some(agent_id) = subject(&event) {
                if !self.registry.contains(agent_id) {
                    debug!(event = "cue_dropped", agent_id = %agent_id, kind = event.kind());
                    continue;
                }
            }
            self.hub.publish(event);
            published += 1;
        }
        published
    }
}

/// Agent a delayed cue is about, if any.
fn subject(event: &OfficeEvent) -> Option<&str> {
    match event {
        OfficeEvent::AgentMessage(message) => Some(&message.from),
        OfficeEvent::AgentStateChanged(payload) => Some(&payload.agent_id),
        OfficeEvent::AgentMoving(payload) => Some(&payload.agent_id),
        _ => None,
    }
}
