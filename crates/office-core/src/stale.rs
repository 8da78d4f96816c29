//! Stale-agent lifecycle: mark agents whose source file stopped changing,
//! evict them after a grace period.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleConfig {
    pub sweep_interval: Duration,
    /// No modification for this long marks the agent stale.
    pub stale_after: Duration,
    /// Stale for this much longer evicts it.
    pub evict_after: Duration,
}

impl Default for StaleConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(120),
            evict_after: Duration::from_secs(300),
        }
    }
}

/// Source of file modification times.
pub trait FileClock {
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
}

/// Reads modification times from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsClock;

impl FileClock for FsClock {
    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepAction {
    MarkedStale { agent_id: String },
    Reactivated { agent_id: String },
    Evict { agent_id: String, path: PathBuf },
    /// The backing file could not be read; treat the agent as already gone.
    Vanished { agent_id: String, path: PathBuf },
}

#[derive(Debug, Default)]
pub struct StaleMonitor {
    config: StaleConfig,
    /// Agent id → the sweep time it was first seen stale.
    stale_since: BTreeMap<String, SystemTime>,
}

impl StaleMonitor {
    pub fn new(config: StaleConfig) -> Self {
        Self {
            config,
            stale_since: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> StaleConfig {
        self.config
    }

    pub fn is_stale(&self, agent_id: &str) -> bool {
        self.stale_since.contains_key(agent_id)
    }

    pub fn stale_count(&self) -> usize {
        self.stale_since.len()
    }

    /// Drop bookkeeping for an agent that left the registry.
    pub fn forget(&mut self, agent_id: &str) {
        self.stale_since.remove(agent_id);
    }

    pub fn clear(&mut self) {
        self.stale_since.clear();
    }

    /// Inspect every `(agent id, source path)` pair as of `now`.
    pub fn sweep<'a, I, C>(&mut self, now: SystemTime, sources: I, clock: &C) -> Vec<SweepAction>
    where
        I: IntoIterator<Item = (&'a str, &'a Path)>,
        C: FileClock + ?Sized,
    {
        let mut actions = Vec::new();
        let mut seen = Vec::new();

        for (agent_id, path) in sources {
            seen.push(agent_id.to_string());
            let modified = match clock.modified(path) {
                Ok(modified) => modified,
                Err(err) => {
                    debug!(
                        event = "stale_source_missing",
                        agent_id = %agent_id,
                        path = %path.display(),
                        error = %err
                    );
                    self.stale_since.remove(agent_id);
                    actions.push(SweepAction::Vanished {
                        agent_id: agent_id.to_string(),
                        path: path.to_path_buf(),
                    });
                    continue;
                }
            };

            let idle = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if idle < self.config.stale_after {
                if self.stale_since.remove(agent_id).is_some() {
                    info!(event = "agent_reactivated", agent_id = %agent_id);
                    actions.push(SweepAction::Reactivated {
                        agent_id: agent_id.to_string(),
                    });
                }
                continue;
            }

            match self.stale_since.get(agent_id) {
                None => {
                    info!(
                        event = "agent_stale",
                        agent_id = %agent_id,
                        idle_secs = idle.as_secs()
                    );
                    self.stale_since.insert(agent_id.to_string(), now);
                    actions.push(SweepAction::MarkedStale {
                        agent_id: agent_id.to_string(),
                    });
                }
                Some(since) => {
                    let grace = now.duration_since(*since).unwrap_or(Duration::ZERO);
                    if grace >= self.config.evict_after {
                        info!(event = "agent_evicted", agent_id = %agent_id, path = %path.display());
                        actions.push(SweepAction::Evict {
                            agent_id: agent_id.to_string(),
                            path: path.to_path_buf(),
                        });
                    }
                }
            }
        }

        // Agents removed by someone else since the last sweep.
        self.stale_since.retain(|id, _| seen.contains(id));
        actions
    }
}
