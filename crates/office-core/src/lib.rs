//! Core of the office bridge: turns a directory of agent state files into
//! a registry of agents and a stream of [`OfficeEvent`]s.

pub mod agent_files;
pub mod collaboration;
pub mod desk;
pub mod events;
pub mod hub;
pub mod model;
pub mod office;
pub mod parser;
pub mod registry;
pub mod stale;
pub mod timeline;

pub use agent_files::{AgentFileError, AgentFiles};
pub use collaboration::{pair_key, CollaborationDetector, CollaborationPair, CollaborationTiming, Cue};
pub use desk::{Layout, Zone};
pub use events::{OfficeEvent, Snapshot};
pub use hub::{EventHub, SubscriberId, Subscription};
pub use model::{AgentRecord, AgentState, PlanItem, PlanStatus, Position, TaskRecord};
pub use office::{Office, OfficeConfig};
pub use parser::{parse_agent, parse_agent_file, ParseError, ParsedAgent};
pub use registry::{Applied, Registry};
pub use stale::{FileClock, FsClock, StaleConfig, StaleMonitor, SweepAction};
pub use timeline::Timeline;
