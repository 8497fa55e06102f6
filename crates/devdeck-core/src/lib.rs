//! Process supervision and dashboard state for devdeck.
//!
//! The binary crate owns the terminal; everything here is terminal-agnostic apart from key and
//! mouse events and pane rectangles, which the session consumes as plain values.

pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod process;
pub mod search;
pub mod session;
pub mod stats;
pub mod supervisor;
pub mod task;

pub use config::{load_tasks, DeckConfig, ThemeConfig};
pub use error::{ConfigError, ProbeError, ProcessError};
pub use event::{Event, EventSender, HandleId, LogLine, Origin, Subscription};
pub use health::HealthState;
pub use process::{ProcessHandle, ProcessState};
pub use session::{Effect, InputMode, Notice, NoticeLevel, Pane, Session};
pub use stats::{spawn_sampler, ResourceUsage, StatsRequest, StatsRound, SystemUsage};
pub use supervisor::{Reconciliation, Supervisor};
pub use task::{HealthProbe, ProbeKind, TaskRecord};
