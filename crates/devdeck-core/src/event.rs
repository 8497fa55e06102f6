use crate::health::HealthState;
use crate::stats::StatsRound;
use crate::task::TaskRecord;
use crossterm::event::{KeyEvent, MouseEvent};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Buffered lines per process before readers start waiting on the consumer.
pub const OUTPUT_QUEUE_CAPACITY: usize = 1000;
pub const EVENT_QUEUE_CAPACITY: usize = 256;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one process handle. Never reused, so a replaced handle with the same task name is
/// still distinguishable from its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub fn next() -> Self {
        HandleId(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which run of which handle produced a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub task: String,
    pub handle: HandleId,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub task: String,
    pub handle: HandleId,
    pub text: String,
}

/// Receiving end of one handle's output queue.
///
/// Consumed one line at a time: [`Subscription::next`] hands itself back with each line so the
/// event loop can re-arm it after the line has been applied.
pub struct Subscription {
    pub task: String,
    pub handle: HandleId,
    lines: mpsc::Receiver<LogLine>,
}

impl Subscription {
    pub fn new(task: impl Into<String>, handle: HandleId, lines: mpsc::Receiver<LogLine>) -> Self {
        Self {
            task: task.into(),
            handle,
            lines,
        }
    }

    /// Waits for the next line. `None` once every sender is gone and the queue is drained.
    pub async fn next(mut self) -> Option<(LogLine, Subscription)> {
        let line = self.lines.recv().await?;
        Some((line, self))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("task", &self.task)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitNotice {
    pub origin: Origin,
    pub outcome: ExitOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthNotice {
    pub origin: Origin,
    pub health: HealthState,
}

/// Everything the session reacts to. Process output arrives together with the subscription that
/// produced it; every other variant is self-contained.
#[derive(Debug)]
pub enum Event {
    LogLine(LogLine, Subscription),
    Key(KeyEvent),
    Resize { width: u16, height: u16 },
    ConfigChanged(Vec<TaskRecord>),
    ReloadFailed(String),
    StatsTick,
    StatsSampled(StatsRound),
    Mouse(MouseEvent),
    Exited(ExitNotice),
    Health(HealthNotice),
}

pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_QUEUE_CAPACITY)
}
