use crate::event::{EventSender, HandleId, Origin, Subscription};
use crate::process::ProcessHandle;
use crate::task::TaskRecord;
use std::collections::HashMap;
use tracing::{info, warn};

/// Outcome of one reload, by task name.
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub kept: Vec<String>,
    pub added: Vec<String>,
    pub replaced: Vec<String>,
    pub removed: Vec<String>,
    /// Subscriptions of every freshly created handle, to be armed by the caller.
    pub subscriptions: Vec<Subscription>,
}

impl Reconciliation {
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("added {}", self.added.join(", ")));
        }
        if !self.replaced.is_empty() {
            parts.push(format!("restarted {}", self.replaced.join(", ")));
        }
        if !self.removed.is_empty() {
            parts.push(format!("removed {}", self.removed.join(", ")));
        }
        if parts.is_empty() {
            "config reloaded, nothing changed".to_string()
        } else {
            format!("config reloaded: {}", parts.join("; "))
        }
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.replaced.is_empty() && self.removed.is_empty()
    }
}

/// The ordered set of supervised processes.
#[derive(Debug)]
pub struct Supervisor {
    handles: Vec<ProcessHandle>,
    events: EventSender,
}

impl Supervisor {
    /// Creates one stopped handle per task, in order.
    pub fn new(tasks: Vec<TaskRecord>, events: EventSender) -> Self {
        let handles = tasks
            .into_iter()
            .map(|task| ProcessHandle::new(task, events.clone()))
            .collect();
        Self { handles, events }
    }

    /// Starts every handle. Spawn failures leave that handle in Error and do not affect others.
    pub fn start_all(&mut self) -> Vec<Subscription> {
        let mut subscriptions = Vec::with_capacity(self.handles.len());
        for handle in &mut self.handles {
            if let Err(err) = handle.start() {
                warn!(task = %handle.name(), error = %err, "initial start failed");
            }
            if let Some(sub) = handle.take_subscription() {
                subscriptions.push(sub);
            }
        }
        subscriptions
    }

    /// Brings the running set in line with `tasks`.
    ///
    /// Unchanged tasks keep their handle, buffer and generation. Changed tasks get a fresh
    /// handle and the old one is stopped. Tasks missing from `tasks` are stopped and dropped.
    pub fn reconcile(&mut self, tasks: Vec<TaskRecord>) -> Reconciliation {
        let mut existing: HashMap<String, ProcessHandle> = self
            .handles
            .drain(..)
            .map(|handle| (handle.name().to_string(), handle))
            .collect();
        let mut next = Vec::with_capacity(tasks.len());
        let mut report = Reconciliation::default();

        for task in tasks {
            let name = task.name.clone();
            match existing.remove(&name) {
                Some(mut handle) if handle.task().same_definition(&task) => {
                    handle.refresh_task(task);
                    next.push(handle);
                    report.kept.push(name);
                }
                Some(mut old) => {
                    old.stop();
                    let (handle, sub) = self.launch(task);
                    next.push(handle);
                    report.subscriptions.extend(sub);
                    report.replaced.push(name);
                }
                None => {
                    let (handle, sub) = self.launch(task);
                    next.push(handle);
                    report.subscriptions.extend(sub);
                    report.added.push(name);
                }
            }
        }

        for (name, mut handle) in existing {
            handle.stop();
            report.removed.push(name);
        }
        report.removed.sort();

        self.handles = next;
        info!(
            kept = report.kept.len(),
            added = report.added.len(),
            replaced = report.replaced.len(),
            removed = report.removed.len(),
            "reconciled task set"
        );
        report
    }

    pub fn stop_all(&mut self) {
        for handle in &mut self.handles {
            handle.stop();
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ProcessHandle> {
        self.handles.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ProcessHandle> {
        self.handles.get_mut(index)
    }

    pub fn handles(&self) -> &[ProcessHandle] {
        &self.handles
    }

    pub fn handles_mut(&mut self) -> &mut [ProcessHandle] {
        &mut self.handles
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.handles.iter().position(|handle| handle.name() == name)
    }

    /// Position of the handle with this exact identity, if it is still supervised.
    pub fn position(&self, name: &str, id: HandleId) -> Option<usize> {
        self.handles
            .iter()
            .position(|handle| handle.id() == id && handle.name() == name)
    }

    pub fn find_mut(&mut self, origin: &Origin) -> Option<&mut ProcessHandle> {
        self.handles
            .iter_mut()
            .find(|handle| handle.id() == origin.handle && handle.name() == origin.task)
    }

    fn launch(&self, task: TaskRecord) -> (ProcessHandle, Option<Subscription>) {
        let mut handle = ProcessHandle::new(task, self.events.clone());
        if let Err(err) = handle.start() {
            warn!(task = %handle.name(), error = %err, "start failed");
        }
        let sub = handle.take_subscription();
        (handle, sub)
    }
}
