use crate::error::ProcessError;
use crate::event::{
    Event, EventSender, ExitNotice, ExitOutcome, HandleId, HealthNotice, LogLine, Origin,
    Subscription, OUTPUT_QUEUE_CAPACITY,
};
use crate::health::{probe_loop, HealthState, Prober};
use crate::stats::{ResourceSample, ResourceUsage, StatsRequest};
use crate::task::TaskRecord;
use std::fmt;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

pub const RESTART_MARKER: &str = "--- RESTARTED ---";
const INPUT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    Stopped,
    Running,
    Error,
}

impl ProcessState {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Running => "running",
            ProcessState::Error => "error",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-run plumbing. Dropping it without sending on `kill` also ends the child.
struct RunHandles {
    pid: Option<u32>,
    input: mpsc::Sender<String>,
    kill: Option<oneshot::Sender<()>>,
}

impl RunHandles {
    fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// One supervised process: its task, its current run and everything it has printed.
///
/// All mutation happens on the session's thread. Background work (pipe readers, the exit waiter
/// and the probe loop) reports back through events tagged with an [`Origin`], and the handle only
/// accepts reports whose origin matches its current id and generation.
pub struct ProcessHandle {
    id: HandleId,
    task: TaskRecord,
    state: ProcessState,
    health: HealthState,
    log: Vec<String>,
    usage: Option<ResourceUsage>,
    last_error: Option<String>,
    generation: u64,
    stop_requested: bool,
    run: Option<RunHandles>,
    lines: mpsc::Sender<LogLine>,
    subscription: Option<Subscription>,
    events: EventSender,
}

impl ProcessHandle {
    pub fn new(task: TaskRecord, events: EventSender) -> Self {
        let id = HandleId::next();
        let (lines, rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
        let subscription = Subscription::new(task.name.clone(), id, rx);
        Self {
            id,
            task,
            state: ProcessState::Stopped,
            health: HealthState::Unchecked,
            log: Vec::new(),
            usage: None,
            last_error: None,
            generation: 0,
            stop_requested: false,
            run: None,
            lines,
            subscription: Some(subscription),
            events,
        }
    }

    /// Launches a new run. Any run still attached is killed first.
    ///
    /// The generation advances on every attempt, so notifications from earlier runs are ignored
    /// even when this attempt fails to spawn.
    pub fn start(&mut self) -> Result<(), ProcessError> {
        if let Some(mut previous) = self.run.take() {
            previous.kill();
        }
        self.generation += 1;
        self.stop_requested = false;
        self.health = HealthState::Unchecked;
        self.usage = None;

        let argv = match self.task.argv() {
            Ok(argv) => argv,
            Err(err) => return Err(self.fail(err)),
        };
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.task.directory {
            command.current_dir(dir);
        }
        for (key, value) in self.task.env_pairs() {
            command.env(key, value);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = ProcessError::Spawn {
                    program: argv[0].clone(),
                    source,
                };
                return Err(self.fail(err));
            }
        };

        let pid = child.id();
        let origin = self.origin();
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(write_input(stdin, input_rx));
        }
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_lines(stdout, self.task.name.clone(), self.id, self.lines.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_lines(stderr, self.task.name.clone(), self.id, self.lines.clone()));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (alive_tx, alive_rx) = watch::channel(true);
        tokio::spawn(wait_for_exit(
            child,
            kill_rx,
            alive_tx,
            origin.clone(),
            self.events.clone(),
        ));

        if let Some(probe) = self.task.health_check.clone() {
            self.health = HealthState::Starting;
            tokio::spawn(probe_loop(
                Prober::new(probe),
                alive_rx,
                origin,
                self.events.clone(),
            ));
        }

        self.state = ProcessState::Running;
        self.last_error = None;
        self.run = Some(RunHandles {
            pid,
            input: input_tx,
            kill: Some(kill_tx),
        });
        info!(task = %self.task.name, pid = ?pid, generation = self.generation, "process started");
        Ok(())
    }

    /// Requests termination of the current run without waiting for it.
    pub fn stop(&mut self) {
        if self.state != ProcessState::Running {
            return;
        }
        self.stop_requested = true;
        if let Some(mut run) = self.run.take() {
            run.kill();
        }
        debug!(task = %self.task.name, generation = self.generation, "stop requested");
    }

    pub fn restart(&mut self) -> Result<(), ProcessError> {
        self.stop();
        self.start()
    }

    /// Queues `text` plus a newline for the process's stdin.
    pub fn send_input(&self, text: &str) -> Result<(), ProcessError> {
        if self.state != ProcessState::Running {
            return Ok(());
        }
        let Some(run) = &self.run else {
            return Ok(());
        };
        run.input.try_send(text.to_string()).map_err(|err| match err {
            TrySendError::Full(_) => ProcessError::InputBacklog,
            TrySendError::Closed(_) => ProcessError::InputClosed,
        })
    }

    /// Records the end of a run. Returns whether the notice belonged to the current run.
    pub fn apply_exit(&mut self, notice: &ExitNotice) -> bool {
        if !self.owns(&notice.origin) {
            debug!(task = %self.task.name, "ignoring exit from a previous run");
            return false;
        }
        self.run = None;
        self.health = HealthState::Unchecked;
        self.usage = None;
        match &notice.outcome {
            ExitOutcome::Exited => {
                self.state = ProcessState::Stopped;
            }
            ExitOutcome::Failed(_) if self.stop_requested => {
                self.state = ProcessState::Stopped;
            }
            ExitOutcome::Failed(reason) => {
                warn!(task = %self.task.name, reason = %reason, "process failed");
                self.state = ProcessState::Error;
                self.last_error = Some(reason.clone());
            }
        }
        self.stop_requested = false;
        true
    }

    pub fn apply_health(&mut self, notice: &HealthNotice) -> bool {
        if !self.owns(&notice.origin) {
            return false;
        }
        if self.state != ProcessState::Running && notice.health != HealthState::Unchecked {
            return false;
        }
        self.health = notice.health;
        true
    }

    /// What the sampler needs to read this run, if it is running.
    pub fn stats_request(&self) -> Option<StatsRequest> {
        if self.state != ProcessState::Running {
            return None;
        }
        let pid = self.pid()?;
        Some(StatsRequest {
            origin: self.origin(),
            pid,
        })
    }

    /// Stores a sample for the current run. A failed read keeps the previous value.
    pub fn sample_stats(&mut self, sample: &ResourceSample) -> bool {
        if !self.owns(&sample.origin) || self.state != ProcessState::Running {
            return false;
        }
        if let Some(usage) = sample.usage {
            self.usage = Some(usage);
        }
        true
    }

    pub fn clear_stats(&mut self) {
        self.usage = None;
    }

    pub fn append_line(&mut self, text: impl Into<String>) {
        self.log.push(text.into());
    }

    pub fn take_subscription(&mut self) -> Option<Subscription> {
        self.subscription.take()
    }

    /// Replaces metadata (probe, dependencies) of an unchanged task for its next start.
    pub fn refresh_task(&mut self, task: TaskRecord) {
        debug_assert!(self.task.same_definition(&task));
        self.task = task;
    }

    pub fn owns(&self, origin: &Origin) -> bool {
        origin.handle == self.id
            && origin.generation == self.generation
            && origin.task == self.task.name
    }

    pub fn origin(&self) -> Origin {
        Origin {
            task: self.task.name.clone(),
            handle: self.id,
            generation: self.generation,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.task.name
    }

    pub fn task(&self) -> &TaskRecord {
        &self.task
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn health(&self) -> HealthState {
        self.health
    }

    pub fn has_probe(&self) -> bool {
        self.task.health_check.is_some()
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// CPU and memory of the current run; zero whenever the process is not running.
    pub fn usage(&self) -> ResourceUsage {
        match (self.state, self.usage) {
            (ProcessState::Running, Some(usage)) => usage,
            _ => ResourceUsage::default(),
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.run.as_ref().and_then(|run| run.pid)
    }

    fn fail(&mut self, err: ProcessError) -> ProcessError {
        warn!(task = %self.task.name, error = %err, "process failed to start");
        self.state = ProcessState::Error;
        self.last_error = Some(err.to_string());
        self.run = None;
        err
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(mut run) = self.run.take() {
            run.kill();
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("task", &self.task.name)
            .field("state", &self.state)
            .field("health", &self.health)
            .field("generation", &self.generation)
            .field("lines", &self.log.len())
            .finish_non_exhaustive()
    }
}

async fn read_lines<R>(reader: R, task: String, handle: HandleId, lines: mpsc::Sender<LogLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let text = String::from_utf8_lossy(&strip_ansi_escapes::strip(&buf)).into_owned();
                let line = LogLine {
                    task: task.clone(),
                    handle,
                    text,
                };
                if lines.send(line).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(task = %task, error = %err, "output stream closed");
                break;
            }
        }
    }
}

async fn write_input(mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>) {
    while let Some(text) = rx.recv().await {
        if stdin.write_all(text.as_bytes()).await.is_err()
            || stdin.write_all(b"\n").await.is_err()
            || stdin.flush().await.is_err()
        {
            break;
        }
    }
}

async fn wait_for_exit(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    alive: watch::Sender<bool>,
    origin: Origin,
    events: EventSender,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(err) = child.start_kill() {
                debug!(task = %origin.task, error = %err, "kill failed");
            }
            child.wait().await
        }
    };
    let _ = alive.send(false);

    let outcome = match status {
        Ok(status) if status.success() => ExitOutcome::Exited,
        Ok(status) => ExitOutcome::Failed(status.to_string()),
        Err(err) => ExitOutcome::Failed(err.to_string()),
    };
    info!(task = %origin.task, generation = origin.generation, outcome = ?outcome, "process exited");
    let _ = events.send(Event::Exited(ExitNotice { origin, outcome })).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_channel;

    fn notice(handle: &ProcessHandle, generation: u64, outcome: ExitOutcome) -> ExitNotice {
        ExitNotice {
            origin: Origin {
                task: handle.name().to_string(),
                handle: handle.id(),
                generation,
            },
            outcome,
        }
    }

    #[test]
    fn new_handle_is_stopped_and_idle() {
        let (events, _rx) = event_channel();
        let handle = ProcessHandle::new(TaskRecord::new("api", "true"), events);
        assert_eq!(handle.state(), ProcessState::Stopped);
        assert_eq!(handle.health(), HealthState::Unchecked);
        assert_eq!(handle.generation(), 0);
        assert!(handle.log().is_empty());
        assert_eq!(handle.usage(), ResourceUsage::default());
    }

    #[test]
    fn send_input_to_stopped_process_is_a_no_op() {
        let (events, _rx) = event_channel();
        let handle = ProcessHandle::new(TaskRecord::new("api", "cat"), events);
        assert!(handle.send_input("hello").is_ok());
    }

    #[test]
    fn empty_command_fails_into_error_state() {
        let (events, _rx) = event_channel();
        let mut handle = ProcessHandle::new(TaskRecord::new("blank", "  "), events);
        let err = handle.start().expect_err("empty command");
        assert!(matches!(err, ProcessError::EmptyCommand));
        assert_eq!(handle.state(), ProcessState::Error);
        assert_eq!(handle.generation(), 1);
        assert_eq!(handle.last_error(), Some("command is empty"));
    }

    #[test]
    fn exit_from_other_handle_or_generation_is_ignored() {
        let (events, _rx) = event_channel();
        let mut handle = ProcessHandle::new(TaskRecord::new("api", "true"), events.clone());
        let other = ProcessHandle::new(TaskRecord::new("api", "true"), events);

        let foreign = notice(&other, 0, ExitOutcome::Failed("boom".to_string()));
        assert!(!handle.apply_exit(&foreign));
        let stale = notice(&handle, 7, ExitOutcome::Failed("boom".to_string()));
        assert!(!handle.apply_exit(&stale));
        assert_eq!(handle.state(), ProcessState::Stopped);
        assert!(handle.last_error().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawn_failure_records_error() {
        let (events, _rx) = event_channel();
        let mut handle = ProcessHandle::new(
            TaskRecord::new("ghost", "devdeck-no-such-binary --flag"),
            events,
        );
        let err = handle.start().expect_err("missing binary");
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert_eq!(handle.state(), ProcessState::Error);
        assert!(handle
            .last_error()
            .unwrap_or_default()
            .contains("devdeck-no-such-binary"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stopped_run_settles_to_stopped_not_error() {
        let (events, mut rx) = event_channel();
        let mut handle = ProcessHandle::new(TaskRecord::new("sleeper", "sleep 30"), events);
        handle.start().expect("start");
        assert_eq!(handle.state(), ProcessState::Running);
        handle.stop();

        loop {
            match rx.recv().await.expect("event") {
                Event::Exited(notice) => {
                    assert!(handle.apply_exit(&notice));
                    break;
                }
                _ => continue,
            }
        }
        assert_eq!(handle.state(), ProcessState::Stopped);
        assert!(handle.last_error().is_none());
    }
}
