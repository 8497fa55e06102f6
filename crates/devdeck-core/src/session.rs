use crate::event::{Event, ExitNotice, ExitOutcome, HealthNotice, LogLine, Subscription};
use crate::process::{ProcessHandle, ProcessState, RESTART_MARKER};
use crate::search;
use crate::stats::{StatsRequest, StatsRound, SystemUsage};
use crate::supervisor::Supervisor;
use crate::task::TaskRecord;
use crossterm::event::{
    KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEvent, MouseEventKind,
};
use ratatui::layout::Rect;
use tracing::{debug, info, warn};

pub const LIST_PANE_WIDTH: u16 = 35;
pub const STATUS_BAR_HEIGHT: u16 = 1;
/// Lines moved per mouse wheel notch.
pub const WHEEL_STEP: isize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pane {
    #[default]
    List,
    Log,
    SecondaryLog,
}

impl Pane {
    pub fn label(self) -> &'static str {
        match self {
            Pane::List => "list",
            Pane::Log => "log",
            Pane::SecondaryLog => "pinned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    None,
    SendInput,
    Search,
}

impl InputMode {
    pub fn label(self) -> &'static str {
        match self {
            InputMode::None => "normal",
            InputMode::SendInput => "input",
            InputMode::Search => "search",
        }
    }
}

/// Work the session asks the runtime loop to perform after an event.
#[derive(Debug)]
pub enum Effect {
    Subscribe(Subscription),
    SampleStats(Vec<StatsRequest>),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warn,
            text: text.into(),
        }
    }
}

/// Screen geometry. The list pane has a fixed width; when a process is pinned the log column is
/// split with the pinned pane on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaneLayout {
    pub list: Rect,
    pub primary: Rect,
    pub secondary: Option<Rect>,
    pub status: Rect,
}

impl PaneLayout {
    pub fn compute(width: u16, height: u16, split: bool) -> Self {
        let status_height = STATUS_BAR_HEIGHT.min(height);
        let body = height - status_height;
        let list_width = LIST_PANE_WIDTH.min(width);
        let log_width = width - list_width;

        let list = Rect::new(0, 0, list_width, body);
        let (primary, secondary) = if split {
            let top = body / 2;
            (
                Rect::new(list_width, top, log_width, body - top),
                Some(Rect::new(list_width, 0, log_width, top)),
            )
        } else {
            (Rect::new(list_width, 0, log_width, body), None)
        };
        let status = Rect::new(0, body, width, status_height);
        Self {
            list,
            primary,
            secondary,
            status,
        }
    }
}

/// Lines visible inside a bordered pane.
fn inner_height(area: Rect) -> usize {
    usize::from(area.height.saturating_sub(2))
}

/// A scrollable window over a copy of some lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewport {
    lines: Vec<String>,
    offset: usize,
    height: usize,
}

impl Viewport {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn visible(&self) -> &[String] {
        let end = (self.offset + self.height).min(self.lines.len());
        let start = self.offset.min(end);
        &self.lines[start..end]
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn at_bottom(&self) -> bool {
        self.offset >= self.max_offset()
    }

    pub fn set_height(&mut self, height: usize) {
        let follow = self.at_bottom();
        self.height = height;
        if follow {
            self.goto_bottom();
        } else {
            self.offset = self.offset.min(self.max_offset());
        }
    }

    /// Replaces the content and jumps to the newest line.
    pub fn set_content(&mut self, lines: Vec<String>) {
        self.lines = lines;
        self.goto_bottom();
    }

    /// Appends a line, following it only if the view was already at the bottom.
    pub fn push(&mut self, line: String) {
        let follow = self.at_bottom();
        self.lines.push(line);
        if follow {
            self.goto_bottom();
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.offset = 0;
    }

    pub fn scroll(&mut self, delta: isize) {
        let next = if delta < 0 {
            self.offset.saturating_sub(delta.unsigned_abs())
        } else {
            self.offset.saturating_add(delta.unsigned_abs())
        };
        self.offset = next.min(self.max_offset());
    }

    pub fn page(&mut self, pages: isize) {
        let step = self.height.max(1) as isize;
        self.scroll(pages * step);
    }

    pub fn goto_top(&mut self) {
        self.offset = 0;
    }

    pub fn goto_bottom(&mut self) {
        self.offset = self.max_offset();
    }

    fn max_offset(&self) -> usize {
        self.lines.len().saturating_sub(self.height)
    }
}

/// The dashboard's state machine.
///
/// Owns the supervisor and every piece of view state. Events are applied one at a time through
/// [`Session::handle`], which returns the effects the runtime loop must carry out.
#[derive(Debug)]
pub struct Session {
    supervisor: Supervisor,
    cursor: usize,
    pinned: Option<usize>,
    focus: Pane,
    input_mode: InputMode,
    input: String,
    query: String,
    matches: Vec<usize>,
    help_visible: bool,
    width: u16,
    height: u16,
    layout: PaneLayout,
    primary: Viewport,
    secondary: Viewport,
    notice: Option<Notice>,
    system: Option<SystemUsage>,
    quitting: bool,
}

impl Session {
    pub fn new(supervisor: Supervisor) -> Self {
        Self {
            supervisor,
            cursor: 0,
            pinned: None,
            focus: Pane::List,
            input_mode: InputMode::None,
            input: String::new(),
            query: String::new(),
            matches: Vec::new(),
            help_visible: false,
            width: 0,
            height: 0,
            layout: PaneLayout::default(),
            primary: Viewport::default(),
            secondary: Viewport::default(),
            notice: None,
            system: None,
            quitting: false,
        }
    }

    /// Starts every process and returns their subscriptions to arm.
    pub fn start(&mut self) -> Vec<Effect> {
        let effects = self
            .supervisor
            .start_all()
            .into_iter()
            .map(Effect::Subscribe)
            .collect();
        self.refresh_panes();
        effects
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            Event::LogLine(line, sub) => self.on_line(line, sub, &mut effects),
            Event::Key(key) => self.on_key(key, &mut effects),
            Event::Resize { width, height } => self.resize(width, height),
            Event::ConfigChanged(tasks) => self.reload(tasks, &mut effects),
            Event::ReloadFailed(reason) => {
                warn!(reason = %reason, "config reload failed");
                self.notify(Notice::warn(format!("config reload failed: {reason}")));
            }
            Event::StatsTick => self.stats_tick(&mut effects),
            Event::StatsSampled(round) => self.record_samples(round),
            Event::Mouse(mouse) => self.on_mouse(mouse),
            Event::Exited(notice) => self.on_exit(&notice),
            Event::Health(notice) => self.on_health(&notice),
        }
        self.check_invariants();
        effects
    }

    pub fn notify(&mut self, notice: Notice) {
        self.notice = Some(notice);
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn pinned(&self) -> Option<usize> {
        self.pinned
    }

    pub fn focus(&self) -> Pane {
        self.focus
    }

    pub fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self) -> &[usize] {
        &self.matches
    }

    pub fn help_visible(&self) -> bool {
        self.help_visible
    }

    pub fn layout(&self) -> &PaneLayout {
        &self.layout
    }

    pub fn primary(&self) -> &Viewport {
        &self.primary
    }

    pub fn secondary(&self) -> &Viewport {
        &self.secondary
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// Machine-wide load from the latest sampling round, once one has arrived.
    pub fn system_usage(&self) -> Option<SystemUsage> {
        self.system
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting
    }

    /// True once the terminal size is known.
    pub fn is_ready(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn selected(&self) -> Option<&ProcessHandle> {
        self.supervisor.get(self.cursor)
    }

    pub fn pinned_handle(&self) -> Option<&ProcessHandle> {
        self.pinned.and_then(|idx| self.supervisor.get(idx))
    }

    fn on_line(&mut self, line: LogLine, sub: Subscription, effects: &mut Vec<Effect>) {
        let Some(idx) = self.supervisor.position(&line.task, line.handle) else {
            debug!(task = %line.task, handle = %line.handle, "releasing subscription of retired handle");
            return;
        };
        let Some(handle) = self.supervisor.get_mut(idx) else {
            return;
        };
        handle.append_line(line.text.clone());
        let position = handle.log().len() - 1;

        if idx == self.cursor && search::line_matches(&line.text, &self.query) {
            if !self.query.is_empty() {
                self.matches.push(position);
            }
            self.primary.push(line.text.clone());
        }
        if self.pinned == Some(idx) {
            self.secondary.push(line.text);
        }
        effects.push(Effect::Subscribe(sub));
    }

    fn on_key(&mut self, key: KeyEvent, effects: &mut Vec<Effect>) {
        if key.kind == KeyEventKind::Release {
            return;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.quit(effects);
            return;
        }
        if self.help_visible {
            if matches!(key.code, KeyCode::Char('?') | KeyCode::Esc) {
                self.help_visible = false;
            }
            return;
        }
        match self.input_mode {
            InputMode::None => self.command_key(key, effects),
            InputMode::SendInput | InputMode::Search => self.input_key(key),
        }
    }

    fn on_mouse(&mut self, mouse: MouseEvent) {
        if self.help_visible {
            return;
        }
        match mouse.kind {
            MouseEventKind::ScrollUp => self.focused_viewport().scroll(-WHEEL_STEP),
            MouseEventKind::ScrollDown => self.focused_viewport().scroll(WHEEL_STEP),
            _ => {}
        }
    }

    fn command_key(&mut self, key: KeyEvent, effects: &mut Vec<Effect>) {
        match key.code {
            KeyCode::Char('q') => self.quit(effects),
            KeyCode::Char('?') => {
                self.help_visible = true;
            }
            KeyCode::Up | KeyCode::Char('k') => self.step(-1),
            KeyCode::Down | KeyCode::Char('j') => self.step(1),
            KeyCode::PageUp => self.focused_viewport().page(-1),
            KeyCode::PageDown => self.focused_viewport().page(1),
            KeyCode::Home => self.focused_viewport().goto_top(),
            KeyCode::End => self.focused_viewport().goto_bottom(),
            KeyCode::Tab => self.cycle_focus(),
            KeyCode::Char('r') => self.restart_selected(),
            KeyCode::Char('s') => self.toggle_pin(),
            KeyCode::Char('i') => {
                if !self.supervisor.is_empty() {
                    self.input.clear();
                    self.input_mode = InputMode::SendInput;
                }
            }
            KeyCode::Char('/') => {
                self.input = self.query.clone();
                self.input_mode = InputMode::Search;
            }
            KeyCode::Esc => {
                if !self.query.is_empty() {
                    self.query.clear();
                    self.refresh_primary();
                }
            }
            _ => {}
        }
    }

    fn input_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.input.clear();
                self.input_mode = InputMode::None;
            }
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Enter => {
                let text = std::mem::take(&mut self.input);
                let mode = std::mem::take(&mut self.input_mode);
                match mode {
                    InputMode::SendInput => self.forward_input(&text),
                    InputMode::Search => {
                        self.query = text.trim().to_string();
                        self.refresh_primary();
                    }
                    InputMode::None => {}
                }
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.input.push(c);
            }
            _ => {}
        }
    }

    fn quit(&mut self, effects: &mut Vec<Effect>) {
        info!("stopping all processes");
        self.supervisor.stop_all();
        self.quitting = true;
        effects.push(Effect::Quit);
    }

    fn step(&mut self, delta: isize) {
        match self.focus {
            Pane::List => self.move_cursor(delta),
            Pane::Log => self.primary.scroll(delta),
            Pane::SecondaryLog => self.secondary.scroll(delta),
        }
    }

    fn move_cursor(&mut self, delta: isize) {
        let len = self.supervisor.len();
        if len == 0 {
            return;
        }
        let next = if delta < 0 {
            self.cursor.saturating_sub(delta.unsigned_abs())
        } else {
            self.cursor.saturating_add(delta.unsigned_abs())
        };
        let next = next.min(len - 1);
        if next != self.cursor {
            self.cursor = next;
            self.refresh_primary();
        }
    }

    fn focused_viewport(&mut self) -> &mut Viewport {
        match self.focus {
            Pane::SecondaryLog => &mut self.secondary,
            Pane::List | Pane::Log => &mut self.primary,
        }
    }

    fn cycle_focus(&mut self) {
        self.focus = match (self.focus, self.pinned.is_some()) {
            (Pane::List, _) => Pane::Log,
            (Pane::Log, true) => Pane::SecondaryLog,
            (Pane::Log, false) => Pane::List,
            (Pane::SecondaryLog, _) => Pane::List,
        };
    }

    fn restart_selected(&mut self) {
        let Some(handle) = self.supervisor.get_mut(self.cursor) else {
            return;
        };
        let name = handle.name().to_string();
        let result = handle.restart();
        handle.append_line(RESTART_MARKER);
        match result {
            Ok(()) => self.notify(Notice::info(format!("restarted {name}"))),
            Err(err) => self.notify(Notice::warn(format!("{name}: {err}"))),
        }
        self.refresh_panes();
    }

    fn toggle_pin(&mut self) {
        if self.pinned.is_some() {
            self.pinned = None;
            if self.focus == Pane::SecondaryLog {
                self.focus = Pane::List;
            }
        } else if !self.supervisor.is_empty() {
            self.pinned = Some(self.cursor);
        }
        self.apply_layout();
        self.refresh_secondary();
    }

    fn forward_input(&mut self, text: &str) {
        let Some(handle) = self.supervisor.get(self.cursor) else {
            return;
        };
        if let Err(err) = handle.send_input(text) {
            let message = format!("{}: {err}", handle.name());
            self.notify(Notice::warn(message));
        }
    }

    fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.apply_layout();
    }

    fn reload(&mut self, tasks: Vec<TaskRecord>, effects: &mut Vec<Effect>) {
        let cursor_name = self.selected().map(|h| h.name().to_string());
        let pinned_name = self.pinned_handle().map(|h| h.name().to_string());

        let mut report = self.supervisor.reconcile(tasks);
        effects.extend(
            std::mem::take(&mut report.subscriptions)
                .into_iter()
                .map(Effect::Subscribe),
        );

        let len = self.supervisor.len();
        self.cursor = cursor_name
            .and_then(|name| self.supervisor.index_of(&name))
            .unwrap_or_else(|| self.cursor.min(len.saturating_sub(1)));
        self.pinned = pinned_name.and_then(|name| self.supervisor.index_of(&name));
        if self.pinned.is_none() && self.focus == Pane::SecondaryLog {
            self.focus = Pane::List;
        }
        if len == 0 && self.input_mode == InputMode::SendInput {
            self.input.clear();
            self.input_mode = InputMode::None;
        }

        self.apply_layout();
        self.refresh_panes();
        self.notify(Notice::info(report.summary()));
    }

    fn stats_tick(&mut self, effects: &mut Vec<Effect>) {
        let mut requests = Vec::new();
        for handle in self.supervisor.handles_mut() {
            match handle.stats_request() {
                Some(request) => requests.push(request),
                None => handle.clear_stats(),
            }
        }
        effects.push(Effect::SampleStats(requests));
    }

    fn record_samples(&mut self, round: StatsRound) {
        self.system = Some(round.system);
        for sample in &round.samples {
            if let Some(handle) = self.supervisor.find_mut(&sample.origin) {
                handle.sample_stats(sample);
            }
        }
    }

    fn on_exit(&mut self, notice: &ExitNotice) {
        let Some(handle) = self.supervisor.find_mut(&notice.origin) else {
            return;
        };
        if handle.apply_exit(notice) && handle.state() == ProcessState::Error {
            if let ExitOutcome::Failed(reason) = &notice.outcome {
                let message = format!("{} exited: {reason}", handle.name());
                self.notify(Notice::warn(message));
            }
        }
    }

    fn on_health(&mut self, notice: &HealthNotice) {
        if let Some(handle) = self.supervisor.find_mut(&notice.origin) {
            handle.apply_health(notice);
        }
    }

    fn apply_layout(&mut self) {
        self.layout = PaneLayout::compute(self.width, self.height, self.pinned.is_some());
        self.primary.set_height(inner_height(self.layout.primary));
        self.secondary
            .set_height(self.layout.secondary.map(inner_height).unwrap_or(0));
    }

    fn refresh_panes(&mut self) {
        self.refresh_primary();
        self.refresh_secondary();
    }

    /// Rebuilds the primary pane from the cursor's buffer through the active query.
    fn refresh_primary(&mut self) {
        match self.supervisor.get(self.cursor) {
            Some(handle) => {
                self.matches = search::match_positions(handle.log(), &self.query);
                self.primary
                    .set_content(search::filter_lines(handle.log(), &self.query));
            }
            None => {
                self.matches.clear();
                self.primary.clear();
            }
        }
    }

    fn refresh_secondary(&mut self) {
        match self.pinned_handle() {
            Some(handle) => {
                let lines = handle.log().to_vec();
                self.secondary.set_content(lines);
            }
            None => self.secondary.clear(),
        }
    }

    fn check_invariants(&self) {
        let len = self.supervisor.len();
        assert!(
            len == 0 || self.cursor < len,
            "cursor {} out of bounds for {len} processes",
            self.cursor
        );
        if let Some(pinned) = self.pinned {
            assert!(pinned < len, "pin {pinned} out of bounds for {len} processes");
        }
        assert!(
            self.focus != Pane::SecondaryLog || self.pinned.is_some(),
            "pinned pane focused without a pin"
        );
    }
}
