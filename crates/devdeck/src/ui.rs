use crate::theme::{icons, Theme};
use devdeck_core::search;
use devdeck_core::{
    HealthState, InputMode, NoticeLevel, Pane, ProcessHandle, ProcessState, Session, SystemUsage,
};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

const INPUT_BOX_HEIGHT: u16 = 3;

pub fn render(f: &mut Frame, session: &Session, theme: &Theme) {
    let area = f.size();
    if !session.is_ready() {
        f.render_widget(Paragraph::new("Initializing...").style(theme.muted()), area);
        return;
    }

    let layout = session.layout();
    render_list(f, session, theme, layout.list.intersection(area));
    if let Some(secondary) = layout.secondary {
        render_log(f, session, theme, secondary.intersection(area), Pane::SecondaryLog);
    }
    let primary = layout.primary.intersection(area);
    render_log(f, session, theme, primary, Pane::Log);
    render_status(f, session, theme, layout.status.intersection(area));

    if session.input_mode() != InputMode::None {
        render_input(f, session, theme, primary);
    }
    if session.help_visible() {
        render_help(f, theme, area);
    }
}

fn render_list(f: &mut Frame, session: &Session, theme: &Theme, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(" Processes ", theme.title()))
        .border_style(theme.border(session.focus() == Pane::List));

    let supervisor = session.supervisor();
    if supervisor.is_empty() {
        let p = Paragraph::new("No tasks defined")
            .style(theme.muted())
            .block(block);
        f.render_widget(p, area);
        return;
    }

    let items: Vec<ListItem> = supervisor
        .handles()
        .iter()
        .enumerate()
        .map(|(idx, handle)| {
            let selected = idx == session.cursor();
            let pinned = session.pinned() == Some(idx);
            ListItem::new(process_line(handle, selected, pinned, theme))
        })
        .collect();

    let mut state = ListState::default();
    state.select(Some(session.cursor()));
    f.render_stateful_widget(List::new(items).block(block), area, &mut state);
}

/// One row of the process list: markers, status glyph, name, usage, health and error.
pub fn process_line(
    handle: &ProcessHandle,
    selected: bool,
    pinned: bool,
    theme: &Theme,
) -> Line<'static> {
    let name_style = if selected {
        theme.selected()
    } else {
        Style::new()
    };
    let mut spans = vec![
        Span::styled(
            if selected { icons::CURSOR } else { " " },
            theme.selected(),
        ),
        Span::raw(if pinned { icons::PIN } else { " " }),
        Span::raw(" "),
        Span::styled(
            status_glyph(handle.state()),
            Style::new().fg(theme.state_color(handle.state())),
        ),
        Span::raw(" "),
        Span::styled(handle.name().to_string(), name_style),
    ];
    if let Some(usage) = usage_text(handle) {
        spans.push(Span::styled(format!(" {usage}"), theme.muted()));
    }
    if let Some(tag) = health_tag(handle) {
        spans.push(Span::styled(
            format!(" [{tag}]"),
            Style::new().fg(theme.health_color(handle.health())),
        ));
    }
    if let Some(err) = error_text(handle) {
        spans.push(Span::styled(
            format!(" ({err})"),
            Style::new().fg(theme.critical),
        ));
    }
    Line::from(spans)
}

fn status_glyph(state: ProcessState) -> &'static str {
    match state {
        ProcessState::Running => icons::RUNNING,
        ProcessState::Stopped => icons::STOPPED,
        ProcessState::Error => icons::ERROR,
    }
}

fn usage_text(handle: &ProcessHandle) -> Option<String> {
    if handle.state() != ProcessState::Running {
        return None;
    }
    let usage = handle.usage();
    Some(format!(
        "({:.1}% CPU, {:.1} MB)",
        usage.cpu_percent,
        usage.resident_mb()
    ))
}

fn health_tag(handle: &ProcessHandle) -> Option<&'static str> {
    if !handle.has_probe() || handle.health() == HealthState::Unchecked {
        return None;
    }
    Some(handle.health().label())
}

fn error_text(handle: &ProcessHandle) -> Option<String> {
    if handle.state() != ProcessState::Error {
        return None;
    }
    Some(format!("err: {}", handle.last_error().unwrap_or("unknown")))
}

fn render_log(f: &mut Frame, session: &Session, theme: &Theme, area: Rect, pane: Pane) {
    let (handle, view, query) = match pane {
        Pane::SecondaryLog => (session.pinned_handle(), session.secondary(), ""),
        _ => (session.selected(), session.primary(), session.query()),
    };

    let mut title = vec![Span::styled(
        format!(
            " {}{} ",
            if pane == Pane::SecondaryLog { "pinned: " } else { "" },
            handle.map(ProcessHandle::name).unwrap_or("logs")
        ),
        theme.title(),
    )];
    if let Some(groups) = handle.and_then(groups_text) {
        title.push(Span::styled(format!("{groups} "), theme.muted()));
    }
    if !query.is_empty() {
        title.push(Span::styled(
            format!("/{query} ({} matches) ", session.matches().len()),
            theme.highlight(),
        ));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .title(Line::from(title))
        .border_style(theme.border(session.focus() == pane));

    let lines: Vec<Line> = view
        .visible()
        .iter()
        .map(|text| highlighted_line(text, query, theme))
        .collect();
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn groups_text(handle: &ProcessHandle) -> Option<String> {
    let groups = &handle.task().groups;
    if groups.is_empty() {
        return None;
    }
    Some(format!("[{}]", groups.join(", ")))
}

fn system_text(usage: SystemUsage) -> String {
    format!(
        "CPU: {:.1}% | MEM: {:.1}%",
        usage.cpu_percent, usage.memory_percent
    )
}

fn highlighted_line(text: &str, query: &str, theme: &Theme) -> Line<'static> {
    let ranges = search::highlight_ranges(text, query);
    if ranges.is_empty() {
        return Line::from(text.to_string());
    }
    let mut spans = Vec::with_capacity(ranges.len() * 2 + 1);
    let mut last = 0;
    for (start, end) in ranges {
        if start > last {
            spans.push(Span::raw(text[last..start].to_string()));
        }
        spans.push(Span::styled(text[start..end].to_string(), theme.highlight()));
        last = end;
    }
    if last < text.len() {
        spans.push(Span::raw(text[last..].to_string()));
    }
    Line::from(spans)
}

fn render_status(f: &mut Frame, session: &Session, theme: &Theme, area: Rect) {
    if area.height == 0 {
        return;
    }
    let mut spans = vec![
        Span::styled(
            format!(" {} ", session.input_mode().label().to_uppercase()),
            theme.status_bar().add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" focus: {} ", session.focus().label()),
            theme.status_bar(),
        ),
        Span::styled(" ?: help  q: quit ", theme.status_bar()),
    ];
    if let Some(usage) = session.system_usage() {
        spans.push(Span::styled(
            format!(" {} ", system_text(usage)),
            theme.status_bar(),
        ));
    }
    if let Some(notice) = session.notice() {
        let color = match notice.level {
            NoticeLevel::Info => theme.ok,
            NoticeLevel::Warn => theme.warn,
        };
        spans.push(Span::styled(
            format!(" {}", notice.text),
            theme.status_bar().fg(color),
        ));
    }
    f.render_widget(
        Paragraph::new(Line::from(spans)).style(theme.status_bar()),
        area,
    );
}

fn render_input(f: &mut Frame, session: &Session, theme: &Theme, pane: Rect) {
    if pane.height < INPUT_BOX_HEIGHT || pane.width < 4 {
        return;
    }
    let area = Rect::new(
        pane.x,
        pane.y + pane.height - INPUT_BOX_HEIGHT,
        pane.width,
        INPUT_BOX_HEIGHT,
    );
    let title = match session.input_mode() {
        InputMode::Search => " Search ".to_string(),
        _ => format!(
            " Send to {} ",
            session.selected().map(ProcessHandle::name).unwrap_or("process")
        ),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(title, theme.title()))
        .border_style(theme.border(true));
    f.render_widget(Clear, area);
    f.render_widget(Paragraph::new(session.input().to_string()).block(block), area);

    let max_x = area.x + area.width.saturating_sub(2);
    let cursor_x = (area.x + 1).saturating_add(session.input().chars().count() as u16);
    f.set_cursor(cursor_x.min(max_x), area.y + 1);
}

fn render_help(f: &mut Frame, theme: &Theme, area: Rect) {
    let popup = centered_rect(60, 70, area);
    let key = Style::new().fg(theme.primary);
    let entry = |keys: &'static str, text: &'static str| {
        Line::from(vec![
            Span::styled(format!("{keys:<14}"), key),
            Span::raw(text),
        ])
    };
    let text = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::new().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        entry("j / Down", "Next process, or scroll the focused log"),
        entry("k / Up", "Previous process, or scroll the focused log"),
        entry("PgUp / PgDn", "Scroll a page"),
        entry("Home / End", "Jump to oldest / newest line"),
        entry("Mouse wheel", "Scroll the focused log"),
        entry("Tab", "Switch focus"),
        entry("r", "Restart process"),
        entry("s", "Pin / unpin process"),
        entry("i", "Send input to process"),
        entry("/", "Search logs"),
        entry("Esc", "Clear search"),
        entry("?", "Toggle help"),
        entry("q / Ctrl+C", "Quit"),
    ];
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(" Help ", theme.title()))
        .border_style(theme.border(true));
    f.render_widget(Clear, popup);
    f.render_widget(
        Paragraph::new(text).block(block).wrap(Wrap { trim: true }),
        popup,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
