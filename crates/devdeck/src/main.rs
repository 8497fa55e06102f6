mod crash;
mod theme;
mod ui;
mod watcher;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event as TermEvent, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use devdeck_core::event::event_channel;
use devdeck_core::{
    load_tasks, spawn_sampler, DeckConfig, Effect, Event, LogLine, Notice, Session, Subscription,
    Supervisor,
};
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{FuturesUnordered, StreamExt};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::fs::{File, OpenOptions};
use std::io::{self, Stdout};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use std::{env, process};
use theme::Theme;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const MIN_STATS_INTERVAL_MS: u64 = 250;

#[derive(Parser, Debug)]
#[command(name = "devdeck", about = "Run a set of dev processes side by side and watch their logs")]
struct Args {
    /// Task definitions (.yaml, .yml or .json).
    #[arg(short, long, default_value = "devdeck.yaml")]
    config: PathBuf,
    /// Write logs to this file. Logging is discarded otherwise.
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long, default_value_t = 2000)]
    stats_interval_ms: u64,
}

type LineFuture = BoxFuture<'static, Option<(LogLine, Subscription)>>;

fn main() {
    let args = Args::parse();
    init_logging(args.log_file.as_deref());
    crash::install_hook(PathBuf::from(crash::CRASH_LOG));

    let config = match load_tasks(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("devdeck: {err}");
            process::exit(1);
        }
    };
    info!(config = %args.config.display(), tasks = config.tasks.len(), "starting devdeck");

    match panic::catch_unwind(AssertUnwindSafe(|| run(&args, config))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            eprintln!("devdeck: {err:#}");
            process::exit(1);
        }
        Err(_) => {
            eprintln!("DevDeck crashed!");
            eprintln!("Error details saved to {}", crash::CRASH_LOG);
            process::exit(1);
        }
    }
}

fn run(args: &Args, config: DeckConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run_session(args, config))
}

async fn run_session(args: &Args, config: DeckConfig) -> Result<()> {
    let theme = Theme::from_config(&config.theme);
    let (events_tx, mut events_rx) = event_channel();
    let mut session = Session::new(Supervisor::new(config.tasks, events_tx.clone()));

    let _watcher = match watcher::watch_definitions(&args.config, events_tx.clone()) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!(error = %err, "config watcher unavailable");
            session.notify(Notice::warn(format!("not watching config: {err}")));
            None
        }
    };
    let stats_tx = spawn_sampler(events_tx).context("failed to start stats sampler")?;

    let mut guard = TerminalGuard::enter()?;
    let mut input = EventStream::new();
    let mut subscriptions: FuturesUnordered<LineFuture> = FuturesUnordered::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(
        args.stats_interval_ms.max(MIN_STATS_INTERVAL_MS),
    ));

    let size = guard.terminal.size()?;
    let mut pending = session.start();
    pending.extend(session.handle(Event::Resize {
        width: size.width,
        height: size.height,
    }));

    loop {
        for effect in pending.drain(..) {
            match effect {
                Effect::Subscribe(sub) => subscriptions.push(sub.next().boxed()),
                Effect::SampleStats(requests) => {
                    if stats_tx.try_send(requests).is_err() {
                        debug!("stats sampler busy; skipping round");
                    }
                }
                Effect::Quit => {
                    info!("session ended");
                    return Ok(());
                }
            }
        }

        guard
            .terminal
            .draw(|frame| ui::render(frame, &session, &theme))?;

        let event = tokio::select! {
            Some(event) = events_rx.recv() => event,
            Some(next) = subscriptions.next(), if !subscriptions.is_empty() => match next {
                Some((line, sub)) => Event::LogLine(line, sub),
                None => continue,
            },
            _ = ticker.tick() => Event::StatsTick,
            maybe_event = input.next() => match maybe_event {
                Some(Ok(TermEvent::Key(key))) => Event::Key(key),
                Some(Ok(TermEvent::Mouse(mouse))) => Event::Mouse(mouse),
                Some(Ok(TermEvent::Resize(width, height))) => Event::Resize { width, height },
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err).context("failed to read terminal input"),
                None => return Ok(()),
            },
        };
        pending = session.handle(event);
    }
}

/// Raw mode, mouse capture and the alternate screen for as long as it lives, including during a
/// panic unwind.
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        terminal.clear()?;
        Ok(Self { terminal })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        );
        let _ = self.terminal.show_cursor();
    }
}

fn init_logging(log_file: Option<&Path>) {
    let level = env::var("DEVDECK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match log_file.map(open_log_file) {
        Some(Ok(file)) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init();
        }
        Some(Err(err)) => {
            eprintln!("devdeck: log file unavailable: {err}");
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::sink)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::sink)
                .try_init();
        }
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
