use devdeck_core::{load_tasks, Event, EventSender};
use notify::event::ModifyKind;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Watches the directory holding the definitions file and posts a reload for every change.
///
/// Editors often replace files instead of writing in place, so the parent directory is watched
/// and events are filtered by file name. Loading happens on the notifier thread; the session only
/// sees the parsed result. The returned watcher must be kept alive.
pub fn watch_definitions(path: &Path, events: EventSender) -> notify::Result<RecommendedWatcher> {
    let target = path.to_path_buf();
    let file_name = path.file_name().map(|name| name.to_os_string());
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if !is_definition_change(&event, file_name.as_ref()) {
                    return;
                }
                debug!(kind = ?event.kind, "definitions changed");
                let message = match load_tasks(&target) {
                    Ok(config) => Event::ConfigChanged(config.tasks),
                    Err(err) => Event::ReloadFailed(err.to_string()),
                };
                if events.blocking_send(message).is_err() {
                    debug!("session gone; dropping reload");
                }
            }
            Err(err) => warn!(error = %err, "watch error"),
        },
        Config::default(),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(dir = %dir.display(), "watching task definitions");
    Ok(watcher)
}

fn is_definition_change(event: &notify::Event, file_name: Option<&OsString>) -> bool {
    let relevant_kind = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    };
    if !relevant_kind {
        return false;
    }
    let Some(file_name) = file_name else {
        return false;
    };
    event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(file_name.as_os_str()))
}
