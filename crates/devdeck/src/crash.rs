use chrono::{SecondsFormat, Utc};
use std::any::Any;
use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use tracing::error;

pub const CRASH_LOG: &str = "devdeck-crash.log";

/// Replaces the panic hook so that every panic is appended to `path` with a backtrace.
///
/// The default hook is not chained: its output would land on the alternate screen.
pub fn install_hook(path: PathBuf) {
    panic::set_hook(Box::new(move |info| {
        let message = payload_message(info.payload());
        let message = match info.location() {
            Some(location) => format!("{message} at {location}"),
            None => message,
        };
        let backtrace = Backtrace::force_capture();
        error!(message = %message, "internal fault");
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let record = format_record(&timestamp, &message, &backtrace.to_string());
        if let Err(err) = append_record(&path, &record) {
            eprintln!("devdeck: could not write {}: {err}", path.display());
        }
    }));
}

pub fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub fn format_record(timestamp: &str, message: &str, backtrace: &str) -> String {
    format!("[{timestamp}] PANIC: {message}\n{backtrace}\n")
}

pub fn append_record(path: &Path, record: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(record.as_bytes())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_carries_timestamp_message_and_trace() {
        let record = format_record("2024-05-01T10:00:00Z", "boom", "0: main");
        assert_eq!(record, "[2024-05-01T10:00:00Z] PANIC: boom\n0: main\n");
    }

    #[test]
    fn records_are_appended() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CRASH_LOG);
        append_record(&path, "first\n").expect("first");
        append_record(&path, "second\n").expect("second");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "first\nsecond\n");
    }

    #[test]
    fn payload_messages_cover_str_and_string() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(payload_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(payload_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(payload_message(boxed.as_ref()), "unknown panic");
    }
}
