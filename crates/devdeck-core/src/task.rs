use crate::error::ProcessError;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;

/// One supervised command as declared in the definitions file.
///
/// Records are never edited after loading: a reload that changes a task produces a new record,
/// and [`TaskRecord::same_definition`] decides whether the running process has to be replaced.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TaskRecord {
    pub name: String,
    pub command: String,
    #[serde(default, deserialize_with = "deserialize_optional_path")]
    pub directory: Option<PathBuf>,
    /// `KEY=VALUE` entries applied in order on top of the inherited environment.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_optional_path")]
    pub env_file: Option<PathBuf>,
    #[serde(default)]
    pub health_check: Option<HealthProbe>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Free-form labels shown next to the task name.
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Tcp,
    Http,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HealthProbe {
    #[serde(rename = "type")]
    pub kind: ProbeKind,
    pub target: String,
    /// Milliseconds between probes; zero selects the default.
    #[serde(default, rename = "interval", deserialize_with = "deserialize_millis")]
    pub interval_ms: u64,
    /// Milliseconds a single probe may take; zero selects the default.
    #[serde(default, rename = "timeout", deserialize_with = "deserialize_millis")]
    pub timeout_ms: u64,
}

impl TaskRecord {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            directory: None,
            env: Vec::new(),
            env_file: None,
            health_check: None,
            depends_on: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn with_probe(mut self, probe: HealthProbe) -> Self {
        self.health_check = Some(probe);
        self
    }

    /// Whether a running process for `self` can keep serving `other`.
    ///
    /// Only command, directory and the ordered environment are compared. Probe, dependency and
    /// group settings are metadata and never force a restart.
    pub fn same_definition(&self, other: &TaskRecord) -> bool {
        self.command == other.command && self.directory == other.directory && self.env == other.env
    }

    /// Environment entries split into key/value pairs, in declaration order.
    pub fn env_pairs(&self) -> Vec<(&str, &str)> {
        self.env
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .filter(|(key, _)| !key.trim().is_empty())
            .collect()
    }

    /// Splits the command into a program and its arguments using shell word rules.
    pub fn argv(&self) -> Result<Vec<String>, ProcessError> {
        let trimmed = self.command.trim();
        if trimmed.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }
        let words = shlex::split(trimmed)
            .ok_or_else(|| ProcessError::InvalidCommand(self.command.clone()))?;
        if words.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }
        Ok(words)
    }
}

impl HealthProbe {
    pub fn new(kind: ProbeKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            interval_ms: 0,
            timeout_ms: 0,
        }
    }

    pub fn with_timing(mut self, interval_ms: u64, timeout_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(non_zero_or(self.interval_ms, DEFAULT_PROBE_INTERVAL_MS))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(non_zero_or(self.timeout_ms, DEFAULT_PROBE_TIMEOUT_MS))
    }
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Tcp => "tcp",
            ProbeKind::Http => "http",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "tcp" => Ok(ProbeKind::Tcp),
            "http" => Ok(ProbeKind::Http),
            other => Err(format!("Unknown probe type: {other}")),
        }
    }
}

fn non_zero_or(value: u64, fallback: u64) -> u64 {
    if value == 0 {
        fallback
    } else {
        value
    }
}

/// Accepts `2000` as well as `"2000"` for millisecond fields.
fn deserialize_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    match val {
        serde_json::Value::Null => Ok(0),
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom("expected a non-negative number of milliseconds")),
        serde_json::Value::String(s) => s.trim().parse::<u64>().map_err(serde::de::Error::custom),
        _ => Err(serde::de::Error::custom("expected milliseconds as number or string")),
    }
}

/// Treats an empty string the same as an absent path.
fn deserialize_optional_path<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .filter(|raw| !raw.trim().is_empty())
        .map(PathBuf::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_definition_ignores_probe_and_dependencies() {
        let base = TaskRecord::new("api", "node server.js").with_env("PORT=3000");
        let mut probed = base.clone().with_probe(HealthProbe::new(ProbeKind::Tcp, "localhost:3000"));
        probed.depends_on.push("db".to_string());
        probed.groups.push("backend".to_string());
        assert!(base.same_definition(&probed));
    }

    #[test]
    fn environment_order_counts_as_a_change() {
        let first = TaskRecord::new("api", "run").with_env("A=1").with_env("B=2");
        let swapped = TaskRecord::new("api", "run").with_env("B=2").with_env("A=1");
        assert!(!first.same_definition(&swapped));
    }

    #[test]
    fn directory_change_counts_as_a_change() {
        let first = TaskRecord::new("api", "run").with_directory("/srv/a");
        let moved = TaskRecord::new("api", "run").with_directory("/srv/b");
        assert!(!first.same_definition(&moved));
    }

    #[test]
    fn argv_honours_quotes() {
        let task = TaskRecord::new("sh", "sh -c 'echo hello world'");
        assert_eq!(
            task.argv().expect("argv"),
            vec!["sh".to_string(), "-c".to_string(), "echo hello world".to_string()]
        );
    }

    #[test]
    fn argv_rejects_blank_and_unbalanced_commands() {
        assert!(matches!(
            TaskRecord::new("blank", "   ").argv(),
            Err(ProcessError::EmptyCommand)
        ));
        assert!(matches!(
            TaskRecord::new("broken", "echo 'unterminated").argv(),
            Err(ProcessError::InvalidCommand(_))
        ));
    }

    #[test]
    fn env_pairs_keep_order_and_skip_malformed_entries() {
        let task = TaskRecord::new("api", "run")
            .with_env("FOO=a")
            .with_env("garbage")
            .with_env("FOO=b")
            .with_env("URL=http://x?a=b");
        assert_eq!(
            task.env_pairs(),
            vec![("FOO", "a"), ("FOO", "b"), ("URL", "http://x?a=b")]
        );
    }

    #[test]
    fn probe_defaults_apply_to_zero_values() {
        let probe = HealthProbe::new(ProbeKind::Http, "http://localhost");
        assert_eq!(probe.interval(), Duration::from_millis(DEFAULT_PROBE_INTERVAL_MS));
        assert_eq!(probe.timeout(), Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS));

        let tuned = probe.with_timing(100, 50);
        assert_eq!(tuned.interval(), Duration::from_millis(100));
        assert_eq!(tuned.timeout(), Duration::from_millis(50));
    }

    #[test]
    fn probe_kind_parses_case_insensitively() {
        assert_eq!("TCP".parse::<ProbeKind>(), Ok(ProbeKind::Tcp));
        assert_eq!(" http ".parse::<ProbeKind>(), Ok(ProbeKind::Http));
        assert!("udp".parse::<ProbeKind>().is_err());
    }
}
