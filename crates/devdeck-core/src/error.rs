use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("command is empty")]
    EmptyCommand,
    #[error("command cannot be tokenized: {0}")]
    InvalidCommand(String),
    #[error("failed to spawn `{program}`: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("stdin is closed")]
    InputClosed,
    #[error("stdin is not keeping up; input dropped")]
    InputBacklog,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse YAML config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse JSON config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config file has no `tasks` list")]
    MissingTasks,
    #[error("unsupported config file extension: {0:?}")]
    UnsupportedExtension(String),
    #[error("task #{0} has no name")]
    EmptyName(usize),
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),
    #[error("task {0} has an empty command")]
    EmptyCommand(String),
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },
    #[error("task {task} has a malformed env entry {entry:?} (expected KEY=VALUE)")]
    MalformedEnv { task: String, entry: String },
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connect to {target} failed: {source}")]
    Connect { target: String, source: io::Error },
    #[error("probe of {target} timed out after {timeout_ms} ms")]
    Timeout { target: String, timeout_ms: u128 },
    #[error("request to {target} failed: {source}")]
    Http {
        target: String,
        source: reqwest::Error,
    },
    #[error("{target} answered with status {status}")]
    Status { target: String, status: u16 },
    #[error("http client unavailable: {0}")]
    Client(String),
}
