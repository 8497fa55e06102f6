use crate::error::ConfigError;
use crate::task::TaskRecord;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Optional color overrides. Values are `#rrggbb`, an ANSI index or a color name.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ThemeConfig {
    #[serde(default)]
    pub primary: Option<String>,
    #[serde(default)]
    pub secondary: Option<String>,
    #[serde(default)]
    pub border: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeckConfig {
    pub tasks: Vec<TaskRecord>,
    pub theme: ThemeConfig,
}

/// The file as written. `tasks` is optional here so that a blank or truncated file can be told
/// apart from one that lists no tasks on purpose.
#[derive(Debug, Deserialize)]
struct DeckDocument {
    #[serde(default)]
    tasks: Option<Vec<TaskRecord>>,
    #[serde(default)]
    theme: ThemeConfig,
}

impl TryFrom<DeckDocument> for DeckConfig {
    type Error = ConfigError;

    fn try_from(doc: DeckDocument) -> Result<Self, Self::Error> {
        let tasks = doc.tasks.ok_or(ConfigError::MissingTasks)?;
        Ok(DeckConfig {
            tasks,
            theme: doc.theme,
        })
    }
}

/// Reads, resolves and validates a definitions file.
///
/// Relative `directory` and `env_file` paths are taken relative to the file itself. Entries from
/// an `env_file` go before the inline `env` list so inline values win.
pub fn load_tasks(path: &Path) -> Result<DeckConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mut config = parse_config(&content, &extension)?;
    let base = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    for task in &mut config.tasks {
        resolve_task(task, &base);
    }
    validate(&config.tasks)?;
    debug!(path = %path.display(), tasks = config.tasks.len(), "loaded task definitions");
    Ok(config)
}

/// Parses a definitions document. A document without a `tasks` list is rejected; `tasks: []`
/// is accepted and means "run nothing".
pub fn parse_config(content: &str, extension: &str) -> Result<DeckConfig, ConfigError> {
    let doc: DeckDocument = match extension {
        "json" => serde_json::from_str(content)?,
        "yaml" | "yml" => {
            if content.trim().is_empty() {
                return Err(ConfigError::MissingTasks);
            }
            serde_yaml::from_str(content)?
        }
        other => return Err(ConfigError::UnsupportedExtension(other.to_string())),
    };
    DeckConfig::try_from(doc)
}

/// `KEY=VALUE` lines; blanks, `#` comments and lines without `=` are skipped.
pub fn parse_env_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| line.split_once('=').is_some_and(|(key, _)| !key.trim().is_empty()))
        .map(str::to_string)
        .collect()
}

fn resolve_task(task: &mut TaskRecord, base: &Path) {
    if let Some(dir) = &task.directory {
        if dir.is_relative() {
            task.directory = Some(base.join(dir));
        }
    }
    let Some(env_file) = task.env_file.take() else {
        return;
    };
    let env_file = if env_file.is_relative() {
        base.join(env_file)
    } else {
        env_file
    };
    match fs::read_to_string(&env_file) {
        Ok(content) => {
            let mut merged = parse_env_file(&content);
            merged.append(&mut task.env);
            task.env = merged;
        }
        Err(err) => {
            warn!(task = %task.name, path = %env_file.display(), error = %err, "env file unreadable");
        }
    }
    task.env_file = Some(env_file);
}

fn validate(tasks: &[TaskRecord]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for (idx, task) in tasks.iter().enumerate() {
        if task.name.trim().is_empty() {
            return Err(ConfigError::EmptyName(idx));
        }
        if !names.insert(task.name.as_str()) {
            return Err(ConfigError::DuplicateTask(task.name.clone()));
        }
        if task.command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand(task.name.clone()));
        }
        if let Some(entry) = task.env.iter().find(|entry| !entry.contains('=')) {
            return Err(ConfigError::MalformedEnv {
                task: task.name.clone(),
                entry: entry.clone(),
            });
        }
    }
    for task in tasks {
        if let Some(missing) = task.depends_on.iter().find(|dep| !names.contains(dep.as_str())) {
            return Err(ConfigError::UnknownDependency {
                task: task.name.clone(),
                dependency: missing.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ProbeKind;
    use tempfile::tempdir;

    const SAMPLE_YAML: &str = r##"
tasks:
  - name: api
    command: node server.js
    directory: backend
    env:
      - PORT=3000
      - MODE=dev
    env_file: .env
    health_check:
      type: http
      target: http://localhost:3000/health
      interval: 500
    depends_on: [db]
    groups: [backend, http]
  - name: db
    command: "docker run --rm postgres"
theme:
  primary: "#ff8800"
"##;

    #[test]
    fn loads_yaml_and_resolves_relative_paths() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join(".env"), "# shared\nMODE=prod\n\nTOKEN=abc\nnot an entry\n")
            .expect("write env");
        let path = dir.path().join("devdeck.yaml");
        fs::write(&path, SAMPLE_YAML).expect("write config");

        let config = load_tasks(&path).expect("load");
        assert_eq!(config.tasks.len(), 2);
        let api = &config.tasks[0];
        assert_eq!(api.directory, Some(dir.path().join("backend")));
        assert_eq!(
            api.env,
            vec!["MODE=prod", "TOKEN=abc", "PORT=3000", "MODE=dev"]
        );
        let probe = api.health_check.as_ref().expect("probe");
        assert_eq!(probe.kind, ProbeKind::Http);
        assert_eq!(probe.interval_ms, 500);
        assert_eq!(probe.timeout_ms, 0);
        assert_eq!(api.groups, vec!["backend", "http"]);
        assert_eq!(config.theme.primary.as_deref(), Some("#ff8800"));
        assert!(config.tasks[1].directory.is_none());
    }

    #[test]
    fn loads_json() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("deck.json");
        fs::write(
            &path,
            r#"{"tasks":[{"name":"web","command":"npm start","directory":"","health_check":{"type":"tcp","target":"localhost:8080","timeout":"250"}}]}"#,
        )
        .expect("write");

        let config = load_tasks(&path).expect("load");
        let web = &config.tasks[0];
        assert!(web.directory.is_none());
        let probe = web.health_check.as_ref().expect("probe");
        assert_eq!(probe.kind, ProbeKind::Tcp);
        assert_eq!(probe.timeout_ms, 250);
    }

    #[test]
    fn missing_env_file_is_not_fatal() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("devdeck.yml");
        fs::write(
            &path,
            "tasks:\n  - name: a\n    command: run\n    env: [X=1]\n    env_file: missing.env\n",
        )
        .expect("write");
        let config = load_tasks(&path).expect("load");
        assert_eq!(config.tasks[0].env, vec!["X=1"]);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("devdeck.toml");
        fs::write(&path, "tasks = []").expect("write");
        assert!(matches!(
            load_tasks(&path),
            Err(ConfigError::UnsupportedExtension(ext)) if ext == "toml"
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempdir().expect("tempdir");
        assert!(matches!(
            load_tasks(&dir.path().join("absent.yaml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn validation_catches_bad_definitions() {
        let dup = "tasks:\n  - {name: a, command: x}\n  - {name: a, command: y}\n";
        let config = parse_config(dup, "yaml").expect("parse");
        assert!(matches!(validate(&config.tasks), Err(ConfigError::DuplicateTask(name)) if name == "a"));

        let empty = "tasks:\n  - {name: a, command: '  '}\n";
        let config = parse_config(empty, "yaml").expect("parse");
        assert!(matches!(validate(&config.tasks), Err(ConfigError::EmptyCommand(_))));

        let unnamed = "tasks:\n  - {name: '', command: x}\n";
        let config = parse_config(unnamed, "yaml").expect("parse");
        assert!(matches!(validate(&config.tasks), Err(ConfigError::EmptyName(0))));

        let dangling = "tasks:\n  - {name: a, command: x, depends_on: [b]}\n";
        let config = parse_config(dangling, "yaml").expect("parse");
        assert!(matches!(
            validate(&config.tasks),
            Err(ConfigError::UnknownDependency { dependency, .. }) if dependency == "b"
        ));

        let env = "tasks:\n  - {name: a, command: x, env: [NOPE]}\n";
        let config = parse_config(env, "yaml").expect("parse");
        assert!(matches!(validate(&config.tasks), Err(ConfigError::MalformedEnv { .. })));
    }

    #[test]
    fn documents_without_a_task_list_are_rejected() {
        let documents = [
            ("", "yaml"),
            ("  \n", "yml"),
            ("tasks:\n", "yaml"),
            ("theme: {}\n", "yaml"),
            ("{}", "json"),
        ];
        for (content, ext) in documents {
            assert!(
                matches!(parse_config(content, ext), Err(ConfigError::MissingTasks)),
                "{content:?} as {ext} should be rejected"
            );
        }
        let explicit = parse_config("tasks: []\n", "yaml").expect("explicit empty list");
        assert!(explicit.tasks.is_empty());
    }

    #[test]
    fn truncated_file_is_a_load_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("devdeck.yaml");
        fs::write(&path, "").expect("write");
        assert!(matches!(load_tasks(&path), Err(ConfigError::MissingTasks)));
    }

    #[test]
    fn malformed_yaml_is_reported() {
        assert!(matches!(
            parse_config("tasks: [unclosed", "yaml"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(matches!(parse_config("{", "json"), Err(ConfigError::Json(_))));
    }
}
