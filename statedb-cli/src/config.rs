use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("STATEDB_DB_PATH") {
        return PathBuf::from(path);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".statedb")
        .join("state.db")
}

fn default_namespace() -> String {
    std::env::var("STATEDB_NAMESPACE").unwrap_or_else(|_| "public".to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            namespace: default_namespace(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Apply command-line flags on top of the environment.
    pub fn with_overrides(mut self, db_path: Option<PathBuf>, namespace: Option<String>) -> Self {
        if let Some(db_path) = db_path {
            self.db_path = db_path;
        }
        if let Some(namespace) = namespace {
            self.namespace = namespace;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_environment() {
        let config = Config::from_env().with_overrides(
            Some(PathBuf::from("/srv/statedb/state.db")),
            Some("staging".to_string()),
        );
        assert_eq!(config.db_path, PathBuf::from("/srv/statedb/state.db"));
        assert_eq!(config.namespace, "staging");
    }

    #[test]
    fn missing_flags_keep_configured_values() {
        let base = Config {
            db_path: PathBuf::from("state.db"),
            namespace: "ci".to_string(),
        };
        let config = base.with_overrides(None, None);
        assert_eq!(config.db_path, PathBuf::from("state.db"));
        assert_eq!(config.namespace, "ci");
    }

    #[test]
    fn deserializes_explicit_values() {
        let config: Config =
            serde_json::from_str(r#"{"db_path": "/tmp/x.db", "namespace": "team_a"}"#).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.namespace, "team_a");
    }

    #[test]
    fn default_path_ends_in_state_db() {
        if std::env::var("STATEDB_DB_PATH").is_err() {
            let config = Config::default();
            assert!(config.db_path.ends_with(".statedb/state.db"));
        }
    }
}
