use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::limits::MAX_NODES;
use crate::model::NodeId;
use crate::scheduler::SchedulerSettings;
use crate::store::{NodeRegistry, StoreConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}, {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}, {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {var}={value:?}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("no epoch configured (set LOTBOOK_EPOCH)")]
    MissingEpoch,
    #[error("no nodes configured (set LOTBOOK_NODES)")]
    NoNodes,
    #[error("too many nodes: {0}")]
    TooManyNodes(usize),
}

/// Everything needed to open a store and build a scheduler.
///
/// Sources, later wins: defaults, the JSON file named by `LOTBOOK_CONFIG`,
/// then the individual `LOTBOOK_*` variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub nodes: Vec<NodeId>,
    /// First day of the horizon. Truncated to the hour by the scheduler.
    pub epoch: Option<DateTime<Utc>>,
    pub scheduler: SchedulerSettings,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("LOTBOOK_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(db) = lookup("LOTBOOK_DB") {
            config.store.path = match db.as_str() {
                "" | ":memory:" => None,
                _ => Some(PathBuf::from(db)),
            };
        }
        if let Some(raw) = lookup("LOTBOOK_NODES") {
            config.nodes = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse("LOTBOOK_NODES", s))
                .collect::<Result<_, _>>()?;
        }
        if let Some(raw) = lookup("LOTBOOK_EPOCH") {
            let epoch = DateTime::parse_from_rfc3339(&raw).map_err(|e| ConfigError::Env {
                var: "LOTBOOK_EPOCH",
                value: raw.clone(),
                reason: e.to_string(),
            })?;
            config.epoch = Some(epoch.with_timezone(&Utc));
        }
        if let Some(raw) = lookup("LOTBOOK_POOL_SIZE") {
            config.store.pool_size = parse("LOTBOOK_POOL_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("LOTBOOK_BUSY_TIMEOUT_MS") {
            config.store.busy_timeout_ms = parse("LOTBOOK_BUSY_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("LOTBOOK_STATEMENT_TIMEOUT_MS") {
            // 0 turns the deadline off.
            let ms: u64 = parse("LOTBOOK_STATEMENT_TIMEOUT_MS", &raw)?;
            config.scheduler.statement_timeout_ms = (ms > 0).then_some(ms);
        }
        if let Some(raw) = lookup("LOTBOOK_COALESCE") {
            config.scheduler.coalesce = parse("LOTBOOK_COALESCE", &raw)?;
        }
        if let Some(raw) = lookup("LOTBOOK_METRICS_PORT") {
            config.metrics_port = Some(parse("LOTBOOK_METRICS_PORT", &raw)?);
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn epoch(&self) -> Result<DateTime<Utc>, ConfigError> {
        self.epoch.ok_or(ConfigError::MissingEpoch)
    }

    /// Allow-list of node tables for the store.
    pub fn registry(&self) -> Result<NodeRegistry, ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        let registry = NodeRegistry::new(self.nodes.iter().copied());
        if registry.len() > MAX_NODES {
            return Err(ConfigError::TooManyNodes(registry.len()));
        }
        Ok(registry)
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::TimeZone;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| vars.get(k).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.store.path, None);
        assert!(config.scheduler.coalesce);
        assert!(matches!(config.epoch(), Err(ConfigError::MissingEpoch)));
        assert!(matches!(config.registry(), Err(ConfigError::NoNodes)));
    }

    #[test]
    fn env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("LOTBOOK_DB", "/tmp/slots.db"),
            ("LOTBOOK_NODES", "xx, fi"),
            ("LOTBOOK_EPOCH", "2024-01-01T05:30:00+02:00"),
            ("LOTBOOK_POOL_SIZE", "8"),
            ("LOTBOOK_STATEMENT_TIMEOUT_MS", "0"),
            ("LOTBOOK_COALESCE", "false"),
            ("LOTBOOK_METRICS_PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(config.store.path, Some(PathBuf::from("/tmp/slots.db")));
        assert_eq!(config.store.pool_size, 8);
        assert_eq!(config.registry().unwrap().len(), 2);
        assert_eq!(
            config.epoch().unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 3, 30, 0).unwrap()
        );
        assert_eq!(config.scheduler.statement_timeout_ms, None);
        assert!(!config.scheduler.coalesce);
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn invalid_node_rejected() {
        let err = Config::from_lookup(lookup(&[("LOTBOOK_NODES", "xx,timeslot")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "LOTBOOK_NODES", .. }), "{err}");
        assert!(err.to_string().contains("timeslot"));
    }

    #[test]
    fn invalid_number_rejected() {
        let err = Config::from_lookup(lookup(&[("LOTBOOK_POOL_SIZE", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "LOTBOOK_POOL_SIZE", .. }));
    }

    #[test]
    fn file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lotbook.json");
        std::fs::write(
            &path,
            r#"{
                "store": { "path": "/var/lib/lotbook.db", "pool_size": 2 },
                "nodes": ["xx"],
                "epoch": "2024-01-01T00:00:00Z",
                "scheduler": { "coalesce": false }
            }"#,
        )
        .unwrap();

        let config = Config::from_lookup(lookup(&[
            ("LOTBOOK_CONFIG", path.to_str().unwrap()),
            ("LOTBOOK_POOL_SIZE", "6"),
        ]))
        .unwrap();
        assert_eq!(config.store.path, Some(PathBuf::from("/var/lib/lotbook.db")));
        assert_eq!(config.store.pool_size, 6);
        assert_eq!(config.store.busy_timeout_ms, StoreConfig::default().busy_timeout_ms);
        assert_eq!(config.nodes, vec!["xx".parse().unwrap()]);
        assert!(!config.scheduler.coalesce);
        assert_eq!(
            config.scheduler.statement_timeout_ms,
            SchedulerSettings::default().statement_timeout_ms
        );
    }

    #[test]
    fn unreadable_file_reported() {
        let err = Config::from_lookup(lookup(&[("LOTBOOK_CONFIG", "/nonexistent/lotbook.json")])).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
