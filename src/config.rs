//! Engine configuration.
//!
//! [`EngineConfig`] covers the recognized options: snapshot location,
//! capacity limits, persistence toggles, and the flusher interval. It
//! deserializes from TOML with per-field defaults, so a partial config
//! file is always valid:
//!
//! ```toml
//! storage_path = "/var/lib/engram"
//! max_entities = 20000
//! auto_save_interval_secs = 30
//! snapshot_recovery = "fail_fast"
//! ```
//!
//! Environment variables and CLI flags belong to the hosting program.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Default cap on the number of entities in the graph.
pub const DEFAULT_MAX_ENTITIES: usize = 10_000;

/// Default cap on the number of relations in the graph.
pub const DEFAULT_MAX_RELATIONS: usize = 50_000;

/// Recovery policy applied when the on-disk snapshot fails to parse.
///
/// The snapshot is the only durable copy of the graph, so this choice
/// trades availability against data inspection:
///
/// - [`DiscardAndWarn`](Self::DiscardAndWarn) logs a warning and starts
///   from an empty graph. The corrupt file is overwritten on the next
///   save.
/// - [`FailFast`](Self::FailFast) surfaces a `Persistence` error from
///   `initialize` so an operator can inspect the file before any write
///   touches it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotRecovery {
    /// Log a warning and start empty (the default).
    #[default]
    DiscardAndWarn,
    /// Refuse to initialize until the file is repaired or removed.
    FailFast,
}

/// Main configuration for the memory engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Directory for the snapshot file; created if missing.
    pub storage_path: PathBuf,
    /// Maximum number of entities. Zero falls back to the default.
    pub max_entities: usize,
    /// Maximum number of relations. Zero falls back to the default.
    pub max_relations: usize,
    /// Whether snapshot read/write is enabled at all.
    pub enable_persistence: bool,
    /// Flusher tick interval in seconds. Zero disables the flusher.
    pub auto_save_interval_secs: u64,
    /// What to do when the snapshot exists but cannot be parsed.
    pub snapshot_recovery: SnapshotRecovery,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from(".engram"),
            max_entities: DEFAULT_MAX_ENTITIES,
            max_relations: DEFAULT_MAX_RELATIONS,
            enable_persistence: true,
            auto_save_interval_secs: 60,
            snapshot_recovery: SnapshotRecovery::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from a TOML document.
    ///
    /// Missing fields take their defaults; unknown fields are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] if the document is not valid TOML
    /// or contains unrecognized keys.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| Error::BadRequest(format!("invalid config: {e}")))
    }

    /// Returns a copy with zero limits replaced by their defaults.
    ///
    /// The engine normalizes its configuration once at construction so
    /// every later capacity check sees a positive limit.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.max_entities == 0 {
            self.max_entities = DEFAULT_MAX_ENTITIES;
        }
        if self.max_relations == 0 {
            self.max_relations = DEFAULT_MAX_RELATIONS;
        }
        self
    }

    /// Returns the flusher interval as a [`Duration`].
    ///
    /// A zero duration means the flusher is disabled.
    #[must_use]
    pub const fn auto_save_interval(&self) -> Duration {
        Duration::from_secs(self.auto_save_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_entities, DEFAULT_MAX_ENTITIES);
        assert_eq!(config.max_relations, DEFAULT_MAX_RELATIONS);
        assert!(config.enable_persistence);
        assert_eq!(config.auto_save_interval(), Duration::from_secs(60));
        assert_eq!(config.snapshot_recovery, SnapshotRecovery::DiscardAndWarn);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = EngineConfig::from_toml_str(
            r#"
            storage_path = "/tmp/engram-test"
            max_entities = 42
            "#,
        )
        .unwrap();

        assert_eq!(config.storage_path, PathBuf::from("/tmp/engram-test"));
        assert_eq!(config.max_entities, 42);
        assert_eq!(config.max_relations, DEFAULT_MAX_RELATIONS);
    }

    #[test]
    fn test_from_toml_recovery_policy() {
        let config = EngineConfig::from_toml_str("snapshot_recovery = \"fail_fast\"").unwrap();
        assert_eq!(config.snapshot_recovery, SnapshotRecovery::FailFast);
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        let result = EngineConfig::from_toml_str("no_such_option = true");
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_normalized_replaces_zero_limits() {
        let config = EngineConfig {
            max_entities: 0,
            max_relations: 0,
            ..EngineConfig::default()
        }
        .normalized();

        assert_eq!(config.max_entities, DEFAULT_MAX_ENTITIES);
        assert_eq!(config.max_relations, DEFAULT_MAX_RELATIONS);
    }

    #[test]
    fn test_normalized_keeps_explicit_limits() {
        let config = EngineConfig {
            max_entities: 2,
            max_relations: 3,
            ..EngineConfig::default()
        }
        .normalized();

        assert_eq!(config.max_entities, 2);
        assert_eq!(config.max_relations, 3);
    }
}
