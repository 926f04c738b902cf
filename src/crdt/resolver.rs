//! Merge strategies and conflict reporting.
//!
//! The resolver is a stateless orchestrator: given the local record and
//! a remote event for the same memory id it always produces a merged
//! record (resolution never fails) and independently reports whether
//! the pair actually conflicted.
//!
//! Tie-breaking is deliberately strict: `LastWriteWins` and
//! `ImportanceMax` adopt the remote only on a strict `>`, so replaying
//! a record's own state is a no-op and both strategies are idempotent.

use chrono::Utc;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::clock::VectorClock;
use crate::models::{META_ENTITIES, META_TAGS};
use crate::models::{MemoryEvent, MemoryRecord};

/// A user-supplied merge function for [`MergeStrategy::Custom`].
pub type CustomResolver = Arc<dyn Fn(&MemoryRecord, &MemoryEvent) -> MemoryRecord + Send + Sync>;

/// Strategy used to merge a remote event into a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Adopt the remote payload iff its timestamp is strictly newer.
    #[default]
    LastWriteWins,
    /// Field-wise merge: longer content, non-empty embedding, max
    /// importance, metadata union with set-merged tags.
    MergeAll,
    /// Adopt the remote payload iff its importance is strictly higher.
    ImportanceMax,
    /// Order by vector-clock causality; merge-all when concurrent;
    /// last-write-wins when either clock is missing or malformed.
    VectorClockCausal,
    /// Delegate to a registered [`CustomResolver`]; last-write-wins
    /// when none is registered.
    Custom,
}

impl MergeStrategy {
    /// Returns the strategy as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LastWriteWins => "last_write_wins",
            Self::MergeAll => "merge_all",
            Self::ImportanceMax => "importance_max",
            Self::VectorClockCausal => "vector_clock_causal",
            Self::Custom => "custom",
        }
    }

    /// Parses a strategy from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "last_write_wins" => Some(Self::LastWriteWins),
            "merge_all" => Some(Self::MergeAll),
            "importance_max" => Some(Self::ImportanceMax),
            "vector_clock_causal" => Some(Self::VectorClockCausal),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A detected concurrent-update conflict and how it was resolved.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConflictReport {
    /// The local record before resolution.
    pub local: MemoryRecord,
    /// The remote event that triggered resolution.
    pub remote: MemoryEvent,
    /// The strategy that produced `resolved`.
    pub strategy: MergeStrategy,
    /// The record that replaced the local one.
    pub resolved: MemoryRecord,
    /// Contents differed while the local copy was newer.
    pub content_changed: bool,
    /// Importance values differed.
    pub importance_changed: bool,
    /// Tag sets differed.
    pub tags_merged: bool,
}

/// Outcome of resolving one event against one record.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Resolution {
    /// The record to store.
    pub merged: MemoryRecord,
    /// Present iff the update pair conflicted (see [`ConflictReport`]).
    pub conflict: Option<ConflictReport>,
}

/// Pure merge orchestrator.
///
/// Holds the configured strategy and, for [`MergeStrategy::Custom`],
/// the registered function. No I/O, no locks; safe to call from inside
/// the engine's critical section.
#[derive(Clone)]
pub struct ConflictResolver {
    strategy: MergeStrategy,
    custom: Option<CustomResolver>,
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("strategy", &self.strategy)
            .field("custom", &self.custom.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(MergeStrategy::default())
    }
}

impl ConflictResolver {
    /// Creates a resolver with the given strategy.
    #[must_use]
    pub const fn new(strategy: MergeStrategy) -> Self {
        Self {
            strategy,
            custom: None,
        }
    }

    /// Registers a custom merge function, used by [`MergeStrategy::Custom`].
    #[must_use]
    pub fn with_custom(mut self, custom: CustomResolver) -> Self {
        self.custom = Some(custom);
        self
    }

    /// Returns the configured strategy.
    #[must_use]
    pub const fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Resolves a remote event against the local record.
    ///
    /// Always produces a merged record; conflict detection runs
    /// independently of the strategy and is reported alongside.
    #[must_use]
    pub fn resolve(&self, local: &MemoryRecord, event: &MemoryEvent) -> Resolution {
        let merged = match self.strategy {
            MergeStrategy::LastWriteWins => last_write_wins(local, event),
            MergeStrategy::MergeAll => merge_all(local, event),
            MergeStrategy::ImportanceMax => importance_max(local, event),
            MergeStrategy::VectorClockCausal => vector_clock_causal(local, event),
            MergeStrategy::Custom => self.custom.as_ref().map_or_else(
                || last_write_wins(local, event),
                |custom| custom(local, event),
            ),
        };

        let conflict = detect_conflict(local, event, self.strategy, &merged);
        Resolution { merged, conflict }
    }
}

/// Adopts the event's payload into a copy of the local record.
///
/// Only content, embedding, importance, and timestamps move; identity,
/// classification, and metadata stay local.
fn adopt_event(local: &MemoryRecord, event: &MemoryEvent) -> MemoryRecord {
    let mut merged = local.clone();
    merged.content = event.content.clone();
    merged.embedding = event.embedding.clone();
    merged.importance = event.importance.clamp(0.0, 1.0);
    merged.updated_at = event.timestamp;
    merged.last_access = Utc::now();
    merged
}

fn last_write_wins(local: &MemoryRecord, event: &MemoryEvent) -> MemoryRecord {
    if event.timestamp > local.updated_at {
        adopt_event(local, event)
    } else {
        local.clone()
    }
}

fn importance_max(local: &MemoryRecord, event: &MemoryEvent) -> MemoryRecord {
    if event.importance > local.importance {
        adopt_event(local, event)
    } else {
        local.clone()
    }
}

fn merge_all(local: &MemoryRecord, event: &MemoryEvent) -> MemoryRecord {
    let mut merged = local.clone();

    // Longer content wins; on equal length the newer side wins.
    if event.content.len() > local.content.len()
        || (event.content.len() == local.content.len() && event.timestamp > local.updated_at)
    {
        merged.content = event.content.clone();
    }

    if !event.embedding.is_empty() {
        merged.embedding = event.embedding.clone();
    }

    merged.importance = local
        .importance
        .max(event.importance.clamp(0.0, 1.0));
    merged.updated_at = local.updated_at.max(event.timestamp);
    merged.last_access = Utc::now();

    // Metadata union, remote overriding on collision. Only tags and
    // entities get merge rules of their own below.
    for (key, value) in &event.metadata {
        if matches!(key.as_str(), META_TAGS | META_ENTITIES) {
            continue;
        }
        merged.metadata.insert(key.clone(), value.clone());
    }

    let tags = merged_tags(local, event);
    if !tags.is_empty() {
        merged.set_tags(&tags);
    }

    let entities = merged_entities(local, event);
    if !entities.is_empty() {
        merged
            .metadata
            .insert(META_ENTITIES.to_string(), serde_json::Value::Array(entities));
    }

    merged
}

fn vector_clock_causal(local: &MemoryRecord, event: &MemoryEvent) -> MemoryRecord {
    let local_clock = local
        .vector_clock()
        .and_then(|encoded| VectorClock::decode(encoded).ok());
    let remote_clock = match event.vector_clock.as_str() {
        "" => None,
        encoded => VectorClock::decode(encoded).ok(),
    };

    let (Some(local_clock), Some(remote_clock)) = (local_clock, remote_clock) else {
        // Missing or malformed clock on either side: causality is
        // unknowable, fall back to wall-clock ordering.
        return last_write_wins(local, event);
    };

    if remote_clock.happens_before(&local_clock) {
        local.clone()
    } else if local_clock.happens_before(&remote_clock) {
        let mut merged = adopt_event(local, event);
        merged.set_vector_clock(remote_clock.encode());
        merged
    } else {
        let mut merged = merge_all(local, event);
        merged.set_vector_clock(local_clock.merged_with(&remote_clock).encode());
        merged
    }
}

/// Union of the local and remote tag sets.
fn merged_tags(local: &MemoryRecord, event: &MemoryEvent) -> BTreeSet<String> {
    let mut tags = local.tags();
    tags.extend(event.tag_set());
    if let Some(value) = event.metadata.get(META_TAGS) {
        tags.extend(value_tags(value));
    }
    tags
}

fn value_tags(value: &serde_json::Value) -> BTreeSet<String> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Merges entity references by id, keeping the higher-confidence copy.
fn merged_entities(local: &MemoryRecord, event: &MemoryEvent) -> Vec<serde_json::Value> {
    let mut by_id: indexmap::IndexMap<String, serde_json::Value> = indexmap::IndexMap::new();
    let mut anonymous = Vec::new();

    let local_entities = local
        .metadata
        .get(META_ENTITIES)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let remote_entities = event
        .entities
        .iter()
        .chain(
            event
                .metadata
                .get(META_ENTITIES)
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten(),
        )
        .cloned();

    for entity in local_entities.into_iter().chain(remote_entities) {
        let Some(id) = entity.get("id").and_then(|v| v.as_str()).map(ToString::to_string) else {
            anonymous.push(entity);
            continue;
        };
        match by_id.get(&id) {
            Some(existing) if confidence_of(existing) >= confidence_of(&entity) => {}
            _ => {
                by_id.insert(id, entity);
            }
        }
    }

    by_id.into_values().chain(anonymous).collect()
}

fn confidence_of(entity: &serde_json::Value) -> f64 {
    entity
        .get("confidence")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0)
}

/// Conflict detection, independent of the chosen strategy.
///
/// A conflict exists iff contents differ while the local copy is newer,
/// or importances differ, or the tag sets differ.
fn detect_conflict(
    local: &MemoryRecord,
    event: &MemoryEvent,
    strategy: MergeStrategy,
    merged: &MemoryRecord,
) -> Option<ConflictReport> {
    let content_changed = local.content != event.content && local.updated_at > event.timestamp;
    let importance_changed = (local.importance - event.importance).abs() > f64::EPSILON;
    let tags_merged = local.tags() != event.tag_set();

    if !(content_changed || importance_changed || tags_merged) {
        return None;
    }

    Some(ConflictReport {
        local: local.clone(),
        remote: event.clone(),
        strategy,
        resolved: merged.clone(),
        content_changed,
        importance_changed,
        tags_merged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemoryId, MemoryType};
    use chrono::{Duration, Utc};

    fn record(content: &str, importance: f64) -> MemoryRecord {
        let mut r = MemoryRecord::new(content, MemoryType::Semantic, importance);
        r.id = MemoryId::new("mem_1");
        r
    }

    fn event_for(record: &MemoryRecord, content: &str, importance: f64) -> MemoryEvent {
        MemoryEvent {
            memory_id: record.id.clone(),
            user_id: record.user_id.clone(),
            session_id: record.session_id.clone(),
            content: content.to_string(),
            embedding: Vec::new(),
            importance,
            timestamp: record.updated_at,
            vector_clock: String::new(),
            tags: Vec::new(),
            entities: Vec::new(),
            metadata: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn test_lww_adopts_newer_remote() {
        let local = record("old", 0.5);
        let mut event = event_for(&local, "new", 0.6);
        event.timestamp = local.updated_at + Duration::seconds(10);

        let resolver = ConflictResolver::new(MergeStrategy::LastWriteWins);
        let resolution = resolver.resolve(&local, &event);

        assert_eq!(resolution.merged.content, "new");
        assert_eq!(resolution.merged.updated_at, event.timestamp);
    }

    #[test]
    fn test_lww_tie_favors_local() {
        let local = record("local", 0.5);
        let event = event_for(&local, "remote", 0.5); // same timestamp

        let resolver = ConflictResolver::new(MergeStrategy::LastWriteWins);
        let resolution = resolver.resolve(&local, &event);

        assert_eq!(resolution.merged.content, "local");
    }

    #[test]
    fn test_lww_replaying_own_state_is_identity() {
        let local = record("same", 0.5);
        let event = event_for(&local, "same", 0.5);

        let resolver = ConflictResolver::new(MergeStrategy::LastWriteWins);
        let resolution = resolver.resolve(&local, &event);

        assert_eq!(resolution.merged, local);
        assert!(resolution.conflict.is_none());
    }

    #[test]
    fn test_merge_all_longer_content_wins_despite_older_timestamp() {
        let mut local = record("hello", 0.4);
        local.set_tags(&["a".to_string()].into_iter().collect());

        let mut event = event_for(&local, "hello world", 0.3);
        event.timestamp = local.updated_at - Duration::seconds(60);
        event.tags = vec!["b".to_string()];

        let resolver = ConflictResolver::new(MergeStrategy::MergeAll);
        let resolution = resolver.resolve(&local, &event);

        assert_eq!(resolution.merged.content, "hello world");
        assert!((resolution.merged.importance - 0.4).abs() < f64::EPSILON);
        assert_eq!(resolution.merged.updated_at, local.updated_at);
        assert_eq!(
            resolution.merged.tags(),
            ["a".to_string(), "b".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn test_merge_all_equal_length_newer_wins() {
        let local = record("aaaa", 0.5);
        let mut event = event_for(&local, "bbbb", 0.5);
        event.timestamp = local.updated_at + Duration::seconds(5);

        let resolver = ConflictResolver::new(MergeStrategy::MergeAll);
        assert_eq!(resolver.resolve(&local, &event).merged.content, "bbbb");

        event.timestamp = local.updated_at - Duration::seconds(5);
        assert_eq!(resolver.resolve(&local, &event).merged.content, "aaaa");
    }

    #[test]
    fn test_merge_all_metadata_remote_overrides() {
        let mut local = record("x", 0.5);
        local
            .metadata
            .insert("color".to_string(), serde_json::json!("red"));
        local
            .metadata
            .insert("size".to_string(), serde_json::json!("large"));

        let mut event = event_for(&local, "x", 0.5);
        event
            .metadata
            .insert("color".to_string(), serde_json::json!("blue"));

        let resolver = ConflictResolver::new(MergeStrategy::MergeAll);
        let merged = resolver.resolve(&local, &event).merged;

        assert_eq!(merged.metadata.get("color"), Some(&serde_json::json!("blue")));
        assert_eq!(merged.metadata.get("size"), Some(&serde_json::json!("large")));
    }

    #[test]
    fn test_merge_all_clock_follows_generic_metadata_rule() {
        // The vector clock is not special-cased by merge-all: a remote
        // metadata value overrides, and absent that the local one stays.
        let mut local = record("x", 0.5);
        local.set_vector_clock("r1:5");

        let event = event_for(&local, "x", 0.5);
        let resolver = ConflictResolver::new(MergeStrategy::MergeAll);
        let merged = resolver.resolve(&local, &event).merged;
        assert_eq!(merged.vector_clock(), Some("r1:5"));

        let mut event = event_for(&local, "x", 0.5);
        event
            .metadata
            .insert("vector_clock".to_string(), serde_json::json!("r9:9"));
        let merged = resolver.resolve(&local, &event).merged;
        assert_eq!(merged.vector_clock(), Some("r9:9"));
    }

    #[test]
    fn test_merge_all_entities_keep_higher_confidence() {
        let mut local = record("x", 0.5);
        local.metadata.insert(
            "entities".to_string(),
            serde_json::json!([
                {"id": "ent_1", "name": "Alice", "confidence": 0.9},
                {"id": "ent_2", "name": "Bob", "confidence": 0.4},
            ]),
        );

        let mut event = event_for(&local, "x", 0.5);
        event.entities = vec![
            serde_json::json!({"id": "ent_2", "name": "Bob", "confidence": 0.8}),
            serde_json::json!({"id": "ent_3", "name": "Carol", "confidence": 0.7}),
        ];

        let resolver = ConflictResolver::new(MergeStrategy::MergeAll);
        let merged = resolver.resolve(&local, &event).merged;

        let entities = merged.metadata.get("entities").unwrap().as_array().unwrap();
        assert_eq!(entities.len(), 3);
        let bob = entities
            .iter()
            .find(|e| e.get("id").unwrap() == "ent_2")
            .unwrap();
        assert!((bob.get("confidence").unwrap().as_f64().unwrap() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_importance_max_strict() {
        let local = record("local", 0.5);

        let event = event_for(&local, "remote", 0.5);
        let resolver = ConflictResolver::new(MergeStrategy::ImportanceMax);
        assert_eq!(resolver.resolve(&local, &event).merged.content, "local");

        let event = event_for(&local, "remote", 0.6);
        assert_eq!(resolver.resolve(&local, &event).merged.content, "remote");
    }

    #[test]
    fn test_vector_clock_remote_dominated_keeps_local() {
        let mut local = record("local", 0.5);
        local.set_vector_clock("r1:2,r2:2");

        let mut event = event_for(&local, "remote", 0.5);
        event.vector_clock = "r1:1,r2:2".to_string();
        event.timestamp = local.updated_at + Duration::seconds(60);

        let resolver = ConflictResolver::new(MergeStrategy::VectorClockCausal);
        let merged = resolver.resolve(&local, &event).merged;

        assert_eq!(merged.content, "local");
    }

    #[test]
    fn test_vector_clock_local_dominated_adopts_remote() {
        let mut local = record("local", 0.5);
        local.set_vector_clock("r1:1");

        let mut event = event_for(&local, "remote", 0.5);
        event.vector_clock = "r1:2".to_string();
        event.timestamp = local.updated_at - Duration::seconds(60);

        let resolver = ConflictResolver::new(MergeStrategy::VectorClockCausal);
        let merged = resolver.resolve(&local, &event).merged;

        assert_eq!(merged.content, "remote");
        assert_eq!(merged.vector_clock(), Some("r1:2"));
    }

    #[test]
    fn test_vector_clock_concurrent_applies_merge_all() {
        // Neither clock dominates; merge-all semantics apply even though
        // the remote timestamp is older than the local update.
        let mut local = record("hello", 0.4);
        local.set_vector_clock("r1:2,r2:1");

        let mut event = event_for(&local, "hello world", 0.3);
        event.vector_clock = "r1:1,r2:2".to_string();
        event.timestamp = local.updated_at - Duration::seconds(60);

        let resolver = ConflictResolver::new(MergeStrategy::VectorClockCausal);
        let merged = resolver.resolve(&local, &event).merged;

        assert_eq!(merged.content, "hello world");
        assert!((merged.importance - 0.4).abs() < f64::EPSILON);
        assert_eq!(merged.vector_clock(), Some("r1:2,r2:2"));
    }

    #[test]
    fn test_vector_clock_malformed_falls_back_to_lww() {
        let mut local = record("local", 0.5);
        local.set_vector_clock("not a clock");

        let mut event = event_for(&local, "remote", 0.5);
        event.vector_clock = "r1:1".to_string();
        event.timestamp = local.updated_at + Duration::seconds(1);

        let resolver = ConflictResolver::new(MergeStrategy::VectorClockCausal);
        let merged = resolver.resolve(&local, &event).merged;

        // LWW fallback: newer remote wins.
        assert_eq!(merged.content, "remote");
    }

    #[test]
    fn test_custom_resolver_invoked() {
        let local = record("local", 0.5);
        let event = event_for(&local, "remote", 0.5);

        let resolver = ConflictResolver::new(MergeStrategy::Custom).with_custom(Arc::new(
            |local, event| {
                let mut merged = local.clone();
                merged.content = format!("{}+{}", local.content, event.content);
                merged
            },
        ));

        let merged = resolver.resolve(&local, &event).merged;
        assert_eq!(merged.content, "local+remote");
    }

    #[test]
    fn test_custom_without_function_falls_back_to_lww() {
        let local = record("local", 0.5);
        let mut event = event_for(&local, "remote", 0.5);
        event.timestamp = local.updated_at + Duration::seconds(1);

        let resolver = ConflictResolver::new(MergeStrategy::Custom);
        assert_eq!(resolver.resolve(&local, &event).merged.content, "remote");
    }

    #[test]
    fn test_conflict_detection_flags() {
        // Importance difference alone is a conflict.
        let local = record("same", 0.5);
        let event = event_for(&local, "same", 0.9);
        let resolver = ConflictResolver::default();
        let conflict = resolver.resolve(&local, &event).conflict.unwrap();
        assert!(!conflict.content_changed);
        assert!(conflict.importance_changed);
        assert!(!conflict.tags_merged);

        // Content difference with an older remote is a conflict.
        let local = record("local", 0.5);
        let mut event = event_for(&local, "remote", 0.5);
        event.timestamp = local.updated_at - Duration::seconds(1);
        let conflict = resolver.resolve(&local, &event).conflict.unwrap();
        assert!(conflict.content_changed);

        // Content difference with a newer remote is just a late write.
        let mut event = event_for(&local, "remote", 0.5);
        event.timestamp = local.updated_at + Duration::seconds(1);
        assert!(resolver.resolve(&local, &event).conflict.is_none());
    }

    #[test]
    fn test_strategy_parse_roundtrip() {
        for strategy in [
            MergeStrategy::LastWriteWins,
            MergeStrategy::MergeAll,
            MergeStrategy::ImportanceMax,
            MergeStrategy::VectorClockCausal,
            MergeStrategy::Custom,
        ] {
            assert_eq!(MergeStrategy::parse(strategy.as_str()), Some(strategy));
        }
        assert_eq!(MergeStrategy::parse("coin_flip"), None);
    }
}
