//! Knowledge graph types: entities, relations, and the graph container.
//!
//! Entities are typed nodes carrying free-text observations and open-ended
//! properties; relations are directed, typed edges with a strength in
//! (0, 1]. Both are keyed by opaque, engine-assigned identifiers. The
//! [`KnowledgeGraph`] container is the unit of serialization: its map
//! ordering is insertion order, which is what makes scan results and
//! score tie-breaks deterministic.
//!
//! # Example
//!
//! ```rust
//! use engram::models::{Entity, Relation};
//!
//! let alice = Entity::new("Alice", "person")
//!     .with_observations(vec!["Works on the storage layer".to_string()]);
//! let project = Entity::new("Engram", "project");
//!
//! let rel = Relation::new(alice.id.clone(), project.id.clone(), "works_on")
//!     .with_strength(0.8);
//! assert!(rel.strength > 0.0 && rel.strength <= 1.0);
//! ```

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a graph entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new unique entity ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("ent_{}", Uuid::new_v4().simple()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a graph relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(String);

impl RelationId {
    /// Creates a relation ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new unique relation ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("rel_{}", Uuid::new_v4().simple()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A node in the knowledge graph.
///
/// Names are looked up case-insensitively but stored verbatim; the
/// `entity_type` tag is case-sensitive. Observations are append-only by
/// contract: updates extend the list, they never replace it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier, assigned at creation and immutable.
    pub id: EntityId,
    /// Human-readable name. Not unique.
    pub name: String,
    /// Short type tag, e.g. "person", "concept".
    pub entity_type: String,
    /// Ordered free-text observations.
    #[serde(default)]
    pub observations: Vec<String>,
    /// Open-ended key/value properties.
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Creates a new entity with a generated id and current timestamps.
    #[must_use]
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::generate(),
            name: name.into(),
            entity_type: entity_type.into(),
            observations: Vec::new(),
            properties: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the initial observations.
    #[must_use]
    pub fn with_observations(mut self, observations: Vec<String>) -> Self {
        self.observations = observations;
        self
    }

    /// Sets the initial properties.
    #[must_use]
    pub fn with_properties(mut self, properties: HashMap<String, serde_json::Value>) -> Self {
        self.properties = properties;
        self
    }

    /// Returns true if this entity's name matches case-insensitively.
    ///
    /// Uses full Unicode lowercasing on both sides.
    #[must_use]
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Unique identifier, assigned at creation and immutable.
    pub id: RelationId,
    /// Source entity. Must exist in the graph.
    pub from_entity: EntityId,
    /// Target entity. Must exist in the graph.
    pub to_entity: EntityId,
    /// Short type tag, e.g. "knows", "depends_on".
    pub relation_type: String,
    /// Open-ended key/value properties.
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    /// Edge strength in (0, 1]. Non-positive input normalizes to 1.0.
    pub strength: f64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Relation {
    /// Creates a new relation with a generated id and strength 1.0.
    #[must_use]
    pub fn new(
        from_entity: EntityId,
        to_entity: EntityId,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            id: RelationId::generate(),
            from_entity,
            to_entity,
            relation_type: relation_type.into(),
            properties: HashMap::new(),
            strength: 1.0,
            created_at: Utc::now(),
        }
    }

    /// Sets the strength, normalizing non-positive values to 1.0 and
    /// clamping the upper bound to 1.0.
    #[must_use]
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = if strength <= 0.0 {
            1.0
        } else {
            strength.min(1.0)
        };
        self
    }

    /// Sets the initial properties.
    #[must_use]
    pub fn with_properties(mut self, properties: HashMap<String, serde_json::Value>) -> Self {
        self.properties = properties;
        self
    }

    /// Returns true if this relation references the given entity on
    /// either endpoint.
    #[must_use]
    pub fn mentions(&self, id: &EntityId) -> bool {
        self.from_entity == *id || self.to_entity == *id
    }
}

/// Direction filter for relation queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Relations whose source is the entity.
    Outgoing,
    /// Relations whose target is the entity.
    Incoming,
    /// Relations touching the entity on either side.
    #[default]
    All,
}

impl Direction {
    /// Parses a direction; anything other than "outgoing"/"incoming"
    /// means [`Direction::All`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "outgoing" => Self::Outgoing,
            "incoming" => Self::Incoming,
            _ => Self::All,
        }
    }

    /// Returns the direction as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Outgoing => "outgoing",
            Self::Incoming => "incoming",
            Self::All => "all",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The serializable graph container.
///
/// `version` increases by one on every successful mutation and
/// `updated_at` tracks the last mutation time; together they order the
/// snapshot against the in-memory state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    /// Entities keyed by id, in insertion order.
    #[serde(default)]
    pub entities: IndexMap<EntityId, Entity>,
    /// Relations keyed by id, in insertion order.
    #[serde(default)]
    pub relations: IndexMap<RelationId, Relation>,
    /// Monotonic mutation counter.
    #[serde(default)]
    pub version: u64,
    /// Timestamp of the last mutation.
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeGraph {
    /// Creates an empty graph at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: IndexMap::new(),
            relations: IndexMap::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

impl Default for KnowledgeGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// An entity bundled with every relation that mentions it.
///
/// Returned by `read_graph` and `open_nodes`.
#[derive(Debug, Clone, Serialize)]
pub struct EntityWithRelations {
    /// The entity.
    pub entity: Entity,
    /// All relations touching the entity, in insertion order.
    pub relations: Vec<Relation>,
}

/// Aggregate counts and bookkeeping for the graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphStatistics {
    /// Total number of entities.
    pub total_entities: usize,
    /// Total number of relations.
    pub total_relations: usize,
    /// Entity counts keyed by type tag.
    pub entities_by_type: HashMap<String, usize>,
    /// Relation counts keyed by type tag.
    pub relations_by_type: HashMap<String, usize>,
    /// Current graph version.
    pub version: u64,
    /// Timestamp of the last mutation.
    pub updated_at: DateTime<Utc>,
    /// Size of the snapshot file in bytes, when one exists.
    pub snapshot_bytes: Option<u64>,
}
