//! The in-memory graph store.
//!
//! Owns the two interlocked maps and enforces the structural invariants:
//! every relation endpoint resolves to a live entity, the configured
//! capacity limits are never exceeded, and deleting an entity removes
//! every relation that mentions it. Only primitive mutations are exposed;
//! the engine facade provides locking, validation, and bookkeeping on
//! top.

use chrono::{DateTime, Utc};

use crate::models::{Direction, Entity, EntityId, KnowledgeGraph, Relation, RelationId};
use crate::{Error, Result};

/// The two id-keyed maps plus capacity limits.
///
/// Not internally synchronized; the engine serializes access through its
/// read/write lock.
#[derive(Debug, Clone)]
pub struct GraphStore {
    graph: KnowledgeGraph,
    max_entities: usize,
    max_relations: usize,
}

impl GraphStore {
    /// Creates an empty store with the given capacity limits.
    #[must_use]
    pub fn new(max_entities: usize, max_relations: usize) -> Self {
        Self {
            graph: KnowledgeGraph::new(),
            max_entities,
            max_relations,
        }
    }

    /// Returns the underlying graph for search and serialization.
    #[must_use]
    pub const fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    /// Replaces the entire graph, e.g. when hydrating from a snapshot.
    pub fn replace_all(&mut self, graph: KnowledgeGraph) {
        self.graph = graph;
    }

    /// Returns the current mutation counter.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.graph.version
    }

    /// Returns the timestamp of the last mutation.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.graph.updated_at
    }

    /// Bumps the version and the last-mutation timestamp.
    ///
    /// Called by the facade once per successful mutation.
    pub fn touch(&mut self) {
        self.graph.version += 1;
        self.graph.updated_at = Utc::now();
    }

    /// Returns the number of entities stored.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.graph.entities.len()
    }

    /// Returns the number of relations stored.
    #[must_use]
    pub fn relation_count(&self) -> usize {
        self.graph.relations.len()
    }

    /// Looks up an entity by id.
    #[must_use]
    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.graph.entities.get(id)
    }

    /// Looks up an entity by id, mutably.
    #[must_use]
    pub fn entity_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        self.graph.entities.get_mut(id)
    }

    /// Finds the first entity whose name matches case-insensitively,
    /// in insertion order.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Entity> {
        self.graph.entities.values().find(|e| e.matches_name(name))
    }

    /// Looks up a relation by id.
    #[must_use]
    pub fn relation(&self, id: &RelationId) -> Option<&Relation> {
        self.graph.relations.get(id)
    }

    /// Iterates entities in insertion order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.graph.entities.values()
    }

    /// Iterates relations in insertion order.
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.graph.relations.values()
    }

    /// Returns the relations touching an entity, filtered by direction,
    /// in insertion order.
    #[must_use]
    pub fn relations_for(&self, id: &EntityId, direction: Direction) -> Vec<Relation> {
        self.graph
            .relations
            .values()
            .filter(|r| match direction {
                Direction::Outgoing => r.from_entity == *id,
                Direction::Incoming => r.to_entity == *id,
                Direction::All => r.mentions(id),
            })
            .cloned()
            .collect()
    }

    /// Inserts a new entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] at the entity cap, or
    /// [`Error::Invariant`] on a duplicate id. Ids are engine-assigned,
    /// so a collision is a programming error, not bad input.
    pub fn put_entity(&mut self, entity: Entity) -> Result<()> {
        if self.graph.entities.len() >= self.max_entities {
            return Err(Error::CapacityExceeded {
                resource: "entities",
                limit: self.max_entities,
            });
        }
        if self.graph.entities.contains_key(&entity.id) {
            return Err(Error::Invariant(format!(
                "duplicate entity id: {}",
                entity.id
            )));
        }
        self.graph.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    /// Inserts a new relation after validating both endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if either endpoint is missing,
    /// [`Error::CapacityExceeded`] at the relation cap, or
    /// [`Error::Invariant`] on a duplicate id.
    pub fn put_relation(&mut self, relation: Relation) -> Result<()> {
        if !self.graph.entities.contains_key(&relation.from_entity) {
            return Err(Error::NotFound {
                what: format!("entity {}", relation.from_entity),
            });
        }
        if !self.graph.entities.contains_key(&relation.to_entity) {
            return Err(Error::NotFound {
                what: format!("entity {}", relation.to_entity),
            });
        }
        if self.graph.relations.len() >= self.max_relations {
            return Err(Error::CapacityExceeded {
                resource: "relations",
                limit: self.max_relations,
            });
        }
        if self.graph.relations.contains_key(&relation.id) {
            return Err(Error::Invariant(format!(
                "duplicate relation id: {}",
                relation.id
            )));
        }
        self.graph.relations.insert(relation.id.clone(), relation);
        Ok(())
    }

    /// Removes an entity and every relation that mentions it.
    ///
    /// One pass over the relations map, then the entity itself. Returns
    /// the removed entity and the number of cascaded relations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the entity is absent.
    pub fn remove_entity_cascade(&mut self, id: &EntityId) -> Result<(Entity, usize)> {
        if !self.graph.entities.contains_key(id) {
            return Err(Error::NotFound {
                what: format!("entity {id}"),
            });
        }

        let before = self.graph.relations.len();
        self.graph.relations.retain(|_, r| !r.mentions(id));
        let cascaded = before - self.graph.relations.len();

        let entity = self.graph.entities.shift_remove(id).ok_or_else(|| {
            Error::Invariant(format!("entity {id} vanished during cascade"))
        })?;

        Ok((entity, cascaded))
    }

    /// Removes a relation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the relation is absent.
    pub fn remove_relation(&mut self, id: &RelationId) -> Result<Relation> {
        self.graph.relations.shift_remove(id).ok_or_else(|| Error::NotFound {
            what: format!("relation {id}"),
        })
    }

    /// Empties both maps.
    ///
    /// The version counter survives: clearing is itself a mutation, and
    /// the counter must keep increasing across it.
    pub fn clear(&mut self) {
        self.graph.entities.clear();
        self.graph.relations.clear();
    }
}
