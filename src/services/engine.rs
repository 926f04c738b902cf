//! The engine facade.
//!
//! [`MemoryEngine`] is the coordinating object. It guards all state
//! (the graph store, the replicated memory records, the dirty flag, and
//! the initialized flag) behind a single read/write lock, validates
//! inputs, bumps the monotonic version on every mutation, and owns the
//! background flusher.
//!
//! # Concurrency
//!
//! Lookups, searches, statistics, and `health` take the read lock;
//! mutations, `save`, and `close` take the write lock. `save` holds the
//! write lock for its full duration (serialization plus the atomic
//! write), so callers should expect it to briefly exclude mutations.
//! The lock serializes all mutations into a total order and `version`
//! is that order's index; readers always observe a committed version.
//!
//! # Cancellation
//!
//! Every operation takes a [`CancelToken`], honored only at entry:
//! once an operation is inside the critical section it runs to
//! completion. The critical section is short and rolling back partial
//! graph mutations is not modeled.

use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::EngineConfig;
use crate::crdt::{ConflictResolver, Resolution};
use crate::models::{
    Direction, Entity, EntityId, EntityWithRelations, GraphStatistics, MemoryEvent, MemoryId,
    MemoryRecord, Relation, RelationId,
};
use crate::services::search::{self, ScoredEntity};
use crate::storage::{GraphStore, SnapshotStore};
use crate::{Error, Result};

/// A shareable cancellation flag.
///
/// Cloning yields a handle to the same flag; setting it makes every
/// not-yet-entered operation return [`Error::Cancelled`]. Operations
/// already inside the critical section run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if the flag is set.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything the single lock guards.
#[derive(Debug)]
struct EngineState {
    store: GraphStore,
    memories: IndexMap<MemoryId, MemoryRecord>,
    dirty: bool,
    initialized: bool,
}

#[derive(Debug)]
struct Flusher {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// The persistent agent memory engine.
///
/// See the [module docs](self) for the locking and cancellation model.
///
/// # Example
///
/// ```rust
/// use engram::{CancelToken, EngineConfig, MemoryEngine};
///
/// # fn main() -> engram::Result<()> {
/// let engine = MemoryEngine::new(EngineConfig {
///     enable_persistence: false,
///     ..EngineConfig::default()
/// });
/// let token = CancelToken::new();
/// engine.initialize(&token)?;
///
/// let entity = engine.create_entity(&token, "Rust", "technology", vec![], None)?;
/// let found = engine.get_entity_by_name(&token, "rust")?;
/// assert_eq!(found.id, entity.id);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryEngine {
    state: Arc<RwLock<EngineState>>,
    config: EngineConfig,
    snapshot: Option<SnapshotStore>,
    resolver: ConflictResolver,
    flusher: Mutex<Option<Flusher>>,
}

impl MemoryEngine {
    /// Creates an engine from a configuration.
    ///
    /// Zero capacity limits are normalized to their defaults. The
    /// default conflict resolver is last-write-wins; see
    /// [`with_resolver`](Self::with_resolver).
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let config = config.normalized();
        let snapshot = config.enable_persistence.then(|| {
            SnapshotStore::new(&config.storage_path, config.snapshot_recovery)
        });

        Self {
            state: Arc::new(RwLock::new(EngineState {
                store: GraphStore::new(config.max_entities, config.max_relations),
                memories: IndexMap::new(),
                dirty: false,
                initialized: false,
            })),
            config,
            snapshot,
            resolver: ConflictResolver::default(),
            flusher: Mutex::new(None),
        }
    }

    /// Replaces the conflict resolver used by [`apply_event`](Self::apply_event).
    #[must_use]
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Returns the (normalized) configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─── lifecycle ──────────────────────────────────────────────────────

    /// Initializes the engine: hydrates from the snapshot when
    /// persistence is enabled and starts the flusher when configured.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the snapshot cannot be read, or
    /// cannot be parsed under [`SnapshotRecovery::FailFast`](crate::SnapshotRecovery::FailFast).
    pub fn initialize(&self, token: &CancelToken) -> Result<()> {
        token.check()?;
        {
            let mut state = self.write_state()?;
            if state.initialized {
                return Ok(());
            }

            if let Some(snapshot) = &self.snapshot {
                if let Some(loaded) = snapshot.load()? {
                    let (graph, memories) = loaded.into_parts();
                    debug!(
                        version = graph.version,
                        entities = graph.entities.len(),
                        relations = graph.relations.len(),
                        memories = memories.len(),
                        "hydrated graph from snapshot"
                    );
                    state.store.replace_all(graph);
                    state.memories = memories;
                }
            }

            state.initialized = true;
            state.dirty = false;
        }

        if self.snapshot.is_some() && !self.config.auto_save_interval().is_zero() {
            self.start_flusher();
        }
        Ok(())
    }

    /// Returns `Ok` iff the engine is initialized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] otherwise.
    pub fn health(&self, token: &CancelToken) -> Result<()> {
        token.check()?;
        let state = self.read_state()?;
        Self::ready(&state)
    }

    /// Stops the flusher, performs a final save if dirty, and returns
    /// the engine to the uninitialized state. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token is set, or
    /// [`Error::Invariant`] on a poisoned lock. Final-save failures are
    /// logged, not surfaced; close always completes.
    pub fn close(&self, token: &CancelToken) -> Result<()> {
        token.check()?;
        self.stop_flusher()?;

        let mut state = self.write_state()?;
        if !state.initialized {
            return Ok(());
        }

        if state.dirty {
            if let Some(snapshot) = &self.snapshot {
                match snapshot.save(state.store.graph(), &state.memories) {
                    Ok(()) => state.dirty = false,
                    Err(e) => warn!(error = %e, "final save on close failed"),
                }
            }
        }

        state.initialized = false;
        Ok(())
    }

    // ─── entity operations ──────────────────────────────────────────────

    /// Creates an entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] on an empty name or type, or
    /// [`Error::CapacityExceeded`] at the entity cap.
    pub fn create_entity(
        &self,
        token: &CancelToken,
        name: &str,
        entity_type: &str,
        observations: Vec<String>,
        properties: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<Entity> {
        token.check()?;
        if name.trim().is_empty() {
            return Err(Error::BadRequest("entity name must not be empty".to_string()));
        }
        if entity_type.trim().is_empty() {
            return Err(Error::BadRequest("entity type must not be empty".to_string()));
        }

        let entity = Entity::new(name, entity_type)
            .with_observations(observations)
            .with_properties(properties.unwrap_or_default());

        let mut state = self.write_state()?;
        Self::ready(&state)?;
        state.store.put_entity(entity.clone())?;
        Self::commit(&mut state);
        Ok(entity)
    }

    /// Looks up an entity by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is absent.
    pub fn get_entity(&self, token: &CancelToken, id: &EntityId) -> Result<Entity> {
        token.check()?;
        let state = self.read_state()?;
        Self::ready(&state)?;
        state.store.entity(id).cloned().ok_or_else(|| Error::NotFound {
            what: format!("entity {id}"),
        })
    }

    /// Looks up an entity by name, case-insensitively, returning the
    /// first match in insertion order.
    ///
    /// Uses full Unicode lowercasing on both sides (a superset of ASCII
    /// folding).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no entity matches.
    pub fn get_entity_by_name(&self, token: &CancelToken, name: &str) -> Result<Entity> {
        token.check()?;
        let state = self.read_state()?;
        Self::ready(&state)?;
        state
            .store
            .find_by_name(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                what: format!("entity named {name:?}"),
            })
    }

    /// Appends observations and merges properties into an entity.
    ///
    /// Observations are append-only: existing ones are never replaced.
    /// Property merges let the new value win on key collision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is absent.
    pub fn update_entity(
        &self,
        token: &CancelToken,
        id: &EntityId,
        observations: Vec<String>,
        properties: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<Entity> {
        token.check()?;
        let mut state = self.write_state()?;
        Self::ready(&state)?;

        let entity = state.store.entity_mut(id).ok_or_else(|| Error::NotFound {
            what: format!("entity {id}"),
        })?;
        entity.observations.extend(observations);
        if let Some(properties) = properties {
            entity.properties.extend(properties);
        }
        entity.updated_at = Utc::now();
        let updated = entity.clone();

        Self::commit(&mut state);
        Ok(updated)
    }

    /// Deletes an entity and every relation that mentions it.
    ///
    /// The cascade is atomic with respect to the engine lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is absent.
    pub fn delete_entity(&self, token: &CancelToken, id: &EntityId) -> Result<()> {
        token.check()?;
        let mut state = self.write_state()?;
        Self::ready(&state)?;

        let (_, cascaded) = state.store.remove_entity_cascade(id)?;
        debug!(entity = %id, cascaded, "deleted entity");
        Self::commit(&mut state);
        Ok(())
    }

    /// Appends a single observation to an entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] on empty text or
    /// [`Error::NotFound`] if the id is absent.
    pub fn add_observation(
        &self,
        token: &CancelToken,
        id: &EntityId,
        text: &str,
    ) -> Result<Entity> {
        token.check()?;
        if text.trim().is_empty() {
            return Err(Error::BadRequest("observation must not be empty".to_string()));
        }

        let mut state = self.write_state()?;
        Self::ready(&state)?;

        let entity = state.store.entity_mut(id).ok_or_else(|| Error::NotFound {
            what: format!("entity {id}"),
        })?;
        entity.observations.push(text.to_string());
        entity.updated_at = Utc::now();
        let updated = entity.clone();

        Self::commit(&mut state);
        Ok(updated)
    }

    /// Filtered scan over names and observations; see
    /// [`search::search_entities`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] before initialization.
    pub fn search_entities(
        &self,
        token: &CancelToken,
        query: &str,
        entity_type: &str,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        token.check()?;
        let state = self.read_state()?;
        Self::ready(&state)?;
        Ok(search::search_entities(
            state.store.graph(),
            query,
            entity_type,
            limit,
        ))
    }

    /// Relevance-scored search; see [`search::search_with_relevance`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] before initialization.
    pub fn search_with_relevance(
        &self,
        token: &CancelToken,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredEntity>> {
        token.check()?;
        let state = self.read_state()?;
        Self::ready(&state)?;
        Ok(search::search_with_relevance(state.store.graph(), query, limit))
    }

    // ─── relation operations ────────────────────────────────────────────

    /// Creates a relation between two existing entities.
    ///
    /// Non-positive strength normalizes to 1.0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] on an empty type,
    /// [`Error::NotFound`] if either endpoint is missing, or
    /// [`Error::CapacityExceeded`] at the relation cap.
    pub fn create_relation(
        &self,
        token: &CancelToken,
        from: &EntityId,
        to: &EntityId,
        relation_type: &str,
        strength: f64,
        properties: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<Relation> {
        token.check()?;
        if relation_type.trim().is_empty() {
            return Err(Error::BadRequest("relation type must not be empty".to_string()));
        }

        let relation = Relation::new(from.clone(), to.clone(), relation_type)
            .with_strength(strength)
            .with_properties(properties.unwrap_or_default());

        let mut state = self.write_state()?;
        Self::ready(&state)?;
        state.store.put_relation(relation.clone())?;
        Self::commit(&mut state);
        Ok(relation)
    }

    /// Looks up a relation by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is absent.
    pub fn get_relation(&self, token: &CancelToken, id: &RelationId) -> Result<Relation> {
        token.check()?;
        let state = self.read_state()?;
        Self::ready(&state)?;
        state.store.relation(id).cloned().ok_or_else(|| Error::NotFound {
            what: format!("relation {id}"),
        })
    }

    /// Deletes a relation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is absent.
    pub fn delete_relation(&self, token: &CancelToken, id: &RelationId) -> Result<()> {
        token.check()?;
        let mut state = self.write_state()?;
        Self::ready(&state)?;
        state.store.remove_relation(id)?;
        Self::commit(&mut state);
        Ok(())
    }

    /// Returns the relations touching an entity, filtered by direction.
    ///
    /// An unknown entity yields an empty list, not an error; deletion
    /// cascades leave no trace to look up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] before initialization.
    pub fn get_entity_relations(
        &self,
        token: &CancelToken,
        id: &EntityId,
        direction: Direction,
    ) -> Result<Vec<Relation>> {
        token.check()?;
        let state = self.read_state()?;
        Self::ready(&state)?;
        Ok(state.store.relations_for(id, direction))
    }

    // ─── graph-level operations ─────────────────────────────────────────

    /// Resolves names to entities with their relations.
    ///
    /// Each name maps to its first case-insensitive match; names that
    /// match nothing are skipped silently. The result preserves input
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] before initialization.
    pub fn read_graph(
        &self,
        token: &CancelToken,
        names: &[String],
    ) -> Result<IndexMap<String, EntityWithRelations>> {
        token.check()?;
        let state = self.read_state()?;
        Self::ready(&state)?;

        let mut result = IndexMap::new();
        for name in names {
            if let Some(entity) = state.store.find_by_name(name) {
                let relations = state.store.relations_for(&entity.id, Direction::All);
                result.insert(
                    name.clone(),
                    EntityWithRelations {
                        entity: entity.clone(),
                        relations,
                    },
                );
            }
        }
        Ok(result)
    }

    /// Resolves ids to entities with their relations, in input order,
    /// skipping unknown ids silently.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] before initialization.
    pub fn open_nodes(
        &self,
        token: &CancelToken,
        ids: &[EntityId],
    ) -> Result<Vec<EntityWithRelations>> {
        token.check()?;
        let state = self.read_state()?;
        Self::ready(&state)?;

        Ok(ids
            .iter()
            .filter_map(|id| {
                state.store.entity(id).map(|entity| EntityWithRelations {
                    entity: entity.clone(),
                    relations: state.store.relations_for(id, Direction::All),
                })
            })
            .collect())
    }

    /// Returns aggregate counts, the version, and the on-disk snapshot
    /// size when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] before initialization.
    pub fn statistics(&self, token: &CancelToken) -> Result<GraphStatistics> {
        token.check()?;
        // Probe the file size before taking the lock; reads never block
        // on I/O inside the critical section.
        let snapshot_bytes = self.snapshot.as_ref().and_then(SnapshotStore::size_on_disk);
        let state = self.read_state()?;
        Self::ready(&state)?;

        let mut entities_by_type: HashMap<String, usize> = HashMap::new();
        for entity in state.store.entities() {
            *entities_by_type.entry(entity.entity_type.clone()).or_insert(0) += 1;
        }
        let mut relations_by_type: HashMap<String, usize> = HashMap::new();
        for relation in state.store.relations() {
            *relations_by_type
                .entry(relation.relation_type.clone())
                .or_insert(0) += 1;
        }

        Ok(GraphStatistics {
            total_entities: state.store.entity_count(),
            total_relations: state.store.relation_count(),
            entities_by_type,
            relations_by_type,
            version: state.store.version(),
            updated_at: state.store.updated_at(),
            snapshot_bytes,
        })
    }

    /// Forces a save, holding the write lock for the full duration.
    ///
    /// A no-op when persistence is disabled. On success the dirty flag
    /// is cleared under the same lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the snapshot cannot be written.
    pub fn save(&self, token: &CancelToken) -> Result<()> {
        token.check()?;
        let mut state = self.write_state()?;
        Self::ready(&state)?;

        match &self.snapshot {
            Some(snapshot) => {
                snapshot.save(state.store.graph(), &state.memories)?;
                state.dirty = false;
                Ok(())
            }
            None => {
                debug!("persistence disabled; save is a no-op");
                Ok(())
            }
        }
    }

    /// Empties the graph and the memory records.
    ///
    /// The version counter keeps increasing; clearing is a mutation
    /// like any other.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] before initialization.
    pub fn clear(&self, token: &CancelToken) -> Result<()> {
        token.check()?;
        let mut state = self.write_state()?;
        Self::ready(&state)?;

        state.store.clear();
        state.memories.clear();
        Self::commit(&mut state);
        Ok(())
    }

    // ─── replication ────────────────────────────────────────────────────

    /// Applies a replicated memory event.
    ///
    /// An unseen memory id materializes a record from the event; a known
    /// id goes through the configured [`ConflictResolver`] and the
    /// merged result replaces the stored record. Resolution itself never
    /// fails; detected conflicts are logged and returned in the
    /// [`Resolution`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] on an empty memory id.
    pub fn apply_event(&self, token: &CancelToken, event: &MemoryEvent) -> Result<Resolution> {
        token.check()?;
        if event.memory_id.as_str().is_empty() {
            return Err(Error::BadRequest("event memory id must not be empty".to_string()));
        }

        let mut state = self.write_state()?;
        Self::ready(&state)?;

        let resolution = match state.memories.get(&event.memory_id) {
            Some(local) => {
                let resolution = self.resolver.resolve(local, event);
                if let Some(conflict) = &resolution.conflict {
                    debug!(
                        memory = %event.memory_id,
                        strategy = %conflict.strategy,
                        content_changed = conflict.content_changed,
                        importance_changed = conflict.importance_changed,
                        tags_merged = conflict.tags_merged,
                        "resolved conflicting event"
                    );
                }
                resolution
            }
            None => Resolution {
                merged: MemoryRecord::from_event(event),
                conflict: None,
            },
        };

        state
            .memories
            .insert(event.memory_id.clone(), resolution.merged.clone());
        Self::commit(&mut state);
        Ok(resolution)
    }

    // ─── internals ──────────────────────────────────────────────────────

    fn ready(state: &EngineState) -> Result<()> {
        if state.initialized {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    /// Marks a successful mutation: version bump plus dirty flag.
    fn commit(state: &mut RwLockWriteGuard<'_, EngineState>) {
        state.store.touch();
        state.dirty = true;
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, EngineState>> {
        self.state
            .read()
            .map_err(|_| Error::Invariant("state lock poisoned".to_string()))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, EngineState>> {
        self.state
            .write()
            .map_err(|_| Error::Invariant("state lock poisoned".to_string()))
    }

    fn start_flusher(&self) {
        let Ok(mut slot) = self.flusher.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }
        let Some(snapshot) = self.snapshot.clone() else {
            return;
        };

        let interval = self.config.auto_save_interval();
        let state = Arc::clone(&self.state);
        let (stop, signal) = mpsc::channel();

        let handle = std::thread::spawn(move || {
            loop {
                match signal.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => flush_tick(&state, &snapshot),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        *slot = Some(Flusher { stop, handle });
    }

    fn stop_flusher(&self) -> Result<()> {
        let flusher = self
            .flusher
            .lock()
            .map_err(|_| Error::Invariant("flusher lock poisoned".to_string()))?
            .take();

        if let Some(flusher) = flusher {
            let _ = flusher.stop.send(());
            if flusher.handle.join().is_err() {
                warn!("flusher thread panicked");
            }
        }
        Ok(())
    }
}

/// One flusher tick: save iff dirty, retry next tick on failure.
fn flush_tick(state: &Arc<RwLock<EngineState>>, snapshot: &SnapshotStore) {
    let Ok(mut state) = state.write() else {
        return;
    };
    if !state.dirty {
        return;
    }

    match snapshot.save(state.store.graph(), &state.memories) {
        Ok(()) => {
            state.dirty = false;
            debug!("flusher saved snapshot");
        }
        Err(e) => error!(error = %e, "flusher save failed, retrying next tick"),
    }
}
