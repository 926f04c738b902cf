//! Operation dispatch using the command pattern.
//!
//! [`Operation`] gives every engine method a stable wire name; unknown
//! names are captured for error reporting rather than panicking. The
//! [`dispatch`] function extracts JSON-shaped arguments, calls the
//! engine, and serializes the result. Payload type mismatches map to
//! `BadRequest`, unrecognized names to `UnknownOperation`.
//!
//! To add a new operation:
//! 1. Add a variant to [`Operation`]
//! 2. Update [`Operation::as_str`] and `From<&str>`
//! 3. Add the handler arm in [`dispatch`]

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;

use crate::models::{Direction, EntityId, MemoryEvent, RelationId};
use crate::services::{CancelToken, MemoryEngine};
use crate::{Error, Result};

/// Wire-level operation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Health probe.
    Health,
    /// Create an entity.
    CreateEntity,
    /// Look up an entity by id.
    GetEntity,
    /// Look up an entity by name.
    GetEntityByName,
    /// Append observations / merge properties.
    UpdateEntity,
    /// Delete an entity (with relation cascade).
    DeleteEntity,
    /// Append a single observation.
    AddObservation,
    /// Filtered entity scan.
    Search,
    /// Create a relation.
    CreateRelation,
    /// Look up a relation by id.
    GetRelation,
    /// Delete a relation.
    DeleteRelation,
    /// List relations touching an entity.
    EntityRelations,
    /// Resolve names to entities with relations.
    ReadGraph,
    /// Resolve ids to entities with relations.
    OpenNodes,
    /// Aggregate statistics.
    Statistics,
    /// Force a snapshot save.
    Save,
    /// Empty the graph.
    Clear,
    /// Relevance-scored search.
    SearchRelevance,
    /// Apply a replicated memory event.
    ApplyEvent,
    /// Unknown operation (for error handling).
    Unknown(String),
}

impl Operation {
    /// Returns the wire name of the operation.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::Health => "memory_health",
            Self::CreateEntity => "memory_create_entity",
            Self::GetEntity => "memory_get_entity",
            Self::GetEntityByName => "memory_get_entity_by_name",
            Self::UpdateEntity => "memory_update_entity",
            Self::DeleteEntity => "memory_delete_entity",
            Self::AddObservation => "memory_add_observation",
            Self::Search => "memory_search",
            Self::CreateRelation => "memory_create_relation",
            Self::GetRelation => "memory_get_relation",
            Self::DeleteRelation => "memory_delete_relation",
            Self::EntityRelations => "memory_entity_relations",
            Self::ReadGraph => "memory_read_graph",
            Self::OpenNodes => "memory_open_nodes",
            Self::Statistics => "memory_statistics",
            Self::Save => "memory_save",
            Self::Clear => "memory_clear",
            Self::SearchRelevance => "memory_search_relevance",
            Self::ApplyEvent => "memory_apply_event",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Returns true if this is a known operation.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Returns all known operations.
    #[must_use]
    pub const fn known_operations() -> &'static [Self] {
        &[
            Self::Health,
            Self::CreateEntity,
            Self::GetEntity,
            Self::GetEntityByName,
            Self::UpdateEntity,
            Self::DeleteEntity,
            Self::AddObservation,
            Self::Search,
            Self::CreateRelation,
            Self::GetRelation,
            Self::DeleteRelation,
            Self::EntityRelations,
            Self::ReadGraph,
            Self::OpenNodes,
            Self::Statistics,
            Self::Save,
            Self::Clear,
            Self::SearchRelevance,
            Self::ApplyEvent,
        ]
    }
}

impl From<&str> for Operation {
    fn from(s: &str) -> Self {
        match s {
            "memory_health" => Self::Health,
            "memory_create_entity" => Self::CreateEntity,
            "memory_get_entity" => Self::GetEntity,
            "memory_get_entity_by_name" => Self::GetEntityByName,
            "memory_update_entity" => Self::UpdateEntity,
            "memory_delete_entity" => Self::DeleteEntity,
            "memory_add_observation" => Self::AddObservation,
            "memory_search" => Self::Search,
            "memory_create_relation" => Self::CreateRelation,
            "memory_get_relation" => Self::GetRelation,
            "memory_delete_relation" => Self::DeleteRelation,
            "memory_entity_relations" => Self::EntityRelations,
            "memory_read_graph" => Self::ReadGraph,
            "memory_open_nodes" => Self::OpenNodes,
            "memory_statistics" => Self::Statistics,
            "memory_save" => Self::Save,
            "memory_clear" => Self::Clear,
            "memory_search_relevance" => Self::SearchRelevance,
            "memory_apply_event" => Self::ApplyEvent,
            unknown => Self::Unknown(unknown.to_string()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatches a named operation with JSON-shaped arguments.
///
/// # Errors
///
/// Returns [`Error::UnknownOperation`] for an unrecognized name,
/// [`Error::BadRequest`] on payload type mismatches, and whatever the
/// underlying engine method surfaces.
pub fn dispatch(
    engine: &MemoryEngine,
    token: &CancelToken,
    operation: &str,
    args: &Value,
) -> Result<Value> {
    let empty = Value::Object(serde_json::Map::new());
    let args = match args {
        Value::Object(_) => args,
        Value::Null => &empty,
        other => {
            return Err(Error::BadRequest(format!(
                "arguments must be an object, got {other}"
            )));
        }
    };

    match Operation::from(operation) {
        Operation::Health => {
            engine.health(token)?;
            Ok(json!({"status": "ok"}))
        }
        Operation::CreateEntity => {
            let entity = engine.create_entity(
                token,
                required_str(args, "name")?,
                required_str(args, "entity_type")?,
                optional_string_vec(args, "observations")?,
                optional_properties(args, "properties")?,
            )?;
            to_json(&entity)
        }
        Operation::GetEntity => {
            let id = EntityId::new(required_str(args, "id")?);
            to_json(&engine.get_entity(token, &id)?)
        }
        Operation::GetEntityByName => {
            to_json(&engine.get_entity_by_name(token, required_str(args, "name")?)?)
        }
        Operation::UpdateEntity => {
            let id = EntityId::new(required_str(args, "id")?);
            let entity = engine.update_entity(
                token,
                &id,
                optional_string_vec(args, "observations")?,
                optional_properties(args, "properties")?,
            )?;
            to_json(&entity)
        }
        Operation::DeleteEntity => {
            let id = EntityId::new(required_str(args, "id")?);
            engine.delete_entity(token, &id)?;
            Ok(json!({"deleted": id.as_str()}))
        }
        Operation::AddObservation => {
            let id = EntityId::new(required_str(args, "id")?);
            to_json(&engine.add_observation(token, &id, required_str(args, "text")?)?)
        }
        Operation::Search => {
            let results = engine.search_entities(
                token,
                optional_str(args, "query")?.unwrap_or(""),
                optional_str(args, "entity_type")?.unwrap_or(""),
                optional_limit(args, "limit")?,
            )?;
            to_json(&results)
        }
        Operation::CreateRelation => {
            let relation = engine.create_relation(
                token,
                &EntityId::new(required_str(args, "from")?),
                &EntityId::new(required_str(args, "to")?),
                required_str(args, "relation_type")?,
                optional_f64(args, "strength")?.unwrap_or(1.0),
                optional_properties(args, "properties")?,
            )?;
            to_json(&relation)
        }
        Operation::GetRelation => {
            let id = RelationId::new(required_str(args, "id")?);
            to_json(&engine.get_relation(token, &id)?)
        }
        Operation::DeleteRelation => {
            let id = RelationId::new(required_str(args, "id")?);
            engine.delete_relation(token, &id)?;
            Ok(json!({"deleted": id.as_str()}))
        }
        Operation::EntityRelations => {
            let id = EntityId::new(required_str(args, "id")?);
            let direction = Direction::parse(optional_str(args, "direction")?.unwrap_or("all"));
            to_json(&engine.get_entity_relations(token, &id, direction)?)
        }
        Operation::ReadGraph => {
            let names = optional_string_vec(args, "names")?;
            to_json(&engine.read_graph(token, &names)?)
        }
        Operation::OpenNodes => {
            let ids: Vec<EntityId> = optional_string_vec(args, "ids")?
                .into_iter()
                .map(EntityId::new)
                .collect();
            to_json(&engine.open_nodes(token, &ids)?)
        }
        Operation::Statistics => to_json(&engine.statistics(token)?),
        Operation::Save => {
            engine.save(token)?;
            Ok(json!({"saved": true}))
        }
        Operation::Clear => {
            engine.clear(token)?;
            Ok(json!({"cleared": true}))
        }
        Operation::SearchRelevance => {
            let results = engine.search_with_relevance(
                token,
                required_str(args, "query")?,
                optional_limit(args, "limit")?,
            )?;
            to_json(&results)
        }
        Operation::ApplyEvent => {
            let event = args
                .get("event")
                .ok_or_else(|| Error::BadRequest("missing required argument: event".to_string()))?;
            let event: MemoryEvent = serde_json::from_value(event.clone())
                .map_err(|e| Error::BadRequest(format!("malformed event: {e}")))?;
            to_json(&engine.apply_event(token, &event)?)
        }
        Operation::Unknown(name) => Err(Error::UnknownOperation(name)),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::Invariant(format!("result serialization failed: {e}")))
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(Error::BadRequest(format!(
            "argument '{key}' must be a string, got {other}"
        ))),
        None => Err(Error::BadRequest(format!(
            "missing required argument: {key}"
        ))),
    }
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(Error::BadRequest(format!(
            "argument '{key}' must be a string, got {other}"
        ))),
    }
}

fn optional_string_vec(args: &Value, key: &str) -> Result<Vec<String>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(ToString::to_string).ok_or_else(|| {
                    Error::BadRequest(format!("argument '{key}' must be an array of strings"))
                })
            })
            .collect(),
        Some(other) => Err(Error::BadRequest(format!(
            "argument '{key}' must be an array, got {other}"
        ))),
    }
}

fn optional_properties(
    args: &Value,
    key: &str,
) -> Result<Option<HashMap<String, Value>>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )),
        Some(other) => Err(Error::BadRequest(format!(
            "argument '{key}' must be an object, got {other}"
        ))),
    }
}

/// Extracts a result limit. Missing or non-positive values yield 0,
/// which the engine maps to the operation's default.
fn optional_limit(args: &Value, key: &str) -> Result<usize> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => {
            n.as_i64()
                .map(|v| usize::try_from(v).unwrap_or(0))
                .ok_or_else(|| {
                    Error::BadRequest(format!("argument '{key}' must be an integer"))
                })
        }
        Some(other) => Err(Error::BadRequest(format!(
            "argument '{key}' must be an integer, got {other}"
        ))),
    }
}

fn optional_f64(args: &Value, key: &str) -> Result<Option<f64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(Error::BadRequest(format!(
            "argument '{key}' must be a number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn engine() -> MemoryEngine {
        let engine = MemoryEngine::new(EngineConfig {
            enable_persistence: false,
            ..EngineConfig::default()
        });
        engine.initialize(&CancelToken::new()).unwrap();
        engine
    }

    #[test]
    fn test_operation_roundtrip() {
        for operation in Operation::known_operations() {
            let parsed = Operation::from(operation.as_str());
            assert_eq!(&parsed, operation, "roundtrip failed for {operation}");
        }
    }

    #[test]
    fn test_unknown_operation() {
        let operation = Operation::from("memory_frobnicate");
        assert!(!operation.is_known());

        let engine = engine();
        let result = dispatch(
            &engine,
            &CancelToken::new(),
            "memory_frobnicate",
            &json!({}),
        );
        assert!(matches!(result, Err(Error::UnknownOperation(_))));
    }

    #[test]
    fn test_create_and_get_via_dispatch() {
        let engine = engine();
        let token = CancelToken::new();

        let created = dispatch(
            &engine,
            &token,
            "memory_create_entity",
            &json!({
                "name": "Alice",
                "entity_type": "person",
                "observations": ["Engineer"],
            }),
        )
        .unwrap();
        let id = created.get("id").unwrap().as_str().unwrap();

        let fetched = dispatch(
            &engine,
            &token,
            "memory_get_entity",
            &json!({"id": id}),
        )
        .unwrap();
        assert_eq!(fetched.get("name").unwrap(), "Alice");

        let by_name = dispatch(
            &engine,
            &token,
            "memory_get_entity_by_name",
            &json!({"name": "alice"}),
        )
        .unwrap();
        assert_eq!(by_name.get("id").unwrap().as_str().unwrap(), id);
    }

    #[test]
    fn test_payload_type_mismatch_is_bad_request() {
        let engine = engine();
        let token = CancelToken::new();

        // Wrong argument type.
        let result = dispatch(
            &engine,
            &token,
            "memory_create_entity",
            &json!({"name": 42, "entity_type": "person"}),
        );
        assert!(matches!(result, Err(Error::BadRequest(_))));

        // Missing required argument.
        let result = dispatch(&engine, &token, "memory_get_entity", &json!({}));
        assert!(matches!(result, Err(Error::BadRequest(_))));

        // Non-object argument payload.
        let result = dispatch(&engine, &token, "memory_statistics", &json!([1, 2]));
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_search_and_statistics_via_dispatch() {
        let engine = engine();
        let token = CancelToken::new();

        for name in ["Machine Learning", "Deep Learning"] {
            dispatch(
                &engine,
                &token,
                "memory_create_entity",
                &json!({"name": name, "entity_type": "concept"}),
            )
            .unwrap();
        }

        let results = dispatch(
            &engine,
            &token,
            "memory_search",
            &json!({"query": "learning", "limit": 10}),
        )
        .unwrap();
        assert_eq!(results.as_array().unwrap().len(), 2);

        let results = dispatch(
            &engine,
            &token,
            "memory_search_relevance",
            &json!({"query": "machine learning"}),
        )
        .unwrap();
        let first = &results.as_array().unwrap()[0];
        assert_eq!(
            first.get("entity").unwrap().get("name").unwrap(),
            "Machine Learning"
        );

        let stats = dispatch(&engine, &token, "memory_statistics", &json!(null)).unwrap();
        assert_eq!(stats.get("total_entities").unwrap(), 2);
    }

    #[test]
    fn test_apply_event_via_dispatch() {
        let engine = engine();
        let token = CancelToken::new();

        let result = dispatch(
            &engine,
            &token,
            "memory_apply_event",
            &json!({
                "event": {
                    "memory_id": "mem_1",
                    "content": "remember this",
                    "importance": 0.8,
                    "timestamp": "2026-01-10T12:00:00Z",
                    "vector_clock": "r1:1",
                    "tags": ["note"],
                }
            }),
        )
        .unwrap();
        assert_eq!(
            result.get("merged").unwrap().get("content").unwrap(),
            "remember this"
        );

        let result = dispatch(
            &engine,
            &token,
            "memory_apply_event",
            &json!({"event": {"memory_id": "mem_1"}}),
        );
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_relations_via_dispatch() {
        let engine = engine();
        let token = CancelToken::new();

        let a = dispatch(
            &engine,
            &token,
            "memory_create_entity",
            &json!({"name": "A", "entity_type": "t"}),
        )
        .unwrap();
        let b = dispatch(
            &engine,
            &token,
            "memory_create_entity",
            &json!({"name": "B", "entity_type": "t"}),
        )
        .unwrap();
        let a_id = a.get("id").unwrap().as_str().unwrap();
        let b_id = b.get("id").unwrap().as_str().unwrap();

        let relation = dispatch(
            &engine,
            &token,
            "memory_create_relation",
            &json!({"from": a_id, "to": b_id, "relation_type": "knows", "strength": 0.5}),
        )
        .unwrap();
        assert!(
            (relation.get("strength").unwrap().as_f64().unwrap() - 0.5).abs() < f64::EPSILON
        );

        let relations = dispatch(
            &engine,
            &token,
            "memory_entity_relations",
            &json!({"id": a_id, "direction": "outgoing"}),
        )
        .unwrap();
        assert_eq!(relations.as_array().unwrap().len(), 1);

        let graph = dispatch(
            &engine,
            &token,
            "memory_read_graph",
            &json!({"names": ["a", "b"]}),
        )
        .unwrap();
        assert_eq!(graph.as_object().unwrap().len(), 2);
    }
}
