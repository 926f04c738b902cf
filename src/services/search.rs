//! Search over the knowledge graph.
//!
//! Two query shapes, both pure functions of a graph snapshot and both
//! deterministic: the filtered scan returns matches in insertion order,
//! and the relevance search sorts by score with ties broken by
//! insertion order (a stable sort over an insertion-ordered map).
//!
//! Matching is case-insensitive for names and observations (full
//! Unicode lowercasing on both sides) and exact for type filters.

use crate::models::{Entity, KnowledgeGraph};

/// Default result cap for the filtered scan.
pub const DEFAULT_SCAN_LIMIT: usize = 100;

/// Default result cap for the relevance search.
pub const DEFAULT_RELEVANCE_LIMIT: usize = 20;

// Score contributions for the relevance search.
const SCORE_NAME_EXACT: f64 = 10.0;
const SCORE_NAME_PARTIAL: f64 = 5.0;
const SCORE_NAME_TERM: f64 = 1.0;
const SCORE_OBSERVATION_PHRASE: f64 = 3.0;
const SCORE_OBSERVATION_TERM: f64 = 0.5;
const SCORE_TYPE: f64 = 2.0;

/// An entity with its relevance score and the sources that matched.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScoredEntity {
    /// The matched entity.
    pub entity: Entity,
    /// Additive relevance score; always > 0 for returned results.
    pub score: f64,
    /// Which sources matched: "name (exact)", "name (partial)",
    /// "observation", "type".
    pub matched: Vec<String>,
}

/// Filtered scan over the graph.
///
/// An entity matches iff the type filter is empty or equal, and the
/// query is empty or a case-insensitive substring of the name or of any
/// observation. No ranking; results are truncated at `limit` in
/// insertion order. A `limit` of zero falls back to
/// [`DEFAULT_SCAN_LIMIT`].
#[must_use]
pub fn search_entities(
    graph: &KnowledgeGraph,
    query: &str,
    entity_type: &str,
    limit: usize,
) -> Vec<Entity> {
    let limit = if limit == 0 { DEFAULT_SCAN_LIMIT } else { limit };
    let query_lower = query.to_lowercase();

    graph
        .entities
        .values()
        .filter(|entity| {
            if !entity_type.is_empty() && entity.entity_type != entity_type {
                return false;
            }
            if query_lower.is_empty() {
                return true;
            }
            entity.name.to_lowercase().contains(&query_lower)
                || entity
                    .observations
                    .iter()
                    .any(|obs| obs.to_lowercase().contains(&query_lower))
        })
        .take(limit)
        .cloned()
        .collect()
}

/// Relevance-scored search over the graph.
///
/// The score is additive: an exact name match contributes 10, a name
/// substring 5, each query term found in the name 1, each observation
/// containing the whole query 3, each term per observation 0.5, and a
/// type substring 2. Only entities with a positive score are returned,
/// sorted score-descending with ties in insertion order. An empty query
/// matches nothing. A `limit` of zero falls back to
/// [`DEFAULT_RELEVANCE_LIMIT`].
#[must_use]
pub fn search_with_relevance(
    graph: &KnowledgeGraph,
    query: &str,
    limit: usize,
) -> Vec<ScoredEntity> {
    let limit = if limit == 0 {
        DEFAULT_RELEVANCE_LIMIT
    } else {
        limit
    };
    let query_lower = query.trim().to_lowercase();
    if query_lower.is_empty() {
        return Vec::new();
    }
    let terms: Vec<&str> = query_lower.split_whitespace().collect();

    let mut results: Vec<ScoredEntity> = graph
        .entities
        .values()
        .filter_map(|entity| score_entity(entity, &query_lower, &terms))
        .collect();

    // Stable sort: equal scores keep insertion order.
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(limit);
    results
}

fn score_entity(entity: &Entity, query_lower: &str, terms: &[&str]) -> Option<ScoredEntity> {
    let mut score = 0.0;
    let mut matched = Vec::new();

    let name_lower = entity.name.to_lowercase();
    if name_lower == query_lower {
        score += SCORE_NAME_EXACT;
        matched.push("name (exact)".to_string());
    } else if name_lower.contains(query_lower) {
        score += SCORE_NAME_PARTIAL;
        matched.push("name (partial)".to_string());
    }
    for term in terms {
        if name_lower.contains(term) {
            score += SCORE_NAME_TERM;
        }
    }

    let mut observation_hit = false;
    for obs in &entity.observations {
        let obs_lower = obs.to_lowercase();
        if obs_lower.contains(query_lower) {
            score += SCORE_OBSERVATION_PHRASE;
            observation_hit = true;
        }
        for term in terms {
            if obs_lower.contains(term) {
                score += SCORE_OBSERVATION_TERM;
                observation_hit = true;
            }
        }
    }
    if observation_hit {
        matched.push("observation".to_string());
    }

    if entity.entity_type.to_lowercase().contains(query_lower) {
        score += SCORE_TYPE;
        matched.push("type".to_string());
    }

    (score > 0.0).then(|| ScoredEntity {
        entity: entity.clone(),
        score,
        matched,
    })
}
