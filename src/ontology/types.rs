//! Core types for the ontology model.
//!
//! This module defines the entities, typed relationships, and the containing
//! `Ontology` graph that the generator produces, the critic scores, the
//! mediator mutates, and the validator checks.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Source Spans
// ============================================================================

/// The text span an entity or relationship was extracted from.
///
/// Character offsets are relative to the originating input text and drive
/// the co-occurrence distance computation during relationship inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpan {
    /// The extracted snippet.
    pub snippet: String,
    /// Character offset where the span starts.
    pub start: usize,
    /// Character offset where the span ends.
    pub end: usize,
}

impl SourceSpan {
    /// Create a new span.
    pub fn new(snippet: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            snippet: snippet.into(),
            start,
            end,
        }
    }

    /// Character distance between two spans (0 when they overlap).
    pub fn distance_to(&self, other: &SourceSpan) -> usize {
        if self.start > other.end {
            self.start - other.end
        } else if other.start > self.end {
            other.start - self.end
        } else {
            0
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A typed node in the ontology graph.
///
/// Entity types are open string tags ("Person", "Organization", ...) so
/// domain-specific extraction rules can introduce new types without code
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier, stable for the life of the ontology.
    pub id: String,
    /// Open type tag, e.g. "Person" or "Organization".
    pub entity_type: String,
    /// Primary display name.
    pub name: String,
    /// Additional key-value properties.
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    /// Confidence score (0.0-1.0).
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// The text span this entity was extracted from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_span: Option<SourceSpan>,
}

fn default_confidence() -> f32 {
    1.0
}

impl Entity {
    /// Create a new entity with a generated id.
    pub fn new(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), entity_type, name)
    }

    /// Create a new entity with a specific id.
    pub fn with_id(
        id: impl Into<String>,
        entity_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            name: name.into(),
            properties: HashMap::new(),
            confidence: 1.0,
            source_span: None,
        }
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Set the confidence score, clamped to [0, 1].
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set the source span.
    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.source_span = Some(span);
        self
    }

    /// Normalized (name, type) key used for deduplication and merging.
    pub fn normalized_key(&self) -> (String, String) {
        (
            normalize_name(&self.name),
            self.entity_type.to_lowercase(),
        )
    }
}

/// Lowercase, trim, and collapse internal whitespace.
pub(crate) fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// Relationships
// ============================================================================

/// Directionality of a relationship.
///
/// Only these three variants are ever produced, so this is a closed enum
/// rather than an open string tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Directed edge with the grammatical subject inferred as source.
    SubjectToObject,
    /// Co-occurrence-inferred edge with no directional claim.
    Undirected,
    /// Directionality was never inferred.
    #[default]
    Unknown,
}

/// A typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier.
    pub id: String,
    /// Id of the source entity.
    pub source_id: String,
    /// Id of the target entity.
    pub target_id: String,
    /// Open relationship type tag, e.g. "works_at" or "related_to".
    pub relation_type: String,
    /// Directionality of the edge.
    #[serde(default)]
    pub direction: Direction,
    /// Additional key-value properties.
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    /// Confidence score (0.0-1.0).
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// The text span this relationship was inferred from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_span: Option<SourceSpan>,
}

impl Relationship {
    /// Create a new relationship with a generated id.
    pub fn new(
        source_id: impl Into<String>,
        relation_type: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            source_id,
            relation_type,
            target_id,
        )
    }

    /// Create a new relationship with a specific id.
    pub fn with_id(
        id: impl Into<String>,
        source_id: impl Into<String>,
        relation_type: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type: relation_type.into(),
            direction: Direction::Unknown,
            properties: HashMap::new(),
            confidence: 1.0,
            source_span: None,
        }
    }

    /// Set the direction.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set the confidence score, clamped to [0, 1].
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Set the source span.
    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.source_span = Some(span);
        self
    }

    /// Key identifying duplicate edges regardless of id.
    pub fn edge_key(&self) -> (String, String, String, Direction) {
        (
            self.source_id.clone(),
            self.target_id.clone(),
            self.relation_type.clone(),
            self.direction,
        )
    }

    /// Whether this relationship touches the given entity id.
    pub fn involves(&self, entity_id: &str) -> bool {
        self.source_id == entity_id || self.target_id == entity_id
    }
}

// ============================================================================
// Ontology
// ============================================================================

/// The in-memory entity + relationship graph.
///
/// Entities and relationships are keyed by id in ordered maps so iteration,
/// scoring, and serialization are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ontology {
    /// Entities by id.
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
    /// Relationships by id.
    #[serde(default)]
    pub relationships: BTreeMap<String, Relationship>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Ontology {
    /// Create an empty ontology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of relationships.
    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Whether the ontology has no entities and no relationships.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    /// Insert an entity, replacing any previous entity with the same id.
    pub fn insert_entity(&mut self, entity: Entity) -> Option<Entity> {
        self.entities.insert(entity.id.clone(), entity)
    }

    /// Insert a relationship, replacing any previous one with the same id.
    pub fn insert_relationship(&mut self, relationship: Relationship) -> Option<Relationship> {
        self.relationships
            .insert(relationship.id.clone(), relationship)
    }

    /// Remove an entity by id. Relationships referencing it are left in
    /// place; they become dangling and are a validator concern.
    pub fn remove_entity(&mut self, id: &str) -> Option<Entity> {
        self.entities.remove(id)
    }

    /// Remove a relationship by id.
    pub fn remove_relationship(&mut self, id: &str) -> Option<Relationship> {
        self.relationships.remove(id)
    }

    /// Look up an entity by normalized (name, type).
    pub fn find_entity_by_key(&self, name: &str, entity_type: &str) -> Option<&Entity> {
        let key = (normalize_name(name), entity_type.to_lowercase());
        self.entities.values().find(|e| e.normalized_key() == key)
    }

    /// Relationships touching the given entity.
    pub fn relationships_of(&self, entity_id: &str) -> Vec<&Relationship> {
        self.relationships
            .values()
            .filter(|r| r.involves(entity_id))
            .collect()
    }

    /// Number of relationships touching each entity.
    pub fn degree_map(&self) -> HashMap<&str, usize> {
        let mut degrees: HashMap<&str, usize> = HashMap::new();
        for entity_id in self.entities.keys() {
            degrees.insert(entity_id.as_str(), 0);
        }
        for rel in self.relationships.values() {
            if let Some(d) = degrees.get_mut(rel.source_id.as_str()) {
                *d += 1;
            }
            if rel.target_id != rel.source_id {
                if let Some(d) = degrees.get_mut(rel.target_id.as_str()) {
                    *d += 1;
                }
            }
        }
        degrees
    }

    /// Ids of entities with zero relationships, in id order.
    pub fn orphaned_entity_ids(&self) -> Vec<String> {
        let degrees = self.degree_map();
        self.entities
            .keys()
            .filter(|id| degrees.get(id.as_str()).copied().unwrap_or(0) == 0)
            .cloned()
            .collect()
    }

    /// Relationships whose source or target id does not resolve, in id order.
    pub fn dangling_relationship_ids(&self) -> Vec<String> {
        self.relationships
            .values()
            .filter(|r| {
                !self.entities.contains_key(&r.source_id)
                    || !self.entities.contains_key(&r.target_id)
            })
            .map(|r| r.id.clone())
            .collect()
    }

    /// Summary statistics over the graph.
    pub fn stats(&self) -> OntologyStats {
        let mut entities_by_type: HashMap<String, usize> = HashMap::new();
        for entity in self.entities.values() {
            *entities_by_type.entry(entity.entity_type.clone()).or_default() += 1;
        }
        let mut relationships_by_type: HashMap<String, usize> = HashMap::new();
        for rel in self.relationships.values() {
            *relationships_by_type
                .entry(rel.relation_type.clone())
                .or_default() += 1;
        }

        let avg = |sum: f32, n: usize| if n == 0 { 0.0 } else { sum / n as f32 };
        let entity_conf_sum: f32 = self.entities.values().map(|e| e.confidence).sum();
        let rel_conf_sum: f32 = self.relationships.values().map(|r| r.confidence).sum();

        OntologyStats {
            entity_count: self.entities.len(),
            relationship_count: self.relationships.len(),
            orphan_count: self.orphaned_entity_ids().len(),
            entities_by_type,
            relationships_by_type,
            average_entity_confidence: avg(entity_conf_sum, self.entities.len()),
            average_relationship_confidence: avg(rel_conf_sum, self.relationships.len()),
        }
    }

    // ------------------------------------------------------------------
    // Hashing
    // ------------------------------------------------------------------

    /// Content hash over the graph, independent of property-map iteration
    /// order. Used to key the validator's formula-conversion cache.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (id, entity) in &self.entities {
            hasher.update(b"E");
            hasher.update(id.as_bytes());
            hasher.update(entity.entity_type.as_bytes());
            hasher.update(entity.name.as_bytes());
            hasher.update(entity.confidence.to_le_bytes());
            hash_properties(&mut hasher, &entity.properties);
        }
        for (id, rel) in &self.relationships {
            hasher.update(b"R");
            hasher.update(id.as_bytes());
            hasher.update(rel.source_id.as_bytes());
            hasher.update(rel.target_id.as_bytes());
            hasher.update(rel.relation_type.as_bytes());
            hasher.update([rel.direction as u8]);
            hasher.update(rel.confidence.to_le_bytes());
            hash_properties(&mut hasher, &rel.properties);
        }
        format!("{:x}", hasher.finalize())
    }

    // ------------------------------------------------------------------
    // Serialization contract
    // ------------------------------------------------------------------

    /// Serialize to a JSON value map.
    pub fn to_value(&self) -> crate::error::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize from a JSON value map.
    pub fn from_value(value: serde_json::Value) -> crate::error::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn hash_properties(hasher: &mut Sha256, properties: &HashMap<String, serde_json::Value>) {
    let mut keys: Vec<&String> = properties.keys().collect();
    keys.sort();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(properties[key].to_string().as_bytes());
    }
}

/// Summary statistics about an ontology.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OntologyStats {
    /// Total number of entities.
    pub entity_count: usize,
    /// Total number of relationships.
    pub relationship_count: usize,
    /// Entities with zero relationships.
    pub orphan_count: usize,
    /// Number of entities by type.
    pub entities_by_type: HashMap<String, usize>,
    /// Number of relationships by type.
    pub relationships_by_type: HashMap<String, usize>,
    /// Average confidence across all entities.
    pub average_entity_confidence: f32,
    /// Average confidence across all relationships.
    pub average_relationship_confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ontology() -> Ontology {
        let mut ontology = Ontology::new();
        ontology.insert_entity(
            Entity::with_id("e1", "Person", "Alice")
                .with_confidence(0.9)
                .with_property("role", serde_json::json!("engineer")),
        );
        ontology.insert_entity(Entity::with_id("e2", "Organization", "Acme Corp"));
        ontology.insert_entity(Entity::with_id("e3", "Location", "Berlin"));
        ontology.insert_relationship(
            Relationship::with_id("r1", "e1", "works_at", "e2")
                .with_direction(Direction::SubjectToObject)
                .with_confidence(0.65),
        );
        ontology
    }

    #[test]
    fn test_entity_builder() {
        let entity = Entity::new("Person", "Alice")
            .with_confidence(1.7)
            .with_property("team", serde_json::json!("platform"));
        assert_eq!(entity.confidence, 1.0); // clamped
        assert!(entity.properties.contains_key("team"));
        assert!(!entity.id.is_empty());
    }

    #[test]
    fn test_normalized_key() {
        let a = Entity::new("Person", "  Alice   Smith ");
        let b = Entity::new("person", "alice smith");
        assert_eq!(a.normalized_key(), b.normalized_key());
    }

    #[test]
    fn test_direction_default_unknown() {
        let rel = Relationship::new("a", "related_to", "b");
        assert_eq!(rel.direction, Direction::Unknown);
    }

    #[test]
    fn test_span_distance() {
        let a = SourceSpan::new("Alice", 10, 15);
        let b = SourceSpan::new("Acme", 100, 104);
        assert_eq!(a.distance_to(&b), 85);
        assert_eq!(b.distance_to(&a), 85);

        let overlapping = SourceSpan::new("Ali", 12, 14);
        assert_eq!(a.distance_to(&overlapping), 0);
    }

    #[test]
    fn test_orphans_and_dangling() {
        let mut ontology = sample_ontology();
        assert_eq!(ontology.orphaned_entity_ids(), vec!["e3".to_string()]);
        assert!(ontology.dangling_relationship_ids().is_empty());

        ontology.remove_entity("e2");
        assert_eq!(ontology.dangling_relationship_ids(), vec!["r1".to_string()]);
    }

    #[test]
    fn test_round_trip_json() {
        let ontology = sample_ontology();
        let restored = Ontology::from_json(&ontology.to_json().unwrap()).unwrap();
        assert_eq!(restored, ontology);
    }

    #[test]
    fn test_round_trip_value() {
        let ontology = sample_ontology();
        let restored = Ontology::from_value(ontology.to_value().unwrap()).unwrap();
        assert_eq!(restored, ontology);
    }

    #[test]
    fn test_content_hash_stable_and_sensitive() {
        let ontology = sample_ontology();
        assert_eq!(ontology.content_hash(), ontology.content_hash());
        assert_eq!(ontology.content_hash(), ontology.clone().content_hash());

        let mut changed = ontology.clone();
        changed
            .entities
            .get_mut("e1")
            .unwrap()
            .properties
            .insert("city".to_string(), serde_json::json!("Berlin"));
        assert_ne!(ontology.content_hash(), changed.content_hash());
    }

    #[test]
    fn test_stats() {
        let stats = sample_ontology().stats();
        assert_eq!(stats.entity_count, 3);
        assert_eq!(stats.relationship_count, 1);
        assert_eq!(stats.orphan_count, 1);
        assert_eq!(stats.entities_by_type.get("Person"), Some(&1));
    }
}
