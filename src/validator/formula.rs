//! Ground-fact conversion for consistency checking.
//!
//! Each entity becomes `entity(id)`, `type(id, T)`, `text(id, name)`; each
//! relationship becomes `rel(type, source, target)`. Conversion is cached by
//! ontology content hash so repeated validation of an unchanged ontology
//! skips the rebuild.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::ontology::Ontology;

/// A ground fact in the typed first-order representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fact", rename_all = "snake_case")]
pub enum Fact {
    /// `entity(id)`: the id denotes an entity.
    Entity { id: String },
    /// `type(id, T)`: the entity has type `T`.
    Type { id: String, entity_type: String },
    /// `text(id, name)`: the entity display text.
    Text { id: String, name: String },
    /// `rel(type, source, target)`: a typed edge.
    Rel {
        relation_type: String,
        source_id: String,
        target_id: String,
    },
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fact::Entity { id } => write!(f, "entity({id})"),
            Fact::Type { id, entity_type } => write!(f, "type({id}, {entity_type})"),
            Fact::Text { id, name } => write!(f, "text({id}, \"{name}\")"),
            Fact::Rel {
                relation_type,
                source_id,
                target_id,
            } => write!(f, "rel({relation_type}, {source_id}, {target_id})"),
        }
    }
}

/// Convert an ontology into its ground facts, in deterministic order.
pub fn convert(ontology: &Ontology) -> Vec<Fact> {
    let mut facts = Vec::with_capacity(ontology.entity_count() * 3 + ontology.relationship_count());

    for entity in ontology.entities.values() {
        facts.push(Fact::Entity {
            id: entity.id.clone(),
        });
        facts.push(Fact::Type {
            id: entity.id.clone(),
            entity_type: entity.entity_type.clone(),
        });
        facts.push(Fact::Text {
            id: entity.id.clone(),
            name: entity.name.clone(),
        });
    }
    for rel in ontology.relationships.values() {
        facts.push(Fact::Rel {
            relation_type: rel.relation_type.clone(),
            source_id: rel.source_id.clone(),
            target_id: rel.target_id.clone(),
        });
    }

    facts
}

/// Entries kept before the cache is coarsely reset.
const CACHE_CAPACITY: usize = 256;

/// Content-hash keyed cache of formula conversions.
///
/// Shared read-mostly across sessions: identical ontology content produces
/// identical facts, so concurrent fills of the same key are benign.
#[derive(Default)]
pub struct FormulaCache {
    inner: RwLock<HashMap<String, Arc<Vec<Fact>>>>,
}

impl FormulaCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the facts for an ontology, converting on first sight.
    pub fn get_or_convert(&self, ontology: &Ontology) -> Arc<Vec<Fact>> {
        let key = ontology.content_hash();

        if let Some(found) = self.inner.read().get(&key) {
            return Arc::clone(found);
        }

        let facts = Arc::new(convert(ontology));
        let mut cache = self.inner.write();
        if cache.len() >= CACHE_CAPACITY {
            cache.clear();
        }
        cache.insert(key, Arc::clone(&facts));
        facts
    }

    /// Number of cached conversions.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Entity, Relationship};

    fn sample() -> Ontology {
        let mut ontology = Ontology::new();
        ontology.insert_entity(Entity::with_id("alice", "Person", "Alice"));
        ontology.insert_entity(Entity::with_id("acme", "Organization", "Acme Corp"));
        ontology.insert_relationship(Relationship::with_id("r1", "alice", "works_at", "acme"));
        ontology
    }

    #[test]
    fn test_convert_shape() {
        let facts = convert(&sample());
        // 3 facts per entity + 1 per relationship.
        assert_eq!(facts.len(), 2 * 3 + 1);
        assert!(facts.contains(&Fact::Entity {
            id: "alice".to_string()
        }));
        assert!(facts.contains(&Fact::Type {
            id: "alice".to_string(),
            entity_type: "Person".to_string()
        }));
    }

    #[test]
    fn test_fact_display() {
        let rel = Fact::Rel {
            relation_type: "works_at".to_string(),
            source_id: "alice".to_string(),
            target_id: "acme".to_string(),
        };
        assert_eq!(rel.to_string(), "rel(works_at, alice, acme)");

        let text = Fact::Text {
            id: "alice".to_string(),
            name: "Alice".to_string(),
        };
        assert_eq!(text.to_string(), "text(alice, \"Alice\")");
    }

    #[test]
    fn test_cache_hits_on_unchanged_content() {
        let cache = FormulaCache::new();
        let ontology = sample();

        let first = cache.get_or_convert(&ontology);
        let second = cache.get_or_convert(&ontology);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_misses_on_changed_content() {
        let cache = FormulaCache::new();
        let mut ontology = sample();

        let first = cache.get_or_convert(&ontology);
        ontology.insert_entity(Entity::with_id("berlin", "Location", "Berlin"));
        let second = cache.get_or_convert(&ontology);

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 2);
    }
}
