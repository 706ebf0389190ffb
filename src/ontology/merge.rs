//! Multi-document ontology merging.
//!
//! Entities are deduplicated by normalized (name, type); the later ontology's
//! properties win on conflict and the higher confidence is kept.
//! Relationships are unioned with the same entity-id remapping applied, and a
//! provenance map records which source each surviving id came from.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::types::{Entity, Ontology, Relationship};

/// Provenance and accounting for a merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeReport {
    /// Surviving entity/relationship id -> originating source tags.
    pub provenance: HashMap<String, Vec<String>>,
    /// Ids from the merged-in ontology remapped onto surviving ids.
    pub id_remap: HashMap<String, String>,
    /// Entities that were folded into an existing entity.
    pub entities_merged: usize,
    /// Relationships that were folded into an existing relationship.
    pub relationships_merged: usize,
}

impl MergeReport {
    fn record_source(&mut self, id: &str, tag: &str) {
        let sources = self.provenance.entry(id.to_string()).or_default();
        if !sources.iter().any(|s| s == tag) {
            sources.push(tag.to_string());
        }
    }
}

/// Merge `other` into `base`, producing a new ontology.
///
/// `base_tag`/`other_tag` identify the originating sources in the report's
/// provenance map. Merging an ontology with itself is structurally a no-op.
pub fn merge(
    base: &Ontology,
    other: &Ontology,
    base_tag: &str,
    other_tag: &str,
) -> (Ontology, MergeReport) {
    let mut merged = base.clone();
    let mut report = MergeReport::default();

    for id in base.entities.keys() {
        report.record_source(id, base_tag);
    }
    for id in base.relationships.keys() {
        report.record_source(id, base_tag);
    }

    // Entities: dedupe by normalized (name, type). Other's properties win on
    // conflict; confidence is the max of the two.
    for entity in other.entities.values() {
        let existing_id = merged
            .find_entity_by_key(&entity.name, &entity.entity_type)
            .map(|e| e.id.clone());

        match existing_id {
            Some(survivor_id) => {
                let survivor = merged
                    .entities
                    .get_mut(&survivor_id)
                    .expect("survivor id resolved above");
                for (key, value) in &entity.properties {
                    survivor.properties.insert(key.clone(), value.clone());
                }
                survivor.confidence = survivor.confidence.max(entity.confidence);
                report.id_remap.insert(entity.id.clone(), survivor_id.clone());
                report.record_source(&survivor_id, other_tag);
                if entity.id != survivor_id {
                    report.entities_merged += 1;
                }
            }
            None => {
                let mut incoming = entity.clone();
                // An id collision across distinct entities gets a fresh id so
                // ids stay unique within the merged ontology.
                if merged.entities.contains_key(&incoming.id) {
                    let fresh = uuid::Uuid::new_v4().to_string();
                    report.id_remap.insert(incoming.id.clone(), fresh.clone());
                    incoming.id = fresh;
                }
                report.record_source(&incoming.id, other_tag);
                merged.insert_entity(incoming);
            }
        }
    }

    // Relationships: union with the entity remap applied. A relationship
    // matching an existing one by id or by edge key folds into it.
    for rel in other.relationships.values() {
        let mut incoming = remap_relationship(rel, &report.id_remap);

        if let Some(existing) = merged.relationships.get_mut(&incoming.id) {
            fold_relationship(existing, &incoming);
            report.relationships_merged += 1;
            report.record_source(&incoming.id, other_tag);
            continue;
        }

        let duplicate_id = merged
            .relationships
            .values()
            .find(|r| r.edge_key() == incoming.edge_key())
            .map(|r| r.id.clone());
        if let Some(dup_id) = duplicate_id {
            let existing = merged
                .relationships
                .get_mut(&dup_id)
                .expect("duplicate id resolved above");
            fold_relationship(existing, &incoming);
            report.id_remap.insert(incoming.id.clone(), dup_id.clone());
            report.relationships_merged += 1;
            report.record_source(&dup_id, other_tag);
            continue;
        }

        if merged.relationships.contains_key(&incoming.id) {
            let fresh = uuid::Uuid::new_v4().to_string();
            report.id_remap.insert(incoming.id.clone(), fresh.clone());
            incoming.id = fresh;
        }
        report.record_source(&incoming.id, other_tag);
        merged.insert_relationship(incoming);
    }

    for (key, value) in &other.metadata {
        merged
            .metadata
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }

    (merged, report)
}

fn remap_relationship(rel: &Relationship, id_remap: &HashMap<String, String>) -> Relationship {
    let mut remapped = rel.clone();
    if let Some(new_source) = id_remap.get(&remapped.source_id) {
        remapped.source_id = new_source.clone();
    }
    if let Some(new_target) = id_remap.get(&remapped.target_id) {
        remapped.target_id = new_target.clone();
    }
    remapped
}

fn fold_relationship(existing: &mut Relationship, incoming: &Relationship) {
    for (key, value) in &incoming.properties {
        existing.properties.insert(key.clone(), value.clone());
    }
    existing.confidence = existing.confidence.max(incoming.confidence);
}

/// Merge a sequence of tagged ontologies left to right.
pub fn merge_all(tagged: &[(String, Ontology)]) -> (Ontology, MergeReport) {
    let mut iter = tagged.iter();
    let Some((first_tag, first)) = iter.next() else {
        return (Ontology::new(), MergeReport::default());
    };

    let mut merged = first.clone();
    let mut report = MergeReport::default();
    for id in merged.entities.keys().chain(merged.relationships.keys()) {
        report.record_source(id, first_tag);
    }

    for (tag, ontology) in iter {
        let (next, step) = merge(&merged, ontology, "", tag);
        merged = next;
        // Fold the step's provenance into the running report, dropping the
        // placeholder base tag (base provenance is already tracked).
        for (id, sources) in step.provenance {
            for source in sources.into_iter().filter(|s| !s.is_empty()) {
                report.record_source(&id, &source);
            }
        }
        for (from, to) in step.id_remap {
            report.id_remap.insert(from, to);
        }
        report.entities_merged += step.entities_merged;
        report.relationships_merged += step.relationships_merged;
    }

    (merged, report)
}

/// Convenience trait-style accessor: entity sources after a merge.
impl MergeReport {
    /// Source tags a given surviving id was derived from.
    pub fn sources_of(&self, id: &str) -> &[String] {
        self.provenance.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::types::Direction;

    fn doc_a() -> Ontology {
        let mut ontology = Ontology::new();
        ontology.insert_entity(
            Entity::with_id("a1", "Person", "Alice")
                .with_confidence(0.7)
                .with_property("role", serde_json::json!("engineer")),
        );
        ontology.insert_entity(Entity::with_id("a2", "Organization", "Acme Corp"));
        ontology.insert_relationship(
            Relationship::with_id("ar1", "a1", "works_at", "a2")
                .with_direction(Direction::SubjectToObject)
                .with_confidence(0.65),
        );
        ontology
    }

    fn doc_b() -> Ontology {
        let mut ontology = Ontology::new();
        ontology.insert_entity(
            Entity::with_id("b1", "Person", "alice")
                .with_confidence(0.9)
                .with_property("role", serde_json::json!("manager"))
                .with_property("city", serde_json::json!("Berlin")),
        );
        ontology.insert_entity(Entity::with_id("b2", "Location", "Berlin"));
        ontology.insert_relationship(
            Relationship::with_id("br1", "b1", "located_in", "b2")
                .with_direction(Direction::SubjectToObject),
        );
        ontology
    }

    #[test]
    fn test_merge_dedupes_by_normalized_key() {
        let (merged, report) = merge(&doc_a(), &doc_b(), "doc-a", "doc-b");

        // alice folded into Alice; Acme and Berlin distinct.
        assert_eq!(merged.entity_count(), 3);
        assert_eq!(report.entities_merged, 1);

        let alice = merged.entities.get("a1").unwrap();
        // Later properties win on conflict, higher confidence kept.
        assert_eq!(alice.properties["role"], serde_json::json!("manager"));
        assert_eq!(alice.properties["city"], serde_json::json!("Berlin"));
        assert!((alice.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_merge_remaps_relationships() {
        let (merged, _) = merge(&doc_a(), &doc_b(), "doc-a", "doc-b");

        let located = merged.relationships.get("br1").unwrap();
        assert_eq!(located.source_id, "a1"); // remapped from b1
        assert!(merged.dangling_relationship_ids().is_empty());
    }

    #[test]
    fn test_merge_provenance_derivable() {
        let (_, report) = merge(&doc_a(), &doc_b(), "doc-a", "doc-b");

        assert_eq!(report.sources_of("a1"), ["doc-a", "doc-b"]);
        assert_eq!(report.sources_of("b2"), ["doc-b"]);
        assert_eq!(report.id_remap.get("b1"), Some(&"a1".to_string()));
    }

    #[test]
    fn test_merge_idempotent() {
        let a = doc_a();
        let (merged, _) = merge(&a, &a, "doc-a", "doc-a");

        assert_eq!(merged.entity_count(), a.entity_count());
        assert_eq!(merged.relationship_count(), a.relationship_count());
        assert_eq!(merged, a);
    }

    #[test]
    fn test_merge_all_empty() {
        let (merged, report) = merge_all(&[]);
        assert!(merged.is_empty());
        assert!(report.provenance.is_empty());
    }

    #[test]
    fn test_merge_all_chain() {
        let tagged = vec![
            ("doc-a".to_string(), doc_a()),
            ("doc-b".to_string(), doc_b()),
        ];
        let (merged, report) = merge_all(&tagged);
        assert_eq!(merged.entity_count(), 3);
        assert_eq!(report.sources_of("a1"), ["doc-a", "doc-b"]);
    }
}
