//! Ontology refinement.
//!
//! The mediator turns the critic's ranked recommendations into concrete
//! [`RefinementAction`]s, applies the highest-confidence subset, and returns
//! the exact actions taken for audit and rollback. A round's actions are
//! applied against a staged copy and committed together, so a cancelled or
//! failed round never leaves the ontology half-mutated. Individual action
//! failures are logged and skipped; they never abort the round.

mod analysis;

pub use analysis::{
    analyze_batch, analyze_batch_parallel, analyze_trends, BatchReport, Trend, TrendReport,
};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::critic::{canonical_name, CriticScore, Recommendation, RecommendationKind};
use crate::error::{ConfigError, RefinementError, Result};
use crate::generator::{cooccurrence_confidence, RELATED_TO};
use crate::ontology::{Direction, Entity, Ontology, Relationship};

// ============================================================================
// Actions
// ============================================================================

/// One concrete refinement step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementAction {
    /// What to do and to which ids.
    pub kind: RefinementActionKind,
    /// Estimated confidence, used for ranking within a round.
    pub estimated_confidence: f32,
}

/// The action catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RefinementActionKind {
    /// Connect two co-occurring entities with an undirected edge.
    AddMissingRelationship {
        source_id: String,
        target_id: String,
        relation_type: String,
        confidence: f32,
    },
    /// Partition an overloaded entity into two.
    SplitEntity {
        entity_id: String,
        new_entity_id: String,
        new_name: String,
        /// Property keys that move to the new entity.
        property_partition: Vec<String>,
        /// Relationship ids whose endpoint moves to the new entity.
        relation_partition: Vec<String>,
    },
    /// Delete a zero-relationship, low-confidence entity.
    RemoveOrphanedEntity { entity_id: String },
    /// Fold a near-duplicate entity into its survivor.
    MergeRedundantEntities { keep_id: String, remove_id: String },
    /// Add or overwrite properties implied by relationship structure.
    UpdateProperties {
        entity_id: String,
        properties: BTreeMap<String, serde_json::Value>,
    },
    /// Canonicalize the display name; the id never changes.
    RenameEntity { entity_id: String, new_name: String },
}

impl RefinementActionKind {
    /// Short tag for logging and reports.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AddMissingRelationship { .. } => "add_missing_relationship",
            Self::SplitEntity { .. } => "split_entity",
            Self::RemoveOrphanedEntity { .. } => "remove_orphaned_entity",
            Self::MergeRedundantEntities { .. } => "merge_redundant_entities",
            Self::UpdateProperties { .. } => "update_properties",
            Self::RenameEntity { .. } => "rename_entity",
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the mediator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// Maximum actions applied per refinement round.
    pub max_actions_per_round: usize,
    /// Planned actions below this estimated confidence are discarded.
    pub min_action_confidence: f32,
    /// Orphans at or above this confidence are never deleted.
    pub protect_confidence: f32,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            max_actions_per_round: 5,
            min_action_confidence: 0.4,
            protect_confidence: 0.8,
        }
    }
}

impl MediatorConfig {
    /// Validate ranges. Called once at mediator construction.
    pub fn validate(&self) -> Result<()> {
        if self.max_actions_per_round == 0 {
            return Err(
                ConfigError::Invalid("max_actions_per_round must be > 0".to_string()).into(),
            );
        }
        for (field, value) in [
            ("min_action_confidence", self.min_action_confidence),
            ("protect_confidence", self.protect_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    field: field.to_string(),
                    value: value as f64,
                    min: 0.0,
                    max: 1.0,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Build from a loosely-typed map, validating once at the boundary.
    pub fn from_map(map: serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let config: Self = serde_json::from_value(serde_json::Value::Object(map))?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Mediator
// ============================================================================

/// Applies ranked refinement actions to raise the critic score.
pub struct Mediator {
    config: MediatorConfig,
}

impl Mediator {
    /// Create a mediator, validating the configuration.
    pub fn new(config: MediatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The active configuration.
    pub fn config(&self) -> &MediatorConfig {
        &self.config
    }

    /// Plan, rank, and apply one round of refinement.
    ///
    /// Returns exactly the actions that were applied. The ontology is only
    /// mutated if the whole round commits; per-action failures are logged
    /// and the remaining actions still run.
    pub fn refine(
        &self,
        ontology: &mut Ontology,
        score: &CriticScore,
    ) -> Vec<RefinementAction> {
        let mut planned = self.plan_actions(ontology, &score.recommendations);
        planned.sort_by(|a, b| {
            b.estimated_confidence
                .partial_cmp(&a.estimated_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        planned.retain(|a| a.estimated_confidence >= self.config.min_action_confidence);
        planned.truncate(self.config.max_actions_per_round);

        let mut staged = ontology.clone();
        let mut applied = Vec::new();
        for action in planned {
            match self.apply_action(&mut staged, &action) {
                Ok(()) => applied.push(action),
                Err(e) => {
                    warn!(action = action.kind.tag(), error = %e, "refinement action skipped");
                }
            }
        }

        debug!(applied = applied.len(), "refinement round committed");
        *ontology = staged;
        applied
    }

    // ------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------

    fn plan_actions(
        &self,
        ontology: &Ontology,
        recommendations: &[Recommendation],
    ) -> Vec<RefinementAction> {
        let mut actions = Vec::new();

        for recommendation in recommendations {
            match recommendation.kind {
                RecommendationKind::AddMissingRelationships => {
                    actions.extend(self.plan_connections(ontology, &recommendation.target_ids));
                }
                RecommendationKind::RemoveLowConfidenceOrphans => {
                    for id in &recommendation.target_ids {
                        let Some(entity) = ontology.entities.get(id) else {
                            continue;
                        };
                        if entity.confidence >= self.config.protect_confidence {
                            continue;
                        }
                        actions.push(RefinementAction {
                            kind: RefinementActionKind::RemoveOrphanedEntity {
                                entity_id: id.clone(),
                            },
                            estimated_confidence: (1.0 - entity.confidence).clamp(0.0, 1.0),
                        });
                    }
                }
                RecommendationKind::MergeDuplicateEntities => {
                    actions.extend(self.plan_merges(ontology, &recommendation.target_ids));
                }
                RecommendationKind::SplitOverloadedEntity => {
                    for id in &recommendation.target_ids {
                        if let Some(action) = self.plan_split(ontology, id) {
                            actions.push(action);
                        }
                    }
                }
                RecommendationKind::EnrichEntityProperties => {
                    for id in &recommendation.target_ids {
                        if let Some(action) = self.plan_enrichment(ontology, id) {
                            actions.push(action);
                        }
                    }
                }
                RecommendationKind::CanonicalizeEntityNames => {
                    for id in &recommendation.target_ids {
                        let Some(entity) = ontology.entities.get(id) else {
                            continue;
                        };
                        let canonical = canonical_name(&entity.name);
                        if canonical != entity.name && !canonical.is_empty() {
                            actions.push(RefinementAction {
                                kind: RefinementActionKind::RenameEntity {
                                    entity_id: id.clone(),
                                    new_name: canonical,
                                },
                                estimated_confidence: 0.7,
                            });
                        }
                    }
                }
                // Dangling references are the validator's repair domain; its
                // suggested fixes handle them via apply_validation_corrections.
                RecommendationKind::ResolveDanglingReferences => {}
            }
        }

        actions
    }

    /// Connect each orphan to its nearest co-occurring neighbor.
    fn plan_connections(&self, ontology: &Ontology, orphan_ids: &[String]) -> Vec<RefinementAction> {
        let mut actions = Vec::new();

        for orphan_id in orphan_ids {
            let Some(orphan) = ontology.entities.get(orphan_id) else {
                continue;
            };
            let Some(orphan_span) = &orphan.source_span else {
                continue;
            };

            let nearest = ontology
                .entities
                .values()
                .filter(|e| e.id != *orphan_id)
                .filter_map(|e| {
                    let span = e.source_span.as_ref()?;
                    Some((e.id.clone(), orphan_span.distance_to(span)))
                })
                .min_by_key(|(id, distance)| (*distance, id.clone()));

            let Some((neighbor_id, distance)) = nearest else {
                continue;
            };
            let Some(confidence) = cooccurrence_confidence(distance) else {
                continue;
            };

            // Stable endpoint order keeps the edge key deterministic.
            let (source_id, target_id) = if *orphan_id < neighbor_id {
                (orphan_id.clone(), neighbor_id)
            } else {
                (neighbor_id, orphan_id.clone())
            };
            actions.push(RefinementAction {
                kind: RefinementActionKind::AddMissingRelationship {
                    source_id,
                    target_id,
                    relation_type: RELATED_TO.to_string(),
                    confidence,
                },
                estimated_confidence: confidence,
            });
        }

        actions
    }

    /// Pairwise merges within a duplicate group, keeping the most confident.
    fn plan_merges(&self, ontology: &Ontology, group: &[String]) -> Vec<RefinementAction> {
        let mut members: Vec<&Entity> = group
            .iter()
            .filter_map(|id| ontology.entities.get(id))
            .collect();
        if members.len() < 2 {
            return Vec::new();
        }
        members.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });

        let keep = members[0];
        members[1..]
            .iter()
            .map(|remove| RefinementAction {
                kind: RefinementActionKind::MergeRedundantEntities {
                    keep_id: keep.id.clone(),
                    remove_id: remove.id.clone(),
                },
                estimated_confidence: if remove.entity_type.eq_ignore_ascii_case(&keep.entity_type)
                {
                    0.85
                } else {
                    0.6
                },
            })
            .collect()
    }

    fn plan_split(&self, ontology: &Ontology, entity_id: &str) -> Option<RefinementAction> {
        let entity = ontology.entities.get(entity_id)?;
        if entity.properties.len() < 2 {
            return None;
        }

        let mut keys: Vec<String> = entity.properties.keys().cloned().collect();
        keys.sort();
        let property_partition = keys.split_off(keys.len() / 2);

        // Move relationships whose type falls in the second half of the
        // entity's distinct relation types.
        let mut relation_types: Vec<String> = ontology
            .relationships_of(entity_id)
            .iter()
            .map(|r| r.relation_type.clone())
            .collect();
        relation_types.sort();
        relation_types.dedup();
        let moved_types: Vec<String> = relation_types.split_off(relation_types.len() / 2);
        let mut relation_partition: Vec<String> = ontology
            .relationships_of(entity_id)
            .iter()
            .filter(|r| moved_types.contains(&r.relation_type))
            .map(|r| r.id.clone())
            .collect();
        relation_partition.sort();

        Some(RefinementAction {
            kind: RefinementActionKind::SplitEntity {
                entity_id: entity_id.to_string(),
                new_entity_id: uuid::Uuid::new_v4().to_string(),
                new_name: format!("{} (secondary)", entity.name),
                property_partition,
                relation_partition,
            },
            estimated_confidence: 0.5,
        })
    }

    /// Infer properties from the entity's outgoing relationships.
    fn plan_enrichment(&self, ontology: &Ontology, entity_id: &str) -> Option<RefinementAction> {
        ontology.entities.get(entity_id)?;

        let mut inferred: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        for rel in ontology.relationships.values() {
            if rel.source_id != entity_id {
                continue;
            }
            let Some(target) = ontology.entities.get(&rel.target_id) else {
                continue;
            };
            let key = match rel.relation_type.as_str() {
                "works_at" => "employer",
                "located_in" => "location",
                "is_a" => "category",
                "part_of" => "parent",
                "manages" => "manages",
                "founded" => "founded",
                _ => continue,
            };
            inferred.insert(key.to_string(), serde_json::json!(target.name));
        }

        if inferred.is_empty() {
            return None;
        }
        Some(RefinementAction {
            kind: RefinementActionKind::UpdateProperties {
                entity_id: entity_id.to_string(),
                properties: inferred,
            },
            estimated_confidence: 0.6,
        })
    }

    // ------------------------------------------------------------------
    // Application
    // ------------------------------------------------------------------

    fn apply_action(
        &self,
        ontology: &mut Ontology,
        action: &RefinementAction,
    ) -> std::result::Result<(), RefinementError> {
        match &action.kind {
            RefinementActionKind::AddMissingRelationship {
                source_id,
                target_id,
                relation_type,
                confidence,
            } => {
                for id in [source_id, target_id] {
                    if !ontology.entities.contains_key(id) {
                        return Err(RefinementError::TargetMissing(id.clone()));
                    }
                }
                let relationship = Relationship::new(source_id, relation_type, target_id)
                    .with_direction(Direction::Undirected)
                    .with_confidence(*confidence);
                let key = relationship.edge_key();
                if ontology.relationships.values().any(|r| r.edge_key() == key) {
                    return Err(RefinementError::Conflict(format!(
                        "edge {source_id} -[{relation_type}]- {target_id} already exists"
                    )));
                }
                ontology.insert_relationship(relationship);
                Ok(())
            }

            RefinementActionKind::RemoveOrphanedEntity { entity_id } => {
                let entity = ontology
                    .entities
                    .get(entity_id)
                    .ok_or_else(|| RefinementError::TargetMissing(entity_id.clone()))?;
                if entity.confidence >= self.config.protect_confidence {
                    return Err(RefinementError::Protected(entity_id.clone()));
                }
                if !ontology.relationships_of(entity_id).is_empty() {
                    return Err(RefinementError::NotOrphaned(entity_id.clone()));
                }
                ontology.remove_entity(entity_id);
                Ok(())
            }

            RefinementActionKind::MergeRedundantEntities { keep_id, remove_id } => {
                merge_entities(ontology, keep_id, remove_id)
            }

            RefinementActionKind::UpdateProperties {
                entity_id,
                properties,
            } => {
                let entity = ontology
                    .entities
                    .get_mut(entity_id)
                    .ok_or_else(|| RefinementError::TargetMissing(entity_id.clone()))?;
                for (key, value) in properties {
                    entity.properties.insert(key.clone(), value.clone());
                }
                Ok(())
            }

            RefinementActionKind::RenameEntity {
                entity_id,
                new_name,
            } => {
                let entity = ontology
                    .entities
                    .get_mut(entity_id)
                    .ok_or_else(|| RefinementError::TargetMissing(entity_id.clone()))?;
                entity.name = new_name.clone();
                Ok(())
            }

            RefinementActionKind::SplitEntity {
                entity_id,
                new_entity_id,
                new_name,
                property_partition,
                relation_partition,
            } => {
                let original = ontology
                    .entities
                    .get_mut(entity_id)
                    .ok_or_else(|| RefinementError::TargetMissing(entity_id.clone()))?;

                let mut split = Entity::with_id(
                    new_entity_id.clone(),
                    original.entity_type.clone(),
                    new_name.clone(),
                )
                .with_confidence(original.confidence * 0.9);
                for key in property_partition {
                    if let Some(value) = original.properties.remove(key) {
                        split.properties.insert(key.clone(), value);
                    }
                }
                ontology.insert_entity(split);

                for rel_id in relation_partition {
                    let Some(rel) = ontology.relationships.get_mut(rel_id) else {
                        continue;
                    };
                    if rel.source_id == *entity_id {
                        rel.source_id = new_entity_id.clone();
                    } else if rel.target_id == *entity_id {
                        rel.target_id = new_entity_id.clone();
                    }
                }
                Ok(())
            }
        }
    }
}

/// Fold `remove_id` into `keep_id`: union properties (survivor's values
/// win), keep the max confidence, re-point edges, and drop the self-loops
/// and duplicate edges re-pointing can produce.
///
/// Shared with the validator, whose correction application performs the same
/// class of structural edit.
pub(crate) fn merge_entities(
    ontology: &mut Ontology,
    keep_id: &str,
    remove_id: &str,
) -> std::result::Result<(), RefinementError> {
    if !ontology.entities.contains_key(keep_id) {
        return Err(RefinementError::TargetMissing(keep_id.to_string()));
    }
    let removed = ontology
        .remove_entity(remove_id)
        .ok_or_else(|| RefinementError::TargetMissing(remove_id.to_string()))?;

    let keep = ontology
        .entities
        .get_mut(keep_id)
        .expect("keep entity checked above");
    for (key, value) in removed.properties {
        keep.properties.entry(key).or_insert(value);
    }
    keep.confidence = keep.confidence.max(removed.confidence);

    let rel_ids: Vec<String> = ontology.relationships.keys().cloned().collect();
    let mut seen_keys = std::collections::HashSet::new();
    for rel in ontology.relationships.values() {
        if !rel.involves(remove_id) {
            seen_keys.insert(rel.edge_key());
        }
    }
    for rel_id in rel_ids {
        let Some(rel) = ontology.relationships.get_mut(&rel_id) else {
            continue;
        };
        if !rel.involves(remove_id) {
            continue;
        }
        if rel.source_id == remove_id {
            rel.source_id = keep_id.to_string();
        }
        if rel.target_id == remove_id {
            rel.target_id = keep_id.to_string();
        }
        if rel.source_id == rel.target_id || !seen_keys.insert(rel.edge_key()) {
            ontology.remove_relationship(&rel_id);
        }
    }
    Ok(())
}
