//! Ontology quality scoring.
//!
//! The critic is a pure evaluator: it never mutates the ontology it scores.
//! Three weighted dimensions (completeness, connectivity, consistency) form
//! the overall score; two unweighted side signals (clarity, granularity) are
//! surfaced through `dimension_details` and recommendations only.

mod batch;

pub use batch::ThresholdSet;

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::ontology::{connected_components, hierarchy_cycles, normalize_name, Ontology};

/// Weight of the completeness dimension in the overall score.
pub const WEIGHT_COMPLETENESS: f32 = 0.30;
/// Weight of the connectivity dimension in the overall score.
pub const WEIGHT_CONNECTIVITY: f32 = 0.40;
/// Weight of the consistency dimension in the overall score.
pub const WEIGHT_CONSISTENCY: f32 = 0.30;

/// Relationship density at which the density sub-score saturates.
const DENSITY_CEILING: f32 = 1.5;
/// Average property count at which the granularity sub-score saturates.
const PROPERTY_CEILING: f32 = 3.0;

// ============================================================================
// Score types
// ============================================================================

/// The critic's verdict over one ontology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticScore {
    /// Entity-type diversity, property coverage, saturation (0.0-1.0).
    pub completeness: f32,
    /// Density, non-orphan fraction, component structure (0.0-1.0).
    pub connectivity: f32,
    /// Absence of dangling refs, hierarchy cycles, type conflicts (0.0-1.0).
    pub consistency: f32,
    /// Weighted combination of the three dimensions.
    pub overall: f32,
    /// Meta-confidence in this score itself.
    pub confidence: f32,
    /// Auxiliary signals (clarity, granularity, raw sub-scores).
    pub dimension_details: BTreeMap<String, f32>,
    /// Ranked suggestions; doubles as the mediator's candidate list.
    pub recommendations: Vec<Recommendation>,
}

/// A ranked, typed suggestion emitted by the critic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// What class of refinement is suggested.
    pub kind: RecommendationKind,
    /// Human-readable explanation.
    pub detail: String,
    /// Entity/relationship ids the suggestion targets, in stable order.
    pub target_ids: Vec<String>,
    /// Ranking priority (higher first).
    pub priority: f32,
}

/// Classes of refinement the critic can suggest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    /// Connect orphaned or weakly-connected entities.
    AddMissingRelationships,
    /// Delete or enrich low-confidence orphans.
    RemoveLowConfidenceOrphans,
    /// Fold near-duplicate entities together.
    MergeDuplicateEntities,
    /// Split an entity accumulating distinct semantic roles.
    SplitOverloadedEntity,
    /// Infer properties from relationship structure.
    EnrichEntityProperties,
    /// Canonicalize inconsistent naming.
    CanonicalizeEntityNames,
    /// Repair dangling relationship references.
    ResolveDanglingReferences,
}

impl RecommendationKind {
    /// Short tag for logging and aggregation.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AddMissingRelationships => "add_missing_relationships",
            Self::RemoveLowConfidenceOrphans => "remove_low_confidence_orphans",
            Self::MergeDuplicateEntities => "merge_duplicate_entities",
            Self::SplitOverloadedEntity => "split_overloaded_entity",
            Self::EnrichEntityProperties => "enrich_entity_properties",
            Self::CanonicalizeEntityNames => "canonicalize_entity_names",
            Self::ResolveDanglingReferences => "resolve_dangling_references",
        }
    }
}

/// Per-evaluation context the ontology alone cannot supply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CritiqueContext {
    /// Size of the originating input in characters; 0 means unknown, in
    /// which case the generator's `source_chars` metadata is consulted.
    pub input_chars: usize,
}

impl CritiqueContext {
    /// Context for an input of the given size.
    pub fn for_input_chars(input_chars: usize) -> Self {
        Self { input_chars }
    }
}

// ============================================================================
// Critic
// ============================================================================

/// Pure scoring function over ontologies.
///
/// Calibration state (recommendation thresholds) is an explicit versioned
/// snapshot behind a read-mostly lock; scoring reads one snapshot per call
/// and never writes.
pub struct Critic {
    thresholds: RwLock<ThresholdSet>,
}

impl Default for Critic {
    fn default() -> Self {
        Self::new()
    }
}

impl Critic {
    /// Create a critic with default thresholds.
    pub fn new() -> Self {
        Self::with_thresholds(ThresholdSet::default())
    }

    /// Create a critic with a specific threshold snapshot.
    pub fn with_thresholds(thresholds: ThresholdSet) -> Self {
        Self {
            thresholds: RwLock::new(thresholds),
        }
    }

    /// The current threshold snapshot.
    pub fn thresholds(&self) -> ThresholdSet {
        *self.thresholds.read()
    }

    /// Replace the threshold snapshot (coarse-grained, infrequent).
    pub fn apply_thresholds(&self, thresholds: ThresholdSet) {
        *self.thresholds.write() = thresholds;
    }

    /// Score an ontology. Read-only; identical inputs yield identical
    /// scores.
    pub fn evaluate(&self, ontology: &Ontology, context: &CritiqueContext) -> CriticScore {
        let thresholds = self.thresholds();
        Self::evaluate_with(ontology, context, &thresholds)
    }

    /// Score with an explicit threshold snapshot (the batch entry point).
    pub(crate) fn evaluate_with(
        ontology: &Ontology,
        context: &CritiqueContext,
        thresholds: &ThresholdSet,
    ) -> CriticScore {
        let entity_count = ontology.entity_count();
        let relationship_count = ontology.relationship_count();
        let orphans = ontology.orphaned_entity_ids();
        let dangling = ontology.dangling_relationship_ids();
        let cycles = hierarchy_cycles(ontology);
        let conflict_groups = conflicting_type_groups(ontology);
        let input_chars = effective_input_chars(ontology, context);

        // --- completeness -------------------------------------------------
        let completeness = if entity_count == 0 {
            0.0
        } else {
            let distinct_types: HashSet<&str> = ontology
                .entities
                .values()
                .map(|e| e.entity_type.as_str())
                .collect();
            let type_diversity = distinct_types.len() as f32 / entity_count as f32;

            let with_properties = ontology
                .entities
                .values()
                .filter(|e| !e.properties.is_empty())
                .count();
            let property_coverage = with_properties as f32 / entity_count as f32;

            // Diminishing returns: more text should yield proportionally
            // fewer new entities before this saturates.
            let saturation = if input_chars == 0 {
                0.5
            } else {
                let expected = (input_chars as f32 / 100.0) + 1.0;
                let ratio = entity_count as f32 / expected;
                ratio / (ratio + 1.0)
            };

            (type_diversity + property_coverage + saturation) / 3.0
        };

        // --- connectivity -------------------------------------------------
        let components = connected_components(ontology);
        let connectivity = if entity_count == 0 {
            0.0
        } else {
            let density = relationship_count as f32 / entity_count as f32;
            let density_score = (density / DENSITY_CEILING).min(1.0);
            let non_orphan = 1.0 - orphans.len() as f32 / entity_count as f32;
            let component_score =
                (entity_count - components + 1) as f32 / entity_count as f32;
            (density_score + non_orphan + component_score) / 3.0
        };

        // --- consistency --------------------------------------------------
        let dangling_fraction = if relationship_count == 0 {
            0.0
        } else {
            dangling.len() as f32 / relationship_count as f32
        };
        let consistency = (1.0
            - 0.5 * dangling_fraction
            - 0.25 * cycles.len().min(2) as f32
            - 0.1 * conflict_groups.len().min(3) as f32)
            .clamp(0.0, 1.0);

        // --- side signals -------------------------------------------------
        let clarity = clarity_signal(ontology);
        let granularity = granularity_signal(ontology);

        let overall = (WEIGHT_COMPLETENESS * completeness
            + WEIGHT_CONNECTIVITY * connectivity
            + WEIGHT_CONSISTENCY * consistency)
            .clamp(0.0, 1.0);

        let confidence = if entity_count == 0 {
            0.1
        } else {
            0.3 + 0.65 * (entity_count as f32 / 20.0).min(1.0)
        };

        let mut dimension_details = BTreeMap::new();
        dimension_details.insert("clarity".to_string(), clarity);
        dimension_details.insert("granularity".to_string(), granularity);
        dimension_details.insert("components".to_string(), components as f32);
        dimension_details.insert(
            "orphan_fraction".to_string(),
            if entity_count == 0 {
                0.0
            } else {
                orphans.len() as f32 / entity_count as f32
            },
        );
        dimension_details.insert("dangling_fraction".to_string(), dangling_fraction);

        let recommendations = build_recommendations(
            ontology,
            thresholds,
            &Signals {
                completeness,
                connectivity,
                consistency,
                clarity,
                granularity,
                orphans: &orphans,
                dangling: &dangling,
                conflict_groups: &conflict_groups,
            },
        );

        CriticScore {
            completeness,
            connectivity,
            consistency,
            overall,
            confidence,
            dimension_details,
            recommendations,
        }
    }
}

fn effective_input_chars(ontology: &Ontology, context: &CritiqueContext) -> usize {
    if context.input_chars > 0 {
        return context.input_chars;
    }
    ontology
        .metadata
        .get("source_chars")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize
}

/// Groups of entities sharing a normalized name while disagreeing on type.
fn conflicting_type_groups(ontology: &Ontology) -> Vec<Vec<String>> {
    let mut by_name: BTreeMap<String, Vec<&crate::ontology::Entity>> = BTreeMap::new();
    for entity in ontology.entities.values() {
        by_name
            .entry(normalize_name(&entity.name))
            .or_default()
            .push(entity);
    }
    by_name
        .into_values()
        .filter(|group| {
            group
                .iter()
                .map(|e| e.entity_type.to_lowercase())
                .collect::<HashSet<_>>()
                .len()
                > 1
        })
        .map(|group| group.iter().map(|e| e.id.clone()).collect())
        .collect()
}

/// Naming hygiene: clean names, penalized for casing-inconsistent groups.
fn clarity_signal(ontology: &Ontology) -> f32 {
    if ontology.entities.is_empty() {
        return 0.0;
    }

    let clean = ontology
        .entities
        .values()
        .filter(|e| !e.name.is_empty() && canonical_name(&e.name) == e.name)
        .count();
    let clean_fraction = clean as f32 / ontology.entity_count() as f32;

    let mut groups: HashMap<String, HashSet<&str>> = HashMap::new();
    for entity in ontology.entities.values() {
        groups
            .entry(normalize_name(&entity.name))
            .or_default()
            .insert(entity.name.as_str());
    }
    let inconsistent = groups.values().filter(|raw| raw.len() > 1).count();
    let inconsistent_fraction = inconsistent as f32 / groups.len().max(1) as f32;

    clean_fraction * (1.0 - inconsistent_fraction)
}

/// Detail level: property richness and relationship-type specificity.
fn granularity_signal(ontology: &Ontology) -> f32 {
    if ontology.entities.is_empty() {
        return 0.0;
    }

    let total_properties: usize = ontology
        .entities
        .values()
        .map(|e| e.properties.len())
        .sum();
    let avg_properties = total_properties as f32 / ontology.entity_count() as f32;
    let property_score = (avg_properties / PROPERTY_CEILING).min(1.0);

    let specific_fraction = if ontology.relationships.is_empty() {
        0.0
    } else {
        let specific = ontology
            .relationships
            .values()
            .filter(|r| r.relation_type != crate::generator::RELATED_TO)
            .count();
        specific as f32 / ontology.relationship_count() as f32
    };

    (property_score + specific_fraction) / 2.0
}

struct Signals<'a> {
    completeness: f32,
    connectivity: f32,
    consistency: f32,
    clarity: f32,
    granularity: f32,
    orphans: &'a [String],
    dangling: &'a [String],
    conflict_groups: &'a [Vec<String>],
}

fn build_recommendations(
    ontology: &Ontology,
    thresholds: &ThresholdSet,
    signals: &Signals<'_>,
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if signals.connectivity < thresholds.connectivity && !signals.orphans.is_empty() {
        recommendations.push(Recommendation {
            kind: RecommendationKind::AddMissingRelationships,
            detail: format!(
                "{} entities have no relationships; connect co-occurring ones",
                signals.orphans.len()
            ),
            target_ids: signals.orphans.to_vec(),
            priority: (thresholds.connectivity - signals.connectivity) + 0.5,
        });
    }

    if signals.completeness < thresholds.completeness {
        let weak_orphans: Vec<String> = signals
            .orphans
            .iter()
            .filter(|id| {
                ontology
                    .entities
                    .get(*id)
                    .map(|e| e.confidence < 0.5)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if !weak_orphans.is_empty() {
            recommendations.push(Recommendation {
                kind: RecommendationKind::RemoveLowConfidenceOrphans,
                detail: format!(
                    "{} low-confidence orphaned entities drag completeness down",
                    weak_orphans.len()
                ),
                target_ids: weak_orphans,
                priority: (thresholds.completeness - signals.completeness) + 0.4,
            });
        }
    }

    if signals.consistency < thresholds.consistency && !signals.dangling.is_empty() {
        recommendations.push(Recommendation {
            kind: RecommendationKind::ResolveDanglingReferences,
            detail: format!(
                "{} relationships reference missing entities",
                signals.dangling.len()
            ),
            target_ids: signals.dangling.to_vec(),
            priority: (thresholds.consistency - signals.consistency) + 0.6,
        });
    }

    for group in duplicate_entity_groups(ontology) {
        recommendations.push(Recommendation {
            kind: RecommendationKind::MergeDuplicateEntities,
            detail: "entities share a normalized name and type".to_string(),
            target_ids: group,
            priority: 0.55,
        });
    }

    for group in signals.conflict_groups {
        recommendations.push(Recommendation {
            kind: RecommendationKind::MergeDuplicateEntities,
            detail: "entities share a name but disagree on type".to_string(),
            target_ids: group.clone(),
            priority: 0.45,
        });
    }

    for id in overloaded_entities(ontology) {
        recommendations.push(Recommendation {
            kind: RecommendationKind::SplitOverloadedEntity,
            detail: "entity accumulates properties and relationships across distinct roles"
                .to_string(),
            target_ids: vec![id],
            priority: 0.35,
        });
    }

    if signals.granularity < thresholds.granularity {
        let enrichable: Vec<String> = ontology
            .entities
            .values()
            .filter(|e| e.properties.is_empty() && !ontology.relationships_of(&e.id).is_empty())
            .map(|e| e.id.clone())
            .collect();
        if !enrichable.is_empty() {
            recommendations.push(Recommendation {
                kind: RecommendationKind::EnrichEntityProperties,
                detail: format!(
                    "{} connected entities carry no properties",
                    enrichable.len()
                ),
                target_ids: enrichable,
                priority: (thresholds.granularity - signals.granularity) + 0.3,
            });
        }
    }

    if signals.clarity < thresholds.clarity {
        let messy: Vec<String> = ontology
            .entities
            .values()
            .filter(|e| canonical_name(&e.name) != e.name)
            .map(|e| e.id.clone())
            .collect();
        if !messy.is_empty() {
            recommendations.push(Recommendation {
                kind: RecommendationKind::CanonicalizeEntityNames,
                detail: format!("{} entity names need canonicalization", messy.len()),
                target_ids: messy,
                priority: (thresholds.clarity - signals.clarity) + 0.2,
            });
        }
    }

    recommendations.sort_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    recommendations
}

/// Groups of distinct entities sharing normalized (name, type).
fn duplicate_entity_groups(ontology: &Ontology) -> Vec<Vec<String>> {
    let mut by_key: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for entity in ontology.entities.values() {
        by_key
            .entry(entity.normalized_key())
            .or_default()
            .push(entity.id.clone());
    }
    by_key
        .into_values()
        .filter(|ids| ids.len() > 1)
        .collect()
}

/// Entities whose property and relationship spread suggests distinct roles.
fn overloaded_entities(ontology: &Ontology) -> Vec<String> {
    ontology
        .entities
        .values()
        .filter(|e| {
            if e.properties.len() < 6 {
                return false;
            }
            let relation_types: HashSet<&str> = ontology
                .relationships_of(&e.id)
                .iter()
                .map(|r| r.relation_type.as_str())
                .collect();
            relation_types.len() >= 4
        })
        .map(|e| e.id.clone())
        .collect()
}

/// Trim, collapse whitespace, and title-case each word.
pub(crate) fn canonical_name(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) if word.chars().all(|c| !c.is_lowercase()) && word.len() > 1 => {
                    // Acronyms (all-caps, multi-char) stay as-is.
                    let mut s = String::new();
                    s.push(first);
                    s.extend(chars);
                    s
                }
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
