//! Logical and structural consistency checking.
//!
//! The validator is a read-only evaluator. Structural checks (dangling
//! references, hierarchy cycles, type conflicts) always run; logical checks
//! run only when a prover backend is configured and degrade gracefully to
//! the structural subset on timeout or backend failure. Suggested fixes are
//! returned, never auto-applied; callers opt in via
//! [`LogicValidator::apply_validation_corrections`].

mod formula;
mod prover;

pub use formula::{convert, Fact, FormulaCache};
pub use prover::{CounterModel, ProverBackend, ProverResponse, SatOutcome};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mediator::merge_entities;
use crate::ontology::{hierarchy_cycles, normalize_name, Entity, Ontology, HIERARCHY_TYPES};

// ============================================================================
// Result types
// ============================================================================

/// Kinds of detected contradictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionKind {
    /// A relationship references a missing entity.
    DanglingReference,
    /// A cycle through `is_a`/`part_of` edges.
    CircularDependency,
    /// Entities sharing a name while disagreeing on type.
    TypeConflict,
    /// Reported by the prover backend.
    LogicalInconsistency,
}

/// How serious a contradiction is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// One detected contradiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    /// Human-readable description (cycles include the full path).
    pub description: String,
    /// Classification.
    pub kind: ContradictionKind,
    /// Entity/relationship ids involved.
    pub involved_ids: Vec<String>,
    /// Severity.
    pub severity: Severity,
}

/// Kinds of suggested fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    /// Create a placeholder entity for a dangling reference.
    AddMissingEntity,
    /// Remove the dangling relationship.
    RemoveDanglingReference,
    /// Remove the weakest relationship in a cycle.
    BreakCycle,
    /// Fold one entity into another.
    MergeEntities,
    /// Needs a human decision; never applied automatically.
    ManualReview,
}

/// One candidate fix for a contradiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedFix {
    /// Human-readable description.
    pub description: String,
    /// Classification.
    pub fix_kind: FixKind,
    /// The entity/relationship id the fix targets.
    pub target_id: String,
    /// Secondary id where the fix needs one (merge survivor).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    /// Confidence that applying this fix is correct.
    pub confidence: f32,
}

/// Outcome of a consistency check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Detected contradictions.
    pub contradictions: Vec<Contradiction>,
    /// Candidate fixes; at least one per contradiction.
    pub fixes: Vec<SuggestedFix>,
    /// Whether the ontology is consistent under the checks that ran.
    pub is_consistent: bool,
    /// Whether logical (prover-backed) checks actually ran.
    pub checked_logical: bool,
}

// ============================================================================
// Validator
// ============================================================================

/// Default per-call timeout for prover invocations.
const DEFAULT_PROVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-only consistency checker over ontologies.
pub struct LogicValidator {
    prover: Option<Arc<dyn ProverBackend>>,
    cache: Arc<FormulaCache>,
    axioms: Vec<String>,
    call_timeout: Duration,
}

impl Default for LogicValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl LogicValidator {
    /// Create a validator with structural checks only.
    pub fn new() -> Self {
        Self {
            prover: None,
            cache: Arc::new(FormulaCache::new()),
            axioms: Vec::new(),
            call_timeout: DEFAULT_PROVER_TIMEOUT,
        }
    }

    /// Attach a prover backend, enabling logical checks.
    pub fn with_prover(mut self, prover: Arc<dyn ProverBackend>) -> Self {
        self.prover = Some(prover);
        self
    }

    /// Domain axioms passed to the prover alongside the ground facts.
    pub fn with_axioms(mut self, axioms: Vec<String>) -> Self {
        self.axioms = axioms;
        self
    }

    /// Per-call prover timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Share a formula cache across validators/sessions.
    pub fn with_cache(mut self, cache: Arc<FormulaCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Whether a prover backend is configured.
    pub fn has_prover(&self) -> bool {
        self.prover.is_some()
    }

    /// Check consistency. Never fails: prover trouble degrades to the
    /// structural subset and is recorded via `checked_logical`.
    pub async fn check_consistency(&self, ontology: &Ontology) -> ValidationResult {
        let mut result = self.check_structural(ontology);

        if let Some(prover) = &self.prover {
            let facts = self.cache.get_or_convert(ontology);
            let call = prover.check_satisfiable(&facts, &self.axioms, self.call_timeout);
            match tokio::time::timeout(self.call_timeout, call).await {
                Ok(Ok(response)) => match response.outcome {
                    SatOutcome::Sat => {
                        result.checked_logical = true;
                    }
                    SatOutcome::Unsat => {
                        result.checked_logical = true;
                        let description = match &response.counter_model {
                            Some(model) => {
                                format!("facts are unsatisfiable under domain axioms; {model}")
                            }
                            None => "facts are unsatisfiable under domain axioms".to_string(),
                        };
                        let involved_ids = response
                            .counter_model
                            .as_ref()
                            .map(|m| m.bindings.iter().map(|(_, v)| v.clone()).collect())
                            .unwrap_or_default();
                        result.contradictions.push(Contradiction {
                            description,
                            kind: ContradictionKind::LogicalInconsistency,
                            involved_ids,
                            severity: Severity::Critical,
                        });
                        result.fixes.push(SuggestedFix {
                            description: "review the involved facts against the domain axioms"
                                .to_string(),
                            fix_kind: FixKind::ManualReview,
                            target_id: String::new(),
                            related_id: None,
                            confidence: 0.5,
                        });
                    }
                    SatOutcome::Unknown => {
                        warn!(prover = prover.name(), "prover returned unknown");
                    }
                },
                Ok(Err(e)) => {
                    warn!(prover = prover.name(), error = %e, "prover unavailable, structural checks only");
                }
                Err(_) => {
                    warn!(
                        prover = prover.name(),
                        timeout_ms = self.call_timeout.as_millis() as u64,
                        "prover call timed out, structural checks only"
                    );
                }
            }
        }

        result.is_consistent = result.contradictions.is_empty();
        result
    }

    /// Run the structural checks alone (no prover, no awaiting).
    pub fn check_structural(&self, ontology: &Ontology) -> ValidationResult {
        let mut contradictions = Vec::new();
        let mut fixes = Vec::new();

        self.check_dangling(ontology, &mut contradictions, &mut fixes);
        self.check_cycles(ontology, &mut contradictions, &mut fixes);
        self.check_type_conflicts(ontology, &mut contradictions, &mut fixes);

        debug!(
            contradictions = contradictions.len(),
            "structural validation complete"
        );
        ValidationResult {
            is_consistent: contradictions.is_empty(),
            contradictions,
            fixes,
            checked_logical: false,
        }
    }

    fn check_dangling(
        &self,
        ontology: &Ontology,
        contradictions: &mut Vec<Contradiction>,
        fixes: &mut Vec<SuggestedFix>,
    ) {
        for rel in ontology.relationships.values() {
            let mut missing: Vec<&str> = Vec::new();
            for id in [&rel.source_id, &rel.target_id] {
                if !ontology.entities.contains_key(id) {
                    missing.push(id);
                }
            }
            if missing.is_empty() {
                continue;
            }

            let mut involved_ids = vec![rel.id.clone()];
            involved_ids.extend(missing.iter().map(|s| s.to_string()));
            contradictions.push(Contradiction {
                description: format!(
                    "relationship {} ({}) references missing entity {}",
                    rel.id,
                    rel.relation_type,
                    missing.join(", ")
                ),
                kind: ContradictionKind::DanglingReference,
                involved_ids,
                severity: Severity::Error,
            });
            fixes.push(SuggestedFix {
                description: "add missing entity or remove dangling reference".to_string(),
                fix_kind: FixKind::RemoveDanglingReference,
                target_id: rel.id.clone(),
                related_id: None,
                confidence: 0.75,
            });
            for id in missing {
                fixes.push(SuggestedFix {
                    description: format!("create placeholder entity {id}"),
                    fix_kind: FixKind::AddMissingEntity,
                    target_id: id.to_string(),
                    related_id: None,
                    confidence: 0.5,
                });
            }
        }
    }

    fn check_cycles(
        &self,
        ontology: &Ontology,
        contradictions: &mut Vec<Contradiction>,
        fixes: &mut Vec<SuggestedFix>,
    ) {
        for cycle in hierarchy_cycles(ontology) {
            let path = cycle.join(" -> ");
            let mut involved_ids = cycle.clone();
            involved_ids.pop(); // drop the repeated closing id

            // The weakest hierarchy edge along the cycle is the break point.
            let weakest = ontology
                .relationships
                .values()
                .filter(|r| HIERARCHY_TYPES.contains(&r.relation_type.as_str()))
                .filter(|r| {
                    cycle
                        .windows(2)
                        .any(|w| r.source_id == w[0] && r.target_id == w[1])
                })
                .min_by(|a, b| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.id.cmp(&b.id))
                });

            contradictions.push(Contradiction {
                description: format!("circular dependency: {path}"),
                kind: ContradictionKind::CircularDependency,
                involved_ids,
                severity: Severity::Error,
            });
            if let Some(rel) = weakest {
                fixes.push(SuggestedFix {
                    description: format!(
                        "break the cycle by removing {} ({})",
                        rel.id, rel.relation_type
                    ),
                    fix_kind: FixKind::BreakCycle,
                    target_id: rel.id.clone(),
                    related_id: None,
                    confidence: 0.6,
                });
            }
        }
    }

    fn check_type_conflicts(
        &self,
        ontology: &Ontology,
        contradictions: &mut Vec<Contradiction>,
        fixes: &mut Vec<SuggestedFix>,
    ) {
        let mut by_name: BTreeMap<String, Vec<&Entity>> = BTreeMap::new();
        for entity in ontology.entities.values() {
            by_name
                .entry(normalize_name(&entity.name))
                .or_default()
                .push(entity);
        }

        for (name, group) in by_name {
            let mut types: Vec<&str> = group.iter().map(|e| e.entity_type.as_str()).collect();
            types.sort();
            types.dedup();
            if types.len() < 2 {
                continue;
            }

            // The most confident member survives a merge.
            let mut members = group.clone();
            members.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.id.cmp(&b.id))
            });
            let survivor = members[0];

            contradictions.push(Contradiction {
                description: format!(
                    "entity '{}' asserted with conflicting types: {}",
                    name,
                    types.join(", ")
                ),
                kind: ContradictionKind::TypeConflict,
                involved_ids: group.iter().map(|e| e.id.clone()).collect(),
                severity: Severity::Warning,
            });
            for member in &members[1..] {
                fixes.push(SuggestedFix {
                    description: format!("merge {} into {}", member.id, survivor.id),
                    fix_kind: FixKind::MergeEntities,
                    target_id: member.id.clone(),
                    related_id: Some(survivor.id.clone()),
                    confidence: 0.55,
                });
            }
        }
    }

    /// Apply a set of suggested fixes, returning the ones that took effect.
    ///
    /// Fix application performs the same class of structural edits as the
    /// mediator's action catalogue; fixes whose preconditions no longer hold
    /// are skipped with a warning.
    pub fn apply_validation_corrections(
        ontology: &mut Ontology,
        corrections: &[SuggestedFix],
    ) -> Vec<SuggestedFix> {
        let mut applied = Vec::new();

        for fix in corrections {
            let ok = match fix.fix_kind {
                FixKind::RemoveDanglingReference | FixKind::BreakCycle => {
                    ontology.remove_relationship(&fix.target_id).is_some()
                }
                FixKind::AddMissingEntity => {
                    if ontology.entities.contains_key(&fix.target_id) {
                        false
                    } else {
                        ontology.insert_entity(
                            Entity::with_id(&fix.target_id, "Unknown", &fix.target_id)
                                .with_confidence(0.3),
                        );
                        true
                    }
                }
                FixKind::MergeEntities => match &fix.related_id {
                    Some(keep_id) => {
                        merge_entities(ontology, keep_id, &fix.target_id).is_ok()
                    }
                    None => false,
                },
                FixKind::ManualReview => false,
            };

            if ok {
                applied.push(fix.clone());
            } else {
                warn!(fix = ?fix.fix_kind, target = %fix.target_id, "correction skipped");
            }
        }

        applied
    }
}
