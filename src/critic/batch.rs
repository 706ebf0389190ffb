//! Batch evaluation and threshold calibration.
//!
//! Scoring is a pure function of already-materialized data, so batches are
//! embarrassingly parallel: the rayon path must produce bit-identical output
//! to the sequential path for the same inputs.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Critic, CriticScore, CritiqueContext};
use crate::ontology::Ontology;

/// Versioned snapshot of the recommendation thresholds.
///
/// Calibration replaces the whole snapshot; scoring reads one copy per call.
/// The weighted-sum formula is never affected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSet {
    /// Below this, completeness recommendations fire.
    pub completeness: f32,
    /// Below this, connectivity recommendations fire.
    pub connectivity: f32,
    /// Below this, consistency recommendations fire.
    pub consistency: f32,
    /// Below this, naming recommendations fire.
    pub clarity: f32,
    /// Below this, property-enrichment recommendations fire.
    pub granularity: f32,
    /// Incremented on every calibration.
    pub version: u64,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            completeness: 0.5,
            connectivity: 0.5,
            consistency: 0.8,
            clarity: 0.6,
            granularity: 0.5,
            version: 0,
        }
    }
}

impl Critic {
    /// Score a batch of ontologies sequentially.
    pub fn evaluate_batch(
        &self,
        ontologies: &[Ontology],
        context: &CritiqueContext,
    ) -> Vec<CriticScore> {
        let thresholds = self.thresholds();
        ontologies
            .iter()
            .map(|o| Self::evaluate_with(o, context, &thresholds))
            .collect()
    }

    /// Score a batch of ontologies on a bounded worker pool.
    ///
    /// Output is bit-identical to [`Critic::evaluate_batch`]: one threshold
    /// snapshot is taken up front and scoring has no shared mutable state.
    pub fn evaluate_batch_parallel(
        &self,
        ontologies: &[Ontology],
        context: &CritiqueContext,
    ) -> Vec<CriticScore> {
        let thresholds = self.thresholds();
        ontologies
            .par_iter()
            .map(|o| Self::evaluate_with(o, context, &thresholds))
            .collect()
    }

    /// Derive recalibrated thresholds from past critique results.
    ///
    /// Each dimension threshold moves to the median of its historical scores,
    /// clamped to a sane band; the returned snapshot is not applied until the
    /// caller passes it to [`Critic::apply_thresholds`].
    pub fn calibrate_thresholds(&self, history: &[CriticScore]) -> ThresholdSet {
        let current = self.thresholds();
        if history.is_empty() {
            return current;
        }

        let median_of = |extract: fn(&CriticScore) -> f32| -> f32 {
            let mut values: Vec<f32> = history.iter().map(extract).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            values[values.len() / 2]
        };

        ThresholdSet {
            completeness: median_of(|s| s.completeness).clamp(0.3, 0.8),
            connectivity: median_of(|s| s.connectivity).clamp(0.3, 0.8),
            consistency: median_of(|s| s.consistency).clamp(0.3, 0.9),
            clarity: median_of(|s| {
                s.dimension_details.get("clarity").copied().unwrap_or(0.6)
            })
            .clamp(0.3, 0.8),
            granularity: median_of(|s| {
                s.dimension_details
                    .get("granularity")
                    .copied()
                    .unwrap_or(0.5)
            })
            .clamp(0.3, 0.8),
            version: current.version + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Direction, Entity, Relationship};

    fn ontology(seed: usize) -> Ontology {
        let mut ontology = Ontology::new();
        for i in 0..=seed {
            ontology.insert_entity(
                Entity::with_id(format!("e{i}"), "Concept", format!("Node {i}"))
                    .with_confidence(0.5 + 0.1 * (i % 5) as f32),
            );
        }
        for i in 0..seed {
            ontology.insert_relationship(
                Relationship::with_id(
                    format!("r{i}"),
                    format!("e{i}"),
                    "related_to",
                    format!("e{}", i + 1),
                )
                .with_direction(Direction::Undirected),
            );
        }
        ontology
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let critic = Critic::new();
        let batch: Vec<Ontology> = (0..12).map(ontology).collect();
        let ctx = CritiqueContext::for_input_chars(400);

        let sequential = critic.evaluate_batch(&batch, &ctx);
        let parallel = critic.evaluate_batch_parallel(&batch, &ctx);

        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_batch_preserves_input_order() {
        let critic = Critic::new();
        let batch = vec![ontology(0), ontology(8)];
        let scores = critic.evaluate_batch(&batch, &CritiqueContext::default());

        assert_eq!(scores.len(), 2);
        // The larger, better-connected ontology scores higher.
        assert!(scores[1].connectivity > scores[0].connectivity);
    }

    #[test]
    fn test_calibration_bumps_version_and_keeps_weights() {
        let critic = Critic::new();
        let batch: Vec<Ontology> = (0..5).map(ontology).collect();
        let history = critic.evaluate_batch(&batch, &CritiqueContext::default());

        let before = critic.thresholds();
        let calibrated = critic.calibrate_thresholds(&history);
        assert_eq!(calibrated.version, before.version + 1);
        for value in [
            calibrated.completeness,
            calibrated.connectivity,
            calibrated.consistency,
            calibrated.clarity,
            calibrated.granularity,
        ] {
            assert!((0.3..=0.9).contains(&value));
        }

        critic.apply_thresholds(calibrated);
        assert_eq!(critic.thresholds().version, before.version + 1);

        // Calibration only moves recommendation thresholds; scores for the
        // same ontology keep the same weighted overall.
        let rescored = critic.evaluate(&batch[2], &CritiqueContext::default());
        assert!((rescored.overall - history[2].overall).abs() < 1e-6);
    }

    #[test]
    fn test_calibration_with_empty_history_is_identity() {
        let critic = Critic::new();
        assert_eq!(critic.calibrate_thresholds(&[]), critic.thresholds());
    }
}
