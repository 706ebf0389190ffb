//! Relationship inference.
//!
//! Two independent strategies whose results are unioned:
//!
//! - **Verb-frame inference**: a subject/object pair detected around a verb
//!   phrase yields a directed relationship at a fixed confidence.
//! - **Co-occurrence inference**: entity pairs whose source spans fall within
//!   a 200-character window yield an undirected `related_to` relationship
//!   with confidence decaying piecewise-linearly over character distance.

use regex::Regex;

use crate::ontology::SourceSpan;

/// Fixed confidence for verb-frame inferred relationships.
pub const VERB_FRAME_CONFIDENCE: f32 = 0.65;

/// Maximum character distance for co-occurrence inference.
pub const COOCCURRENCE_WINDOW: usize = 200;

/// Relation type assigned to co-occurrence edges.
pub const RELATED_TO: &str = "related_to";

/// Confidence for a co-occurring pair at character distance `d`.
///
/// Two linear pieces with the same slope (1/500) and an intentional step at
/// d=100: just under 100 the value sits above 0.4, just over it drops below.
/// The step is inherited behavior and is reproduced exactly, not smoothed.
pub fn cooccurrence_confidence(distance: usize) -> Option<f32> {
    if distance <= 100 {
        Some((0.6 - distance as f32 / 500.0).max(0.4))
    } else if distance <= COOCCURRENCE_WINDOW {
        Some((0.4 - (distance as f32 - 100.0) / 500.0).max(0.2))
    } else {
        None
    }
}

// ============================================================================
// Verb-frame inference
// ============================================================================

/// A subject/object pair detected around a verb phrase.
#[derive(Debug, Clone, PartialEq)]
pub struct VerbFrameMatch {
    /// Subject text (inferred as relationship source).
    pub subject: String,
    /// Object text (inferred as relationship target).
    pub object: String,
    /// Relation type derived from the verb phrase.
    pub relation_type: String,
    /// The matched text.
    pub snippet: String,
    /// Character offset where the match starts.
    pub start: usize,
    /// Character offset where the match ends.
    pub end: usize,
}

struct VerbFrame {
    pattern: Regex,
    relation_type: &'static str,
}

/// Detects subject-verb-object frames linking two candidate entity names.
pub struct VerbFrameInferencer {
    frames: Vec<VerbFrame>,
}

impl Default for VerbFrameInferencer {
    fn default() -> Self {
        Self::new()
    }
}

impl VerbFrameInferencer {
    /// Create an inferencer with the default verb-frame table.
    pub fn new() -> Self {
        const NAME: &str = r"([A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,3})";
        let table: &[(&str, &str)] = &[
            (r"\s+(?:works?\s+(?:at|for)|is\s+employed\s+(?:at|by))\s+", "works_at"),
            (r"\s+(?:founded|established|co-founded)\s+", "founded"),
            (r"\s+(?:leads|manages|heads|runs)\s+", "manages"),
            (r"\s+(?:acquired|bought|purchased)\s+", "acquired"),
            (r"\s+(?:is\s+part\s+of|belongs\s+to)\s+", "part_of"),
            (r"\s+is\s+an?\s+", "is_a"),
            (r"\s+(?:is\s+)?(?:located|based)\s+in\s+", "located_in"),
            (r"\s+(?:collaborates?|partners?)\s+with\s+", "collaborates_with"),
        ];

        let frames = table
            .iter()
            .map(|(verb, relation_type)| VerbFrame {
                pattern: Regex::new(&format!("{NAME}{verb}{NAME}"))
                    .expect("invalid verb-frame regex"),
                relation_type,
            })
            .collect();

        Self { frames }
    }

    /// Find all verb-frame matches in the text.
    pub fn infer(&self, text: &str) -> Vec<VerbFrameMatch> {
        let mut matches = Vec::new();

        for frame in &self.frames {
            for cap in frame.pattern.captures_iter(text) {
                let full = cap.get(0).expect("match group 0 always present");
                let (Some(subject), Some(object)) = (cap.get(1), cap.get(2)) else {
                    continue;
                };
                matches.push(VerbFrameMatch {
                    subject: subject.as_str().to_string(),
                    object: object.as_str().to_string(),
                    relation_type: frame.relation_type.to_string(),
                    snippet: full.as_str().to_string(),
                    start: full.start(),
                    end: full.end(),
                });
            }
        }

        matches
    }
}

// ============================================================================
// Co-occurrence inference
// ============================================================================

/// An undirected edge inferred from span proximity.
#[derive(Debug, Clone, PartialEq)]
pub struct CoOccurrenceEdge {
    /// First entity id (lower id order).
    pub source_id: String,
    /// Second entity id.
    pub target_id: String,
    /// Character distance between the two spans.
    pub distance: usize,
    /// Confidence from the decay formula.
    pub confidence: f32,
}

/// Emit a `related_to` edge for every entity pair within the window.
///
/// Pairs are visited in input order; callers pass entities in deterministic
/// (id) order to get deterministic output.
pub fn infer_cooccurrence(entities: &[(String, SourceSpan)]) -> Vec<CoOccurrenceEdge> {
    let mut edges = Vec::new();

    for i in 0..entities.len() {
        for j in (i + 1)..entities.len() {
            let (id_a, span_a) = &entities[i];
            let (id_b, span_b) = &entities[j];
            let distance = span_a.distance_to(span_b);
            if let Some(confidence) = cooccurrence_confidence(distance) {
                edges.push(CoOccurrenceEdge {
                    source_id: id_a.clone(),
                    target_id: id_b.clone(),
                    distance,
                    confidence,
                });
            }
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: Option<f32>, expected: f32) {
        let actual = actual.expect("expected a confidence value");
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_decay_exact_values() {
        assert_close(cooccurrence_confidence(0), 0.6);
        assert_close(cooccurrence_confidence(100), 0.4);
        assert_close(cooccurrence_confidence(150), 0.3);
        assert_close(cooccurrence_confidence(200), 0.2);
        assert_eq!(cooccurrence_confidence(201), None);
    }

    #[test]
    fn test_decay_midpoint() {
        // d=85 sits on the first piece: max(0.4, 0.6 - 85/500) = 0.43.
        let confidence = cooccurrence_confidence(85).unwrap();
        assert!((confidence - 0.43).abs() < 1e-6);
    }

    #[test]
    fn test_decay_floor_and_ceiling() {
        for d in 0..=200 {
            let c = cooccurrence_confidence(d).unwrap();
            assert!((0.2..=0.6).contains(&c), "d={d} gave {c}");
        }
    }

    #[test]
    fn test_decay_step_at_boundary() {
        // The two pieces meet discontinuously: 99 -> 0.402, 101 -> 0.398.
        let before = cooccurrence_confidence(99).unwrap();
        let after = cooccurrence_confidence(101).unwrap();
        assert!(before > 0.4 && after < 0.4);
    }

    #[test]
    fn test_verb_frame_works_at() {
        let inferencer = VerbFrameInferencer::new();
        let matches = inferencer.infer("Alice works at Acme Corp.");

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].subject, "Alice");
        assert_eq!(matches[0].object, "Acme Corp");
        assert_eq!(matches[0].relation_type, "works_at");
    }

    #[test]
    fn test_verb_frame_variants() {
        let inferencer = VerbFrameInferencer::new();

        let founded = inferencer.infer("Grace Hopper founded Eckert Mauchly.");
        assert_eq!(founded[0].relation_type, "founded");

        let located = inferencer.infer("Acme Corp is based in Berlin.");
        assert_eq!(located[0].relation_type, "located_in");
        assert_eq!(located[0].subject, "Acme Corp");
        assert_eq!(located[0].object, "Berlin");
    }

    #[test]
    fn test_verb_frame_no_match_on_lowercase() {
        let inferencer = VerbFrameInferencer::new();
        assert!(inferencer.infer("she works at the office").is_empty());
    }

    #[test]
    fn test_cooccurrence_pairs() {
        let entities = vec![
            ("e1".to_string(), SourceSpan::new("Alice", 10, 15)),
            ("e2".to_string(), SourceSpan::new("Acme", 100, 104)),
            ("e3".to_string(), SourceSpan::new("Berlin", 500, 506)),
        ];

        let edges = infer_cooccurrence(&entities);
        assert_eq!(edges.len(), 1); // e1-e2 at distance 85; e3 out of range
        assert_eq!(edges[0].source_id, "e1");
        assert_eq!(edges[0].target_id, "e2");
        assert_eq!(edges[0].distance, 85);
        assert!((edges[0].confidence - 0.43).abs() < 1e-6);
    }
}
