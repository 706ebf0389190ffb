//! Ontology generation from raw text.
//!
//! The generator turns unstructured input into an initial [`Ontology`]:
//! rule-based entity extraction, then relationship inference via verb frames
//! and span co-occurrence. An optional LLM-assisted strategy augments the
//! rule-based extractor and degrades back to it on backend failure.
//!
//! Extraction never fails on malformed or empty input; it produces an empty
//! ontology instead. Configuration mistakes fail fast at construction.

mod patterns;
mod relations;

pub use patterns::{EntityCandidate, EntityPatternExtractor, PatternRule};
pub use relations::{
    cooccurrence_confidence, infer_cooccurrence, CoOccurrenceEdge, VerbFrameInferencer,
    VerbFrameMatch, COOCCURRENCE_WINDOW, RELATED_TO, VERB_FRAME_CONFIDENCE,
};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, Result};
use crate::ontology::{
    merge_all, normalize_name, Direction, Entity, MergeReport, Ontology, Relationship, SourceSpan,
};

// ============================================================================
// Configuration
// ============================================================================

/// Extraction strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Pure pattern/rule matching. Offline and deterministic.
    #[default]
    RuleBased,
    /// Rule-based extraction augmented by an LLM backend when one is
    /// configured; falls back to rule-based output on backend failure.
    LlmAssisted,
}

/// Configuration for the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Domain tag recorded in generated ontology metadata.
    pub domain: String,
    /// Extraction strategy.
    pub strategy: ExtractionStrategy,
    /// Candidates below this confidence are dropped.
    pub min_entity_score: f32,
    /// Hard cap on entities per generated ontology.
    pub max_entities: usize,
    /// Enable verb-frame relationship inference.
    pub enable_verb_frames: bool,
    /// Enable co-occurrence relationship inference.
    pub enable_cooccurrence: bool,
    /// Additional user-supplied entity rules.
    pub custom_patterns: Vec<PatternRule>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            domain: "general".to_string(),
            strategy: ExtractionStrategy::RuleBased,
            min_entity_score: 0.3,
            max_entities: 256,
            enable_verb_frames: true,
            enable_cooccurrence: true,
            custom_patterns: Vec::new(),
        }
    }
}

impl ExtractionConfig {
    /// Validate ranges. Called once at generator construction.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_entity_score) {
            return Err(ConfigError::OutOfRange {
                field: "min_entity_score".to_string(),
                value: self.min_entity_score as f64,
                min: 0.0,
                max: 1.0,
            }
            .into());
        }
        if self.max_entities == 0 {
            return Err(ConfigError::Invalid("max_entities must be > 0".to_string()).into());
        }
        for rule in &self.custom_patterns {
            if !(0.0..=1.0).contains(&rule.confidence) {
                return Err(ConfigError::OutOfRange {
                    field: format!("custom_patterns[{}].confidence", rule.entity_type),
                    value: rule.confidence as f64,
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

    /// Convert to a loosely-typed map.
    pub fn to_map(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => unreachable!("struct serializes to an object"),
        }
    }
}

// ============================================================================
// LLM backend boundary
// ============================================================================

/// External LLM boundary for extraction strategies beyond rule-based.
///
/// The generator functions fully without one; this is an optional
/// augmentation, never a requirement.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a completion for the given prompt and context.
    async fn generate(&self, prompt: &str, context: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct LlmEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    confidence: Option<f32>,
}

// ============================================================================
// Input documents
// ============================================================================

/// One unit of raw input with a stable id for provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDocument {
    /// Stable input id.
    pub id: String,
    /// Raw text.
    pub text: String,
}

impl InputDocument {
    /// Create an input document.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Turns raw text into an initial ontology.
pub struct Generator {
    config: ExtractionConfig,
    entity_extractor: EntityPatternExtractor,
    verb_frames: VerbFrameInferencer,
    llm: Option<Arc<dyn LlmBackend>>,
}

impl Generator {
    /// Create a generator, validating the configuration and compiling
    /// custom patterns up front.
    pub fn new(config: ExtractionConfig) -> Result<Self> {
        config.validate()?;
        let entity_extractor = EntityPatternExtractor::new(&config.custom_patterns)?;
        Ok(Self {
            config,
            entity_extractor,
            verb_frames: VerbFrameInferencer::new(),
            llm: None,
        })
    }

    /// Attach an LLM backend for the `LlmAssisted` strategy.
    pub fn with_llm_backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.llm = Some(backend);
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Generate an ontology from raw text.
    ///
    /// Malformed or empty input yields an empty ontology, never an error.
    pub async fn generate(&self, text: &str) -> Result<Ontology> {
        let mut candidates = self.entity_extractor.extract(text);

        if self.config.strategy == ExtractionStrategy::LlmAssisted {
            match self.llm_candidates(text).await {
                Ok(extra) => candidates.extend(extra),
                Err(e) => {
                    warn!(error = %e, "LLM extraction failed, continuing rule-based");
                }
            }
        }

        let candidates = Self::dedupe_candidates(candidates);
        let mut ontology = self.build_entities(candidates);

        if self.config.enable_verb_frames {
            self.infer_verb_frame_relationships(text, &mut ontology);
        }
        if self.config.enable_cooccurrence {
            self.infer_cooccurrence_relationships(&mut ontology);
        }

        ontology.metadata.insert(
            "domain".to_string(),
            serde_json::json!(self.config.domain),
        );
        ontology
            .metadata
            .insert("source_chars".to_string(), serde_json::json!(text.len()));

        debug!(
            entities = ontology.entity_count(),
            relationships = ontology.relationship_count(),
            "generated ontology"
        );
        Ok(ontology)
    }

    /// Generate one ontology per document and merge them, returning the
    /// merged graph plus the provenance report.
    pub async fn generate_from_documents(
        &self,
        documents: &[InputDocument],
    ) -> Result<(Ontology, MergeReport)> {
        let mut tagged = Vec::with_capacity(documents.len());
        for doc in documents {
            let ontology = self.generate(&doc.text).await?;
            tagged.push((doc.id.clone(), ontology));
        }
        Ok(merge_all(&tagged))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn llm_candidates(&self, text: &str) -> Result<Vec<EntityCandidate>> {
        let Some(llm) = &self.llm else {
            return Ok(Vec::new());
        };

        let prompt = format!(
            "Extract named entities from the text as a JSON array of \
             {{\"name\", \"type\", \"confidence\"}} objects. \
             Domain: {}. Return only JSON.",
            self.config.domain
        );
        let response = llm.generate(&prompt, text).await?;
        let parsed: Vec<LlmEntity> = serde_json::from_str(response.trim()).unwrap_or_default();

        Ok(parsed
            .into_iter()
            .filter_map(|e| {
                // Anchor each reported entity to its first occurrence; ones
                // the backend hallucinated out of thin air are dropped.
                let start = text.find(&e.name)?;
                Some(EntityCandidate {
                    end: start + e.name.len(),
                    start,
                    confidence: e.confidence.unwrap_or(0.8).clamp(0.0, 1.0),
                    entity_type: e.entity_type,
                    name: e.name,
                })
            })
            .collect())
    }

    /// Merge candidates with matching normalized (name, type): the earliest
    /// occurrence survives with the max confidence of the group.
    fn dedupe_candidates(candidates: Vec<EntityCandidate>) -> Vec<EntityCandidate> {
        let mut by_key: HashMap<(String, String), EntityCandidate> = HashMap::new();
        for candidate in candidates {
            let key = (
                normalize_name(&candidate.name),
                candidate.entity_type.to_lowercase(),
            );
            match by_key.get_mut(&key) {
                Some(existing) => {
                    existing.confidence = existing.confidence.max(candidate.confidence);
                    if candidate.start < existing.start {
                        existing.start = candidate.start;
                        existing.end = candidate.end;
                        existing.name = candidate.name;
                    }
                }
                None => {
                    by_key.insert(key, candidate);
                }
            }
        }
        let mut deduped: Vec<EntityCandidate> = by_key.into_values().collect();
        deduped.sort_by_key(|c| c.start);
        deduped
    }

    fn build_entities(&self, mut candidates: Vec<EntityCandidate>) -> Ontology {
        candidates.retain(|c| c.confidence > 0.0 && c.confidence >= self.config.min_entity_score);

        if candidates.len() > self.config.max_entities {
            // Keep the highest-confidence candidates; stable on offset.
            candidates.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.start.cmp(&b.start))
            });
            candidates.truncate(self.config.max_entities);
            candidates.sort_by_key(|c| c.start);
        }

        let mut ontology = Ontology::new();
        for candidate in candidates {
            let entity = Entity::new(&candidate.entity_type, &candidate.name)
                .with_confidence(candidate.confidence)
                .with_span(SourceSpan::new(
                    &candidate.name,
                    candidate.start,
                    candidate.end,
                ));
            ontology.insert_entity(entity);
        }
        ontology
    }

    fn infer_verb_frame_relationships(&self, text: &str, ontology: &mut Ontology) {
        // Resolve frame subjects/objects against extracted entity names.
        let mut by_name: HashMap<String, String> = HashMap::new();
        for entity in ontology.entities.values() {
            by_name
                .entry(normalize_name(&entity.name))
                .or_insert_with(|| entity.id.clone());
        }

        for frame in self.verb_frames.infer(text) {
            let (Some(source_id), Some(target_id)) = (
                by_name.get(&normalize_name(&frame.subject)),
                by_name.get(&normalize_name(&frame.object)),
            ) else {
                continue;
            };
            if source_id == target_id {
                continue;
            }
            let relationship = Relationship::new(source_id, &frame.relation_type, target_id)
                .with_direction(Direction::SubjectToObject)
                .with_confidence(VERB_FRAME_CONFIDENCE)
                .with_span(SourceSpan::new(&frame.snippet, frame.start, frame.end));
            if !self.has_edge(ontology, &relationship) {
                ontology.insert_relationship(relationship);
            }
        }
    }

    fn infer_cooccurrence_relationships(&self, ontology: &mut Ontology) {
        let spanned: Vec<(String, SourceSpan)> = ontology
            .entities
            .values()
            .filter_map(|e| e.source_span.clone().map(|s| (e.id.clone(), s)))
            .collect();

        for edge in infer_cooccurrence(&spanned) {
            let relationship = Relationship::new(&edge.source_id, RELATED_TO, &edge.target_id)
                .with_direction(Direction::Undirected)
                .with_confidence(edge.confidence)
                .with_property("char_distance", serde_json::json!(edge.distance));
            if !self.has_edge(ontology, &relationship) {
                ontology.insert_relationship(relationship);
            }
        }
    }

    fn has_edge(&self, ontology: &Ontology, relationship: &Relationship) -> bool {
        let key = relationship.edge_key();
        ontology.relationships.values().any(|r| r.edge_key() == key)
    }
}
