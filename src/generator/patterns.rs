//! Rule-based entity extraction.
//!
//! Pattern matching over raw text using capitalization heuristics, indicator
//! word lists, and optional user-supplied regex rules. Fast, offline, and
//! deterministic; the LLM-assisted strategy layers on top of this one.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;

/// A candidate entity found in text, before thresholding and deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCandidate {
    /// The matched text, used as the entity name.
    pub name: String,
    /// Open type tag ("Person", "Organization", "Location", or custom).
    pub entity_type: String,
    /// Confidence score (0.0-1.0).
    pub confidence: f32,
    /// Character offset where the match starts.
    pub start: usize,
    /// Character offset where the match ends.
    pub end: usize,
}

/// A user-supplied extraction rule carried in `ExtractionConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    /// Regex applied to the input text; the full match becomes the name.
    pub pattern: String,
    /// Entity type to assign to matches.
    pub entity_type: String,
    /// Confidence to assign to matches (0.0-1.0).
    pub confidence: f32,
}

struct CompiledRule {
    regex: Regex,
    entity_type: String,
    confidence: f32,
}

/// Pattern-based entity extractor.
///
/// Detects candidate names via capitalized-word sequences, classifies them as
/// organizations or locations via indicator suffixes, and defaults the rest
/// to persons. Custom rules run first and win overlap resolution.
pub struct EntityPatternExtractor {
    name_pattern: Regex,
    custom_rules: Vec<CompiledRule>,
    org_indicators: Vec<&'static str>,
    location_indicators: Vec<&'static str>,
}

impl EntityPatternExtractor {
    /// Build an extractor, compiling any custom rules.
    ///
    /// Rule compilation failures are configuration mistakes and surface
    /// immediately rather than at extraction time.
    pub fn new(rules: &[PatternRule]) -> Result<Self, ExtractionError> {
        let custom_rules = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|regex| CompiledRule {
                        regex,
                        entity_type: rule.entity_type.clone(),
                        confidence: rule.confidence.clamp(0.0, 1.0),
                    })
                    .map_err(|source| ExtractionError::PatternCompile {
                        pattern: rule.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name_pattern: Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,3}\b")
                .expect("invalid name regex"),
            custom_rules,
            org_indicators: vec![
                "Inc", "LLC", "Ltd", "Corp", "Corporation", "Company", "Co", "Group", "Holdings",
                "Partners", "Association", "Foundation", "Institute", "University", "College",
                "Bank", "Labs", "Team", "Department", "Division",
            ],
            location_indicators: vec![
                "Street", "Avenue", "Boulevard", "Road", "Drive", "Lane", "Place", "City", "Town",
                "Village", "County", "State", "Province", "Country", "Valley", "Bay", "Island",
            ],
        })
    }

    /// Extract candidate entities from text.
    pub fn extract(&self, text: &str) -> Vec<EntityCandidate> {
        let mut candidates = Vec::new();

        for rule in &self.custom_rules {
            for m in rule.regex.find_iter(text) {
                candidates.push(EntityCandidate {
                    name: m.as_str().to_string(),
                    entity_type: rule.entity_type.clone(),
                    confidence: rule.confidence,
                    start: m.start(),
                    end: m.end(),
                });
            }
        }

        candidates.extend(self.extract_names(text));

        candidates.sort_by_key(|c| c.start);
        self.remove_overlaps(&mut candidates);
        candidates
    }

    /// Capitalized-sequence extraction with indicator-based classification.
    fn extract_names(&self, text: &str) -> Vec<EntityCandidate> {
        let mut candidates = Vec::new();

        for m in self.name_pattern.find_iter(text) {
            let name = m.as_str();

            let first_word = name.split_whitespace().next().unwrap_or("");
            if SKIP_WORDS.contains(&first_word) {
                continue;
            }
            if name.len() < 3 {
                continue;
            }

            let is_org = self
                .org_indicators
                .iter()
                .any(|ind| ends_with_word(name, ind));
            let is_location = self
                .location_indicators
                .iter()
                .any(|ind| ends_with_word(name, ind));

            let entity_type = if is_org {
                "Organization"
            } else if is_location {
                "Location"
            } else {
                "Person"
            };

            // Multi-word matches are more likely to be real names.
            let base_confidence: f32 = if name.contains(' ') { 0.75 } else { 0.6 };
            let confidence = if is_org || is_location {
                (base_confidence + 0.1).min(0.9)
            } else {
                base_confidence
            };

            candidates.push(EntityCandidate {
                name: name.to_string(),
                entity_type: entity_type.to_string(),
                confidence,
                start: m.start(),
                end: m.end(),
            });
        }

        candidates
    }

    /// Remove overlapping candidates, keeping the higher-priority one.
    /// Assumes candidates are sorted by start offset.
    fn remove_overlaps(&self, candidates: &mut Vec<EntityCandidate>) {
        fn priority(candidate: &EntityCandidate, custom_types: &[CompiledRule]) -> u8 {
            if custom_types
                .iter()
                .any(|r| r.entity_type == candidate.entity_type)
            {
                10
            } else {
                match candidate.entity_type.as_str() {
                    "Organization" | "Location" => 5,
                    _ => 4,
                }
            }
        }

        let mut i = 0;
        while i + 1 < candidates.len() {
            if candidates[i + 1].start < candidates[i].end {
                let keep_first = priority(&candidates[i], &self.custom_rules)
                    >= priority(&candidates[i + 1], &self.custom_rules);
                if keep_first {
                    candidates.remove(i + 1);
                } else {
                    candidates.remove(i);
                }
            } else {
                i += 1;
            }
        }
    }
}

fn ends_with_word(name: &str, word: &str) -> bool {
    name.split_whitespace().next_back() == Some(word)
}

/// Capitalized words that are never entity names on their own.
const SKIP_WORDS: &[&str] = &[
    "The", "This", "That", "These", "Those", "What", "Which", "Where", "When", "Why", "How",
    "Who", "Whom", "I", "We", "You", "He", "She", "It", "They", "Monday", "Tuesday", "Wednesday",
    "Thursday", "Friday", "Saturday", "Sunday", "January", "February", "March", "April", "May",
    "June", "July", "August", "September", "October", "November", "December", "Today", "Tomorrow",
    "Yesterday", "Next", "Last", "Every", "All", "Some", "Any", "Each", "First", "Second",
    "Third", "New", "Old", "Dear", "Hi", "Hello", "Thanks", "Thank", "Please", "Note", "But",
    "And", "For", "With", "From", "About", "After", "Before", "During", "Until", "If", "Then",
];
