//! Anneal: Ontology Refinement Engine
//!
//! A generate -> critique -> optimize -> validate feedback loop that builds
//! and iteratively improves a knowledge-graph ontology (entities + typed
//! relationships) extracted from unstructured text.
//!
//! # Architecture
//!
//! ```text
//! raw text
//!    │
//!    ▼
//! ┌───────────┐    ┌─────────┐    ┌──────────┐    ┌────────────────┐
//! │ Generator │───►│ Critic  │───►│ Mediator │───►│ LogicValidator │
//! └───────────┘    └─────────┘    └──────────┘    └────────────────┘
//!                     ▲               │
//!                     └───────────────┘
//!                 (loop until converged or out of rounds)
//! ```
//!
//! A [`Session`] owns one run of the loop for one input; the [`Harness`]
//! fans sessions out over a batch of inputs on a bounded worker pool.

pub mod critic;
pub mod error;
pub mod generator;
pub mod mediator;
pub mod ontology;
pub mod session;
pub mod validator;

pub use critic::{
    Critic, CriticScore, CritiqueContext, Recommendation, RecommendationKind, ThresholdSet,
    WEIGHT_COMPLETENESS, WEIGHT_CONNECTIVITY, WEIGHT_CONSISTENCY,
};
pub use error::{
    AnnealError, ConfigError, ExtractionError, RefinementError, Result, SessionError,
    ValidationError,
};
pub use generator::{
    cooccurrence_confidence, ExtractionConfig, ExtractionStrategy, Generator, InputDocument,
    LlmBackend, PatternRule, COOCCURRENCE_WINDOW, RELATED_TO, VERB_FRAME_CONFIDENCE,
};
pub use mediator::{
    analyze_batch, analyze_batch_parallel, analyze_trends, BatchReport, Mediator, MediatorConfig,
    RefinementAction, RefinementActionKind, Trend, TrendReport,
};
pub use ontology::{
    merge, merge_all, Direction, Entity, MergeReport, Ontology, OntologyStats, Relationship,
    SourceSpan,
};
pub use session::{
    CancelHandle, Harness, HarnessConfig, InMemoryTextProvider, RefinementPipeline, RoundRecord,
    Session, SessionConfig, SessionStatus, TextProvider,
};
pub use validator::{
    Contradiction, ContradictionKind, CounterModel, Fact, FixKind, FormulaCache, LogicValidator,
    ProverBackend, ProverResponse, SatOutcome, Severity, SuggestedFix, ValidationResult,
};
