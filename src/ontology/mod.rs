//! The ontology model: entities, typed relationships, and merging.
//!
//! Everything else in the engine operates on these types. Entities and
//! relationships are created by the generator, mutated only by mediator
//! actions, and scored/checked read-only by the critic and validator.

mod graph;
mod merge;
mod types;

pub use graph::{connected_components, hierarchy_cycles, HIERARCHY_TYPES};
pub use merge::{merge, merge_all, MergeReport};
pub use types::{
    Direction, Entity, Ontology, OntologyStats, Relationship, SourceSpan,
};

pub(crate) use types::normalize_name;
