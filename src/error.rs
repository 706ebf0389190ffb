//! Error types for the anneal refinement engine.

use thiserror::Error;

/// Main error type for anneal operations.
#[derive(Error, Debug)]
pub enum AnnealError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Refinement error: {0}")]
    Refinement(#[from] RefinementError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors.
///
/// These fail fast at construction time and are the only errors the engine
/// allows to propagate uncaught, since they indicate a programming or config
/// mistake rather than a data-quality issue.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("{field} = {value} outside valid range [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Extraction-related errors.
///
/// "No entities found" is a valid empty result, not an error; these cover
/// inputs the generator genuinely cannot recover from and backend failures.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Pattern '{pattern}' failed to compile: {source}")]
    PatternCompile {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Extraction backend error: {0}")]
    Backend(String),
}

/// Refinement-action errors.
///
/// Caught per-action so a failed action never aborts the round.
#[derive(Error, Debug)]
pub enum RefinementError {
    #[error("Target entity not found: {0}")]
    TargetMissing(String),

    #[error("Target relationship not found: {0}")]
    RelationshipMissing(String),

    #[error("Entity {0} is no longer orphaned")]
    NotOrphaned(String),

    #[error("Entity {0} is protected by high confidence")]
    Protected(String),

    #[error("Action conflict: {0}")]
    Conflict(String),
}

/// Validation-related errors.
///
/// A missing or failing prover backend is never fatal; it triggers graceful
/// degradation to structural-only checking.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Prover backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Prover call timed out after {0}ms")]
    Timeout(u64),

    #[error("Prover protocol error: {0}")]
    Protocol(String),
}

/// Session-level errors that produce the terminal `Failed` status.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unrecoverable error: {0}")]
    Unrecoverable(String),

    #[error("Text provider failed for input '{input_id}': {reason}")]
    ProviderFailed { input_id: String, reason: String },
}

/// Result type alias for anneal operations.
pub type Result<T> = std::result::Result<T, AnnealError>;
