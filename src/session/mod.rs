//! Refinement sessions.
//!
//! A session drives one end-to-end Generate -> Critique -> (Optimize ->
//! Critique)* -> Validate cycle for a single input and records its full
//! round-by-round history. The loop is strictly sequential: each round
//! depends on the previous ontology state.

mod harness;

pub use harness::{Harness, HarnessConfig, InMemoryTextProvider, TextProvider};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::critic::{Critic, CriticScore, CritiqueContext};
use crate::error::{AnnealError, ConfigError, Result};
use crate::generator::Generator;
use crate::mediator::{Mediator, RefinementAction};
use crate::ontology::Ontology;
use crate::validator::{LogicValidator, ValidationResult};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for session runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Overall score at which refinement stops.
    pub quality_threshold: f32,
    /// Hard cap on refinement rounds.
    pub max_rounds: usize,
    /// Stop early after more than this many consecutive score regressions.
    pub max_consecutive_regressions: usize,
    /// Retries the harness grants a failed session.
    pub retry_count: usize,
    /// Timeout for any external call (prover, LLM) in milliseconds.
    pub external_call_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.75,
            max_rounds: 5,
            max_consecutive_regressions: 2,
            retry_count: 1,
            external_call_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    /// Validate ranges. Called once at pipeline construction.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(ConfigError::OutOfRange {
                field: "quality_threshold".to_string(),
                value: self.quality_threshold as f64,
                min: 0.0,
                max: 1.0,
            }
            .into());
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::Invalid("max_rounds must be > 0".to_string()).into());
        }
        if self.external_call_timeout_ms == 0 {
            return Err(
                ConfigError::Invalid("external_call_timeout_ms must be > 0".to_string()).into(),
            );
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
// Session state
// ============================================================================

/// Lifecycle of a session.
///
/// `Pending -> Running -> {Converged | MaxRoundsReached | Failed}`. A low
/// final score is a valid outcome (`MaxRoundsReached`), never a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Converged,
    MaxRoundsReached,
    Failed,
}

impl SessionStatus {
    /// Whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Converged | SessionStatus::MaxRoundsReached | SessionStatus::Failed
        )
    }
}

/// One critique/refinement round: the actions applied and the resulting
/// score. Round 0 is the initial critique with no actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round index within the session.
    pub round: usize,
    /// Score after this round's actions.
    pub score: CriticScore,
    /// Actions applied in this round.
    pub actions: Vec<RefinementAction>,
}

/// Handle for requesting cancellation between rounds.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request cancellation; honored at the next round boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// One end-to-end refinement run for a single input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id.
    pub id: String,
    /// The input this session refines.
    pub input_id: String,
    /// Configuration in effect.
    pub config: SessionConfig,
    /// The session's exclusively-owned ontology.
    pub ontology: Ontology,
    /// Current lifecycle state.
    pub status: SessionStatus,
    /// Ordered round history.
    pub history: Vec<RoundRecord>,
    /// Final validation outcome, when the session got that far.
    pub validation: Option<ValidationResult>,
    /// The causing error for `Failed` sessions.
    pub error: Option<String>,
    /// Whether the run was stopped by cancellation.
    pub cancelled: bool,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip, default)]
    cancel: CancelHandle,
}

impl Session {
    /// Create a pending session for an input.
    pub fn new(input_id: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            input_id: input_id.into(),
            config,
            ontology: Ontology::new(),
            status: SessionStatus::Pending,
            history: Vec::new(),
            validation: None,
            error: None,
            cancelled: false,
            created_at: Utc::now(),
            completed_at: None,
            cancel: CancelHandle::default(),
        }
    }

    /// A handle that cancels this session at the next round boundary.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Drive the full refinement loop over `text`.
    ///
    /// Always leaves the session in a terminal state; errors from the
    /// pipeline are captured as `Failed` rather than propagated.
    pub async fn run(&mut self, text: &str, pipeline: &RefinementPipeline) {
        self.status = SessionStatus::Running;

        let ontology = match pipeline.generator.generate(text).await {
            Ok(ontology) => ontology,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        self.ontology = ontology;

        let context = CritiqueContext::for_input_chars(text.len());
        let mut score = pipeline.critic.evaluate(&self.ontology, &context);
        self.history.push(RoundRecord {
            round: 0,
            score: score.clone(),
            actions: Vec::new(),
        });

        let mut consecutive_regressions = 0usize;
        let mut round = 0usize;
        while score.overall < self.config.quality_threshold && round < self.config.max_rounds {
            if self.cancel.is_cancelled() {
                self.cancelled = true;
                info!(session = %self.id, round, "session cancelled between rounds");
                break;
            }
            round += 1;

            // A round's actions commit atomically inside refine().
            let actions = pipeline.mediator.refine(&mut self.ontology, &score);
            let stalled = actions.is_empty();
            let new_score = pipeline.critic.evaluate(&self.ontology, &context);

            if new_score.overall < score.overall {
                consecutive_regressions += 1;
            } else {
                consecutive_regressions = 0;
            }

            debug!(
                session = %self.id,
                round,
                overall = new_score.overall,
                actions = actions.len(),
                "refinement round"
            );
            self.history.push(RoundRecord {
                round,
                score: new_score.clone(),
                actions,
            });
            score = new_score;

            if stalled {
                debug!(session = %self.id, round, "no applicable actions, stopping");
                break;
            }
            if consecutive_regressions > self.config.max_consecutive_regressions {
                info!(
                    session = %self.id,
                    round, consecutive_regressions, "diverging, stopping early"
                );
                break;
            }
        }

        let validation = pipeline.validator.check_consistency(&self.ontology).await;
        let consistent = validation.is_consistent;
        self.validation = Some(validation);

        self.status = if score.overall >= self.config.quality_threshold && consistent {
            SessionStatus::Converged
        } else {
            SessionStatus::MaxRoundsReached
        };
        self.completed_at = Some(Utc::now());
    }

    /// Mark the session failed with the causing error.
    pub(crate) fn fail(&mut self, error: AnnealError) {
        self.status = SessionStatus::Failed;
        self.error = Some(error.to_string());
        self.completed_at = Some(Utc::now());
    }

    // ------------------------------------------------------------------
    // Derived metrics
    // ------------------------------------------------------------------

    /// Overall scores per round, in order.
    pub fn round_scores(&self) -> Vec<f32> {
        self.history.iter().map(|r| r.score.overall).collect()
    }

    /// Final overall score, when at least one critique ran.
    pub fn final_score(&self) -> Option<f32> {
        self.history.last().map(|r| r.score.overall)
    }

    /// Last score minus first score.
    pub fn score_delta(&self) -> f32 {
        let scores = self.round_scores();
        match (scores.first(), scores.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Mean overall score across rounds.
    pub fn avg_score(&self) -> f32 {
        let scores = self.round_scores();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f32>() / scores.len() as f32
        }
    }

    /// Number of rounds whose score decreased from the previous round.
    pub fn regression_count(&self) -> usize {
        self.round_scores()
            .windows(2)
            .filter(|w| w[1] < w[0])
            .count()
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// The four engine components a session runs against.
///
/// The critic is injected explicitly and shared behind an `Arc` so its
/// calibration snapshot is visible across concurrent sessions.
pub struct RefinementPipeline {
    generator: Generator,
    critic: Arc<Critic>,
    mediator: Mediator,
    validator: LogicValidator,
    session_config: SessionConfig,
}

impl RefinementPipeline {
    /// Assemble a pipeline, validating the session configuration and wiring
    /// the external-call timeout into the validator.
    pub fn new(
        generator: Generator,
        critic: Arc<Critic>,
        mediator: Mediator,
        validator: LogicValidator,
        session_config: SessionConfig,
    ) -> Result<Self> {
        session_config.validate()?;
        let validator = validator
            .with_call_timeout(Duration::from_millis(session_config.external_call_timeout_ms));
        Ok(Self {
            generator,
            critic,
            mediator,
            validator,
            session_config,
        })
    }

    /// A pipeline with default components and configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            Generator::new(Default::default())?,
            Arc::new(Critic::new()),
            Mediator::new(Default::default())?,
            LogicValidator::new(),
            SessionConfig::default(),
        )
    }

    /// The session configuration in effect.
    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    /// The shared critic (for calibration).
    pub fn critic(&self) -> &Critic {
        &self.critic
    }

    /// Create and run a session for one input text.
    pub async fn run_session(&self, input_id: &str, text: &str) -> Session {
        let mut session = Session::new(input_id, self.session_config.clone());
        session.run(text, self).await;
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> RefinementPipeline {
        RefinementPipeline::with_defaults().unwrap()
    }

    #[tokio::test]
    async fn test_session_reaches_terminal_state() {
        let session = pipeline()
            .run_session("in-1", "Alice works at Acme Corp. Bob manages Acme Corp.")
            .await;

        assert!(session.status.is_terminal());
        assert!(session.history.len() <= session.config.max_rounds + 1);
        assert!(session.completed_at.is_some());
        assert!(!session.history.is_empty());
    }

    #[tokio::test]
    async fn test_empty_input_is_not_a_failure() {
        let session = pipeline().run_session("in-empty", "").await;

        // A low score is a valid terminal outcome, never Failed.
        assert_eq!(session.status, SessionStatus::MaxRoundsReached);
        assert!(session.error.is_none());
    }

    #[tokio::test]
    async fn test_history_round_order() {
        let session = pipeline()
            .run_session("in-2", "Alice met Bob near Acme Corp in Berlin.")
            .await;

        for (expected, record) in session.history.iter().enumerate() {
            assert_eq!(record.round, expected);
        }
        assert!(session.history[0].actions.is_empty());
    }

    #[tokio::test]
    async fn test_bounded_rounds() {
        let config = SessionConfig {
            max_rounds: 2,
            quality_threshold: 0.99, // unreachable, forces the cap
            ..Default::default()
        };
        let pipeline = RefinementPipeline::new(
            Generator::new(Default::default()).unwrap(),
            Arc::new(Critic::new()),
            Mediator::new(Default::default()).unwrap(),
            LogicValidator::new(),
            config,
        )
        .unwrap();

        let session = pipeline
            .run_session("in-3", "Alice works at Acme Corp.")
            .await;

        assert_eq!(session.status, SessionStatus::MaxRoundsReached);
        assert!(session.history.len() <= 3); // initial critique + 2 rounds
    }

    #[tokio::test]
    async fn test_cancellation_between_rounds() {
        let config = SessionConfig {
            quality_threshold: 0.99,
            max_rounds: 50,
            ..Default::default()
        };
        let mut session = Session::new("in-4", config);
        let handle = session.cancel_handle();
        handle.cancel();

        session
            .run("Alice works at Acme Corp.", &pipeline())
            .await;

        assert!(session.cancelled);
        assert!(session.status.is_terminal());
        // Only the initial critique ran; no refinement round was applied.
        assert_eq!(session.history.len(), 1);
    }

    #[tokio::test]
    async fn test_session_metrics() {
        let session = pipeline()
            .run_session("in-5", "Alice works at Acme Corp. Carol manages Acme Corp.")
            .await;

        let scores = session.round_scores();
        assert_eq!(scores.len(), session.history.len());
        assert!((session.score_delta()
            - (scores.last().unwrap() - scores.first().unwrap()))
        .abs()
            < 1e-6);
        assert!(session.avg_score() >= 0.0);
        assert!(session.regression_count() <= scores.len());
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig {
            quality_threshold: 1.5,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(SessionConfig {
            max_rounds: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_from_map_validates() {
        let mut map = serde_json::Map::new();
        map.insert("quality_threshold".to_string(), serde_json::json!(2.0));
        assert!(SessionConfig::from_map(map).is_err());
    }
}
