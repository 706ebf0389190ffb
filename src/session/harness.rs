//! Batch orchestration over many sessions.
//!
//! The harness fans a batch of inputs out across a bounded worker pool, one
//! session per input, with per-session retries. Sessions share no mutable
//! state, so a failed or slow session never blocks the others. Results are
//! collected by completion, not submission order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{RefinementPipeline, Session, SessionStatus};
use crate::error::{ConfigError, Result, SessionError};

// ============================================================================
// Text provider boundary
// ============================================================================

/// Supplies raw text for a stable input id.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Fetch the text for an input id.
    async fn get_text(&self, input_id: &str) -> Result<String>;
}

/// Map-backed provider for tests and in-process use.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTextProvider {
    texts: HashMap<String, String>,
}

impl InMemoryTextProvider {
    /// Build a provider over (id, text) pairs.
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            texts: entries.into_iter().collect(),
        }
    }

    /// Add one entry.
    pub fn insert(&mut self, input_id: impl Into<String>, text: impl Into<String>) {
        self.texts.insert(input_id.into(), text.into());
    }
}

#[async_trait]
impl TextProvider for InMemoryTextProvider {
    async fn get_text(&self, input_id: &str) -> Result<String> {
        self.texts.get(input_id).cloned().ok_or_else(|| {
            SessionError::ProviderFailed {
                input_id: input_id.to_string(),
                reason: "unknown input id".to_string(),
            }
            .into()
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Configuration for the harness.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Default worker-pool size when `run_sessions` is called with 0.
    pub batch_size: usize,
    /// Times a failed session is retried before its failure is final.
    pub retry_count: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            retry_count: 1,
        }
    }
}

impl HarnessConfig {
    /// Validate ranges. Called once at harness construction.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be > 0".to_string()).into());
        }
        Ok(())
    }
}

/// Runs many sessions concurrently over a batch of inputs.
pub struct Harness {
    pipeline: Arc<RefinementPipeline>,
    provider: Arc<dyn TextProvider>,
    config: HarnessConfig,
}

impl Harness {
    /// Create a harness, validating the configuration.
    pub fn new(
        pipeline: Arc<RefinementPipeline>,
        provider: Arc<dyn TextProvider>,
        config: HarnessConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pipeline,
            provider,
            config,
        })
    }

    /// Run one session per input on a worker pool of `batch_size` (0 uses
    /// the configured default).
    ///
    /// Every input yields a terminal session, failed ones included; results
    /// arrive in completion order.
    pub async fn run_sessions(&self, input_ids: &[String], batch_size: usize) -> Vec<Session> {
        let workers = if batch_size == 0 {
            self.config.batch_size
        } else {
            batch_size
        };
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set = JoinSet::new();

        for input_id in input_ids {
            let input_id = input_id.clone();
            let pipeline = Arc::clone(&self.pipeline);
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            let retry_count = self.config.retry_count;

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                run_one(&pipeline, provider.as_ref(), &input_id, retry_count).await
            });
        }

        let mut sessions = Vec::with_capacity(input_ids.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(error = %e, "session task aborted"),
            }
        }

        info!(
            total = sessions.len(),
            converged = count(&sessions, SessionStatus::Converged),
            failed = count(&sessions, SessionStatus::Failed),
            "harness batch complete"
        );
        sessions
    }
}

fn count(sessions: &[Session], status: SessionStatus) -> usize {
    sessions.iter().filter(|s| s.status == status).count()
}

/// Run a single input, retrying failed sessions up to `retry_count` times.
async fn run_one(
    pipeline: &RefinementPipeline,
    provider: &dyn TextProvider,
    input_id: &str,
    retry_count: usize,
) -> Session {
    let mut attempt = 0usize;
    loop {
        let mut session = Session::new(input_id, pipeline.session_config().clone());
        match provider.get_text(input_id).await {
            Ok(text) => session.run(&text, pipeline).await,
            Err(e) => session.fail(e),
        }

        if session.status != SessionStatus::Failed || attempt >= retry_count {
            return session;
        }
        attempt += 1;
        warn!(input_id, attempt, "session failed, retrying");
    }
}
