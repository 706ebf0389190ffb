//! Theorem-prover boundary.
//!
//! The validator only needs a narrow "check satisfiability of a formula set"
//! capability; this trait is that boundary. No prover is implemented here,
//! and the validator works fully without one.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::formula::Fact;
use crate::error::Result;

/// Outcome of a satisfiability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SatOutcome {
    /// The fact set plus axioms is satisfiable: no logical contradiction.
    Sat,
    /// Unsatisfiable: the facts contradict the axioms.
    Unsat,
    /// The prover could not decide (timeout, incompleteness).
    Unknown,
}

/// Variable assignments demonstrating a contradiction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterModel {
    /// Name/value bindings reported by the prover.
    pub bindings: Vec<(String, String)>,
}

impl CounterModel {
    /// Look up a binding by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for CounterModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "counter-model:")?;
        for (name, value) in &self.bindings {
            write!(f, " {name}={value}")?;
        }
        Ok(())
    }
}

/// Full response from a prover call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProverResponse {
    /// The satisfiability verdict.
    pub outcome: SatOutcome,
    /// A counter-model, when the prover found one.
    pub counter_model: Option<CounterModel>,
}

impl ProverResponse {
    /// A plain satisfiable response.
    pub fn sat() -> Self {
        Self {
            outcome: SatOutcome::Sat,
            counter_model: None,
        }
    }

    /// An unsatisfiable response with an optional counter-model.
    pub fn unsat(counter_model: Option<CounterModel>) -> Self {
        Self {
            outcome: SatOutcome::Unsat,
            counter_model,
        }
    }

    /// An undecided response.
    pub fn unknown() -> Self {
        Self {
            outcome: SatOutcome::Unknown,
            counter_model: None,
        }
    }
}

/// External theorem-prover boundary.
///
/// Implementations wrap whatever backend is available (an SMT solver, a
/// proof assistant, a remote service). Calls are a blocking I/O boundary and
/// are wrapped in a timeout by the validator.
#[async_trait]
pub trait ProverBackend: Send + Sync {
    /// Check whether `facts` plus `axioms` are jointly satisfiable.
    async fn check_satisfiable(
        &self,
        facts: &[Fact],
        axioms: &[String],
        timeout: Duration,
    ) -> Result<ProverResponse>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
