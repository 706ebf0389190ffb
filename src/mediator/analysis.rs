//! Batch and longitudinal analysis over terminal sessions.
//!
//! Pure aggregation over independent session scores: the parallel variant
//! summarizes sessions on a rayon pool and folds the summaries in input
//! order, so its output is identical to the sequential version. Reports carry
//! no wall-clock fields for the same reason.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::session::{Session, SessionStatus};

/// Direction of score movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Flat,
    Regressing,
}

/// Slope magnitude below which a trend counts as flat.
const FLAT_BAND: f32 = 0.01;

impl Trend {
    fn from_slope(slope: f32) -> Self {
        if slope > FLAT_BAND {
            Trend::Improving
        } else if slope < -FLAT_BAND {
            Trend::Regressing
        } else {
            Trend::Flat
        }
    }
}

/// Aggregated view over one batch of terminal sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Sessions analyzed, including failed ones.
    pub session_count: usize,
    /// Mean final score over sessions that produced at least one critique.
    pub average_score: f32,
    /// Final-score histogram over five equal buckets in [0, 1].
    pub score_distribution: [usize; 5],
    /// Mean per-session linear slope over round scores.
    pub slope: f32,
    /// Classification of `slope`.
    pub trend: Trend,
    /// Sessions that converged.
    pub converged: usize,
    /// Sessions that exhausted their round budget.
    pub max_rounds_reached: usize,
    /// Sessions that failed.
    pub failed: usize,
    /// Recommendation kinds still open at session end, by frequency
    /// (descending count, then tag).
    pub top_recommendations: Vec<(String, usize)>,
}

/// Longitudinal composition of several batch reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    /// Number of reports composed.
    pub report_count: usize,
    /// Trend of the average score across reports.
    pub trend: Trend,
    /// Slope of the average score across reports.
    pub slope: f32,
    /// Last average minus first average.
    pub average_score_delta: f32,
    /// Estimated further batches until the quality threshold is met;
    /// `Some(0)` when already met, `None` when not converging.
    pub convergence_estimate: Option<u32>,
}

/// Per-session digest the batch fold consumes.
struct SessionSummary {
    final_score: Option<f32>,
    slope: Option<f32>,
    status: SessionStatus,
    open_recommendations: Vec<&'static str>,
}

fn summarize(session: &Session) -> SessionSummary {
    let scores = session.round_scores();
    let final_score = scores.last().copied();
    let slope = if scores.len() >= 2 {
        Some(linear_slope(&scores))
    } else {
        None
    };
    let open_recommendations = session
        .history
        .last()
        .map(|record| {
            record
                .score
                .recommendations
                .iter()
                .map(|r| r.kind.tag())
                .collect()
        })
        .unwrap_or_default();

    SessionSummary {
        final_score,
        slope,
        status: session.status,
        open_recommendations,
    }
}

/// Least-squares slope of `values` over their indices.
pub(crate) fn linear_slope(values: &[f32]) -> f32 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f32;
    let sum_x: f32 = (0..n).map(|i| i as f32).sum();
    let sum_y: f32 = values.iter().sum();
    let sum_xy: f32 = values.iter().enumerate().map(|(i, y)| i as f32 * y).sum();
    let sum_xx: f32 = (0..n).map(|i| (i * i) as f32).sum();

    let denominator = n_f * sum_xx - sum_x * sum_x;
    if denominator == 0.0 {
        return 0.0;
    }
    (n_f * sum_xy - sum_x * sum_y) / denominator
}

fn fold(summaries: Vec<SessionSummary>) -> BatchReport {
    let session_count = summaries.len();

    let finals: Vec<f32> = summaries.iter().filter_map(|s| s.final_score).collect();
    let average_score = if finals.is_empty() {
        0.0
    } else {
        finals.iter().sum::<f32>() / finals.len() as f32
    };

    let mut score_distribution = [0usize; 5];
    for score in &finals {
        let bucket = ((score * 5.0).floor() as usize).min(4);
        score_distribution[bucket] += 1;
    }

    let slopes: Vec<f32> = summaries.iter().filter_map(|s| s.slope).collect();
    let slope = if slopes.is_empty() {
        0.0
    } else {
        slopes.iter().sum::<f32>() / slopes.len() as f32
    };

    let count_status = |status: SessionStatus| {
        summaries.iter().filter(|s| s.status == status).count()
    };

    let mut recommendation_counts: std::collections::BTreeMap<&str, usize> =
        std::collections::BTreeMap::new();
    for summary in &summaries {
        for tag in &summary.open_recommendations {
            *recommendation_counts.entry(tag).or_default() += 1;
        }
    }
    let mut top_recommendations: Vec<(String, usize)> = recommendation_counts
        .into_iter()
        .map(|(tag, count)| (tag.to_string(), count))
        .collect();
    top_recommendations.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    BatchReport {
        session_count,
        average_score,
        score_distribution,
        slope,
        trend: Trend::from_slope(slope),
        converged: count_status(SessionStatus::Converged),
        max_rounds_reached: count_status(SessionStatus::MaxRoundsReached),
        failed: count_status(SessionStatus::Failed),
        top_recommendations,
    }
}

/// Summarize a batch of terminal sessions.
pub fn analyze_batch(sessions: &[Session]) -> BatchReport {
    fold(sessions.iter().map(summarize).collect())
}

/// Summarize a batch on a bounded worker pool.
///
/// Matches [`analyze_batch`] exactly: summaries are computed independently
/// and folded in input order.
pub fn analyze_batch_parallel(sessions: &[Session]) -> BatchReport {
    fold(sessions.par_iter().map(summarize).collect())
}

/// Compose historical batch reports into a longitudinal trend.
pub fn analyze_trends(reports: &[BatchReport], quality_threshold: f32) -> TrendReport {
    let averages: Vec<f32> = reports.iter().map(|r| r.average_score).collect();
    let slope = linear_slope(&averages);
    let average_score_delta = match (averages.first(), averages.last()) {
        (Some(first), Some(last)) => last - first,
        _ => 0.0,
    };

    let convergence_estimate = match averages.last() {
        Some(&last) if last >= quality_threshold => Some(0),
        Some(&last) if slope > 1e-4 => {
            Some(((quality_threshold - last) / slope).ceil() as u32)
        }
        _ => None,
    };

    TrendReport {
        report_count: reports.len(),
        trend: Trend::from_slope(slope),
        slope,
        average_score_delta,
        convergence_estimate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critic::{Critic, CritiqueContext};
    use crate::ontology::{Entity, Ontology, Relationship};
    use crate::session::{RoundRecord, Session, SessionConfig};

    fn scored_session(overalls: &[f32], status: SessionStatus) -> Session {
        let critic = Critic::new();
        let mut ontology = Ontology::new();
        ontology.insert_entity(Entity::with_id("a", "Person", "Ann"));
        ontology.insert_entity(Entity::with_id("b", "Topic", "Rust"));
        ontology.insert_relationship(Relationship::with_id("r", "a", "knows", "b"));
        let template = critic.evaluate(&ontology, &CritiqueContext::default());

        let mut session = Session::new("input", SessionConfig::default());
        for (round, &overall) in overalls.iter().enumerate() {
            let mut score = template.clone();
            score.overall = overall;
            session.history.push(RoundRecord {
                round,
                score,
                actions: Vec::new(),
            });
        }
        session.status = status;
        session
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let sessions: Vec<Session> = (0..9)
            .map(|i| {
                scored_session(
                    &[0.3 + 0.05 * i as f32, 0.5, 0.6],
                    SessionStatus::Converged,
                )
            })
            .collect();

        assert_eq!(analyze_batch(&sessions), analyze_batch_parallel(&sessions));
    }

    #[test]
    fn test_batch_counts_statuses() {
        let sessions = vec![
            scored_session(&[0.4, 0.8], SessionStatus::Converged),
            scored_session(&[0.4, 0.45], SessionStatus::MaxRoundsReached),
            scored_session(&[], SessionStatus::Failed),
        ];

        let report = analyze_batch(&sessions);
        assert_eq!(report.session_count, 3);
        assert_eq!(report.converged, 1);
        assert_eq!(report.max_rounds_reached, 1);
        assert_eq!(report.failed, 1);
        // The failed session produced no score and is excluded from the mean.
        assert!((report.average_score - (0.8 + 0.45) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_improving_trend() {
        let sessions = vec![scored_session(&[0.2, 0.4, 0.6, 0.8], SessionStatus::Converged)];
        let report = analyze_batch(&sessions);
        assert_eq!(report.trend, Trend::Improving);
        assert!(report.slope > 0.1);
    }

    #[test]
    fn test_regressing_trend() {
        let sessions = vec![scored_session(
            &[0.8, 0.6, 0.4],
            SessionStatus::MaxRoundsReached,
        )];
        let report = analyze_batch(&sessions);
        assert_eq!(report.trend, Trend::Regressing);
    }

    #[test]
    fn test_distribution_buckets() {
        let sessions = vec![
            scored_session(&[0.05], SessionStatus::MaxRoundsReached),
            scored_session(&[0.5], SessionStatus::MaxRoundsReached),
            scored_session(&[0.99], SessionStatus::Converged),
        ];
        let report = analyze_batch(&sessions);
        assert_eq!(report.score_distribution, [1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_linear_slope() {
        assert!((linear_slope(&[0.0, 1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(linear_slope(&[0.5]), 0.0);
        assert!(linear_slope(&[1.0, 1.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_trends_convergence_estimate() {
        let reports: Vec<BatchReport> = [0.4f32, 0.5, 0.6]
            .iter()
            .map(|&avg| {
                let sessions = vec![scored_session(&[avg], SessionStatus::MaxRoundsReached)];
                analyze_batch(&sessions)
            })
            .collect();

        let trend = analyze_trends(&reports, 0.75);
        assert_eq!(trend.trend, Trend::Improving);
        // 0.6 + 2 * 0.1 >= 0.75 -> two more batches estimated.
        assert_eq!(trend.convergence_estimate, Some(2));

        let met = analyze_trends(&reports, 0.55);
        assert_eq!(met.convergence_estimate, Some(0));
    }

    #[test]
    fn test_trends_empty() {
        let trend = analyze_trends(&[], 0.75);
        assert_eq!(trend.report_count, 0);
        assert_eq!(trend.convergence_estimate, None);
    }
}
