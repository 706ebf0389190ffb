//! Harness batch orchestration tests.

use std::sync::Arc;

use anneal::{
    analyze_batch, analyze_batch_parallel, analyze_trends, Harness, HarnessConfig,
    InMemoryTextProvider, RefinementPipeline, SessionStatus, Trend,
};

fn provider() -> InMemoryTextProvider {
    InMemoryTextProvider::new(
        [
            (
                "report-1",
                "Alice works at Acme Corp. Acme Corp is based in Berlin.",
            ),
            (
                "report-2",
                "Grace Hopper founded Eckert Mauchly. Grace Hopper collaborates with Howard Aiken.",
            ),
            ("report-3", "Bob manages Initech. Carol works at Initech."),
            ("report-4", ""),
        ]
        .into_iter()
        .map(|(id, text)| (id.to_string(), text.to_string())),
    )
}

fn input_ids() -> Vec<String> {
    vec![
        "report-1".to_string(),
        "report-2".to_string(),
        "report-3".to_string(),
        "report-4".to_string(),
    ]
}

#[tokio::test]
async fn test_batch_run_and_analysis() {
    let harness = Harness::new(
        Arc::new(RefinementPipeline::with_defaults().unwrap()),
        Arc::new(provider()),
        HarnessConfig::default(),
    )
    .unwrap();

    let sessions = harness.run_sessions(&input_ids(), 2).await;
    assert_eq!(sessions.len(), 4);
    assert!(sessions.iter().all(|s| s.status.is_terminal()));
    assert!(!sessions
        .iter()
        .any(|s| s.status == SessionStatus::Failed));

    let report = analyze_batch(&sessions);
    assert_eq!(report.session_count, 4);
    assert!((0.0..=1.0).contains(&report.average_score));
    assert_eq!(
        report.score_distribution.iter().sum::<usize>(),
        sessions
            .iter()
            .filter(|s| !s.history.is_empty())
            .count()
    );

    // The parallel analyzer agrees exactly.
    assert_eq!(report, analyze_batch_parallel(&sessions));
}

#[tokio::test]
async fn test_analysis_is_order_insensitive_in_counts() {
    let harness = Harness::new(
        Arc::new(RefinementPipeline::with_defaults().unwrap()),
        Arc::new(provider()),
        HarnessConfig::default(),
    )
    .unwrap();

    // Completion order varies with the worker pool; status counts and the
    // per-session content must not.
    let sessions = harness.run_sessions(&input_ids(), 4).await;
    let report = analyze_batch(&sessions);
    assert_eq!(
        report.converged + report.max_rounds_reached + report.failed,
        4
    );
}

#[tokio::test]
async fn test_trend_composition_across_batches() {
    let harness = Harness::new(
        Arc::new(RefinementPipeline::with_defaults().unwrap()),
        Arc::new(provider()),
        HarnessConfig::default(),
    )
    .unwrap();

    let mut reports = Vec::new();
    for _ in 0..3 {
        let sessions = harness.run_sessions(&input_ids(), 2).await;
        reports.push(analyze_batch(&sessions));
    }

    let trend = analyze_trends(&reports, 0.75);
    assert_eq!(trend.report_count, 3);
    // Identical batches over identical inputs: the longitudinal trend is flat.
    assert_eq!(trend.trend, Trend::Flat);
    assert!(trend.average_score_delta.abs() < 0.05);
}
