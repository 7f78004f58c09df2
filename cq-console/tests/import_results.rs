//! Result import surface tests
//!
//! Loads stored result documents through the same normalizer as the live
//! session path, with distinct provenance tagging and failure isolation.

use cq_common::config::SessionConfig;
use cq_common::metrics::{MetricFilter, MetricStatus, ResultProvenance};
use cq_console::cues::CuePlayer;
use cq_console::session::SessionController;
use std::sync::Arc;

fn controller() -> Arc<SessionController> {
    SessionController::new(SessionConfig::default(), CuePlayer::disabled())
}

#[tokio::test]
async fn import_tags_provenance_as_file() {
    let controller = controller();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stored.json");
    std::fs::write(
        &path,
        r#"{
            "wrapper": {"metrics": [
                {"site": "Cz", "name": "Theta/Beta (EO)", "val": 3.4,
                 "range": "< 2.2", "probe": "Ask about focus."}
            ]},
            "summary": {"potential_symptom_questions": ["Ask about sleep."]}
        }"#,
    )
    .expect("write");

    controller
        .load_result_file(&path)
        .await
        .expect("import succeeds");

    let rows = controller.metric_rows(MetricFilter::All).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].location, "Cz");
    assert_eq!(rows[0].status, MetricStatus::OutOfRange);

    let summary = controller.summary().await.expect("summary");
    assert_eq!(
        summary.probes,
        vec!["Ask about focus.", "Ask about sleep."]
    );

    assert_eq!(
        controller.provenance().await,
        Some(ResultProvenance::ImportedFile(path))
    );
}

#[tokio::test]
async fn import_tolerates_nonfinite_tokens() {
    let controller = controller();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nonfinite.json");
    std::fs::write(
        &path,
        r#"{"metrics": [
            {"location": "Fz", "metric": "Delta (EC)", "value": NaN, "normal_range": "< 9.0 uV"},
            {"location": "Fz", "metric": "LoAlpha/HiAlpha (EC)", "value": Infinity, "normal_range": "< 1.5"}
        ]}"#,
    )
    .expect("write");

    controller.load_result_file(&path).await.expect("import");

    let rows = controller.metric_rows(MetricFilter::MissingOnly).await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == MetricStatus::Missing));
}

#[tokio::test]
async fn failed_import_preserves_prior_result() {
    let controller = controller();
    let dir = tempfile::tempdir().expect("tempdir");

    let good = dir.path().join("good.json");
    std::fs::write(
        &good,
        r#"{"metrics": [{"location": "O1", "metric": "A", "value": 1, "normal_range": "< 5"}]}"#,
    )
    .expect("write");
    controller.load_result_file(&good).await.expect("import");

    // A document with no locatable metrics array fails that operation only
    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, r#"{"summary": {"in_range": 0}}"#).expect("write");
    let result = controller.load_result_file(&bad).await;
    assert!(matches!(
        result,
        Err(cq_console::Error::Common(cq_common::Error::NoMetricsFound))
    ));

    // Prior state untouched
    let rows = controller.metric_rows(MetricFilter::All).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(
        controller.provenance().await,
        Some(ResultProvenance::ImportedFile(good))
    );
}

#[tokio::test]
async fn missing_file_reports_io_error() {
    let controller = controller();
    let result = controller
        .load_result_file(std::path::Path::new("/nonexistent/result.json"))
        .await;
    assert!(matches!(result, Err(cq_console::Error::Io(_))));
    assert!(controller.summary().await.is_none());
}
