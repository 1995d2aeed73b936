//! Tests for the evaluation log and exports

use super::export::*;
use super::*;
use chrono::TimeZone;
use scout_evaluator::{DropEvent, ErrorRecord, IntentCategory, NextStep, Stage};
use tempfile::tempdir;

fn signal(chunk_id: &str, artifact_id: &str, score: u8, evidence: &str) -> SignalRecord {
    SignalRecord {
        chunk_id: chunk_id.to_string(),
        artifact_id: artifact_id.to_string(),
        district: "Provo City School District".to_string(),
        meeting_date: Some("2025-04-08".to_string()),
        source_url: "https://example.org/minutes-2025-04-08.pdf".to_string(),
        board_page_url: String::new(),
        category: IntentCategory::CurriculumAdoption,
        confidence: 0.91,
        opportunity_score: score,
        evidence_snippet: evidence.to_string(),
        summary: "Math adoption committee forming.".to_string(),
        recommended_next_step: scout_evaluator::next_step_for_score(score),
        rationale: "Committee formed.".to_string(),
        generated_at: Utc.with_ymd_and_hms(2025, 4, 9, 12, 0, 0).unwrap(),
    }
}

fn evaluation(chunk_id: &str, outcome: Outcome) -> Evaluation {
    Evaluation {
        chunk_id: chunk_id.to_string(),
        artifact_id: "art".to_string(),
        district: "Provo City School District".to_string(),
        outcome,
        classification: None,
        evidence: None,
        score: None,
        trace: vec![State::Start, State::End],
    }
}

#[test]
fn test_log_appends_and_resumes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data").join("evaluations.jsonl");

    let log = EvaluationLog::open(&path, false).unwrap();
    log.append_evaluation(&evaluation(
        "c0",
        Outcome::Signal(signal("c0", "art", 80, "forming a committee")),
    ))
    .unwrap();
    log.append_evaluation(&evaluation(
        "c1",
        Outcome::Dropped(DropEvent {
            chunk_id: "c1".into(),
            reason: DropReason::LowScore,
        }),
    ))
    .unwrap();
    log.append_evaluation(&evaluation(
        "c2",
        Outcome::Errored(ErrorRecord {
            chunk_id: "c2".into(),
            stage: Stage::Score,
            detail: "scorer timed out".into(),
        }),
    ))
    .unwrap();
    drop(log);

    let records = read_records(&path).unwrap();
    assert_eq!(records.len(), 3);
    assert!(records[0].keep);
    assert_eq!(records[1].drop_reason, Some(DropReason::LowScore));
    assert_eq!(records[2].errors, vec!["score: scorer timed out".to_string()]);

    let done = load_evaluated_ids(&path).unwrap();
    assert!(done.contains("c0") && done.contains("c1"));
    assert!(!done.contains("c2"), "errored chunks are retried");

    // Reopening without truncation keeps history.
    let log = EvaluationLog::open(&path, false).unwrap();
    log.append_evaluation(&evaluation(
        "c3",
        Outcome::Dropped(DropEvent {
            chunk_id: "c3".into(),
            reason: DropReason::WrongCategory,
        }),
    ))
    .unwrap();
    assert_eq!(read_records(&path).unwrap().len(), 4);
}

#[test]
fn test_reprocess_truncates() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("evaluations.jsonl");
    std::fs::write(&path, "{\"stale\": true}\n").unwrap();

    let log = EvaluationLog::open(&path, true).unwrap();
    assert_eq!(log.path(), path.as_path());
    assert!(read_records(&path).unwrap().is_empty());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
}

#[test]
fn test_torn_last_line_is_skipped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("evaluations.jsonl");
    let log = EvaluationLog::open(&path, false).unwrap();
    log.append_evaluation(&evaluation(
        "c0",
        Outcome::Signal(signal("c0", "art", 90, "pilot")),
    ))
    .unwrap();
    drop(log);

    let mut contents = std::fs::read_to_string(&path).unwrap();
    contents.push_str("{\"chunk_id\": \"c1\", \"keep\": tr");
    std::fs::write(&path, contents).unwrap();

    let records = read_records(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].chunk_id, "c0");
}

#[test]
fn test_missing_log_reads_empty() {
    let dir = tempdir().unwrap();
    assert!(load_evaluated_ids(&dir.path().join("none.jsonl")).unwrap().is_empty());
}

#[test]
fn test_dedupe_keeps_best_score() {
    let long_prefix = "x".repeat(100);
    let signals = vec![
        signal("a0", "art", 60, "forming a committee"),
        signal("a1", "art", 85, "forming a committee"),
        signal("a2", "other", 70, "forming a committee"),
        signal("a3", "art", 55, &format!("{long_prefix} tail one")),
        signal("a4", "art", 65, &format!("{long_prefix} tail two")),
    ];

    let mut deduped = dedupe_signals(signals);
    assert_eq!(deduped.len(), 3);
    sort_signals(&mut deduped);
    let ids: Vec<&str> = deduped.iter().map(|s| s.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "a2", "a4"]);
}

#[test]
fn test_extract_only_kept_signals() {
    let mut kept = EvaluationRecord::from_evaluation(
        &evaluation("k", Outcome::Signal(signal("k", "art", 77, "q"))),
        Utc::now(),
    );
    let dropped = EvaluationRecord::from_evaluation(
        &evaluation(
            "d",
            Outcome::Dropped(DropEvent {
                chunk_id: "d".into(),
                reason: DropReason::EvidenceFailed,
            }),
        ),
        Utc::now(),
    );
    assert_eq!(extract_signals(&[kept.clone(), dropped]).len(), 1);

    kept.keep = false;
    assert!(extract_signals(&[kept]).is_empty());
}

#[test]
fn test_markdown_report() {
    let long_evidence = "e".repeat(700);
    let signals = vec![
        signal("a", "art", 88, &long_evidence),
        signal("b", "art2", 61, "short quote"),
    ];
    let generated = Utc.with_ymd_and_hms(2025, 5, 1, 8, 30, 0).unwrap();
    let md = render_markdown(&signals, 1, generated).unwrap();

    assert!(md.starts_with("# Top Buying Signals"));
    assert!(md.contains("**Generated:** 2025-05-01 08:30:00"));
    assert!(md.contains("**Total Signals Found:** 2"));
    assert!(md.contains("## 1. Provo City School District"));
    assert!(!md.contains("## 2."), "only the top signal is listed");
    assert!(md.contains("**Score:** 88/100 | **Category:** Curriculum Adoption | **Confidence:** 91%"));
    assert!(md.contains(&format!("**Next Step:** 🔥 {}", NextStep::ReachOutNow.title())));
    assert!(md.contains(&format!("> {}...", "e".repeat(497))));
    assert!(md.contains("**Scoring Criteria:**"));
}

#[test]
fn test_export_writes_both_files() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("evaluations.jsonl");
    let log = EvaluationLog::open(&log_path, false).unwrap();
    for (id, score) in [("c0", 62u8), ("c1", 91), ("c2", 75)] {
        log.append_evaluation(&evaluation(
            id,
            Outcome::Signal(signal(id, id, score, "adopt new math materials")),
        ))
        .unwrap();
    }
    drop(log);

    let out_dir = dir.path().join("out");
    let summary = run(&log_path, &out_dir, DEFAULT_TOP).unwrap();
    assert_eq!(summary.unique, 3);

    let json: Vec<SignalRecord> =
        serde_json::from_str(&std::fs::read_to_string(&summary.json_path).unwrap()).unwrap();
    let scores: Vec<u8> = json.iter().map(|s| s.opportunity_score).collect();
    assert_eq!(scores, vec![91, 75, 62]);
    assert!(std::fs::read_to_string(&summary.markdown_path)
        .unwrap()
        .contains("## 3."));
}

#[test]
fn test_export_with_no_signals() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("evaluations.jsonl");
    std::fs::write(&log_path, "").unwrap();

    let summary = run(&log_path, dir.path(), DEFAULT_TOP).unwrap();
    assert_eq!(summary.unique, 0);
    assert_eq!(std::fs::read_to_string(&summary.json_path).unwrap(), "[]");
    assert!(std::fs::read_to_string(&summary.markdown_path)
        .unwrap()
        .starts_with("# No Signals Found"));
}

#[test]
fn test_export_requires_log() {
    let dir = tempdir().unwrap();
    assert!(run(&dir.path().join("missing.jsonl"), dir.path(), 5).is_err());
}

#[test]
fn test_truncate_text() {
    assert_eq!(truncate_text("short", 10), "short");
    assert_eq!(truncate_text("abcdefghijk", 8), "abcde...");
}
