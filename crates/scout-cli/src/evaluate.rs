//! `scout evaluate`

use crate::{EvaluateArgs, ScorerKind};
use anyhow::{bail, Context, Result};
use colored::Colorize;
use scout_evaluator::llm::providers::UnifiedClient;
use scout_evaluator::llm::LLMProvider;
use scout_evaluator::{
    Chunk, EvaluatorConfig, HeuristicScorer, LlmClassifier, LlmScorer, OpportunityScorer,
    Pipeline, Router, RunSummary,
};
use scout_storage::{load_evaluated_ids, EvaluationLog};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

pub(crate) fn resolve_config(args: &EvaluateArgs) -> Result<EvaluatorConfig> {
    let mut config = EvaluatorConfig::from_env()?;
    if let Some(v) = args.confidence_threshold {
        config.confidence_threshold = v;
    }
    if let Some(v) = args.score_threshold {
        config.score_threshold = v;
    }
    if let Some(secs) = args.timeout_secs {
        config.call_timeout = Duration::from_secs(secs);
    }
    if let Some(n) = args.concurrency {
        config.concurrency = n;
    }
    config.validate()?;
    Ok(config)
}

/// Chunks not yet in the log, capped at `limit`. Duplicate ids within the
/// input are evaluated once.
pub(crate) fn pending_chunks(chunks: Vec<Chunk>, done: &HashSet<String>, limit: Option<usize>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|c| !done.contains(&c.chunk_id))
        .filter(|c| seen.insert(c.chunk_id.clone()))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

pub(crate) async fn run(args: EvaluateArgs) -> Result<()> {
    let scorer_kind = args.scorer;
    run_with(args, |config| build_router(config, scorer_kind)).await
}

/// Language-model backed router for `scout evaluate`.
fn build_router(config: EvaluatorConfig, scorer_kind: ScorerKind) -> Result<Router> {
    let client = UnifiedClient::from_env().context("configuring language model client")?;
    let provider: Arc<dyn LLMProvider> = Arc::new(client);
    info!(model = %provider.model_info().name, "language model ready");

    let scorer: Arc<dyn OpportunityScorer> = match scorer_kind {
        ScorerKind::Heuristic => Arc::new(HeuristicScorer::new()),
        ScorerKind::Llm => Arc::new(LlmScorer::new(Arc::clone(&provider))),
    };
    Ok(Router::new(Arc::new(LlmClassifier::new(provider)), scorer, config))
}

/// Everything that can fail during setup runs before the log is opened, so a
/// failed start never truncates a previous run's evaluations.
pub(crate) async fn run_with<F>(args: EvaluateArgs, build: F) -> Result<()>
where
    F: FnOnce(EvaluatorConfig) -> Result<Router>,
{
    let config = resolve_config(&args)?;

    let chunks = scout_ingest::load_chunks(&args.chunks)?;
    let done = if args.reprocess {
        HashSet::new()
    } else {
        load_evaluated_ids(&args.out)?
    };
    let total_loaded = chunks.len();
    let pending = pending_chunks(chunks, &done, args.limit);
    info!(
        loaded = total_loaded,
        already_evaluated = done.len(),
        pending = pending.len(),
        "chunks ready"
    );

    if pending.is_empty() {
        println!("{}", "Nothing to evaluate.".yellow());
        return Ok(());
    }

    let router = build(config)?;
    let log = EvaluationLog::open(&args.out, args.reprocess)?;

    println!(
        "{} {} chunks → {}",
        "Evaluating".green().bold(),
        pending.len(),
        args.out.display()
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight chunks");
            let _ = cancel_tx.send(true);
        }
    });

    let summary = evaluate_into_log(Pipeline::new(router), pending, log, cancel_rx).await?;
    print_summary(&summary);

    if summary.run_failed() {
        bail!("every evaluated chunk failed ({} errors)", summary.errored);
    }
    Ok(())
}

/// Run the pipeline, persisting each evaluation as it arrives.
pub(crate) async fn evaluate_into_log(
    pipeline: Pipeline,
    chunks: Vec<Chunk>,
    log: EvaluationLog,
    cancel: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let (tx, mut rx) = mpsc::channel(64);

    let writer = tokio::spawn(async move {
        let mut failures = 0usize;
        while let Some(evaluation) = rx.recv().await {
            if let Err(err) = log.append_evaluation(&evaluation) {
                failures += 1;
                error!(chunk_id = %evaluation.chunk_id, error = %err, "failed to write evaluation");
            }
        }
        failures
    });

    let summary = pipeline.run(chunks, tx, cancel).await;
    let write_failures = writer.await.context("evaluation writer task")?;
    if write_failures > 0 {
        bail!("{write_failures} evaluations could not be written to the log");
    }
    Ok(summary)
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{} run {}", "Summary".bold(), summary.run_id);
    println!("  evaluated: {}", summary.total);
    println!("  {}: {}", "signals".green(), summary.signals);
    println!("  {}: {}", "dropped".yellow(), summary.dropped_total());
    for (reason, count) in &summary.dropped {
        println!("    {reason}: {count}");
    }
    let errored = format!("{}: {}", "errored", summary.errored);
    if summary.errored > 0 {
        println!("  {}", errored.red());
    } else {
        println!("  {errored}");
    }
    if summary.cancelled {
        println!("  {}", "cancelled before all chunks started".yellow());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scout_evaluator::{ClassificationError, ClassificationResult, IntentCategory, IntentClassifier};

    struct EchoClassifier(ClassificationResult);

    #[async_trait]
    impl IntentClassifier for EchoClassifier {
        async fn classify(&self, _chunk: &Chunk) -> Result<ClassificationResult, ClassificationError> {
            Ok(self.0.clone())
        }
    }

    fn chunk(id: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            artifact_id: "a".to_string(),
            district: "Weber".to_string(),
            source_url: "https://example.org/w.pdf".to_string(),
            board_page_url: String::new(),
            meeting_date: None,
            text: "The board approved a pilot of a new reading program for 2025-26.".to_string(),
            offset: 0,
        }
    }

    fn args(chunks: &std::path::Path, out: &std::path::Path) -> EvaluateArgs {
        EvaluateArgs {
            chunks: chunks.to_path_buf(),
            out: out.to_path_buf(),
            limit: None,
            reprocess: true,
            concurrency: None,
            confidence_threshold: None,
            score_threshold: None,
            timeout_secs: None,
            scorer: ScorerKind::Heuristic,
        }
    }

    #[tokio::test]
    async fn failed_setup_leaves_previous_log_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let chunks_path = dir.path().join("chunks.jsonl");
        let log_path = dir.path().join("evaluations.jsonl");
        scout_ingest::append_chunks(&chunks_path, &[chunk("a")]).unwrap();
        let previous = "{\"chunk_id\":\"old\"}\n";
        std::fs::write(&log_path, previous).unwrap();

        let result = run_with(args(&chunks_path, &log_path), |_| {
            Err(anyhow::anyhow!("No LLM provider configured"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&log_path).unwrap(), previous);
    }

    #[test]
    fn pending_skips_done_duplicates_and_respects_limit() {
        let chunks = vec![chunk("a"), chunk("b"), chunk("b"), chunk("c"), chunk("d")];
        let done: HashSet<String> = ["a".to_string()].into_iter().collect();

        let ids: Vec<String> = pending_chunks(chunks.clone(), &done, None)
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "d"]);

        assert_eq!(pending_chunks(chunks, &done, Some(2)).len(), 2);
    }

    #[tokio::test]
    async fn evaluations_land_in_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evaluations.jsonl");
        let log = EvaluationLog::open(&path, false).unwrap();

        let classifier = EchoClassifier(ClassificationResult {
            category: IntentCategory::PilotEvaluation,
            confidence: 0.9,
            evidence_snippet: "approved a pilot of a new reading program".to_string(),
            rationale: "pilot".to_string(),
        });
        let router = Router::new(
            Arc::new(classifier),
            Arc::new(HeuristicScorer::new()),
            EvaluatorConfig::default(),
        );
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let summary = evaluate_into_log(Pipeline::new(router), vec![chunk("x"), chunk("y")], log, cancel_rx)
            .await
            .unwrap();
        assert_eq!(summary.total, 2);

        let records = scout_storage::read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(load_evaluated_ids(&path).unwrap().len(), 2);
    }
}
