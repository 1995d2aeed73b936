//! Concurrent evaluation of many chunks.
//!
//! Chunks are independent, so the pipeline spawns one task per chunk and
//! bounds how many run at once with a semaphore. Each finished
//! [`Evaluation`] is sent on a channel as soon as it exists, which lets the
//! caller persist records one at a time. Cancellation stops new chunks from
//! starting; chunks already in flight run to completion and are delivered.

use crate::router::{Evaluation, Router};
use crate::{Chunk, DropReason, Outcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Counts for a finished (or cancelled) run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Chunks that reached a terminal outcome.
    pub total: usize,
    pub signals: usize,
    pub dropped: BTreeMap<DropReason, usize>,
    pub errored: usize,
    /// Set when the run stopped before every chunk was started.
    pub cancelled: bool,
}

impl RunSummary {
    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }

    /// A run fails only when every evaluated chunk errored.
    pub fn run_failed(&self) -> bool {
        self.total > 0 && self.errored == self.total
    }

    fn record(&mut self, outcome: &Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Signal(_) => self.signals += 1,
            Outcome::Dropped(event) => *self.dropped.entry(event.reason).or_default() += 1,
            Outcome::Errored(_) => self.errored += 1,
        }
    }
}

pub struct Pipeline {
    router: Arc<Router>,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(router: Router) -> Self {
        let concurrency = router.config().concurrency.max(1);
        Self {
            router: Arc::new(router),
            concurrency,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Evaluate `chunks`, sending each evaluation on `sink` as it completes.
    ///
    /// `cancel` flipping to `true` stops new evaluations from starting.
    /// Outcomes arrive in completion order, not input order.
    pub async fn run<I>(
        &self,
        chunks: I,
        sink: mpsc::Sender<Evaluation>,
        mut cancel: watch::Receiver<bool>,
    ) -> RunSummary
    where
        I: IntoIterator<Item = Chunk>,
    {
        let mut summary = RunSummary {
            run_id: Uuid::new_v4(),
            ..RunSummary::default()
        };
        info!(run_id = %summary.run_id, concurrency = self.concurrency, "run started");

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for chunk in chunks {
            let permit = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    summary.cancelled = true;
                    break;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let router = Arc::clone(&self.router);
            let sink = sink.clone();
            tasks.spawn(async move {
                let evaluation = router.evaluate(&chunk).await;
                drop(permit);
                let outcome = evaluation.outcome.clone();
                if sink.send(evaluation).await.is_err() {
                    warn!(chunk_id = %chunk.chunk_id, "evaluation receiver closed, outcome not delivered");
                }
                outcome
            });
        }

        if summary.cancelled {
            info!(run_id = %summary.run_id, in_flight = tasks.len(), "run cancelled, draining in-flight evaluations");
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(&outcome),
                Err(err) => error!(run_id = %summary.run_id, error = %err, "evaluation task failed"),
            }
        }

        info!(
            run_id = %summary.run_id,
            total = summary.total,
            signals = summary.signals,
            dropped = summary.dropped_total(),
            errored = summary.errored,
            "run finished"
        );
        summary
    }
}

/// Resolves once the flag reads `true`. Never resolves if the sender is gone
/// without having cancelled.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        let flagged = *rx.borrow_and_update();
        if flagged {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DropEvent, ErrorRecord, Stage};

    #[test]
    fn run_failed_only_when_everything_errored() {
        let mut summary = RunSummary::default();
        assert!(!summary.run_failed());

        summary.record(&Outcome::Errored(ErrorRecord {
            chunk_id: "a".into(),
            stage: Stage::Classify,
            detail: "x".into(),
        }));
        assert!(summary.run_failed());

        summary.record(&Outcome::Dropped(DropEvent {
            chunk_id: "b".into(),
            reason: DropReason::LowScore,
        }));
        assert!(!summary.run_failed());
        assert_eq!(summary.dropped_total(), 1);
        assert_eq!(summary.total, 2);
    }
}
