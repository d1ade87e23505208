//! Fan-out / join
//!
//! Runs one sub-execution per [`FanOutUnit`] on its own tokio task, at most
//! `max_concurrency` at a time, and waits for all of them. Every unit
//! produces a [`StateUpdate`]: failures and panics are converted by the
//! worker's [`on_error`](FanOutWorker::on_error) into in-band results, so
//! one bad unit never sinks its siblings.
//!
//! Results are merged in unit order once every unit has joined, whatever
//! order the tasks finished in. Workers are expected to touch only the
//! append-only accumulator, so the merged outcome does not depend on that
//! order either.
//!
//! If the thread is deleted while units are running, units that have not
//! started are skipped and the join reports
//! [`EngineError::ThreadDeleted`]; partial results are discarded.

use crate::error::{EngineError, Result};
use crate::stage::{FanOutUnit, FanOutWorker, StageContext};
use crate::state::{ExecutionState, StateUpdate};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Outcome of a join.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JoinReport {
    /// Merged updates of all units
    pub update: StateUpdate,
    pub succeeded: usize,
    pub failed: usize,
}

enum UnitResult {
    Done(StateUpdate),
    Failed(String),
    Skipped,
}

/// Bounded-concurrency fan-out runner.
#[derive(Debug, Clone, Copy)]
pub struct FanOutJoin {
    max_concurrency: usize,
}

impl FanOutJoin {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run `worker` over every unit and merge the results.
    pub async fn run(
        &self,
        worker: Arc<dyn FanOutWorker>,
        ctx: &StageContext,
        state: Arc<ExecutionState>,
        units: Vec<FanOutUnit>,
    ) -> Result<JoinReport> {
        debug!(
            thread_id = %ctx.thread_id,
            worker = %worker.name(),
            units = units.len(),
            max_concurrency = self.max_concurrency,
            "Starting fan-out"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let handles: Vec<_> = units
            .iter()
            .cloned()
            .map(|unit| {
                let semaphore = semaphore.clone();
                let worker = worker.clone();
                let ctx = ctx.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return UnitResult::Skipped;
                    };
                    if ctx.is_cancelled() {
                        return UnitResult::Skipped;
                    }
                    match worker.run(&ctx, &state, &unit).await {
                        Ok(update) => UnitResult::Done(update),
                        Err(err) => UnitResult::Failed(err.to_string()),
                    }
                })
            })
            .collect();

        let results = join_all(handles).await;

        if ctx.is_cancelled() {
            warn!(thread_id = %ctx.thread_id, worker = %worker.name(), "Fan-out cancelled, discarding results");
            return Err(EngineError::ThreadDeleted(ctx.thread_id.clone()));
        }

        let mut report = JoinReport::default();
        for (unit, result) in units.iter().zip(results) {
            let update = match result {
                Ok(UnitResult::Done(update)) => {
                    report.succeeded += 1;
                    update
                }
                Ok(UnitResult::Failed(error)) => {
                    warn!(thread_id = %ctx.thread_id, unit = %unit.key, error = %error, "Fan-out unit failed");
                    report.failed += 1;
                    worker.on_error(unit, &error)
                }
                Ok(UnitResult::Skipped) => continue,
                Err(join_error) => {
                    warn!(thread_id = %ctx.thread_id, unit = %unit.key, error = %join_error, "Fan-out unit panicked");
                    report.failed += 1;
                    worker.on_error(unit, "the task panicked")
                }
            };
            report.update = std::mem::take(&mut report.update).merge(update);
        }

        debug!(
            thread_id = %ctx.thread_id,
            succeeded = report.succeeded,
            failed = report.failed,
            "Fan-out joined"
        );
        Ok(report)
    }
}

impl Default for FanOutJoin {
    fn default() -> Self {
        Self::new(4)
    }
}
