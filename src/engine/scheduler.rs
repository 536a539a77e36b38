//! Serial chain scheduler: one item in flight, next dispatch only after save.

use opentelemetry::KeyValue;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::collaborator::{Calculator, ItemRepository};
use super::continuation::{Completion, Continuation, Dispatch};
use crate::error::{Error, Result};
use crate::model::{ChainState, FailurePolicy, ItemId, MAX_CHAIN_LEN, RunId, WorkQueue};
use crate::store::{PopOutcome, QueueStore};
use crate::telemetry::chain::{record_state_transition, start_item_span, start_run_span};
use crate::telemetry::metrics;

/// Configuration for a scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Name of the persisted queue record this scheduler owns.
    pub chain_key: String,
    /// Largest accepted submission. Capped at [`MAX_CHAIN_LEN`].
    pub max_items: usize,
    pub failure_policy: FailurePolicy,
    /// How long to wait for a calculate callback. `None` waits forever.
    pub callback_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chain_key: "default".to_string(),
            max_items: MAX_CHAIN_LEN,
            failure_policy: FailurePolicy::Abort,
            callback_timeout: None,
        }
    }
}

/// An item the skip policy stepped over.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    pub item: ItemId,
    pub error: String,
}

/// Summary of a run that ended without aborting.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    /// Results saved, in dispatch order.
    pub saved: usize,
    pub skipped: Vec<SkippedItem>,
    /// `Completed` or `Superseded`.
    pub state: ChainState,
}

/// Handle to a submitted run.
pub struct RunHandle {
    run_id: RunId,
    state: watch::Receiver<ChainState>,
    join: JoinHandle<Result<RunReport>>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Current state of the run.
    pub fn state(&self) -> ChainState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ChainState> {
        self.state.clone()
    }

    /// Wait for the run to end. An aborted run returns the error that
    /// stopped it.
    pub async fn wait(self) -> Result<RunReport> {
        self.join
            .await
            .map_err(|e| Error::Other(format!("chain driver task failed: {e}")))?
    }
}

/// Dispatches a chain of items to a [`Calculator`] strictly one at a time.
///
/// Each item goes through [`dispatch_next`](Self::dispatch_next) →
/// [`process_one`](Self::process_one) → [`Dispatch::wait`] →
/// [`on_calculate_complete`](Self::on_calculate_complete), which saves the
/// result and dispatches again. [`submit`](Self::submit) spawns a driver that
/// runs this loop; the building blocks are public for hosts that schedule
/// the phases themselves.
pub struct ChainScheduler {
    store: Arc<dyn QueueStore>,
    items: Arc<dyn ItemRepository>,
    calculator: Arc<dyn Calculator>,
    config: Arc<SchedulerConfig>,
    /// Held by a driver for its whole run so runs never overlap.
    lane: Arc<Mutex<()>>,
}

impl Clone for ChainScheduler {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            items: Arc::clone(&self.items),
            calculator: Arc::clone(&self.calculator),
            config: Arc::clone(&self.config),
            lane: Arc::clone(&self.lane),
        }
    }
}

impl ChainScheduler {
    pub fn new(
        store: Arc<dyn QueueStore>,
        items: Arc<dyn ItemRepository>,
        calculator: Arc<dyn Calculator>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            items,
            calculator,
            config: Arc::new(config),
            lane: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The persisted queue for this scheduler's chain key.
    pub async fn inspect(&self) -> Result<Option<WorkQueue>> {
        self.store.load(&self.config.chain_key).await
    }

    /// Start a new run over `items`.
    ///
    /// Any queue persisted under the chain key is discarded, whatever run
    /// owns it. A superseded run stops at its next dispatch; an item it
    /// already dispatched is still saved before this run dispatches anything.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `items` exceeds the configured maximum or
    /// repeats an identifier. Nothing is persisted in that case.
    pub async fn submit(&self, items: Vec<ItemId>) -> Result<RunHandle> {
        let key = self.config.chain_key.as_str();

        if let Err(e) = self.validate(&items) {
            metrics::runs_submitted().add(
                1,
                &[
                    KeyValue::new("chain", key.to_string()),
                    KeyValue::new("result", "invalid"),
                ],
            );
            return Err(e);
        }

        let run_id = RunId::new();
        let queue = WorkQueue::new(run_id, items);
        let total = queue.submitted;

        self.store.replace(key, &queue).await?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("chain", key.to_string()),
                KeyValue::new("operation", "replace"),
            ],
        );
        metrics::runs_submitted().add(
            1,
            &[
                KeyValue::new("chain", key.to_string()),
                KeyValue::new("result", "ok"),
            ],
        );
        info!(chain = key, run_id = %run_id, items = total, "chain submitted");

        let (state_tx, state_rx) = watch::channel(ChainState::QueueLoaded);
        let span = start_run_span(key, run_id, total);
        let driver = self.clone();
        let join = tokio::spawn(async move { driver.drive(run_id, state_tx).await }.instrument(span));

        Ok(RunHandle {
            run_id,
            state: state_rx,
            join,
        })
    }

    fn validate(&self, items: &[ItemId]) -> Result<()> {
        let max = self.config.max_items.min(MAX_CHAIN_LEN);
        if items.len() > max {
            return Err(Error::InvalidArgument(format!(
                "{} items submitted, at most {max} allowed",
                items.len()
            )));
        }
        let mut seen = HashSet::with_capacity(items.len());
        if let Some(dup) = items.iter().find(|id| !seen.insert(*id)) {
            return Err(Error::InvalidArgument(format!("duplicate item id {dup}")));
        }
        Ok(())
    }

    /// Pop the next item of `run_id`'s queue.
    ///
    /// Returns at most one identifier. The shortened queue is persisted
    /// before this returns. An empty result ends the run: the queue is
    /// drained (its record is deleted), aborted, or owned by a newer run.
    pub async fn dispatch_next(&self, run_id: RunId) -> Result<Vec<ItemId>> {
        Ok(match self.pop_next(run_id).await? {
            PopOutcome::Item(id) => vec![id],
            _ => Vec::new(),
        })
    }

    async fn pop_next(&self, run_id: RunId) -> Result<PopOutcome> {
        let key = self.config.chain_key.as_str();
        let outcome = self.store.pop(key, run_id).await?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("chain", key.to_string()),
                KeyValue::new("operation", "pop"),
            ],
        );

        match &outcome {
            PopOutcome::Item(id) => {
                metrics::items_dispatched().add(1, &[KeyValue::new("chain", key.to_string())]);
                debug!(run_id = %run_id, item = %id, "item dispatched");
            }
            PopOutcome::Empty => {
                self.store.delete(key, run_id).await?;
                metrics::queue_operations().add(
                    1,
                    &[
                        KeyValue::new("chain", key.to_string()),
                        KeyValue::new("operation", "delete"),
                    ],
                );
                debug!(run_id = %run_id, "queue drained");
            }
            PopOutcome::Aborted => {
                debug!(run_id = %run_id, "queue aborted, nothing to dispatch");
            }
            PopOutcome::Superseded => {
                info!(run_id = %run_id, "queue taken over by a newer run");
            }
        }
        Ok(outcome)
    }

    /// Read `id`'s current state and hand it to the calculator.
    ///
    /// Returns once calculate has accepted the request; the returned
    /// [`Dispatch`] resolves when the calculator calls back.
    pub async fn process_one(&self, run_id: RunId, id: ItemId) -> Result<Dispatch> {
        let started = Instant::now();
        let payload = self.items.read(&id).await.map_err(|source| Error::Read {
            item: id.clone(),
            source,
        })?;
        metrics::operation_duration_ms().record(
            started.elapsed().as_millis() as f64,
            &[KeyValue::new("operation", "chain.read")],
        );

        let (continuation, dispatch) = Continuation::channel(run_id, id.clone());
        self.calculator
            .calculate(payload, continuation)
            .await
            .map_err(|source| Error::CalculateSubmission { item: id, source })?;
        debug!(run_id = %run_id, item = %dispatch.item(), "calculate submitted");

        Ok(dispatch)
    }

    /// Save a calculated result, then dispatch the next item of its run.
    pub async fn on_calculate_complete(&self, completion: Completion) -> Result<Vec<ItemId>> {
        let run_id = completion.run_id;
        self.save_result(completion).await?;
        self.dispatch_next(run_id).await
    }

    async fn save_result(&self, completion: Completion) -> Result<()> {
        let Completion {
            run_id,
            item,
            result,
            duration_ms,
        } = completion;
        metrics::operation_duration_ms().record(
            duration_ms as f64,
            &[KeyValue::new("operation", "chain.calculate")],
        );

        let started = Instant::now();
        self.items
            .save(&item, result)
            .await
            .map_err(|source| Error::Save {
                item: item.clone(),
                source,
            })?;
        let save_ms = started.elapsed().as_millis() as u64;
        metrics::operation_duration_ms()
            .record(save_ms as f64, &[KeyValue::new("operation", "chain.save")]);
        metrics::items_saved().add(
            1,
            &[KeyValue::new("chain", self.config.chain_key.clone())],
        );
        info!(run_id = %run_id, item = %item, calculate_ms = duration_ms, save_ms, "result saved");
        Ok(())
    }

    /// Mark `run_id`'s queue aborted from outside its driver.
    ///
    /// The driver stops at its next dispatch. An item already handed to the
    /// calculator is still saved; the remaining items stay in the record.
    /// No-op if the record belongs to another run.
    pub async fn interrupt(&self, run_id: RunId, reason: &str) -> Result<()> {
        let key = self.config.chain_key.as_str();
        self.store.mark_aborted(key, run_id, reason).await?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("chain", key.to_string()),
                KeyValue::new("operation", "abort"),
            ],
        );
        warn!(run_id = %run_id, reason, "run interrupted");
        Ok(())
    }

    /// Driver loop for one run. Runs inside the run span.
    async fn drive(self, run_id: RunId, state: watch::Sender<ChainState>) -> Result<RunReport> {
        let _lane = self.lane.lock().await;
        let mut tracker = StateTracker {
            current: ChainState::QueueLoaded,
            tx: state,
            span: Span::current(),
        };
        let mut report = RunReport {
            run_id,
            saved: 0,
            skipped: Vec::new(),
            state: ChainState::QueueLoaded,
        };

        tracker.advance(ChainState::Dispatching)?;
        let mut outcome = match self.pop_next(run_id).await {
            Ok(outcome) => outcome,
            Err(e) => return self.abort(run_id, &mut tracker, e).await,
        };

        let mut position = 0;
        let terminal = loop {
            let id = match outcome {
                PopOutcome::Item(id) => id,
                PopOutcome::Empty => break ChainState::Completed,
                PopOutcome::Superseded => break ChainState::Superseded,
                PopOutcome::Aborted => {
                    let err = Error::Other(format!("queue of run {run_id} was marked aborted"));
                    return self.finish_aborted(run_id, &mut tracker, err);
                }
            };

            position += 1;
            let cycle = self
                .run_cycle(run_id, id.clone(), &mut tracker)
                .instrument(start_item_span(&id, position))
                .await;

            match cycle {
                Ok(()) => report.saved += 1,
                Err(e)
                    if self.config.failure_policy == FailurePolicy::Skip
                        && e.is_item_failure() =>
                {
                    warn!(item = %id, error = %e, "item failed, skipping");
                    metrics::items_failed().add(
                        1,
                        &[
                            KeyValue::new("chain", self.config.chain_key.clone()),
                            KeyValue::new("kind", e.kind()),
                            KeyValue::new("policy", "skip"),
                        ],
                    );
                    report.skipped.push(SkippedItem {
                        item: id,
                        error: e.to_string(),
                    });
                }
                Err(e) => return self.abort(run_id, &mut tracker, e).await,
            }

            tracker.advance(ChainState::Dispatching)?;
            outcome = match self.pop_next(run_id).await {
                Ok(outcome) => outcome,
                Err(e) => return self.abort(run_id, &mut tracker, e).await,
            };
        };

        tracker.advance(terminal)?;
        report.state = terminal;

        metrics::runs_finished().add(
            1,
            &[
                KeyValue::new("chain", self.config.chain_key.clone()),
                KeyValue::new("state", terminal.to_string()),
            ],
        );
        info!(
            run_id = %run_id,
            saved = report.saved,
            skipped = report.skipped.len(),
            state = %terminal,
            "run finished"
        );

        Ok(report)
    }

    /// Dispatch → callback → save for one item.
    async fn run_cycle(
        &self,
        run_id: RunId,
        id: ItemId,
        tracker: &mut StateTracker,
    ) -> Result<()> {
        let dispatch = self.process_one(run_id, id).await?;
        tracker.advance(ChainState::AwaitingCallback)?;
        let completion = dispatch.wait(self.config.callback_timeout).await?;
        tracker.advance(ChainState::Saving)?;
        self.save_result(completion).await
    }

    /// Stop the run: keep its remaining items under an aborted queue and
    /// surface the error.
    async fn abort(
        &self,
        run_id: RunId,
        tracker: &mut StateTracker,
        err: Error,
    ) -> Result<RunReport> {
        let key = self.config.chain_key.as_str();
        error!(run_id = %run_id, error = %err, "chain aborted");

        if err.is_item_failure() {
            metrics::items_failed().add(
                1,
                &[
                    KeyValue::new("chain", key.to_string()),
                    KeyValue::new("kind", err.kind()),
                    KeyValue::new("policy", "abort"),
                ],
            );
        }
        match self.store.mark_aborted(key, run_id, &err.to_string()).await {
            Ok(()) => metrics::queue_operations().add(
                1,
                &[
                    KeyValue::new("chain", key.to_string()),
                    KeyValue::new("operation", "abort"),
                ],
            ),
            Err(e) => warn!(run_id = %run_id, "could not mark queue aborted: {e}"),
        }
        self.finish_aborted(run_id, tracker, err)
    }

    fn finish_aborted(
        &self,
        run_id: RunId,
        tracker: &mut StateTracker,
        err: Error,
    ) -> Result<RunReport> {
        metrics::runs_finished().add(
            1,
            &[
                KeyValue::new("chain", self.config.chain_key.clone()),
                KeyValue::new("state", "aborted"),
            ],
        );
        if let Err(e) = tracker.advance(ChainState::Aborted) {
            warn!(run_id = %run_id, "{e}");
        }

        Err(err)
    }
}

/// Tracks the run's state machine and publishes it to the handle.
struct StateTracker {
    current: ChainState,
    tx: watch::Sender<ChainState>,
    span: Span,
}

impl StateTracker {
    fn advance(&mut self, to: ChainState) -> Result<()> {
        let from = self.current;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if from != to {
            record_state_transition(&self.span, &from.to_string(), &to.to_string());
        }
        self.current = to;
        self.tx.send_replace(to);
        Ok(())
    }
}
