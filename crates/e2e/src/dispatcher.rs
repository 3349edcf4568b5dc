//! Work-queue dispatch and slot replenishment
//!
//! The dispatcher keeps up to `max_concurrency` cases inside the crawl
//! engine. Every settlement arrives on a channel fed by the engine's
//! `on_finish` hook; the dispatcher reports it and refills the freed slot
//! from the registry. All of this runs on one task, so the registry is
//! only ever popped from one place at a time.
//!
//! Slot lifecycle: `IDLE → LOADING → SUBMITTED → IDLE`, or
//! `IDLE → LOADING → FAILED → IDLE` when a case cannot be loaded or queued.
//! A failed slot immediately tries the next reference.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::engine::{CrawlEngine, CrawlHelper, CrawlHooks, Submission, SubmissionResult};
use crate::error::{CaseError, E2eResult, RunRoutineError};
use crate::loader::{CaseLoader, LoadOutcome};
use crate::page::PageHandle;
use crate::registry::Registry;
use crate::reporter::{Reporter, RunSummary};

/// Engine hooks that run the case routine and forward settlements
pub struct CaseHooks {
    settled: mpsc::UnboundedSender<SubmissionResult>,
}

impl CaseHooks {
    /// Hooks plus the receiving end the dispatcher listens on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SubmissionResult>) {
        let (settled, rx) = mpsc::unbounded_channel();
        (Self { settled }, rx)
    }
}

#[async_trait]
impl CrawlHooks for CaseHooks {
    async fn custom_crawl(
        &self,
        page: &mut dyn PageHandle,
        crawl: &CrawlHelper,
        submission: &Submission,
    ) -> Result<Value, RunRoutineError> {
        let identity = submission.case.identity();
        let label = submission
            .case
            .config
            .log_options
            .as_ref()
            .and_then(|o| o.label.clone())
            .unwrap_or_default();
        let span = info_span!(
            "case",
            project = %identity.project,
            name = %identity.name,
            label = %label
        );

        submission
            .case
            .run
            .run(page, crawl, submission)
            .instrument(span)
            .await
    }

    fn on_finish(&self, result: SubmissionResult) {
        if self.settled.send(result).is_err() {
            warn!("Dispatcher is gone, dropping a case settlement");
        }
    }
}

/// The run context for one invocation
pub struct Dispatcher {
    registry: Registry,
    loader: CaseLoader,
    engine: Arc<dyn CrawlEngine>,
    reporter: Reporter,
    settled: mpsc::UnboundedReceiver<SubmissionResult>,
    in_flight: usize,
}

impl Dispatcher {
    pub fn new(
        registry: Registry,
        loader: CaseLoader,
        engine: Arc<dyn CrawlEngine>,
        settled: mpsc::UnboundedReceiver<SubmissionResult>,
    ) -> Self {
        Self {
            registry,
            loader,
            engine,
            reporter: Reporter::new(),
            settled,
            in_flight: 0,
        }
    }

    /// Cases submitted to the engine and not yet settled
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Fill up to `n` slots from the registry.
    ///
    /// A slot is only used up by a successful submission; a case that fails
    /// to load or to enqueue is reported and the next reference is tried.
    /// Stops early once the registry is empty. Returns the number of cases
    /// submitted.
    pub async fn replenish(&mut self, mut n: usize) -> usize {
        let mut submitted = 0;

        while n > 0 {
            let Some(reference) = self.registry.pop_front() else {
                break;
            };

            let bundle = match self.loader.load(&reference).await {
                LoadOutcome::Loaded(bundle) => bundle,
                LoadOutcome::Failed(failure) => {
                    self.reporter.report_failure(&failure);
                    continue;
                }
            };

            let identity = bundle.identity();
            let url = bundle.config.entry_url().unwrap_or_default().to_string();
            let submission = Submission::new(url, Arc::new(bundle));

            match self.engine.queue(submission).await {
                Ok(()) => {
                    self.in_flight += 1;
                    submitted += 1;
                    n -= 1;
                    debug!(
                        in_flight = self.in_flight,
                        remaining = self.registry.len(),
                        "Submitted case {}",
                        reference
                    );
                }
                Err(source) => {
                    let err = CaseError::Enqueue {
                        reference: reference.to_string(),
                        source,
                    };
                    error!("{}", err);
                    self.reporter
                        .report_failed(&reference, &identity, err.to_string());
                }
            }
        }

        debug_assert!(self.in_flight <= self.engine.max_concurrency());
        submitted
    }

    /// Report a settled case and refill its slot
    pub async fn on_case_settled(&mut self, result: SubmissionResult) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.reporter.report(&result);
        self.replenish(1).await;
    }

    /// Dispatch every registered case, wait for the engine to go idle, then
    /// close it.
    pub async fn run(mut self) -> E2eResult<RunSummary> {
        let slots = self.engine.max_concurrency();
        let initial = slots.saturating_sub(self.engine.reserved_slots()).max(1);
        info!(
            "Dispatching {} case(s) over {} slot(s)",
            self.registry.len(),
            initial
        );

        self.replenish(initial).await;

        while self.in_flight > 0 {
            match self.settled.recv().await {
                Some(result) => self.on_case_settled(result).await,
                None => {
                    error!(
                        "Engine stopped reporting with {} case(s) in flight",
                        self.in_flight
                    );
                    break;
                }
            }
        }

        self.engine.on_idle().await;
        debug!("Engine idle, shutting down");
        self.engine.close().await?;

        Ok(self.reporter.finish())
    }
}
