//! Crawl engine: a fixed pool of page workers fed by a submission queue
//!
//! ```text
//!  queue() ──► [ submission channel ] ──► worker 0 ─┐
//!                                    ├─► worker 1 ─┤  new_page → custom_crawl
//!                                    └─► worker N ─┘  → close page → on_finish
//! ```
//!
//! `outstanding` counts submissions that were accepted but whose
//! `on_finish` has not run yet; the engine is idle when it reaches zero.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::case::{CaseBundle, CaseReference, CaseStatus};
use crate::error::{E2eResult, EnqueueError, PageError, RunRoutineError};
use crate::page::{PageFactory, PageHandle};
use crate::settings::{NavigationSettings, Settings};

/// The crawl engine surface the dispatcher drives
#[async_trait]
pub trait CrawlEngine: Send + Sync {
    /// Accept a submission. Rejections leave the engine unchanged.
    async fn queue(&self, submission: Submission) -> Result<(), EnqueueError>;

    /// Resolve once nothing is queued or running
    async fn on_idle(&self);

    /// Stop the workers and release the browser
    async fn close(&self) -> E2eResult<()>;

    /// Number of worker slots
    fn max_concurrency(&self) -> usize;

    /// Slots already taken by the engine itself at launch
    fn reserved_slots(&self) -> usize {
        0
    }
}

/// Hooks the engine invokes for each submission
#[async_trait]
pub trait CrawlHooks: Send + Sync {
    /// Run the submission against a freshly opened page
    async fn custom_crawl(
        &self,
        page: &mut dyn PageHandle,
        crawl: &CrawlHelper,
        submission: &Submission,
    ) -> Result<Value, RunRoutineError>;

    /// Called exactly once per accepted submission, after its page is closed
    fn on_finish(&self, result: SubmissionResult);
}

/// `{ url, case }` as handed to the engine
#[derive(Debug, Clone)]
pub struct Submission {
    pub url: String,
    pub case: Arc<CaseBundle>,
}

impl Submission {
    pub fn new(url: impl Into<String>, case: Arc<CaseBundle>) -> Self {
        Self {
            url: url.into(),
            case,
        }
    }

    pub fn reference(&self) -> &CaseReference {
        &self.case.reference
    }
}

/// Outcome of one submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub reference: CaseReference,
    pub url: String,
    pub case: CaseResult,
    /// Whatever the routine returned on success
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub project: String,
    pub name: String,
    pub status: CaseStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Engine launch options
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub max_concurrency: usize,
    /// Extra navigation attempts for the entry page
    pub retry_count: usize,
    pub navigation: NavigationSettings,
    /// Different cases may share a URL, so this is off by default
    pub skip_duplicates: bool,
    pub artifacts_dir: PathBuf,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            retry_count: 0,
            navigation: NavigationSettings::default(),
            skip_duplicates: false,
            artifacts_dir: PathBuf::from("log/screenshots"),
        }
    }
}

impl LaunchOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let autotest = &settings.autotest;
        Self {
            max_concurrency: autotest.max_concurrency.max(1),
            retry_count: autotest.retry_count,
            navigation: autotest.navigation.clone(),
            skip_duplicates: autotest.skip_duplicates,
            artifacts_dir: autotest.artifacts_dir.clone(),
        }
    }
}

/// Title and final URL of a loaded entry page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlResponse {
    pub url: String,
    pub title: Option<String>,
}

/// Per-submission helper handed to routines
#[derive(Debug, Clone)]
pub struct CrawlHelper {
    url: String,
    case_name: String,
    navigation: NavigationSettings,
    retry_count: usize,
    artifacts_dir: PathBuf,
}

impl CrawlHelper {
    pub fn new(submission: &Submission, options: &LaunchOptions) -> Self {
        Self {
            url: submission.url.clone(),
            case_name: submission.reference().base_name(),
            navigation: options.navigation.clone(),
            retry_count: options.retry_count,
            artifacts_dir: options.artifacts_dir.clone(),
        }
    }

    /// Entry URL of the submission
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn navigation(&self) -> &NavigationSettings {
        &self.navigation
    }

    /// Load the entry page, retrying failed navigations
    pub async fn crawl(
        &self,
        page: &mut dyn PageHandle,
    ) -> Result<CrawlResponse, RunRoutineError> {
        let attempts = self.retry_count + 1;
        let mut last_error: Option<PageError> = None;

        for attempt in 1..=attempts {
            match page
                .goto(&self.url, &self.navigation.wait_until, self.navigation.timeout_ms)
                .await
            {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    warn!(
                        "Navigation to {} failed (attempt {}/{}): {}",
                        self.url, attempt, attempts, e
                    );
                    last_error = Some(e);
                }
            }
        }

        if let Some(source) = last_error {
            return Err(RunRoutineError::Navigation {
                url: self.url.clone(),
                attempts,
                source,
            });
        }

        if self.navigation.settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.navigation.settle_ms)).await;
        }

        Ok(CrawlResponse {
            url: page.url().await.ok().flatten().unwrap_or_else(|| self.url.clone()),
            title: page.title().await.ok().flatten(),
        })
    }

    /// Resolve a step URL against the entry URL
    pub fn resolve_url(&self, target: &str) -> String {
        match Url::parse(&self.url).and_then(|base| base.join(target)) {
            Ok(url) => url.to_string(),
            Err(_) => target.to_string(),
        }
    }

    /// Where a named screenshot of this case goes; creates the directory
    pub fn screenshot_path(&self, name: &str) -> std::io::Result<PathBuf> {
        let dir = self.artifacts_dir.join(&self.case_name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join(format!("{}.png", name)))
    }
}

/// State shared between the pool handle and its workers
struct PoolShared {
    options: LaunchOptions,
    factory: Arc<dyn PageFactory>,
    hooks: Arc<dyn CrawlHooks>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Submission>>,
    outstanding: watch::Sender<usize>,
}

/// [`CrawlEngine`] backed by N page workers
pub struct PagePool {
    shared: Arc<PoolShared>,
    sender: Mutex<Option<mpsc::UnboundedSender<Submission>>>,
    seen_urls: Mutex<HashSet<String>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PagePool {
    /// Start the worker slots
    pub fn launch(
        options: LaunchOptions,
        factory: Arc<dyn PageFactory>,
        hooks: Arc<dyn CrawlHooks>,
    ) -> Self {
        let max_concurrency = options.max_concurrency.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0usize);

        let shared = Arc::new(PoolShared {
            options: LaunchOptions {
                max_concurrency,
                ..options
            },
            factory,
            hooks,
            receiver: tokio::sync::Mutex::new(receiver),
            outstanding,
        });

        let workers = (0..max_concurrency)
            .map(|slot| {
                let shared = shared.clone();
                tokio::spawn(async move { worker_loop(slot, shared).await })
            })
            .collect();

        info!("Crawl engine started with {} page worker(s)", max_concurrency);

        Self {
            shared,
            sender: Mutex::new(Some(sender)),
            seen_urls: Mutex::new(HashSet::new()),
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
        }
    }

    /// Submissions accepted but not yet finished
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.borrow()
    }
}

#[async_trait]
impl CrawlEngine for PagePool {
    async fn queue(&self, submission: Submission) -> Result<(), EnqueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EnqueueError::Closed);
        }

        Url::parse(&submission.url).map_err(|e| EnqueueError::InvalidUrl {
            url: submission.url.clone(),
            reason: e.to_string(),
        })?;

        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(EnqueueError::Closed)?;

        // Held until the send settles so concurrent duplicates cannot both pass.
        let mut seen_urls = self.seen_urls.lock();
        let skip_duplicates = self.shared.options.skip_duplicates;
        if skip_duplicates && seen_urls.contains(&submission.url) {
            return Err(EnqueueError::Duplicate(submission.url));
        }

        let url = submission.url.clone();
        self.shared.outstanding.send_modify(|n| *n += 1);
        if sender.send(submission).is_err() {
            self.shared.outstanding.send_modify(|n| *n -= 1);
            return Err(EnqueueError::Closed);
        }

        if skip_duplicates {
            seen_urls.insert(url);
        }
        Ok(())
    }

    async fn on_idle(&self) {
        let mut rx = self.shared.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    async fn close(&self) -> E2eResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Dropping the sender ends every worker loop once the queue drains.
        self.sender.lock().take();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Page worker terminated abnormally: {}", e);
            }
        }

        self.shared.factory.shutdown().await?;
        info!("Crawl engine closed");
        Ok(())
    }

    fn max_concurrency(&self) -> usize {
        self.shared.options.max_concurrency
    }
}

async fn worker_loop(slot: usize, shared: Arc<PoolShared>) {
    loop {
        let next = {
            let mut receiver = shared.receiver.lock().await;
            receiver.recv().await
        };
        let Some(submission) = next else {
            break;
        };

        debug!(slot, case = %submission.reference(), "Page worker picked up submission");
        let result = process(&shared, submission).await;
        shared.hooks.on_finish(result);
        shared.outstanding.send_modify(|n| *n -= 1);
    }
    debug!(slot, "Page worker stopped");
}

async fn process(shared: &PoolShared, submission: Submission) -> SubmissionResult {
    let start = Instant::now();
    let helper = CrawlHelper::new(&submission, &shared.options);

    let outcome = match shared.factory.new_page().await {
        Ok(mut page) => {
            let run = std::panic::AssertUnwindSafe(shared.hooks.custom_crawl(
                page.as_mut(),
                &helper,
                &submission,
            ))
            .catch_unwind()
            .await;

            if let Err(e) = page.close().await {
                warn!("Failed to close page for {}: {}", submission.reference(), e);
            }

            match run {
                Ok(outcome) => outcome,
                Err(panic) => Err(RunRoutineError::Panicked(panic_message(panic.as_ref()))),
            }
        }
        Err(e) => Err(RunRoutineError::Page(e)),
    };

    let identity = submission.case.identity();
    let (status, error, value) = match outcome {
        Ok(value) => (CaseStatus::Pass, None, Some(value)),
        Err(e) => {
            error!("Case {} failed: {}", submission.reference(), e);
            (CaseStatus::Fail, Some(e.to_string()), None)
        }
    };

    SubmissionResult {
        reference: submission.reference().clone(),
        url: submission.url.clone(),
        case: CaseResult {
            project: identity.project,
            name: identity.name,
            status,
            error,
            duration_ms: start.elapsed().as_millis() as u64,
        },
        value,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CaseConfig;
    use crate::testing::{FakeBrowser, NoopRoutine, RecordingHooks};

    fn bundle(reference: &str) -> Arc<CaseBundle> {
        Arc::new(CaseBundle {
            reference: CaseReference::new(reference),
            config: CaseConfig::default(),
            run: Arc::new(NoopRoutine),
        })
    }

    fn options(max_concurrency: usize) -> LaunchOptions {
        LaunchOptions {
            max_concurrency,
            navigation: NavigationSettings {
                settle_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_url() {
        let hooks = Arc::new(RecordingHooks::default());
        let pool = PagePool::launch(options(1), Arc::new(FakeBrowser::default()), hooks);

        let err = pool
            .queue(Submission::new("not a url", bundle("./a.yaml")))
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::InvalidUrl { .. }));
        assert_eq!(pool.outstanding(), 0);
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_after_close() {
        let hooks = Arc::new(RecordingHooks::default());
        let pool = PagePool::launch(options(2), Arc::new(FakeBrowser::default()), hooks);
        pool.close().await.unwrap();

        let err = pool
            .queue(Submission::new("https://example.com", bundle("./a.yaml")))
            .await
            .unwrap_err();
        assert_eq!(err, EnqueueError::Closed);
    }

    #[tokio::test]
    async fn test_skip_duplicates() {
        let hooks = Arc::new(RecordingHooks::default());
        let pool = PagePool::launch(
            LaunchOptions {
                skip_duplicates: true,
                ..options(1)
            },
            Arc::new(FakeBrowser::default()),
            hooks.clone(),
        );

        pool.queue(Submission::new("https://example.com/", bundle("./a.yaml")))
            .await
            .unwrap();
        let err = pool
            .queue(Submission::new("https://example.com/", bundle("./b.yaml")))
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Duplicate(_)));

        pool.on_idle().await;
        assert_eq!(hooks.finished().len(), 1);
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_send_does_not_mark_url_seen() {
        let hooks = Arc::new(RecordingHooks::default());
        let pool = PagePool::launch(
            LaunchOptions {
                skip_duplicates: true,
                ..options(1)
            },
            Arc::new(FakeBrowser::default()),
            hooks,
        );
        // Workers have not been polled yet on this runtime, so the receiver is free.
        pool.shared.receiver.try_lock().unwrap().close();

        let err = pool
            .queue(Submission::new("https://example.com/", bundle("./a.yaml")))
            .await
            .unwrap_err();
        assert_eq!(err, EnqueueError::Closed);
        assert!(pool.seen_urls.lock().is_empty());
        assert_eq!(pool.outstanding(), 0);
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_runs_submissions_and_goes_idle() {
        let hooks = Arc::new(RecordingHooks::default());
        let browser = Arc::new(FakeBrowser::default());
        let pool = PagePool::launch(options(3), browser.clone(), hooks.clone());

        for i in 0..5 {
            pool.queue(Submission::new(
                format!("https://example.com/{}", i),
                bundle(&format!("./case_{}.yaml", i)),
            ))
            .await
            .unwrap();
        }

        pool.on_idle().await;
        assert_eq!(pool.outstanding(), 0);

        let finished = hooks.finished();
        assert_eq!(finished.len(), 5);
        assert!(finished.iter().all(|r| r.case.status == CaseStatus::Pass));
        assert_eq!(browser.opened(), 5);
        assert_eq!(browser.closed(), 5);

        pool.close().await.unwrap();
        assert!(browser.is_shut_down());
    }

    #[tokio::test]
    async fn test_page_open_failure_is_a_case_failure() {
        let hooks = Arc::new(RecordingHooks::default());
        let browser = Arc::new(FakeBrowser::failing_to_open());
        let pool = PagePool::launch(options(1), browser, hooks.clone());

        pool.queue(Submission::new("https://example.com", bundle("./a.yaml")))
            .await
            .unwrap();
        pool.on_idle().await;

        let finished = hooks.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].case.status, CaseStatus::Fail);
        assert_eq!(finished[0].case.project, "undefined");
        assert_eq!(finished[0].case.name, "a");
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_crawl_retries_navigation() {
        let browser = FakeBrowser::default();
        browser.fail_navigations(2);
        let mut page = browser.new_page().await.unwrap();

        let submission = Submission::new("https://example.com/app", bundle("./a.yaml"));
        let helper = CrawlHelper::new(
            &submission,
            &LaunchOptions {
                retry_count: 2,
                ..options(1)
            },
        );
        let response = helper.crawl(page.as_mut()).await.unwrap();
        assert_eq!(response.url, "https://example.com/app");
        assert_eq!(browser.navigations(), 3);

        browser.fail_navigations(5);
        let err = helper.crawl(page.as_mut()).await.unwrap_err();
        assert!(matches!(err, RunRoutineError::Navigation { attempts: 3, .. }));
    }

    #[test]
    fn test_resolve_url() {
        let submission = Submission::new("https://example.com/app/index.html", bundle("./a.yaml"));
        let helper = CrawlHelper::new(&submission, &options(1));
        assert_eq!(helper.resolve_url("/login"), "https://example.com/login");
        assert_eq!(helper.resolve_url("settings"), "https://example.com/app/settings");
        assert_eq!(
            helper.resolve_url("https://other.test/x"),
            "https://other.test/x"
        );
    }
}
