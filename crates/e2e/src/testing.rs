//! In-memory browser and hooks for exercising the engine without Playwright

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::case::CaseRoutine;
use crate::engine::{CrawlHelper, CrawlHooks, Submission, SubmissionResult};
use crate::error::{PageError, RunRoutineError};
use crate::page::{PageCommand, PageFactory, PageHandle};

#[derive(Default)]
struct FakeState {
    fail_open: bool,
    opened: AtomicUsize,
    closed: AtomicUsize,
    navigations: AtomicUsize,
    failing_navigations: AtomicUsize,
    shut_down: AtomicBool,
    responses: Mutex<HashMap<&'static str, Value>>,
    commands: Mutex<Vec<PageCommand>>,
}

/// A [`PageFactory`] whose pages answer from canned responses
#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<FakeState>,
}

impl FakeBrowser {
    /// A browser whose `new_page` always fails
    pub fn failing_to_open() -> Self {
        Self {
            state: Arc::new(FakeState {
                fail_open: true,
                ..Default::default()
            }),
        }
    }

    /// Make the next `n` navigations fail
    pub fn fail_navigations(&self, n: usize) {
        self.state.failing_navigations.store(n, Ordering::SeqCst);
    }

    /// Answer every command with the given op name with `value`
    pub fn respond(&self, op: &'static str, value: Value) {
        self.state.responses.lock().insert(op, value);
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> usize {
        self.state.navigations.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.shut_down.load(Ordering::SeqCst)
    }

    /// Every command received by any page, in arrival order
    pub fn commands(&self) -> Vec<PageCommand> {
        self.state.commands.lock().clone()
    }
}

#[async_trait]
impl PageFactory for FakeBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>, PageError> {
        if self.state.fail_open {
            return Err(PageError::Open("fake browser refuses pages".to_string()));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            state: self.state.clone(),
            url: "about:blank".to_string(),
        }))
    }

    async fn shutdown(&self) -> Result<(), PageError> {
        self.state.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakePage {
    state: Arc<FakeState>,
    url: String,
}

#[async_trait]
impl PageHandle for FakePage {
    async fn call(&mut self, command: PageCommand) -> Result<Value, PageError> {
        let op = command.op();
        self.state.commands.lock().push(command.clone());

        if let PageCommand::Goto { url, .. } = &command {
            self.state.navigations.fetch_add(1, Ordering::SeqCst);
            let failing = self.state.failing_navigations.load(Ordering::SeqCst);
            if failing > 0 {
                self.state.failing_navigations.store(failing - 1, Ordering::SeqCst);
                return Err(PageError::Command {
                    op: op.to_string(),
                    message: "net::ERR_CONNECTION_REFUSED".to_string(),
                });
            }
            self.url = url.clone();
        }

        if let Some(value) = self.state.responses.lock().get(op) {
            return Ok(value.clone());
        }

        Ok(match command {
            PageCommand::Url => Value::String(self.url.clone()),
            PageCommand::IsVisible { .. } => Value::Bool(true),
            PageCommand::Count { .. } => Value::from(1),
            _ => Value::Null,
        })
    }

    async fn close(&mut self) -> Result<(), PageError> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hooks that run the case routine and keep every finished result
#[derive(Default)]
pub struct RecordingHooks {
    finished: Mutex<Vec<SubmissionResult>>,
}

impl RecordingHooks {
    pub fn finished(&self) -> Vec<SubmissionResult> {
        self.finished.lock().clone()
    }
}

#[async_trait]
impl CrawlHooks for RecordingHooks {
    async fn custom_crawl(
        &self,
        page: &mut dyn PageHandle,
        crawl: &CrawlHelper,
        submission: &Submission,
    ) -> Result<Value, RunRoutineError> {
        submission.case.run.run(page, crawl, submission).await
    }

    fn on_finish(&self, result: SubmissionResult) {
        self.finished.lock().push(result);
    }
}

/// Routine that passes without touching the page
pub struct NoopRoutine;

#[async_trait]
impl CaseRoutine for NoopRoutine {
    async fn run(
        &self,
        _page: &mut dyn PageHandle,
        _crawl: &CrawlHelper,
        _submission: &Submission,
    ) -> Result<Value, RunRoutineError> {
        Ok(Value::Null)
    }
}
