//! autotest E2E runner
//!
//! Discovers case files, feeds their entry URLs into a pool of browser
//! page workers and runs each case's steps against its loaded page:
//! - Discovers cases from a file or directory tree
//! - Loads each case lazily as its turn comes up
//! - Keeps at most N cases in flight, refilling a slot as soon as a case settles
//! - Drives Playwright through a long-lived node bridge
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   autotest runner (Rust)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  discover(path) -> Registry [CaseReference, ...]            │
//! │                                                             │
//! │  Dispatcher                                                 │
//! │    ├── replenish(n): pop → CaseLoader::load → engine.queue  │
//! │    ├── on_case_settled(result): report → replenish(1)       │
//! │    └── run(): fill, drain settlements, on_idle, close       │
//! │                                                             │
//! │  PagePool (CrawlEngine)                                     │
//! │    └── N workers: new_page → custom_crawl → on_finish       │
//! │                                                             │
//! │  Reporter                                                   │
//! │    └── project: <p>, test case: <n>, test status: <S>       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod case;
pub mod discovery;
pub mod dispatcher;
pub mod engine;
pub mod env;
pub mod error;
pub mod loader;
pub mod page;
pub mod playwright;
pub mod registry;
pub mod reporter;
pub mod runner;
pub mod script;
pub mod settings;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use case::{CaseBundle, CaseConfig, CaseReference, CaseRoutine, CaseStatus};
pub use dispatcher::Dispatcher;
pub use engine::{CrawlEngine, PagePool, Submission, SubmissionResult};
pub use error::{E2eError, E2eResult};
pub use reporter::RunSummary;
pub use runner::{RunnerConfig, TestRunner};
pub use settings::Settings;
