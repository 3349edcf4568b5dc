//! Test runner that wires discovery, loading, the engine and dispatch together

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::case::CaseReference;
use crate::discovery::{discover, DiscoveryOptions};
use crate::dispatcher::{CaseHooks, Dispatcher};
use crate::engine::{LaunchOptions, PagePool};
use crate::error::E2eResult;
use crate::loader::{CaseLoader, CaseResolver, FileResolver};
use crate::page::PageFactory;
use crate::playwright::{PlaywrightBrowser, PlaywrightConfig};
use crate::registry::Registry;
use crate::reporter::RunSummary;
use crate::settings::Settings;

/// Configuration for the test runner
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    pub discovery: DiscoveryOptions,
    pub launch: LaunchOptions,
    pub playwright: PlaywrightConfig,
    pub results_path: Option<PathBuf>,
}

impl RunnerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            discovery: DiscoveryOptions::from_settings(settings),
            launch: LaunchOptions::from_settings(settings),
            playwright: PlaywrightConfig::from_settings(settings),
            results_path: settings.autotest.results_path.clone(),
        }
    }
}

/// Runs every case under a path
pub struct TestRunner {
    config: RunnerConfig,
    resolver: Arc<dyn CaseResolver>,
}

impl TestRunner {
    /// Create a runner that loads case files from the configured source root
    pub fn with_config(config: RunnerConfig) -> Self {
        let resolver = Arc::new(FileResolver::new(config.discovery.source_root.clone()));
        Self { config, resolver }
    }

    /// Load cases through a different resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn CaseResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn discover(&self, case_path: &Path) -> E2eResult<Vec<CaseReference>> {
        Ok(discover(case_path, &self.config.discovery)?)
    }

    /// Discover the cases under `case_path` and run them in Playwright
    pub async fn run(&self, case_path: &Path) -> E2eResult<RunSummary> {
        debug!("Test target(s): {}", case_path.display());
        let references = self.discover(case_path)?;

        let browser = PlaywrightBrowser::launch(self.config.playwright.clone()).await?;
        self.run_with(references, Arc::new(browser)).await
    }

    /// Run the given references on pages from `factory`
    pub async fn run_with(
        &self,
        references: Vec<CaseReference>,
        factory: Arc<dyn PageFactory>,
    ) -> E2eResult<RunSummary> {
        info!("Running {} case(s)...", references.len());

        let (hooks, settled) = CaseHooks::channel();
        let engine = PagePool::launch(self.config.launch.clone(), factory, Arc::new(hooks));

        let dispatcher = Dispatcher::new(
            Registry::new(references),
            CaseLoader::new(self.resolver.clone()),
            Arc::new(engine),
            settled,
        );
        let summary = dispatcher.run().await?;

        if let Some(path) = &self.config.results_path {
            summary.write_json(path)?;
        }
        Ok(summary)
    }
}
