//! Declarative step scripts, the run routine of file-based cases

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::case::CaseRoutine;
use crate::engine::{CrawlHelper, Submission};
use crate::env;
use crate::error::RunRoutineError;
use crate::page::{PageCommand, PageHandle, WaitState};

/// A single step in a case script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a URL (relative to the entry URL)
    Navigate {
        url: String,
        #[serde(default)]
        wait_for_selector: Option<String>,
    },

    Click {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    Fill {
        selector: String,
        value: String,
        #[serde(default)]
        clear_first: bool,
    },

    /// Type text with keyboard simulation
    Type {
        selector: String,
        text: String,
        #[serde(default)]
        delay_ms: Option<u64>,
    },

    Press {
        #[serde(default)]
        selector: Option<String>,
        key: String,
    },

    Wait {
        selector: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        state: WaitState,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Sleep {
        ms: u64,
    },

    Assert {
        selector: String,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        text_contains: Option<String>,
        #[serde(default)]
        attribute: Option<AttributeAssertion>,
        #[serde(default)]
        count: Option<usize>,
    },

    Screenshot {
        name: String,
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        full_page: bool,
    },

    Hover {
        selector: String,
    },

    Focus {
        selector: String,
    },

    Select {
        selector: String,
        value: String,
    },

    Check {
        selector: String,
    },

    Uncheck {
        selector: String,
    },

    /// Evaluate a JavaScript expression in the page
    Evaluate {
        script: String,
        #[serde(default)]
        expected: Option<Value>,
    },

    Log {
        message: String,
    },
}

fn default_wait_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeAssertion {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub contains: Option<String>,
}

impl Step {
    /// Short label used in logs and failure messages
    pub fn name(&self) -> String {
        match self {
            Step::Navigate { url, .. } => format!("navigate:{}", url),
            Step::Click { selector, .. } => format!("click:{}", selector),
            Step::Fill { selector, .. } => format!("fill:{}", selector),
            Step::Type { selector, .. } => format!("type:{}", selector),
            Step::Press { key, .. } => format!("press:{}", key),
            Step::Wait { selector, .. } => format!("wait:{}", selector),
            Step::Sleep { ms } => format!("sleep:{}ms", ms),
            Step::Assert { selector, .. } => format!("assert:{}", selector),
            Step::Screenshot { name, .. } => format!("screenshot:{}", name),
            Step::Hover { selector } => format!("hover:{}", selector),
            Step::Focus { selector } => format!("focus:{}", selector),
            Step::Select { selector, .. } => format!("select:{}", selector),
            Step::Check { selector } => format!("check:{}", selector),
            Step::Uncheck { selector } => format!("uncheck:{}", selector),
            Step::Evaluate { .. } => "evaluate".to_string(),
            Step::Log { message } => {
                format!("log:{}", message.chars().take(30).collect::<String>())
            }
        }
    }
}

/// Runs a case's steps in order against its entry page
#[derive(Debug, Clone, Default)]
pub struct ScriptRoutine {
    steps: Vec<Step>,
}

impl ScriptRoutine {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    async fn execute_step(
        &self,
        page: &mut dyn PageHandle,
        crawl: &CrawlHelper,
        step: &Step,
    ) -> Result<(), RunRoutineError> {
        match step {
            Step::Navigate { url, wait_for_selector } => {
                let target = crawl.resolve_url(&env::expand(url)?);
                let nav = crawl.navigation();
                page.goto(&target, &nav.wait_until, nav.timeout_ms).await?;
                if let Some(selector) = wait_for_selector {
                    page.wait_for_selector(selector, WaitState::Visible, default_wait_timeout())
                        .await?;
                }
            }
            Step::Click { selector, timeout_ms } => {
                page.click(selector, timeout_ms.unwrap_or(5000)).await?;
            }
            Step::Fill { selector, value, clear_first } => {
                let value = env::expand(value)?;
                if *clear_first {
                    page.fill(selector, "").await?;
                }
                page.fill(selector, &value).await?;
            }
            Step::Type { selector, text, delay_ms } => {
                page.call(PageCommand::Type {
                    selector: selector.clone(),
                    text: env::expand(text)?,
                    delay_ms: delay_ms.unwrap_or(50),
                })
                .await?;
            }
            Step::Press { selector, key } => {
                page.call(PageCommand::Press {
                    selector: selector.clone(),
                    key: key.clone(),
                })
                .await?;
            }
            Step::Wait { selector, timeout_ms, state } => {
                page.wait_for_selector(selector, *state, *timeout_ms).await?;
            }
            Step::Sleep { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            Step::Assert { selector, visible, text, text_contains, attribute, count } => {
                check_assertions(
                    page,
                    selector,
                    *visible,
                    text.as_deref(),
                    text_contains.as_deref(),
                    attribute.as_ref(),
                    *count,
                )
                .await?;
            }
            Step::Screenshot { name, selector, full_page } => {
                let path = crawl.screenshot_path(name).map_err(|e| RunRoutineError::StepFailed {
                    step: step.name(),
                    reason: e.to_string(),
                })?;
                page.call(PageCommand::Screenshot {
                    path,
                    selector: selector.clone(),
                    full_page: *full_page,
                })
                .await?;
            }
            Step::Hover { selector } => {
                page.call(PageCommand::Hover { selector: selector.clone() }).await?;
            }
            Step::Focus { selector } => {
                page.call(PageCommand::Focus { selector: selector.clone() }).await?;
            }
            Step::Select { selector, value } => {
                page.call(PageCommand::SelectOption {
                    selector: selector.clone(),
                    value: value.clone(),
                })
                .await?;
            }
            Step::Check { selector } => {
                page.call(PageCommand::Check { selector: selector.clone() }).await?;
            }
            Step::Uncheck { selector } => {
                page.call(PageCommand::Uncheck { selector: selector.clone() }).await?;
            }
            Step::Evaluate { script, expected } => {
                let actual = page.evaluate(script).await?;
                if let Some(expected) = expected {
                    if &actual != expected {
                        return Err(RunRoutineError::AssertionFailed(format!(
                            "evaluate returned {} (expected {})",
                            actual, expected
                        )));
                    }
                }
            }
            Step::Log { message } => {
                info!("[CASE LOG] {}", message);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CaseRoutine for ScriptRoutine {
    async fn run(
        &self,
        page: &mut dyn PageHandle,
        crawl: &CrawlHelper,
        _submission: &Submission,
    ) -> Result<Value, RunRoutineError> {
        let response = crawl.crawl(page).await?;
        let mut completed = 0;

        for step in &self.steps {
            let start = Instant::now();
            let step_name = step.name();
            debug!("Executing step: {}", step_name);

            match self.execute_step(page, crawl, step).await {
                Ok(()) => {
                    completed += 1;
                    debug!("Step {} done ({} ms)", step_name, start.elapsed().as_millis());
                }
                Err(RunRoutineError::Page(e)) => {
                    return Err(RunRoutineError::StepFailed {
                        step: step_name,
                        reason: e.to_string(),
                    });
                }
                Err(RunRoutineError::Env(e)) => {
                    return Err(RunRoutineError::StepFailed {
                        step: step_name,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(json!({
            "url": response.url,
            "title": response.title,
            "steps": completed,
        }))
    }
}

async fn check_assertions(
    page: &mut dyn PageHandle,
    selector: &str,
    visible: Option<bool>,
    text: Option<&str>,
    text_contains: Option<&str>,
    attribute: Option<&AttributeAssertion>,
    count: Option<usize>,
) -> Result<(), RunRoutineError> {
    if let Some(expected) = visible {
        let actual = page.is_visible(selector).await?;
        if actual != expected {
            return Err(RunRoutineError::AssertionFailed(format!(
                "{} visible={} (expected {})",
                selector, actual, expected
            )));
        }
    }

    if text.is_some() || text_contains.is_some() {
        let actual = page.text_content(selector).await?.unwrap_or_default();
        if let Some(expected) = text {
            if actual.trim() != expected {
                return Err(RunRoutineError::AssertionFailed(format!(
                    "{} text '{}' (expected '{}')",
                    selector,
                    actual.trim(),
                    expected
                )));
            }
        }
        if let Some(needle) = text_contains {
            if !actual.contains(needle) {
                return Err(RunRoutineError::AssertionFailed(format!(
                    "{} text '{}' does not contain '{}'",
                    selector,
                    actual.trim(),
                    needle
                )));
            }
        }
    }

    if let Some(attr) = attribute {
        let actual = page.attribute(selector, &attr.name).await?;
        let Some(actual) = actual else {
            return Err(RunRoutineError::AssertionFailed(format!(
                "{} has no attribute '{}'",
                selector, attr.name
            )));
        };
        if let Some(expected) = &attr.value {
            if &actual != expected {
                return Err(RunRoutineError::AssertionFailed(format!(
                    "{}[{}]='{}' (expected '{}')",
                    selector, attr.name, actual, expected
                )));
            }
        }
        if let Some(needle) = &attr.contains {
            if !actual.contains(needle.as_str()) {
                return Err(RunRoutineError::AssertionFailed(format!(
                    "{}[{}]='{}' does not contain '{}'",
                    selector, attr.name, actual, needle
                )));
            }
        }
    }

    if let Some(expected) = count {
        let actual = page.count(selector).await?;
        if actual != expected {
            return Err(RunRoutineError::AssertionFailed(format!(
                "{} matched {} element(s) (expected {})",
                selector, actual, expected
            )));
        }
    }

    Ok(())
}
