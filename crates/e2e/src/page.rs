//! Page automation surface consumed by case routines

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::error::PageError;

/// One command sent to a live page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PageCommand {
    Goto {
        url: String,
        wait_until: String,
        timeout_ms: u64,
    },
    Click {
        selector: String,
        timeout_ms: u64,
    },
    Fill {
        selector: String,
        value: String,
    },
    Type {
        selector: String,
        text: String,
        delay_ms: u64,
    },
    Press {
        selector: Option<String>,
        key: String,
    },
    WaitForSelector {
        selector: String,
        state: WaitState,
        timeout_ms: u64,
    },
    WaitForTimeout {
        ms: u64,
    },
    TextContent {
        selector: String,
    },
    IsVisible {
        selector: String,
    },
    Count {
        selector: String,
    },
    GetAttribute {
        selector: String,
        name: String,
    },
    Evaluate {
        script: String,
    },
    Screenshot {
        path: PathBuf,
        selector: Option<String>,
        full_page: bool,
    },
    Hover {
        selector: String,
    },
    Focus {
        selector: String,
    },
    SelectOption {
        selector: String,
        value: String,
    },
    Check {
        selector: String,
    },
    Uncheck {
        selector: String,
    },
    Title,
    Url,
}

impl PageCommand {
    /// Wire name of the operation, used in error messages
    pub fn op(&self) -> &'static str {
        match self {
            PageCommand::Goto { .. } => "goto",
            PageCommand::Click { .. } => "click",
            PageCommand::Fill { .. } => "fill",
            PageCommand::Type { .. } => "type",
            PageCommand::Press { .. } => "press",
            PageCommand::WaitForSelector { .. } => "waitForSelector",
            PageCommand::WaitForTimeout { .. } => "waitForTimeout",
            PageCommand::TextContent { .. } => "textContent",
            PageCommand::IsVisible { .. } => "isVisible",
            PageCommand::Count { .. } => "count",
            PageCommand::GetAttribute { .. } => "getAttribute",
            PageCommand::Evaluate { .. } => "evaluate",
            PageCommand::Screenshot { .. } => "screenshot",
            PageCommand::Hover { .. } => "hover",
            PageCommand::Focus { .. } => "focus",
            PageCommand::SelectOption { .. } => "selectOption",
            PageCommand::Check { .. } => "check",
            PageCommand::Uncheck { .. } => "uncheck",
            PageCommand::Title => "title",
            PageCommand::Url => "url",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

/// A live browser page owned by one worker slot for one submission.
///
/// Implementors only provide [`PageHandle::call`]; the helpers wrap it and
/// decode the returned JSON value.
#[async_trait]
pub trait PageHandle: Send {
    async fn call(&mut self, command: PageCommand) -> Result<Value, PageError>;

    async fn close(&mut self) -> Result<(), PageError>;

    async fn goto(
        &mut self,
        url: &str,
        wait_until: &str,
        timeout_ms: u64,
    ) -> Result<(), PageError> {
        self.call(PageCommand::Goto {
            url: url.to_string(),
            wait_until: wait_until.to_string(),
            timeout_ms,
        })
        .await
        .map(|_| ())
    }

    async fn click(&mut self, selector: &str, timeout_ms: u64) -> Result<(), PageError> {
        self.call(PageCommand::Click {
            selector: selector.to_string(),
            timeout_ms,
        })
        .await
        .map(|_| ())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), PageError> {
        self.call(PageCommand::Fill {
            selector: selector.to_string(),
            value: value.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        state: WaitState,
        timeout_ms: u64,
    ) -> Result<(), PageError> {
        self.call(PageCommand::WaitForSelector {
            selector: selector.to_string(),
            state,
            timeout_ms,
        })
        .await
        .map(|_| ())
    }

    async fn text_content(&mut self, selector: &str) -> Result<Option<String>, PageError> {
        let value = self
            .call(PageCommand::TextContent {
                selector: selector.to_string(),
            })
            .await?;
        optional_string("textContent", value)
    }

    async fn is_visible(&mut self, selector: &str) -> Result<bool, PageError> {
        let value = self
            .call(PageCommand::IsVisible {
                selector: selector.to_string(),
            })
            .await?;
        value.as_bool().ok_or_else(|| unexpected("isVisible", &value))
    }

    async fn count(&mut self, selector: &str) -> Result<usize, PageError> {
        let value = self
            .call(PageCommand::Count {
                selector: selector.to_string(),
            })
            .await?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| unexpected("count", &value))
    }

    async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>, PageError> {
        let value = self
            .call(PageCommand::GetAttribute {
                selector: selector.to_string(),
                name: name.to_string(),
            })
            .await?;
        optional_string("getAttribute", value)
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, PageError> {
        self.call(PageCommand::Evaluate {
            script: script.to_string(),
        })
        .await
    }

    async fn title(&mut self) -> Result<Option<String>, PageError> {
        let value = self.call(PageCommand::Title).await?;
        optional_string("title", value)
    }

    async fn url(&mut self) -> Result<Option<String>, PageError> {
        let value = self.call(PageCommand::Url).await?;
        optional_string("url", value)
    }
}

/// Opens pages for the engine's worker slots
#[async_trait]
pub trait PageFactory: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>, PageError>;

    /// Release the underlying browser. Called once by the engine on close.
    async fn shutdown(&self) -> Result<(), PageError>;
}

fn optional_string(op: &str, value: Value) -> Result<Option<String>, PageError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(unexpected(op, &other)),
    }
}

fn unexpected(op: &str, value: &Value) -> PageError {
    PageError::UnexpectedValue {
        op: op.to_string(),
        value: value.to_string(),
    }
}
