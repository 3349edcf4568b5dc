//! Playwright browser automation
//!
//! A single `node` process hosts the browser. Rust talks to it over
//! line-delimited JSON on stdin/stdout: every request carries an id, the
//! bridge answers with `{ id, ok, value, error }`. Id 0 is the readiness
//! message sent once the browser has launched.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult, PageError};
use crate::page::{PageCommand, PageFactory, PageHandle};
use crate::settings::{Settings, Viewport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for launching the Playwright bridge
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub node_path: PathBuf,
    pub browser: Browser,
    pub executable_path: Option<PathBuf>,
    pub headless: bool,
    pub viewport: Option<Viewport>,
    pub args: Vec<String>,
    pub launch_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node_path: PathBuf::from("node"),
            browser: Browser::Chromium,
            executable_path: None,
            headless: true,
            viewport: None,
            args: Vec::new(),
            launch_timeout: Duration::from_secs(60),
        }
    }
}

impl PlaywrightConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let autotest = &settings.autotest;
        Self {
            node_path: autotest.node_path.clone(),
            browser: autotest.browser,
            executable_path: autotest.browser_path.clone(),
            headless: autotest.headless,
            viewport: autotest.viewport,
            args: settings.browser_args(),
            ..Default::default()
        }
    }

    /// Options object handed to the bridge through the environment
    fn launch_options(&self) -> Value {
        json!({
            "browser": self.browser.as_str(),
            "headless": self.headless,
            "executablePath": self
                .executable_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            "viewport": self.viewport.map(|v| json!({ "width": v.width, "height": v.height })),
            "args": self.args,
        })
    }
}

const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
const playwright = require('playwright');

const opts = JSON.parse(process.env.AUTOTEST_LAUNCH || '{}');
const send = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');
const reply = (id, ok, value, error) =>
  send({ id, ok, value: value === undefined ? null : value, error: error || null });

(async () => {
  const browser = await playwright[opts.browser || 'chromium'].launch({
    headless: !!opts.headless,
    executablePath: opts.executablePath || undefined,
    args: opts.args || [],
  });
  const pages = new Map();
  let nextPage = 1;

  const handlers = {
    newPage: async () => {
      const context = await browser.newContext({
        viewport: opts.viewport || null,
        ignoreHTTPSErrors: true,
      });
      const page = await context.newPage();
      const id = nextPage++;
      pages.set(id, page);
      return id;
    },
    closePage: async (page, c, id) => {
      pages.delete(id);
      await page.context().close();
      return null;
    },
    goto: async (page, c) => {
      await page.goto(c.url, { waitUntil: c.wait_until, timeout: c.timeout_ms });
      return null;
    },
    click: async (page, c) => { await page.click(c.selector, { timeout: c.timeout_ms }); return null; },
    fill: async (page, c) => { await page.fill(c.selector, c.value); return null; },
    type: async (page, c) => { await page.type(c.selector, c.text, { delay: c.delay_ms }); return null; },
    press: async (page, c) => {
      if (c.selector) await page.locator(c.selector).press(c.key);
      else await page.keyboard.press(c.key);
      return null;
    },
    waitForSelector: async (page, c) => {
      await page.waitForSelector(c.selector, { state: c.state, timeout: c.timeout_ms });
      return null;
    },
    waitForTimeout: async (page, c) => { await page.waitForTimeout(c.ms); return null; },
    textContent: (page, c) => page.locator(c.selector).first().textContent(),
    isVisible: (page, c) => page.locator(c.selector).first().isVisible(),
    count: (page, c) => page.locator(c.selector).count(),
    getAttribute: (page, c) => page.locator(c.selector).first().getAttribute(c.name),
    evaluate: (page, c) => page.evaluate(c.script),
    screenshot: async (page, c) => {
      if (c.selector) await page.locator(c.selector).screenshot({ path: c.path });
      else await page.screenshot({ path: c.path, fullPage: c.full_page });
      return c.path;
    },
    hover: async (page, c) => { await page.hover(c.selector); return null; },
    focus: async (page, c) => { await page.focus(c.selector); return null; },
    selectOption: async (page, c) => { await page.selectOption(c.selector, c.value); return null; },
    check: async (page, c) => { await page.check(c.selector); return null; },
    uncheck: async (page, c) => { await page.uncheck(c.selector); return null; },
    title: (page) => page.title(),
    url: (page) => page.url(),
  };

  const rl = readline.createInterface({ input: process.stdin });
  rl.on('line', async (line) => {
    let msg;
    try { msg = JSON.parse(line); } catch (e) { return; }
    const { id, page: pageId, command } = msg;
    try {
      if (command.op === 'shutdown') {
        await browser.close();
        reply(id, true, null);
        process.exit(0);
      }
      const handler = handlers[command.op];
      if (!handler) throw new Error(`unknown op ${command.op}`);
      const page = pages.get(pageId);
      if (command.op !== 'newPage' && !page) throw new Error(`no such page ${pageId}`);
      reply(id, true, await handler(page, command, pageId));
    } catch (e) {
      reply(id, false, null, String((e && e.message) || e));
    }
  });
  rl.on('close', async () => {
    await browser.close();
    process.exit(0);
  });

  reply(0, true, 'ready');
})().catch((e) => {
  reply(0, false, null, String((e && e.stack) || e));
  process.exit(1);
});
"#;

#[derive(Debug, Deserialize)]
struct BridgeReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeReply>>>>;

/// The running bridge process
struct Bridge {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    pending: Pending,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Bridge {
    async fn request(&self, page: u64, command: Value) -> Result<Value, PageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PageError::Disconnected);
        }

        let op = command["op"].as_str().unwrap_or("unknown").to_string();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let mut line = json!({ "id": id, "page": page, "command": command }).to_string();
        line.push('\n');

        let write = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = write {
            self.pending.lock().remove(&id);
            debug!("Bridge write failed: {}", e);
            return Err(PageError::Disconnected);
        }

        let reply = rx.await.map_err(|_| PageError::Disconnected)?;
        if reply.ok {
            Ok(reply.value)
        } else {
            Err(PageError::Command {
                op,
                message: reply.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

/// Playwright-hosted browser; hands out one isolated context per page
pub struct PlaywrightBrowser {
    bridge: Arc<Bridge>,
}

impl PlaywrightBrowser {
    /// Spawn the bridge and wait for the browser to come up
    pub async fn launch(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed(&config).await?;

        info!(
            "Launching {} (headless: {})",
            config.browser.as_str(),
            config.headless
        );

        let mut child = Command::new(&config.node_path)
            .arg("-e")
            .arg(BRIDGE_SCRIPT)
            .env("AUTOTEST_LAUNCH", config.launch_options().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                E2eError::BrowserLaunch(format!(
                    "failed to spawn {}: {}",
                    config.node_path.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            E2eError::BrowserLaunch("bridge stdin unavailable".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            E2eError::BrowserLaunch("bridge stdout unavailable".to_string())
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "autotest::browser", "{}", line);
                }
            });
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (ready_tx, ready_rx) = oneshot::channel();
        pending.lock().insert(0, ready_tx);

        let reader_pending = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<BridgeReply>(&line) {
                    Ok(reply) => {
                        if let Some(tx) = reader_pending.lock().remove(&reply.id) {
                            let _ = tx.send(reply);
                        }
                    }
                    Err(_) => debug!(target: "autotest::browser", "{}", line),
                }
            }
            // Dropping the senders fails every outstanding request.
            reader_pending.lock().clear();
        });

        let ready = tokio::time::timeout(config.launch_timeout, ready_rx)
            .await
            .map_err(|_| E2eError::BrowserLaunch("timed out waiting for browser".to_string()))?
            .map_err(|_| E2eError::BrowserLaunch("bridge exited during launch".to_string()))?;

        if !ready.ok {
            return Err(E2eError::BrowserLaunch(
                ready.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        info!("Browser ready");

        Ok(Self {
            bridge: Arc::new(Bridge {
                stdin: tokio::sync::Mutex::new(stdin),
                child: tokio::sync::Mutex::new(child),
                pending,
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Check that node can resolve the playwright package
    async fn check_playwright_installed(config: &PlaywrightConfig) -> E2eResult<()> {
        let status = Command::new(&config.node_path)
            .args(["-e", "require.resolve('playwright')"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }
}

#[async_trait]
impl PageFactory for PlaywrightBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>, PageError> {
        let value = self
            .bridge
            .request(0, json!({ "op": "newPage" }))
            .await
            .map_err(|e| PageError::Open(e.to_string()))?;
        let id = value.as_u64().ok_or_else(|| PageError::UnexpectedValue {
            op: "newPage".to_string(),
            value: value.to_string(),
        })?;

        Ok(Box::new(PlaywrightPage {
            bridge: self.bridge.clone(),
            id,
            closed: false,
        }))
    }

    async fn shutdown(&self) -> Result<(), PageError> {
        let graceful = tokio::time::timeout(
            Duration::from_secs(10),
            self.bridge.request(0, json!({ "op": "shutdown" })),
        )
        .await;
        self.bridge.closed.store(true, Ordering::SeqCst);

        let mut child = self.bridge.child.lock().await;
        if !matches!(graceful, Ok(Ok(_))) {
            warn!("Browser did not shut down cleanly, terminating bridge");

            #[cfg(unix)]
            {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                if let Some(pid) = child.id() {
                    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }

            let _ = child.kill().await;
        }
        let _ = child.wait().await;

        info!("Browser closed");
        Ok(())
    }
}

/// One browser context + page living inside the bridge
pub struct PlaywrightPage {
    bridge: Arc<Bridge>,
    id: u64,
    closed: bool,
}

#[async_trait]
impl PageHandle for PlaywrightPage {
    async fn call(&mut self, command: PageCommand) -> Result<Value, PageError> {
        let op = command.op();
        let payload = serde_json::to_value(&command).map_err(|e| PageError::Command {
            op: op.to_string(),
            message: e.to_string(),
        })?;
        self.bridge.request(self.id, payload).await
    }

    async fn close(&mut self) -> Result<(), PageError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.bridge
            .request(self.id, json!({ "op": "closePage" }))
            .await
            .map(|_| ())
    }
}
