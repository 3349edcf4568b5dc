//! YAML/JSON cases loaded from disk and run through the full runner

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use autotest_e2e::case::CaseStatus;
use autotest_e2e::page::PageCommand;
use autotest_e2e::reporter::RunSummary;
use autotest_e2e::settings::NavigationSettings;
use autotest_e2e::testing::FakeBrowser;
use autotest_e2e::{RunnerConfig, TestRunner};

const CHECKOUT: &str = r##"
config:
  project: shop
  name: checkout
  entries:
    - url: https://shop.example.com/cart
  log_options:
    label: smoke
run:
  - action: click
    selector: "#checkout"
  - action: fill
    selector: "input[name=email]"
    value: buyer@example.com
  - action: navigate
    url: /confirm
  - action: assert
    selector: ".banner"
    visible: true
    text_contains: Thanks
"##;

const ABOUT: &str = r#"{
  "config": {
    "project": "site",
    "entries": [{ "url": "https://example.com/about" }]
  },
  "run": [
    { "action": "assert", "selector": "h1", "count": 1 }
  ]
}"#;

const NO_URL: &str = r##"
config:
  project: shop
  name: broken
  entries: []
run:
  - action: click
    selector: "#never"
"##;

const NO_RUN: &str = r#"
config:
  project: shop
  entries:
    - url: https://shop.example.com/
"#;

const LOGIN: &str = r##"
config:
  project: shop
  name: login
  entries:
    - url: https://${AUTOTEST_FILE_CASES_HOST}/login
run:
  - action: fill
    selector: "#user"
    value: ${AUTOTEST_FILE_CASES_USER}
  - action: fill
    selector: "#password"
    value: ${AUTOTEST_FILE_CASES_PASSWORD}
"##;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn runner(root: &Path, max_concurrency: usize) -> TestRunner {
    let mut config = RunnerConfig::default();
    config.discovery.source_root = root.to_path_buf();
    config.launch.max_concurrency = max_concurrency;
    config.launch.navigation = NavigationSettings {
        settle_ms: 0,
        ..Default::default()
    };
    config.launch.artifacts_dir = root.join("artifacts");
    TestRunner::with_config(config)
}

async fn run_dir(root: &Path, browser: &FakeBrowser) -> RunSummary {
    let runner = runner(root, 2);
    let references = runner.discover(root).unwrap();
    runner
        .run_with(references, Arc::new(browser.clone()))
        .await
        .unwrap()
}

fn record<'a>(summary: &'a RunSummary, name: &str) -> &'a autotest_e2e::reporter::CaseRecord {
    summary
        .records
        .iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no record named {}", name))
}

#[tokio::test]
async fn script_cases_run_their_steps() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "shop/checkout.yaml", CHECKOUT);
    write(dir.path(), "site/about.json", ABOUT);

    let browser = FakeBrowser::default();
    browser.respond("textContent", json!("Thanks for your order"));

    let summary = run_dir(dir.path(), &browser).await;

    assert_eq!(summary.total, 2);
    assert_eq!(summary.passed, 2, "{:?}", summary.records);

    let checkout = record(&summary, "checkout");
    assert_eq!(checkout.project, "shop");
    assert_eq!(checkout.reference.as_str(), "./shop/checkout.yaml");

    // Unnamed cases fall back to the file's base name.
    let about = record(&summary, "about");
    assert_eq!(about.project, "site");

    let gotos: Vec<String> = browser
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            PageCommand::Goto { url, .. } => Some(url),
            _ => None,
        })
        .collect();
    assert!(gotos.contains(&"https://shop.example.com/cart".to_string()));
    assert!(gotos.contains(&"https://shop.example.com/confirm".to_string()));
    assert!(gotos.contains(&"https://example.com/about".to_string()));
}

#[tokio::test]
async fn failed_assertion_marks_case_failed() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "shop/checkout.yaml", CHECKOUT);

    let browser = FakeBrowser::default();
    browser.respond("textContent", json!("Something went wrong"));

    let summary = run_dir(dir.path(), &browser).await;

    assert_eq!(summary.failed, 1);
    let checkout = record(&summary, "checkout");
    assert_eq!(checkout.status, CaseStatus::Fail);
    assert!(checkout.error.as_deref().unwrap().contains("does not contain 'Thanks'"));
}

#[tokio::test]
async fn malformed_files_fail_without_opening_pages() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "bad/no_url.yaml", NO_URL);
    write(dir.path(), "bad/no_run.yaml", NO_RUN);
    write(dir.path(), "bad/garbage.yaml", "config: [unterminated");

    let browser = FakeBrowser::default();
    let summary = run_dir(dir.path(), &browser).await;

    assert_eq!(summary.total, 3);
    assert_eq!(summary.failed, 3);
    assert_eq!(browser.opened(), 0);

    for name in ["no_url", "no_run", "garbage"] {
        let record = record(&summary, name);
        assert_eq!(record.project, "undefined");
    }
    assert!(record(&summary, "no_url")
        .error
        .as_deref()
        .unwrap()
        .contains("missing entry url"));
    assert!(record(&summary, "no_run")
        .error
        .as_deref()
        .unwrap()
        .contains("missing run routine"));
}

#[tokio::test]
async fn results_file_is_written_when_configured() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "site/about.json", ABOUT);

    let mut config = RunnerConfig::default();
    config.discovery.source_root = dir.path().to_path_buf();
    config.launch.navigation.settle_ms = 0;
    config.results_path = Some(dir.path().join("out/results.json"));
    let runner = TestRunner::with_config(config);

    let references = runner.discover(dir.path()).unwrap();
    runner
        .run_with(references, Arc::new(FakeBrowser::default()))
        .await
        .unwrap();

    let written: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("out/results.json")).unwrap())
            .unwrap();
    assert_eq!(written["total"], 1);
    assert_eq!(written["records"][0]["status"], "PASS");
}

#[tokio::test]
async fn browser_that_cannot_open_pages_fails_every_case() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "shop/checkout.yaml", CHECKOUT);
    write(dir.path(), "site/about.json", ABOUT);

    let summary = run_dir(dir.path(), &FakeBrowser::failing_to_open()).await;

    assert_eq!(summary.total, 2);
    assert_eq!(summary.failed, 2);
    assert!(summary
        .records
        .iter()
        .all(|r| r.error.as_deref().unwrap().contains("failed to open page")));
}

#[tokio::test]
async fn environment_values_fill_case_placeholders() {
    std::env::set_var("AUTOTEST_FILE_CASES_HOST", "shop.example.com");
    std::env::set_var("AUTOTEST_FILE_CASES_USER", "buyer");

    let dir = TempDir::new().unwrap();
    write(dir.path(), "shop/login.yaml", LOGIN);

    // The password is never set, so the second fill fails the case.
    let browser = FakeBrowser::default();
    let summary = run_dir(dir.path(), &browser).await;

    assert_eq!(summary.failed, 1);
    let login = record(&summary, "login");
    assert_eq!(login.project, "shop");
    let error = login.error.as_deref().unwrap();
    assert!(error.contains("fill:#password"), "{}", error);
    assert!(error.contains("AUTOTEST_FILE_CASES_PASSWORD"), "{}", error);

    let commands = browser.commands();
    assert!(commands.iter().any(|c| matches!(
        c,
        PageCommand::Goto { url, .. } if url == "https://shop.example.com/login"
    )));
    assert!(commands.iter().any(|c| matches!(
        c,
        PageCommand::Fill { value, .. } if value == "buyer"
    )));
}
