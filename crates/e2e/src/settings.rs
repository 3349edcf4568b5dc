//! Runner settings, read once at startup

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{E2eError, E2eResult};
use crate::playwright::Browser;

/// Top-level settings file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Runner and browser configuration
    pub autotest: AutotestSettings,

    /// Log output configuration
    pub log: LogSettings,
}

/// Runner and browser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutotestSettings {
    /// Default case file or directory when `-c` is not given
    pub cases_dir: PathBuf,

    /// Prefix stripped from discovered paths; case references resolve against it
    pub source_root: PathBuf,

    /// File extensions recognized as case files
    pub case_extensions: Vec<String>,

    /// Node.js binary used to host the Playwright bridge
    pub node_path: PathBuf,

    /// Browser engine
    pub browser: Browser,

    /// Browser executable (None = Playwright's bundled build)
    pub browser_path: Option<PathBuf>,

    pub headless: bool,

    /// Number of page workers, i.e. concurrently running cases
    pub max_concurrency: usize,

    /// Extra navigation attempts when loading a case's entry page
    pub retry_count: usize,

    /// Fixed viewport; None lets the window size decide
    pub viewport: Option<Viewport>,

    pub start_maximized: bool,

    pub temp_profile: bool,

    /// Reject submissions whose URL was already submitted
    pub skip_duplicates: bool,

    /// Where screenshot steps write
    pub artifacts_dir: PathBuf,

    /// Optional JSON run report
    pub results_path: Option<PathBuf>,

    pub navigation: NavigationSettings,
}

impl Default for AutotestSettings {
    fn default() -> Self {
        Self {
            cases_dir: PathBuf::from("cases"),
            source_root: PathBuf::from("."),
            case_extensions: vec!["yaml".to_string(), "yml".to_string(), "json".to_string()],
            node_path: PathBuf::from("node"),
            browser: Browser::Chromium,
            browser_path: None,
            headless: false,
            max_concurrency: 10,
            retry_count: 0,
            viewport: None,
            start_maximized: false,
            temp_profile: false,
            skip_duplicates: false,
            artifacts_dir: PathBuf::from("log/screenshots"),
            results_path: None,
            navigation: NavigationSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// How an entry page is loaded before a case's steps run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationSettings {
    /// Load state to wait for: load, domcontentloaded, networkidle, commit
    pub wait_until: String,

    /// Navigation timeout in milliseconds, 0 = none
    pub timeout_ms: u64,

    /// Fixed delay after the page has loaded
    pub settle_ms: u64,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            wait_until: "networkidle".to_string(),
            timeout_ms: 0,
            settle_ms: 500,
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Log directory, created at startup
    pub dir: PathBuf,

    /// Log file name inside `dir`
    pub file: String,

    /// Default filter when RUST_LOG is unset
    pub level: String,

    /// Write the log file as JSON lines
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("log"),
            file: "autotest.log".to_string(),
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LogSettings {
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(&self.file)
    }
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults when it is absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> E2eResult<Self> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> E2eResult<()> {
        if self.autotest.max_concurrency == 0 {
            return Err(E2eError::Settings(
                "autotest.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.autotest.case_extensions.is_empty() {
            return Err(E2eError::Settings(
                "autotest.case_extensions must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Browser command-line flags derived from the settings
    pub fn browser_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--disable-dev-shm-usage",
            "--no-sandbox",
            "--disable-setuid-sandbox",
            "--disable-gpu",
            "--disable-web-security",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if self.autotest.start_maximized {
            args.push("--start-maximized".to_string());
        }
        if self.autotest.temp_profile {
            args.push("--temp-profile".to_string());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let settings = Settings::load(Path::new("/nonexistent/autotest.toml")).unwrap();
        assert_eq!(settings.autotest.max_concurrency, 10);
        assert_eq!(settings.autotest.retry_count, 0);
        assert!(!settings.autotest.headless);
        assert_eq!(settings.autotest.navigation.settle_ms, 500);
        assert_eq!(settings.log.dir, PathBuf::from("log"));
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
[autotest]
cases_dir = "cases/iot"
max_concurrency = 3
headless = true
browser = "firefox"
viewport = { width = 1920, height = 1080 }
start_maximized = true

[autotest.navigation]
timeout_ms = 30000

[log]
json = true
"#;
        let settings = Settings::from_toml(toml).unwrap();
        assert_eq!(settings.autotest.cases_dir, PathBuf::from("cases/iot"));
        assert_eq!(settings.autotest.max_concurrency, 3);
        assert_eq!(settings.autotest.browser, Browser::Firefox);
        assert_eq!(
            settings.autotest.viewport,
            Some(Viewport { width: 1920, height: 1080 })
        );
        assert_eq!(settings.autotest.navigation.timeout_ms, 30000);
        assert_eq!(settings.autotest.navigation.wait_until, "networkidle");
        assert!(settings.log.json);
        assert!(settings.browser_args().contains(&"--start-maximized".to_string()));
        assert!(!settings.browser_args().contains(&"--temp-profile".to_string()));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = Settings::from_toml("[autotest]\nmax_concurrency = 0\n").unwrap_err();
        assert!(matches!(err, E2eError::Settings(_)));
    }
}
