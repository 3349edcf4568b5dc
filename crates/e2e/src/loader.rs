//! Case loading: resolve a reference, then validate what came back

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::case::{CaseBundle, CaseConfig, CaseIdentity, CaseReference, CaseRoutine};
use crate::env;
use crate::error::{CaseError, LoadError};
use crate::script::{ScriptRoutine, Step};

/// A resolved but unvalidated case: either half may be missing
#[derive(Default)]
pub struct CaseModule {
    pub config: Option<CaseConfig>,
    pub run: Option<Arc<dyn CaseRoutine>>,
}

/// Turns a reference into a case module
#[async_trait]
pub trait CaseResolver: Send + Sync {
    async fn resolve(&self, reference: &CaseReference) -> Result<CaseModule, LoadError>;
}

/// On-disk shape of a case file
#[derive(Debug, Deserialize)]
struct CaseFile {
    #[serde(default)]
    config: Option<CaseConfig>,
    #[serde(default)]
    run: Option<Vec<Step>>,
}

/// Reads YAML/JSON case files relative to a resolution root
#[derive(Debug, Clone)]
pub struct FileResolver {
    root: PathBuf,
}

impl FileResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem path a reference points at
    pub fn path_of(&self, reference: &CaseReference) -> PathBuf {
        let locator = reference.as_str();
        let relative = locator.strip_prefix("./").unwrap_or(locator);
        if Path::new(relative).is_absolute() {
            PathBuf::from(relative)
        } else {
            self.root.join(relative)
        }
    }

    fn parse(path: &Path, content: &str) -> Result<CaseFile, LoadError> {
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let parsed = if is_json {
            serde_json::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        };

        parsed.map_err(|message| LoadError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }
}

#[async_trait]
impl CaseResolver for FileResolver {
    async fn resolve(&self, reference: &CaseReference) -> Result<CaseModule, LoadError> {
        let path = self.path_of(reference);
        debug!("Resolving case {} at {}", reference, path.display());

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| LoadError::Read {
                path: path.clone(),
                source,
            })?;
        let mut file = Self::parse(&path, &content)?;

        if let Some(config) = file.config.as_mut() {
            for entry in &mut config.entries {
                if let Some(url) = entry.url.as_mut() {
                    *url = env::expand(url).map_err(|source| LoadError::Env {
                        path: path.clone(),
                        source,
                    })?;
                }
            }
        }

        Ok(CaseModule {
            config: file.config,
            run: file
                .run
                .map(|steps| Arc::new(ScriptRoutine::new(steps)) as Arc<dyn CaseRoutine>),
        })
    }
}

/// In-process registry of cases written in Rust
#[derive(Default)]
pub struct StaticResolver {
    cases: HashMap<CaseReference, (Option<CaseConfig>, Option<Arc<dyn CaseRoutine>>)>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        reference: CaseReference,
        config: CaseConfig,
        run: Arc<dyn CaseRoutine>,
    ) -> &mut Self {
        self.cases.insert(reference, (Some(config), Some(run)));
        self
    }

    /// Register a module as-is, including incomplete ones
    pub fn register_module(&mut self, reference: CaseReference, module: CaseModule) -> &mut Self {
        self.cases.insert(reference, (module.config, module.run));
        self
    }
}

#[async_trait]
impl CaseResolver for StaticResolver {
    async fn resolve(&self, reference: &CaseReference) -> Result<CaseModule, LoadError> {
        let (config, run) = self
            .cases
            .get(reference)
            .ok_or_else(|| LoadError::Unregistered(reference.to_string()))?;
        Ok(CaseModule {
            config: config.clone(),
            run: run.clone(),
        })
    }
}

/// A case that ended before submission
#[derive(Debug)]
pub struct CaseFailure {
    pub reference: CaseReference,
    pub identity: CaseIdentity,
    pub error: CaseError,
}

/// Result of loading one reference
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(CaseBundle),
    Failed(CaseFailure),
}

/// Resolves references and checks the `{config, run}` shape.
///
/// Never returns an error: every failure becomes a [`LoadOutcome::Failed`]
/// reported under project "undefined" and the file's base name.
#[derive(Clone)]
pub struct CaseLoader {
    resolver: Arc<dyn CaseResolver>,
}

impl CaseLoader {
    pub fn new(resolver: Arc<dyn CaseResolver>) -> Self {
        Self { resolver }
    }

    pub async fn load(&self, reference: &CaseReference) -> LoadOutcome {
        let module = match self.resolver.resolve(reference).await {
            Ok(module) => module,
            Err(source) => {
                return LoadOutcome::Failed(CaseFailure {
                    reference: reference.clone(),
                    identity: CaseIdentity::unknown(reference),
                    error: CaseError::Load {
                        reference: reference.to_string(),
                        source,
                    },
                });
            }
        };

        match validate(module) {
            Ok((config, run)) => LoadOutcome::Loaded(CaseBundle {
                reference: reference.clone(),
                config,
                run,
            }),
            Err(reason) => LoadOutcome::Failed(CaseFailure {
                reference: reference.clone(),
                identity: CaseIdentity::unknown(reference),
                error: CaseError::Malformed {
                    reference: reference.to_string(),
                    reason: reason.to_string(),
                },
            }),
        }
    }
}

fn validate(module: CaseModule) -> Result<(CaseConfig, Arc<dyn CaseRoutine>), &'static str> {
    match (module.config, module.run) {
        (Some(config), Some(run)) if config.entry_url().is_some() => Ok((config, run)),
        (Some(_), Some(_)) => Err("missing entry url"),
        (None, _) => Err("missing config object"),
        (_, None) => Err("missing run routine"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Entry;
    use crate::testing::NoopRoutine;

    fn config_with_url(url: &str) -> CaseConfig {
        CaseConfig {
            project: Some("demo".to_string()),
            name: Some("home".to_string()),
            entries: vec![Entry {
                url: Some(url.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_path_of() {
        let resolver = FileResolver::new("src");
        assert_eq!(
            resolver.path_of(&CaseReference::new("./cases/a.yaml")),
            PathBuf::from("src/cases/a.yaml")
        );
        assert_eq!(
            resolver.path_of(&CaseReference::new("/tmp/cases/a.yaml")),
            PathBuf::from("/tmp/cases/a.yaml")
        );
    }

    #[tokio::test]
    async fn test_static_case_loads() {
        let mut resolver = StaticResolver::new();
        resolver.register(
            CaseReference::new("./home"),
            config_with_url("https://example.com"),
            Arc::new(NoopRoutine),
        );
        let loader = CaseLoader::new(Arc::new(resolver));

        match loader.load(&CaseReference::new("./home")).await {
            LoadOutcome::Loaded(bundle) => {
                assert_eq!(bundle.identity().project, "demo");
                assert_eq!(bundle.config.entry_url(), Some("https://example.com"));
            }
            LoadOutcome::Failed(f) => panic!("unexpected failure: {}", f.error),
        }
    }

    #[tokio::test]
    async fn test_unregistered_is_load_error() {
        let loader = CaseLoader::new(Arc::new(StaticResolver::new()));
        match loader.load(&CaseReference::new("./cases/missing.yaml")).await {
            LoadOutcome::Failed(f) => {
                assert!(matches!(f.error, CaseError::Load { .. }));
                assert_eq!(f.identity.project, "undefined");
                assert_eq!(f.identity.name, "missing");
            }
            LoadOutcome::Loaded(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_missing_parts_are_malformed() {
        let mut resolver = StaticResolver::new();
        resolver.register_module(
            CaseReference::new("./no_run.yaml"),
            CaseModule {
                config: Some(config_with_url("https://example.com")),
                run: None,
            },
        );
        resolver.register_module(
            CaseReference::new("./no_url.yaml"),
            CaseModule {
                config: Some(CaseConfig::default()),
                run: Some(Arc::new(NoopRoutine)),
            },
        );
        resolver.register_module(CaseReference::new("./empty.yaml"), CaseModule::default());
        let loader = CaseLoader::new(Arc::new(resolver));

        for (reference, reason) in [
            ("./no_run.yaml", "missing run routine"),
            ("./no_url.yaml", "missing entry url"),
            ("./empty.yaml", "missing config object"),
        ] {
            match loader.load(&CaseReference::new(reference)).await {
                LoadOutcome::Failed(CaseFailure {
                    error: CaseError::Malformed { reason: r, .. },
                    identity,
                    ..
                }) => {
                    assert_eq!(r, reason);
                    assert_eq!(identity.project, "undefined");
                }
                other => panic!("{}: unexpected outcome {:?}", reference, other),
            }
        }
    }

    #[test]
    fn test_parse_json_case() {
        let json = r##"{
            "config": { "project": "p", "name": "n", "entries": [{ "url": "https://example.com" }] },
            "run": [{ "action": "click", "selector": "#go" }]
        }"##;
        let file = FileResolver::parse(Path::new("case.json"), json).unwrap();
        assert_eq!(file.run.unwrap().len(), 1);
        assert_eq!(file.config.unwrap().name.as_deref(), Some("n"));
    }

    #[tokio::test]
    async fn test_entry_url_expands_environment() {
        std::env::set_var("AUTOTEST_LOADER_HOST", "shop.example.com");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ok.yaml"),
            "config:\n  entries:\n    - url: https://${AUTOTEST_LOADER_HOST}/cart\nrun: []\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("unset.yaml"),
            "config:\n  entries:\n    - url: https://${AUTOTEST_LOADER_UNSET}/\nrun: []\n",
        )
        .unwrap();

        let loader = CaseLoader::new(Arc::new(FileResolver::new(dir.path())));

        let LoadOutcome::Loaded(bundle) = loader.load(&CaseReference::new("./ok.yaml")).await else {
            panic!("expected ok.yaml to load");
        };
        assert_eq!(bundle.config.entry_url(), Some("https://shop.example.com/cart"));

        let LoadOutcome::Failed(failure) = loader.load(&CaseReference::new("./unset.yaml")).await
        else {
            panic!("expected unset.yaml to fail");
        };
        assert_eq!(failure.identity.project, "undefined");
        assert!(failure.error.to_string().contains("AUTOTEST_LOADER_UNSET"));
    }
}
