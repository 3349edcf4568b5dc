//! Case discovery: turn a case file or directory into ordered references

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::case::CaseReference;
use crate::error::DiscoveryError;
use crate::settings::Settings;

/// What counts as a case file and how its path is normalized
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Recognized extensions, without the dot
    pub extensions: Vec<String>,

    /// Prefix stripped from discovered paths; the loader resolves against it
    pub source_root: PathBuf,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["yaml".to_string(), "yml".to_string(), "json".to_string()],
            source_root: PathBuf::from("."),
        }
    }
}

impl DiscoveryOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            extensions: settings.autotest.case_extensions.clone(),
            source_root: settings.autotest.source_root.clone(),
        }
    }

    fn is_case_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
            })
            .unwrap_or(false)
    }
}

/// Discover the cases under `root`.
///
/// A single case file yields one reference. A directory is walked depth
/// first with entries sorted by file name, so the order is stable across
/// runs. A missing root, an unreadable entry, or a root that is a file
/// with an unrecognized extension fails the whole discovery.
pub fn discover(
    root: &Path,
    options: &DiscoveryOptions,
) -> Result<Vec<CaseReference>, DiscoveryError> {
    let metadata = std::fs::metadata(root).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DiscoveryError::NotFound(root.to_path_buf())
        } else {
            DiscoveryError::Io {
                path: root.to_path_buf(),
                source: e,
            }
        }
    })?;

    if metadata.is_file() {
        if !options.is_case_file(root) {
            return Err(DiscoveryError::UnsupportedFile(root.to_path_buf()));
        }
        return Ok(vec![normalize_reference(root, &options.source_root)]);
    }

    let mut references = Vec::new();
    for entry in walkdir::WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| DiscoveryError::Walk {
            path: root.to_path_buf(),
            source: e,
        })?;
        if entry.file_type().is_file() && options.is_case_file(entry.path()) {
            references.push(normalize_reference(entry.path(), &options.source_root));
        }
    }

    debug!("Discovered {} case(s) under {}", references.len(), root.display());
    Ok(references)
}

/// Normalize a discovered path into a loader reference.
///
/// Separators become `/`, a leading `<source_root>/` (optionally preceded
/// by `./`) is stripped, and relative results get a `./` prefix. Absolute
/// paths outside the source root are kept as they are.
pub fn normalize_reference(path: &Path, source_root: &Path) -> CaseReference {
    let path = path.to_string_lossy().replace('\\', "/");
    let root = source_root.to_string_lossy().replace('\\', "/");
    let root = root.trim_start_matches("./").trim_end_matches('/');

    let mut rest = path.as_str();
    if !root.is_empty() && root != "." {
        let relative = rest.strip_prefix("./").unwrap_or(rest);
        if let Some(stripped) = relative
            .strip_prefix(root)
            .and_then(|r| r.strip_prefix('/'))
        {
            rest = stripped;
        }
    }

    if rest.starts_with('/') || rest.starts_with("./") || has_drive_prefix(rest) {
        CaseReference::new(rest)
    } else {
        CaseReference::new(format!("./{}", rest))
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}
