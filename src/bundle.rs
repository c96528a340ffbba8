use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use url::Url;

use crate::error::BundleLoadError;

const BUNDLE_SCHEME: &str = "bundle";
const BUNDLE_EXTENSION: &str = "bundle.js";

/// Opaque locator for a UI bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BundleRef {
    /// A file on disk, absolute or relative to the loader's root.
    Path(PathBuf),
    /// A logical name such as `bundle:main`, resolved by the loader.
    Id(String),
}

impl BundleRef {
    /// Accepts `file://` URLs, `bundle:<name>` identifiers and plain paths.
    pub fn parse(raw: &str) -> Result<Self, BundleLoadError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BundleLoadError::InvalidReference("empty reference".into()));
        }

        if let Some(name) = trimmed.strip_prefix("bundle:") {
            let name = name.trim_start_matches('/');
            if name.is_empty() {
                return Err(BundleLoadError::InvalidReference(trimmed.to_string()));
            }
            return Ok(BundleRef::Id(name.to_string()));
        }

        match Url::parse(trimmed) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(BundleRef::Path)
                .map_err(|_| BundleLoadError::InvalidReference(trimmed.to_string())),
            // Single-letter schemes are drive letters.
            Ok(url) if url.scheme().len() > 1 => Err(
                BundleLoadError::InvalidReference(format!("unsupported scheme {}", url.scheme())),
            ),
            _ => Ok(BundleRef::Path(PathBuf::from(trimmed))),
        }
    }

    pub fn id(name: impl Into<String>) -> Self {
        BundleRef::Id(name.into())
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        BundleRef::Path(path.into())
    }

    /// Name used for script source URLs in stack traces.
    pub fn source_name(&self) -> String {
        match self {
            BundleRef::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            BundleRef::Id(name) => format!("{name}.{BUNDLE_EXTENSION}"),
        }
    }
}

impl fmt::Display for BundleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleRef::Path(path) => write!(f, "{}", path.display()),
            BundleRef::Id(name) => write!(f, "{BUNDLE_SCHEME}:{name}"),
        }
    }
}

/// Resolves bundle references into source bytes.
pub trait BundleLoader: Send + Sync {
    fn resolve(&self, reference: &BundleRef) -> Result<Vec<u8>, BundleLoadError>;

    /// Filesystem location backing `reference`, if any. Used for live reload.
    fn watch_path(&self, _reference: &BundleRef) -> Option<PathBuf> {
        None
    }
}

/// Loads bundles from disk. `Id` references map to `<root>/<name>.bundle.js`.
#[derive(Debug, Clone, Default)]
pub struct FileBundleLoader {
    root: Option<PathBuf>,
}

impl FileBundleLoader {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn locate(&self, reference: &BundleRef) -> Result<PathBuf, BundleLoadError> {
        match reference {
            BundleRef::Path(path) if path.is_absolute() => Ok(path.clone()),
            BundleRef::Path(path) => Ok(self.join_root(path)),
            BundleRef::Id(name) => {
                let Some(root) = &self.root else {
                    return Err(BundleLoadError::NotFound(reference.to_string()));
                };
                Ok(root.join(format!("{name}.{BUNDLE_EXTENSION}")))
            }
        }
    }

    fn join_root(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path),
            None => path.to_path_buf(),
        }
    }
}

impl BundleLoader for FileBundleLoader {
    fn resolve(&self, reference: &BundleRef) -> Result<Vec<u8>, BundleLoadError> {
        let path = self.locate(reference)?;
        if path.is_dir() {
            return Err(BundleLoadError::InvalidReference(format!(
                "{} is a directory",
                path.display()
            )));
        }
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BundleLoadError::NotFound(path.display().to_string()))
            }
            Err(err) => Err(BundleLoadError::Io(err)),
        }
    }

    fn watch_path(&self, reference: &BundleRef) -> Option<PathBuf> {
        self.locate(reference).ok()
    }
}

/// In-process bundle table. Entries can be replaced while pages are live,
/// which is how tests drive reloads.
#[derive(Debug, Default)]
pub struct MemoryBundleLoader {
    bundles: RwLock<HashMap<BundleRef, Vec<u8>>>,
}

impl MemoryBundleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(self, reference: BundleRef, source: impl Into<Vec<u8>>) -> Self {
        self.insert(reference, source);
        self
    }

    pub fn insert(&self, reference: BundleRef, source: impl Into<Vec<u8>>) {
        if let Ok(mut bundles) = self.bundles.write() {
            bundles.insert(reference, source.into());
        }
    }

    pub fn remove(&self, reference: &BundleRef) {
        if let Ok(mut bundles) = self.bundles.write() {
            bundles.remove(reference);
        }
    }
}

impl BundleLoader for MemoryBundleLoader {
    fn resolve(&self, reference: &BundleRef) -> Result<Vec<u8>, BundleLoadError> {
        let bundles = self
            .bundles
            .read()
            .map_err(|_| BundleLoadError::NotFound(reference.to_string()))?;
        bundles
            .get(reference)
            .cloned()
            .ok_or_else(|| BundleLoadError::NotFound(reference.to_string()))
    }
}

/// Resolve and decode a bundle into script source.
pub(crate) fn load_source(
    loader: &dyn BundleLoader,
    reference: &BundleRef,
) -> Result<String, BundleLoadError> {
    let bytes = loader.resolve(reference)?;
    Ok(String::from_utf8(bytes)?)
}
