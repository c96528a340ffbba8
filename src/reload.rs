use std::path::{Path, PathBuf};

use notify::{
    Error as NotifyError, Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode,
    Watcher as _,
};
use tracing::{debug, info, warn};

use crate::dispatch::ReloadTrigger;

/// Requests a page reload whenever the bundle file changes on disk. The
/// watch stops when this value is dropped.
pub struct BundleWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl BundleWatcher {
    pub fn spawn(path: &Path, trigger: ReloadTrigger) -> Result<Self, NotifyError> {
        let mut watcher =
            notify::recommended_watcher(move |event: Result<NotifyEvent, NotifyError>| match event {
                Ok(event) if is_content_change(&event.kind) => {
                    debug!(target: "reload", paths = ?event.paths, "bundle changed");
                    trigger.request();
                }
                Ok(_) => {}
                Err(err) => warn!(target: "reload", error = %err, "bundle watch error"),
            })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        info!(target: "reload", path = %path.display(), "watching bundle");
        Ok(Self {
            path: path.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}
