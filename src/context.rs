use std::sync::Arc;

use crate::bundle::{BundleLoader, FileBundleLoader};
use crate::config::BridgeConfig;

/// Process-wide collaborators, passed explicitly to every page and instance
/// manager.
#[derive(Clone)]
pub struct BridgeContext {
    loader: Arc<dyn BundleLoader>,
    config: Arc<BridgeConfig>,
}

impl BridgeContext {
    pub fn new(loader: Arc<dyn BundleLoader>, config: BridgeConfig) -> Self {
        Self {
            loader,
            config: Arc::new(config),
        }
    }

    /// Context with a filesystem loader rooted at `config.bundle_root`.
    pub fn from_config(config: BridgeConfig) -> Self {
        let loader = FileBundleLoader::new(config.bundle_root.clone());
        Self::new(Arc::new(loader), config)
    }

    pub fn loader(&self) -> &Arc<dyn BundleLoader> {
        &self.loader
    }

    pub fn config(&self) -> &Arc<BridgeConfig> {
        &self.config
    }
}
