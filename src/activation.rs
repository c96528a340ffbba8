use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::bundle::BundleRef;
use crate::context::BridgeContext;
use crate::page::PageAdapter;
use crate::toolkit::NativeToolkit;

/// Runtime class name the host activates for the bridge's main page.
pub const MAIN_PAGE_CLASS: &str = "loadmaster.MainPage";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActivationError {
    #[error("no page registered for runtime class {0}")]
    UnknownClass(String),
}

pub type PageFactory<T> = Box<dyn Fn(&BridgeContext, T) -> PageAdapter<T> + Send + Sync>;

/// Maps runtime class names to page constructors.
pub struct ActivationRegistry<T: NativeToolkit> {
    factories: HashMap<String, PageFactory<T>>,
}

impl<T: NativeToolkit> Default for ActivationRegistry<T> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<T: NativeToolkit + 'static> ActivationRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with [`MAIN_PAGE_CLASS`] bound to a page for `bundle`.
    pub fn with_main_page(bundle: BundleRef) -> Self {
        let mut registry = Self::new();
        registry.register(MAIN_PAGE_CLASS, move |context, toolkit| {
            PageAdapter::new(context.clone(), bundle.clone(), toolkit)
        });
        registry
    }

    /// Bind `class_name`, replacing any previous factory.
    pub fn register<F>(&mut self, class_name: impl Into<String>, factory: F)
    where
        F: Fn(&BridgeContext, T) -> PageAdapter<T> + Send + Sync + 'static,
    {
        self.factories.insert(class_name.into(), Box::new(factory));
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }

    pub fn activate(
        &self,
        class_name: &str,
        context: &BridgeContext,
        toolkit: T,
    ) -> Result<PageAdapter<T>, ActivationError> {
        let factory = self
            .factories
            .get(class_name)
            .ok_or_else(|| ActivationError::UnknownClass(class_name.to_string()))?;
        debug!(target: "page", class = class_name, "activating page");
        Ok(factory(context, toolkit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::MemoryToolkit;

    #[test]
    fn unknown_class_is_rejected() {
        let registry = ActivationRegistry::<MemoryToolkit>::with_main_page(BundleRef::id("main"));
        assert!(registry.contains(MAIN_PAGE_CLASS));
        assert!(!registry.contains("loadmaster.Other"));

        let context = BridgeContext::from_config(Default::default());
        let err = registry
            .activate("loadmaster.Other", &context, MemoryToolkit::new())
            .err()
            .expect("activation should fail");
        assert_eq!(err, ActivationError::UnknownClass("loadmaster.Other".into()));
    }
}
