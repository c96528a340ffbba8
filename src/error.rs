use std::time::Duration;

use thiserror::Error;

use crate::command::ViewId;

#[derive(Debug, Error)]
pub enum BundleLoadError {
    #[error("bundle not found: {0}")]
    NotFound(String),
    #[error("failed to read bundle: {0}")]
    Io(#[from] std::io::Error),
    #[error("bundle is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid bundle reference: {0}")]
    InvalidReference(String),
    #[error("bundle evaluation failed: {0}")]
    Evaluation(String),
    #[error("application component {0:?} was not registered by the bundle")]
    UnregisteredComponent(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to load bundle: {0}")]
    BundleLoad(#[from] BundleLoadError),
    #[error("failed to start script runtime: {0}")]
    RuntimeStart(String),
    #[error("unknown view node {0}")]
    UnknownNode(ViewId),
    #[error("view node {0} already exists")]
    DuplicateNode(ViewId),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("script runtime did not respond within {0:?}")]
    RuntimeUnresponsive(Duration),
    #[error("runtime instance has been disposed")]
    Disposed,
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl BridgeError {
    /// Errors the translator drops and logs without tearing anything down.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::UnknownNode(_)
                | BridgeError::DuplicateNode(_)
                | BridgeError::InvalidCommand(_)
                | BridgeError::RuntimeUnresponsive(_)
        )
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
