// Library exports for the host binary and tests

pub mod activation;
pub mod bundle;
pub mod command;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod instance;
pub mod js;
pub mod lifecycle;
pub mod page;
pub mod reload;
pub mod session;
pub mod toolkit;
pub mod translator;

// Re-export commonly used types
pub use activation::{ActivationError, ActivationRegistry, MAIN_PAGE_CLASS};
pub use bundle::{BundleLoader, BundleRef, FileBundleLoader, MemoryBundleLoader};
pub use command::{props, MutationCommand, PropMap, ViewId};
pub use config::{BridgeConfig, ConfigError};
pub use context::BridgeContext;
pub use dispatch::{DispatchBridge, NativeDispatcher, SessionId};
pub use error::{BridgeError, BridgeResult, BundleLoadError};
pub use instance::{InstanceManager, RuntimeInstance};
pub use js::RuntimeScope;
pub use lifecycle::LifecycleState;
pub use page::{PageAdapter, PumpReport};
pub use session::BridgeSession;
pub use toolkit::{ContentSlot, MemoryToolkit, NativeHandle, NativeOp, NativeToolkit, TreeSnapshot};
pub use translator::{BatchReport, ViewTreeTranslator};
