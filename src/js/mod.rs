pub mod engine;
pub mod host;
pub mod timers;
mod worker;

pub use engine::{EngineLimits, QuickJsEngine};
pub use worker::RuntimeScope;
pub(crate) use worker::{spawn as spawn_worker, WorkerSpec};
