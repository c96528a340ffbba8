use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::bundle::{load_source, BundleLoader, BundleRef};
use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::dispatch::{CancelFlag, DispatchBridge, NativeDispatcher, SessionId};
use crate::error::BridgeResult;
use crate::js::{spawn_worker, WorkerSpec};
use crate::lifecycle::{LifecycleState, PublishedState};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// One live script execution context and the thread that owns it.
pub struct RuntimeInstance {
    token: Uuid,
    session: SessionId,
    bundle: BundleRef,
    config: Arc<BridgeConfig>,
    state: PublishedState,
    bridge: DispatchBridge,
    worker: Option<JoinHandle<()>>,
}

impl RuntimeInstance {
    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn bundle(&self) -> &BundleRef {
        &self.bundle
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// Shareable view of the published lifecycle state.
    pub fn published_state(&self) -> PublishedState {
        self.state.clone()
    }

    pub fn bridge(&self) -> &DispatchBridge {
        &self.bridge
    }

    pub fn is_disposed(&self) -> bool {
        self.worker.is_none() && self.state.is_disposed()
    }

    fn shutdown(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.bridge.cancel();
        let _ = self.state.transition(LifecycleState::Disposed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(target: "bridge", session = self.session, "runtime thread panicked");
            }
        }
        debug!(
            target: "bridge",
            session = self.session,
            token = %self.token,
            "runtime instance disposed"
        );
    }
}

impl Drop for RuntimeInstance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Creates, reloads and disposes runtime instances.
pub struct InstanceManager {
    loader: Arc<dyn BundleLoader>,
}

impl InstanceManager {
    pub fn new(context: &BridgeContext) -> Self {
        Self {
            loader: Arc::clone(context.loader()),
        }
    }

    /// Resolve `bundle`, start a runtime thread for it and begin loading.
    pub fn create(
        &self,
        bundle: BundleRef,
        config: Arc<BridgeConfig>,
        native: &NativeDispatcher,
    ) -> BridgeResult<RuntimeInstance> {
        self.spawn(bundle, config, native, LifecycleState::Uninitialized)
    }

    /// Dispose `instance` and start a fresh one for the same bundle.
    pub fn reload(
        &self,
        instance: &mut RuntimeInstance,
        native: &NativeDispatcher,
    ) -> BridgeResult<RuntimeInstance> {
        if instance.state.transition(LifecycleState::Reloading).is_ok() {
            debug!(target: "bridge", session = instance.session, "instance reloading");
        }
        self.dispose(instance);
        self.spawn(
            instance.bundle.clone(),
            Arc::clone(&instance.config),
            native,
            LifecycleState::Reloading,
        )
    }

    /// Cancel outstanding work, stop the runtime thread and release the
    /// script context. Does nothing for an already disposed instance.
    pub fn dispose(&self, instance: &mut RuntimeInstance) {
        instance.shutdown();
    }

    fn spawn(
        &self,
        bundle: BundleRef,
        config: Arc<BridgeConfig>,
        native: &NativeDispatcher,
        initial: LifecycleState,
    ) -> BridgeResult<RuntimeInstance> {
        config.validate()?;
        let source = load_source(self.loader.as_ref(), &bundle)?;

        let session = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        let token = Uuid::new_v4();
        let cancel = CancelFlag::new();
        let state = PublishedState::new(initial);
        let (runtime_tx, runtime_rx) = unbounded_channel();
        let native_sender = native.sender(session, cancel.clone());

        let worker = spawn_worker(WorkerSpec {
            session,
            source,
            source_name: bundle.source_name(),
            config: Arc::clone(&config),
            state: state.clone(),
            cancel: cancel.clone(),
            native: native_sender.clone(),
            tasks: runtime_rx,
        });
        let worker = match worker {
            Ok(worker) => worker,
            Err(err) => {
                let _ = state.transition(LifecycleState::Disposed);
                return Err(err);
            }
        };

        info!(target: "bridge", session, %token, bundle = %bundle, "runtime instance created");
        Ok(RuntimeInstance {
            token,
            session,
            bundle,
            state,
            bridge: DispatchBridge::new(
                runtime_tx,
                native_sender,
                cancel,
                config.call_sync_timeout(),
            ),
            config,
            worker: Some(worker),
        })
    }
}
