use tracing::debug;

use crate::command::MutationCommand;
use crate::dispatch::{DispatchBridge, SessionId};
use crate::instance::{InstanceManager, RuntimeInstance};
use crate::lifecycle::LifecycleState;
use crate::toolkit::{NativeHandle, NativeOp};
use crate::translator::{BatchReport, ViewTreeTranslator};

/// Binds one runtime instance to the native tree built from its commands.
pub struct BridgeSession {
    instance: RuntimeInstance,
    translator: ViewTreeTranslator,
    presented: bool,
}

impl BridgeSession {
    pub fn new(instance: RuntimeInstance) -> Self {
        Self {
            instance,
            translator: ViewTreeTranslator::new(),
            presented: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.instance.session()
    }

    pub fn instance(&self) -> &RuntimeInstance {
        &self.instance
    }

    pub fn state(&self) -> LifecycleState {
        self.instance.state()
    }

    pub fn bridge(&self) -> &DispatchBridge {
        self.instance.bridge()
    }

    pub fn translator(&self) -> &ViewTreeTranslator {
        &self.translator
    }

    pub fn root_handle(&self) -> NativeHandle {
        self.translator.root_handle()
    }

    /// Whether this session's root is what the page currently shows.
    pub fn is_presented(&self) -> bool {
        self.presented
    }

    pub(crate) fn mark_presented(&mut self) {
        self.presented = true;
    }

    /// Apply one runtime batch. Batches arriving after the instance left the
    /// mutating states are dropped whole.
    pub fn apply(&mut self, commands: Vec<MutationCommand>) -> Option<BatchReport> {
        let state = self.instance.state();
        if !state.accepts_mutations() {
            debug!(
                target: "bridge",
                session = self.id(),
                %state,
                commands = commands.len(),
                "dropping batch for instance that no longer accepts mutations"
            );
            return None;
        }
        Some(self.translator.apply_batch(commands))
    }

    pub(crate) fn take_pending(&mut self) -> Vec<NativeOp> {
        self.translator.take_pending()
    }

    /// Stop the runtime without touching the native tree, which stays
    /// visible until [`BridgeSession::teardown`].
    pub(crate) fn retire(&mut self, manager: &InstanceManager) {
        manager.dispose(&mut self.instance);
    }

    pub(crate) fn instance_mut(&mut self) -> &mut RuntimeInstance {
        &mut self.instance
    }

    /// Dispose the instance and release every native object of the tree.
    pub fn teardown(&mut self, manager: &InstanceManager) -> Vec<NativeOp> {
        manager.dispose(&mut self.instance);
        self.presented = false;
        self.translator.teardown()
    }
}
