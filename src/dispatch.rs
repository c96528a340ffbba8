use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::command::MutationCommand;
use crate::error::{BridgeError, BridgeResult};
use crate::js::RuntimeScope;

pub type SessionId = u64;

/// Work executed on the runtime thread with access to the script context.
pub type RuntimeJob = Box<dyn FnOnce(&mut RuntimeScope<'_>) + Send + 'static>;

/// Work executed on the native thread.
pub type NativeJob = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub(crate) enum RuntimeTask {
    Run(RuntimeJob),
    Pause,
    Resume,
    Shutdown,
}

/// Messages delivered to the native thread.
pub enum NativeMessage {
    Task(NativeJob),
    /// Every command the runtime emitted during one of its turns.
    Batch(Vec<MutationCommand>),
    /// The bundle finished loading; the batches before this one form the
    /// first full tree.
    Ready,
    LoadFailed(BridgeError),
    ReloadRequested,
}

impl NativeMessage {
    fn kind(&self) -> &'static str {
        match self {
            NativeMessage::Task(_) => "task",
            NativeMessage::Batch(_) => "batch",
            NativeMessage::Ready => "ready",
            NativeMessage::LoadFailed(_) => "load_failed",
            NativeMessage::ReloadRequested => "reload_requested",
        }
    }
}

pub struct NativeEnvelope {
    /// `None` for page-level messages that do not belong to one instance.
    pub session: Option<SessionId>,
    pub message: NativeMessage,
}

/// Sending half of the native queue, bound to one session.
#[derive(Clone)]
pub struct NativeSender {
    tx: UnboundedSender<NativeEnvelope>,
    session: SessionId,
    cancel: CancelFlag,
}

impl NativeSender {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Enqueue a message. Returns `false` once the session is cancelled or
    /// the native side has gone away.
    pub fn post(&self, message: NativeMessage) -> bool {
        if self.cancel.is_cancelled() {
            debug!(
                target: "bridge",
                session = self.session,
                kind = message.kind(),
                "dropping message from cancelled session"
            );
            return false;
        }
        self.tx
            .send(NativeEnvelope {
                session: Some(self.session),
                message,
            })
            .is_ok()
    }

    pub fn post_task<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(NativeMessage::Task(Box::new(f)))
    }
}

/// Page-level handle that asks the native side to reload.
#[derive(Clone)]
pub struct ReloadTrigger {
    tx: UnboundedSender<NativeEnvelope>,
}

impl ReloadTrigger {
    pub fn request(&self) -> bool {
        self.tx
            .send(NativeEnvelope {
                session: None,
                message: NativeMessage::ReloadRequested,
            })
            .is_ok()
    }
}

/// Receiving half of the native queue. Owned by the UI thread.
pub struct NativeDispatcher {
    tx: UnboundedSender<NativeEnvelope>,
    rx: UnboundedReceiver<NativeEnvelope>,
    owner: ThreadId,
}

impl Default for NativeDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeDispatcher {
    /// Bind the dispatcher to the calling thread.
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            tx,
            rx,
            owner: thread::current().id(),
        }
    }

    pub fn sender(&self, session: SessionId, cancel: CancelFlag) -> NativeSender {
        NativeSender {
            tx: self.tx.clone(),
            session,
            cancel,
        }
    }

    pub fn reload_trigger(&self) -> ReloadTrigger {
        ReloadTrigger {
            tx: self.tx.clone(),
        }
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Take everything queued so far, in FIFO order.
    pub fn drain(&mut self) -> Vec<NativeEnvelope> {
        debug_assert!(
            self.is_owner_thread(),
            "native queue drained off the UI thread"
        );
        let mut drained = Vec::new();
        while let Ok(envelope) = self.rx.try_recv() {
            drained.push(envelope);
        }
        drained
    }
}

/// Native-side endpoint of one runtime instance.
pub struct DispatchBridge {
    session: SessionId,
    runtime_tx: UnboundedSender<RuntimeTask>,
    native: NativeSender,
    cancel: CancelFlag,
    call_timeout: Duration,
}

impl DispatchBridge {
    pub(crate) fn new(
        runtime_tx: UnboundedSender<RuntimeTask>,
        native: NativeSender,
        cancel: CancelFlag,
        call_timeout: Duration,
    ) -> Self {
        Self {
            session: native.session(),
            runtime_tx,
            native,
            cancel,
            call_timeout,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Queue work for the runtime thread behind everything posted before it.
    pub fn post_to_runtime<F>(&self, f: F) -> BridgeResult<()>
    where
        F: FnOnce(&mut RuntimeScope<'_>) + Send + 'static,
    {
        self.send(RuntimeTask::Run(Box::new(f)))
    }

    /// Queue work for the native thread behind everything posted before it.
    pub fn post_to_native<F>(&self, f: F) -> BridgeResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.native.post_task(f) {
            Ok(())
        } else {
            Err(BridgeError::Disposed)
        }
    }

    /// Run `f` on the runtime thread and wait for its result.
    ///
    /// Must not be called from the runtime thread. Blocks for at most the
    /// configured timeout; a result arriving after that is discarded.
    pub fn call_sync<T, F>(&self, f: F) -> BridgeResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut RuntimeScope<'_>) -> T + Send + 'static,
    {
        let (tx, rx) = sync_channel::<T>(1);
        self.send(RuntimeTask::Run(Box::new(move |scope| {
            // The caller may have stopped waiting; its receiver is then gone.
            let _ = tx.send(f(scope));
        })))?;

        match rx.recv_timeout(self.call_timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    target: "bridge",
                    session = self.session,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "synchronous runtime call abandoned"
                );
                Err(BridgeError::RuntimeUnresponsive(self.call_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Disposed),
        }
    }

    pub(crate) fn pause(&self) -> BridgeResult<()> {
        self.send(RuntimeTask::Pause)
    }

    pub(crate) fn resume(&self) -> BridgeResult<()> {
        self.send(RuntimeTask::Resume)
    }

    /// Cancel all outstanding work in both directions and ask the runtime
    /// thread to exit.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
        let _ = self.runtime_tx.send(RuntimeTask::Shutdown);
    }

    fn send(&self, task: RuntimeTask) -> BridgeResult<()> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::Disposed);
        }
        self.runtime_tx
            .send(task)
            .map_err(|_| BridgeError::Disposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_queue_is_fifo_per_sender() {
        let mut dispatcher = NativeDispatcher::new();
        let sender = dispatcher.sender(7, CancelFlag::new());
        for n in 0..5u64 {
            sender.post(NativeMessage::Batch(vec![MutationCommand::delete(n)]));
        }
        let order: Vec<u64> = dispatcher
            .drain()
            .into_iter()
            .map(|envelope| match envelope.message {
                NativeMessage::Batch(commands) => match &commands[0] {
                    MutationCommand::Delete { id } => id.0,
                    _ => unreachable!(),
                },
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cancelled_sender_drops_messages() {
        let mut dispatcher = NativeDispatcher::new();
        let cancel = CancelFlag::new();
        let sender = dispatcher.sender(1, cancel.clone());
        assert!(sender.post(NativeMessage::Ready));
        cancel.cancel();
        assert!(!sender.post(NativeMessage::Ready));
        assert_eq!(dispatcher.drain().len(), 1);
    }

    #[test]
    fn reload_trigger_has_no_session() {
        let mut dispatcher = NativeDispatcher::new();
        assert!(dispatcher.reload_trigger().request());
        let drained = dispatcher.drain();
        assert_eq!(drained.len(), 1);
        assert!(drained[0].session.is_none());
        assert!(matches!(drained[0].message, NativeMessage::ReloadRequested));
    }

    #[test]
    fn cancelled_bridge_rejects_work() {
        let dispatcher = NativeDispatcher::new();
        let (runtime_tx, _runtime_rx) = unbounded_channel();
        let cancel = CancelFlag::new();
        let bridge = DispatchBridge::new(
            runtime_tx,
            dispatcher.sender(3, cancel.clone()),
            cancel,
            Duration::from_millis(10),
        );
        bridge.cancel();
        assert!(matches!(bridge.post_to_runtime(|_| {}), Err(BridgeError::Disposed)));
        assert!(matches!(bridge.post_to_native(|| {}), Err(BridgeError::Disposed)));
        assert!(matches!(bridge.call_sync(|_| 1), Err(BridgeError::Disposed)));
    }

    #[test]
    fn call_sync_times_out_when_nobody_runs_the_queue() {
        let dispatcher = NativeDispatcher::new();
        let (runtime_tx, _runtime_rx) = unbounded_channel();
        let cancel = CancelFlag::new();
        let bridge = DispatchBridge::new(
            runtime_tx,
            dispatcher.sender(4, cancel.clone()),
            cancel,
            Duration::from_millis(30),
        );
        let started = std::time::Instant::now();
        let result = bridge.call_sync(|_| 42);
        assert!(matches!(result, Err(BridgeError::RuntimeUnresponsive(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
