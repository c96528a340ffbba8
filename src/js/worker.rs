use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use rquickjs::Ctx;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, error, info};

use super::engine::EngineLimits;
use super::host::RuntimeHost;
use crate::command::MutationCommand;
use crate::config::BridgeConfig;
use crate::dispatch::{CancelFlag, NativeMessage, NativeSender, RuntimeTask, SessionId};
use crate::error::{BridgeError, BridgeResult};
use crate::lifecycle::{LifecycleState, PublishedState};

/// Access to the script context for work posted onto the runtime thread.
pub struct RuntimeScope<'a> {
    host: &'a RuntimeHost,
    native: &'a NativeSender,
}

impl<'a> RuntimeScope<'a> {
    pub fn session(&self) -> SessionId {
        self.native.session()
    }

    pub fn eval(&self, source: &str) -> Result<()> {
        self.host.engine().eval(source, "posted-task.js")
    }

    pub fn eval_with<V>(&self, source: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        self.host.engine().eval_with(source, "posted-task.js")
    }

    pub fn with_context<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> rquickjs::Result<T>,
    {
        self.host.engine().with_context(f)
    }

    /// Queue a command as if the script had emitted it.
    pub fn emit(&self, command: MutationCommand) {
        self.host.push_command(command);
    }

    pub fn pending_commands(&self) -> usize {
        self.host.pending_commands()
    }

    pub fn post_to_native<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.native.post_task(f)
    }
}

pub(crate) struct WorkerSpec {
    pub session: SessionId,
    pub source: String,
    pub source_name: String,
    pub config: Arc<BridgeConfig>,
    pub state: PublishedState,
    pub cancel: CancelFlag,
    pub native: NativeSender,
    pub tasks: UnboundedReceiver<RuntimeTask>,
}

/// Start the runtime thread. Returns once the script context exists, so
/// start-up failures surface to the caller; the bundle itself loads
/// asynchronously afterwards.
pub(crate) fn spawn(spec: WorkerSpec) -> BridgeResult<JoinHandle<()>> {
    let (started_tx, started_rx) = sync_channel::<Result<(), String>>(1);
    let name = format!("loadmaster-runtime-{}", spec.session);

    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || run(spec, started_tx))
        .map_err(|err| {
            BridgeError::RuntimeStart(format!("failed to spawn runtime thread: {err}"))
        })?;

    match started_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(message)) => {
            let _ = handle.join();
            Err(BridgeError::RuntimeStart(message))
        }
        Err(_) => {
            let _ = handle.join();
            Err(BridgeError::RuntimeStart(
                "runtime thread exited during start-up".into(),
            ))
        }
    }
}

fn run(spec: WorkerSpec, started_tx: std::sync::mpsc::SyncSender<Result<(), String>>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = started_tx.send(Err(format!("failed to build runtime executor: {err}")));
            return;
        }
    };

    runtime.block_on(async move {
        let WorkerSpec {
            session,
            source,
            source_name,
            config,
            state,
            cancel,
            native,
            mut tasks,
        } = spec;

        let limits = EngineLimits {
            memory_limit_bytes: config.memory_limit_bytes,
            max_stack_size: config.max_stack_size,
            max_pending_jobs: config.max_pending_jobs,
            ignore_logs: Arc::new(config.ignore_logs.clone()),
        };
        let (fired_tx, mut fired_rx) = unbounded_channel::<u32>();
        let host = match RuntimeHost::new(&limits, cancel.clone(), fired_tx) {
            Ok(host) => host,
            Err(err) => {
                let _ = started_tx.send(Err(format!("{err:#}")));
                return;
            }
        };

        if let Err(observed) = state.transition(LifecycleState::Loading) {
            let _ = started_tx.send(Err(format!("instance is {observed}, cannot start loading")));
            return;
        }
        let _ = started_tx.send(Ok(()));
        drop(started_tx);

        info!(target: "runtime", session, bundle = %source_name, "loading bundle");
        let loaded = host.load_bundle(
            &source,
            &source_name,
            config.app_name.as_deref(),
            &config.initial_props,
        );
        drop(source);

        if cancel.is_cancelled() {
            debug!(target: "runtime", session, "load cancelled");
            return;
        }
        flush(&host, &native);

        match loaded {
            Ok(()) => {
                if state.transition(LifecycleState::Ready).is_ok() {
                    info!(target: "runtime", session, "bundle ready");
                    native.post(NativeMessage::Ready);
                }
            }
            Err(err) => {
                error!(target: "runtime", session, error = %err, "bundle failed to load");
                let _ = state.transition(LifecycleState::Disposed);
                native.post(NativeMessage::LoadFailed(BridgeError::BundleLoad(err)));
                return;
            }
        }

        let mut paused = false;
        loop {
            tokio::select! {
                biased;
                task = tasks.recv() => {
                    let Some(task) = task else { break };
                    if cancel.is_cancelled() {
                        break;
                    }
                    match task {
                        RuntimeTask::Run(job) => {
                            let mut scope = RuntimeScope { host: &host, native: &native };
                            job(&mut scope);
                            host.drain_jobs();
                        }
                        RuntimeTask::Pause => {
                            paused = true;
                            host.timers().set_paused(true);
                            debug!(target: "runtime", session, "paused");
                        }
                        RuntimeTask::Resume => {
                            paused = false;
                            host.timers().set_paused(false);
                            debug!(target: "runtime", session, "resumed");
                        }
                        RuntimeTask::Shutdown => break,
                    }
                }
                Some(id) = fired_rx.recv(), if !paused => {
                    if let Err(err) = host.fire_timer(id) {
                        if cancel.is_cancelled() {
                            break;
                        }
                        error!(
                            target: "quickjs",
                            session,
                            timer = id,
                            error = %err,
                            "timer callback threw"
                        );
                    }
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            flush(&host, &native);
        }

        host.timers().clear_all();
        debug!(target: "runtime", session, "runtime thread exiting");
    });
}

/// End of a runtime turn: hand everything emitted during it to the native
/// side as one batch.
fn flush(host: &RuntimeHost, native: &NativeSender) {
    let commands = host.take_commands();
    if !commands.is_empty() {
        debug!(
            target: "runtime",
            session = native.session(),
            commands = commands.len(),
            "posting batch"
        );
        native.post(NativeMessage::Batch(commands));
    }
}
